//! gymctl: interactive console for the GymDesk backend.

mod commands;
mod completer;
pub mod display;
mod history;
mod prompt;

use clap::Parser;
use gym_core::{ClientConfig, SessionEvent};
use gym_driver::BlockingGymDriver;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

pub use self::commands::CommandHandler;
pub use self::display::DisplayConfig;

#[derive(Parser, Debug)]
#[command(name = "gymctl", version, about = "Admin console for the GymDesk backend")]
struct Args {
	/// Backend base URL, e.g. http://localhost:8000/api
	#[arg(long)]
	api_url: Option<String>,

	/// Config file
	#[arg(short, long, default_value = "gymctl.toml")]
	config: PathBuf,

	/// Run a command and exit (repeatable)
	#[arg(short, long)]
	execute: Vec<String>,

	/// Script file with one command per line; `-` reads stdin
	script: Option<String>,

	/// Skip the banner and timing output
	#[arg(short, long)]
	quiet: bool,

	/// Stop a script at the first failing command
	#[arg(long)]
	exit_on_error: bool,

	/// Mirror logs to stderr
	#[arg(short, long)]
	verbose: bool,

	/// Output format: table or json
	#[arg(long)]
	output: Option<display::OutputMode>,
}

#[derive(Debug, Clone)]
pub enum InputSource {
	Interactive,
	File(String),
	Stdin,
	CommandLine(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ReplOptions {
	pub input_source: InputSource,
	pub quiet: bool,
	pub exit_on_error: bool,
	pub output_format: Option<display::OutputMode>,
}

impl Default for ReplOptions {
	fn default() -> Self {
		Self {
			input_source: InputSource::Interactive,
			quiet: false,
			exit_on_error: false,
			output_format: None,
		}
	}
}

pub struct Repl {
	editor: Editor<completer::GymHelper, DefaultHistory>,
	command_handler: CommandHandler,
	display_config: DisplayConfig,
	driver: BlockingGymDriver,
	events: broadcast::Receiver<SessionEvent>,
	history: history::HistoryManager,
	api_url: String,
	command_count: usize,
	start_time: Instant,
}

impl Repl {
	pub fn with_options(config: &ClientConfig, options: &ReplOptions) -> anyhow::Result<Self> {
		let editor_config = Config::builder()
			.history_ignore_space(true)
			.auto_add_history(false)
			.completion_type(rustyline::CompletionType::List)
			.edit_mode(rustyline::EditMode::Emacs)
			.build();

		let mut helper = completer::GymHelper::new();
		let mut display_config = DisplayConfig::default();

		if options.quiet {
			display_config.show_timing = false;
		}
		if let Some(format) = options.output_format {
			display_config.output_mode = format;
		}
		if std::env::var_os("NO_COLOR").is_some() {
			colored::control::set_override(false);
			display_config.use_colors = false;
			helper.set_use_colors(false);
		}

		let mut editor = Editor::with_config(editor_config)?;
		editor.set_helper(Some(helper));

		let history = history::HistoryManager::new(history::HISTORY_FILE);
		if matches!(options.input_source, InputSource::Interactive) {
			history.load(&mut editor);
		}

		let driver = BlockingGymDriver::new(config)?;
		let events = driver.subscribe();

		Ok(Self {
			editor,
			command_handler: CommandHandler::new(),
			display_config,
			driver,
			events,
			history,
			api_url: config.api.base_url.clone(),
			command_count: 0,
			start_time: Instant::now(),
		})
	}

	pub fn run_with_options(&mut self, options: &ReplOptions) -> anyhow::Result<()> {
		let result = match &options.input_source {
			InputSource::Interactive => self.run_interactive(options.quiet),
			InputSource::File(path) => {
				if !options.quiet {
					display::print_info(&format!("Executing file: {}", path));
				}
				let content = fs::read_to_string(path)?;
				self.execute_script(&content, options)
			}
			InputSource::Stdin => {
				let mut content = String::new();
				io::stdin().read_to_string(&mut content)?;
				self.execute_script(&content, options)
			}
			InputSource::CommandLine(commands) => {
				let script = commands.join("\n");
				self.execute_script(&script, options)
			}
		};

		self.command_handler.dispose_all(&self.driver);
		result
	}

	fn run_interactive(&mut self, quiet: bool) -> anyhow::Result<()> {
		if !quiet {
			display::print_welcome(&self.api_url);
			self.show_session_status();
		}

		loop {
			self.drain_session_events();

			let session = self.driver.session();
			let prompt_str =
				prompt::generate_prompt(&session, self.command_count, &self.display_config);

			match self.editor.readline(&prompt_str) {
				Ok(line) => {
					if history::should_record(&line) {
						self.editor.add_history_entry(line.as_str())?;
					}
					if !self.handle_line(&line, false) {
						break;
					}
				}
				Err(ReadlineError::Interrupted) => {
					display::print_hint("Use .exit or Ctrl+D to quit");
				}
				Err(ReadlineError::Eof) => {
					println!();
					display::print_goodbye(self.command_count, self.start_time.elapsed());
					break;
				}
				Err(err) => {
					display::print_error(&format!("Readline error: {:?}", err));
					break;
				}
			}
		}

		self.cleanup();
		Ok(())
	}

	fn execute_script(&mut self, content: &str, options: &ReplOptions) -> anyhow::Result<()> {
		for (index, line) in content.lines().enumerate() {
			let trimmed = line.trim();

			if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("--") {
				continue;
			}

			let (keep_going, failed) = self.dispatch(trimmed, options.quiet);
			self.drain_session_events();

			if failed && options.exit_on_error {
				anyhow::bail!("Stopped at line {}: {}", index + 1, trimmed);
			}
			if !keep_going {
				break;
			}
		}
		Ok(())
	}

	/// Returns false when the session should end.
	fn handle_line(&mut self, line: &str, quiet: bool) -> bool {
		let trimmed = line.trim();
		if trimmed.is_empty() {
			return true;
		}
		if !trimmed.starts_with('.') {
			display::print_hint("Commands start with a dot. Type .help for the list.");
			return true;
		}
		self.dispatch(trimmed, quiet).0
	}

	/// Run one dot-command. Yields (keep going, command failed).
	fn dispatch(&mut self, line: &str, quiet: bool) -> (bool, bool) {
		self.command_count += 1;

		match self
			.command_handler
			.handle(line, &mut self.display_config, &self.driver)
		{
			commands::CommandResult::Continue => (true, false),
			commands::CommandResult::Exit => {
				if !quiet {
					display::print_goodbye(self.command_count, self.start_time.elapsed());
				}
				(false, false)
			}
			commands::CommandResult::Error(msg) => {
				display::print_error(&msg);
				(true, true)
			}
			commands::CommandResult::ClearScreen => {
				display::clear_screen();
				if !quiet {
					display::print_welcome(&self.api_url);
					self.show_session_status();
				}
				(true, false)
			}
			commands::CommandResult::ShowHistory => {
				self.history.display(&self.editor);
				(true, false)
			}
			commands::CommandResult::ExecuteFromHistory(n) => {
				match self.history.get_entry(&self.editor, n) {
					Some(entry) if entry.trim_start().starts_with(".history") => {
						display::print_error("Refusing to replay a .history entry");
						(true, true)
					}
					Some(entry) => {
						display::print_info(&format!("Running: {}", entry));
						self.dispatch(entry.trim(), quiet)
					}
					None => {
						display::print_error(&format!("History entry {} not found", n));
						(true, true)
					}
				}
			}
		}
	}

	/// Surface session changes that happened behind the scenes, such as a
	/// failed token refresh.
	fn drain_session_events(&mut self) {
		loop {
			match self.events.try_recv() {
				Ok(SessionEvent::Terminated {
					reason,
					redirect_to,
				}) => {
					self.command_handler.dispose_all(&self.driver);
					display::print_warning(&format!(
						"Session ended ({}). Log in again (screen: {})",
						reason, redirect_to
					));
				}
				Ok(SessionEvent::Refreshed) => {
					tracing::debug!("Access token refreshed");
				}
				Ok(event) => {
					tracing::trace!(?event, "Session event");
				}
				Err(TryRecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Missed session events");
				}
				Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
			}
		}
	}

	fn show_session_status(&self) {
		let session = self.driver.session();
		match session.role() {
			Some(role) => display::print_success(&format!("Logged in as {}", role)),
			None => {
				display::print_warning("Not logged in");
				display::print_hint("Use .login <phone> <password>");
			}
		}
	}

	fn cleanup(&mut self) {
		if let Err(e) = self.history.save(&mut self.editor) {
			tracing::warn!(error = %e, "Could not save history");
		}
	}
}

fn get_env_filter() -> EnvFilter {
	if std::env::var_os("RUST_LOG").is_some() {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
	} else if cfg!(debug_assertions) {
		EnvFilter::new("gymctl=debug,gym_core=debug,gym_driver=debug")
	} else {
		EnvFilter::new("gymctl=info,gym_core=info,gym_driver=info")
	}
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let log_file = fs::OpenOptions::new()
		.create(true)
		.append(true)
		.open("gymctl.log")?;

	let (file_non_blocking, file_guard) = tracing_appender::non_blocking(log_file);
	let (console_non_blocking, console_guard) = tracing_appender::non_blocking(io::stderr());
	let _guards = (file_guard, console_guard);

	let file_layer = tracing_subscriber::fmt::layer()
		.with_writer(file_non_blocking)
		.with_ansi(false)
		.with_target(true)
		.with_line_number(true)
		.with_file(true)
		.with_thread_names(true);

	// The prompt owns the terminal unless asked otherwise
	let stderr_layer = args.verbose.then(|| {
		tracing_subscriber::fmt::layer()
			.with_writer(console_non_blocking)
			.with_ansi(true)
			.with_target(false)
			.with_timer(tracing_subscriber::fmt::time::time())
			.compact()
	});

	Registry::default()
		.with(get_env_filter())
		.with(file_layer)
		.with(stderr_layer)
		.init();

	let mut config = ClientConfig::load_from_path(&args.config)?;
	if let Some(url) = args.api_url {
		config.api.base_url = url;
	}
	tracing::debug!(api = %config.api.base_url, ws = %config.ws_base_url(), "Configuration loaded");

	let input_source = if !args.execute.is_empty() {
		InputSource::CommandLine(args.execute)
	} else {
		match args.script {
			Some(path) if path == "-" => InputSource::Stdin,
			Some(path) => InputSource::File(path),
			None => InputSource::Interactive,
		}
	};

	let options = ReplOptions {
		input_source,
		quiet: args.quiet,
		exit_on_error: args.exit_on_error,
		output_format: args.output,
	};

	let mut repl = Repl::with_options(&config, &options)?;
	repl.run_with_options(&options)
}
