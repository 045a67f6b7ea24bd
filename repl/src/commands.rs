use super::display::{self, DisplayConfig, OutputMode};
use colored::Colorize;
use gym_core::{ConnectionState, GymError, Role, Roster};
use gym_driver::{BlockingGymDriver, RefreshPath, RosterFeed, Uuid};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

pub struct CommandSpec {
	pub name: &'static str,
	pub usage: &'static str,
	pub about: &'static str,
}

const fn spec(name: &'static str, usage: &'static str, about: &'static str) -> CommandSpec {
	CommandSpec { name, usage, about }
}

pub const COMMANDS: &[CommandSpec] = &[
	spec(".help", "", "Show this help message"),
	spec(".exit", "", "Exit the console"),
	spec(".clear", "", "Clear the screen"),
	spec(".login", "<phone> <password>", "Log in and store the session"),
	spec(".logout", "", "Forget the stored session"),
	spec(".whoami", "", "Show the logged-in account"),
	spec(".status", "", "Show session and live roster state"),
	spec(".users", "[page] [limit]", "List users"),
	spec(".user", "<id>", "Show one user with subscriptions"),
	spec(".trainers", "", "List trainers"),
	spec(".gyms", "", "List gyms"),
	spec(".plans", "", "List pricing plans"),
	spec(".products", "", "List market products"),
	spec(".sales", "", "List market sales"),
	spec(".stats", "", "Show user statistics"),
	spec(".notifications", "", "Show dashboard notifications"),
	spec(".delete-user", "<id>", "Delete a user and refresh live rosters"),
	spec(".watch", "<trainers|users>", "Subscribe to a live roster"),
	spec(".unwatch", "<trainers|users>", "Stop a live roster"),
	spec(".roster", "<trainers|users>", "Print the latest roster snapshot"),
	spec(".refresh", "<trainers|users>", "Ask for a fresh roster snapshot"),
	spec(".history", "[n]", "Show history or run entry n"),
	spec(".mode", "[table|json]", "Show or set the output format"),
	spec(".timing", "", "Toggle request timing"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	Help,
	Exit,
	Clear,
	Login { identifier: String, secret: String },
	Logout,
	WhoAmI,
	Status,
	Users { page: u32, limit: u32 },
	User(Uuid),
	Trainers,
	Gyms,
	Plans,
	Products,
	Sales,
	Stats,
	Notifications,
	DeleteUser(Uuid),
	Watch(Roster),
	Unwatch(Roster),
	ShowRoster(Roster),
	Refresh(Roster),
	History(Option<usize>),
	Mode(Option<OutputMode>),
	Timing,
}

impl Command {
	pub fn parse(line: &str) -> Result<Command, String> {
		let parts: Vec<&str> = line.split_whitespace().collect();
		let Some((&name, args)) = parts.split_first() else {
			return Err("Empty command".to_string());
		};

		let command = match name {
			".help" | ".h" | ".?" => Command::Help,
			".exit" | ".quit" | ".q" => Command::Exit,
			".clear" | ".cls" => Command::Clear,
			".login" => match args {
				[identifier, secret] => Command::Login {
					identifier: identifier.to_string(),
					secret: secret.to_string(),
				},
				_ => return Err(usage(name)),
			},
			".logout" => Command::Logout,
			".whoami" | ".me" => Command::WhoAmI,
			".status" => Command::Status,
			".users" => {
				let page = number_arg(args.first(), 1, name)?;
				let limit = number_arg(args.get(1), 10, name)?;
				if page == 0 || limit == 0 {
					return Err("Page and limit start at 1".to_string());
				}
				Command::Users { page, limit }
			}
			".user" => Command::User(id_arg(args, name)?),
			".trainers" => Command::Trainers,
			".gyms" => Command::Gyms,
			".plans" | ".pricing" => Command::Plans,
			".products" => Command::Products,
			".sales" => Command::Sales,
			".stats" => Command::Stats,
			".notifications" => Command::Notifications,
			".delete-user" => Command::DeleteUser(id_arg(args, name)?),
			".watch" => Command::Watch(roster_arg(args, name)?),
			".unwatch" => Command::Unwatch(roster_arg(args, name)?),
			".roster" => Command::ShowRoster(roster_arg(args, name)?),
			".refresh" => Command::Refresh(roster_arg(args, name)?),
			".history" | ".hist" => match args.first() {
				Some(n) => Command::History(Some(
					n.parse()
						.map_err(|_| format!("Invalid history number: {}", n))?,
				)),
				None => Command::History(None),
			},
			".mode" => match args.first() {
				Some(mode) => Command::Mode(Some(mode.parse()?)),
				None => Command::Mode(None),
			},
			".timing" | ".time" => Command::Timing,
			other => {
				return Err(format!("Unknown command: {}. Type .help for help.", other));
			}
		};
		Ok(command)
	}
}

fn usage(name: &str) -> String {
	match COMMANDS.iter().find(|spec| spec.name == name) {
		Some(spec) => format!("Usage: {} {}", spec.name, spec.usage),
		None => format!("Invalid arguments for {}", name),
	}
}

fn number_arg(arg: Option<&&str>, default: u32, name: &str) -> Result<u32, String> {
	match arg {
		Some(raw) => raw.parse().map_err(|_| usage(name)),
		None => Ok(default),
	}
}

fn id_arg(args: &[&str], name: &str) -> Result<Uuid, String> {
	match args {
		[raw] => Uuid::parse_str(raw).map_err(|_| format!("Invalid id: {}", raw)),
		_ => Err(usage(name)),
	}
}

fn roster_arg(args: &[&str], name: &str) -> Result<Roster, String> {
	match args {
		[raw] => raw.parse().map_err(|e: GymError| e.message()),
		_ => Err(usage(name)),
	}
}

pub enum CommandResult {
	Continue,
	Exit,
	Error(String),
	ClearScreen,
	ShowHistory,
	ExecuteFromHistory(usize),
}

/// Runs parsed commands and owns the live roster feeds.
pub struct CommandHandler {
	feeds: BTreeMap<&'static str, RosterFeed>,
}

impl CommandHandler {
	pub fn new() -> Self {
		CommandHandler {
			feeds: BTreeMap::new(),
		}
	}

	pub fn handle(
		&mut self,
		line: &str,
		display_config: &mut DisplayConfig,
		driver: &BlockingGymDriver,
	) -> CommandResult {
		let command = match Command::parse(line.trim()) {
			Ok(command) => command,
			Err(msg) => return CommandResult::Error(msg),
		};

		self.run(command, display_config, driver)
	}

	fn run(
		&mut self,
		command: Command,
		display_config: &mut DisplayConfig,
		driver: &BlockingGymDriver,
	) -> CommandResult {
		match command {
			Command::Help => {
				self.show_help();
				CommandResult::Continue
			}
			Command::Exit => CommandResult::Exit,
			Command::Clear => CommandResult::ClearScreen,
			Command::Login { identifier, secret } => match driver.login(&identifier, &secret) {
				Ok(session) => {
					let role = session.role().map(|r| r.to_string());
					display::print_success(&format!(
						"Logged in as {}",
						role.as_deref().unwrap_or("unknown role")
					));
					display::print_hint(&format!("Home screen: {}", session.home_route()));
					CommandResult::Continue
				}
				Err(e) => CommandResult::Error(e.message()),
			},
			Command::Logout => {
				self.dispose_all(driver);
				driver.logout();
				display::print_info("Logged out");
				CommandResult::Continue
			}
			Command::WhoAmI => {
				let session = driver.session();
				if !session.is_authenticated() {
					return CommandResult::Error("Not logged in. Use .login".to_string());
				}
				self.timed(driver, display_config, |d| d.me())
			}
			Command::Status => {
				self.show_status(driver);
				CommandResult::Continue
			}
			Command::Users { page, limit } => {
				self.timed(driver, display_config, |d| d.list_users(page, limit))
			}
			Command::User(id) => self.timed(driver, display_config, |d| d.get_user(id)),
			Command::Trainers => self.timed(driver, display_config, |d| {
				d.list_users(1, 1000).map(|users| {
					users
						.into_iter()
						.filter(|u| u.role == Some(Role::Trainer))
						.collect::<Vec<_>>()
				})
			}),
			Command::Gyms => self.timed(driver, display_config, |d| d.list_gyms()),
			Command::Plans => self.timed(driver, display_config, |d| d.list_plans()),
			Command::Products => self.timed(driver, display_config, |d| d.list_products()),
			Command::Sales => self.timed(driver, display_config, |d| d.list_sales()),
			Command::Stats => self.timed(driver, display_config, |d| d.user_stats()),
			Command::Notifications => {
				self.timed(driver, display_config, |d| d.notifications())
			}
			Command::DeleteUser(id) => match driver.delete_user(id) {
				Ok(message) => {
					let message = if message.is_empty() {
						"User deleted".to_string()
					} else {
						message
					};
					display::print_success(&message);
					self.refresh_all(driver);
					CommandResult::Continue
				}
				Err(e) => CommandResult::Error(e.message()),
			},
			Command::Watch(roster) => {
				if self.feeds.contains_key(roster.topic()) {
					display::print_info(&format!("Already watching {}", roster));
				} else {
					let feed = driver.watch_roster(roster);
					self.feeds.insert(roster.topic(), feed);
					display::print_success(&format!("Watching {}", roster));
				}
				CommandResult::Continue
			}
			Command::Unwatch(roster) => match self.feeds.remove(roster.topic()) {
				Some(feed) => {
					driver.dispose_roster(feed);
					display::print_info(&format!("Stopped watching {}", roster));
					CommandResult::Continue
				}
				None => CommandResult::Error(format!("Not watching {}", roster)),
			},
			Command::ShowRoster(roster) => match self.feeds.get(roster.topic()) {
				Some(feed) => {
					if feed.state() != ConnectionState::Open {
						display::print_warning(&format!(
							"{} channel is {:?}; showing last snapshot",
							roster,
							feed.state()
						));
					}
					let snapshot = feed.snapshot();
					display::print_value(&Value::Array(snapshot.as_ref().clone()), display_config);
					CommandResult::Continue
				}
				None => CommandResult::Error(format!(
					"Not watching {}. Use .watch {}",
					roster,
					roster.topic()
				)),
			},
			Command::Refresh(roster) => match self.feeds.get(roster.topic()) {
				Some(feed) => match driver.refresh_roster(feed) {
					Ok(path) => {
						report_refresh(roster, path);
						CommandResult::Continue
					}
					Err(e) => CommandResult::Error(e.message()),
				},
				None => CommandResult::Error(format!("Not watching {}", roster)),
			},
			Command::History(Some(n)) => CommandResult::ExecuteFromHistory(n),
			Command::History(None) => CommandResult::ShowHistory,
			Command::Mode(Some(mode)) => {
				display_config.output_mode = mode;
				display::print_info(&format!("Output mode set to: {:?}", mode));
				CommandResult::Continue
			}
			Command::Mode(None) => {
				display::print_info(&format!(
					"Current output mode: {:?}",
					display_config.output_mode
				));
				CommandResult::Continue
			}
			Command::Timing => {
				display_config.show_timing = !display_config.show_timing;
				display::print_toggle("Request timing", display_config.show_timing);
				CommandResult::Continue
			}
		}
	}

	/// Run a driver call, render its result and report the elapsed time.
	fn timed<T, F>(
		&self,
		driver: &BlockingGymDriver,
		display_config: &DisplayConfig,
		call: F,
	) -> CommandResult
	where
		T: Serialize,
		F: FnOnce(&BlockingGymDriver) -> Result<T, GymError>,
	{
		let start = Instant::now();
		let result = call(driver);
		let duration = start.elapsed();

		match result.and_then(|value| serde_json::to_value(value).map_err(GymError::from)) {
			Ok(value) => {
				display::print_value(&value, display_config);
				display::print_timing(duration, display_config);
				CommandResult::Continue
			}
			Err(e) if e.requires_login() => {
				CommandResult::Error("Session expired. Please .login again".to_string())
			}
			Err(e) => CommandResult::Error(e.message()),
		}
	}

	/// After a roster mutation every watched roster is refreshed, through its
	/// channel or with a direct fetch.
	fn refresh_all(&self, driver: &BlockingGymDriver) {
		for feed in self.feeds.values() {
			match driver.refresh_roster(feed) {
				Ok(path) => report_refresh(feed.roster(), path),
				Err(e) => display::print_warning(&format!(
					"Could not refresh {}: {}",
					feed.roster(),
					e.message()
				)),
			}
		}
	}

	pub fn dispose_all(&mut self, driver: &BlockingGymDriver) {
		for (_, feed) in std::mem::take(&mut self.feeds) {
			driver.dispose_roster(feed);
		}
	}

	fn show_status(&self, driver: &BlockingGymDriver) {
		let session = driver.session();
		if session.is_authenticated() {
			let role = session
				.role()
				.map(|r| r.to_string())
				.unwrap_or_else(|| "unknown".to_string());
			display::print_success(&format!(
				"Logged in ({}{})",
				role,
				if session.is_superuser() { ", superuser" } else { "" }
			));
		} else {
			display::print_warning("Not logged in");
		}

		if self.feeds.is_empty() {
			display::print_info("No live rosters");
		}
		for feed in self.feeds.values() {
			let state = match feed.state() {
				ConnectionState::Open => "open".bright_green(),
				ConnectionState::Connecting => "connecting".bright_yellow(),
				ConnectionState::Closed => "reconnecting".bright_yellow(),
				ConnectionState::Disposed => "disposed".bright_black(),
			};
			println!(
				"  {:10} {:14} {} entries",
				feed.roster().to_string().bright_white(),
				state,
				feed.snapshot().len()
			);
		}
	}

	fn show_help(&self) {
		println!("\n{}", "gymctl Commands".bright_cyan().bold());
		println!("{}", "─".repeat(60).bright_black());

		for spec in COMMANDS {
			let cmd = if spec.usage.is_empty() {
				spec.name.to_string()
			} else {
				format!("{} {}", spec.name, spec.usage)
			};
			println!("  {:34} {}", cmd.bright_green(), spec.about.bright_white());
		}

		println!("\n{}", "Notes:".bright_yellow());
		println!("  • Expired access tokens are refreshed automatically");
		println!("  • Live rosters reconnect on their own until unwatched");
		println!("  • Ctrl+C cancels input, Ctrl+D exits");
		println!();
	}
}

fn report_refresh(roster: Roster, path: RefreshPath) {
	match path {
		RefreshPath::Live => display::print_info(&format!("Requested fresh {} snapshot", roster)),
		RefreshPath::Fetched => display::print_warning(&format!(
			"{} channel not open; fetched the list directly",
			roster
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_parse_simple_commands() {
		assert_eq!(Command::parse(".help").unwrap(), Command::Help);
		assert_eq!(Command::parse(".q").unwrap(), Command::Exit);
		assert_eq!(Command::parse(".pricing").unwrap(), Command::Plans);
		assert_eq!(Command::parse(".mode json").unwrap(), Command::Mode(Some(OutputMode::Json)));
	}

	#[test]
	fn test_parse_login() {
		assert_eq!(
			Command::parse(".login +998901234567 secret123").unwrap(),
			Command::Login {
				identifier: "+998901234567".into(),
				secret: "secret123".into()
			}
		);
		assert_eq!(
			Command::parse(".login +998901234567").unwrap_err(),
			"Usage: .login <phone> <password>"
		);
	}

	#[test]
	fn test_parse_users_pagination() {
		assert_eq!(
			Command::parse(".users").unwrap(),
			Command::Users { page: 1, limit: 10 }
		);
		assert_eq!(
			Command::parse(".users 3 50").unwrap(),
			Command::Users { page: 3, limit: 50 }
		);
		assert!(Command::parse(".users 0").is_err());
		assert!(Command::parse(".users x").is_err());
	}

	#[test]
	fn test_parse_ids_and_rosters() {
		let id = "6c2f1f8e-8d7e-4a7f-9a51-0e3c2b6a9d10";
		assert_eq!(
			Command::parse(&format!(".delete-user {}", id)).unwrap(),
			Command::DeleteUser(Uuid::parse_str(id).unwrap())
		);
		assert_eq!(Command::parse(".user 42").unwrap_err(), "Invalid id: 42");

		assert_eq!(
			Command::parse(".watch trainers").unwrap(),
			Command::Watch(Roster::Trainers)
		);
		assert_eq!(
			Command::parse(".refresh users").unwrap(),
			Command::Refresh(Roster::Users)
		);
		assert!(Command::parse(".watch gyms").is_err());
	}

	#[test]
	fn test_unknown_command() {
		assert_eq!(
			Command::parse(".drop").unwrap_err(),
			"Unknown command: .drop. Type .help for help."
		);
	}

	#[test]
	fn test_every_listed_command_parses_or_wants_arguments() {
		for spec in COMMANDS {
			match Command::parse(spec.name) {
				Ok(_) => assert!(
					spec.usage.is_empty() || spec.usage.starts_with('['),
					"{} parsed without its required arguments",
					spec.name
				),
				Err(msg) => assert!(msg.starts_with("Usage:"), "{}: {}", spec.name, msg),
			}
		}
	}
}
