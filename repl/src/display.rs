use colored::Colorize;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
	Table,
	Json,
}

impl std::str::FromStr for OutputMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"table" => Ok(OutputMode::Table),
			"json" => Ok(OutputMode::Json),
			other => Err(format!("Unknown mode: {} (expected table or json)", other)),
		}
	}
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
	pub show_timing: bool,
	pub use_colors: bool,
	pub output_mode: OutputMode,
	pub max_column_width: usize,
}

impl Default for DisplayConfig {
	fn default() -> Self {
		Self {
			show_timing: true,
			use_colors: true,
			output_mode: OutputMode::Table,
			max_column_width: 40,
		}
	}
}

pub fn print_welcome(api_url: &str) {
	println!(
		"\n{}",
		"╔═══════════════════════════════════════╗".bright_cyan()
	);
	println!(
		"{}",
		"║        GymDesk admin console          ║"
			.bright_cyan()
			.bold()
	);
	println!(
		"{}",
		"╚═══════════════════════════════════════╝".bright_cyan()
	);
	println!();
	println!("Backend: {}", api_url.bright_white());
	println!(
		"Type {} for help, {} to exit",
		".help".bright_green(),
		".exit".bright_green()
	);
	println!();
}

pub fn print_goodbye(command_count: usize, duration: Duration) {
	println!();
	println!("{}", "─".repeat(40).bright_black());
	println!("👋 {}", "Bye!".bright_cyan());
	println!("   Ran {} commands in {:.1?}", command_count, duration);
	println!();
}

pub fn clear_screen() {
	print!("\x1B[2J\x1B[1;1H");
}

pub fn print_error(msg: &str) {
	println!("{} {}", "✗".bright_red().bold(), msg.bright_red());
}

pub fn print_warning(msg: &str) {
	println!("{} {}", "⚠".bright_yellow(), msg.bright_yellow());
}

pub fn print_info(msg: &str) {
	println!("{} {}", "ℹ".bright_blue(), msg.bright_white());
}

pub fn print_success(msg: &str) {
	println!("{} {}", "✓".bright_green().bold(), msg.bright_green());
}

pub fn print_hint(msg: &str) {
	println!("{} {}", "💡".bright_white(), msg.bright_white().dimmed());
}

pub fn print_toggle(feature: &str, enabled: bool) {
	let status = if enabled {
		"ON".bright_green().bold()
	} else {
		"OFF".bright_red()
	};
	println!("{}: {}", feature, status);
}

pub fn print_timing(duration: Duration, config: &DisplayConfig) {
	if config.show_timing {
		println!(
			"  {} {:.3}ms",
			"Time:".bright_black(),
			duration.as_secs_f64() * 1000.0
		);
	}
}

/// Print any API payload: arrays of objects as a table, objects as
/// key/value pairs, everything else verbatim.
pub fn print_value(value: &Value, config: &DisplayConfig) {
	if config.output_mode == OutputMode::Json {
		match serde_json::to_string_pretty(value) {
			Ok(text) => println!("{}", text),
			Err(_) => println!("{}", value),
		}
		return;
	}

	match value {
		Value::Array(items) if items.is_empty() => print_info("No results"),
		Value::Array(items) => {
			println!("{}", rows_table(items, config.max_column_width));
			println!("  {} row(s)", items.len().to_string().bright_white());
		}
		Value::Object(map) => {
			let mut table = new_table();
			table.set_header(vec!["Field", "Value"]);
			for (key, v) in map {
				table.add_row(vec![key.clone(), cell_text(v, config.max_column_width)]);
			}
			println!("{}", table);
		}
		other => println!("{}", cell_text(other, usize::MAX)),
	}
}

fn new_table() -> Table {
	let mut table = Table::new();
	table
		.load_preset(UTF8_FULL_CONDENSED)
		.set_content_arrangement(ContentArrangement::Dynamic);
	table
}

pub fn rows_table(rows: &[Value], max_width: usize) -> Table {
	let columns = column_names(rows);
	let mut table = new_table();
	table.set_header(columns.clone());

	for row in rows {
		let cells: Vec<String> = match row {
			Value::Object(map) => columns
				.iter()
				.map(|c| map.get(c).map(|v| cell_text(v, max_width)).unwrap_or_default())
				.collect(),
			other => vec![cell_text(other, max_width)],
		};
		table.add_row(cells);
	}
	table
}

/// Union of object keys in first-seen order.
pub fn column_names(rows: &[Value]) -> Vec<String> {
	let mut columns: Vec<String> = Vec::new();
	for row in rows {
		match row {
			Value::Object(map) => {
				for key in map.keys() {
					if !columns.iter().any(|c| c == key) {
						columns.push(key.clone());
					}
				}
			}
			_ => {
				if !columns.iter().any(|c| c == "value") {
					columns.push("value".to_string());
				}
			}
		}
	}
	columns
}

pub fn cell_text(value: &Value, max_width: usize) -> String {
	let text = match value {
		Value::Null => String::new(),
		Value::String(s) => s.clone(),
		other => other.to_string(),
	};

	if text.chars().count() > max_width && max_width > 3 {
		let cut: String = text.chars().take(max_width - 3).collect();
		format!("{}...", cut)
	} else {
		text
	}
}
