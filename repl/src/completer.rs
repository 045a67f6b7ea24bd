use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper, Result};
use std::borrow::Cow;

use crate::commands::COMMANDS;

const ROSTERS: [&str; 2] = ["trainers", "users"];
const ROSTER_COMMANDS: [&str; 4] = [".watch", ".unwatch", ".roster", ".refresh"];

/// Tab completion and inline usage hints for dot-commands.
pub struct GymHelper {
	use_colors: bool,
}

impl GymHelper {
	pub fn new() -> Self {
		Self { use_colors: true }
	}

	pub fn set_use_colors(&mut self, use_colors: bool) {
		self.use_colors = use_colors;
	}

	fn completions(&self, line: &str, pos: usize) -> (usize, Vec<Pair>) {
		let before = &line[..pos];

		match before.split_once(' ') {
			None => {
				let candidates = COMMANDS
					.iter()
					.filter(|spec| spec.name.starts_with(before))
					.map(|spec| Pair {
						display: spec.name.to_string(),
						replacement: format!("{} ", spec.name),
					})
					.collect();
				(0, candidates)
			}
			Some((command, rest)) if ROSTER_COMMANDS.contains(&command) && !rest.contains(' ') => {
				let start = pos - rest.len();
				let candidates = ROSTERS
					.iter()
					.filter(|r| r.starts_with(rest))
					.map(|r| Pair {
						display: r.to_string(),
						replacement: r.to_string(),
					})
					.collect();
				(start, candidates)
			}
			Some((".mode", rest)) => {
				let start = pos - rest.len();
				let candidates = ["table", "json"]
					.iter()
					.filter(|m| m.starts_with(rest))
					.map(|m| Pair {
						display: m.to_string(),
						replacement: m.to_string(),
					})
					.collect();
				(start, candidates)
			}
			Some(_) => (pos, Vec::new()),
		}
	}
}

impl Completer for GymHelper {
	type Candidate = Pair;

	fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>)> {
		Ok(self.completions(line, pos))
	}
}

impl Hinter for GymHelper {
	type Hint = String;

	fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
		if pos < line.len() || !line.starts_with('.') {
			return None;
		}

		// Show the argument synopsis once the command name is complete
		let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
		if !rest.is_empty() {
			return None;
		}
		let spec = COMMANDS.iter().find(|spec| spec.name == name)?;
		if spec.usage.is_empty() {
			return None;
		}
		let sep = if line.ends_with(' ') { "" } else { " " };
		Some(format!("{}{}", sep, spec.usage))
	}
}

impl Highlighter for GymHelper {
	fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
		if self.use_colors {
			Cow::Owned(hint.bright_black().to_string())
		} else {
			Cow::Borrowed(hint)
		}
	}
}

impl Validator for GymHelper {}

impl Helper for GymHelper {}
