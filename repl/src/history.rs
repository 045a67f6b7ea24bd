use crate::completer::GymHelper;
use rustyline::history::{DefaultHistory, History, SearchDirection};
use rustyline::{Editor, Result};

pub const HISTORY_FILE: &str = ".gymctl_history";

pub struct HistoryManager {
	history_file: String,
}

impl HistoryManager {
	pub fn new(history_file: &str) -> Self {
		Self {
			history_file: history_file.to_string(),
		}
	}

	pub fn load(&self, editor: &mut Editor<GymHelper, DefaultHistory>) {
		if let Err(e) = editor.load_history(&self.history_file) {
			tracing::debug!(file = %self.history_file, error = %e, "No history loaded");
		}
	}

	pub fn save(&self, editor: &mut Editor<GymHelper, DefaultHistory>) -> Result<()> {
		editor.save_history(&self.history_file)
	}

	pub fn display(&self, editor: &Editor<GymHelper, DefaultHistory>) {
		let history_len = editor.history().len();

		if history_len == 0 {
			println!("No history available");
			return;
		}

		println!("\nCommand History:");
		println!("{}", "─".repeat(60));

		// Last 20 entries
		let start = history_len.saturating_sub(20);

		for i in start..history_len {
			if let Ok(Some(search_result)) = editor.history().get(i, SearchDirection::Forward) {
				println!("{:4} │ {}", i + 1, redact(&search_result.entry));
			}
		}

		println!("{}", "─".repeat(60));
		println!("Use .history <n> to run entry n");
	}

	pub fn get_entry(&self, editor: &Editor<GymHelper, DefaultHistory>, n: usize) -> Option<String> {
		if n > 0 && n <= editor.history().len() {
			editor
				.history()
				.get(n - 1, SearchDirection::Forward)
				.ok()
				.flatten()
				.map(|search_result| search_result.entry.to_string())
		} else {
			None
		}
	}
}

/// Entries worth keeping in the history file. Login lines carry a secret.
pub fn should_record(line: &str) -> bool {
	let trimmed = line.trim();
	!trimmed.is_empty() && !trimmed.starts_with(".login")
}

fn redact(entry: &str) -> String {
	if entry.chars().count() > 60 {
		let cut: String = entry.chars().take(57).collect();
		format!("{}...", cut)
	} else {
		entry.to_string()
	}
}
