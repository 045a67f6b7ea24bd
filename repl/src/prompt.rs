use super::display::DisplayConfig;
use colored::Colorize;
use gym_core::Session;

pub fn generate_prompt(session: &Session, command_count: usize, config: &DisplayConfig) -> String {
	let base = "gymctl";
	let who = match session.role() {
		Some(role) => role.as_str(),
		None if session.is_authenticated() => "?",
		None => "guest",
	};

	if config.use_colors {
		let who = if session.is_authenticated() {
			who.bright_green()
		} else {
			who.bright_black()
		};
		format!(
			"{}({}){}> ",
			base.bright_cyan().bold(),
			who,
			format!("[{}]", command_count).bright_black()
		)
	} else {
		format!("{}({})[{}]> ", base, who, command_count)
	}
}
