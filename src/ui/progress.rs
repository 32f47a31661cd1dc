use colored::*;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner plus status lines, all drawn on stderr.
pub struct StatusLine {
    spinner: ProgressBar,
}

impl StatusLine {
    pub fn new(quiet: bool) -> Self {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr())
        };
        Self { spinner }
    }

    pub fn start(&self, message: &str) {
        let style = ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        self.spinner.set_style(style);
        self.spinner.set_message(message.to_string());
        self.spinner.enable_steady_tick(Duration::from_millis(80));
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn print_status(&self, status: &str, message: &str, color: colored::Color) {
        let line = format!("{} {}", status.color(color).bold(), message.normal());
        self.spinner.suspend(|| eprintln!("{}", line));
    }

    pub fn print_success(&self, message: &str) {
        self.print_status("OK", message, colored::Color::Green);
    }
}
