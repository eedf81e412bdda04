// UI layer: what the operator sees when the program starts. After startup all
// output goes through `tracing`.

use crate::config::Config;
use crate::sink::AUDIO_EXTENSION;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

/// Lines describing where the program looks and how files must be named.
pub fn banner_lines(config: &Config) -> Vec<String> {
    vec![
        format!("Watched folder:  {}", config.watch_dir.display()),
        format!("Archive folder:  {}", config.archive_dir.display()),
        format!("Episode sheet:   {}", config.csv_path.display()),
        format!("New episodes are created as: {}", config.episode_status.as_str()),
        String::new(),
        "Remember to export recordings with the right name!".to_string(),
        format!(
            "E.g. 1.{ext}, 2.{ext}, 3.{ext}: 1 is the first row after the header.",
            ext = AUDIO_EXTENSION
        ),
        "Every recording needs a matching row in the sheet.".to_string(),
        String::new(),
        "Press Ctrl+C to quit.".to_string(),
    ]
}

/// Clear the terminal and print the startup banner.
pub fn print_banner(config: &Config) -> io::Result<()> {
    let mut stdout = io::stdout();
    if stdout.is_terminal() {
        execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
    }
    writeln!(stdout, "{}", "Automatic podcast uploader for Podbean".bold())?;
    writeln!(stdout)?;
    for line in banner_lines(config) {
        writeln!(stdout, "{}", line)?;
    }
    writeln!(stdout, "-----------")?;
    stdout.flush()
}

/// A ticking spinner shown while a startup step is in progress.
pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
