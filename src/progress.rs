// ABOUTME: Progress bars for long-running row loops
// ABOUTME: Draws with indicatif when stderr is a terminal, stays hidden otherwise

use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;

const ROW_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} rows ({per_sec}) {msg}";

const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {pos} rows ({per_sec}) {msg}";

/// Bar counting rows toward a known total.
pub fn row_bar(total: u64) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(ROW_TEMPLATE) {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar
}

/// Spinner counting rows when the total is unknown.
pub fn row_spinner() -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
        bar.set_style(style);
    }
    bar
}
