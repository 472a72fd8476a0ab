//! Spinner helpers using indicatif.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const SPINNER: &[&str] = &["◐ ", "◓ ", "◑ ", "◒ "];

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Creates a new spinner with a message.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();

    pb.set_style(style("{spinner:.cyan} {msg}").tick_strings(SPINNER));
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));

    pb
}

/// Finishes a spinner with a success message.
pub fn finish_success(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{prefix} {msg}"));
    pb.set_prefix("✓");
    pb.finish_with_message(msg.to_string());
}

/// Finishes a spinner with an error message.
pub fn finish_error(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{prefix} {msg}"));
    pb.set_prefix("✗");
    pb.finish_with_message(msg.to_string());
}
