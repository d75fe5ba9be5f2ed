//! Live status reporting for long-running phases.

use indicatif::{ProgressBar, ProgressStyle};
use std::{io::IsTerminal, time::Duration};

/// Receives status lines while a phase runs. Purely cosmetic: the core owns
/// the numbers, the reporter only shows them.
pub trait ProgressReporter {
    fn begin(&self, prefix: &str);
    fn update(&self, status: &str);
    fn finish(&self, status: &str);
}

/// Spinner on stderr; hidden when stderr is not a terminal.
pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    pub fn new() -> Self {
        if !std::io::stderr().is_terminal() {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {prefix} {msg}") {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl Default for SpinnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SpinnerProgress {
    fn begin(&self, prefix: &str) {
        self.bar.set_prefix(prefix.to_string());
        self.bar.set_message("");
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn update(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    fn finish(&self, status: &str) {
        self.bar.set_message(status.to_string());
        self.bar.finish();
    }
}

/// Discards every status line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn begin(&self, _prefix: &str) {}
    fn update(&self, _status: &str) {}
    fn finish(&self, _status: &str) {}
}
