//! Terminal rendering of library progress callbacks.

use console::style;
use cortexflash::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

use crate::use_fancy_output;

/// Shows phases as status lines and transfers as a progress bar on stderr.
pub(crate) struct TerminalProgress {
    bar: Option<ProgressBar>,
    phase: Option<String>,
    quiet: bool,
    fancy: bool,
}

impl TerminalProgress {
    pub(crate) fn new(quiet: bool) -> Self {
        Self {
            bar: None,
            phase: None,
            quiet,
            fancy: use_fancy_output(),
        }
    }

    fn new_bar(&self) -> ProgressBar {
        if self.quiet || !self.fancy {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb
    }

    /// Print a line without tearing an active bar.
    fn println(&self, line: &str) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.println(line),
            _ => eprintln!("{line}"),
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn begin(&mut self) {
        self.bar = Some(self.new_bar());
    }

    fn message(&mut self, text: &str) {
        self.println(&format!("{} {text}", style("ℹ").blue()));
    }

    fn message_begin(&mut self, text: &str) {
        self.phase = Some(text.to_string());
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.set_message(text.to_string()),
            _ => self.println(&format!("{} {text}...", style("⏳").yellow())),
        }
    }

    fn message_end(&mut self, text: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message("");
        }
        let phase = self
            .phase
            .take()
            .unwrap_or_default();
        self.println(&format!("{} {phase}... {text}", style("✓").green()));
    }

    fn progress(&mut self, percent: u8) {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(percent));
        }
    }

    fn end(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
