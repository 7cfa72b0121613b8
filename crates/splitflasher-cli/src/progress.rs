//! Terminal rendering of session events
//!
//! Status lines are printed as they arrive. While a copy runs, its progress
//! is shown as a bar and status lines are printed above it.

use console::{StyledObject, style};
use indicatif::{ProgressBar, ProgressStyle};
use splitflasher_core::{Event, HistoryEntry, Slot, StatusLevel};
use splitflasher_detect::format_bytes;
use std::path::Path;

/// Renders [`Event`]s for an interactive terminal
pub struct EventRenderer {
    quiet: bool,
    bar: Option<(Slot, ProgressBar)>,
}

impl EventRenderer {
    /// Create a renderer; `quiet` hides everything but errors
    pub fn new(quiet: bool) -> Self {
        Self { quiet, bar: None }
    }

    /// Render one event
    pub fn render(&mut self, event: &Event) {
        match event {
            Event::Ready { files, .. } => {
                if self.quiet {
                    return;
                }
                self.line(format!("{}", style("Firmware loaded").green().bold()));
                for (slot, file) in files.iter() {
                    self.line(format!(
                        "  {} {}: {} ({})",
                        style("✓").green(),
                        slot.title(),
                        style(&file.file_name).cyan(),
                        format_bytes(file.size)
                    ));
                }
            }
            Event::Status { level, message, .. } => {
                if self.quiet && *level != StatusLevel::Error {
                    return;
                }
                let line = format!("{} {}", marker(*level), message);
                self.line(line);
            }
            Event::Progress {
                slot,
                bytes_written,
                total_bytes,
                volume_path,
            } => {
                if self.quiet {
                    return;
                }
                let bar = self.bar_for(*slot, *total_bytes, volume_path);
                bar.set_position(*bytes_written);
            }
            Event::Result(entry) => {
                self.finish_bar(entry.slot);
                if self.quiet && entry.success {
                    return;
                }
                self.line(result_line(entry));
            }
            Event::Error { message, .. } => {
                let line = format!("{} {}", style("Error:").red().bold(), message);
                match &self.bar {
                    Some((_, bar)) => bar.suspend(|| eprintln!("{line}")),
                    None => eprintln!("{line}"),
                }
            }
        }
    }

    /// Remove any progress bar still on screen
    pub fn clear(&mut self) {
        if let Some((_, bar)) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    /// Print a dimmed session hint above any progress bar
    pub fn notice(&self, text: &str) {
        if !self.quiet {
            self.line(format!("{}", style(text).dim()));
        }
    }

    fn line(&self, text: String) {
        match &self.bar {
            Some((_, bar)) => bar.suspend(|| println!("{text}")),
            None => println!("{text}"),
        }
    }

    fn bar_for(&mut self, slot: Slot, total: u64, volume: &Path) -> &ProgressBar {
        let stale = self
            .bar
            .as_ref()
            .is_some_and(|(current, bar)| *current != slot || bar.length() != Some(total));
        if stale {
            self.clear();
        }

        let (_, bar) = self
            .bar
            .get_or_insert_with(|| (slot, create_copy_progress_bar(slot, total, volume)));
        bar
    }

    fn finish_bar(&mut self, slot: Slot) {
        if self.bar.as_ref().is_some_and(|(current, _)| *current == slot) {
            self.clear();
        }
    }
}

impl Drop for EventRenderer {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Coloured marker shown before a status message
fn marker(level: StatusLevel) -> StyledObject<&'static str> {
    match level {
        StatusLevel::Info => style("ℹ").blue(),
        StatusLevel::Warning => style("⚠").yellow().bold(),
        StatusLevel::Success => style("✓").green(),
        StatusLevel::Error => style("✗").red().bold(),
    }
}

/// Summary line for a finished copy
fn result_line(entry: &HistoryEntry) -> String {
    let message = entry
        .message
        .clone()
        .unwrap_or_else(|| format!("{} finished", entry.slot.title()));
    if entry.success {
        format!(
            "  {} {} ({})",
            style("✓").green(),
            message,
            style(entry.volume_path.display()).dim()
        )
    } else {
        format!("  {} {}", style("✗").red().bold(), style(message).red())
    }
}

/// Create a progress bar for a copy onto a volume
fn create_copy_progress_bar(slot: Slot, total: u64, volume: &Path) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let volume = volume
        .file_name()
        .map_or_else(|| volume.display().to_string(), |n| n.to_string_lossy().into_owned());

    let template = format!(
        "  {{spinner:.green}} {} → {} [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{eta}})",
        slot.title(),
        volume.replace('{', "{{").replace('}', "}}")
    );
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );

    pb
}
