//! Live action progress on the terminal
//!
//! One spinner per running action. Services are applied concurrently, so
//! spinners are keyed by the action's display name.

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use reconcile::units::format_duration;
use reconcile::{ActionOutcome, ProgressCallback, ReconcileAction};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "];

/// Spinner-based progress for `apply`
pub struct ActionProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ActionProgress {
    pub fn new(quiet: bool) -> Self {
        let multi = MultiProgress::new();
        if quiet {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS)
    }
}

/// Final line for a finished action
pub fn finish_line(action: &ReconcileAction, outcome: &ActionOutcome, elapsed: Duration) -> String {
    let took = format_duration(elapsed);
    match outcome {
        ActionOutcome::Succeeded => {
            format!("{} {} {}", "✓".green(), action, took.dimmed())
        }
        ActionOutcome::Failed { error } => {
            format!("{} {} {}", "✗".red(), action, error.red())
        }
        ActionOutcome::Skipped { reason } => {
            format!("{} {} {}", "⊘".yellow(), action, reason.dimmed())
        }
    }
}

impl ProgressCallback for ActionProgress {
    fn on_action_start(&self, action: &ReconcileAction) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(Self::style());
        bar.set_message(action.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(action.to_string(), bar);
        }
    }

    fn on_action_complete(&self, action: &ReconcileAction, outcome: &ActionOutcome, elapsed: Duration) {
        let line = finish_line(action, outcome, elapsed);
        let bar = self
            .bars
            .lock()
            .ok()
            .and_then(|mut bars| bars.remove(&action.to_string()));
        match bar {
            Some(bar) => {
                bar.set_style(ProgressStyle::with_template("  {msg}").unwrap_or_else(|_| Self::style()));
                bar.finish_with_message(line);
            }
            // Skipped actions never started
            None => {
                let _ = self.multi.println(format!("  {}", line));
            }
        }
    }
}
