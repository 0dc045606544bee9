//! `keel apply` - bring the host to the declared state

use anyhow::{Context as _, Result};
use colored::Colorize;
use dialoguer::Confirm;
use reconcile::{
    ActionOutcome, CancelToken, ExecuteOptions, ExecuteReport, Executor, HealthMonitor, Prober,
    observe, reconcile,
};
use std::sync::Arc;

use super::Outcome;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{differ, progress::ActionProgress};
use crate::{config, host, ui};

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<Outcome> {
    let stack = config::load(ctx.file.as_deref())?;
    let plan = &stack.plan;
    let host = host::connect(plan)?;

    if !ctx.quiet {
        ui::header(&format!("Applying stack '{}'", plan.name));
    }

    let observed = observe(plan, &host.caps).context("Could not observe host state")?;
    let actions = reconcile(plan, &observed);
    differ::display_actions(&actions);
    if actions.is_empty() {
        return Ok(Outcome::Success);
    }

    if !args.yes {
        let proceed = Confirm::new()
            .with_prompt(format!("Apply {} action(s)?", actions.len()))
            .default(false)
            .interact()
            .context("Confirmation prompt failed (use --yes when not on a terminal)")?;
        if !proceed {
            ui::info("Cancelled");
            return Ok(Outcome::Success);
        }
    }

    let prober: Arc<dyn Prober> = host.prober.clone();
    let monitor = HealthMonitor::start(&plan.services, prober);
    for (name, service) in &observed.services {
        if service.is_running() {
            monitor.restart(name);
        }
    }

    let mut options = ExecuteOptions::for_plan(plan);
    if let Some(jobs) = args.jobs {
        options.jobs = jobs.max(1);
    }

    let progress = ActionProgress::new(ctx.quiet);
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if interrupt(&cancel) == Interrupt::Abort {
                std::process::exit(130);
            }
        })
        .context("Could not install the Ctrl-C handler")?;
    }
    println!();
    let report = Executor {
        plan,
        observed: &observed,
        caps: &host.caps,
        monitor: &monitor,
        progress: &progress,
        cancel: &cancel,
        options,
    }
    .execute(actions)?;

    print_summary(&report);

    if report.is_success() {
        ui::success("Stack converged");
        Ok(Outcome::Success)
    } else {
        ui::warn("Stack only partially applied");
        Ok(Outcome::Partial)
    }
}

/// What a Ctrl-C during execution does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Let in-flight actions finish and skip the rest
    Cancel,
    /// Second Ctrl-C: exit right away
    Abort,
}

fn interrupt(cancel: &CancelToken) -> Interrupt {
    if cancel.is_cancelled() {
        return Interrupt::Abort;
    }
    cancel.cancel();
    eprintln!(
        "{} Cancelling after in-flight actions finish (Ctrl-C again to abort)",
        "⚠".yellow()
    );
    Interrupt::Cancel
}

/// Services by outcome, failures with their cause, then alerts
fn print_summary(report: &ExecuteReport) {
    ui::section("Summary");
    let list = |names: Vec<&str>| {
        if names.is_empty() {
            "-".dimmed().to_string()
        } else {
            names.join(", ")
        }
    };
    ui::kv("Succeeded", &list(report.succeeded()).green().to_string());
    ui::kv("Failed", &list(report.failed()).red().to_string());
    ui::kv("Skipped", &list(report.skipped()).yellow().to_string());

    let failures: Vec<String> = report
        .failures()
        .filter_map(|record| match &record.outcome {
            ActionOutcome::Failed { error } => Some(format!(
                "{} {}: {}",
                record.action.kind(),
                record.action.target(),
                error
            )),
            _ => None,
        })
        .collect();
    if !failures.is_empty() {
        ui::section("Failures");
        for line in &failures {
            ui::error(line);
        }
    }

    for alert in &report.alerts {
        eprintln!(
            "{} {} {}",
            "ALERT".red().bold(),
            alert.subject.red(),
            alert.message
        );
    }
    if report.cancelled {
        ui::warn("Cancelled before all actions ran");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_cancels_second_aborts() {
        let cancel = CancelToken::new();
        let shared = cancel.clone();

        assert_eq!(interrupt(&shared), Interrupt::Cancel);
        assert!(cancel.is_cancelled());
        assert_eq!(interrupt(&shared), Interrupt::Abort);
    }
}
