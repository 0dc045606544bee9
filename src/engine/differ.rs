//! Action list and proxy configuration diff display

use colored::{ColoredString, Colorize};
use reconcile::{ReconcileAction, StopReason};
use similar::{ChangeTag, TextDiff};

/// Change marker for an action
pub fn symbol(action: &ReconcileAction) -> &'static str {
    match action {
        ReconcileAction::CreateVolume { .. } | ReconcileAction::StartService { .. } => "+",
        ReconcileAction::FixOwnership { .. } => "~",
        ReconcileAction::StopService {
            reason: StopReason::Replace,
            ..
        } => "~",
        ReconcileAction::StopService {
            reason: StopReason::Orphan,
            ..
        } => "-",
        ReconcileAction::WaitHealthy { .. } => "…",
        ReconcileAction::ReloadProxy | ReconcileAction::IssueOrRenewCertificate { .. } => "↻",
    }
}

fn colored_symbol(action: &ReconcileAction) -> ColoredString {
    match symbol(action) {
        "+" => "+".green(),
        "~" => "~".yellow(),
        "-" => "-".red(),
        "↻" => "↻".cyan(),
        other => other.dimmed(),
    }
}

/// Display the ordered action list
pub fn display_actions(actions: &[ReconcileAction]) {
    if actions.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Planned Actions".bold()
    );
    println!("│");
    for (index, action) in actions.iter().enumerate() {
        let detail = action
            .detail()
            .map(|d| format!("  {}", d.dimmed()))
            .unwrap_or_default();
        println!(
            "│ {:>3}. {} {}{}",
            index + 1,
            colored_symbol(action),
            action,
            detail
        );
    }
    println!("│");
    println!("└────────────────────────────────────────────────────────────┘");
    println!();
    println!("  {} {} action(s)", "→".cyan(), actions.len());
}

/// One line of a unified proxy config diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Added(String),
    Removed(String),
}

/// Line changes from the active proxy config to the rendered one
pub fn proxy_diff(active: Option<&str>, rendered: &str) -> Vec<DiffLine> {
    let diff = TextDiff::from_lines(active.unwrap_or(""), rendered);
    diff.iter_all_changes()
        .filter_map(|change| {
            let line = change.value().trim_end_matches('\n').to_string();
            match change.tag() {
                ChangeTag::Insert => Some(DiffLine::Added(line)),
                ChangeTag::Delete => Some(DiffLine::Removed(line)),
                ChangeTag::Equal => None,
            }
        })
        .collect()
}

/// Display the proxy config diff
pub fn display_proxy_diff(path: &str, lines: &[DiffLine]) {
    println!();
    println!("  {} {}", "Proxy config".bold(), path.dimmed());
    if lines.is_empty() {
        println!("    {}", "(unchanged)".dimmed());
        return;
    }
    for line in lines {
        match line {
            DiffLine::Added(text) => println!("    {}", format!("+ {text}").green()),
            DiffLine::Removed(text) => println!("    {}", format!("- {text}").red()),
        }
    }
}
