//! Formatted output helpers for CLI commands.
//!
//! Provides the action markers used in plans, colored status lines, and
//! the plan summary sentence.

use skiff_engine::plan::{Action, PlanSummary};

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const RED: &str = "\x1b[31m";
pub const CYAN: &str = "\x1b[36m";
pub const RESET: &str = "\x1b[0m";

/// One-column marker and color for an action.
#[must_use]
pub const fn marker(action: &Action) -> (&'static str, &'static str) {
    match action {
        Action::Create => ("+", GREEN),
        Action::Update { .. } => ("~", YELLOW),
        Action::Replace { .. } => ("±", CYAN),
        Action::Delete => ("-", RED),
        Action::Unchanged => (" ", DIM),
    }
}

/// Fields an action changes, rendered for a plan line.
#[must_use]
pub fn changed_fields(action: &Action) -> String {
    match action {
        Action::Update { changed } | Action::Replace { changed } if !changed.is_empty() => {
            format!(" ({})", changed.join(", "))
        }
        _ => String::new(),
    }
}

/// Summary sentence printed under a plan.
#[must_use]
pub fn summary_line(summary: &PlanSummary) -> String {
    let parts = [
        (summary.create, "to create"),
        (summary.update, "to update"),
        (summary.replace, "to replace"),
        (summary.delete, "to delete"),
    ];
    let changes: Vec<String> = parts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, what)| format!("{n} {what}"))
        .collect();
    if changes.is_empty() {
        format!("No changes. {} resource(s) up to date.", summary.unchanged)
    } else {
        format!("Plan: {}, {} unchanged.", changes.join(", "), summary.unchanged)
    }
}

/// Heavy horizontal rule under a heading.
#[must_use]
pub fn rule(width: usize) -> String {
    "\u{2550}".repeat(width)
}
