//! Human-readable analysis report rendering, the default `--output-format
//! report` encoding (SPEC_FULL.md §6).

use std::fmt::Write as _;

use owo_colors::OwoColorize;

use crate::anarep::AnaRep;
use crate::model::BuildStatus;

fn color_status(status: BuildStatus) -> String {
    let s = format!("{status:?}");
    match status {
        BuildStatus::Succeeded | BuildStatus::InitialSuccess | BuildStatus::Fixed => {
            s.green().to_string()
        }
        BuildStatus::Failed | BuildStatus::BadConfig => s.red().to_string(),
        BuildStatus::Pending => s.yellow().to_string(),
    }
}

pub(crate) fn render_report(report: &AnaRep) -> String {
    let mut out = String::new();

    for r in &report.reports {
        let _ = writeln!(out, "{}: {}", r.buildname, color_status(r.status));
        if let Some(count) = r.count {
            let _ = writeln!(out, "  {count} failed");
        }
    }

    if !report.var_failures.is_empty() {
        let _ = writeln!(out, "\n{}", "Variable-isolated failures:".bold());
        for vf in &report.var_failures {
            let _ = writeln!(out, "  {} {}={} {}", vf.project, vf.variable, vf.value, "FAILED".red());
        }
    }

    if !report.completely_failing.is_empty() {
        let _ = writeln!(out, "\n{}", "Completely failing projects:".bold().red());
        for project in &report.completely_failing {
            let _ = writeln!(out, "  {project}");
        }
    }

    if !report.notifications.is_empty() {
        let _ = writeln!(out, "\n{}", "Notifications:".bold());
        for n in &report.notifications {
            let _ = writeln!(out, "  {} -> {}", n.notification, n.recipients.join(", "));
        }
    }

    out
}
