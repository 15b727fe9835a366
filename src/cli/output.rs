//! Output formatting for CLI commands.
//!
//! Text output is meant for an operator at a terminal; JSON output carries
//! the same information for scripting.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::HostLayout;
use crate::orchestrator::{DeploymentReport, ValidationReport};
use crate::planner::{DeploymentPlan, PhaseOutcome, PhaseStatus};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Phase row for table display.
#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "#")]
    number: usize,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    number: usize,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Serialize)]
struct PlanJson<'a> {
    plan: &'a DeploymentPlan,
    layout: &'a HostLayout,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the phase list together with the paths it will touch.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, layout: &HostLayout) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson { plan, layout }).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan, layout),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, layout: &HostLayout) -> String {
        let mut output = String::new();

        let _ = write!(output, "\nDeployment Plan for {}\n", layout.app_name.bold());
        let _ = write!(output, "   Config hash: {}\n\n", Self::short(&plan.config_hash));

        let rows: Vec<PlanRow> = plan
            .phases
            .iter()
            .map(|kind| PlanRow {
                number: kind.number(),
                phase: kind.to_string(),
                description: kind.description().to_string(),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        output.push_str("\nHost layout:\n");
        let paths = [
            ("service account", layout.service_user.clone()),
            ("jar", layout.jar_path.display().to_string()),
            ("web root", layout.web_root.display().to_string()),
            ("environment", layout.env_file.display().to_string()),
            ("unit", layout.unit_file.display().to_string()),
            ("vhost", layout.nginx_conf.display().to_string()),
            ("log file", layout.log_file.display().to_string()),
        ];
        for (label, value) in paths {
            let _ = writeln!(output, "   {label:<16} {value}");
        }

        output
    }

    /// Formats the result of `validate`.
    #[must_use]
    pub fn format_validation(&self, report: &ValidationReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration and host are ready\n\n", "✓".green());
                let disk = &report.preflight.disk;
                let _ = writeln!(
                    output,
                    "   Free disk: {} MiB on {}",
                    disk.available_bytes / (1024 * 1024),
                    disk.mount
                );
                for listener in &report.preflight.recognized_listeners {
                    let _ = writeln!(
                        output,
                        "   Port {} already held by {}",
                        listener.port,
                        listener.process.as_deref().unwrap_or("unknown")
                    );
                }
                Self::push_warnings(&mut output, &report.warnings);
                output
            }
        }
    }

    /// Formats the summary of a deploy or health run.
    #[must_use]
    pub fn format_report(&self, report: &DeploymentReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &DeploymentReport) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "\nRun {} on {} (config {})\n\n",
            Self::short(&report.run_id.to_string()),
            report.hostname,
            Self::short(&report.config_hash)
        );

        let rows: Vec<PhaseRow> = report.phases.iter().map(Self::phase_row).collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !report.rollback.is_empty() {
            output.push_str("\nRolled back:\n");
            for step in &report.rollback {
                let glyph = if step.success { "✓".green() } else { "✗".red() };
                match &step.error {
                    Some(e) => {
                        let _ = writeln!(output, "   {glyph} {} ({e})", step.action);
                    }
                    None => {
                        let _ = writeln!(output, "   {glyph} {}", step.action);
                    }
                }
            }
        }

        if !report.accounts_created.is_empty() {
            let _ = writeln!(output, "\nAccounts created: {}", report.accounts_created.join(", "));
        }
        if !report.files_written.is_empty() {
            output.push_str("\nFiles written:\n");
            for path in &report.files_written {
                let _ = writeln!(output, "   - {}", path.display());
            }
        }
        if !report.services.is_empty() {
            let _ = writeln!(output, "\nServices: {}", report.services.join(", "));
        }

        Self::push_warnings(&mut output, &report.warnings);

        match &report.error {
            Some(e) => {
                let _ = write!(output, "\n{} {e}\n", "✗".red());
            }
            None => {
                let _ = write!(output, "\n{} Application available at {}\n", "✓".green(), report.url);
            }
        }

        output
    }

    fn phase_row(outcome: &PhaseOutcome) -> PhaseRow {
        let details = outcome
            .error
            .clone()
            .or_else(|| outcome.note.clone())
            .unwrap_or_else(|| outcome.changes.join("; "));

        PhaseRow {
            number: outcome.kind.number(),
            phase: outcome.kind.to_string(),
            status: Self::format_status(outcome.status),
            duration: format!("{:.1}s", outcome.duration_ms as f64 / 1000.0),
            details: Self::truncate(&details, 60),
        }
    }

    /// Formats a phase status with color.
    fn format_status(status: PhaseStatus) -> String {
        let label = status.to_string();
        match status {
            PhaseStatus::Created => label.green().to_string(),
            PhaseStatus::Updated => label.yellow().to_string(),
            PhaseStatus::Skipped => label.dimmed().to_string(),
            PhaseStatus::Failed => label.red().to_string(),
            PhaseStatus::NotRun => label.dimmed().to_string(),
        }
    }

    fn push_warnings(output: &mut String, warnings: &[String]) {
        if warnings.is_empty() {
            return;
        }
        let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
        for warning in warnings {
            let _ = writeln!(output, "   - {warning}");
        }
    }

    fn short(s: &str) -> &str {
        s.get(..8).unwrap_or(s)
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len - 3).collect();
            format!("{head}...")
        }
    }
}
