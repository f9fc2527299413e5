//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DeclarationHasher, ValidationResult};
use crate::graph::Graph;
use crate::model::Ensure;
use crate::planner::{Action, ChangeSet, ExecutionResult, NodeStatus};
use crate::reconciler::DriftReport;
use crate::state::StateRecord;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
    hasher: DeclarationHasher,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Execution outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Graph node row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "Depth")]
    depth: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Ensure")]
    ensure: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self {
            format,
            hasher: DeclarationHasher::new(),
        }
    }

    /// Formats a change set for display.
    #[must_use]
    pub fn format_plan(&self, changeset: &ChangeSet, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(changeset).unwrap_or_default(),
            OutputFormat::Text => self.format_plan_text(changeset, detailed),
        }
    }

    fn format_plan_text(&self, changeset: &ChangeSet, detailed: bool) -> String {
        if changeset.is_converged() {
            return format!(
                "{} No changes required - resources are up to date.\n",
                "ok".green()
            );
        }

        let mut output = String::from("\nChange set\n");
        let _ = write!(
            output,
            "   Fingerprint: {}\n\n",
            self.hasher.short_hash(&changeset.fingerprint)
        );

        let rows: Vec<PlanRow> = changeset
            .actionable()
            .enumerate()
            .map(|(i, change)| PlanRow {
                index: i + 1,
                action: Self::format_action(change.action),
                resource: change.id.to_string(),
                reason: Self::truncate(&change.reason, 60),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for change in changeset.actionable().filter(|c| !c.changes.is_empty()) {
                let _ = writeln!(output, "\n   {} {}", change.action.symbol(), change.id);
                for attribute in &change.changes {
                    let _ = writeln!(output, "       {attribute}");
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            changeset.count(Action::Create).to_string().green(),
            changeset.count(Action::Update).to_string().yellow(),
            changeset.count(Action::Delete).to_string().red(),
            changeset.count(Action::Noop)
        );

        output
    }

    /// Formats the outcome of applying a change set.
    #[must_use]
    pub fn format_execution(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => Self::format_execution_text(result),
        }
    }

    fn format_execution_text(result: &ExecutionResult) -> String {
        let status = if result.is_success() {
            format!("{} Apply complete", "ok".green())
        } else if result.cancelled {
            format!("{} Apply cancelled", "!!".yellow())
        } else {
            format!("{} Apply failed", "xx".red())
        };
        let mut output = format!("{status}\n\n");

        let rows: Vec<OutcomeRow> = result
            .outcomes
            .iter()
            .filter(|o| o.action != Action::Noop)
            .map(|o| OutcomeRow {
                resource: o.id.to_string(),
                action: Self::format_action(o.action),
                status: Self::format_status(o.status),
                provider_id: o.provider_id.clone().unwrap_or_default(),
                error: o.error.as_deref().map(|e| Self::truncate(e, 50)).unwrap_or_default(),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = write!(
            output,
            "\n{} succeeded, {} failed, {} skipped\n",
            result.count(NodeStatus::Succeeded).to_string().green(),
            result.count(NodeStatus::Failed).to_string().red(),
            result.count(NodeStatus::Skipped).to_string().yellow()
        );
        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected - state is converged.\n", "ok".green())
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "!!".yellow());
                    for resource in &report.drifted_resources {
                        let _ = writeln!(output, "   - {resource}");
                    }
                    let _ = write!(
                        output,
                        "\n{} pending changes ({} declared, {} recorded).\n",
                        report.drifted_resources.len(),
                        report.total_resources,
                        report.recorded_count
                    );
                    output
                }
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let errors: Vec<_> = result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect();
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": errors,
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Manifest is valid.\n", "ok".green())
                } else {
                    format!("{} Manifest is invalid:\n", "xx".red())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                }
                if warnings {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   {} {warning}", "warning:".yellow());
                    }
                }
                output
            }
        }
    }

    /// Formats the dependency graph.
    #[must_use]
    pub fn format_graph(&self, graph: &Graph) -> String {
        let nodes: Vec<GraphNodeJson> = graph
            .topological_order()
            .into_iter()
            .map(|node| GraphNodeJson {
                id: node.id.to_string(),
                ensure: node.ensure,
                depth: graph.depth(&node.id).unwrap_or_default(),
                depends_on: node.depends_on.iter().map(ToString::to_string).collect(),
            })
            .collect();

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&nodes).unwrap_or_default(),
            OutputFormat::Text => {
                if nodes.is_empty() {
                    return String::from("No resources declared.\n");
                }
                let rows: Vec<GraphRow> = nodes
                    .into_iter()
                    .map(|n| GraphRow {
                        depth: n.depth,
                        resource: n.id,
                        ensure: match n.ensure {
                            Ensure::Present => "present".to_string(),
                            Ensure::Absent => "absent".dimmed().to_string(),
                        },
                        depends_on: n.depends_on.join(", "),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the list of recorded resources.
    #[must_use]
    pub fn format_records(&self, records: &[StateRecord]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(records).unwrap_or_default(),
            OutputFormat::Text => {
                if records.is_empty() {
                    return String::from("No resources recorded.\n");
                }
                let rows: Vec<RecordRow> = records
                    .iter()
                    .map(|r| RecordRow {
                        resource: r.id.to_string(),
                        provider_id: r.provider_id.clone(),
                        hash: self.hasher.short_hash(&r.attributes_hash),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                let _ = write!(output, "\n\n{} resources recorded.\n", records.len());
                output
            }
        }
    }

    /// Formats a single recorded resource.
    #[must_use]
    pub fn format_record(&self, record: &StateRecord) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\n{}\n\n", record.id.to_string().bold());
                let _ = writeln!(output, "   Provider ID: {}", record.provider_id);
                let _ = writeln!(output, "   Revision: {}", record.revision_label());
                let hash = self.hasher.short_hash(&record.attributes_hash);
                let _ = writeln!(output, "   Hash: {hash}");
                let _ = writeln!(output, "   Created: {}", record.created_at);
                let _ = writeln!(output, "   Updated: {}", record.updated_at);
                if !record.dependencies.is_empty() {
                    let deps: Vec<String> =
                        record.dependencies.iter().map(ToString::to_string).collect();
                    let _ = writeln!(output, "   Depends on: {}", deps.join(", "));
                }

                output.push_str("\n   Attributes:\n");
                for (key, value) in &record.attributes {
                    let _ = writeln!(output, "     {key} = {value}");
                }
                output.push_str("\n   Outputs:\n");
                for (key, value) in &record.outputs {
                    let _ = writeln!(output, "     {key} = {value}");
                }
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        let label = format!("{}{action}", action.symbol());
        match action {
            Action::Create => label.green().to_string(),
            Action::Update => label.yellow().to_string(),
            Action::Delete => label.red().to_string(),
            Action::Noop => label.dimmed().to_string(),
        }
    }

    /// Formats a node status with color.
    fn format_status(status: NodeStatus) -> String {
        let label = status.to_string();
        match status {
            NodeStatus::Succeeded => label.green().to_string(),
            NodeStatus::Failed => label.red().to_string(),
            NodeStatus::Skipped => label.yellow().to_string(),
            NodeStatus::Pending | NodeStatus::Running => label.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

#[derive(Serialize)]
struct GraphNodeJson {
    id: String,
    ensure: Ensure,
    depth: usize,
    depends_on: Vec<String>,
}
