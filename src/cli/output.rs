//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::graph::ResourceGraph;
use crate::planner::{ActionType, Plan};
use crate::reconciler::{DriftReport, ReconciliationResult, StackOutput};
use crate::state::{ResourceStatus, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    logical_id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

/// Graph row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    logical_id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when emitting JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_converged() {
            return format!(
                "{} No changes required - stack is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan for stack '{}'", plan.stack);
        if !plan.config_hash.is_empty() {
            let _ = writeln!(output, "   Config hash: {}", short(&plan.config_hash));
        }
        output.push('\n');

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .filter(|a| detailed || a.action_type != ActionType::NoOp)
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                kind: a.resource.kind.to_string(),
                resource: a.logical_id().to_string(),
                reason: truncate(&a.reason, 40),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red()
        );

        output
    }

    /// Formats the resource graph in execution order.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<GraphJson<'_>> = graph
                    .topological_order()
                    .map(|r| GraphJson {
                        id: &r.logical_id,
                        kind: r.kind.as_str(),
                        depends_on: graph.dependencies_of(&r.logical_id),
                    })
                    .collect();
                to_json(&nodes)
            }
            OutputFormat::Text => {
                if graph.is_empty() {
                    return String::from("No resources declared.\n");
                }
                let rows: Vec<GraphRow> = graph
                    .topological_order()
                    .enumerate()
                    .map(|(i, r)| GraphRow {
                        index: i + 1,
                        logical_id: r.logical_id.clone(),
                        kind: r.kind.to_string(),
                        depends_on: graph.dependencies_of(&r.logical_id).join(", "),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(|e| format!("{}: {}", e.field, e.message)).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                for error in &result.errors {
                    let _ = writeln!(output, "{} {}: {}", "✗".red(), error.field, error.message);
                }
                if show_warnings {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "{} {warning}", "⚠".yellow());
                    }
                }
                if result.is_valid() {
                    let _ = writeln!(
                        output,
                        "{} Stack file is valid ({} warnings)",
                        "✓".green(),
                        result.warning_count()
                    );
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!(
                        "{} No drift detected in {} resources.\n",
                        "✓".green(),
                        report.checked
                    );
                }

                let mut output = String::new();
                if report.has_drift {
                    let _ = write!(output, "{} Drift detected:\n\n", "⚠".yellow());
                    for resource in &report.drifted {
                        let _ = writeln!(
                            output,
                            "   - {} {} ({}): {}",
                            resource.kind, resource.logical_id, resource.remote_id, resource.drift
                        );
                    }
                    let _ = write!(
                        output,
                        "\n{}/{} resources have drifted.\n",
                        report.drifted.len(),
                        report.checked
                    );
                }
                if report.pending_changes > 0 {
                    let _ = writeln!(
                        output,
                        "{} {} changes pending from the stack file; run `edgestack plan`.",
                        "⚠".yellow(),
                        report.pending_changes
                    );
                }
                output
            }
        }
    }

    /// Formats a reconciliation result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let status = if !result.approved {
                    format!("{} Plan not approved, nothing changed", "⚠".yellow())
                } else if result.success {
                    format!("{} {} successful", "✓".green(), capitalize(&result.operation.to_string()))
                } else if result.cancelled {
                    format!("{} {} cancelled", "⚠".yellow(), capitalize(&result.operation.to_string()))
                } else {
                    format!("{} {} failed", "✗".red(), capitalize(&result.operation.to_string()))
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Deleted: {}", result.deleted);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);
                if result.skipped > 0 {
                    let _ = writeln!(output, "   Skipped: {}", result.skipped);
                }

                if !result.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if result.has_unsettled() {
                    let _ = writeln!(
                        output,
                        "\nState was saved; run `edgestack apply` again to resume."
                    );
                }

                output
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(&self, state: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    state.stack,
                    state.environment
                );

                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Config hash: {}", short(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());

                if !state.resources.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            logical_id: r.logical_id.clone(),
                            kind: r.kind.to_string(),
                            status: Self::format_status(r.status),
                            remote_id: r.remote_id.clone().unwrap_or_else(|| String::from("-")),
                            hash: short(&r.properties_hash).to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats stack outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &[StackOutput]) -> String {
        match self.format {
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = outputs
                    .iter()
                    .map(|o| (o.name.clone(), o.value.clone().unwrap_or(serde_json::Value::Null)))
                    .collect();
                to_json(&map)
            }
            OutputFormat::Text => {
                if outputs.is_empty() {
                    return String::from("No outputs declared.\n");
                }
                let mut output = String::new();
                for o in outputs {
                    let value = o.value.as_ref().map_or_else(
                        || "(not yet available)".dimmed().to_string(),
                        |v| v.as_str().map_or_else(|| v.to_string(), str::to_string),
                    );
                    let _ = writeln!(output, "{} = {value}", o.name);
                }
                output
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::NoOp => "noop".dimmed().to_string(),
        }
    }

    /// Formats a resource status with color.
    fn format_status(status: ResourceStatus) -> String {
        match status {
            ResourceStatus::Created | ResourceStatus::Updated => status.to_string().green().to_string(),
            ResourceStatus::Pending => status.to_string().yellow().to_string(),
            ResourceStatus::Failed => status.to_string().red().to_string(),
            ResourceStatus::Deleted => status.to_string().dimmed().to_string(),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &format!("{} {message}", "✗".red()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => text.to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    stack: String,
    config_hash: String,
    converged: bool,
    creates: usize,
    updates: usize,
    deletes: usize,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action_type: String,
    kind: String,
    resource: String,
    remote_id: Option<String>,
    reason: String,
}

#[derive(Serialize)]
struct GraphJson<'a> {
    id: &'a str,
    kind: &'a str,
    depends_on: Vec<&'a str>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            stack: plan.stack.clone(),
            config_hash: plan.config_hash.clone(),
            converged: plan.is_converged(),
            creates: plan.create_count(),
            updates: plan.update_count(),
            deletes: plan.delete_count(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    kind: a.resource.kind.to_string(),
                    resource: a.logical_id().to_string(),
                    remote_id: a.prior_remote_id().map(str::to_string),
                    reason: a.reason.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceKind, ResourceSpec};
    use crate::planner::DiffEngine;

    fn site_graph() -> ResourceGraph {
        ResourceGraph::build(&[
            ResourceSpec::new("B1", ResourceKind::Bucket),
            ResourceSpec::new("D1", ResourceKind::Distribution).with_property("origin", "${B1}"),
        ])
        .unwrap()
    }

    #[test]
    fn test_plan_json() {
        let plan = DiffEngine::new()
            .compute(&site_graph(), &StateSnapshot::new("site", "dev"), "abc")
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&OutputFormatter::new(OutputFormat::Json).format_plan(&plan, false)).unwrap();

        assert_eq!(json["creates"], 2);
        assert_eq!(json["actions"][1]["resource"], "D1");
        assert_eq!(json["actions"][1]["action_type"], "create");
    }

    #[test]
    fn test_plan_text_lists_resources() {
        let plan = DiffEngine::new()
            .compute(&site_graph(), &StateSnapshot::new("site", "dev"), "abcdef0123")
            .unwrap();
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan, false);

        assert!(text.contains("Plan for stack 'site'"));
        assert!(text.contains("abcdef01"));
        assert!(text.contains("D1"));
    }

    #[test]
    fn test_graph_json_in_order() {
        let json: serde_json::Value =
            serde_json::from_str(&OutputFormatter::new(OutputFormat::Json).format_graph(&site_graph())).unwrap();
        assert_eq!(json[0]["id"], "B1");
        assert_eq!(json[1]["depends_on"][0], "B1");
    }

    #[test]
    fn test_outputs_json_uses_null_for_missing() {
        let outputs = vec![StackOutput {
            name: String::from("DomainName"),
            expression: String::from("${D1.domain_name}"),
            value: None,
        }];
        let json: serde_json::Value =
            serde_json::from_str(&OutputFormatter::new(OutputFormat::Json).format_outputs(&outputs)).unwrap();
        assert!(json["DomainName"].is_null());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
        assert_eq!(short("abc"), "abc");
    }
}
