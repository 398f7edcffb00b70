//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::graph::Graph;
use crate::orchestrator::ApplyReport;
use crate::planner::{Action, Phase, Plan, PlanEntry};
use crate::state::ResourceState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Apply entry row for table display.
#[derive(Tabled)]
struct ApplyRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Phase")]
    phase: String,
}

/// Graph node row for table display.
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

/// State record row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let value = json!({
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&value).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid", "✓".green());
                } else {
                    let count = result.error_count();
                    let _ = writeln!(output, "{} Configuration has {count} errors:", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                } else if !result.warnings.is_empty() {
                    let count = result.warning_count();
                    let _ = writeln!(output, "   ({count} warnings, use --warnings to show)");
                }
                output
            }
        }
    }

    /// Formats the dependency graph as a table or JSON edge list.
    #[must_use]
    pub fn format_graph(&self, graph: &Graph) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<_> = graph
                    .topological_order()
                    .into_iter()
                    .map(|n| json!({"name": n.name(), "kind": n.kind(), "module": n.module_path()}))
                    .collect();
                let edges: Vec<_> = graph
                    .edges()
                    .into_iter()
                    .map(|(from, to)| json!({"from": from, "to": to}))
                    .collect();
                serde_json::to_string_pretty(&json!({"nodes": nodes, "edges": edges}))
                    .unwrap_or_default()
            }
            OutputFormat::Text => {
                let rows: Vec<NodeRow> = graph
                    .topological_order()
                    .into_iter()
                    .map(|n| NodeRow {
                        name: n.name().to_string(),
                        kind: n.kind().to_string(),
                        depends_on: graph
                            .dependencies(n.name())
                            .iter()
                            .map(|d| d.name())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                let _ = write!(output, "\n\n{} nodes, {} edges\n", graph.len(), graph.edge_count());
                output
            }
        }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes. Infrastructure matches the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan {}", plan.id);
        let hash = ConfigHasher::short_hash(&plan.config_hash);
        let _ = write!(output, "   Config hash: {hash}\n\n");

        let rows: Vec<PlanRow> = plan
            .changes()
            .map(|e| PlanRow {
                action: Self::format_action(e.action),
                resource: e.node.clone(),
                changes: Self::summarize_changes(e),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for entry in plan.changes().filter(|e| !e.changes.is_empty()) {
                let _ = writeln!(output, "\n  {} {}", entry.action.symbol(), entry.node.bold());
                for change in &entry.changes {
                    let (old, new) = change.rendered();
                    let marker = if change.requires_replace {
                        " (forces replacement)".red().to_string()
                    } else {
                        String::new()
                    };
                    let _ = writeln!(output, "      {}: {old} => {new}{marker}", change.key);
                }
            }
        }

        let counts = plan.counts();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy\n",
            counts.create.to_string().green(),
            counts.update.to_string().yellow(),
            counts.replace.to_string().yellow(),
            counts.delete.to_string().red()
        );
        output
    }

    /// Formats an apply report.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => {
                let failures: Vec<String> = report
                    .error
                    .iter()
                    .flat_map(|e| e.failures().iter().map(ToString::to_string))
                    .collect();
                let value = json!({
                    "success": report.is_success(),
                    "canceled": report.error.as_ref().is_some_and(|e| e.is_canceled()),
                    "config_hash": report.config_hash,
                    "counts": report.counts(),
                    "entries": report.entries,
                    "outputs": report.outputs,
                    "failures": failures,
                });
                serde_json::to_string_pretty(&value).unwrap_or_default()
            }
            OutputFormat::Text => {
                let status = match &report.error {
                    None => format!("{} Apply complete", "✓".green()),
                    Some(e) if e.is_canceled() => format!("{} Apply canceled", "⚠".yellow()),
                    Some(_) => format!("{} Apply failed", "✗".red()),
                };
                let mut output = format!("{status}\n\n");

                let rows: Vec<ApplyRow> = report
                    .entries
                    .iter()
                    .filter(|e| e.action != Action::NoOp)
                    .map(|e| ApplyRow {
                        action: Self::format_action(e.action),
                        resource: e.node.clone(),
                        phase: Self::format_phase(e.phase),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let counts = report.counts();
                let _ = writeln!(output, "\n   Created: {}", counts.create);
                let _ = writeln!(output, "   Updated: {}", counts.update);
                let _ = writeln!(output, "   Replaced: {}", counts.replace);
                let _ = writeln!(output, "   Deleted: {}", counts.delete);
                let _ = writeln!(output, "   Unchanged: {}", counts.no_op);

                if let Some(error) = &report.error {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for failure in error.failures() {
                        let _ = writeln!(output, "   - {failure}");
                    }
                }

                if !report.outputs.is_empty() {
                    output.push_str("\nOutputs:\n");
                    for (name, value) in &report.outputs {
                        let _ = writeln!(output, "   {name} = {value}");
                    }
                }
                output
            }
        }
    }

    /// Formats a list of state records.
    #[must_use]
    pub fn format_state_list(&self, records: &[(String, ResourceState)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = records
                    .iter()
                    .map(|(name, record)| {
                        (name.clone(), serde_json::to_value(record).unwrap_or_default())
                    })
                    .collect();
                serde_json::to_string_pretty(&map).unwrap_or_default()
            }
            OutputFormat::Text => {
                if records.is_empty() {
                    return String::from("No resources in state.\n");
                }
                let rows: Vec<StateRow> = records
                    .iter()
                    .map(|(name, record)| StateRow {
                        name: name.clone(),
                        id: Self::truncate(&record.id, 36),
                        status: record.status.clone().unwrap_or_else(|| String::from("-")),
                        updated: record.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats one state record.
    #[must_use]
    pub fn format_resource(&self, name: &str, record: &ResourceState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\n{}", name.bold());
                let _ = writeln!(output, "   ID: {}", record.id);
                let _ = writeln!(output, "   Type: {}", record.resource_type);
                let _ = writeln!(output, "   Provider: {}", record.provider);
                let _ = writeln!(output, "   Module: {}", record.module_path);
                if let Some(status) = &record.status {
                    let _ = writeln!(output, "   Status: {status}");
                }
                let hash = ConfigHasher::short_hash(&record.config_hash);
                let _ = writeln!(output, "   Config hash: {hash}");
                let _ = writeln!(output, "   Last updated: {}", record.updated_at);
                output.push_str("   Attributes:\n");
                for (key, value) in &record.attributes {
                    let _ = writeln!(output, "     {key} = {value}");
                }
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        let label = format!("{}{action}", action.symbol().trim());
        match action {
            Action::Create => label.green().to_string(),
            Action::Update => label.yellow().to_string(),
            Action::Replace => label.magenta().to_string(),
            Action::Delete => label.red().to_string(),
            Action::NoOp => label.dimmed().to_string(),
        }
    }

    /// Formats a phase with color.
    fn format_phase(phase: Phase) -> String {
        match phase {
            Phase::Done | Phase::NoOp => phase.to_string().green().to_string(),
            Phase::Failed => phase.to_string().red().to_string(),
            Phase::Unvisited => "not reached".dimmed().to_string(),
            Phase::Diffed | Phase::Applying | Phase::Converging => {
                phase.to_string().yellow().to_string()
            }
        }
    }

    fn summarize_changes(entry: &PlanEntry) -> String {
        let keys: Vec<&str> = entry.changes.iter().map(|c| c.key.as_str()).collect();
        Self::truncate(&keys.join(", "), 40)
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, marker: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&json!({ "status": status, "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ModulePath, Node, NodeKind};
    use crate::planner::AttributeChange;
    use serde_json::Value;

    fn plan() -> Plan {
        let entry = |node: &str, action: Action| PlanEntry {
            node: node.to_string(),
            kind: NodeKind::Resource,
            resource_type: Some(String::from("null_resource")),
            action,
            changes: vec![AttributeChange {
                key: String::from("triggers"),
                old: None,
                new: Some(serde_json::json!({"v": 1})),
                requires_replace: true,
            }],
            phase: Phase::Diffed,
        };
        Plan::new(
            "a".repeat(64),
            vec![
                entry("null_resource.a", Action::Create),
                entry("null_resource.b", Action::Replace),
            ],
        )
    }

    #[test]
    fn test_plan_text_and_json() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), true);
        assert!(text.contains("null_resource.b"));
        assert!(text.contains("forces replacement"));
        assert!(text.contains("1 to create"));

        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"][1]["action"], "replace");
    }

    #[test]
    fn test_graph_json_lists_edges() {
        let graph = Graph::build(vec![
            Node::provider("null", None, ModulePath::root(), serde_json::json!({})),
            Node::resource("null_resource", "a", ModulePath::root(), serde_json::json!({})),
        ])
        .unwrap();
        let json = OutputFormatter::new(OutputFormat::Json).format_graph(&graph);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["edges"][0]["from"], "null_resource.a");
        assert_eq!(value["nodes"][0]["name"], "provider.null");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a-very-long-identifier", 10), "a-very-...");
    }
}
