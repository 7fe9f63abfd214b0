//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::object::Object;
use crate::patcher::{ApplyAction, ApplyOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Applied object row for table display.
#[derive(Tabled)]
struct AppliedRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Action")]
    action: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_outcome(&self, outcome: &ApplyOutcome) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&OutcomeJson::from(outcome)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &ApplyOutcome) -> String {
        if outcome.applied.is_empty() {
            return format!("{} Nothing to apply.\n", "✓".green());
        }

        let rows: Vec<AppliedRow> = outcome
            .applied
            .iter()
            .map(|a| AppliedRow {
                resource: a.handle.mapping.resource.clone(),
                name: a.handle.name.clone(),
                namespace: a.handle.namespace().unwrap_or("-").to_string(),
                action: Self::format_action(a.action),
            })
            .collect();

        let count = |action: ApplyAction| outcome.applied.iter().filter(|a| a.action == action).count();

        let mut output = Table::new(rows).to_string();
        output.push('\n');
        let _ = writeln!(
            output,
            "\nApplied: {} created, {} patched, {} recreated, {} unchanged",
            count(ApplyAction::Created).to_string().green(),
            count(ApplyAction::Patched).to_string().yellow(),
            count(ApplyAction::Recreated).to_string().red(),
            count(ApplyAction::Unchanged).to_string().dimmed()
        );
        output
    }

    /// Formats a fetched object. Text output is YAML.
    #[must_use]
    pub fn format_object(&self, object: &Object) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(object).unwrap_or_default(),
            OutputFormat::Text => serde_yaml::to_string(object).unwrap_or_default(),
        }
    }

    /// Formats one watch event.
    #[must_use]
    pub fn format_event(&self, event: &str, object: &Object) -> String {
        let namespace = object.namespace().unwrap_or("-");
        let name = object.name().unwrap_or_default();
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "event": event,
                "namespace": namespace,
                "name": name,
                "resourceVersion": object.resource_version(),
            })
            .to_string(),
            OutputFormat::Text => {
                let label = match event {
                    "added" => event.green(),
                    "deleted" => event.red(),
                    _ => event.yellow(),
                };
                format!("{label:<8} {namespace}/{name}")
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: ApplyAction) -> String {
        match action {
            ApplyAction::Created => "+created".green().to_string(),
            ApplyAction::Patched => "~patched".yellow().to_string(),
            ApplyAction::Recreated => "!recreated".red().to_string(),
            ApplyAction::Unchanged => "unchanged".dimmed().to_string(),
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
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => text.to_string(),
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct OutcomeJson {
    applied: Vec<AppliedJson>,
}

#[derive(serde::Serialize)]
struct AppliedJson {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
    resource_version: Option<String>,
    action: String,
    patch: serde_json::Value,
}

impl From<&ApplyOutcome> for OutcomeJson {
    fn from(outcome: &ApplyOutcome) -> Self {
        Self {
            applied: outcome
                .applied
                .iter()
                .map(|a| AppliedJson {
                    api_version: a.handle.mapping.gvk.api_version(),
                    kind: a.handle.mapping.gvk.kind.clone(),
                    namespace: a.handle.namespace.clone(),
                    name: a.handle.name.clone(),
                    resource_version: a.handle.version_token.clone(),
                    action: a.action.to_string(),
                    patch: serde_json::from_slice(&a.patch).unwrap_or(serde_json::Value::Null),
                })
                .collect(),
        }
    }
}
