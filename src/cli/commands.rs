//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ApplyOption, ENV_NAMESPACE, ENV_SERVER, ENV_TOKEN};
use crate::resource::{ResourceDescriptor, Scope};

/// applykit - three-way apply for Kubernetes-style API servers.
#[derive(Parser, Debug)]
#[command(name = "applykit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "APPLYKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// API server URL.
    #[arg(long, global = true, env = ENV_SERVER)]
    pub server: Option<String>,

    /// Bearer token.
    #[arg(long, global = true, env = ENV_TOKEN, hide_env_values = true)]
    pub token: Option<String>,

    /// Namespace for objects that do not name one.
    #[arg(short, long, global = true, env = ENV_NAMESPACE)]
    pub namespace: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or patch the objects of a manifest.
    Apply {
        /// Manifest file (YAML or JSON, multiple documents allowed).
        #[arg(short, long)]
        file: PathBuf,

        /// Apply switches.
        #[command(flatten)]
        switches: ApplySwitches,
    },

    /// Delete the objects of a manifest.
    Delete {
        /// Manifest file.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Fetch an object.
    Get {
        /// API version, e.g. `apps/v1`.
        api_version: String,

        /// Kind, e.g. `Deployment`.
        kind: String,

        /// Object name.
        name: String,
    },

    /// Print the registration manifest of a custom resource.
    #[command(disable_version_flag = true)]
    Definition(DefinitionArgs),

    /// Register a custom resource and wait until it is established.
    Register(DefinitionArgs),

    /// Print add, update and delete events of a kind.
    Watch {
        /// API version, e.g. `example.com/v1`.
        api_version: String,

        /// Kind, e.g. `Widget`.
        kind: String,

        /// Watch every namespace.
        #[arg(short = 'A', long)]
        all_namespaces: bool,

        /// Seconds between resyncs.
        #[arg(long, default_value = "5")]
        resync_secs: u64,
    },
}

/// Switches of the `apply` command.
#[derive(Args, Debug, Default)]
pub struct ApplySwitches {
    /// Tracker name used in the last-applied annotation.
    #[arg(long)]
    pub tracker: Option<String>,

    /// Recreate the object when conflicts persist.
    #[arg(long)]
    pub force: bool,

    /// Recreate the object when the patch is rejected.
    #[arg(long)]
    pub delete_first: bool,

    /// Fail instead of creating missing objects.
    #[arg(long)]
    pub no_create: bool,

    /// Fail instead of patching existing objects.
    #[arg(long)]
    pub no_update: bool,

    /// Skip client-side validation.
    #[arg(long)]
    pub no_validate: bool,

    /// Number of conflict retries.
    #[arg(long)]
    pub retries: Option<u32>,
}

impl ApplySwitches {
    /// Converts the switches into apply overrides.
    #[must_use]
    pub fn options(&self) -> Vec<ApplyOption> {
        let mut options = Vec::new();
        if let Some(tracker) = &self.tracker {
            options.push(ApplyOption::TrackerName(tracker.clone()));
        }
        if self.force {
            options.push(ApplyOption::Force);
        }
        if self.delete_first {
            options.push(ApplyOption::DeleteFirst);
        }
        if self.no_create {
            options.push(ApplyOption::DisableCreate);
        }
        if self.no_update {
            options.push(ApplyOption::DisableUpdate);
        }
        if self.no_validate {
            options.push(ApplyOption::DisableValidation);
        }
        if let Some(retries) = self.retries {
            options.push(ApplyOption::Retries(retries));
        }
        options
    }
}

/// Identifies a custom resource kind.
#[derive(Args, Debug)]
pub struct DefinitionArgs {
    /// API group.
    #[arg(long)]
    pub group: String,

    /// API version.
    #[arg(long)]
    pub version: String,

    /// Kind.
    #[arg(long)]
    pub kind: String,

    /// Singular name, defaults to the lower-cased kind.
    #[arg(long)]
    pub name: Option<String>,

    /// Plural name, defaults to the name plus `s`.
    #[arg(long)]
    pub plural: Option<String>,

    /// Scope of the objects.
    #[arg(long, default_value = "namespaced")]
    pub scope: ScopeArg,

    /// Short names.
    #[arg(long = "alias")]
    pub aliases: Vec<String>,
}

impl DefinitionArgs {
    /// Builds the descriptor.
    #[must_use]
    pub fn descriptor(&self) -> ResourceDescriptor {
        let mut descriptor = ResourceDescriptor::new(&self.group, &self.version, &self.kind)
            .with_scope(self.scope.into());
        if let Some(name) = &self.name {
            descriptor = descriptor.with_name(name);
        }
        if let Some(plural) = &self.plural {
            descriptor = descriptor.with_plural(plural);
        }
        for alias in &self.aliases {
            descriptor = descriptor.with_alias(alias);
        }
        descriptor
    }
}

/// Scope options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum ScopeArg {
    /// Objects live in a namespace.
    #[default]
    Namespaced,
    /// Objects are cluster-wide.
    Cluster,
}

impl From<ScopeArg> for Scope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Namespaced => Self::Namespaced,
            ScopeArg::Cluster => Self::Cluster,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "applykit",
            "-n",
            "team-a",
            "apply",
            "-f",
            "app.yaml",
            "--force",
            "--retries",
            "2",
            "--tracker",
            "ci",
        ])
        .expect("parse");

        assert_eq!(cli.namespace.as_deref(), Some("team-a"));
        let Commands::Apply { file, switches } = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(file, PathBuf::from("app.yaml"));
        assert_eq!(
            switches.options(),
            vec![
                ApplyOption::TrackerName(String::from("ci")),
                ApplyOption::Force,
                ApplyOption::Retries(2),
            ]
        );
    }

    #[test]
    fn test_parse_definition() {
        let cli = Cli::try_parse_from([
            "applykit",
            "definition",
            "--group",
            "example.com",
            "--version",
            "v1",
            "--kind",
            "Mouse",
            "--plural",
            "mice",
            "--scope",
            "cluster",
            "--alias",
            "ms",
        ])
        .expect("parse");

        let Commands::Definition(args) = cli.command else {
            panic!("expected definition");
        };
        let descriptor = args.descriptor();
        assert_eq!(descriptor.full_name(), "mice.example.com");
        assert_eq!(descriptor.scope, Scope::Cluster);
        assert_eq!(descriptor.aliases, ["ms"]);
    }
}
