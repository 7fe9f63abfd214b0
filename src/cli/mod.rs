//! CLI module for applykit.
//!
//! This module provides the command-line interface for applying,
//! deleting and watching objects.

mod commands;
mod output;

pub use commands::{ApplySwitches, Cli, Commands, DefinitionArgs, LogFormat, OutputFormat, ScopeArg};
pub use output::OutputFormatter;
