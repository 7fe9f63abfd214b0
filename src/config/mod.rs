//! Configuration module for applykit.
//!
//! This module handles all configuration-related functionality:
//! - Per-call apply options derived by copy-then-override
//! - Engine timing and cluster connection settings
//! - Loading `applykit.yaml` with environment overrides

mod apply;
mod parser;
mod settings;

pub use apply::{ApplyConfig, ApplyOption, DEFAULT_RETRIES, DEFAULT_TRACKER_NAME};
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_NAMESPACE, ENV_SERVER, ENV_TOKEN, ENV_TRACKER, find_config_file,
    user_config_file,
};
pub use settings::{ApplyKitConfig, ClusterConfig, PatcherSettings};
