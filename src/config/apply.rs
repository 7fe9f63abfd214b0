//! Per-call apply configuration.

use serde::{Deserialize, Serialize};

/// Default number of conflict retries.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default tracker name.
pub const DEFAULT_TRACKER_NAME: &str = "default";

/// Options governing a single apply call.
///
/// A snapshot is derived per call with [`ApplyConfig::from_base`]; the base
/// is cloned and never mutated, so concurrent calls with different overrides
/// cannot interfere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Create the object when it does not exist.
    pub allow_create: bool,
    /// Patch the object when it exists.
    pub allow_update: bool,
    /// Recreate the object when patching fails.
    pub delete_first: bool,
    /// Recreate the object when conflicts persist after all retries.
    pub force: bool,
    /// Validate objects client-side before sending them.
    pub validate: bool,
    /// Conflict retries.
    pub retries: u32,
    /// Name of the configuration tracker.
    pub tracker_name: String,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            allow_create: true,
            allow_update: true,
            delete_first: false,
            force: false,
            validate: true,
            retries: DEFAULT_RETRIES,
            tracker_name: String::from(DEFAULT_TRACKER_NAME),
        }
    }
}

impl ApplyConfig {
    /// Copies `base` and applies `options` to the copy.
    #[must_use]
    pub fn from_base(base: &Self, options: &[ApplyOption]) -> Self {
        let mut config = base.clone();
        for option in options {
            option.apply_to(&mut config);
        }
        config
    }

    /// Applies `options` to the defaults.
    #[must_use]
    pub fn with_options(options: &[ApplyOption]) -> Self {
        Self::from_base(&Self::default(), options)
    }
}

/// An override of one [`ApplyConfig`] field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOption {
    /// Never create; the object must exist.
    DisableCreate,
    /// Never patch; the object must not exist.
    DisableUpdate,
    /// Skip client-side validation.
    DisableValidation,
    /// Recreate after the last conflict retry.
    Force,
    /// Recreate whenever the patch fails.
    DeleteFirst,
    /// Number of conflict retries.
    Retries(u32),
    /// Name of the configuration tracker.
    TrackerName(String),
}

impl ApplyOption {
    fn apply_to(&self, config: &mut ApplyConfig) {
        match self {
            Self::DisableCreate => config.allow_create = false,
            Self::DisableUpdate => config.allow_update = false,
            Self::DisableValidation => config.validate = false,
            Self::Force => config.force = true,
            Self::DeleteFirst => config.delete_first = true,
            Self::Retries(retries) => config.retries = *retries,
            Self::TrackerName(name) => config.tracker_name.clone_from(name),
        }
    }
}
