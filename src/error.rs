//! Error types for the applykit reconciliation toolkit.
//!
//! This module provides the error hierarchy for every stage of an apply:
//! input handling, policy checks, API server responses, merge preconditions,
//! transport, kind registration and deletion.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for applykit.
#[derive(Debug, Error)]
pub enum ApplyKitError {
    /// The caller handed us something we cannot apply.
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// The current apply configuration forbids the requested action.
    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    /// The API server rejected the request.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// A merge precondition did not hold.
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// Network or serialization failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The kind is unknown to the mapping layer or could not be registered.
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Deletion could not be carried out.
    #[error("Deletion error: {0}")]
    Deletion(#[from] DeletionError),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The operation was cancelled between two blocking steps.
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// Operation that was interrupted.
        operation: String,
    },

    /// Several independent failures.
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ApplyKitError>),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors caused by the object handed in by the caller.
#[derive(Debug, Error)]
pub enum InputError {
    /// Nothing to apply.
    #[error("no object given, can't apply")]
    NoObjectGiven,

    /// The value is not a JSON object.
    #[error("object is not a JSON object (got {found})")]
    NotAnObject {
        /// JSON type that was found instead.
        found: String,
    },

    /// A required field is missing or has the wrong type.
    #[error("object is missing required field `{field}`")]
    MissingField {
        /// Dotted path of the missing field.
        field: String,
    },

    /// The object failed client-side validation.
    #[error("object failed validation: {message}")]
    Invalid {
        /// Description of the validation failure.
        message: String,
    },

    /// A manifest could not be decoded.
    #[error("invalid manifest: {message}")]
    InvalidManifest {
        /// Description of the decode failure.
        message: String,
    },
}

/// Policy-level refusals driven by the apply configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    /// Creating is disabled and the object does not exist yet.
    #[error("creating an object is not allowed with the current configuration")]
    CreateNotAllowed,

    /// Updating is disabled and the object already exists.
    #[error("updating an object is not allowed with the current configuration")]
    UpdateNotAllowed,
}

/// Errors returned by the API server.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Optimistic concurrency failure: the version token was stale.
    #[error("conflict updating {name}: {message}")]
    Conflict {
        /// Name of the object.
        name: String,
        /// Server message.
        message: String,
    },

    /// The object does not exist.
    #[error("{resource} \"{name}\" not found")]
    NotFound {
        /// Plural resource name.
        resource: String,
        /// Object name.
        name: String,
    },

    /// The object already exists.
    #[error("{resource} \"{name}\" already exists")]
    AlreadyExists {
        /// Plural resource name.
        resource: String,
        /// Object name.
        name: String,
    },

    /// The server refused the object as invalid (e.g. an immutable field changed).
    #[error("{name} is invalid: {message}")]
    Invalid {
        /// Object name.
        name: String,
        /// Server message.
        message: String,
    },

    /// Any other non-success status.
    #[error("request failed: {code} {reason} - {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Machine-readable reason.
        reason: String,
        /// Server message.
        message: String,
    },
}

/// Merge preconditions.
#[derive(Debug, Error)]
pub enum PreconditionError {
    /// `apiVersion`, `kind` or `metadata.name` would be changed by the patch.
    #[error("at least one of apiVersion, kind and name was changed ({})", .fields.join(", "))]
    IdentityFieldsChanged {
        /// Fields the patch tried to change.
        fields: Vec<String>,
    },
}

/// Transport and encoding failures. Never retried by the apply loop.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network error.
    #[error("network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Encoding or decoding failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The server answered with something we could not understand.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Kind registration and mapping errors.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// No REST mapping is known for the kind.
    #[error("no mapping registered for {gvk}")]
    UnknownKind {
        /// `group/version, Kind=kind` description.
        gvk: String,
    },

    /// The definition never became established.
    #[error("resource definition {name} did not become established")]
    NotReady {
        /// Full definition name.
        name: String,
    },
}

/// Deletion orchestration errors.
#[derive(Debug, Error)]
pub enum DeletionError {
    /// No graceful procedure exists for the kind.
    #[error("no reaper registered for {group_kind}")]
    NoSuchReaper {
        /// `Kind.group` description.
        group_kind: String,
    },

    /// Timed out waiting for a deletion or scale-down to finish.
    #[error("timed out waiting for {name} to be {waiting_for}")]
    Timeout {
        /// Object name.
        name: String,
        /// What we were waiting for.
        waiting_for: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A value is out of range or malformed.
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue {
        /// Field that failed validation.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for applykit operations.
pub type Result<T> = std::result::Result<T, ApplyKitError>;

fn join_errors(errors: &[ApplyKitError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ApplyKitError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a cancellation error for the given operation.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Wraps a list of errors; a single error is returned unwrapped.
    #[must_use]
    pub fn aggregate(mut errors: Vec<Self>) -> Self {
        if errors.len() == 1 {
            if let Some(err) = errors.pop() {
                return err;
            }
        }
        Self::Aggregate(errors)
    }

    /// Returns true if the server rejected a write because of a stale version.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Api(ApiError::Conflict { .. }))
    }

    /// Returns true if the object does not exist on the server.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(ApiError::NotFound { .. }))
    }

    /// Returns true if a create hit an existing object.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::Api(ApiError::AlreadyExists { .. }))
    }

    /// Returns true if no object was handed to apply or delete.
    #[must_use]
    pub const fn is_no_object_given(&self) -> bool {
        matches!(self, Self::Input(InputError::NoObjectGiven))
    }

    /// Returns true if the apply was refused because creating is disabled.
    #[must_use]
    pub const fn is_create_not_allowed(&self) -> bool {
        matches!(self, Self::Permission(PermissionError::CreateNotAllowed))
    }

    /// Returns true if the apply was refused because updating is disabled.
    #[must_use]
    pub const fn is_update_not_allowed(&self) -> bool {
        matches!(self, Self::Permission(PermissionError::UpdateNotAllowed))
    }

    /// Returns true if no reaper exists for the kind.
    #[must_use]
    pub const fn is_no_such_reaper(&self) -> bool {
        matches!(self, Self::Deletion(DeletionError::NoSuchReaper { .. }))
    }

    /// Returns true if the error is retried by the apply loop.
    ///
    /// Only optimistic-concurrency conflicts are retried; everything else is
    /// surfaced to the caller immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

impl ApiError {
    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }
}

impl TransportError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ApplyKitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(TransportError::serialization(err.to_string()))
    }
}

impl ConfigError {
    /// Creates an invalid-value error for a specific field.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
