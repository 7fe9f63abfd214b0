// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # applykit
//!
//! Client-side declarative apply for Kubernetes-style API servers.
//!
//! ## Overview
//!
//! applykit takes a desired object and makes the server agree with it:
//!
//! - Creates the object when it does not exist
//! - Otherwise computes a three-way patch from the last applied
//!   configuration, the desired object and the live object
//! - Retries on version conflicts, optionally recreating the object
//! - Records the applied configuration in an annotation for the next run
//!
//! ## Architecture
//!
//! 1. **Locate**: the desired object is resolved to a REST mapping and a
//!    namespace, lists are flattened and objects validated
//! 2. **Track**: the configuration tracker stamps the marker annotation
//! 3. **Patch**: the strategy selector picks a structural merge patch for
//!    kinds with field metadata and a JSON merge patch otherwise
//! 4. **Apply**: the patcher sends the patch through an [`client::ObjectStore`]
//!
//! ## Modules
//!
//! - [`patcher`]: Conflict-aware apply loop
//! - [`patch`]: JSON merge and structural merge patches
//! - [`tracker`]: Last-applied configuration annotation
//! - [`result`]: Locating desired objects
//! - [`deletion`]: Reapers, deletion and waiting for it
//! - [`registrar`]: Custom resource registration
//! - [`watcher`]: Polling watcher
//! - [`client`]: Object store trait, REST client and in-memory store
//! - [`config`]: Configuration parsing
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   server: https://kube.example.com:6443
//!   namespace: team-a
//! apply:
//!   tracker_name: ci
//!   retries: 5
//! resources:
//!   - group: example.com
//!     version: v1
//!     kind: Widget
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod client;
pub mod config;
pub mod deletion;
pub mod error;
pub mod manifest;
pub mod object;
pub mod patch;
pub mod patcher;
pub mod registrar;
pub mod resource;
pub mod result;
pub mod tracker;
pub mod validation;
pub mod wait;
pub mod watcher;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use client::{MemoryStore, ObjectStore, RestClient};
pub use config::{ApplyConfig, ApplyKitConfig, ApplyOption, ConfigParser, PatcherSettings};
pub use error::{ApplyKitError, Result};
pub use object::{GroupVersionKind, LiveObjectHandle, Object};
pub use patch::{OpenApiSchema, PatchStrategy, PatchType};
pub use patcher::{ApplyAction, ApplyFailure, ApplyOutcome, Applied, Patcher};
pub use registrar::Registrar;
pub use resource::{ResourceDescriptor, RestMapper, RestMapping, Scope, TypeCatalog};
pub use result::{LocateStrategy, Located, ResultSet};
pub use tracker::ConfigurationTracker;
pub use watcher::{EventHandler, Watcher};
