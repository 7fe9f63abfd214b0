//! Resource kinds: descriptors, REST mappings and the structural-type catalog.
//!
//! Kinds are registered explicitly. A custom kind is described by a
//! [`ResourceDescriptor`], added to a [`RestMapper`] so it can be addressed,
//! and to a [`TypeCatalog`] so the patch selector knows it has no compiled
//! schema.

mod catalog;
mod descriptor;
mod mapper;

pub use catalog::{TypeCatalog, TypeEntry};
pub use descriptor::{ResourceDescriptor, TypeTag};
pub use mapper::{RestMapper, RestMapping, Scope};
