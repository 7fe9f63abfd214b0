//! Catalog of kinds with compiled field-merge metadata.
//!
//! Kinds listed here as structured are patched with structural merge
//! patches; unstructured or unlisted kinds fall back to JSON merge patches.

use std::collections::HashMap;

use crate::object::GroupVersionKind;
use crate::patch::{PatchMeta, object_meta};

use super::descriptor::ResourceDescriptor;

/// How the engine knows a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeEntry {
    /// A compiled type with field-merge metadata.
    Structured(PatchMeta),
    /// A kind without compiled schema, such as a custom resource.
    Unstructured,
}

/// Registry mapping kinds to their [`TypeEntry`].
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    entries: HashMap<GroupVersionKind, TypeEntry>,
}

impl TypeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog of the built-in kinds.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        let core = |kind: &str| GroupVersionKind::new("", "v1", kind);
        let apps = |kind: &str| GroupVersionKind::new("apps", "v1", kind);

        catalog.register_structured(core("Pod"), object_meta().field("spec", pod_spec()));
        catalog.register_structured(core("Service"), object_meta().field("spec", service_spec()));
        catalog.register_structured(
            core("ServiceAccount"),
            object_meta()
                .merge_list("secrets", "name", PatchMeta::new())
                .merge_list("imagePullSecrets", "name", PatchMeta::new()),
        );
        catalog.register_structured(core("ReplicationController"), workload());
        for kind in ["ConfigMap", "Secret", "Namespace"] {
            catalog.register_structured(core(kind), object_meta());
        }
        for kind in ["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet"] {
            catalog.register_structured(apps(kind), workload());
        }
        catalog.register_structured(GroupVersionKind::new("batch", "v1", "Job"), workload());
        catalog.register_structured(
            GroupVersionKind::new("policy", "v1", "PodDisruptionBudget"),
            object_meta(),
        );
        catalog
    }

    /// Registers a compiled kind.
    pub fn register_structured(&mut self, gvk: GroupVersionKind, meta: PatchMeta) {
        self.entries.insert(gvk, TypeEntry::Structured(meta));
    }

    /// Registers a kind without compiled schema.
    pub fn register_unstructured(&mut self, gvk: GroupVersionKind) {
        self.entries.insert(gvk, TypeEntry::Unstructured);
    }

    /// Registers a custom kind as unstructured.
    pub fn register_descriptor(&mut self, descriptor: &ResourceDescriptor) {
        self.register_unstructured(descriptor.group_version_kind());
    }

    /// Looks up a kind.
    #[must_use]
    pub fn entry(&self, gvk: &GroupVersionKind) -> Option<&TypeEntry> {
        self.entries.get(gvk)
    }
}

fn container() -> PatchMeta {
    PatchMeta::new()
        .merge_list("ports", "containerPort", PatchMeta::new())
        .merge_list("env", "name", PatchMeta::new())
        .merge_list("volumeMounts", "mountPath", PatchMeta::new())
        .merge_list("volumeDevices", "devicePath", PatchMeta::new())
}

fn pod_spec() -> PatchMeta {
    PatchMeta::new()
        .merge_list("containers", "name", container())
        .merge_list("initContainers", "name", container())
        .merge_list("ephemeralContainers", "name", container())
        .merge_list("volumes", "name", PatchMeta::new())
        .merge_list("imagePullSecrets", "name", PatchMeta::new())
        .merge_list("hostAliases", "ip", PatchMeta::new())
}

fn service_spec() -> PatchMeta {
    PatchMeta::new().merge_list("ports", "port", PatchMeta::new())
}

/// Kinds embedding a pod template under `spec.template`.
fn workload() -> PatchMeta {
    object_meta().field(
        "spec",
        PatchMeta::new().field("template", object_meta().field("spec", pod_spec())),
    )
}
