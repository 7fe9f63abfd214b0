//! Field-merge metadata for structural merge patches.
//!
//! A [`PatchMeta`] tree tells the structural merge which lists are merged by
//! key, which are merged as sets of primitives and which fields are replaced
//! wholesale. Fields without metadata follow the defaults: maps merge
//! recursively, lists are replaced.

use std::collections::BTreeMap;

static EMPTY: PatchMeta = PatchMeta {
    fields: BTreeMap::new(),
};

/// How a field is combined during a structural merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Maps merge recursively, lists replace.
    #[default]
    Default,
    /// Lists merge: by `merge_key` for lists of maps, as a set otherwise.
    Merge,
    /// The field is replaced wholesale.
    Replace,
}

impl MergeStrategy {
    /// Parses an `x-kubernetes-patch-strategy` value such as `merge,retainKeys`.
    #[must_use]
    pub fn from_extension(value: &str) -> Self {
        let mut strategy = Self::Default;
        for part in value.split(',').map(str::trim) {
            match part {
                "merge" => strategy = Self::Merge,
                "replace" => strategy = Self::Replace,
                _ => {}
            }
        }
        strategy
    }
}

/// Metadata for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMeta {
    /// Merge strategy.
    pub strategy: MergeStrategy,
    /// Key identifying list elements when merging lists of maps.
    pub merge_key: Option<String>,
    /// Metadata of the field's value (or of the list's elements).
    pub nested: PatchMeta,
}

impl FieldMeta {
    /// Returns true if this field is a list merged by key.
    #[must_use]
    pub fn merges_by_key(&self) -> bool {
        self.strategy == MergeStrategy::Merge && self.merge_key.is_some()
    }

    /// Returns true if this field is a list of primitives merged as a set.
    #[must_use]
    pub fn merges_as_set(&self) -> bool {
        self.strategy == MergeStrategy::Merge && self.merge_key.is_none()
    }

    /// Returns true if the field carries no information beyond the defaults.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.strategy == MergeStrategy::Default
            && self.merge_key.is_none()
            && self.nested.is_empty()
    }
}

/// Field-merge metadata for a map-shaped value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchMeta {
    fields: BTreeMap<String, FieldMeta>,
}

impl PatchMeta {
    /// Creates empty metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Returns true if no field has metadata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Adds metadata for a nested map field.
    #[must_use]
    pub fn field(mut self, name: &str, nested: Self) -> Self {
        self.insert(name, FieldMeta {
            nested,
            ..FieldMeta::default()
        });
        self
    }

    /// Adds a list of maps merged by `merge_key`.
    #[must_use]
    pub fn merge_list(mut self, name: &str, merge_key: &str, nested: Self) -> Self {
        self.insert(name, FieldMeta {
            strategy: MergeStrategy::Merge,
            merge_key: Some(merge_key.to_string()),
            nested,
        });
        self
    }

    /// Adds a list of primitives merged as a set.
    #[must_use]
    pub fn set_list(mut self, name: &str) -> Self {
        self.insert(name, FieldMeta {
            strategy: MergeStrategy::Merge,
            ..FieldMeta::default()
        });
        self
    }

    /// Marks a field as replaced wholesale.
    #[must_use]
    pub fn replace(mut self, name: &str) -> Self {
        self.insert(name, FieldMeta {
            strategy: MergeStrategy::Replace,
            ..FieldMeta::default()
        });
        self
    }

    /// Adds every field of `other`, overwriting fields present in both.
    #[must_use]
    pub fn merged_with(mut self, other: Self) -> Self {
        self.fields.extend(other.fields);
        self
    }

    /// Inserts or overwrites metadata for a field.
    pub fn insert(&mut self, name: &str, meta: FieldMeta) {
        self.fields.insert(name.to_string(), meta);
    }

    /// Returns the metadata of a field, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.get(name)
    }

    /// Returns the nested metadata of a field, empty when unknown.
    #[must_use]
    pub fn nested(&self, name: &str) -> &Self {
        self.fields.get(name).map_or(&EMPTY, |f| &f.nested)
    }
}

/// Metadata shared by every object's `metadata` field.
#[must_use]
pub fn object_meta() -> PatchMeta {
    PatchMeta::new().field(
        "metadata",
        PatchMeta::new()
            .set_list("finalizers")
            .merge_list("ownerReferences", "uid", PatchMeta::new()),
    )
}
