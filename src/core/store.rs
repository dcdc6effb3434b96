//! SF-002: Parameter store — value channel plus metadata channel.
//!
//! A definition writes defaults with `@params['ram'] = 15` and annotations
//! with `@params['ram', 'description'] = 'GB'`. Both address the same
//! parameter name but live in separate maps, so neither write can clobber
//! the other.

use super::value::Value;
use indexmap::IndexMap;
use std::borrow::Cow;

/// Per-parameter annotations (meta key → text).
pub type Metadata = IndexMap<String, String>;

/// Parameter defaults and their metadata, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    values: IndexMap<String, Value>,
    metadata: IndexMap<String, Metadata>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the value for `key`.
    ///
    /// The first write fixes the key's position in [`keys`](Self::keys).
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        // IndexMap::insert keeps the existing slot on overwrite
        self.values.insert(key.into(), value);
    }

    /// Create or overwrite one metadata entry for `key`.
    pub fn set_metadata(
        &mut self,
        key: impl Into<String>,
        meta_key: impl Into<String>,
        meta_value: impl Into<String>,
    ) {
        self.metadata
            .entry(key.into())
            .or_default()
            .insert(meta_key.into(), meta_value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// All metadata recorded for `key`; empty when there is none.
    pub fn metadata_for(&self, key: &str) -> Cow<'_, Metadata> {
        match self.metadata.get(key) {
            Some(meta) => Cow::Borrowed(meta),
            None => Cow::Owned(Metadata::new()),
        }
    }

    /// A single metadata entry.
    pub fn metadata(&self, key: &str, meta_key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|meta| meta.get(meta_key))
            .map(String::as_str)
    }

    /// Parameter names with a value, in first-write order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
