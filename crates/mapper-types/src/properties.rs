use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::value::ScalarValue;

/// Well-known property keys synced over the bus. Everything else falls
/// through to the string-keyed overflow map — this is the rewrite of the
/// source's key-indexed `map<(prop_id|string), typed_value>` property bag
/// (see REDESIGN FLAGS): a closed enum for the keys every peer must
/// understand, plus an open string map for out-of-band metadata such as
/// units, min/max, or embedder-defined tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKey {
    Unit,
    Min,
    Max,
    Ephemeral,
    Version,
    Port,
    Host,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Scalar(ScalarValue),
    Text(String),
    Bool(bool),
}

/// A property bag with well-known keys plus a string-keyed overflow, and a
/// `dirty` bit set whenever a value actually changes — the device pipeline
/// (`mapper-device`) checks this bit to decide whether a `/device` state
/// update is owed to subscribers this poll (§4.F step 6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Properties {
    known: HashMap<PropertyKey, PropertyValue>,
    overflow: HashMap<String, PropertyValue>,
    #[serde(skip)]
    dirty: bool,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: PropertyKey, value: PropertyValue) {
        if self.known.get(&key) != Some(&value) {
            self.known.insert(key, value);
            self.dirty = true;
        }
    }

    pub fn get(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.known.get(&key)
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: PropertyValue) {
        let key = key.into();
        if self.overflow.get(&key) != Some(&value) {
            self.overflow.insert(key, value);
            self.dirty = true;
        }
    }

    pub fn get_extra(&self, key: &str) -> Option<&PropertyValue> {
        self.overflow.get(key)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_same_value_does_not_dirty() {
        let mut p = Properties::new();
        p.set(PropertyKey::Port, PropertyValue::Scalar(ScalarValue::I32(9000)));
        p.clear_dirty();
        p.set(PropertyKey::Port, PropertyValue::Scalar(ScalarValue::I32(9000)));
        assert!(!p.is_dirty());
    }

    #[test]
    fn setting_new_value_dirties() {
        let mut p = Properties::new();
        p.clear_dirty();
        p.set_extra("color", PropertyValue::Text("red".into()));
        assert!(p.is_dirty());
        assert_eq!(p.get_extra("color"), Some(&PropertyValue::Text("red".into())));
    }
}
