//! Open key-value fields attached to context records.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExtensionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ExtensionValue>),
    Map(ExtensionMap),
}

impl From<bool> for ExtensionValue {
    fn from(value: bool) -> Self {
        ExtensionValue::Bool(value)
    }
}

impl From<i64> for ExtensionValue {
    fn from(value: i64) -> Self {
        ExtensionValue::Int(value)
    }
}

impl From<i32> for ExtensionValue {
    fn from(value: i32) -> Self {
        ExtensionValue::Int(value.into())
    }
}

impl From<f64> for ExtensionValue {
    fn from(value: f64) -> Self {
        ExtensionValue::Float(value)
    }
}

impl From<String> for ExtensionValue {
    fn from(value: String) -> Self {
        ExtensionValue::Text(value)
    }
}

impl From<&str> for ExtensionValue {
    fn from(value: &str) -> Self {
        ExtensionValue::Text(value.to_string())
    }
}

impl<T: Into<ExtensionValue>> From<Vec<T>> for ExtensionValue {
    fn from(value: Vec<T>) -> Self {
        ExtensionValue::List(value.into_iter().map(Into::into).collect())
    }
}

impl From<ExtensionMap> for ExtensionValue {
    fn from(value: ExtensionMap) -> Self {
        ExtensionValue::Map(value)
    }
}

/// Fields any caller may attach to a record, kept in key order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionMap(BTreeMap<String, ExtensionValue>);

impl ExtensionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous value under `key`.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ExtensionValue>,
    ) -> Option<ExtensionValue> {
        self.0.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ExtensionValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<ExtensionValue> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ExtensionValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            ExtensionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            ExtensionValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers are widened.
    #[must_use]
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            ExtensionValue::Float(f) => Some(*f),
            ExtensionValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            ExtensionValue::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_list(&self, key: &str) -> Option<&[ExtensionValue]> {
        match self.get(key)? {
            ExtensionValue::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_map(&self, key: &str) -> Option<&ExtensionMap> {
        match self.get(key)? {
            ExtensionValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtensionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let map = ExtensionMap::new()
            .with("implanted", true)
            .with("tetrodes", 16)
            .with("weight_g", 412.5)
            .with("surgeon", "AWL")
            .with("bad_channels", vec![3, 17]);
        assert_eq!(map.get_bool("implanted"), Some(true));
        assert_eq!(map.get_int("tetrodes"), Some(16));
        assert_eq!(map.get_float("tetrodes"), Some(16.0));
        assert_eq!(map.get_float("weight_g"), Some(412.5));
        assert_eq!(map.get_text("surgeon"), Some("AWL"));
        assert_eq!(
            map.get_list("bad_channels"),
            Some(&[ExtensionValue::Int(3), ExtensionValue::Int(17)][..])
        );
        // wrong type or missing key
        assert_eq!(map.get_int("surgeon"), None);
        assert_eq!(map.get_bool("missing"), None);
    }

    #[test]
    fn nested_maps_survive_ron() {
        let mut map = ExtensionMap::new();
        map.insert("probe", ExtensionMap::new().with("model", "H6").with("depth_um", 1200));
        let encoded = ron::ser::to_string(&map).unwrap();
        let decoded: ExtensionMap = ron::de::from_str(&encoded).unwrap();
        assert_eq!(decoded, map);
        assert_eq!(
            decoded.get_map("probe").and_then(|p| p.get_int("depth_um")),
            Some(1200)
        );
    }

    #[test]
    fn insert_replaces() {
        let mut map = ExtensionMap::new();
        assert_eq!(map.insert("k", 1), None);
        assert_eq!(map.insert("k", "v"), Some(ExtensionValue::Int(1)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove("k"), Some(ExtensionValue::Text("v".to_string())));
        assert!(map.is_empty());
    }
}
