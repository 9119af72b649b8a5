//! Values handling with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self::normalize(value))
    }

    /// An empty YAML document parses to null; treat it as an empty map
    fn normalize(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::new(),
            other => Self(other),
        }
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Merge layers in order, later layers win
    pub fn merge_all<'a>(layers: impl IntoIterator<Item = &'a Values>) -> Self {
        let mut result = Values::new();
        for layer in layers {
            result.merge(layer);
        }
        result
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }
}

impl From<JsonValue> for Values {
    fn from(value: JsonValue) -> Self {
        Self::normalize(value)
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("image.pullPolicy").unwrap(), "Always");
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_arrays_are_replaced() {
        let mut base = Values::from_yaml("ports: [80, 443]").unwrap();
        base.merge(&Values::from_yaml("ports: [8080]").unwrap());
        assert_eq!(base.get("ports").unwrap(), &serde_json::json!([8080]));
    }

    #[test]
    fn test_merge_all_later_layers_win() {
        let defaults = Values::from_yaml("a: 1\nb: 1").unwrap();
        let previous = Values::from_yaml("b: 2\nc: 2").unwrap();
        let overrides = Values::from_yaml("c: 3").unwrap();

        let merged = Values::merge_all([&defaults, &previous, &overrides]);
        assert_eq!(merged.get("a").unwrap(), 1);
        assert_eq!(merged.get("b").unwrap(), 2);
        assert_eq!(merged.get("c").unwrap(), 3);
    }

    #[test]
    fn test_empty_document_is_empty_map() {
        let values = Values::from_yaml("").unwrap();
        assert!(values.is_empty());
        assert!(values.into_inner().is_object());
    }
}
