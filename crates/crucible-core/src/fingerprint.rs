//! CollectionFingerprint computation: a deterministic hash over the inputs
//! that key the Result Cache. Keys the cache — any change to these inputs
//! produces a different fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Components hashed into a [`CollectionFingerprint`]. Held separately from
/// `TestSpec` so callers can supply the recipe file's content hash without
/// re-reading it from disk on every comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintInputs {
    pub spec_name: String,
    pub recipe_path: String,
    pub recipe_content_hash: String,
    pub node_attributes: serde_json::Value,
    pub environment_descriptor: serde_json::Value,
    pub validator_configs: serde_json::Value,
}

/// A stable hex-encoded SHA-256 digest over [`FingerprintInputs`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionFingerprint(pub String);

impl CollectionFingerprint {
    /// Compute the fingerprint from canonical (key-sorted) JSON so that
    /// field ordering never affects the hash.
    pub fn compute(inputs: &FingerprintInputs) -> Result<Self> {
        let json = serde_json::to_value(inputs)
            .map_err(|e| crate::error::CrucibleError::configuration(e.to_string()))?;
        let canonical = canonical_json_string(&json)
            .map_err(|e| crate::error::CrucibleError::configuration(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(CollectionFingerprint(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn canonical_json_string(value: &serde_json::Value) -> serde_json::Result<String> {
    let canonical = sort_json_keys(value);
    serde_json::to_string(&canonical)
}

/// Recursively sort JSON object keys so serialization is deterministic
/// regardless of the source struct's field order or a map's insertion order.
fn sort_json_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_json_keys(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_json_keys).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(recipe_hash: &str) -> FingerprintInputs {
        FingerprintInputs {
            spec_name: "pkg_test".to_string(),
            recipe_path: "recipes/default.rb".to_string(),
            recipe_content_hash: recipe_hash.to_string(),
            node_attributes: serde_json::json!({"b": 1, "a": 2}),
            environment_descriptor: serde_json::json!({"distribution": "ubuntu"}),
            validator_configs: serde_json::json!([{"type": "package"}]),
        }
    }

    #[test]
    fn same_inputs_produce_same_fingerprint() {
        let f1 = CollectionFingerprint::compute(&inputs("aaa")).unwrap();
        let f2 = CollectionFingerprint::compute(&inputs("aaa")).unwrap();
        assert_eq!(f1, f2);
    }

    #[test]
    fn changed_recipe_hash_changes_fingerprint() {
        let f1 = CollectionFingerprint::compute(&inputs("aaa")).unwrap();
        let f2 = CollectionFingerprint::compute(&inputs("bbb")).unwrap();
        assert_ne!(f1, f2);
    }

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let mut a = inputs("aaa");
        a.node_attributes = serde_json::json!({"a": 2, "b": 1});
        let mut b = inputs("aaa");
        b.node_attributes = serde_json::json!({"b": 1, "a": 2});
        let fa = CollectionFingerprint::compute(&a).unwrap();
        let fb = CollectionFingerprint::compute(&b).unwrap();
        assert_eq!(fa, fb);
    }

    #[test]
    fn fingerprint_is_64_char_hex() {
        let f = CollectionFingerprint::compute(&inputs("aaa")).unwrap();
        assert_eq!(f.as_str().len(), 64);
        assert!(f.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
