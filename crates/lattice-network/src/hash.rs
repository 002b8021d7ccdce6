//! Deterministic digests of render-relevant configuration
//!
//! The digest is embedded as an annotation on workloads so the apply step
//! triggers a rolling restart exactly when rendered configuration changes.

use aws_lc_rs::digest::{digest, SHA256};
use serde::Serialize;
use serde_json::{Map, Value};

use lattice_common::{Error, Result};

/// Rebuild a JSON value with every object's keys in sorted order
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 of the canonical JSON encoding of `value`, as lowercase hex
pub fn hash_value(value: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(&canonicalize(value))?;
    let hash = digest(&SHA256, &bytes);
    Ok(hash.as_ref().iter().map(|b| format!("{:02x}", b)).collect())
}

/// Digest any serializable configuration
pub fn config_hash<T: Serialize + ?Sized>(config: &T) -> Result<String> {
    let value = serde_json::to_value(config)
        .map_err(|e| Error::serialization(format!("failed to encode config for hashing: {}", e)))?;
    hash_value(&value)
}
