//! Request fingerprints.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Stable hash of a request's semantic content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash `model`, the normalized `payload` and the sorted `metadata`.
    ///
    /// JSON payloads are normalized (sorted keys, no insignificant
    /// whitespace) so that equivalent documents share a fingerprint; any
    /// other payload is hashed as raw bytes.
    pub fn compute(model: &str, payload: &[u8], metadata: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, model.as_bytes());

        match normalize_json(payload) {
            Some(normalized) => {
                hasher.update(b"j");
                update_field(&mut hasher, &normalized);
            }
            None => {
                hasher.update(b"b");
                update_field(&mut hasher, payload);
            }
        }

        hasher.update((metadata.len() as u64).to_le_bytes());
        for (key, value) in metadata {
            update_field(&mut hasher, key.as_bytes());
            update_field(&mut hasher, value.as_bytes());
        }

        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Length-prefixed so that field boundaries cannot shift.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn normalize_json(payload: &[u8]) -> Option<Vec<u8>> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    serde_json::to_vec(&sorted(value)).ok()
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(key, sorted(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}
