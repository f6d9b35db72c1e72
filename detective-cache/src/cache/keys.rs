//! Deterministic cache keys for model requests
//!
//! A key is the hex digest of a canonical JSON document built from the prompt,
//! the output-relevant model parameters and the caller's context. Object keys
//! are sorted at every depth and parameter floats are rounded to four
//! decimals, so two logically equal requests always share a key. Context
//! values are hashed exactly as given.

use crate::cache::config::{CacheConfig, HashAlgorithm};
use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::collections::BTreeMap;

/// Model parameters that change what the model returns
pub const CACHE_RELEVANT_PARAMS: [&str; 8] = [
    "temperature",
    "max_tokens",
    "top_p",
    "frequency_penalty",
    "presence_penalty",
    "response_format",
    "tools",
    "tool_choice",
];

const FLOAT_SCALE: f64 = 10_000.0;

/// Generates consistent cache keys for AI requests
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    algorithm: HashAlgorithm,
    include_timestamp: bool,
}

impl CacheKeyGenerator {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            algorithm: config.hash_algorithm,
            include_timestamp: config.include_timestamp_in_key,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Key for `(prompt, params, context)`.
    ///
    /// `params` is expected to be a JSON object; anything else contributes no
    /// parameters. A missing context hashes like an empty object.
    pub fn generate_key(&self, prompt: &str, params: &Value, context: Option<&Value>) -> CacheKey {
        self.generate_key_at(prompt, params, context, Utc::now())
    }

    /// Same as [`generate_key`](Self::generate_key) with an explicit clock,
    /// which only matters when timestamps are folded into keys.
    pub fn generate_key_at(
        &self,
        prompt: &str,
        params: &Value,
        context: Option<&Value>,
        now: DateTime<Utc>,
    ) -> CacheKey {
        let payload = canonical_payload(prompt, params, context);
        let hour_bucket = self
            .include_timestamp
            .then(|| now.timestamp().div_euclid(3600).to_string());

        let salt = hour_bucket.as_deref().map(str::as_bytes);
        match self.algorithm {
            HashAlgorithm::Sha224 => digest_hex::<Sha224>(&payload, salt),
            HashAlgorithm::Sha256 => digest_hex::<Sha256>(&payload, salt),
            HashAlgorithm::Sha384 => digest_hex::<Sha384>(&payload, salt),
            HashAlgorithm::Sha512 => digest_hex::<Sha512>(&payload, salt),
        }
    }
}

/// Canonical UTF-8 bytes hashed for a request
pub fn canonical_payload(prompt: &str, params: &Value, context: Option<&Value>) -> Vec<u8> {
    let context = context
        .map(sort_keys)
        .unwrap_or_else(|| Value::Object(Map::new()));

    let mut document = BTreeMap::new();
    document.insert("context".to_string(), context);
    document.insert("params".to_string(), normalize_params(params));
    document.insert("prompt".to_string(), Value::String(prompt.to_string()));

    let document: Map<String, Value> = document.into_iter().collect();
    Value::Object(document).to_string().into_bytes()
}

/// Keep only output-relevant parameters, floats rounded, keys sorted
pub fn normalize_params(params: &Value) -> Value {
    let relevant: BTreeMap<String, Value> = params
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(key, _)| CACHE_RELEVANT_PARAMS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), canonicalize(value)))
                .collect()
        })
        .unwrap_or_default();

    Value::Object(relevant.into_iter().collect())
}

/// Sort object keys at every depth, leaving values untouched
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Sort object keys and round floats at every depth
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .map(|f| (f * FLOAT_SCALE).round() / FLOAT_SCALE)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

fn digest_hex<D: Digest>(payload: &[u8], salt: Option<&[u8]>) -> String {
    let mut hasher = D::new();
    hasher.update(payload);
    if let Some(salt) = salt {
        hasher.update(salt);
    }
    hex::encode(hasher.finalize())
}
