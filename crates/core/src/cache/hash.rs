//! Content-addressed cache key generation.
//!
//! Key format: `{namespace}:{urlHash[16 hex]}[.{varyHash[12 hex]}]`.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// A parsed cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyParts {
    pub namespace: String,
    pub url_hash: String,
    pub vary_hash: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StableStringifyError {
    #[error("stableStringify: depth exceeds 20")]
    TooDeep,
}

/// Deterministically serialize a JSON value: object keys sorted
/// recursively, depth capped at 20. `serde_json::Value` is a tree, so
/// cycles cannot occur by construction.
pub fn stable_stringify(value: &Value) -> Result<String, StableStringifyError> {
    let mut out = String::new();
    write_stable(value, &mut out, 0)?;
    Ok(out)
}

fn write_stable(value: &Value, out: &mut String, depth: usize) -> Result<(), StableStringifyError> {
    if depth > 20 {
        return Err(StableStringifyError::TooDeep);
    }
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap());
                out.push(':');
                write_stable(&map[*key], out, depth + 1)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out, depth + 1)?;
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
    Ok(())
}

/// Build a cache key in the `{ns}:{urlHash}[.{varyHash}]` form.
pub fn create_cache_key(namespace: &str, normalized_url: &str, vary: Option<&Value>) -> String {
    let url_hash = sha256_hex(normalized_url.as_bytes())[..16].to_string();
    match vary {
        Some(v) => {
            let stable = stable_stringify(v).unwrap_or_default();
            let vary_hash = sha256_hex(stable.as_bytes())[..12].to_string();
            format!("{namespace}:{url_hash}.{vary_hash}")
        }
        None => format!("{namespace}:{url_hash}"),
    }
}

/// Parse a cache key into its `{namespace, urlHash, varyHash?}` parts.
pub fn parse_cache_key(key: &str) -> Option<CacheKeyParts> {
    let (namespace, rest) = key.split_once(':')?;
    let (url_hash, vary_hash) = match rest.split_once('.') {
        Some((u, v)) => (u.to_string(), Some(v.to_string())),
        None => (rest.to_string(), None),
    };
    Some(CacheKeyParts { namespace: namespace.to_string(), url_hash, vary_hash })
}

/// Project a cache key into its MCP resource URI.
pub fn to_resource_uri(key: &str) -> Option<String> {
    let parts = parse_cache_key(key)?;
    let hash_with_vary = match parts.vary_hash {
        Some(v) => format!("{}.{}", parts.url_hash, v),
        None => parts.url_hash,
    };
    Some(format!("superfetch://cache/{}/{}", parts.namespace, hash_with_vary))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
