//! qsql-config — layered configuration loading (ambient stack, SPEC_FULL §3).
//!
//! Grounded on `mqk-config`'s `lib.rs`/`secrets.rs` split: `load_layered_yaml`
//! deep-merges a list of YAML files (later files win) and canonicalizes the
//! result to a stable-key-order JSON string for hashing, exactly as the
//! teacher does; `secrets` resolves runtime secrets from named environment
//! variables rather than scattering `std::env::var` calls through the
//! workspace.

pub mod secrets;
pub mod typed;

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use typed::AppConfig;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&Path]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = std::fs::read_to_string(p)
            .with_context(|| format!("read config: {}", p.display()))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {}", p.display()))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Parses `raw.config_json` into the typed [`AppConfig`], filling in any
/// field absent from the layered YAML with its documented default.
pub fn parse_typed(raw: &LoadedConfig) -> Result<AppConfig> {
    let config: AppConfig =
        serde_json::from_value(raw.config_json.clone()).context("typed config parse failed")?;
    Ok(config)
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn later_layer_overrides_earlier_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_temp(&dir, "base.yaml", "pool:\n  pool_size: 4\n  acquire_timeout_seconds: 5\n");
        let overlay = write_temp(&dir, "overlay.yaml", "pool:\n  pool_size: 8\n");
        let loaded = load_layered_yaml(&[base.as_path(), overlay.as_path()]).unwrap();
        assert_eq!(loaded.config_json["pool"]["pool_size"], 8);
        assert_eq!(loaded.config_json["pool"]["acquire_timeout_seconds"], 5);
    }

    #[test]
    fn canonical_json_has_deterministic_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_temp(&dir, "a.yaml", "z: 1\na: 2\n");
        let loaded = load_layered_yaml(&[f1.as_path()]).unwrap();
        assert_eq!(loaded.canonical_json, r#"{"a":2,"z":1}"#);
    }

    #[test]
    fn same_input_hashes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_temp(&dir, "a.yaml", "roles: []\n");
        let first = load_layered_yaml(&[f1.as_path()]).unwrap();
        let second = load_layered_yaml(&[f1.as_path()]).unwrap();
        assert_eq!(first.config_hash, second.config_hash);
    }

    #[test]
    fn typed_config_fills_in_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_temp(&dir, "a.yaml", "schema_cache_ttl_seconds: 120\n");
        let loaded = load_layered_yaml(&[f1.as_path()]).unwrap();
        let config = parse_typed(&loaded).unwrap();
        assert_eq!(config.schema_cache_ttl_seconds, 120);
        assert!(config.llm.providers.contains(&"mistral".to_string()));
    }
}
