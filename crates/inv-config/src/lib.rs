//! Layered configuration loading: base YAML + optional environment overlay
//! + `INV_*` environment variable overrides for secrets and deployment
//! values. Environment always wins over file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Per-provider rate limit knobs (spec `RATE_LIMIT_CAPACITY[provider]` /
/// `RATE_LIMIT_WINDOW_MS[provider]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: i32,
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            window_ms: 60_000,
        }
    }
}

/// Provider credentials loaded from environment/secret files only. Never
/// part of the YAML config tree, never included in the canonical hash, and
/// `Debug` is hand-rolled to redact the secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub api_secret: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Immutable, fully-resolved process configuration. Constructed once at
/// startup and threaded explicitly from there — no global mutable state.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub outbox_batch_size: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub stale_threshold_days: i64,
    pub webhook_payload_max_bytes: usize,
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    #[serde(default)]
    pub provider_credentials: BTreeMap<String, ProviderCredentials>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("outbox_batch_size", &self.outbox_batch_size)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_cap_ms", &self.backoff_cap_ms)
            .field("stale_threshold_days", &self.stale_threshold_days)
            .field("webhook_payload_max_bytes", &self.webhook_payload_max_bytes)
            .field("rate_limits", &self.rate_limits)
            .field("provider_credentials", &"<redacted>")
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut rate_limits = BTreeMap::new();
        rate_limits.insert("a".to_string(), RateLimitConfig::default());
        rate_limits.insert("b".to_string(), RateLimitConfig::default());
        Self {
            database_url: String::new(),
            outbox_batch_size: 100,
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 300_000,
            stale_threshold_days: 30,
            webhook_payload_max_bytes: 1024,
            rate_limits,
            provider_credentials: BTreeMap::new(),
        }
    }
}

/// Result of loading the non-secret YAML layers: the merged tree, its
/// canonical (sorted-key) form, and a sha256 hash of that canonical form —
/// used purely for startup log correlation, never for authorization.
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Merge each path's YAML document onto the previous one, later files win.
/// Missing files are skipped (not an error) so an optional per-environment
/// overlay can simply not exist.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for path in paths {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("reading config file {path}")),
        };
        let doc: Value = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {path} as YAML"))?;
        deep_merge(&mut merged, doc);
    }
    let canonical = sort_keys(&merged);
    let canonical_json = serde_json::to_string(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    let config_hash = hex::encode(hasher.finalize());
    Ok(LoadedConfig {
        config_json: merged,
        canonical_json,
        config_hash,
    })
}

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
        (dst_slot, src_value) => {
            *dst_slot = src_value;
        }
    }
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), sort_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Overlay `INV_*` environment variables onto an already-loaded `Config`.
/// Environment always wins — this is applied after the YAML layers, not
/// merged into the hashed canonical tree.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("INV_DATABASE_URL") {
        config.database_url = v;
    }
    if let Ok(v) = std::env::var("INV_OUTBOX_BATCH_SIZE") {
        if let Ok(n) = v.parse() {
            config.outbox_batch_size = n;
        }
    }
    if let Ok(v) = std::env::var("INV_MAX_ATTEMPTS") {
        if let Ok(n) = v.parse() {
            config.max_attempts = n;
        }
    }
    if let Ok(v) = std::env::var("INV_BACKOFF_BASE_MS") {
        if let Ok(n) = v.parse() {
            config.backoff_base_ms = n;
        }
    }
    if let Ok(v) = std::env::var("INV_BACKOFF_CAP_MS") {
        if let Ok(n) = v.parse() {
            config.backoff_cap_ms = n;
        }
    }
    if let Ok(v) = std::env::var("INV_STALE_THRESHOLD_DAYS") {
        if let Ok(n) = v.parse() {
            config.stale_threshold_days = n;
        }
    }
    if let Ok(v) = std::env::var("INV_WEBHOOK_PAYLOAD_MAX") {
        if let Ok(n) = v.parse() {
            config.webhook_payload_max_bytes = n;
        }
    }
    for provider in ["a", "b"] {
        let prefix = format!("INV_PROVIDER_{}", provider.to_uppercase());
        if let Ok(key) = std::env::var(format!("{prefix}_API_KEY")) {
            let secret = std::env::var(format!("{prefix}_API_SECRET")).ok();
            config.provider_credentials.insert(
                provider.to_string(),
                ProviderCredentials {
                    api_key: key,
                    api_secret: secret,
                },
            );
        }
    }
}

/// Load the full process config: base YAML + optional overlay paths, then
/// `INV_*` environment overrides. Returns the config plus the hash of its
/// non-secret canonical YAML tree for startup log correlation.
pub fn load(yaml_paths: &[&str]) -> Result<(Config, String)> {
    let loaded = load_layered_yaml(yaml_paths)?;
    let mut config: Config = if loaded.config_json.is_object()
        && !loaded.config_json.as_object().unwrap().is_empty()
    {
        serde_json::from_value(loaded.config_json.clone())
            .context("deserializing merged config YAML into Config")?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut config);
    Ok((config, loaded.config_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn deep_merge_prefers_later_layer() {
        let mut base = serde_json::json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let overlay = serde_json::json!({"a": 2, "nested": {"y": 3}});
        deep_merge(&mut base, overlay);
        assert_eq!(base["a"], 2);
        assert_eq!(base["nested"]["x"], 1);
        assert_eq!(base["nested"]["y"], 3);
    }

    #[test]
    fn sort_keys_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            serde_json::to_string(&sort_keys(&a)).unwrap(),
            serde_json::to_string(&sort_keys(&b)).unwrap()
        );
    }

    #[test]
    fn missing_overlay_file_is_skipped_not_an_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "outbox_batch_size: 42").unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        let loaded = load_layered_yaml(&[&path, "/nonexistent/path/overlay.yaml"]).unwrap();
        assert_eq!(loaded.config_json["outbox_batch_size"], 42);
    }

    #[test]
    fn env_override_wins_over_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "max_attempts: 3").unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        std::env::set_var("INV_MAX_ATTEMPTS", "9");
        let (config, _hash) = load(&[&path]).unwrap();
        assert_eq!(config.max_attempts, 9);
        std::env::remove_var("INV_MAX_ATTEMPTS");
    }

    #[test]
    fn credentials_are_redacted_in_debug_output() {
        let creds = ProviderCredentials {
            api_key: "super-secret".to_string(),
            api_secret: Some("also-secret".to_string()),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("also-secret"));
    }
}
