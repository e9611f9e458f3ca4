//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CourierSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `COURIER_*` environment overrides (highest priority)
//!
//! CLI flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{BusKind, CourierSettings};

/// `~/.courier`, falling back to `/tmp/.courier` without `HOME`.
pub fn courier_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".courier")
}

/// Resolve the path to the settings file (`~/.courier/settings.json`).
pub fn settings_path() -> PathBuf {
    courier_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CourierSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CourierSettings> {
    let defaults = serde_json::to_value(CourierSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CourierSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `COURIER_*` environment overrides.
pub fn apply_env_overrides(settings: &mut CourierSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Numbers must parse and fall within range; invalid values are logged and
/// ignored. `COURIER_INSTANCE_ID` is taken verbatim, so an empty value selects
/// the empty instance id.
pub fn apply_overrides(settings: &mut CourierSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = lookup("COURIER_INSTANCE_ID") {
        settings.instance.id = Some(v);
    }
    if let Some(v) = string("COURIER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = checked(&lookup, "COURIER_PORT", |v| parse_u16_range(v, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = string("COURIER_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = checked(&lookup, "COURIER_BUS", BusKind::parse) {
        settings.bus.kind = v;
    }
    if let Some(v) = string("COURIER_REDIS_URL") {
        settings.bus.redis_url = v;
    }
    if let Some(v) = string("COURIER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = checked(&lookup, "COURIER_QUEUE_CAPACITY", |v| {
        parse_usize_range(v, 1, 1_000_000)
    }) {
        settings.delivery.queue_capacity = v;
    }
    if let Some(v) = checked(&lookup, "COURIER_WRITE_TIMEOUT_MS", |v| {
        parse_u64_range(v, 1, 600_000)
    }) {
        settings.delivery.write_timeout_ms = v;
    }
    if let Some(v) = checked(&lookup, "COURIER_DIRECTORY_TTL_SECS", |v| {
        parse_u64_range(v, 2, 86_400)
    }) {
        settings.directory.entry_ttl_secs = v;
    }
}

fn checked<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.delivery.queue_capacity, 1024);
        assert_eq!(settings.directory.refresh_interval_secs, 60);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"instance": {"id": "node-a"}, "delivery": {"write_timeout_ms": 250}, "bus": {"kind": "redis"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.instance.id.as_deref(), Some("node-a"));
        assert_eq!(settings.delivery.write_timeout_ms, 250);
        assert_eq!(settings.delivery.queue_capacity, 1024);
        assert_eq!(settings.bus.kind, BusKind::Redis);
        assert_eq!(settings.bus.redis_url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn load_unknown_bus_kind_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"bus": {"kind": "kafka"}}"#).unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = CourierSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("COURIER_INSTANCE_ID", "node-b"),
                ("COURIER_PORT", "9001"),
                ("COURIER_BUS", "redis"),
                ("COURIER_REDIS_URL", "redis://cache:6379"),
                ("COURIER_QUEUE_CAPACITY", "64"),
                ("COURIER_WRITE_TIMEOUT_MS", "1500"),
                ("COURIER_DIRECTORY_TTL_SECS", "120"),
                ("COURIER_DB_PATH", ":memory:"),
                ("COURIER_LOG_LEVEL", "debug"),
                ("COURIER_HOST", "127.0.0.1"),
            ]),
        );
        assert_eq!(settings.instance.id.as_deref(), Some("node-b"));
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.bus.kind, BusKind::Redis);
        assert_eq!(settings.bus.redis_url, "redis://cache:6379");
        assert_eq!(settings.delivery.queue_capacity, 64);
        assert_eq!(settings.delivery.write_timeout_ms, 1500);
        assert_eq!(settings.directory.entry_ttl_secs, 120);
        assert!(settings.store.is_in_memory());
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = CourierSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("COURIER_PORT", "99999"),
                ("COURIER_BUS", "kafka"),
                ("COURIER_QUEUE_CAPACITY", "0"),
                ("COURIER_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.bus.kind, BusKind::Local);
        assert_eq!(settings.delivery.queue_capacity, 1024);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn empty_instance_id_override_is_kept() {
        let mut settings = CourierSettings::default();
        apply_overrides(&mut settings, env(&[("COURIER_INSTANCE_ID", "")]));
        assert_eq!(settings.instance.id.as_deref(), Some(""));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1, 10), None);
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
    }
}
