//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ChatSettings::default()`]
//! 2. If `~/.wlmai/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `WLMAI_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use wlmai_core::BackoffStrategy;

use crate::errors::Result;
use crate::types::ChatSettings;

/// Resolve the path to the settings file (`~/.wlmai/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wlmai").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the file
/// contains invalid JSON or the result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChatSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<ChatSettings> {
    let defaults = serde_json::to_value(ChatSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ChatSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides using the process environment.
pub fn apply_env_overrides(settings: &mut ChatSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid values are ignored with a warning (file/default value stays).
pub fn apply_overrides(settings: &mut ChatSettings, env: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| env(name).filter(|v| !v.is_empty());

    // ── API ─────────────────────────────────────────────────────────
    if let Some(v) = read("WLMAI_HOST") {
        settings.api.host = v;
    }
    if let Some(v) = read("WLMAI_BASE_PATH") {
        settings.api.base_path = v;
    }

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = checked("WLMAI_RETRY_ATTEMPTS", read("WLMAI_RETRY_ATTEMPTS"), |s| {
        parse_u32_range(s, 1, 50)
    }) {
        settings.connection.retry.max_attempts = v;
    }
    if let Some(v) = checked("WLMAI_RETRY_DELAY_MS", read("WLMAI_RETRY_DELAY_MS"), |s| {
        parse_u64_range(s, 0, 600_000)
    }) {
        settings.connection.retry.base_delay_ms = v;
    }
    if let Some(v) = checked("WLMAI_BACKOFF", read("WLMAI_BACKOFF"), parse_backoff) {
        settings.connection.retry.strategy = v;
    }
    if let Some(v) = checked(
        "WLMAI_READY_POLL_INTERVAL_MS",
        read("WLMAI_READY_POLL_INTERVAL_MS"),
        |s| parse_u64_range(s, 1, 60_000),
    ) {
        settings.connection.ready_poll_interval_ms = v;
    }
    if let Some(v) = checked(
        "WLMAI_READY_POLL_ATTEMPTS",
        read("WLMAI_READY_POLL_ATTEMPTS"),
        |s| parse_u32_range(s, 1, 10_000),
    ) {
        settings.connection.ready_poll_attempts = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("WLMAI_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn checked<T>(key: &str, raw: Option<String>, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = raw?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env override, ignoring");
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a backoff strategy name (case-insensitive).
pub fn parse_backoff(val: &str) -> Option<BackoffStrategy> {
    match val.trim().to_lowercase().as_str() {
        "fixed" => Some(BackoffStrategy::Fixed),
        "exponential" | "exp" => Some(BackoffStrategy::Exponential),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"api": {"host": "a", "basePath": "wlmai"}});
        let source = serde_json::json!({"api": {"host": "b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["api"]["host"], "b");
        assert_eq!(merged["api"]["basePath"], "wlmai");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── load ────────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_with_env(path, no_env).unwrap();
        assert_eq!(settings, ChatSettings::default());
    }

    #[test]
    fn load_partial_file_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"connection": {"retry": {"strategy": "exponential", "jitterFactor": 0.2}}}"#,
        )
        .unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.connection.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(settings.connection.retry.max_attempts, 5);
        assert_eq!(settings.api.host, "api.workloads.netapp.com");
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_zero_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"retry": {"maxAttempts": 0}}}"#).unwrap();
        let err = load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WLMAI_HOST", "localhost:9000"),
            ("WLMAI_RETRY_ATTEMPTS", "3"),
            ("WLMAI_RETRY_DELAY_MS", "250"),
            ("WLMAI_BACKOFF", "Exponential"),
            ("WLMAI_READY_POLL_ATTEMPTS", "5"),
            ("WLMAI_LOG_LEVEL", "debug"),
        ]);
        let mut settings = ChatSettings::default();
        apply_overrides(&mut settings, |k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(settings.api.host, "localhost:9000");
        assert_eq!(settings.connection.retry.max_attempts, 3);
        assert_eq!(settings.connection.retry.base_delay_ms, 250);
        assert_eq!(settings.connection.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(settings.connection.ready_poll_attempts, 5);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WLMAI_RETRY_ATTEMPTS", "0"),
            ("WLMAI_BACKOFF", "sometimes"),
            ("WLMAI_READY_POLL_INTERVAL_MS", "abc"),
            ("WLMAI_HOST", ""),
        ]);
        let mut settings = ChatSettings::default();
        apply_overrides(&mut settings, |k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(settings, ChatSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u32_range("5", 1, 50), Some(5));
        assert_eq!(parse_u32_range("51", 1, 50), None);
        assert_eq!(parse_u64_range(" 100 ", 0, 1000), Some(100));
        assert_eq!(parse_u64_range("-1", 0, 1000), None);
    }

    #[test]
    fn parse_backoff_names() {
        assert_eq!(parse_backoff("FIXED"), Some(BackoffStrategy::Fixed));
        assert_eq!(parse_backoff("exp"), Some(BackoffStrategy::Exponential));
        assert_eq!(parse_backoff("linear"), None);
    }
}
