use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::settings::Settings;

pub const DEFAULT_CONFIG_FILENAME: &str = "rjq.toml";
pub const ENV_CONFIG_KEY: &str = "RJQ_CONFIG";

/// Resolve which config file to load: explicit path, then `RJQ_CONFIG`,
/// then `rjq.toml` in the working directory.
pub fn resolve_config_source(config_path: Option<&str>) -> (Option<String>, String) {
    if let Some(path) = config_path {
        return (Some(path.to_string()), "--config parameter".to_string());
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_KEY) {
        if !env_path.is_empty() {
            return (Some(env_path), format!("{ENV_CONFIG_KEY} env var"));
        }
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
    if default_path.is_file() {
        return (
            Some(default_path.to_string_lossy().to_string()),
            format!("{DEFAULT_CONFIG_FILENAME} in cwd"),
        );
    }

    (None, "not found".to_string())
}

/// Load settings from TOML, then overlay `RJQ_*` environment variables.
/// A missing config file is not an error: env overrides on top of defaults
/// are enough to run against a local Redis.
pub fn load_settings(config_path: Option<&str>) -> Result<Settings> {
    dotenvy::dotenv().ok();

    let (path, _) = resolve_config_source(config_path);
    let base = match path {
        Some(path) => {
            let payload = std::fs::read_to_string(&path)
                .map_err(|err| Error::Config(format!("failed to read config at {path}: {err}")))?;
            let toml_value: toml::Value = toml::from_str(&payload)
                .map_err(|err| Error::Config(format!("failed to parse TOML at {path}: {err}")))?;
            let json_value = serde_json::to_value(toml_value)
                .map_err(|err| Error::Config(format!("failed to convert TOML: {err}")))?;
            normalize_toml_payload(json_value)?
        }
        None => serde_json::to_value(Settings::default())?,
    };

    let merged = deep_merge(base, env_overrides()?);
    let settings: Settings = serde_json::from_value(merged)
        .map_err(|err| Error::Config(format!("invalid rjq config: {err}")))?;
    Ok(settings)
}

fn normalize_toml_payload(mut payload: Value) -> Result<Value> {
    if let Value::Object(mut map) = payload {
        if let Some(rjq_value) = map.remove("rjq") {
            payload = rjq_value;
        } else {
            payload = Value::Object(map);
        }
    }

    match payload {
        Value::Object(map) => Ok(Value::Object(map)),
        _ => Err(Error::Config("rjq config must be a TOML table".to_string())),
    }
}

fn env_overrides() -> Result<Value> {
    let mut payload = Map::new();

    set_env_string(&mut payload, "redis_dsn", "RJQ_REDIS_DSN");
    set_env_string(&mut payload, "namespace", "RJQ_NAMESPACE");
    set_env_string(&mut payload, "log_level", "RJQ_LOG_LEVEL");
    set_env_list(&mut payload, "queues", "RJQ_QUEUES");
    set_env_float(
        &mut payload,
        "poll_interval_seconds",
        "RJQ_POLL_INTERVAL_SECONDS",
    )?;
    set_env_int(&mut payload, "status_ttl_seconds", "RJQ_STATUS_TTL_SECONDS")?;
    set_env_float(
        &mut payload,
        "shutdown_grace_period_seconds",
        "RJQ_SHUTDOWN_GRACE_PERIOD_SECONDS",
    )?;

    Ok(Value::Object(payload))
}

fn set_env_string(map: &mut Map<String, Value>, key: &str, env: &str) {
    if let Ok(value) = std::env::var(env) {
        if !value.is_empty() {
            map.insert(key.to_string(), Value::String(value));
        }
    }
}

/// Comma-separated list, e.g. `RJQ_QUEUES=high,medium,low`.
fn set_env_list(map: &mut Map<String, Value>, key: &str, env: &str) {
    if let Ok(value) = std::env::var(env) {
        if value.is_empty() {
            return;
        }
        let entries: Vec<Value> = value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| Value::String(entry.to_string()))
            .collect();
        if !entries.is_empty() {
            map.insert(key.to_string(), Value::Array(entries));
        }
    }
}

fn set_env_int(map: &mut Map<String, Value>, key: &str, env: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env) {
        if value.is_empty() {
            return Ok(());
        }
        let parsed: i64 = value
            .parse()
            .map_err(|_| Error::Config(format!("invalid {env} value: {value}")))?;
        map.insert(key.to_string(), Value::Number(parsed.into()));
    }
    Ok(())
}

fn set_env_float(map: &mut Map<String, Value>, key: &str, env: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env) {
        if value.is_empty() {
            return Ok(());
        }
        let parsed: f64 = value
            .parse()
            .map_err(|_| Error::Config(format!("invalid {env} value: {value}")))?;
        let number = serde_json::Number::from_f64(parsed)
            .ok_or_else(|| Error::Config(format!("invalid {env} value: {value}")))?;
        map.insert(key.to_string(), Value::Number(number));
    }
    Ok(())
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay_value) => overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LogLevel;
    use std::fs;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use uuid::Uuid;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        _lock: MutexGuard<'static, ()>,
        prev: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn set_many(pairs: &[(&'static str, &str)]) -> Self {
            let lock = env_lock().lock().unwrap();
            let mut prev = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                prev.push((*key, std::env::var(key).ok()));
                std::env::set_var(key, value);
            }
            Self { _lock: lock, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, prev) in self.prev.drain(..) {
                match prev {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn resolve_config_source_prefers_explicit_path() {
        let (path, source) = resolve_config_source(Some("custom.toml"));
        assert_eq!(path, Some("custom.toml".to_string()));
        assert!(source.contains("--config"));
    }

    #[test]
    fn load_settings_merges_env_over_toml() {
        let tmp_path = std::env::temp_dir().join(format!("rjq-test-{}.toml", Uuid::new_v4()));
        let payload = r#"
[rjq]
namespace = "from_toml"
queues = ["alpha"]
"#;
        fs::write(&tmp_path, payload).unwrap();
        let _guard = EnvGuard::set_many(&[
            ("RJQ_NAMESPACE", "from_env"),
            ("RJQ_QUEUES", "high, medium,low"),
            ("RJQ_LOG_LEVEL", "verbose"),
        ]);
        let settings = load_settings(Some(tmp_path.to_str().unwrap())).unwrap();
        assert_eq!(settings.namespace, "from_env");
        assert_eq!(
            settings.queues,
            vec!["high".to_string(), "medium".to_string(), "low".to_string()]
        );
        assert_eq!(settings.log_level, LogLevel::Verbose);
        let _ = fs::remove_file(&tmp_path);
    }

    #[test]
    fn load_settings_without_file_uses_defaults() {
        let _guard = EnvGuard::set_many(&[("RJQ_CONFIG", ""), ("RJQ_STATUS_TTL_SECONDS", "120")]);
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.status_ttl_seconds, 120);
        assert_eq!(settings.namespace, "rjq");
    }

    #[test]
    fn load_settings_rejects_bad_numbers() {
        let _guard = EnvGuard::set_many(&[
            ("RJQ_CONFIG", ""),
            ("RJQ_STATUS_TTL_SECONDS", "not-a-number"),
        ]);
        let err = load_settings(None).unwrap_err();
        assert!(err.to_string().contains("RJQ_STATUS_TTL_SECONDS"));
    }
}
