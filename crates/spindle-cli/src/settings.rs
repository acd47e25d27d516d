//! Process settings: optional TOML file, then environment overrides.
//!
//! File: `$SPINDLE_CONFIG`, or `spindle.toml` in the working directory if it
//! exists. Every key is optional and falls back to `Config::default()`.
//!
//! ```toml
//! pool_size = 8
//! max_retries = 3
//! retry_delay_ms = 500
//!
//! [store]
//! kind = "file"
//! path = "data/tasks.json"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use spindle_core::{Config, StoreConfig};

const DEFAULT_FILE: &str = "spindle.toml";

pub fn load() -> Result<Config> {
    let mut config = match config_path() {
        Some(path) => from_file(&path)?,
        None => Config::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SPINDLE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from(DEFAULT_FILE);
    default.exists().then_some(default)
}

fn from_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded configuration file");
    Ok(config)
}

/// Environment overrides. `lookup` is injected so tests do not touch the
/// process environment.
fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(v) = parsed(&lookup, "SPINDLE_POOL_SIZE")? {
        config.pool_size = v;
    }
    if let Some(v) = parsed(&lookup, "SPINDLE_MAX_RETRIES")? {
        config.max_retries = v;
    }
    if let Some(v) = parsed(&lookup, "SPINDLE_RETRY_DELAY_MS")? {
        config.retry_delay_ms = v;
    }
    if let Some(v) = parsed(&lookup, "SPINDLE_EXECUTION_TIMEOUT_MS")? {
        config.execution_timeout_ms = Some(v);
    }
    if let Some(path) = lookup("SPINDLE_STORE_PATH") {
        config.store = StoreConfig::File { path: path.into() };
    }
    Ok(())
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("{key}={raw:?}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config: Config = toml::from_str("pool_size = 8\nmax_retries = 1\n").unwrap();
        apply_env(
            &mut config,
            env(&[
                ("SPINDLE_MAX_RETRIES", "5"),
                ("SPINDLE_EXECUTION_TIMEOUT_MS", "2500"),
                ("SPINDLE_STORE_PATH", "/var/lib/spindle/tasks.json"),
            ]),
        )
        .unwrap();

        assert_eq!(config.pool_size, 8);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.execution_timeout_ms, Some(2_500));
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: "/var/lib/spindle/tasks.json".into()
            }
        );
    }

    #[test]
    fn bad_number_names_the_variable() {
        let mut config = Config::default();
        let err = apply_env(&mut config, env(&[("SPINDLE_POOL_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("SPINDLE_POOL_SIZE"));
    }

    #[test]
    fn oversized_pool_from_env_fails_validation() {
        let mut config = Config::default();
        apply_env(&mut config, env(&[("SPINDLE_POOL_SIZE", "1000000")])).unwrap();
        assert!(matches!(
            config.validate(),
            Err(spindle_core::ConfigError::PoolSizeTooLarge(_))
        ));
    }

    #[test]
    fn toml_store_table() {
        let config: Config = toml::from_str("[store]\nkind = \"file\"\npath = \"data/tasks.json\"\n").unwrap();
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: "data/tasks.json".into()
            }
        );
        assert_eq!(config.pool_size, 50);
    }
}
