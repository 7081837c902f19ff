use std::path::PathBuf;

use anyhow::Result;

pub const DB_ENV: &str = "ACTA_DB";
pub const LOG_ENV: &str = "ACTA_LOG";
pub const DEFAULT_LOG_FILTER: &str = "acta=info,sqlx=warn";
const APP_DIR: &str = "acta";
const DB_FILE: &str = "acta.sqlite3";

/// Runtime settings resolved from CLI flags, then environment, then defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_filter: String,
}

impl AppConfig {
    pub fn resolve(db_flag: Option<PathBuf>) -> Result<Self> {
        Self::resolve_with(db_flag, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::resolve`] with an explicit environment lookup.
    pub fn resolve_with<F>(db_flag: Option<PathBuf>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let db_path = match db_flag {
            Some(path) => path,
            None => match non_empty(DB_ENV) {
                Some(path) => PathBuf::from(path),
                None => default_db_path()?,
            },
        };
        let log_filter = non_empty(LOG_ENV)
            .or_else(|| non_empty("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            db_path,
            log_filter,
        })
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().unwrap_or(std::env::current_dir()?);
    Ok(base.join(APP_DIR).join(DB_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn flag_beats_environment() {
        let cfg = AppConfig::resolve_with(
            Some(PathBuf::from("/tmp/flag.sqlite3")),
            env_of(&[(DB_ENV, "/tmp/env.sqlite3")]),
        )
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/flag.sqlite3"));
    }

    #[test]
    fn environment_beats_default() {
        let cfg = AppConfig::resolve_with(None, env_of(&[(DB_ENV, "/tmp/env.sqlite3")])).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/env.sqlite3"));
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn log_filter_prefers_app_variable() {
        let cfg = AppConfig::resolve_with(
            None,
            env_of(&[(LOG_ENV, "acta=debug"), ("RUST_LOG", "warn")]),
        )
        .unwrap();
        assert_eq!(cfg.log_filter, "acta=debug");

        let cfg = AppConfig::resolve_with(None, env_of(&[("RUST_LOG", "warn")])).unwrap();
        assert_eq!(cfg.log_filter, "warn");
    }

    #[test]
    fn default_path_ends_with_app_file() {
        let cfg = AppConfig::resolve_with(None, env_of(&[])).unwrap();
        assert!(cfg.db_path.ends_with("acta/acta.sqlite3"));
    }
}
