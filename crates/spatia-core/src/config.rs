use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatiaError};

/// Top-level spatia configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Which storage backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file for the sqlite backend.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> String { "~/.spatia/graph.db".to_string() }

/// Walker and response policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Include walker return values in responses (default: false).
    #[serde(default)]
    pub show_returns: bool,
    /// Wall-clock budget per walker run in milliseconds (0 = unlimited).
    #[serde(default)]
    pub walker_timeout_ms: u64,
    /// Maximum dequeues per walker run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_returns: false,
            walker_timeout_ms: 0,
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize { 10_000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "spatia=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SpatiaError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| SpatiaError::Config(e.to_string()))
    }

    /// Resolve the storage path (expand ~).
    pub fn storage_path(&self) -> PathBuf {
        let path = &self.storage.path;
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables are left as written
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_SPATIA_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_SPATIA_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_SPATIA_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_SPATIA_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_SPATIA_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(!config.runtime.show_returns);
        assert_eq!(config.runtime.walker_timeout_ms, 0);
        assert_eq!(config.runtime.max_steps, 10_000);
        assert_eq!(config.log.filter, "spatia=info,warn");
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::parse(
            r#"
[storage]
backend = "memory"

[runtime]
show_returns = true
"#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.path, "~/.spatia/graph.db");
        assert!(config.runtime.show_returns);
        assert_eq!(config.runtime.max_steps, 10_000);
    }

    #[test]
    fn test_invalid_backend() {
        let err = AppConfig::parse("[storage]\nbackend = \"mongo\"").unwrap_err();
        assert!(matches!(err, SpatiaError::Config(_)));
    }

    #[test]
    fn test_storage_path_absolute() {
        let mut config = AppConfig::default();
        config.storage.path = "/var/lib/spatia/graph.db".into();
        assert_eq!(config.storage_path(), PathBuf::from("/var/lib/spatia/graph.db"));
    }
}
