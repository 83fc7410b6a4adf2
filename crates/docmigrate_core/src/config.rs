use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::non_blank;

pub const DEFAULT_CONFIG_FILE: &str = "docmigrate.toml";
pub const DEFAULT_DATASET: &str = "production";
pub const DEFAULT_API_VERSION: &str = "2025-01-01";
pub const DEFAULT_USER_AGENT: &str = "docmigrate/0.2";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Fatal configuration problems. Raised before any request is sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    Missing { name: &'static str },
    #[error("set one of {names}")]
    MissingOneOf { names: &'static str },
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrateConfig {
    #[serde(default)]
    pub store: StoreSection,
}

/// `[store]` defaults; the matching environment variables win over these.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StoreSection {
    pub project_id: Option<String>,
    pub dataset: Option<String>,
    pub api_version: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl MigrateConfig {
    /// Resolve the project id: env SANITY_PROJECT_ID > config.
    pub fn project_id(&self, env: &EnvVars) -> Result<String, ConfigError> {
        env.value("SANITY_PROJECT_ID")
            .or_else(|| non_blank(self.store.project_id.as_deref()))
            .ok_or(ConfigError::Missing {
                name: "SANITY_PROJECT_ID",
            })
    }

    /// Resolve the dataset: env SANITY_DATASET > config > DEFAULT_DATASET.
    pub fn dataset(&self, env: &EnvVars) -> String {
        env.value("SANITY_DATASET")
            .or_else(|| non_blank(self.store.dataset.as_deref()))
            .unwrap_or_else(|| DEFAULT_DATASET.to_string())
    }

    pub fn api_version(&self, env: &EnvVars) -> String {
        env.value("SANITY_API_VERSION")
            .or_else(|| non_blank(self.store.api_version.as_deref()))
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
    }

    pub fn user_agent(&self, env: &EnvVars) -> String {
        env.value("DOCMIGRATE_USER_AGENT")
            .or_else(|| non_blank(self.store.user_agent.as_deref()))
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn store_timeout_ms(&self, env: &EnvVars) -> Result<u64, ConfigError> {
        env.number(
            "SANITY_HTTP_TIMEOUT_MS",
            self.store.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
        )
    }

    /// Write token from SANITY_WRITE_TOKEN, falling back to SANITY_TOKEN. Never read from the file.
    pub fn write_token(&self, env: &EnvVars) -> Result<String, ConfigError> {
        env.value("SANITY_WRITE_TOKEN")
            .or_else(|| env.value("SANITY_TOKEN"))
            .ok_or(ConfigError::MissingOneOf {
                names: "SANITY_WRITE_TOKEN or SANITY_TOKEN",
            })
    }
}

/// Load and parse a MigrateConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrateConfig> {
    if !config_path.exists() {
        return Ok(MigrateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Environment lookups, either against the process or against a fixed map.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvVars<'a> {
    fixed: Option<&'a BTreeMap<String, String>>,
}

impl<'a> EnvVars<'a> {
    pub fn process() -> Self {
        Self { fixed: None }
    }

    pub fn from_map(vars: &'a BTreeMap<String, String>) -> Self {
        Self { fixed: Some(vars) }
    }

    /// Trimmed value; unset and blank are both `None`.
    pub fn value(&self, key: &str) -> Option<String> {
        let raw = match self.fixed {
            Some(vars) => vars.get(key).cloned(),
            None => env::var(key).ok(),
        };
        non_blank(raw.as_deref())
    }

    pub fn value_or(&self, key: &str, default: &str) -> String {
        self.value(key).unwrap_or_else(|| default.to_string())
    }

    pub fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.value(key).ok_or(ConfigError::Missing { name: key })
    }

    /// On unless the value is literally `false`.
    pub fn enabled(&self, key: &str) -> bool {
        self.value(key).is_none_or(|value| value != "false")
    }

    /// Dry-run unless DRY_RUN=false.
    pub fn dry_run(&self) -> bool {
        self.enabled("DRY_RUN")
    }

    /// Comma-separated list with blanks removed. `None` when unset or empty.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = self
            .value(key)?
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect();
        if items.is_empty() { None } else { Some(items) }
    }

    pub fn list_or(&self, key: &str, default: &[&str]) -> Vec<String> {
        self.list(key)
            .unwrap_or_else(|| default.iter().map(|item| (*item).to_string()).collect())
    }

    pub fn number(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.value(key) {
            None => Ok(default),
            Some(value) => value.parse::<u64>().map_err(|error| ConfigError::Invalid {
                name: key,
                value,
                reason: error.to_string(),
            }),
        }
    }
}
