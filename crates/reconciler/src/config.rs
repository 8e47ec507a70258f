//! Controller configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file) yields a working controller. The binary layers CLI flags
//! on top before calling [`ControllerConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use catsrc_registry::RegistryConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Parent directory for registry client working directories.
    pub cache_dir: PathBuf,
    /// Upper bound on concurrent reconciles per kind.
    pub max_concurrent_reconciles: usize,
    pub backoff: BackoffConfig,
    pub freshness: FreshnessConfig,
    pub properties: PropertiesConfig,
    pub registry: RegistrySettings,
}

/// Retry delays for failed keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FreshnessConfig {
    pub refresh: RefreshMode,
    pub status_errors: StatusErrorPolicy,
}

/// How an existing `CacheUpdatedAt` condition is treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Move the timestamp forward on every reconcile.
    #[default]
    InPlace,
    /// Stamp an empty condition list once and never touch it again.
    StampOnce,
}

/// What happens when a status update fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusErrorPolicy {
    /// Return the error so the key is retried.
    #[default]
    Surface,
    /// Log and report success.
    Discard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PropertiesConfig {
    pub on_error: PropertyErrorPolicy,
}

/// What happens when a bundle's properties do not parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertyErrorPolicy {
    /// Keep the operator with no APIs.
    #[default]
    Degrade,
    /// Fail the reconcile.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// Registries reached over plain HTTP.
    pub insecure: Vec<String>,
    /// Image label naming the declarative config directory.
    pub configs_dir_label: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            cache_dir: std::env::temp_dir().join("catsrc"),
            max_concurrent_reconciles: 4,
            backoff: BackoffConfig::default(),
            freshness: FreshnessConfig::default(),
            properties: PropertiesConfig::default(),
            registry: RegistrySettings::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 300_000,
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            insecure: Vec::new(),
            configs_dir_label: catsrc_registry::client::CONFIGS_DIR_LABEL.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING AND VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

impl ControllerConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for malformed TOML, unknown keys or
    /// values that fail [`ControllerConfig::validate`].
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid_config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::invalid_config(format!("{}: {e}", path.display())))
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::invalid_config(
                "max_concurrent_reconciles must be greater than 0",
            ));
        }
        if self.backoff.initial_ms == 0 {
            return Err(Error::invalid_config("backoff.initial_ms must be greater than 0"));
        }
        if self.backoff.initial_ms > self.backoff.max_ms {
            return Err(Error::invalid_config(
                "backoff.initial_ms must not exceed backoff.max_ms",
            ));
        }
        if self.registry.configs_dir_label.is_empty() {
            return Err(Error::invalid_config("registry.configs_dir_label must not be empty"));
        }
        Ok(())
    }

    /// Settings for the OCI registry client.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            cache_dir: self.cache_dir.clone(),
            insecure: self.registry.insecure.clone(),
            configs_dir_label: self.registry.configs_dir_label.clone(),
        }
    }
}

impl BackoffConfig {
    /// Delay before the retry that follows `failures` consecutive failures.
    ///
    /// `initial * 2^(failures - 1)`, capped at `max`.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32);
        let millis = self
            .initial_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_ms);
        Duration::from_millis(millis)
    }
}
