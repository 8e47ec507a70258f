//! CLI command definitions using clap.

use std::path::PathBuf;

use catsrc_reconciler::{ControllerConfig, PropertyErrorPolicy, RefreshMode, StatusErrorPolicy};
use clap::{Args, Parser, Subcommand, ValueEnum};

/// catsrc - catalog source controller
#[derive(Parser, Debug)]
#[command(name = "catsrc")]
#[command(version)]
#[command(about = "Render operator catalog images into CatalogCache records")]
#[command(
    long_about = "catsrc watches CatalogSource objects, pulls each source's catalog image, and records the bundles it contains in a CatalogCache owned by the source."
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "CATSRC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "CATSRC_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run both controllers against the current cluster
    Run(RunArgs),

    /// Print the CustomResourceDefinitions as a YAML stream
    Crd,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Overrides for values in the configuration file.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Only watch this namespace
    #[arg(long, env = "CATSRC_NAMESPACE")]
    pub namespace: Option<String>,

    /// Concurrent reconciles per kind
    #[arg(long, env = "CATSRC_MAX_CONCURRENT_RECONCILES")]
    pub max_concurrent_reconciles: Option<usize>,

    /// Directory catalog images are unpacked under
    #[arg(long, env = "CATSRC_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Registry reached over plain HTTP (repeatable)
    #[arg(long = "insecure-registry", env = "CATSRC_INSECURE_REGISTRIES", value_delimiter = ',')]
    pub insecure_registries: Vec<String>,

    /// How an existing CacheUpdatedAt condition is treated
    #[arg(long, value_enum)]
    pub refresh: Option<RefreshArg>,

    /// What happens when a CatalogCache status update fails
    #[arg(long, value_enum)]
    pub status_errors: Option<StatusErrorsArg>,

    /// What happens when bundle properties fail to parse
    #[arg(long, value_enum)]
    pub property_errors: Option<PropertyErrorsArg>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshArg {
    InPlace,
    StampOnce,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusErrorsArg {
    Surface,
    Discard,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyErrorsArg {
    Degrade,
    Fail,
}

impl RunArgs {
    /// Layer the flags that were given over `config`.
    pub fn apply(&self, config: &mut ControllerConfig) {
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }
        if let Some(max) = self.max_concurrent_reconciles {
            config.max_concurrent_reconciles = max;
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if !self.insecure_registries.is_empty() {
            config.registry.insecure = self.insecure_registries.clone();
        }
        if let Some(refresh) = self.refresh {
            config.freshness.refresh = match refresh {
                RefreshArg::InPlace => RefreshMode::InPlace,
                RefreshArg::StampOnce => RefreshMode::StampOnce,
            };
        }
        if let Some(policy) = self.status_errors {
            config.freshness.status_errors = match policy {
                StatusErrorsArg::Surface => StatusErrorPolicy::Surface,
                StatusErrorsArg::Discard => StatusErrorPolicy::Discard,
            };
        }
        if let Some(policy) = self.property_errors {
            config.properties.on_error = match policy {
                PropertyErrorsArg::Degrade => PropertyErrorPolicy::Degrade,
                PropertyErrorsArg::Fail => PropertyErrorPolicy::Fail,
            };
        }
    }
}
