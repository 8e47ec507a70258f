//! # catsrc - Catalog Source Controller
//!
//! Entry point for the controller binary.
//!
//! ## Startup Sequence
//!
//! 1. **Configuration** - TOML file (optional), then CLI flags and env vars
//! 2. **Kubernetes client** - inferred from kubeconfig or the in-cluster
//!    service account
//! 3. **Reconcilers** - CatalogSource and CatalogCache, each fed by a watch
//! 4. **Manager** - runs both until SIGINT or SIGTERM
//!
//! `catsrc crd` prints the CustomResourceDefinitions and exits.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use catsrc_core::{CatalogCache, CatalogSource, TypeRegistry};
use catsrc_reconciler::{
    CatalogCacheReconciler, CatalogSourceReconciler, ControllerConfig, KubeEventSource,
    KubeObjectStore, Manager,
};
use catsrc_registry::OciClientFactory;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, LogFormat, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Crd => print_crds(),
        Commands::Run(args) => run(cli.config.as_deref(), &args).await,
    }
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so `catsrc crd` output stays clean.
fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn print_crds() -> Result<()> {
    let types = TypeRegistry::with_catalog_types().context("Failed to build type registry")?;
    let mut stdout = std::io::stdout().lock();
    for crd in types.crds() {
        let yaml = serde_yaml::to_string(&crd).context("Failed to encode CustomResourceDefinition")?;
        write!(stdout, "---\n{yaml}").context("Failed to write CustomResourceDefinition")?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>, args: &RunArgs) -> Result<ControllerConfig> {
    let mut config = match path {
        Some(path) => ControllerConfig::load(path).context("Failed to load configuration")?,
        None => ControllerConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let config = load_config(config_path, args)?;
    info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        cache_dir = %config.cache_dir.display(),
        max_concurrent = config.max_concurrent_reconciles,
        "catsrc starting"
    );

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let types = TypeRegistry::with_catalog_types().context("Failed to build type registry")?;

    let sources = Arc::new(KubeObjectStore::<CatalogSource>::new(client.clone()));
    let caches = Arc::new(KubeObjectStore::<CatalogCache>::new(client.clone()));

    let source_reconciler = CatalogSourceReconciler::builder()
        .with_sources(sources)
        .with_caches(caches.clone())
        .with_registry_factory(Arc::new(OciClientFactory::new(config.registry_config())))
        .with_property_error_policy(config.properties.on_error)
        .build()
        .context("Failed to build CatalogSource reconciler")?;
    let cache_reconciler = CatalogCacheReconciler::new(caches, config.freshness);

    let namespace = config.namespace.as_deref();
    let mut manager = Manager::new(types, &config);
    manager
        .register(
            Arc::new(source_reconciler),
            Box::new(KubeEventSource::<CatalogSource>::for_namespace(client.clone(), namespace)),
        )
        .context("Failed to register CatalogSource reconciler")?;
    manager
        .register(
            Arc::new(cache_reconciler),
            Box::new(KubeEventSource::<CatalogCache>::for_namespace(client, namespace)),
        )
        .context("Failed to register CatalogCache reconciler")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        shutdown.cancel();
    });

    manager.run(cancel).await.context("Controller manager failed")?;
    info!("catsrc stopped gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(err) => error!("Failed to listen for shutdown signal: {}", err),
        },
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_load_config_defaults_without_file() {
        let config = load_config(None, &RunArgs::default()).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catsrc.toml");
        std::fs::write(&path, "namespace = \"from-file\"\nmax_concurrent_reconciles = 2\n").unwrap();
        let args = RunArgs {
            namespace: Some("from-flag".to_string()),
            ..RunArgs::default()
        };

        let config = load_config(Some(&path), &args).unwrap();

        assert_eq!(config.namespace.as_deref(), Some("from-flag"));
        assert_eq!(config.max_concurrent_reconciles, 2);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = RunArgs {
            max_concurrent_reconciles: Some(0),
            ..RunArgs::default()
        };

        assert!(load_config(None, &args).is_err());
    }
}
