//! K8s-style reconcilers for catalog caches.
//!
//! Two reconcilers share the [`Reconcile`] trait:
//!
//! - [`CatalogSourceReconciler`]: pulls a `CatalogSource`'s catalog image,
//!   maps every bundle to an operator entry and creates the owned
//!   `CatalogCache`
//! - [`CatalogCacheReconciler`]: keeps a `CacheUpdatedAt` condition on every
//!   `CatalogCache`
//!
//! Both read and write objects through an [`ObjectStore`]; the
//! [`Manager`] feeds them keys from [`EventSource`]s and retries failures
//! with backoff.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use catsrc_core::{CatalogCache, CatalogSource, TypeRegistry};
//! use catsrc_reconciler::{
//!     CatalogCacheReconciler, CatalogSourceReconciler, ChannelEventSource, ControllerConfig,
//!     InMemoryObjectStore, Manager,
//! };
//! use catsrc_registry::OciClientFactory;
//!
//! #[tokio::main]
//! async fn main() -> catsrc_reconciler::Result<()> {
//!     let config = ControllerConfig::default();
//!     let sources = InMemoryObjectStore::<CatalogSource>::new_arc();
//!     let caches = InMemoryObjectStore::<CatalogCache>::new_arc();
//!
//!     let source_reconciler = CatalogSourceReconciler::builder()
//!         .with_sources(sources)
//!         .with_caches(caches.clone())
//!         .with_registry_factory(Arc::new(OciClientFactory::new(config.registry_config())))
//!         .build()?;
//!     let cache_reconciler = CatalogCacheReconciler::new(caches, config.freshness);
//!
//!     let (_source_events, source_rx) = ChannelEventSource::channel();
//!     let (_cache_events, cache_rx) = ChannelEventSource::channel();
//!
//!     let mut manager = Manager::new(TypeRegistry::with_catalog_types()?, &config);
//!     manager.register(Arc::new(source_reconciler), Box::new(source_rx))?;
//!     manager.register(Arc::new(cache_reconciler), Box::new(cache_rx))?;
//!     manager.run(tokio_util::sync::CancellationToken::new()).await
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod config;
pub mod error;
pub mod freshness;
pub mod r#loop;
pub mod mapping;
pub mod queue;
pub mod reconciler;
pub mod store;
pub mod types;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackoffConfig, ControllerConfig, FreshnessConfig, PropertiesConfig, PropertyErrorPolicy,
    RefreshMode, RegistrySettings, StatusErrorPolicy,
};
pub use error::{Error, Result, ResultExt};
pub use freshness::{CatalogCacheReconciler, stamp_cache_updated};
pub use r#loop::{ChannelEventSource, EventSource, GenerationFilter, KubeEventSource, Manager};
pub use reconciler::{CatalogSourceReconciler, CatalogSourceReconcilerBuilder, Reconcile};
pub use store::{InMemoryObjectStore, KubeObjectStore, ObjectStore, StoredObject};
pub use types::Action;
