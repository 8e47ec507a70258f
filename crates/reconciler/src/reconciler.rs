//! The `Reconcile` trait and the catalog-source reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use catsrc_core::{CatalogCache, CatalogSource, ObjectKey};
use catsrc_registry::{
    CatalogRenderer, DeclarativeConfigRenderer, OlmPropertyParser, PropertyParser,
    RegistryClientFactory, ScopedRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PropertyErrorPolicy;
use crate::error::{Error, Result, ResultExt};
use crate::mapping::{catalog_cache_for, operator_from_bundle};
use crate::store::ObjectStore;
use crate::types::Action;

/// Drives one kind of object towards its desired state.
///
/// The manager calls [`Reconcile::reconcile`] with the identity of a changed
/// object. Implementations re-read the object; a missing object is a
/// successful no-op.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Kind this reconciler handles, as registered in the type registry.
    fn kind(&self) -> &str;

    /// Reconcile the object identified by `key`.
    ///
    /// # Errors
    ///
    /// Any error makes the manager retry the key with backoff.
    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Action>;
}

/// Materializes a `CatalogCache` from each `CatalogSource`.
pub struct CatalogSourceReconciler {
    sources: Arc<dyn ObjectStore<CatalogSource>>,
    caches: Arc<dyn ObjectStore<CatalogCache>>,
    registry: Arc<dyn RegistryClientFactory>,
    renderer: Arc<dyn CatalogRenderer>,
    parser: Arc<dyn PropertyParser>,
    on_property_error: PropertyErrorPolicy,
}

impl CatalogSourceReconciler {
    /// Start building a reconciler.
    pub fn builder() -> CatalogSourceReconcilerBuilder {
        CatalogSourceReconcilerBuilder::default()
    }
}

#[async_trait]
impl Reconcile for CatalogSourceReconciler {
    fn kind(&self) -> &str {
        "CatalogSource"
    }

    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Action> {
        let Some(source) = self.sources.get(key).await.ignore_not_found()? else {
            debug!(namespace = %key.namespace, name = %key.name, "CatalogSource is gone");
            return Ok(Action::await_change());
        };

        let registry = ScopedRegistry::acquire(self.registry.as_ref())?;
        let refs = [source.spec.image.clone()];
        let catalog = self.renderer.render(&refs, &*registry, cancel).await?;
        if let Err(e) = registry.release() {
            warn!(image = %source.spec.image, error = %e, "Failed to release registry client");
        }

        let operators = catalog
            .bundles
            .iter()
            .map(|bundle| operator_from_bundle(bundle, self.parser.as_ref(), self.on_property_error))
            .collect::<Result<Vec<_>>>()?;
        let count = operators.len();

        let cache = catalog_cache_for(&source, operators)?;
        self.caches.create(&cache).await?;

        info!(
            namespace = %key.namespace,
            name = %key.name,
            image = %source.spec.image,
            operators = count,
            "Created CatalogCache"
        );
        Ok(Action::await_change())
    }
}

/// Builder for [`CatalogSourceReconciler`].
///
/// Both stores and the registry factory are required. The renderer and
/// parser default to [`DeclarativeConfigRenderer`] and [`OlmPropertyParser`].
#[derive(Default)]
pub struct CatalogSourceReconcilerBuilder {
    sources: Option<Arc<dyn ObjectStore<CatalogSource>>>,
    caches: Option<Arc<dyn ObjectStore<CatalogCache>>>,
    registry: Option<Arc<dyn RegistryClientFactory>>,
    renderer: Option<Arc<dyn CatalogRenderer>>,
    parser: Option<Arc<dyn PropertyParser>>,
    on_property_error: PropertyErrorPolicy,
}

impl CatalogSourceReconcilerBuilder {
    /// Store the sources are read from.
    #[must_use]
    pub fn with_sources(mut self, sources: Arc<dyn ObjectStore<CatalogSource>>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Store caches are created in.
    #[must_use]
    pub fn with_caches(mut self, caches: Arc<dyn ObjectStore<CatalogCache>>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Factory for per-reconcile registry clients.
    #[must_use]
    pub fn with_registry_factory(mut self, registry: Arc<dyn RegistryClientFactory>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn CatalogRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn PropertyParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// What to do with bundles whose properties do not parse.
    #[must_use]
    pub fn with_property_error_policy(mut self, policy: PropertyErrorPolicy) -> Self {
        self.on_property_error = policy;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a required collaborator is missing.
    pub fn build(self) -> Result<CatalogSourceReconciler> {
        Ok(CatalogSourceReconciler {
            sources: self
                .sources
                .ok_or_else(|| Error::invalid_config("CatalogSource store is required"))?,
            caches: self
                .caches
                .ok_or_else(|| Error::invalid_config("CatalogCache store is required"))?,
            registry: self
                .registry
                .ok_or_else(|| Error::invalid_config("registry client factory is required"))?,
            renderer: self
                .renderer
                .unwrap_or_else(|| Arc::new(DeclarativeConfigRenderer)),
            parser: self.parser.unwrap_or_else(|| Arc::new(OlmPropertyParser)),
            on_property_error: self.on_property_error,
        })
    }
}
