//! Shared fakes for reconciler integration tests.

#![allow(dead_code)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use catsrc_core::{CatalogCache, CatalogSource, CatalogSourceSpec, ObjectKey};
use catsrc_reconciler::{Error, InMemoryObjectStore, ObjectStore, Result};
use catsrc_registry::{
    Bundle, Catalog, CatalogRenderer, Property, RegistryClient, RegistryClientFactory, UnpackedImage,
};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "operators";

/// Unwrap a Result or panic with context.
pub fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{context}: {e}"),
    }
}

/// Unwrap an Option or panic with context.
pub fn unwrap_option<T>(option: Option<T>, context: &str) -> T {
    match option {
        Some(value) => value,
        None => panic!("{context}"),
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

pub fn source(name: &str, image: &str) -> CatalogSource {
    let mut source = CatalogSource::new(
        name,
        CatalogSourceSpec {
            image: image.to_string(),
        },
    );
    source.metadata.namespace = Some(NAMESPACE.to_string());
    source
}

pub fn cache(name: &str) -> CatalogCache {
    let mut cache = CatalogCache::new(name, Default::default());
    cache.metadata.namespace = Some(NAMESPACE.to_string());
    cache
}

pub fn gvk(property_type: &str, group: &str, version: &str, kind: &str) -> Property {
    Property {
        property_type: property_type.to_string(),
        value: json!({"group": group, "version": version, "kind": kind}),
    }
}

pub fn package(name: &str, version: &str) -> Property {
    Property {
        property_type: "olm.package".to_string(),
        value: json!({"packageName": name, "version": version}),
    }
}

pub fn bundle(name: &str, package: &str, properties: Vec<Property>) -> Bundle {
    Bundle {
        name: name.to_string(),
        package: package.to_string(),
        image: format!("quay.io/{package}/{name}:bundle"),
        properties,
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRY FAKES
// ═══════════════════════════════════════════════════════════════════════════

/// Registry factory counting acquisitions and releases.
#[derive(Default)]
pub struct CountingFactory {
    pub acquired: Arc<AtomicUsize>,
    pub destroyed: Arc<AtomicUsize>,
}

impl CountingFactory {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

struct CountingClient {
    destroyed: Arc<AtomicUsize>,
    alive: bool,
}

#[async_trait]
impl RegistryClient for CountingClient {
    async fn unpack(&self, image: &str, _cancel: &CancellationToken) -> catsrc_registry::Result<UnpackedImage> {
        Err(catsrc_registry::Error::pull_failed(image, "no registry in tests"))
    }

    fn destroy(&mut self) -> catsrc_registry::Result<()> {
        if self.alive {
            self.alive = false;
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl RegistryClientFactory for CountingFactory {
    fn new_client(&self) -> catsrc_registry::Result<Box<dyn RegistryClient>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingClient {
            destroyed: Arc::clone(&self.destroyed),
            alive: true,
        }))
    }
}

/// Renderer returning a fixed catalog, or failing.
#[derive(Default)]
pub struct StaticRenderer {
    bundles: Vec<Bundle>,
    fail: bool,
    pub rendered: Mutex<Vec<Vec<String>>>,
}

impl StaticRenderer {
    pub fn new(bundles: Vec<Bundle>) -> Self {
        Self {
            bundles,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl CatalogRenderer for StaticRenderer {
    async fn render(
        &self,
        refs: &[String],
        _registry: &dyn RegistryClient,
        _cancel: &CancellationToken,
    ) -> catsrc_registry::Result<Catalog> {
        self.rendered.lock().await.push(refs.to_vec());
        if self.fail {
            return Err(catsrc_registry::Error::pull_failed(
                refs.first().map_or("", String::as_str),
                "manifest unknown",
            ));
        }
        Ok(Catalog {
            bundles: self.bundles.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE FAKES
// ═══════════════════════════════════════════════════════════════════════════

/// Cache store whose status updates always fail.
pub struct FailingStatusStore {
    pub inner: Arc<InMemoryObjectStore<CatalogCache>>,
}

#[async_trait]
impl ObjectStore<CatalogCache> for FailingStatusStore {
    async fn get(&self, key: &ObjectKey) -> Result<CatalogCache> {
        self.inner.get(key).await
    }

    async fn create(&self, obj: &CatalogCache) -> Result<CatalogCache> {
        self.inner.create(obj).await
    }

    async fn update_status(&self, _obj: &CatalogCache) -> Result<CatalogCache> {
        Err(Error::store_failed("update_status", "etcd unavailable"))
    }
}
