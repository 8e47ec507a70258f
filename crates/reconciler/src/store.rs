//! Object store: get-by-identity, create and status update.
//!
//! [`KubeObjectStore`] talks to the API server; [`InMemoryObjectStore`] keeps
//! objects in a map and mimics the server's identity, uid and resourceVersion
//! rules closely enough to drive the reconcilers in tests.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use catsrc_core::ObjectKey;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Bounds every stored kind satisfies.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Persistent storage for one kind.
#[async_trait]
pub trait ObjectStore<K: StoredObject>: Send + Sync {
    /// Load an object by identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such object exists.
    async fn get(&self, key: &ObjectKey) -> Result<K>;

    /// Create an object. Never overwrites.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if an object with the same identity
    /// exists.
    async fn create(&self, obj: &K) -> Result<K>;

    /// Write `obj.status` back, guarded by `obj`'s resourceVersion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the object is gone and
    /// [`Error::Conflict`] if it changed since `obj` was read.
    async fn update_status(&self, obj: &K) -> Result<K>;
}

fn kind_of<K: StoredObject>() -> String {
    K::kind(&()).into_owned()
}

fn status_of<K: StoredObject>(obj: &K) -> Result<Value> {
    let value = serde_json::to_value(obj).map_err(|e| Error::store_failed("encode", e.to_string()))?;
    Ok(value.get("status").cloned().unwrap_or(Value::Null))
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory object store.
pub struct InMemoryObjectStore<K> {
    objects: RwLock<BTreeMap<ObjectKey, K>>,
    next_uid: AtomicU64,
}

impl<K: StoredObject> Default for InMemoryObjectStore<K> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            next_uid: AtomicU64::new(1),
        }
    }
}

impl<K: StoredObject> InMemoryObjectStore<K> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Put an object in place as if it had been created earlier, replacing
    /// any object with the same identity.
    pub async fn insert(&self, mut obj: K) -> K {
        self.stamp(&mut obj);
        self.objects
            .write()
            .await
            .insert(ObjectKey::of(&obj), obj.clone());
        obj
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn stamp(&self, obj: &mut K) {
        let meta = obj.meta_mut();
        if meta.uid.is_none() {
            let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
            meta.uid = Some(format!("uid-{uid}"));
        }
        if meta.resource_version.is_none() {
            meta.resource_version = Some("1".to_string());
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
    }
}

fn bump_resource_version(version: Option<&str>) -> String {
    let current = version.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for InMemoryObjectStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind_of::<K>(), key))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::already_exists(kind_of::<K>(), &key));
        }

        let mut created = obj.clone();
        {
            let meta = created.meta_mut();
            meta.uid = None;
            meta.resource_version = None;
            meta.generation = None;
        }
        self.stamp(&mut created);
        objects.insert(key.clone(), created.clone());
        debug!(kind = %kind_of::<K>(), key = %key, "Created object");
        Ok(created)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let status = status_of(obj)?;
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(kind_of::<K>(), &key))?;

        let expected = obj.meta().resource_version.as_deref();
        let actual = stored.meta().resource_version.as_deref();
        if expected.is_some() && expected != actual {
            return Err(Error::conflict(kind_of::<K>(), &key));
        }

        let mut value =
            serde_json::to_value(stored).map_err(|e| Error::store_failed("encode", e.to_string()))?;
        if let Some(fields) = value.as_object_mut() {
            fields.insert("status".to_string(), status);
        }
        let mut updated: K =
            serde_json::from_value(value).map_err(|e| Error::store_failed("decode", e.to_string()))?;
        updated.meta_mut().resource_version = Some(bump_resource_version(actual));

        objects.insert(key, updated.clone());
        Ok(updated)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// API SERVER STORE
// ═══════════════════════════════════════════════════════════════════════════

/// Object store backed by the Kubernetes API server.
pub struct KubeObjectStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K: StoredObject> KubeObjectStore<K> {
    /// Create a store using `client`.
    pub const fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Classify an API error: 404 is not-found, 409 is already-exists on create
/// and conflict otherwise.
fn map_kube_error(err: kube::Error, operation: &str, kind: &str, key: &ObjectKey) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => Error::not_found(kind, key),
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            Error::already_exists(kind, key)
        }
        kube::Error::Api(response) if response.code == 409 => Error::conflict(kind, key),
        other => Error::store_failed(operation, other.to_string()),
    }
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for KubeObjectStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        self.api(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| map_kube_error(e, "get", &kind_of::<K>(), key))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        self.api(&key.namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(e, "create", &kind_of::<K>(), &key))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let patch = json!({
            "metadata": { "resourceVersion": obj.meta().resource_version },
            "status": status_of(obj)?,
        });
        self.api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, "update_status", &kind_of::<K>(), &key))
    }
}
