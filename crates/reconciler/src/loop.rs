//! Controller manager: event sources, work queues and retries.
//!
//! Every registered reconciler gets one worker loop. The loop pulls keys from
//! its event source into a [`WorkQueue`], runs up to
//! `max_concurrent_reconciles` distinct keys at once, and requeues failed keys
//! with exponential backoff until the manager is cancelled.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catsrc_core::{ObjectKey, TypeRegistry};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, future};
use itertools::Itertools;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{BackoffConfig, ControllerConfig};
use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::reconciler::Reconcile;
use crate::types::Action;

/// Source of keys to reconcile.
#[async_trait]
pub trait EventSource: Send {
    /// Next changed key; `None` once the source is exhausted.
    async fn next(&mut self) -> Option<ObjectKey>;
}

/// Event source fed through a channel.
pub struct ChannelEventSource {
    rx: mpsc::UnboundedReceiver<ObjectKey>,
}

impl ChannelEventSource {
    /// Create a source and the sender that feeds it.
    pub fn channel() -> (mpsc::UnboundedSender<ObjectKey>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next(&mut self) -> Option<ObjectKey> {
        self.rx.recv().await
    }
}

/// `(uid, generation)` of an object as last seen.
type Version = (Option<String>, Option<i64>);

/// Decides which watch events become keys to reconcile.
///
/// Remembers the `(uid, generation)` last emitted per object and skips
/// modifications that leave it unchanged, such as status writes. Deleted
/// objects are forgotten, and every re-list replaces what is remembered with
/// the objects it returned.
#[derive(Debug, Default)]
pub struct GenerationFilter {
    seen: HashMap<ObjectKey, Version>,
    relist: Option<HashMap<ObjectKey, Version>>,
}

impl GenerationFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key to reconcile for `event`, if any.
    pub fn observe<K: Resource>(&mut self, event: watcher::Event<K>) -> Option<ObjectKey> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashMap::new());
                None
            }
            watcher::Event::InitApply(obj) => {
                let (key, version) = identify(&obj);
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(key.clone(), version.clone());
                }
                self.admit(key, version)
            }
            watcher::Event::InitDone => {
                if let Some(relist) = self.relist.take() {
                    self.seen = relist;
                }
                None
            }
            watcher::Event::Apply(obj) => {
                let (key, version) = identify(&obj);
                self.admit(key, version)
            }
            watcher::Event::Delete(obj) => {
                self.seen.remove(&ObjectKey::of(&obj));
                None
            }
        }
    }

    /// Number of objects remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn admit(&mut self, key: ObjectKey, version: Version) -> Option<ObjectKey> {
        if version.1.is_some() && self.seen.get(&key) == Some(&version) {
            return None;
        }
        self.seen.insert(key.clone(), version);
        Some(key)
    }
}

fn identify<K: Resource>(obj: &K) -> (ObjectKey, Version) {
    (ObjectKey::of(obj), (obj.meta().uid.clone(), obj.meta().generation))
}

type WatchStream<K> = BoxStream<'static, std::result::Result<watcher::Event<K>, watcher::Error>>;

/// Event source watching one kind on the API server, filtered through a
/// [`GenerationFilter`].
pub struct KubeEventSource<K> {
    stream: WatchStream<K>,
    filter: GenerationFilter,
}

impl<K> KubeEventSource<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    /// Watch through `api`.
    pub fn new(api: Api<K>) -> Self {
        Self::from_stream(watcher(api, watcher::Config::default()).default_backoff())
    }

    /// Read watch events from `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            filter: GenerationFilter::new(),
        }
    }
}

impl<K> KubeEventSource<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    /// Watch one namespace, or all namespaces when `namespace` is `None`.
    pub fn for_namespace(client: Client, namespace: Option<&str>) -> Self {
        let api = match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };
        Self::new(api)
    }
}

#[async_trait]
impl<K> EventSource for KubeEventSource<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    async fn next(&mut self) -> Option<ObjectKey> {
        loop {
            match self.stream.next().await? {
                Ok(event) => {
                    if let Some(key) = self.filter.observe(event) {
                        return Some(key);
                    }
                }
                Err(e) => warn!(kind = %K::kind(&()), error = %e, "Watch error"),
            }
        }
    }
}

struct Controller {
    reconciler: Arc<dyn Reconcile>,
    source: Box<dyn EventSource>,
}

/// Runs registered reconcilers until cancelled.
pub struct Manager {
    types: TypeRegistry,
    max_concurrent: usize,
    backoff: BackoffConfig,
    controllers: Vec<Controller>,
}

impl Manager {
    /// Create a manager over the kinds in `types`.
    pub fn new(types: TypeRegistry, config: &ControllerConfig) -> Self {
        Self {
            types,
            max_concurrent: config.max_concurrent_reconciles.max(1),
            backoff: config.backoff,
            controllers: Vec::new(),
        }
    }

    /// Register a reconciler fed by `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconciler's kind is not in the type registry
    /// or already has a reconciler.
    pub fn register(&mut self, reconciler: Arc<dyn Reconcile>, source: Box<dyn EventSource>) -> Result<()> {
        let kind = reconciler.kind().to_string();
        self.types.get(&kind)?;
        if self.controllers.iter().any(|c| c.reconciler.kind() == kind) {
            return Err(Error::invalid_config(format!("{kind} already has a reconciler")));
        }
        debug!(kind = %kind, "Registered reconciler");
        self.controllers.push(Controller { reconciler, source });
        Ok(())
    }

    /// Kinds with a registered reconciler.
    pub fn kinds(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.reconciler.kind()).collect()
    }

    /// Run every registered reconciler until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if nothing was registered.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        if self.controllers.is_empty() {
            return Err(Error::invalid_config("no reconcilers registered"));
        }

        info!(
            kinds = %self.kinds().iter().join(", "),
            max_concurrent = self.max_concurrent,
            "Starting controller manager"
        );
        let Self {
            max_concurrent,
            backoff,
            controllers,
            ..
        } = self;
        let workers = controllers
            .into_iter()
            .map(|controller| run_worker(controller, max_concurrent, backoff, cancel.clone()));
        future::join_all(workers).await;
        info!("Controller manager stopped");
        Ok(())
    }
}

type Completion = (ObjectKey, Result<Action>);

async fn run_worker(
    controller: Controller,
    max_concurrent: usize,
    backoff: BackoffConfig,
    cancel: CancellationToken,
) {
    let Controller {
        reconciler,
        mut source,
    } = controller;
    let kind = reconciler.kind().to_string();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<ObjectKey>();
    let mut queue = WorkQueue::new();
    let mut source_open = true;

    loop {
        while queue.active() < max_concurrent {
            let Some(key) = queue.pop() else { break };
            spawn_reconcile(&reconciler, key, &cancel, done_tx.clone());
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some((key, result)) = done_rx.recv() => {
                queue.done(&key);
                match result {
                    Ok(action) => {
                        queue.forget(&key);
                        if let Some(delay) = action.requeue_interval() {
                            schedule(key, delay, &cancel, requeue_tx.clone());
                        }
                    }
                    Err(e) => {
                        let failures = queue.record_failure(&key);
                        let delay = backoff.delay(failures);
                        error!(
                            kind = %kind,
                            namespace = %key.namespace,
                            name = %key.name,
                            error = %e,
                            failures,
                            retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Reconcile failed"
                        );
                        schedule(key, delay, &cancel, requeue_tx.clone());
                    }
                }
            }
            Some(key) = requeue_rx.recv() => queue.add(key),
            next = source.next(), if source_open => match next {
                Some(key) => queue.add(key),
                None => {
                    debug!(kind = %kind, "Event source closed");
                    source_open = false;
                }
            },
        }
    }

    while queue.active() > 0 {
        match done_rx.recv().await {
            Some((key, _)) => queue.done(&key),
            None => break,
        }
    }
    debug!(kind = %kind, "Worker stopped");
}

/// Reconcile `key` on its own task so a panic is reported as a failure.
fn spawn_reconcile(
    reconciler: &Arc<dyn Reconcile>,
    key: ObjectKey,
    cancel: &CancellationToken,
    done: mpsc::UnboundedSender<Completion>,
) {
    let span = info_span!(
        "reconcile",
        kind = %reconciler.kind(),
        namespace = %key.namespace,
        name = %key.name
    );
    let reconciler = Arc::clone(reconciler);
    let cancel = cancel.child_token();
    let target = key.clone();

    tokio::spawn(async move {
        let attempt =
            tokio::spawn(async move { reconciler.reconcile(&target, &cancel).await }.instrument(span));
        let result = attempt
            .await
            .unwrap_or_else(|e| Err(Error::reconcile_failed(format!("reconcile task failed: {e}"))));
        let _ = done.send((key, result));
    });
}

fn schedule(
    key: ObjectKey,
    delay: Duration,
    cancel: &CancellationToken,
    requeue: mpsc::UnboundedSender<ObjectKey>,
) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                let _ = requeue.send(key);
            }
        }
    });
}
