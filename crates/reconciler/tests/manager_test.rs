//! Controller manager behavior.
//!
//! Tests verify that:
//! - Keys from an event source reach the registered reconciler
//! - Failed keys are retried with backoff until they succeed
//! - The same key never reconciles concurrently; distinct keys may
//! - Cancellation stops the manager

#![allow(clippy::panic)]

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use catsrc_core::{CatalogCache, CatalogSource, ObjectKey, TypeRegistry};
use catsrc_reconciler::{
    Action, BackoffConfig, CatalogCacheReconciler, CatalogSourceReconciler, ChannelEventSource,
    ControllerConfig, Error, FreshnessConfig, InMemoryObjectStore, Manager, ObjectStore, Reconcile,
    Result,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use common::{
    CountingFactory, StaticRenderer, bundle, eventually, gvk, key, source, unwrap_result,
};

const WAIT: Duration = Duration::from_secs(5);

fn config(max_concurrent: usize) -> ControllerConfig {
    ControllerConfig {
        max_concurrent_reconciles: max_concurrent,
        backoff: BackoffConfig {
            initial_ms: 5,
            max_ms: 20,
        },
        ..ControllerConfig::default()
    }
}

fn types() -> TypeRegistry {
    unwrap_result(TypeRegistry::with_catalog_types(), "type registry")
}

/// Reconciler that records attempts and fails a configurable number of times.
#[derive(Default)]
struct Recorder {
    failures_left: AtomicUsize,
    delay: Duration,
    attempts: Mutex<HashMap<ObjectKey, usize>>,
    running: Mutex<HashMap<ObjectKey, usize>>,
    max_same_key: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requeue: Option<Duration>,
}

impl Recorder {
    async fn attempts(&self, key: &ObjectKey) -> usize {
        self.attempts.lock().await.get(key).copied().unwrap_or(0)
    }

    async fn total_attempts(&self) -> usize {
        self.attempts.lock().await.values().sum()
    }
}

#[async_trait]
impl Reconcile for Recorder {
    fn kind(&self) -> &str {
        "CatalogSource"
    }

    async fn reconcile(&self, key: &ObjectKey, _cancel: &CancellationToken) -> Result<Action> {
        *self.attempts.lock().await.entry(key.clone()).or_insert(0) += 1;
        {
            let mut running = self.running.lock().await;
            let count = running.entry(key.clone()).or_insert(0);
            *count += 1;
            self.max_same_key.fetch_max(*count, Ordering::SeqCst);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.running.lock().await.get_mut(key) {
            *count -= 1;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::reconcile_failed("transient failure"));
        }
        Ok(self.requeue.map_or_else(Action::await_change, Action::requeue_after))
    }
}

struct Running {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl Running {
    fn start(manager: Manager) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(manager.run(cancel.clone()));
        Self { cancel, handle }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let result = unwrap_result(
            tokio::time::timeout(WAIT, self.handle).await,
            "manager should stop",
        );
        unwrap_result(unwrap_result(result, "manager task"), "manager result");
    }
}

fn start_recorder(
    recorder: Arc<Recorder>,
    max_concurrent: usize,
) -> (tokio::sync::mpsc::UnboundedSender<ObjectKey>, Running) {
    let (events, source) = ChannelEventSource::channel();
    let mut manager = Manager::new(types(), &config(max_concurrent));
    unwrap_result(manager.register(recorder, Box::new(source)), "register");
    (events, Running::start(manager))
}

// ==========================================================================
// END TO END
// ==========================================================================

/// Given both reconcilers registered with channel event sources
/// When a source key and then the resulting cache key are sent
/// Then the cache is created and stamped
#[tokio::test]
async fn source_event_creates_stamped_cache() {
    let sources = InMemoryObjectStore::<CatalogSource>::new_arc();
    let caches = InMemoryObjectStore::<CatalogCache>::new_arc();
    sources
        .insert(source("acme", "quay.io/acme/catalog:latest"))
        .await;
    let registry = Arc::new(CountingFactory::default());
    let source_reconciler = unwrap_result(
        CatalogSourceReconciler::builder()
            .with_sources(sources.clone())
            .with_caches(caches.clone())
            .with_registry_factory(registry.clone())
            .with_renderer(Arc::new(StaticRenderer::new(vec![bundle(
                "bundleA",
                "acme",
                vec![gvk("olm.gvk", "g", "v1", "Foo")],
            )])))
            .build(),
        "builder",
    );
    let cache_reconciler = CatalogCacheReconciler::new(caches.clone(), FreshnessConfig::default());

    let (source_events, source_rx) = ChannelEventSource::channel();
    let (cache_events, cache_rx) = ChannelEventSource::channel();
    let mut manager = Manager::new(types(), &config(2));
    unwrap_result(
        manager.register(Arc::new(source_reconciler), Box::new(source_rx)),
        "register sources",
    );
    unwrap_result(
        manager.register(Arc::new(cache_reconciler), Box::new(cache_rx)),
        "register caches",
    );
    let running = Running::start(manager);

    unwrap_result(source_events.send(key("acme")), "send source key");
    let created = eventually(WAIT, || {
        let caches = Arc::clone(&caches);
        async move { caches.get(&key("acme")).await.is_ok() }
    }).await;
    assert!(created, "cache should be created");

    unwrap_result(cache_events.send(key("acme")), "send cache key");
    let stamped = eventually(WAIT, || {
        let caches = Arc::clone(&caches);
        async move {
            caches
                .get(&key("acme"))
                .await
                .ok()
                .and_then(|c| c.status)
                .is_some_and(|s| s.conditions.len() == 1)
        }
    })
    .await;
    assert!(stamped, "cache should be stamped");

    running.stop().await;
    assert_eq!(registry.acquired(), registry.destroyed());
}

// ==========================================================================
// RETRIES
// ==========================================================================

/// Given a reconciler that fails twice
/// When its key is sent once
/// Then the manager retries until the third attempt succeeds, then stops
#[tokio::test]
async fn failed_key_is_retried_until_success() {
    let recorder = Arc::new(Recorder {
        failures_left: AtomicUsize::new(2),
        ..Recorder::default()
    });
    let (events, running) = start_recorder(recorder.clone(), 1);

    unwrap_result(events.send(key("acme")), "send key");
    let retried = eventually(WAIT, || {
        let recorder = Arc::clone(&recorder);
        async move { recorder.attempts(&key("acme")).await >= 3 }
    }).await;
    assert!(retried, "key should be retried");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.attempts(&key("acme")).await, 3);
    running.stop().await;
}

/// Given a reconciler asking to be requeued
/// When its key is sent once
/// Then it runs again without another event
#[tokio::test]
async fn requeue_after_schedules_another_run() {
    let recorder = Arc::new(Recorder {
        requeue: Some(Duration::from_millis(5)),
        ..Recorder::default()
    });
    let (events, running) = start_recorder(recorder.clone(), 1);

    unwrap_result(events.send(key("acme")), "send key");
    let requeued = eventually(WAIT, || {
        let recorder = Arc::clone(&recorder);
        async move { recorder.attempts(&key("acme")).await >= 3 }
    }).await;

    assert!(requeued, "key should be requeued");
    running.stop().await;
}

// ==========================================================================
// CONCURRENCY
// ==========================================================================

/// Given a slow reconciler
/// When the same key is sent repeatedly while it runs
/// Then it never runs concurrently with itself and runs again afterwards
#[tokio::test]
async fn same_key_never_runs_concurrently() {
    let recorder = Arc::new(Recorder {
        delay: Duration::from_millis(50),
        ..Recorder::default()
    });
    let (events, running) = start_recorder(recorder.clone(), 4);

    unwrap_result(events.send(key("acme")), "send key");
    tokio::time::sleep(Duration::from_millis(10)).await;
    for _ in 0..5 {
        unwrap_result(events.send(key("acme")), "send key again");
    }
    let rerun = eventually(WAIT, || {
        let recorder = Arc::clone(&recorder);
        async move { recorder.attempts(&key("acme")).await >= 2 }
    }).await;
    assert!(rerun, "dirty key should run again");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(recorder.max_same_key.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.attempts(&key("acme")).await, 2);
    running.stop().await;
}

/// Given a concurrency limit of two
/// When four distinct keys are sent
/// Then all four are reconciled, never more than two at once
#[tokio::test]
async fn distinct_keys_respect_concurrency_limit() {
    let recorder = Arc::new(Recorder {
        delay: Duration::from_millis(30),
        ..Recorder::default()
    });
    let (events, running) = start_recorder(recorder.clone(), 2);

    for name in ["a", "b", "c", "d"] {
        unwrap_result(events.send(key(name)), "send key");
    }
    let done = eventually(WAIT, || {
        let recorder = Arc::clone(&recorder);
        async move { recorder.total_attempts().await == 4 }
    }).await;

    assert!(done, "all keys should be reconciled");
    assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 2);
    running.stop().await;
}

// ==========================================================================
// PANICS
// ==========================================================================

struct PanicsOnce {
    attempts: AtomicUsize,
}

#[async_trait]
impl Reconcile for PanicsOnce {
    fn kind(&self) -> &str {
        "CatalogCache"
    }

    async fn reconcile(&self, _key: &ObjectKey, _cancel: &CancellationToken) -> Result<Action> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("reconciler bug");
        }
        Ok(Action::await_change())
    }
}

/// Given a reconciler that panics on its first attempt
/// When its key is sent
/// Then the panic counts as a failure and the key is retried
#[tokio::test]
async fn panic_is_retried_as_failure() {
    let reconciler = Arc::new(PanicsOnce {
        attempts: AtomicUsize::new(0),
    });
    let (events, source) = ChannelEventSource::channel();
    let mut manager = Manager::new(types(), &config(1));
    unwrap_result(manager.register(reconciler.clone(), Box::new(source)), "register");
    let running = Running::start(manager);

    unwrap_result(events.send(key("acme")), "send key");
    let retried = eventually(WAIT, || {
        let reconciler = Arc::clone(&reconciler);
        async move { reconciler.attempts.load(Ordering::SeqCst) >= 2 }
    }).await;

    assert!(retried, "key should be retried after panic");
    running.stop().await;
}

// ==========================================================================
// SHUTDOWN
// ==========================================================================

/// Given a running manager whose event source is idle
/// When it is cancelled
/// Then it returns promptly
#[tokio::test]
async fn cancellation_stops_manager() {
    let recorder = Arc::new(Recorder::default());
    let (_events, running) = start_recorder(recorder, 1);

    running.stop().await;
}
