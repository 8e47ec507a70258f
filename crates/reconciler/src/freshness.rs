//! Cache freshness: keep a `CacheUpdatedAt` condition on every cache.

use std::sync::Arc;

use async_trait::async_trait;
use catsrc_core::{CONDITION_CACHE_UPDATED_AT, CatalogCache, CatalogCacheStatus, ObjectKey};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{FreshnessConfig, RefreshMode, StatusErrorPolicy};
use crate::error::{Result, ResultExt};
use crate::reconciler::Reconcile;
use crate::store::ObjectStore;
use crate::types::Action;

const REASON_CACHE_UPDATED: &str = "CacheUpdated";

fn cache_updated_condition(now: DateTime<Utc>, generation: Option<i64>) -> Condition {
    Condition {
        type_: CONDITION_CACHE_UPDATED_AT.to_string(),
        status: "True".to_string(),
        reason: REASON_CACHE_UPDATED.to_string(),
        message: "Cache contents were refreshed".to_string(),
        observed_generation: generation,
        last_transition_time: Time(now),
    }
}

/// Stamp `now` onto the `CacheUpdatedAt` condition.
///
/// An empty list always gains one condition. Otherwise [`RefreshMode::InPlace`]
/// moves the existing condition's timestamp (appending one if none matches)
/// and [`RefreshMode::StampOnce`] leaves the list untouched.
///
/// Returns whether the status changed.
pub fn stamp_cache_updated(
    status: &mut CatalogCacheStatus,
    now: DateTime<Utc>,
    generation: Option<i64>,
    mode: RefreshMode,
) -> bool {
    if status.conditions.is_empty() {
        status.conditions.push(cache_updated_condition(now, generation));
        return true;
    }
    if mode == RefreshMode::StampOnce {
        return false;
    }

    let index = status
        .conditions
        .iter()
        .position(|c| c.type_ == CONDITION_CACHE_UPDATED_AT);
    match index.and_then(|i| status.conditions.get_mut(i)) {
        Some(condition) => {
            condition.last_transition_time = Time(now);
            condition.observed_generation = generation;
        }
        None => status.conditions.push(cache_updated_condition(now, generation)),
    }
    true
}

/// Refreshes the `CacheUpdatedAt` condition of each `CatalogCache`.
pub struct CatalogCacheReconciler {
    caches: Arc<dyn ObjectStore<CatalogCache>>,
    clock: Arc<dyn Clock>,
    config: FreshnessConfig,
}

impl CatalogCacheReconciler {
    /// Create a reconciler on the wall clock.
    pub fn new(caches: Arc<dyn ObjectStore<CatalogCache>>, config: FreshnessConfig) -> Self {
        Self {
            caches,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl Reconcile for CatalogCacheReconciler {
    fn kind(&self) -> &str {
        "CatalogCache"
    }

    async fn reconcile(&self, key: &ObjectKey, _cancel: &CancellationToken) -> Result<Action> {
        let Some(mut cache) = self.caches.get(key).await.ignore_not_found()? else {
            debug!(namespace = %key.namespace, name = %key.name, "CatalogCache is gone");
            return Ok(Action::await_change());
        };

        let generation = cache.metadata.generation;
        let status = cache.status.get_or_insert_with(CatalogCacheStatus::default);
        let changed = stamp_cache_updated(status, self.clock.now(), generation, self.config.refresh);

        match self.caches.update_status(&cache).await {
            Ok(_) => {
                debug!(namespace = %key.namespace, name = %key.name, changed, "Updated CatalogCache status");
            }
            Err(e) => match self.config.status_errors {
                StatusErrorPolicy::Surface => return Err(e),
                StatusErrorPolicy::Discard => {
                    warn!(namespace = %key.namespace, name = %key.name, error = %e, "Discarding status update error");
                }
            },
        }
        Ok(Action::await_change())
    }
}
