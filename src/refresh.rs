//! Background updater.
//!
//! A single ticker task per caller sweeps the whole cache, picks the items the staleness check flags and refreshes
//! them from the downstream in batches. Nothing here is ever reported to a caller; failures are logged and the next
//! batch or tick goes on.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::instrument;

use crate::caller::CachedCaller;
use crate::error::CacheError;
use crate::item::Item;
use crate::traits::CacheStore;
use crate::traits::Downstream;
use crate::traits::StalenessCheck;

/// Flags items older than `max_age`.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge {
    max_age: Duration,
}

impl MaxAge {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

impl Default for MaxAge {
    fn default() -> Self {
        Self::new(Duration::from_secs(10 * 60))
    }
}

impl StalenessCheck for MaxAge {
    fn needs_update(&self, item: &Item, now: i64) -> bool {
        now.saturating_sub(item.timestamp) > self.max_age.as_secs() as i64
    }
}

impl<DS> CachedCaller<DS>
where
    DS: Downstream,
{
    /// Spawn the background updater unless it is already running. The first sweep happens one period from now.
    pub fn start_refresh(&self) {
        if self.is_refreshing() {
            return;
        }

        let period = self.refresh_period();
        if period.is_zero() {
            error!("refresh period is zero, background refresh is not started");
            return;
        }

        let Some(myself) = self.myself()
        else {
            error!("caller is not reference counted, background refresh is not started");
            return;
        };
        let weak = Arc::downgrade(&myself);
        drop(myself);

        debug!(?period, "starting background refresh");
        self.set_refresh_task(tokio::spawn(Self::refresh_loop(weak, period)));
    }

    pub async fn stop_refresh(&self) {
        if let Some(task) = self.clear_refresh_task() {
            task.abort();
            let _ = task.await;
            debug!("background refresh stopped");
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_task().as_ref().is_some_and(|t| !t.is_finished())
    }

    async fn refresh_loop(caller: Weak<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(caller) = caller.upgrade()
            else {
                break;
            };
            caller.refresh_stale().await;
        }
    }

    /// One sweep: collect stale items and refresh them batch by batch.
    #[instrument(level = "trace", skip_all)]
    pub async fn refresh_stale(&self) {
        let Some(check) = self.staleness()
        else {
            return;
        };
        let Some(cache) = self.cache()
        else {
            debug!("no cache configured, nothing to refresh");
            return;
        };
        let Some(mut stale) = self.collect_stale(cache.as_ref(), check.as_ref())
        else {
            self.metrics().inc("cache_not_iterable");
            error!("cache is not iterable, skipping background refresh");
            return;
        };

        for batch in stale.chunks_mut(self.refresh_batch_size().max(1)) {
            self.refresh_batch(batch).await;
        }
    }

    // Stops at the first iteration or decode error and keeps what was collected so far.
    fn collect_stale(&self, cache: &dyn CacheStore, check: &dyn StalenessCheck) -> Option<Vec<Item>> {
        let entries = cache.entries()?;
        let codec = self.item_codec();
        let metrics = self.metrics();
        let now = self.clock().now();

        let mut scanned = 0;
        let mut stale = Vec::new();
        for entry in entries {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(CacheError::IterationStopped) => break,
                Err(err) => {
                    metrics.inc("iter_next_fail");
                    error!(error = %err, "cache iteration failed");
                    break;
                }
            };
            scanned += 1;

            let item = match codec.decode(&key, &value) {
                Ok(item) => item,
                Err(err) => {
                    metrics.inc("item_decode_fail");
                    error!(%key, error = %err, "cannot decode cached item");
                    break;
                }
            };
            if check.needs_update(&item, now) {
                stale.push(item);
            }
        }

        metrics.increment("cache_key_num", scanned);
        metrics.increment("need_update_key", stale.len() as u64);
        debug!(scanned, stale = stale.len(), "collected items to refresh");
        Some(stale)
    }

    async fn refresh_batch(&self, batch: &mut [Item]) {
        let metrics = self.metrics();
        let request = match self.request_codec().decode(batch) {
            Ok(request) => request,
            Err(err) => {
                metrics.inc("refresh_request_decode_fail");
                error!(error = %err, "cannot build refresh request");
                return;
            }
        };

        let result = self
            .call_downstream(DS::Context::default(), self.refresh_timeout(), request)
            .await;

        // A failed refresh still re-stamps the batch so it isn't picked up again on the very next tick.
        let force_timestamp = match result {
            Ok(response) => match self.merge_response(&response, batch) {
                Ok(()) => false,
                Err(err) => {
                    metrics.inc("refresh_merge_fail");
                    error!(error = %err, "cannot merge refresh response");
                    true
                }
            },
            Err(err) => {
                metrics.inc("refresh_call_fail");
                error!(error = %err, "background refresh call failed");
                true
            }
        };

        if let Err(err) = self.persist(batch, force_timestamp).await {
            metrics.inc("refresh_cache_write_fail");
            error!(error = %err, "cannot store refreshed items");
        }
    }
}
