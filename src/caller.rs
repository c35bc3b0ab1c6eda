use fieldx::error::FieldXError;
use fieldx_plus::fx_plus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use tracing::instrument;

use crate::breaker::AdmissionControl;
use crate::breaker::Breaker;
use crate::breaker::BreakerConfig;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::codec::BinaryItemCodec;
use crate::codec::ItemCodec;
use crate::error::CacheError;
use crate::error::CallerError;
use crate::error::CodecError;
use crate::item::Item;
use crate::metrics::TracingMetrics;
use crate::refresh::MaxAge;
use crate::store::MokaStore;
use crate::traits::CacheStore;
use crate::traits::Downstream;
use crate::traits::Metrics;
use crate::traits::RequestCodec;
use crate::traits::ResponseCodec;
use crate::traits::StalenessCheck;
use crate::types::Outcome;

pub type CallResult<T, DS> = Result<T, CallerError<<DS as Downstream>::Error>>;

/// Caching decorator around a [`Downstream`].
///
/// ```ignore
/// let caller = CachedCaller::builder()
///     .downstream(Arc::new(FeatureService::connect(addr).await?))
///     .request_codec(Arc::new(FeatureRequestCodec))
///     .response_codec(Arc::new(FeatureResponseCodec))
///     .refresh_period(Duration::from_secs(60))
///     .start()?;
///
/// let response = caller.call(ctx, Duration::from_millis(200), request).await?;
/// ```
///
/// A call is split into items by the request codec. Items already in the cache are filled from it; if that resolves
/// all of them the response is built from the cache right away. Otherwise the admission controller decides whether
/// the downstream is called at all. When it is, the response is merged back into the items by key and everything is
/// written to the cache before the final response is decoded from the items.
#[fx_plus(
    parent,
    rc(vis(pub(crate))),
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`CachedCaller`].", "", "See [`CachedCaller::builder()`] method."),
        method_doc("Implement builder pattern for [`CachedCaller`]."),
    )
)]
pub struct CachedCaller<DS>
where
    DS: Downstream,
{
    #[fieldx(builder(required), get(clone))]
    downstream: Arc<DS>,

    #[fieldx(builder(required), get(clone))]
    request_codec: Arc<dyn RequestCodec<DS::Request>>,

    #[fieldx(builder(required), get(clone))]
    response_codec: Arc<dyn ResponseCodec<DS::Response>>,

    #[fieldx(get(clone), default(default_item_codec()))]
    item_codec: Arc<dyn ItemCodec>,

    /// `None` disables caching. A degrade decision then fails the call.
    #[fieldx(get(clone), default(default_store()))]
    cache: Option<Arc<dyn CacheStore>>,

    #[fieldx(get(clone), default(default_breaker()))]
    breaker: Arc<dyn AdmissionControl>,

    /// `None` disables background refresh.
    #[fieldx(get(clone), default(default_staleness()))]
    staleness: Option<Arc<dyn StalenessCheck>>,

    #[fieldx(get(clone), default(default_metrics()))]
    metrics: Arc<dyn Metrics>,

    #[fieldx(get(clone), default(default_clock()))]
    clock: Arc<dyn Clock>,

    /// Number of items per background refresh request.
    #[fieldx(get(copy), default(100))]
    refresh_batch_size: usize,

    /// The delay between two consecutive background sweeps.
    #[fieldx(get(copy), default(Duration::from_secs(600)))]
    refresh_period: Duration,

    /// Timeout passed to the downstream on background refreshes.
    #[fieldx(get(copy), default(Duration::from_secs(10)))]
    refresh_timeout: Duration,

    #[fieldx(vis(pub(crate)), clearer, lock, get, set, builder(off))]
    refresh_task: tokio::task::JoinHandle<()>,
}

fn default_item_codec() -> Arc<dyn ItemCodec> {
    Arc::new(BinaryItemCodec)
}

fn default_store() -> Option<Arc<dyn CacheStore>> {
    Some(Arc::new(MokaStore::default()))
}

fn default_breaker() -> Arc<dyn AdmissionControl> {
    Arc::new(Breaker::default())
}

fn default_staleness() -> Option<Arc<dyn StalenessCheck>> {
    Some(Arc::new(MaxAge::default()))
}

fn default_metrics() -> Arc<dyn Metrics> {
    Arc::new(TracingMetrics)
}

fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

impl<DS> CachedCallerBuilder<DS>
where
    DS: Downstream,
{
    pub fn store<S: CacheStore>(self, store: S) -> Self {
        self.cache(Some(Arc::new(store)))
    }

    pub fn without_cache(self) -> Self {
        self.cache(None)
    }

    pub fn staleness_check<S: StalenessCheck>(self, check: S) -> Self {
        self.staleness(Some(Arc::new(check)))
    }

    pub fn without_refresh(self) -> Self {
        self.staleness(None)
    }

    pub fn breaker_config(self, config: BreakerConfig) -> Self {
        self.breaker(Arc::new(Breaker::new(config)))
    }

    /// Build the caller and, if a staleness check is configured, start the background updater. Must be called within
    /// a tokio runtime.
    pub fn start(mut self) -> Result<Arc<CachedCaller<DS>>, FieldXError> {
        let caller = self.build()?;
        if caller.staleness().is_some() {
            caller.start_refresh();
        }
        Ok(caller)
    }
}

impl<DS> CachedCaller<DS>
where
    DS: Downstream,
{
    #[instrument(level = "trace", skip_all)]
    pub async fn call(&self, ctx: DS::Context, timeout: Duration, request: DS::Request) -> CallResult<DS::Response, DS> {
        let metrics = self.metrics();
        metrics.inc("enter");

        let mut items = self.encode_request(&request)?;
        let hits = self.fill_from_cache(&mut items).await?;

        if self.cache().is_some() && hits == items.len() {
            metrics.inc("cache_full_hit");
            return self.decode_response(&items);
        }

        if self.breaker().degrade() {
            metrics.inc("degrade_enter");
            if self.cache().is_none() {
                metrics.inc("degrade_no_cache");
                return Err(CallerError::NoCacheForDegrade);
            }
            debug!(items = items.len(), "degraded, serving from cache");
            self.persist(&mut items, true).await?;
            return self.decode_response(&items);
        }

        let response = match self.call_downstream(ctx, timeout, request).await {
            Ok(response) => response,
            Err(err) => {
                metrics.inc("downstream_fail");
                self.persist(&mut items, false).await?;
                return Err(CallerError::Downstream(err));
            }
        };

        if let Err(err) = self.merge_response(&response, &mut items) {
            self.persist(&mut items, false).await?;
            return Err(err);
        }

        self.persist(&mut items, false).await?;
        self.decode_response(&items)
    }

    /// Answer from the cache alone. Neither the downstream nor the admission controller is involved and nothing is
    /// written back.
    #[instrument(level = "trace", skip_all)]
    pub async fn call_in_cache(&self, request: &DS::Request) -> CallResult<DS::Response, DS> {
        self.metrics().inc("call_in_cache_enter");
        let mut items = self.encode_request(request)?;
        self.fill_from_cache(&mut items).await?;
        self.decode_response(&items)
    }

    fn encode_request(&self, request: &DS::Request) -> CallResult<Vec<Item>, DS> {
        let metrics = self.metrics();
        let items = self
            .request_codec()
            .encode(request)
            .inspect_err(|_| metrics.inc("encode_fail"))
            .map_err(CallerError::Encode)?;

        metrics.increment("enter_items", items.len() as u64);
        if items.is_empty() {
            metrics.inc("encode_empty");
            return Err(CallerError::Encode(CodecError::NoItems));
        }
        Ok(items)
    }

    // Only empty items are looked up. Misses and read errors leave the item as is; a corrupt hit fails the call.
    // Returns the number of items resolved from the cache.
    pub(crate) async fn fill_from_cache(&self, items: &mut [Item]) -> CallResult<usize, DS> {
        let Some(cache) = self.cache()
        else {
            return Ok(0);
        };
        let codec = self.item_codec();
        let metrics = self.metrics();

        let mut hits = 0;
        for item in items.iter_mut().filter(|i| i.is_empty()) {
            let key = codec.key_of(item).map_err(CallerError::Encode)?;
            let value = match cache.get(&key).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    metrics.inc("cache_miss");
                    continue;
                }
                Err(err) => {
                    metrics.inc("cache_read_fail");
                    debug!(%key, error = %err, "cache read failed, treating as a miss");
                    continue;
                }
            };

            metrics.inc("cache_hit");
            *item = codec
                .decode(&key, &value)
                .inspect_err(|_| metrics.inc("cache_decode_fail"))
                .map_err(|source| CallerError::CacheDecode { key, source })?;
            hits += 1;
        }
        Ok(hits)
    }

    /// Calls the downstream and reports the outcome to the admission controller.
    pub(crate) async fn call_downstream(
        &self,
        ctx: DS::Context,
        timeout: Duration,
        request: DS::Request,
    ) -> Result<DS::Response, DS::Error> {
        let started = Instant::now();
        let result = self.downstream().call(ctx, timeout, request).await;
        let outcome = Outcome::classify(started.elapsed(), timeout, result.is_err());
        if outcome == Outcome::Timeout {
            self.metrics().inc("downstream_timeout");
        }
        self.breaker().report(outcome);
        result
    }

    /// Replace items by key with those encoded from the response. Items whose key the response lacks keep their
    /// current state.
    pub(crate) fn merge_response(&self, response: &DS::Response, items: &mut [Item]) -> CallResult<(), DS> {
        let metrics = self.metrics();
        let fresh = self.response_codec().encode(response).map_err(CallerError::Encode)?;

        let mut by_key = HashMap::with_capacity(fresh.len());
        let mut invalid = 0;
        for item in fresh {
            if item.key.is_empty() {
                invalid += 1;
                continue;
            }
            by_key.insert(item.key.clone(), item);
        }
        metrics.increment("merge_invalid_key", invalid);

        let mut missing = 0;
        for item in items.iter_mut() {
            match by_key.get(&item.key) {
                Some(fresh) => *item = fresh.clone(),
                None => missing += 1,
            }
        }
        metrics.increment("merge_missing_key", missing);
        debug!(invalid, missing, "merged response into items");
        Ok(())
    }

    /// Write items to the cache. Items get the current time if they have no timestamp yet, or unconditionally when
    /// `force_timestamp` is set. Without a cache this is a no-op.
    pub(crate) async fn persist(&self, items: &mut [Item], force_timestamp: bool) -> Result<(), CacheError> {
        let Some(cache) = self.cache()
        else {
            return Ok(());
        };
        let codec = self.item_codec();
        let now = self.clock().now();

        for item in items.iter_mut() {
            if force_timestamp || !item.has_timestamp() {
                item.timestamp = now;
            }
            let (key, value) = codec.encode(item)?;
            cache
                .put(&key, value)
                .await
                .inspect_err(|_| self.metrics().inc("cache_write_fail"))?;
        }
        Ok(())
    }

    fn decode_response(&self, items: &[Item]) -> CallResult<DS::Response, DS> {
        self.response_codec()
            .decode(items)
            .inspect_err(|_| self.metrics().inc("decode_fail"))
            .map_err(CallerError::Decode)
    }
}
