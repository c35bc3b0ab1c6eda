use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;
use std::time::Duration;

use crate::error::CacheError;
use crate::error::CodecError;
use crate::item::Item;

/// The call being decorated.
#[async_trait]
pub trait Downstream: Send + Sync + 'static {
    type Request: Send + Sync + 'static;
    type Response: Send + Sync + 'static;
    /// Per-call context. Background refreshes use `Default::default()`.
    type Context: Default + Send + Sync + 'static;
    type Error: Debug + Display + Send + Sync + 'static;

    /// May take up to about `timeout`. Enforcing the deadline is up to the implementation; the caller only compares
    /// the elapsed time against it afterwards.
    async fn call(
        &self,
        ctx: Self::Context,
        timeout: Duration,
        request: Self::Request,
    ) -> Result<Self::Response, Self::Error>;
}

/// Request <-> ordered list of items. Keys must agree with the item codec.
pub trait RequestCodec<Req>: Send + Sync + 'static {
    fn encode(&self, request: &Req) -> Result<Vec<Item>, CodecError>;
    fn decode(&self, items: &[Item]) -> Result<Req, CodecError>;
}

/// Response <-> ordered list of items.
pub trait ResponseCodec<Rsp>: Send + Sync + 'static {
    fn encode(&self, response: &Rsp) -> Result<Vec<Item>, CodecError>;
    fn decode(&self, items: &[Item]) -> Result<Rsp, CodecError>;
}

pub type CacheEntries<'a> = Box<dyn Iterator<Item = Result<(String, Vec<u8>), CacheError>> + Send + 'a>;

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Iterate over all entries. Stores that can't be iterated return `None`, which disables background refresh.
    ///
    /// Iteration ends with the iterator's `None`; yielding [`CacheError::IterationStopped`] has the same effect.
    fn entries(&self) -> Option<CacheEntries<'_>> {
        None
    }
}

pub trait StalenessCheck: Send + Sync + 'static {
    /// `now` is in seconds, taken from the caller's clock.
    fn needs_update(&self, item: &Item, now: i64) -> bool;
}

/// Fire-and-forget counters. Implementations must never block.
pub trait Metrics: Send + Sync + 'static {
    fn increment(&self, counter: &'static str, n: u64);

    #[inline]
    fn inc(&self, counter: &'static str) {
        self.increment(counter, 1)
    }
}
