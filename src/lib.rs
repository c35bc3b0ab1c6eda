//! # cached-caller
//!
//! A caching decorator for a downstream call: an RPC, a service or any async function whose requests and responses
//! can be split into independently cacheable items.
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - A downstream answers batched requests, e.g. "give me features for these 100 items".
//! - Each item of the answer can be cached on its own and is identified by a key derivable from the request alone.
//! - The downstream is not always healthy, and when it is not, stale data is better than no data.
//!
//! The decorator operates on the following principles:
//!
//! - It is downstream-agnostic: requests and responses are translated into [`Item`]s by user supplied codecs.
//! - It is storage-agnostic: any [`CacheStore`] will do. The default one is a [moka](https://crates.io/crates/moka)
//!   cache.
//! - Fully async.
//!
//! # The Call Path
//!
//! ```text
//! request -> request codec -> items -> fill from cache -> all resolved? ----------------------> response
//!                                                      -> degrade? -- yes -> write back -----> response
//!                                                                  -- no --> downstream -> merge -> write back -> response
//! ```
//!
//! Every downstream outcome (success, failure, timeout) is reported to an [admission controller](breaker). When the
//! failure or timeout rate gets past its threshold the controller hands out "degrade" permits, and calls holding a
//! permit are answered from the cache without touching the downstream.
//!
//! # Background Refresh
//!
//! With a [`StalenessCheck`] configured, a single background task periodically sweeps the cache and refreshes the
//! items it flags, in batches, through the same downstream. See [`CachedCaller::start_refresh()`].

pub mod breaker;
pub mod caller;
pub mod clock;
pub mod codec;
pub mod error;
pub mod item;
pub mod metrics;
pub mod refresh;
pub mod store;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use caller::CachedCaller;
#[doc(inline)]
pub use item::Item;
#[doc(inline)]
pub use traits::CacheStore;
#[doc(inline)]
pub use traits::Downstream;
#[doc(inline)]
pub use traits::StalenessCheck;

pub mod prelude {
    pub use crate::breaker::AdmissionControl;
    pub use crate::breaker::Breaker;
    pub use crate::breaker::BreakerConfig;
    pub use crate::caller::CachedCaller;
    pub use crate::caller::CachedCallerBuilder;
    pub use crate::caller::CallResult;
    pub use crate::clock::Clock;
    pub use crate::codec::BinaryItemCodec;
    pub use crate::codec::ItemCodec;
    pub use crate::error::CacheError;
    pub use crate::error::CallerError;
    pub use crate::error::CodecError;
    pub use crate::item::Item;
    pub use crate::refresh::MaxAge;
    pub use crate::store::MokaStore;
    pub use crate::traits::*;
    pub use crate::types::*;
}
