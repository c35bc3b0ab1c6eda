use std::error::Error as StdError;
use std::fmt::Debug;
use std::fmt::Display;

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Failures of item, request and response codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec produced no cacheable items")]
    NoItems,

    #[error("truncated item value: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("payload of {0} bytes does not fit a 32-bit length prefix")]
    PayloadTooLarge(usize),

    /// Application codec failure.
    #[error("{0}")]
    Other(BoxError),
}

impl CodecError {
    pub fn other<E: Into<BoxError>>(err: E) -> Self {
        Self::Other(err.into())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// End of cache iteration. Not a failure.
    #[error("cache iteration stopped")]
    IterationStopped,

    #[error("cache entry encoding failed: {0}")]
    Encode(#[from] CodecError),

    #[error("cache backend failure: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn backend<S: ToString>(msg: S) -> Self {
        Self::Backend(msg.to_string())
    }
}

/// Errors surfaced by [`CachedCaller`](crate::CachedCaller). `E` is the downstream error type.
#[derive(Debug, Error)]
pub enum CallerError<E>
where
    E: Debug + Display,
{
    /// Request or response could not be turned into items, or the request produced none.
    #[error("encoding failed: {0}")]
    Encode(#[source] CodecError),

    #[error("cached entry '{key}' is corrupt: {source}")]
    CacheDecode {
        key:    String,
        #[source]
        source: CodecError,
    },

    #[error("degrade granted but no cache is configured")]
    NoCacheForDegrade,

    #[error("downstream call failed: {0}")]
    Downstream(E),

    #[error("cache write failed: {0}")]
    CacheWrite(#[from] CacheError),

    #[error("response decoding failed: {0}")]
    Decode(#[source] CodecError),
}

impl<E> CallerError<E>
where
    E: Debug + Display,
{
    pub fn is_downstream(&self) -> bool {
        matches!(self, Self::Downstream(_))
    }
}
