/// The atomic cacheable unit.
///
/// Items are produced by a request codec for every logical sub-item of a request, filled from the cache, replaced by
/// fresh items from the downstream response and finally written back. The key must be derivable without the payload
/// because an empty item is still looked up in the cache by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Item {
    pub key:       String,
    /// Seconds since the Unix epoch. Zero or negative means "not stamped yet".
    pub timestamp: i64,
    pub payload:   Vec<u8>,
}

impl Item {
    /// An unresolved item: known key, no payload.
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self {
            key:       key.into(),
            timestamp: 0,
            payload:   Vec::new(),
        }
    }

    pub fn with_payload<K: Into<String>, P: Into<Vec<u8>>>(key: K, payload: P) -> Self {
        Self {
            key:       key.into(),
            timestamp: 0,
            payload:   payload.into(),
        }
    }

    pub fn stamped(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Empty payload is the "not yet resolved" sentinel.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn has_timestamp(&self) -> bool {
        self.timestamp > 0
    }
}
