use crate::error::CodecError;
use crate::item::Item;

const TS_LEN: usize = 8;
const LEN_LEN: usize = 4;
const HEADER_LEN: usize = TS_LEN + LEN_LEN;

/// Turns an [`Item`] into a cache key/value pair and back.
pub trait ItemCodec: Send + Sync + 'static {
    /// Cache key of an item. Must not depend on the payload.
    fn key_of(&self, item: &Item) -> Result<String, CodecError> {
        Ok(item.key.clone())
    }

    fn encode(&self, item: &Item) -> Result<(String, Vec<u8>), CodecError>;
    fn decode(&self, key: &str, value: &[u8]) -> Result<Item, CodecError>;
}

/// Fixed framing: 8-byte big-endian timestamp, 4-byte big-endian payload length, raw payload.
///
/// The key is not part of the value; it travels as the cache key.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryItemCodec;

impl ItemCodec for BinaryItemCodec {
    fn encode(&self, item: &Item) -> Result<(String, Vec<u8>), CodecError> {
        let len = u32::try_from(item.payload.len()).map_err(|_| CodecError::PayloadTooLarge(item.payload.len()))?;
        let mut value = Vec::with_capacity(HEADER_LEN + item.payload.len());
        value.extend_from_slice(&(item.timestamp as u64).to_be_bytes());
        value.extend_from_slice(&len.to_be_bytes());
        value.extend_from_slice(&item.payload);
        Ok((self.key_of(item)?, value))
    }

    fn decode(&self, key: &str, value: &[u8]) -> Result<Item, CodecError> {
        let truncated = || CodecError::Truncated {
            needed: HEADER_LEN,
            got:    value.len(),
        };
        let (ts, rest) = value.split_first_chunk::<TS_LEN>().ok_or_else(truncated)?;
        let (len, payload) = rest.split_first_chunk::<LEN_LEN>().ok_or_else(truncated)?;
        let ts = u64::from_be_bytes(*ts);
        let len = u32::from_be_bytes(*len) as usize;

        let Some(payload) = payload.get(..len)
        else {
            return Err(CodecError::Truncated {
                needed: HEADER_LEN + len,
                got:    value.len(),
            });
        };

        Ok(Item {
            key:       key.to_owned(),
            timestamp: ts as i64,
            payload:   payload.to_vec(),
        })
    }
}
