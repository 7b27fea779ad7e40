//! Record decoders.
//!
//! A decoder turns one raw record into zero or more output byte chunks. A
//! decode failure is terminal for the whole fetch; it is never retried or
//! skipped.

use std::sync::Arc;

use bytes::Bytes;

use crate::client::RawRecord;
use crate::config::DecoderKind;
use crate::error::DecodeError;

/// Converts a raw record into a finite sequence of output byte chunks.
pub trait RecordDecoder: Send + Sync {
    /// Decode one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be decoded; the error ends the
    /// fetch that observed it.
    fn decode(&self, record: &RawRecord) -> Result<Vec<Bytes>, DecodeError>;
}

/// Emits each record's key bytes. A record without a key is malformed for
/// this decoder.
pub struct RawKeyDecoder;

impl RecordDecoder for RawKeyDecoder {
    fn decode(&self, record: &RawRecord) -> Result<Vec<Bytes>, DecodeError> {
        match &record.key {
            Some(key) => Ok(vec![key.clone()]),
            None => Err(DecodeError::MissingKey {
                topic: record.topic_partition.topic.clone(),
                partition: record.topic_partition.partition,
                offset: record.offset,
            }),
        }
    }
}

/// Emits each record's value bytes. A tombstone is malformed for this
/// decoder.
pub struct RawValueDecoder;

impl RecordDecoder for RawValueDecoder {
    fn decode(&self, record: &RawRecord) -> Result<Vec<Bytes>, DecodeError> {
        match &record.value {
            Some(value) => Ok(vec![value.clone()]),
            None => Err(DecodeError::MissingValue {
                topic: record.topic_partition.topic.clone(),
                partition: record.topic_partition.partition,
                offset: record.offset,
            }),
        }
    }
}

impl DecoderKind {
    /// The decoder implementation selected by this configuration value.
    #[must_use]
    pub fn decoder(&self) -> Arc<dyn RecordDecoder> {
        match self {
            Self::RawKey => Arc::new(RawKeyDecoder),
            Self::RawValue => Arc::new(RawValueDecoder),
        }
    }
}
