//! Broker client abstraction.
//!
//! The bounded consumption core is written against the [`BrokerClient`]
//! capability interface only: subscribe, assignment, watermark lookup, and a
//! per-partition ordered record stream. The Kafka-backed implementation lives
//! in [`kafka`]; tests use the in-process mock in [`crate::testing`].

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::BrokerResult;

#[cfg(feature = "rdkafka-client")]
pub mod kafka;

/// One partition of a topic. Identity key; immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    /// The topic name.
    pub topic: String,
    /// The partition index within the topic.
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic partition.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// A raw record as produced by the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// The partition this record belongs to.
    pub topic_partition: TopicPartition,
    /// The record's position within its partition.
    pub offset: i64,
    /// The record key. `None` when the record was produced without a key.
    pub key: Option<Bytes>,
    /// The record value. `None` for tombstones.
    pub value: Option<Bytes>,
}

/// A partition's start and end offsets at one instant.
///
/// `high` is the offset one past the last record present; a partition with
/// `high == low` held no records at the instant of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// The offset of the earliest record still present.
    pub low: i64,
    /// The offset one past the last record present.
    pub high: i64,
}

impl Watermarks {
    /// Whether the partition held no records at the instant of the query.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }
}

/// An ordered stream of one partition's records.
///
/// Live: the stream does not terminate when it reaches the current end of
/// the partition, it waits for further records. Bounding is the consumer's
/// responsibility.
pub type RecordStream = Pin<Box<dyn Stream<Item = BrokerResult<RawRecord>> + Send>>;

/// Capability interface over the broker client collaborator.
///
/// One client instance serves exactly one fetch and is closed when the fetch
/// stream is released.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Subscribe to `topic` and resolve its partitions.
    async fn subscribe(&self, topic: &str) -> BrokerResult<()>;

    /// The partitions currently assigned to this client.
    async fn assignment(&self) -> BrokerResult<Vec<TopicPartition>>;

    /// Query the current watermarks of each given partition.
    async fn watermarks(
        &self,
        partitions: &[TopicPartition],
    ) -> BrokerResult<HashMap<TopicPartition, Watermarks>>;

    /// The live, ordered record stream of one assigned partition.
    fn partition_stream(&self, partition: &TopicPartition) -> BrokerResult<RecordStream>;

    /// Tear down the subscription.
    ///
    /// Synchronous and idempotent so it can run on every exit path,
    /// including `Drop`. After `close` returns no further broker I/O is
    /// initiated by this client.
    fn close(&self);
}

/// Creates one exclusive [`BrokerClient`] per fetch.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// The client type this connector produces.
    type Client: BrokerClient + 'static;

    /// Connect a fresh client.
    async fn connect(&self) -> BrokerResult<Self::Client>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_partition_display() {
        let tp = TopicPartition::new("orders", 3);
        assert_eq!(tp.to_string(), "orders/3");
    }

    #[test]
    fn test_watermarks_empty() {
        assert!(Watermarks { low: 5, high: 5 }.is_empty());
        assert!(!Watermarks { low: 0, high: 5 }.is_empty());
    }
}
