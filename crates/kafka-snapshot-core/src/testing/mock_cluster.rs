//! In-process mock broker cluster.
//!
//! Partition streams behave like the real thing: they are live, never
//! self-terminate, and wake up when records are appended. Only the bounded
//! consumer's truncation ends them, which is exactly what the tests need to
//! observe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, RwLock};

use crate::client::{
    BrokerClient, BrokerConnector, RawRecord, RecordStream, TopicPartition, Watermarks,
};
use crate::error::{BrokerError, BrokerResult};

#[derive(Clone)]
struct StoredRecord {
    offset: i64,
    key: Option<Bytes>,
    value: Option<Bytes>,
}

/// One mock partition: an append-only record log plus a wakeup for live
/// tailing readers.
struct MockPartition {
    records: RwLock<Vec<StoredRecord>>,
    appended: Notify,
}

impl MockPartition {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }

    async fn append(&self, key: Option<&[u8]>, value: Option<&[u8]>) -> i64 {
        let mut records = self.records.write().await;
        let offset = records.len() as i64;
        records.push(StoredRecord {
            offset,
            key: key.map(Bytes::copy_from_slice),
            value: value.map(Bytes::copy_from_slice),
        });
        self.appended.notify_waiters();
        offset
    }

    async fn watermarks(&self) -> Watermarks {
        let records = self.records.read().await;
        Watermarks {
            low: 0,
            high: records.len() as i64,
        }
    }

    /// Wait until a record exists at `index`, then return it.
    async fn wait_for(&self, index: usize) -> StoredRecord {
        loop {
            let notified = self.appended.notified();
            {
                let records = self.records.read().await;
                if let Some(record) = records.get(index) {
                    return record.clone();
                }
            }
            notified.await;
        }
    }
}

struct ClusterState {
    topics: RwLock<HashMap<String, Vec<Arc<MockPartition>>>>,
    active_subscriptions: AtomicUsize,
}

/// An in-process broker cluster implementing [`BrokerConnector`].
///
/// Cheap to clone; clones share the same topics and subscription count.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<ClusterState>,
}

impl MockCluster {
    /// Create an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(ClusterState {
                topics: RwLock::new(HashMap::new()),
                active_subscriptions: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a topic with the given number of partitions.
    pub async fn create_topic(&self, name: impl Into<String>, partitions: i32) {
        let partitions = (0..partitions).map(|_| Arc::new(MockPartition::new())).collect();
        self.state.topics.write().await.insert(name.into(), partitions);
    }

    /// Append a record to a partition, returning its offset.
    ///
    /// # Panics
    ///
    /// Panics if the topic or partition does not exist; tests create their
    /// topics up front.
    pub async fn append(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> i64 {
        let partition = {
            let topics = self.state.topics.read().await;
            let partitions = topics.get(topic).expect("topic exists");
            Arc::clone(partitions.get(partition as usize).expect("partition exists"))
        };
        partition.append(key, value).await
    }

    /// Number of clients currently holding a subscription.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.state.active_subscriptions.load(Ordering::SeqCst)
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for MockCluster {
    type Client = MockBrokerClient;

    async fn connect(&self) -> BrokerResult<MockBrokerClient> {
        self.state.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(MockBrokerClient {
            cluster: Arc::clone(&self.state),
            subscription: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

struct Subscription {
    topic: String,
    partitions: Vec<Arc<MockPartition>>,
}

/// A [`BrokerClient`] talking to a [`MockCluster`].
pub struct MockBrokerClient {
    cluster: Arc<ClusterState>,
    subscription: RwLock<Option<Subscription>>,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn subscribe(&self, topic: &str) -> BrokerResult<()> {
        let partitions = {
            let topics = self.cluster.topics.read().await;
            topics
                .get(topic)
                .cloned()
                .ok_or_else(|| BrokerError::Subscribe {
                    topic: topic.to_string(),
                    message: "unknown topic".to_string(),
                })?
        };
        *self.subscription.write().await = Some(Subscription {
            topic: topic.to_string(),
            partitions,
        });
        Ok(())
    }

    async fn assignment(&self) -> BrokerResult<Vec<TopicPartition>> {
        let subscription = self.subscription.read().await;
        let subscription = subscription.as_ref().ok_or_else(|| BrokerError::Assignment {
            message: "client is not subscribed to a topic".to_string(),
        })?;
        Ok((0..subscription.partitions.len())
            .map(|i| TopicPartition::new(subscription.topic.clone(), i as i32))
            .collect())
    }

    async fn watermarks(
        &self,
        partitions: &[TopicPartition],
    ) -> BrokerResult<HashMap<TopicPartition, Watermarks>> {
        let subscription = self.subscription.read().await;
        let subscription = subscription.as_ref().ok_or_else(|| BrokerError::Assignment {
            message: "client is not subscribed to a topic".to_string(),
        })?;

        let mut result = HashMap::with_capacity(partitions.len());
        for partition in partitions {
            let mock = subscription
                .partitions
                .get(partition.partition as usize)
                .filter(|_| partition.topic == subscription.topic)
                .ok_or_else(|| BrokerError::OffsetQuery {
                    topic: partition.topic.clone(),
                    partition: partition.partition,
                    message: "unknown partition".to_string(),
                })?;
            result.insert(partition.clone(), mock.watermarks().await);
        }
        Ok(result)
    }

    fn partition_stream(&self, partition: &TopicPartition) -> BrokerResult<RecordStream> {
        let unassigned = || BrokerError::UnassignedPartition {
            topic: partition.topic.clone(),
            partition: partition.partition,
        };

        // partition_stream is synchronous; try_read is safe because nothing
        // holds the subscription lock across an await at this point.
        let subscription = self.subscription.try_read().map_err(|_| unassigned())?;
        let subscription = subscription.as_ref().ok_or_else(unassigned)?;
        if subscription.topic != partition.topic {
            return Err(unassigned());
        }
        let mock = Arc::clone(
            subscription
                .partitions
                .get(partition.partition as usize)
                .ok_or_else(unassigned)?,
        );

        let topic_partition = partition.clone();
        Ok(Box::pin(futures::stream::unfold(
            (mock, 0usize),
            move |(mock, index)| {
                let topic_partition = topic_partition.clone();
                async move {
                    let record = mock.wait_for(index).await;
                    let raw = RawRecord {
                        topic_partition,
                        offset: record.offset,
                        key: record.key,
                        value: record.value,
                    };
                    Some((Ok(raw), (mock, index + 1)))
                }
            },
        )))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cluster.active_subscriptions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
