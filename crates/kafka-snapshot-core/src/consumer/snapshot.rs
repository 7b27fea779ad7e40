//! Offset snapshotting.
//!
//! A snapshot freezes the end offset of every assigned partition at one
//! instant. Records written to the broker after the snapshot is taken are
//! never consumed by the fetch that owns it, even when they arrive before
//! the partition stream reaches the frozen end.

use std::collections::HashMap;

use crate::client::{BrokerClient, TopicPartition, Watermarks};
use crate::error::BrokerResult;

/// An immutable map from partition to its frozen offsets.
///
/// Built exactly once per fetch; scoped to that fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSnapshot {
    offsets: HashMap<TopicPartition, Watermarks>,
}

impl OffsetSnapshot {
    /// Snapshot the current end offset of every partition assigned to
    /// `client`.
    ///
    /// The client must already be subscribed. Any assignment or offset
    /// lookup error is fatal to the fetch; nothing is retried here.
    ///
    /// # Errors
    ///
    /// Returns an error if the assignment or any watermark query fails.
    pub async fn take(client: &dyn BrokerClient) -> BrokerResult<Self> {
        let assignment = client.assignment().await?;
        let offsets = client.watermarks(&assignment).await?;
        Ok(Self { offsets })
    }

    /// The frozen watermarks of one partition, if it was assigned.
    #[must_use]
    pub fn watermarks(&self, partition: &TopicPartition) -> Option<Watermarks> {
        self.offsets.get(partition).copied()
    }

    /// The frozen end offset of one partition, if it was assigned.
    #[must_use]
    pub fn end_offset(&self, partition: &TopicPartition) -> Option<i64> {
        self.offsets.get(partition).map(|w| w.high)
    }

    /// The partitions covered by this snapshot, with their frozen offsets.
    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, Watermarks)> {
        self.offsets.iter().map(|(tp, w)| (tp, *w))
    }

    /// Number of partitions covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the snapshot covers no partitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl FromIterator<(TopicPartition, Watermarks)> for OffsetSnapshot {
    fn from_iter<I: IntoIterator<Item = (TopicPartition, Watermarks)>>(iter: I) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BrokerConnector;
    use crate::testing::MockCluster;

    #[tokio::test]
    async fn test_snapshot_covers_all_assigned_partitions() {
        let cluster = MockCluster::new();
        cluster.create_topic("t", 3).await;
        cluster.append("t", 0, None, Some(b"a")).await;
        cluster.append("t", 0, None, Some(b"b")).await;
        cluster.append("t", 2, None, Some(b"c")).await;

        let client = cluster.connect().await.unwrap();
        client.subscribe("t").await.unwrap();

        let snapshot = OffsetSnapshot::take(&client).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.end_offset(&TopicPartition::new("t", 0)), Some(2));
        assert_eq!(snapshot.end_offset(&TopicPartition::new("t", 1)), Some(0));
        assert_eq!(snapshot.end_offset(&TopicPartition::new("t", 2)), Some(1));
        assert_eq!(snapshot.end_offset(&TopicPartition::new("t", 9)), None);
    }

    #[tokio::test]
    async fn test_snapshot_ignores_later_appends() {
        let cluster = MockCluster::new();
        cluster.create_topic("t", 1).await;
        cluster.append("t", 0, None, Some(b"a")).await;

        let client = cluster.connect().await.unwrap();
        client.subscribe("t").await.unwrap();
        let snapshot = OffsetSnapshot::take(&client).await.unwrap();

        cluster.append("t", 0, None, Some(b"b")).await;

        assert_eq!(snapshot.end_offset(&TopicPartition::new("t", 0)), Some(1));
    }

    #[tokio::test]
    async fn test_snapshot_requires_subscription() {
        let cluster = MockCluster::new();
        cluster.create_topic("t", 1).await;

        let client = cluster.connect().await.unwrap();
        assert!(OffsetSnapshot::take(&client).await.is_err());
    }
}
