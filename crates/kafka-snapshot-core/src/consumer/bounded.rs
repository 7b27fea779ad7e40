//! Truncation of a live partition stream at a frozen end offset.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::client::{RawRecord, RecordStream, Watermarks};
use crate::error::BrokerResult;

/// One partition's live record stream, truncated at the end offset frozen in
/// the snapshot.
///
/// Records are forwarded in arrival order through the first record whose
/// offset reaches the last frozen offset (`high - 1`); that record is
/// yielded and the stream terminates. The underlying stream is live and
/// would otherwise wait forever, so this truncation is the only thing that
/// ends it.
///
/// A partition that held no records at snapshot time (`high == low`)
/// terminates immediately, without polling the underlying stream at all.
pub struct BoundedPartitionStream {
    inner: RecordStream,
    last_offset: i64,
    done: bool,
}

impl BoundedPartitionStream {
    /// Bound `inner` by the frozen `bounds` of its partition.
    #[must_use]
    pub fn new(inner: RecordStream, bounds: Watermarks) -> Self {
        Self {
            inner,
            last_offset: bounds.high - 1,
            done: bounds.is_empty(),
        }
    }
}

impl Stream for BoundedPartitionStream {
    type Item = BrokerResult<RawRecord>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(record))) => {
                if record.offset >= this.last_offset {
                    this.done = true;
                }
                Poll::Ready(Some(Ok(record)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;

    use super::*;
    use crate::client::TopicPartition;
    use crate::error::BrokerError;

    fn record(offset: i64) -> RawRecord {
        RawRecord {
            topic_partition: TopicPartition::new("t", 0),
            offset,
            key: None,
            value: Some(Bytes::from(format!("v{offset}"))),
        }
    }

    /// A live stream: yields the given records, then stays pending forever.
    fn live_stream(records: Vec<BrokerResult<RawRecord>>) -> RecordStream {
        Box::pin(futures::stream::iter(records).chain(futures::stream::pending()))
    }

    async fn drain(mut stream: BoundedPartitionStream) -> Vec<BrokerResult<RawRecord>> {
        let mut out = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("bounded stream must terminate without waiting on the live tail")
            {
                Some(item) => out.push(item),
                None => return out,
            }
        }
    }

    #[tokio::test]
    async fn test_truncates_at_frozen_end_offset() {
        let records = (0..10).map(|o| Ok(record(o))).collect();
        let bounded =
            BoundedPartitionStream::new(live_stream(records), Watermarks { low: 0, high: 5 });

        let drained = drain(bounded).await;
        let offsets: Vec<i64> = drained.iter().map(|r| r.as_ref().unwrap().offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_terminates_even_when_no_more_records_arrive() {
        // Exactly the snapshotted records are present; the live tail never
        // produces more.
        let records = (0..5).map(|o| Ok(record(o))).collect();
        let bounded =
            BoundedPartitionStream::new(live_stream(records), Watermarks { low: 0, high: 5 });

        assert_eq!(drain(bounded).await.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_partition_terminates_without_polling() {
        let inner: RecordStream = Box::pin(futures::stream::poll_fn(|_| {
            panic!("empty partition must not be polled")
        }));
        let bounded = BoundedPartitionStream::new(inner, Watermarks { low: 3, high: 3 });

        assert!(drain(bounded).await.is_empty());
    }

    #[tokio::test]
    async fn test_inclusive_truncation_past_the_bound() {
        // The stream starts past the frozen end offset (records trimmed
        // concurrently): the first record crosses the bound, is yielded, and
        // the stream stops.
        let records = vec![Ok(record(9)), Ok(record(10))];
        let bounded =
            BoundedPartitionStream::new(live_stream(records), Watermarks { low: 0, high: 5 });

        let drained = drain(bounded).await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].as_ref().unwrap().offset, 9);
    }

    #[tokio::test]
    async fn test_trimmed_partition_respects_bounds() {
        let records = vec![Ok(record(3)), Ok(record(4)), Ok(record(5))];
        let bounded =
            BoundedPartitionStream::new(live_stream(records), Watermarks { low: 3, high: 5 });

        let drained = drain(bounded).await;
        let offsets: Vec<i64> = drained.iter().map(|r| r.as_ref().unwrap().offset).collect();
        assert_eq!(offsets, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let records = vec![
            Ok(record(0)),
            Err(BrokerError::Stream {
                topic: "t".to_string(),
                partition: 0,
                message: "broker went away".to_string(),
            }),
        ];
        let bounded =
            BoundedPartitionStream::new(live_stream(records), Watermarks { low: 0, high: 5 });

        let drained = drain(bounded).await;
        assert_eq!(drained.len(), 2);
        assert!(drained[0].is_ok());
        assert!(drained[1].is_err());
    }
}
