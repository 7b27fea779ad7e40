//! The bounded consumption core.
//!
//! [`BoundedConsumer::fetch`] turns "everything currently in topic T" into a
//! finite byte stream:
//!
//! 1. connect an exclusive broker client and subscribe to the topic
//! 2. freeze every assigned partition's end offset ([`OffsetSnapshot`])
//! 3. run one truncated partition stream per assignment
//!    ([`BoundedPartitionStream`]), each on its own task
//! 4. decode every record and merge the decoded chunks into one channel
//!
//! The merged stream is a scoped resource: dropping the returned
//! [`FetchStream`] on any exit path cancels all partition tasks and closes
//! the broker client, after which no further broker I/O occurs. No offset is
//! ever committed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{BrokerClient, BrokerConnector, TopicPartition};
use crate::decode::RecordDecoder;
use crate::error::FetchResult;
use crate::metrics::ConsumerMetrics;

mod bounded;
mod snapshot;

pub use bounded::BoundedPartitionStream;
pub use snapshot::OffsetSnapshot;

/// Capacity of the channel merging all partition tasks. Within one
/// partition task buffering is unbounded; this only shapes how far the
/// merged producers can run ahead of the consumer's pull rate.
const MERGE_CHANNEL_CAPACITY: usize = 256;

/// Bounded snapshot consumer; the sole public entry point of the core.
pub struct BoundedConsumer<N: BrokerConnector> {
    connector: N,
    decoder: Arc<dyn RecordDecoder>,
    metrics: Option<Arc<ConsumerMetrics>>,
}

impl<N: BrokerConnector> BoundedConsumer<N> {
    /// Create a consumer over the given connector and record decoder.
    pub fn new(connector: N, decoder: Arc<dyn RecordDecoder>) -> Self {
        Self {
            connector,
            decoder,
            metrics: None,
        }
    }

    /// Attach a metrics collection updated by every fetch.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ConsumerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch everything currently in `topic` as a finite byte stream.
    ///
    /// Each call owns an exclusive broker client and its own offset
    /// snapshot. Partitions are consumed concurrently, one task per
    /// partition; chunks from different partitions interleave arbitrarily
    /// while order within a partition is preserved. The first broker or
    /// decode error terminates the whole stream.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError::Broker`](crate::error::FetchError::Broker)
    /// if connecting, subscribing, or snapshotting offsets fails.
    pub async fn fetch(&self, topic: &str) -> FetchResult<FetchStream> {
        let result = self.fetch_inner(topic).await;
        if result.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.record_fetch_error();
            }
        }
        result
    }

    async fn fetch_inner(&self, topic: &str) -> FetchResult<FetchStream> {
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch_started();
        }

        let client: Arc<dyn BrokerClient> = Arc::new(self.connector.connect().await?);
        // The guard exists before the first fallible broker call so that
        // every exit path below releases the subscription.
        let guard = SubscriptionGuard::new(Arc::clone(&client), self.metrics.clone());

        client.subscribe(topic).await?;
        let snapshot = OffsetSnapshot::take(client.as_ref()).await?;
        debug!(topic, partitions = snapshot.len(), "offset snapshot taken");

        let (tx, rx) = mpsc::channel(MERGE_CHANNEL_CAPACITY);
        for (partition, bounds) in snapshot.iter() {
            let stream = client.partition_stream(partition)?;
            let bounded = BoundedPartitionStream::new(stream, bounds);
            tokio::spawn(consume_partition(
                partition.clone(),
                bounded,
                Arc::clone(&self.decoder),
                tx.clone(),
                guard.token.clone(),
                self.metrics.clone(),
            ));
        }
        drop(tx);

        Ok(FetchStream {
            receiver: rx,
            guard,
            done: false,
        })
    }
}

/// One partition's consuming task: drive the bounded stream, decode each
/// record, and push the chunks into the merge channel. The first error is
/// forwarded and cancels every sibling task.
async fn consume_partition(
    partition: TopicPartition,
    mut records: BoundedPartitionStream,
    decoder: Arc<dyn RecordDecoder>,
    tx: mpsc::Sender<FetchResult<Bytes>>,
    token: CancellationToken,
    metrics: Option<Arc<ConsumerMetrics>>,
) {
    loop {
        let next = tokio::select! {
            () = token.cancelled() => break,
            next = records.next() => next,
        };

        let record = match next {
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                warn!(partition = %partition, error = %e, "partition stream failed, ending fetch");
                if let Some(metrics) = &metrics {
                    metrics.record_fetch_error();
                }
                let _ = tx.send(Err(e.into())).await;
                token.cancel();
                break;
            }
            None => {
                debug!(partition = %partition, "partition drained to its snapshot bound");
                break;
            }
        };

        match decoder.decode(&record) {
            Ok(chunks) => {
                if let Some(metrics) = &metrics {
                    metrics.record_record_consumed();
                }
                for chunk in chunks {
                    if let Some(metrics) = &metrics {
                        metrics.record_bytes_emitted(chunk.len() as u64);
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        // Merged stream was dropped; nothing left to feed.
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(partition = %partition, error = %e, "record decode failed, ending fetch");
                if let Some(metrics) = &metrics {
                    metrics.record_fetch_error();
                }
                let _ = tx.send(Err(e.into())).await;
                token.cancel();
                break;
            }
        }
    }
}

/// Releases the broker subscription when the fetch ends, on every path.
struct SubscriptionGuard {
    client: Arc<dyn BrokerClient>,
    token: CancellationToken,
    metrics: Option<Arc<ConsumerMetrics>>,
}

impl SubscriptionGuard {
    fn new(client: Arc<dyn BrokerClient>, metrics: Option<Arc<ConsumerMetrics>>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.inc_active_fetches();
        }
        Self {
            client,
            token: CancellationToken::new(),
            metrics,
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.client.close();
        if let Some(metrics) = &self.metrics {
            metrics.dec_active_fetches();
        }
    }
}

/// The scoped byte stream returned by [`BoundedConsumer::fetch`].
///
/// Yields decoded chunks until every partition reaches its frozen end
/// offset, or until the first error, after which it is exhausted. Dropping
/// it cancels all partition tasks and closes the broker client.
pub struct FetchStream {
    receiver: mpsc::Receiver<FetchResult<Bytes>>,
    guard: SubscriptionGuard,
    done: bool,
}

impl std::fmt::Debug for FetchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Stream for FetchStream {
    type Item = FetchResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                // One bad record or broker failure ends the entire fetch;
                // chunks still queued from other partitions are discarded.
                this.done = true;
                this.guard.token.cancel();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
