//! Integration tests for the bounded consumption core.
//!
//! All tests run against the in-process mock cluster; its partition streams
//! are live and never self-terminate, so every completed fetch here proves
//! the snapshot bound did the terminating.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;

use kafka_snapshot_core::consumer::{BoundedConsumer, FetchStream};
use kafka_snapshot_core::decode::{RawKeyDecoder, RawValueDecoder};
use kafka_snapshot_core::error::{BrokerError, DecodeError, FetchError};
use kafka_snapshot_core::metrics::ConsumerMetrics;
use kafka_snapshot_core::testing::MockCluster;

const FETCH_DEADLINE: Duration = Duration::from_secs(5);

fn value_consumer(cluster: &MockCluster) -> BoundedConsumer<MockCluster> {
    BoundedConsumer::new(cluster.clone(), Arc::new(RawValueDecoder))
}

/// Drain the stream, panicking on errors or if it does not terminate.
async fn collect_chunks(stream: FetchStream) -> Vec<Bytes> {
    tokio::time::timeout(
        FETCH_DEADLINE,
        stream.map(|item| item.expect("chunk")).collect::<Vec<_>>(),
    )
    .await
    .expect("fetch must terminate at the snapshot bound")
}

fn as_strings(chunks: &[Bytes]) -> Vec<String> {
    chunks
        .iter()
        .map(|c| String::from_utf8(c.to_vec()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_fetch_stops_at_snapshot_bound() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 1).await;
    for i in 0..5 {
        cluster
            .append("t", 0, None, Some(format!("v{i}").as_bytes()))
            .await;
    }

    let consumer = value_consumer(&cluster);
    // The snapshot is frozen inside fetch, before the stream is returned.
    let stream = consumer.fetch("t").await.unwrap();

    // Records appended after the snapshot must never be observed, even
    // though they arrive long before the stream is drained.
    for i in 5..10 {
        cluster
            .append("t", 0, None, Some(format!("v{i}").as_bytes()))
            .await;
    }

    let chunks = collect_chunks(stream).await;
    assert_eq!(as_strings(&chunks), vec!["v0", "v1", "v2", "v3", "v4"]);
}

#[tokio::test]
async fn test_zero_record_partition_yields_nothing_and_does_not_block() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 2).await;
    cluster.append("t", 0, None, Some(b"only")).await;
    // Partition 1 stays empty.

    let consumer = value_consumer(&cluster);
    let chunks = collect_chunks(consumer.fetch("t").await.unwrap()).await;
    assert_eq!(as_strings(&chunks), vec!["only"]);
}

#[tokio::test]
async fn test_empty_topic_yields_empty_stream() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 3).await;

    let consumer = value_consumer(&cluster);
    let chunks = collect_chunks(consumer.fetch("t").await.unwrap()).await;
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_partitions_merge_with_per_partition_order() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 3).await;
    for partition in 0..3 {
        for offset in 0..5 {
            cluster
                .append(
                    "t",
                    partition,
                    None,
                    Some(format!("p{partition}o{offset}").as_bytes()),
                )
                .await;
        }
    }

    let consumer = value_consumer(&cluster);
    let chunks = as_strings(&collect_chunks(consumer.fetch("t").await.unwrap()).await);
    assert_eq!(chunks.len(), 15);

    // No ordering across partitions, but strict offset order within each.
    for partition in 0..3 {
        let prefix = format!("p{partition}o");
        let within: Vec<&String> = chunks.iter().filter(|c| c.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..5).map(|o| format!("p{partition}o{o}")).collect();
        assert_eq!(within.len(), 5, "partition {partition} lost records");
        for (got, want) in within.iter().zip(expected.iter()) {
            assert_eq!(*got, want, "partition {partition} order broken");
        }
    }
}

#[tokio::test]
async fn test_decode_failure_ends_the_whole_fetch() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 2).await;
    // Partition 0 holds plenty of valid records.
    for i in 0..100 {
        cluster
            .append("t", 0, None, Some(format!("ok{i}").as_bytes()))
            .await;
    }
    // Partition 1 holds a tombstone the value decoder cannot decode.
    cluster.append("t", 1, Some(b"k"), Some(b"fine")).await;
    cluster.append("t", 1, Some(b"k"), None).await;
    cluster.append("t", 1, Some(b"k"), Some(b"never-reached")).await;

    let consumer = value_consumer(&cluster);
    let mut stream = consumer.fetch("t").await.unwrap();

    let mut error = None;
    while let Some(item) = tokio::time::timeout(FETCH_DEADLINE, stream.next())
        .await
        .expect("fetch must terminate after the decode error")
    {
        match item {
            Ok(_) => {}
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    match error.expect("the decode error must surface") {
        FetchError::Decode(DecodeError::MissingValue {
            topic,
            partition,
            offset,
        }) => {
            assert_eq!(topic, "t");
            assert_eq!(partition, 1);
            assert_eq!(offset, 1);
        }
        other => panic!("expected a decode error, got {other:?}"),
    }

    // The error is terminal: the stream is exhausted even though partition 0
    // may still have unconsumed bounded records.
    let after = tokio::time::timeout(FETCH_DEADLINE, stream.next())
        .await
        .expect("exhausted stream must not block");
    assert!(after.is_none());

    drop(stream);
    assert_eq!(cluster.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_dropping_the_stream_releases_the_subscription() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 1).await;
    for i in 0..1000 {
        cluster
            .append("t", 0, None, Some(format!("v{i}").as_bytes()))
            .await;
    }

    let consumer = value_consumer(&cluster);
    let mut stream = consumer.fetch("t").await.unwrap();
    assert_eq!(cluster.active_subscriptions(), 1);

    // Consume a single chunk, then cancel mid-fetch.
    let first = tokio::time::timeout(FETCH_DEADLINE, stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first, Bytes::from_static(b"v0"));

    drop(stream);
    assert_eq!(cluster.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_failed_fetch_releases_the_subscription() {
    let cluster = MockCluster::new();

    let consumer = value_consumer(&cluster);
    let err = consumer.fetch("missing").await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::Broker(BrokerError::Subscribe { .. })
    ));
    assert_eq!(cluster.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_key_decoder_end_to_end() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 1).await;
    cluster.append("t", 0, Some(b"k0"), Some(b"v0")).await;
    cluster.append("t", 0, Some(b"k1"), Some(b"v1")).await;

    let consumer = BoundedConsumer::new(cluster.clone(), Arc::new(RawKeyDecoder));
    let chunks = collect_chunks(consumer.fetch("t").await.unwrap()).await;
    assert_eq!(as_strings(&chunks), vec!["k0", "k1"]);
}

#[tokio::test]
async fn test_metrics_track_a_full_fetch() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 1).await;
    cluster.append("t", 0, None, Some(b"abc")).await;
    cluster.append("t", 0, None, Some(b"de")).await;

    let metrics = Arc::new(ConsumerMetrics::new());
    let consumer = value_consumer(&cluster).with_metrics(Arc::clone(&metrics));

    let stream = consumer.fetch("t").await.unwrap();
    assert_eq!(metrics.active_fetches.get(), 1);

    let chunks = collect_chunks(stream).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(metrics.fetches_started.get(), 1);
    assert_eq!(metrics.records_consumed.get(), 2);
    assert_eq!(metrics.bytes_emitted.get(), 5);
    assert_eq!(metrics.active_fetches.get(), 0);
}

#[tokio::test]
async fn test_concurrent_fetches_are_independent() {
    let cluster = MockCluster::new();
    cluster.create_topic("t", 1).await;
    for i in 0..10 {
        cluster
            .append("t", 0, None, Some(format!("v{i}").as_bytes()))
            .await;
    }

    let consumer = value_consumer(&cluster);
    let first = consumer.fetch("t").await.unwrap();
    let second = consumer.fetch("t").await.unwrap();
    assert_eq!(cluster.active_subscriptions(), 2);

    let (a, b) = tokio::join!(collect_chunks(first), collect_chunks(second));
    assert_eq!(a, b);
    assert_eq!(cluster.active_subscriptions(), 0);
}
