//! Bounded point-in-time snapshot consumption for Kafka topics.
//!
//! This library answers "give me everything currently in topic T" as a
//! finite byte stream instead of an unbounded live subscription: each
//! partition's end offset is frozen once per fetch, and consumption of that
//! partition stops as soon as the frozen offset is reached, even though the
//! broker keeps accepting new writes.
//!
//! # Architecture
//!
//! - [`config`] - Configuration parsing, validation, sanitization, and
//!   replacement
//! - [`error`] - Domain-specific error types
//! - [`client`] - Broker client capability interface and the Kafka-backed
//!   implementation
//! - [`consumer`] - Offset snapshotting, per-partition truncation, and the
//!   concurrent fan-in behind [`BoundedConsumer::fetch`]
//! - [`decode`] - Record decoders turning raw records into output bytes
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use kafka_snapshot_core::client::kafka::KafkaConnector;
//! use kafka_snapshot_core::{BoundedConsumer, Config};
//!
//! let config = Config::from_file("config.json")?;
//! let consumer = BoundedConsumer::new(
//!     KafkaConnector::new(&config),
//!     config.decoder.decoder(),
//! );
//!
//! let mut stream = consumer.fetch("orders").await?;
//! while let Some(chunk) = stream.next().await {
//!     // ...
//! }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod consumer;
pub mod decode;
pub mod error;
pub mod metrics;

/// Test utilities for exercising the bounded consumer.
///
/// This module is only available when compiling tests or when the `testing`
/// feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use client::{BrokerClient, BrokerConnector, RawRecord, TopicPartition, Watermarks};
pub use config::{Config, DecoderKind, FormatDescriptor};
pub use consumer::{BoundedConsumer, BoundedPartitionStream, FetchStream, OffsetSnapshot};
pub use decode::{RawKeyDecoder, RawValueDecoder, RecordDecoder};
pub use error::{BrokerError, ConfigError, DecodeError, FetchError, FetchResult};
pub use metrics::ConsumerMetrics;
