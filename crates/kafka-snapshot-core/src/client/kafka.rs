//! Kafka-backed broker client, built on librdkafka via `rdkafka`.
//!
//! Transport concerns (connection management, TLS/SASL, fetch batching,
//! retries at the wire level) live inside librdkafka. This module maps the
//! [`BrokerClient`] capability interface onto it:
//!
//! - `subscribe` resolves the topic's partitions from metadata and assigns
//!   all of them from the beginning; no consumer-group rebalance protocol is
//!   involved, so the assignment is known as soon as `subscribe` returns.
//! - a dispatcher task routes records from the consumer into one channel per
//!   partition, preserving per-partition order.
//! - offsets are never committed (`enable.auto.commit=false`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{BrokerError, BrokerResult};

use super::{BrokerClient, BrokerConnector, RawRecord, RecordStream, TopicPartition, Watermarks};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects one [`KafkaBrokerClient`] per fetch, from a parsed [`Config`].
pub struct KafkaConnector {
    config: Config,
    request_timeout: Duration,
}

impl KafkaConnector {
    /// Create a connector for the given configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the timeout for metadata and watermark round-trips.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Translate the configuration into librdkafka properties.
    fn client_config(config: &Config) -> ClientConfig {
        let mut properties = ClientConfig::new();
        properties
            .set("bootstrap.servers", config.bootstrap_servers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("security.protocol", config.security_protocol.name());

        if let Some(sasl) = &config.sasl {
            properties
                .set("sasl.mechanisms", sasl.mechanism.mechanism_name())
                .set("sasl.username", sasl.username())
                .set("sasl.password", sasl.password());
        } else if config.security_protocol.requires_sasl() {
            warn!(
                protocol = config.security_protocol.name(),
                "security protocol requires SASL but no sasl configuration is present"
            );
        }

        properties
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    type Client = KafkaBrokerClient;

    async fn connect(&self) -> BrokerResult<KafkaBrokerClient> {
        let consumer: StreamConsumer =
            Self::client_config(&self.config)
                .create()
                .map_err(|e| BrokerError::Connect {
                    message: e.to_string(),
                })?;

        debug!(
            servers = %self.config.bootstrap_servers.join(","),
            protocol = self.config.security_protocol.name(),
            "created kafka consumer"
        );

        Ok(KafkaBrokerClient {
            consumer: Arc::new(consumer),
            routes: Arc::new(DashMap::new()),
            pending: DashMap::new(),
            assignment: RwLock::new(Vec::new()),
            token: CancellationToken::new(),
            request_timeout: self.request_timeout,
        })
    }
}

/// A [`BrokerClient`] backed by an rdkafka [`StreamConsumer`].
pub struct KafkaBrokerClient {
    consumer: Arc<StreamConsumer>,
    /// Per-partition record routes fed by the dispatcher task.
    routes: Arc<DashMap<TopicPartition, mpsc::UnboundedSender<BrokerResult<RawRecord>>>>,
    /// Receivers not yet claimed by `partition_stream`.
    pending: DashMap<TopicPartition, mpsc::UnboundedReceiver<BrokerResult<RawRecord>>>,
    assignment: RwLock<Vec<TopicPartition>>,
    token: CancellationToken,
    request_timeout: Duration,
}

impl KafkaBrokerClient {
    /// Route records from the consumer into the per-partition channels until
    /// the client is closed.
    fn spawn_dispatcher(&self) {
        let consumer = Arc::clone(&self.consumer);
        let routes = Arc::clone(&self.routes);
        let token = self.token.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = token.cancelled() => break,
                    message = consumer.recv() => message,
                };

                match message {
                    Ok(message) => {
                        let partition =
                            TopicPartition::new(message.topic(), message.partition());
                        let record = RawRecord {
                            topic_partition: partition.clone(),
                            offset: message.offset(),
                            key: message.key().map(Bytes::copy_from_slice),
                            value: message.payload().map(Bytes::copy_from_slice),
                        };
                        if let Some(route) = routes.get(&partition) {
                            // The receiver disappears once its bounded stream
                            // finished; records past the bound are dropped.
                            let _ = route.send(Ok(record));
                        } else {
                            trace!(partition = %partition, "dropped record for unrouted partition");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "consumer stream failed, ending all partition streams");
                        for entry in routes.iter() {
                            let partition = entry.key();
                            let _ = entry.value().send(Err(BrokerError::Stream {
                                topic: partition.topic.clone(),
                                partition: partition.partition,
                                message: e.to_string(),
                            }));
                        }
                        break;
                    }
                }
            }
        });
    }

    fn subscribe_error(topic: &str, message: impl Into<String>) -> BrokerError {
        BrokerError::Subscribe {
            topic: topic.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn subscribe(&self, topic: &str) -> BrokerResult<()> {
        let metadata = {
            let consumer = Arc::clone(&self.consumer);
            let topic_name = topic.to_string();
            let timeout = self.request_timeout;
            tokio::task::spawn_blocking(move || {
                consumer.fetch_metadata(Some(&topic_name), timeout)
            })
            .await
            .map_err(|e| Self::subscribe_error(topic, e.to_string()))?
            .map_err(|e| Self::subscribe_error(topic, e.to_string()))?
        };

        let topic_metadata = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .ok_or_else(|| Self::subscribe_error(topic, "topic not present in metadata"))?;

        if let Some(error) = topic_metadata.error() {
            return Err(Self::subscribe_error(topic, format!("{error:?}")));
        }
        if topic_metadata.partitions().is_empty() {
            return Err(Self::subscribe_error(topic, "topic has no partitions"));
        }

        let partitions: Vec<TopicPartition> = topic_metadata
            .partitions()
            .iter()
            .map(|p| TopicPartition::new(topic, p.id()))
            .collect();

        let mut list = TopicPartitionList::new();
        for partition in &partitions {
            list.add_partition_offset(&partition.topic, partition.partition, Offset::Beginning)
                .map_err(|e| Self::subscribe_error(topic, e.to_string()))?;
        }

        for partition in &partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            self.routes.insert(partition.clone(), tx);
            self.pending.insert(partition.clone(), rx);
        }

        self.consumer
            .assign(&list)
            .map_err(|e| Self::subscribe_error(topic, e.to_string()))?;

        debug!(topic, partitions = partitions.len(), "assigned topic partitions");

        *self.assignment.write().expect("assignment lock") = partitions;
        self.spawn_dispatcher();
        Ok(())
    }

    async fn assignment(&self) -> BrokerResult<Vec<TopicPartition>> {
        let assignment = self.assignment.read().expect("assignment lock").clone();
        if assignment.is_empty() {
            return Err(BrokerError::Assignment {
                message: "client is not subscribed to a topic".to_string(),
            });
        }
        Ok(assignment)
    }

    async fn watermarks(
        &self,
        partitions: &[TopicPartition],
    ) -> BrokerResult<HashMap<TopicPartition, Watermarks>> {
        let mut result = HashMap::with_capacity(partitions.len());
        for partition in partitions {
            let consumer = Arc::clone(&self.consumer);
            let topic = partition.topic.clone();
            let index = partition.partition;
            let timeout = self.request_timeout;

            let offset_error = |message: String| BrokerError::OffsetQuery {
                topic: partition.topic.clone(),
                partition: partition.partition,
                message,
            };

            let (low, high) = tokio::task::spawn_blocking(move || {
                consumer.fetch_watermarks(&topic, index, timeout)
            })
            .await
            .map_err(|e| offset_error(e.to_string()))?
            .map_err(|e| offset_error(e.to_string()))?;

            result.insert(partition.clone(), Watermarks { low, high });
        }
        Ok(result)
    }

    fn partition_stream(&self, partition: &TopicPartition) -> BrokerResult<RecordStream> {
        let (_, receiver) = self.pending.remove(partition).ok_or_else(|| {
            BrokerError::UnassignedPartition {
                topic: partition.topic.clone(),
                partition: partition.partition,
            }
        })?;

        Ok(Box::pin(futures::stream::unfold(
            receiver,
            |mut receiver| async move { receiver.recv().await.map(|item| (item, receiver)) },
        )))
    }

    fn close(&self) {
        self.token.cancel();
        self.routes.clear();
        // Clearing the assignment stops the background fetchers; the
        // consumer itself is dropped with the client.
        if let Err(e) = self.consumer.assign(&TopicPartitionList::new()) {
            debug!(error = %e, "clearing assignment on close failed");
        }
    }
}
