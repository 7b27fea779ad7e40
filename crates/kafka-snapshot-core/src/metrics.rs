//! Prometheus metrics for the snapshot consumer.

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

/// Consumer metrics collection.
pub struct ConsumerMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Total fetches started.
    pub fetches_started: IntCounter,

    /// Total records consumed across all fetches.
    pub records_consumed: IntCounter,

    /// Total decoded bytes emitted across all fetches.
    pub bytes_emitted: IntCounter,

    /// Total fetches that ended with an error.
    pub fetch_errors: IntCounter,

    /// Fetches currently holding a broker subscription.
    pub active_fetches: IntGauge,
}

impl ConsumerMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique
    /// names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let fetches_started = IntCounter::new(
            "kafka_snapshot_fetches_total",
            "Total number of snapshot fetches started",
        )
        .expect("metric creation should succeed");

        let records_consumed = IntCounter::new(
            "kafka_snapshot_records_consumed_total",
            "Total number of records consumed",
        )
        .expect("metric creation should succeed");

        let bytes_emitted = IntCounter::new(
            "kafka_snapshot_bytes_emitted_total",
            "Total decoded bytes emitted",
        )
        .expect("metric creation should succeed");

        let fetch_errors = IntCounter::new(
            "kafka_snapshot_fetch_errors_total",
            "Total number of fetches that ended with an error",
        )
        .expect("metric creation should succeed");

        let active_fetches = IntGauge::new(
            "kafka_snapshot_active_fetches",
            "Fetches currently holding a broker subscription",
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(fetches_started.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(records_consumed.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(bytes_emitted.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(fetch_errors.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(active_fetches.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            fetches_started,
            records_consumed,
            bytes_emitted,
            fetch_errors,
            active_fetches,
        }
    }

    /// Record a fetch starting.
    pub fn record_fetch_started(&self) {
        self.fetches_started.inc();
    }

    /// Record one consumed record.
    pub fn record_record_consumed(&self) {
        self.records_consumed.inc();
    }

    /// Record emitted decoded bytes.
    pub fn record_bytes_emitted(&self, bytes: u64) {
        self.bytes_emitted.inc_by(bytes);
    }

    /// Record a fetch ending with an error.
    pub fn record_fetch_error(&self) {
        self.fetch_errors.inc();
    }

    /// Increment the active fetch gauge.
    pub fn inc_active_fetches(&self) {
        self.active_fetches.inc();
    }

    /// Decrement the active fetch gauge.
    pub fn dec_active_fetches(&self) {
        self.active_fetches.dec();
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ConsumerMetrics::new();
        assert!(metrics.encode().is_ok());
    }

    #[test]
    fn test_counters() {
        let metrics = ConsumerMetrics::new();
        metrics.record_fetch_started();
        metrics.record_record_consumed();
        metrics.record_bytes_emitted(1024);
        metrics.record_fetch_error();

        let output = metrics.encode().unwrap();
        assert!(output.contains("kafka_snapshot_fetches_total"));
        assert!(output.contains("kafka_snapshot_records_consumed_total"));
        assert!(output.contains("kafka_snapshot_bytes_emitted_total"));
        assert!(output.contains("kafka_snapshot_fetch_errors_total"));
    }

    #[test]
    fn test_active_fetch_gauge() {
        let metrics = ConsumerMetrics::new();
        metrics.inc_active_fetches();
        metrics.inc_active_fetches();
        metrics.dec_active_fetches();

        assert_eq!(metrics.active_fetches.get(), 1);
    }
}
