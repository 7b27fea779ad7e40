//! Test utilities for exercising the bounded consumer.
//!
//! Provides an in-process mock cluster that:
//! - hosts topics with any number of partitions
//! - accepts record appends at any time, including after a snapshot was taken
//! - counts active subscriptions, so tests can verify that releasing a fetch
//!   releases its broker subscription
//!
//! This module is only available when compiling tests or when the `testing`
//! feature is enabled.

mod mock_cluster;

pub use mock_cluster::{MockBrokerClient, MockCluster};
