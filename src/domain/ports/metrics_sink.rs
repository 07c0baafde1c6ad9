//! Metrics Sink Port
//!
//! The external system that stores and exports metric series.

use crate::domain::entities::MetricGroup;
use async_trait::async_trait;

/// Why a sink refused a registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("metric group rejected: {0}")]
    Rejected(String),
    #[error("metrics sink unavailable: {0}")]
    Unavailable(String),
}

/// Sink for metric registrations and raw samples.
///
/// This is an outbound port: the instrumentation layer only registers
/// series and forwards samples, all aggregation happens on the other side.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Register the series of the given groups.
    ///
    /// Called at most once per method and call path for a connection.
    async fn setup(&self, groups: &[MetricGroup]) -> Result<(), SinkError>;

    /// Ingest one sample for a series. Must return promptly.
    fn notify(&self, title: &str, value: i64);
}
