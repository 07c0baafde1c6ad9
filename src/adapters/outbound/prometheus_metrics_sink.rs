//! Prometheus Metrics Sink
//!
//! Implements MetricsSink with Prometheus text exposition.

use crate::adapters::outbound::dashmap_metrics_sink::{DashMapMetricsSink, SeriesData};
use crate::domain::entities::MetricGroup;
use crate::domain::ports::{MetricsSink, SinkError};
use async_trait::async_trait;
use std::sync::atomic::Ordering;

const QUANTILES: &[f64] = &[0.5, 0.9, 0.99];

/// Prometheus-compatible metrics sink.
///
/// Stores series in a [`DashMapMetricsSink`] and renders them for
/// scraping. Counters become `rpc_meter_calls_total`, histograms a
/// `rpc_meter_latency_microseconds` summary, both labelled with the group
/// and series title they were registered under.
pub struct PrometheusMetricsSink {
    store: DashMapMetricsSink,
    /// Instance label for metrics
    instance: String,
}

impl PrometheusMetricsSink {
    /// Create a new Prometheus metrics sink.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            store: DashMapMetricsSink::new(),
            instance: instance.into(),
        }
    }

    /// The backing in-memory store.
    pub fn store(&self) -> &DashMapMetricsSink {
        &self.store
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut counters = Vec::new();
        let mut summaries = Vec::new();

        self.store.for_each_series(|title, series| {
            let labels = format!(
                "instance=\"{}\",group=\"{}\",series=\"{}\"",
                escape_label(&self.instance),
                escape_label(&series.group),
                escape_label(title)
            );
            match &series.data {
                SeriesData::Counter(c) => {
                    counters.push((labels, c.load(Ordering::Relaxed)));
                }
                SeriesData::Histogram(h) => {
                    let h = h.lock();
                    let quantiles: Vec<u64> =
                        QUANTILES.iter().map(|q| h.value_at_quantile(*q)).collect();
                    summaries.push((labels, quantiles, h.sum(), h.count()));
                }
            }
        });

        counters.sort();
        summaries.sort();

        let mut output = String::new();

        output.push_str("# HELP rpc_meter_calls_total RPC outcomes per series\n");
        output.push_str("# TYPE rpc_meter_calls_total counter\n");
        for (labels, value) in &counters {
            output.push_str(&format!("rpc_meter_calls_total{{{}}} {}\n", labels, value));
        }

        output.push_str(
            "# HELP rpc_meter_latency_microseconds RPC latency per series in microseconds\n",
        );
        output.push_str("# TYPE rpc_meter_latency_microseconds summary\n");
        for (labels, quantiles, sum, count) in &summaries {
            for (q, value) in QUANTILES.iter().zip(quantiles) {
                output.push_str(&format!(
                    "rpc_meter_latency_microseconds{{{},quantile=\"{}\"}} {}\n",
                    labels, q, value
                ));
            }
            output.push_str(&format!(
                "rpc_meter_latency_microseconds_sum{{{}}} {}\n",
                labels, sum
            ));
            output.push_str(&format!(
                "rpc_meter_latency_microseconds_count{{{}}} {}\n",
                labels, count
            ));
        }

        output.push_str("# HELP rpc_meter_dropped_samples_total Samples for unregistered series\n");
        output.push_str("# TYPE rpc_meter_dropped_samples_total counter\n");
        output.push_str(&format!(
            "rpc_meter_dropped_samples_total{{instance=\"{}\"}} {}\n",
            escape_label(&self.instance),
            self.store.dropped()
        ));

        output
    }
}

#[async_trait]
impl MetricsSink for PrometheusMetricsSink {
    async fn setup(&self, groups: &[MetricGroup]) -> Result<(), SinkError> {
        self.store.setup(groups).await
    }

    fn notify(&self, title: &str, value: i64) {
        self.store.notify(title, value);
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
