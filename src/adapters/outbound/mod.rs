mod dashmap_metrics_sink;
mod in_process_channel;
mod prometheus_metrics_sink;

pub use dashmap_metrics_sink::{
    DashMapMetricsSink, HistogramSummary, LatencyHistogram, Series, SeriesData, SinkSnapshot,
};
pub use in_process_channel::{InProcessChannel, InProcessDialer, InProcessServer, ServerStream};
pub use prometheus_metrics_sink::PrometheusMetricsSink;
