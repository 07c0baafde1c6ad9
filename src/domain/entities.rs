//! Domain Entities - Metric catalog
//!
//! Immutable descriptions of the metric series produced for one RPC method.
//! Series titles follow a fixed naming convention that downstream
//! dashboards depend on, so they are built in exactly one place.

use crate::domain::value_objects::{CallKind, CallOutcome, Target};
use serde::{Deserialize, Serialize};

/// Suffix of the unary success counter.
pub const UNARY_OK_SUFFIX: &str = "grpc_ok";
/// Suffix of the unary failure counter.
pub const UNARY_FAIL_SUFFIX: &str = "grpc_fail";
/// Suffix of the unary latency histogram.
pub const UNARY_LATENCY_SUFFIX: &str = "latency";
/// Suffix of the stream establishment success counter.
pub const STREAM_OK_SUFFIX: &str = "new_stream_ok";
/// Suffix of the stream establishment failure counter.
pub const STREAM_FAIL_SUFFIX: &str = "new_stream_fail";
/// Suffix of the stream establishment latency histogram.
pub const STREAM_LATENCY_SUFFIX: &str = "new_stream_latency";

pub const COUNT_UNIT: &str = "count";
pub const LATENCY_UNIT: &str = "microsecond";

/// Type of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Histogram,
}

/// A named, typed series of numeric samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub title: String,
    pub kind: MetricKind,
}

impl Metric {
    pub fn counter(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: MetricKind::Counter,
        }
    }

    pub fn histogram(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: MetricKind::Histogram,
        }
    }
}

/// A set of series rendered together on one chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub title: String,
    pub unit: String,
    pub metrics: Vec<Metric>,
}

/// The response and latency graphs belonging to one method on one call path.
///
/// The series titles are also held directly so the hot path never has to
/// index into the graph list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodGraphs {
    kind: CallKind,
    method: String,
    ok_title: String,
    fail_title: String,
    latency_title: String,
    graphs: Vec<Graph>,
}

impl MethodGraphs {
    /// Build the graphs for `method` on the given call path.
    pub fn new(kind: CallKind, method: &str) -> Self {
        let (scope, ok, fail, latency) = match kind {
            CallKind::Unary => (
                "gRPC",
                UNARY_OK_SUFFIX,
                UNARY_FAIL_SUFFIX,
                UNARY_LATENCY_SUFFIX,
            ),
            CallKind::Stream => (
                "New Stream",
                STREAM_OK_SUFFIX,
                STREAM_FAIL_SUFFIX,
                STREAM_LATENCY_SUFFIX,
            ),
        };

        let ok_title = series_title(method, ok);
        let fail_title = series_title(method, fail);
        let latency_title = series_title(method, latency);

        let graphs = vec![
            Graph {
                title: format!("{} Response", scope),
                unit: COUNT_UNIT.to_string(),
                metrics: vec![
                    Metric::counter(ok_title.clone()),
                    Metric::counter(fail_title.clone()),
                ],
            },
            Graph {
                title: match kind {
                    CallKind::Unary => "Latency".to_string(),
                    CallKind::Stream => "New Stream Latency".to_string(),
                },
                unit: LATENCY_UNIT.to_string(),
                metrics: vec![Metric::histogram(latency_title.clone())],
            },
        ];

        Self {
            kind,
            method: method.to_string(),
            ok_title,
            fail_title,
            latency_title,
            graphs,
        }
    }

    pub fn unary(method: &str) -> Self {
        Self::new(CallKind::Unary, method)
    }

    pub fn stream(method: &str) -> Self {
        Self::new(CallKind::Stream, method)
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Title of the counter a call with this outcome increments.
    pub fn counter_title(&self, outcome: CallOutcome) -> &str {
        match outcome {
            CallOutcome::Ok => &self.ok_title,
            CallOutcome::Fail => &self.fail_title,
        }
    }

    pub fn latency_title(&self) -> &str {
        &self.latency_title
    }

    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }

    /// Every series title owned by this method, in graph order.
    pub fn series_titles(&self) -> impl Iterator<Item = &str> {
        self.graphs
            .iter()
            .flat_map(|g| g.metrics.iter().map(|m| m.title.as_str()))
    }
}

/// The unit handed to the sink's registration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricGroup {
    pub name: String,
    pub graphs: Vec<Graph>,
}

impl MetricGroup {
    /// Group for one method's graphs, labelled with the connection target.
    pub fn for_method(target: &Target, graphs: &MethodGraphs) -> Self {
        Self {
            name: group_name(graphs.kind(), target),
            graphs: graphs.graphs().to_vec(),
        }
    }
}

/// `"gRPC (<target>)"` for unary groups, `"gRPC stream (<target>)"` for streams.
pub fn group_name(kind: CallKind, target: &Target) -> String {
    match kind {
        CallKind::Unary => format!("gRPC ({})", target),
        CallKind::Stream => format!("gRPC stream ({})", target),
    }
}

fn series_title(method: &str, suffix: &str) -> String {
    format!("{}.{}", method, suffix)
}
