//! rpc-meter Library
//!
//! Transparent instrumentation for RPC client connections: per-method
//! latency and outcome metrics for unary calls, and establishment metrics
//! for streams, reported to a pluggable metrics sink.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;

// Re-export commonly used types
pub use application::{InstrumentedConnection, InstrumentedStream, MethodRegistry};
pub use config::load_config;
pub use domain::entities::{Graph, MethodGraphs, Metric, MetricGroup, MetricKind};
pub use domain::ports::{
    CallOptions, ClientStream, Code, DialOptions, Dialer, MetricsSink, RpcChannel, RpcStatus,
    SinkError, StreamDescriptor,
};
pub use domain::value_objects::{CallKind, ConnectivityState, StreamState, Target};
