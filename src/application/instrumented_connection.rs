//! Instrumented Connection - Main application use case
//!
//! Wraps a transport channel so every unary call and every stream
//! establishment is timed and classified, then reported to the metrics sink.
//! Arguments, results, errors and streams pass through untouched.

use crate::application::call_recorder::CallRecorder;
use crate::application::instrumented_stream::InstrumentedStream;
use crate::application::method_registry::MethodRegistry;
use crate::domain::ports::{
    CallOptions, ClientStream, DialOptions, Dialer, MetricsSink, RpcChannel, RpcStatus,
    StreamDescriptor,
};
use crate::domain::value_objects::{CallKind, ConnectivityState, Target};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Drop-in replacement for an [`RpcChannel`] that reports per-method metrics.
///
/// This service:
/// 1. Lazily registers each method's graphs with the sink on first use
/// 2. Times the transport call and classifies its outcome
/// 3. Returns exactly what the transport returned
///
/// Each connection owns its own registry; dialing again starts from an
/// empty one.
pub struct InstrumentedConnection {
    inner: Arc<dyn RpcChannel>,
    target: Target,
    registry: MethodRegistry,
    sink: Arc<dyn MetricsSink>,
}

impl InstrumentedConnection {
    /// Dial `target` through `dialer` and wrap the resulting channel.
    ///
    /// Blocking behaviour is whatever `options` asks the dialer for, and a
    /// dial error is the dialer's error.
    pub async fn dial(
        dialer: &dyn Dialer,
        target: &str,
        options: &DialOptions,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, RpcStatus> {
        let inner = dialer.dial(target, options).await?;
        tracing::debug!("dialed {} (block={})", target, options.block);
        Ok(Self::wrap(inner, sink))
    }

    /// Wrap an already-established channel.
    pub fn wrap(inner: Arc<dyn RpcChannel>, sink: Arc<dyn MetricsSink>) -> Self {
        let target = Target::new(inner.target());
        Self {
            registry: MethodRegistry::new(target.clone(), sink.clone()),
            inner,
            target,
            sink,
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// The wrapped transport channel.
    pub fn inner(&self) -> &Arc<dyn RpcChannel> {
        &self.inner
    }
}

#[async_trait]
impl RpcChannel for InstrumentedConnection {
    fn target(&self) -> &str {
        self.target.as_str()
    }

    fn state(&self) -> ConnectivityState {
        self.inner.state()
    }

    async fn invoke(
        &self,
        method: &str,
        request: Bytes,
        options: &CallOptions,
    ) -> Result<Bytes, RpcStatus> {
        let registration = self.registry.handle(CallKind::Unary, method);

        let mut recorder = CallRecorder::new(self.sink.clone(), registration);
        recorder.ready().await;
        let result = self.inner.invoke(method, request, options).await;
        recorder.finish(&result);

        result
    }

    async fn new_stream(
        &self,
        desc: &StreamDescriptor,
        method: &str,
        options: &CallOptions,
    ) -> Result<Box<dyn ClientStream>, RpcStatus> {
        let registration = self.registry.handle(CallKind::Stream, method);

        let mut recorder = CallRecorder::new(self.sink.clone(), registration);
        recorder.ready().await;
        let result = self.inner.new_stream(desc, method, options).await;
        let elapsed = recorder.finish(&result);

        let stream = result?;
        tracing::debug!("stream {} established in {:?}", method, elapsed);

        Ok(Box::new(InstrumentedStream::new(stream)))
    }

    async fn close(&self) -> Result<(), RpcStatus> {
        tracing::debug!("closing connection to {}", self.target);
        self.inner.close().await
    }
}
