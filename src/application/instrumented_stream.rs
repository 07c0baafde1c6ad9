//! Instrumented Stream
//!
//! Handle returned for an established stream. Every data-plane operation is
//! forwarded to the transport's stream as-is; the handle only keeps
//! lifecycle bookkeeping alongside.

use crate::domain::ports::{ClientStream, RpcStatus};
use crate::domain::value_objects::{StreamState, StreamStateError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;
use uuid::Uuid;

/// Wrapper around an established [`ClientStream`].
///
/// Message counts and state are local to the handle and reported through
/// logs only; no per-message metric series are emitted.
pub struct InstrumentedStream {
    inner: Box<dyn ClientStream>,
    id: Uuid,
    state: StreamState,
    opened_at: Instant,
    sent: u64,
    received: u64,
}

impl InstrumentedStream {
    /// Wrap a stream the transport has just handed back.
    pub fn new(inner: Box<dyn ClientStream>) -> Self {
        let mut stream = Self {
            inner,
            id: Uuid::new_v4(),
            state: StreamState::Created,
            opened_at: Instant::now(),
            sent: 0,
            received: 0,
        };
        stream.observe(StreamState::Established);
        stream
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    pub fn messages_received(&self) -> u64 {
        self.received
    }

    fn advance(&mut self, next: StreamState) -> Result<(), StreamStateError> {
        if !self.state.can_transition_to(next) {
            return Err(StreamStateError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Move to `next`, or note the out-of-order operation and stay put.
    /// The transport decides whether the operation itself is valid.
    fn observe(&mut self, next: StreamState) {
        if let Err(e) = self.advance(next) {
            tracing::trace!(stream_id = %self.id, "{}", e);
            return;
        }
        if next == StreamState::Closed {
            tracing::debug!(
                stream_id = %self.id,
                "stream {} closed after {:?}: sent={} received={}",
                self.inner.method(),
                self.opened_at.elapsed(),
                self.sent,
                self.received
            );
        }
    }
}

#[async_trait]
impl ClientStream for InstrumentedStream {
    fn method(&self) -> &str {
        self.inner.method()
    }

    async fn send(&mut self, message: Bytes) -> Result<(), RpcStatus> {
        let result = self.inner.send(message).await;
        if result.is_ok() {
            self.sent += 1;
            self.observe(StreamState::Active);
        }
        result
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, RpcStatus> {
        let result = self.inner.recv().await;
        match &result {
            Ok(Some(_)) => {
                self.received += 1;
                self.observe(StreamState::Active);
            }
            // End of stream and stream errors both finish the call.
            Ok(None) | Err(_) => self.observe(StreamState::Closed),
        }
        result
    }

    async fn close_send(&mut self) -> Result<(), RpcStatus> {
        self.inner.close_send().await
    }

    async fn close(&mut self) -> Result<(), RpcStatus> {
        let result = self.inner.close().await;
        self.observe(StreamState::Closed);
        result
    }
}

impl Drop for InstrumentedStream {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(
                stream_id = %self.id,
                "stream {} dropped while {:?}",
                self.inner.method(),
                self.state
            );
        }
    }
}
