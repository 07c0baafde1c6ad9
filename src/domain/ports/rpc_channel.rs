//! RPC Channel Port
//!
//! The call-initiation surface of an RPC client connection. Transport
//! concerns (connection management, framing, retries, balancing) all live
//! behind this trait; callers only see opaque request and response payloads.

use crate::domain::value_objects::ConnectivityState;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Status codes reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error returned by the transport for a failed call, stream or dial.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rpc error: code = {code} desc = {message}")]
pub struct RpcStatus {
    pub code: Code,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }
}

/// Per-call options forwarded untouched to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Deadline for the call, enforced by the transport
    pub timeout: Option<Duration>,
    /// Request metadata (headers)
    pub metadata: Vec<(String, String)>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Shape of a streaming method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub stream_name: String,
    pub client_streams: bool,
    pub server_streams: bool,
}

impl StreamDescriptor {
    pub fn server_streaming(name: impl Into<String>) -> Self {
        Self {
            stream_name: name.into(),
            client_streams: false,
            server_streams: true,
        }
    }

    pub fn client_streaming(name: impl Into<String>) -> Self {
        Self {
            stream_name: name.into(),
            client_streams: true,
            server_streams: false,
        }
    }

    pub fn bidi(name: impl Into<String>) -> Self {
        Self {
            stream_name: name.into(),
            client_streams: true,
            server_streams: true,
        }
    }
}

/// A client connection to one RPC target.
///
/// Implementations must be safe for concurrent use; many callers share
/// one channel.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Address this channel was dialed against.
    fn target(&self) -> &str;

    /// Current connectivity of the channel.
    fn state(&self) -> ConnectivityState;

    /// Perform a unary call.
    async fn invoke(
        &self,
        method: &str,
        request: Bytes,
        options: &CallOptions,
    ) -> Result<Bytes, RpcStatus>;

    /// Open a stream for a streaming method.
    async fn new_stream(
        &self,
        desc: &StreamDescriptor,
        method: &str,
        options: &CallOptions,
    ) -> Result<Box<dyn ClientStream>, RpcStatus>;

    /// Tear down the channel. Calls in flight fail with the transport's error.
    async fn close(&self) -> Result<(), RpcStatus>;
}

/// An established client stream.
#[async_trait]
pub trait ClientStream: Send {
    /// Full method name the stream was opened for.
    fn method(&self) -> &str;

    /// Send one message to the server.
    async fn send(&mut self, message: Bytes) -> Result<(), RpcStatus>;

    /// Receive the next message. `Ok(None)` marks a clean end of stream.
    async fn recv(&mut self) -> Result<Option<Bytes>, RpcStatus>;

    /// Half-close: no more messages will be sent.
    async fn close_send(&mut self) -> Result<(), RpcStatus>;

    /// Abort the stream in both directions.
    async fn close(&mut self) -> Result<(), RpcStatus>;
}
