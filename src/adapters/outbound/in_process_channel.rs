//! In-Process Channel
//!
//! Loopback implementation of the transport ports. Method names are
//! dispatched to async handlers registered on an [`InProcessServer`];
//! streams are carried over tokio mpsc channels. Used to exercise the
//! instrumentation without a network.

use crate::domain::ports::{
    CallOptions, ClientStream, Code, DialOptions, Dialer, RpcChannel, RpcStatus,
    StreamDescriptor,
};
use crate::domain::value_objects::ConnectivityState;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Buffered messages per stream direction.
const STREAM_BUFFER: usize = 32;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
type UnaryHandler = Arc<dyn Fn(Bytes) -> BoxFuture<Result<Bytes, RpcStatus>> + Send + Sync>;
type StreamHandler = Arc<dyn Fn(ServerStream) -> BoxFuture<Result<(), RpcStatus>> + Send + Sync>;

/// Server side of one in-process stream.
pub struct ServerStream {
    inbound: mpsc::Receiver<Bytes>,
    outbound: mpsc::Sender<Result<Bytes, RpcStatus>>,
}

impl ServerStream {
    /// Next client message, `None` once the client half-closes.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Send a message to the client.
    pub async fn send(&self, message: Bytes) -> Result<(), RpcStatus> {
        self.outbound
            .send(Ok(message))
            .await
            .map_err(|_| RpcStatus::cancelled("client went away"))
    }
}

/// Table of handlers served in-process.
#[derive(Default)]
pub struct InProcessServer {
    unary: DashMap<String, UnaryHandler>,
    streams: DashMap<String, StreamHandler>,
}

impl InProcessServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a unary method.
    pub fn unary<F, Fut>(self, method: &str, handler: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, RpcStatus>> + Send + 'static,
    {
        let handler: UnaryHandler =
            Arc::new(move |req: Bytes| -> BoxFuture<Result<Bytes, RpcStatus>> {
                Box::pin(handler(req))
            });
        self.unary.insert(method.to_string(), handler);
        self
    }

    /// Serve a streaming method. Returning an error ends the stream with it.
    pub fn stream<F, Fut>(self, method: &str, handler: F) -> Self
    where
        F: Fn(ServerStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcStatus>> + Send + 'static,
    {
        let handler: StreamHandler =
            Arc::new(move |s: ServerStream| -> BoxFuture<Result<(), RpcStatus>> {
                Box::pin(handler(s))
            });
        self.streams.insert(method.to_string(), handler);
        self
    }

    fn unary_handler(&self, method: &str) -> Option<UnaryHandler> {
        self.unary.get(method).map(|h| h.clone())
    }

    fn stream_handler(&self, method: &str) -> Option<StreamHandler> {
        self.streams.get(method).map(|h| h.clone())
    }
}

/// Client channel to an [`InProcessServer`].
///
/// A channel without a server behaves like one whose peer is unreachable:
/// every call fails with `Unavailable`.
pub struct InProcessChannel {
    target: String,
    server: Option<Arc<InProcessServer>>,
    state: Mutex<ConnectivityState>,
}

impl InProcessChannel {
    pub fn connect(target: impl Into<String>, server: Arc<InProcessServer>) -> Self {
        Self {
            target: target.into(),
            server: Some(server),
            state: Mutex::new(ConnectivityState::Idle),
        }
    }

    pub fn unreachable(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            server: None,
            state: Mutex::new(ConnectivityState::TransientFailure),
        }
    }

    /// Resolve the server for a new call, updating connectivity on the way.
    fn server(&self) -> Result<Arc<InProcessServer>, RpcStatus> {
        let mut state = self.state.lock();
        if *state == ConnectivityState::Shutdown {
            return Err(RpcStatus::unavailable("channel is closed"));
        }
        match &self.server {
            Some(server) => {
                *state = ConnectivityState::Ready;
                Ok(server.clone())
            }
            None => Err(RpcStatus::unavailable(format!(
                "connection refused: {}",
                self.target
            ))),
        }
    }
}

#[async_trait]
impl RpcChannel for InProcessChannel {
    fn target(&self) -> &str {
        &self.target
    }

    fn state(&self) -> ConnectivityState {
        *self.state.lock()
    }

    async fn invoke(
        &self,
        method: &str,
        request: Bytes,
        options: &CallOptions,
    ) -> Result<Bytes, RpcStatus> {
        let handler = self
            .server()?
            .unary_handler(method)
            .ok_or_else(|| RpcStatus::unimplemented(format!("unknown method {}", method)))?;

        match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, handler(request))
                .await
                .map_err(|_| RpcStatus::deadline_exceeded("context deadline exceeded"))?,
            None => handler(request).await,
        }
    }

    async fn new_stream(
        &self,
        desc: &StreamDescriptor,
        method: &str,
        _options: &CallOptions,
    ) -> Result<Box<dyn ClientStream>, RpcStatus> {
        let handler = self
            .server()?
            .stream_handler(method)
            .ok_or_else(|| RpcStatus::unimplemented(format!("unknown method {}", method)))?;

        let (in_tx, in_rx) = mpsc::channel(STREAM_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);

        let status_tx = out_tx.clone();
        let task = tokio::spawn(async move {
            let server_stream = ServerStream {
                inbound: in_rx,
                outbound: out_tx,
            };
            if let Err(status) = handler(server_stream).await {
                let _ = status_tx.send(Err(status)).await;
            }
        });

        tracing::trace!("in-process stream {} opened", desc.stream_name);

        Ok(Box::new(InProcessStream {
            method: method.to_string(),
            tx: Some(in_tx),
            rx: out_rx,
            task,
        }))
    }

    async fn close(&self) -> Result<(), RpcStatus> {
        *self.state.lock() = ConnectivityState::Shutdown;
        Ok(())
    }
}

/// Client side of one in-process stream.
struct InProcessStream {
    method: String,
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Result<Bytes, RpcStatus>>,
    task: JoinHandle<()>,
}

#[async_trait]
impl ClientStream for InProcessStream {
    fn method(&self) -> &str {
        &self.method
    }

    async fn send(&mut self, message: Bytes) -> Result<(), RpcStatus> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RpcStatus::new(Code::Internal, "send after close_send"))?;
        tx.send(message)
            .await
            .map_err(|_| RpcStatus::new(Code::Aborted, "server closed the stream"))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, RpcStatus> {
        match self.rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(status)) => Err(status),
            None => Ok(None),
        }
    }

    async fn close_send(&mut self) -> Result<(), RpcStatus> {
        self.tx = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RpcStatus> {
        self.tx = None;
        self.rx.close();
        self.task.abort();
        Ok(())
    }
}

impl Drop for InProcessStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Dialer resolving targets to registered in-process servers.
#[derive(Default)]
pub struct InProcessDialer {
    servers: DashMap<String, Arc<InProcessServer>>,
    registered: Notify,
}

impl InProcessDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `server` reachable at `target`, waking any blocked dials.
    pub fn register(&self, target: &str, server: InProcessServer) {
        self.servers.insert(target.to_string(), Arc::new(server));
        self.registered.notify_waiters();
    }

    fn lookup(&self, target: &str) -> Option<Arc<InProcessServer>> {
        self.servers.get(target).map(|s| s.clone())
    }

    async fn wait_for(&self, target: &str) -> Arc<InProcessServer> {
        loop {
            let notified = self.registered.notified();
            if let Some(server) = self.lookup(target) {
                return server;
            }
            notified.await;
        }
    }

    async fn wait_with_timeout(
        &self,
        target: &str,
        timeout: Option<Duration>,
    ) -> Result<Arc<InProcessServer>, RpcStatus> {
        match timeout {
            Some(t) => tokio::time::timeout(t, self.wait_for(target))
                .await
                .map_err(|_| RpcStatus::deadline_exceeded(format!("dial {} timed out", target))),
            None => Ok(self.wait_for(target).await),
        }
    }
}

#[async_trait]
impl Dialer for InProcessDialer {
    async fn dial(
        &self,
        target: &str,
        options: &DialOptions,
    ) -> Result<Arc<dyn RpcChannel>, RpcStatus> {
        if options.block {
            let server = self.wait_with_timeout(target, options.timeout).await?;
            let channel = InProcessChannel::connect(target, server);
            *channel.state.lock() = ConnectivityState::Ready;
            return Ok(Arc::new(channel));
        }

        let channel = match self.lookup(target) {
            Some(server) => InProcessChannel::connect(target, server),
            None => InProcessChannel::unreachable(target),
        };
        Ok(Arc::new(channel))
    }
}
