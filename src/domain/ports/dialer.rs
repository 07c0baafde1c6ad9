//! Dialer Port
//!
//! Establishes transport channels. Connection errors are the transport's
//! own and are surfaced unchanged by everything layered on top.

use crate::domain::ports::rpc_channel::{RpcChannel, RpcStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Options for establishing a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialOptions {
    /// Wait until the channel is ready before returning.
    /// When false, the channel connects in the background.
    pub block: bool,
    /// Upper bound on a blocking dial
    pub timeout: Option<Duration>,
}

impl DialOptions {
    pub fn blocking() -> Self {
        Self {
            block: true,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Creates channels to RPC targets.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        target: &str,
        options: &DialOptions,
    ) -> Result<Arc<dyn RpcChannel>, RpcStatus>;
}
