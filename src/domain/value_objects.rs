//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque address of the RPC endpoint a connection was dialed against.
///
/// Fixed at construction and used to label every metric group the
/// connection produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target(String);

impl Target {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Which call-initiation path a method was observed on.
///
/// Unary and streaming metrics live in separate namespaces so the same
/// method name never collides across the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Unary,
    Stream,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::Stream => "stream",
        }
    }
}

/// Classification of a finished call: no error is success, anything else fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    Fail,
}

impl CallOutcome {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Ok
        } else {
            Self::Fail
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Connectivity of the underlying transport, reported straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a single client stream.
///
/// ```text
/// Created -> Established -> Active -> Closed
///    \
///     `-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Established,
    Active,
    Closed,
    Failed,
}

impl StreamState {
    /// Whether `self -> next` is a legal edge of the lifecycle.
    ///
    /// Closing straight from `Established` is allowed (a stream that is
    /// opened and dropped without traffic).
    pub fn can_transition_to(&self, next: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Created, Established)
                | (Created, Failed)
                | (Established, Active)
                | (Established, Closed)
                | (Active, Active)
                | (Active, Closed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Illegal stream lifecycle edge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stream transition {from:?} -> {to:?}")]
pub struct StreamStateError {
    pub from: StreamState,
    pub to: StreamState,
}
