mod dialer;
mod metrics_sink;
mod rpc_channel;

pub use dialer::{DialOptions, Dialer};
pub use metrics_sink::{MetricsSink, SinkError};
pub use rpc_channel::{CallOptions, ClientStream, Code, RpcChannel, RpcStatus, StreamDescriptor};
