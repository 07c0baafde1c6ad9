//! Application Layer
//!
//! The instrumentation use case: registry, call timing, and the connection
//! and stream wrappers callers actually hold.

mod call_recorder;
mod instrumented_connection;
mod instrumented_stream;
mod method_registry;

pub use call_recorder::{micros, CallRecorder};
pub use instrumented_connection::InstrumentedConnection;
pub use instrumented_stream::InstrumentedStream;
pub use method_registry::{MethodRegistry, Registration, RegistrationHandle, RegistryStats};
