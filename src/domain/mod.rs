//! Domain Layer
//!
//! Metric catalog, value objects, and the ports the instrumentation talks to.

pub mod entities;
pub mod ports;
pub mod value_objects;
