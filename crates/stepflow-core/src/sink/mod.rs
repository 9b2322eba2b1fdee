//! Output sink abstractions.
//!
//! - `OutputSink`: RPITIT trait implemented by concrete destinations
//! - `BoxSink`: object-safe wrapper for dynamic dispatch
//! - `SinkRegistry`: name-indexed lookup used by the output executor

pub mod box_sink;
pub mod memory;
pub mod output_sink;
pub mod registry;

pub use box_sink::BoxSink;
pub use memory::{LogSink, MemorySink};
pub use output_sink::{Delivery, DeliveryReceipt, OutputSink, SinkError};
pub use registry::SinkRegistry;
