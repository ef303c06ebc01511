//! Frame processing and event dispatch
//!
//! The process worker consumes frame keys for one camera, runs motion
//! detection and the optional object-detection round trip, and emits
//! events; the event worker drains those events into the configured sinks.

mod event;
mod process;

pub use event::{EventSink, EventWorker, TracingSink};
pub use process::{ObjectDetectClient, ProcessWorker};
