//! Tagscope Capture - in-page instrumentation
//!
//! Runs in the inspected page's own execution context and produces the raw
//! observations the rest of the pipeline consumes: one `QueueEntry` per call
//! pushed onto a tracking queue, one `NetworkEvent` per outgoing collector
//! request, and a `Loaded` marker when instrumentation attaches to a queue
//! variant.
//!
//! Everything here is fail-open. Observing is a side effect the page must
//! never notice: a capture or relay failure drops the observation and the
//! page's own call proceeds untouched.

mod config;
mod network;
mod queue;

pub use config::CaptureConfig;
pub use network::NetworkTap;
pub use queue::{QueueSink, QueueTap};
