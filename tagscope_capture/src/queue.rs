//! Tracking-queue instrumentation

use crate::CaptureConfig;
use tagscope_common::{QueueCall, QueueVariant, RelayMessage};
use tagscope_relay::CaptureConn;

/// The append operation of a tracking queue. The page's own queue (or a
/// further tap) sits behind this.
pub trait QueueSink {
    fn push(&mut self, call: QueueCall);
}

/// Wraps a queue's append operation. Every call is observed *before* the
/// wrapped sink runs, then forwarded synchronously with arguments and order
/// untouched. Observation failures are swallowed: the page's tracking keeps
/// working even when the relay is gone.
pub struct QueueTap<S: QueueSink> {
    variant: QueueVariant,
    inner: S,
    relay: CaptureConn,
    capture_stacks: bool,
}

impl<S: QueueSink> QueueTap<S> {
    /// Install the tap around a queue variant found on the page and announce
    /// the attachment. Variants absent from the page simply never get a tap,
    /// so no `Loaded` marker is ever emitted for them.
    pub fn install(
        variant: QueueVariant,
        inner: S,
        relay: CaptureConn,
        config: &CaptureConfig,
    ) -> Self {
        let tap = Self {
            variant,
            inner,
            relay,
            capture_stacks: config.capture_stacks,
        };
        tap.emit(RelayMessage::Loaded { variant });
        tap
    }

    pub fn push(&mut self, call: QueueCall) {
        let stack = if self.capture_stacks {
            captured_stack()
        } else {
            None
        };
        self.emit(RelayMessage::QueueEntry {
            variant: self.variant,
            call: call.clone(),
            stack,
        });
        self.inner.push(call);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn emit(&self, message: RelayMessage) {
        if let Err(err) = self.relay.send(&message) {
            tracing::debug!("Dropped queue observation: {}", err);
        }
    }
}

impl<S: QueueSink> QueueSink for QueueTap<S> {
    fn push(&mut self, call: QueueCall) {
        QueueTap::push(self, call);
    }
}

/// Best-effort call-stack snapshot with the instrumentation's own frames
/// stripped, since they always sit on top and point here rather than at the
/// page code that pushed the call.
fn captured_stack() -> Option<String> {
    let raw = std::backtrace::Backtrace::force_capture().to_string();
    let mut kept: Vec<&str> = Vec::new();
    let mut skipping = true;
    for line in raw.lines() {
        if is_frame_header(line) {
            skipping = line.contains("tagscope_capture") || line.contains("std::backtrace");
        }
        if !skipping {
            kept.push(line);
        }
    }
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n"))
    }
}

/// Backtrace frame headers render as `   N: symbol`.
fn is_frame_header(line: &str) -> bool {
    match line.trim_start().split_once(':') {
        Some((index, _)) => !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
