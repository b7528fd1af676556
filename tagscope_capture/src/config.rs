//! Capture-side configuration

use tagscope_common::constants;

/// Settings for the in-page instrumentation. Construction-time only; the
/// capture context has no environment or disk to read from.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Collector endpoint suffixes the network tap recognizes. Requests to
    /// any other URL are ignored.
    pub collector_endpoints: Vec<String>,

    /// Snapshot the call stack for each queue entry. Stack capture is
    /// best-effort; nothing downstream depends on its presence.
    pub capture_stacks: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            collector_endpoints: constants::DEFAULT_COLLECTOR_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            capture_stacks: true,
        }
    }
}
