//! Tagscope Panel - the inspection side of the pipeline
//!
//! Receives relayed observations, classifies collector requests into
//! semantic event kinds, and keeps the session-scoped entry log the
//! presentation layer renders.

mod api;
mod classifier;
mod session;
mod store;

pub use api::{start_server, VersionInfo};
pub use classifier::{classify, EventKind};
pub use session::{PanelSession, PanelState};
pub use store::{DerivedKind, Entry, EntryStore, FilterSet, PanelEvent};
