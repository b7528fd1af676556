//! Panel attachment lifecycle and the relay receive loop

use crate::store::EntryStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tagscope_common::{ProtocolError, RelayMessage};
use tagscope_relay::{RelayError, RelayHandle};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// State shared between the receive loop and the panel API surface.
pub struct PanelState {
    pub store: RwLock<EntryStore>,
    capture_connected: AtomicBool,
}

impl PanelState {
    fn new() -> Self {
        Self {
            store: RwLock::new(EntryStore::new()),
            capture_connected: AtomicBool::new(false),
        }
    }

    /// Whether the capture side is currently believed alive. There is no
    /// liveness probe: this flips on the in-band `Loaded` and
    /// `Disconnected` markers only.
    pub fn capture_connected(&self) -> bool {
        self.capture_connected.load(Ordering::SeqCst)
    }
}

/// One attachment of the panel to the relay hub. Owns the receive loop;
/// dropping the session aborts the loop and releases the port, so a
/// reattachment never leaves a duplicate listener behind.
pub struct PanelSession {
    state: Arc<PanelState>,
    recv_task: Option<JoinHandle<()>>,
}

impl PanelSession {
    /// Open the panel's port on the hub and start consuming frames.
    pub async fn attach(hub: &RelayHandle, channel_name: &str) -> Result<Self, RelayError> {
        let mut conn = hub.attach_panel(channel_name).await?;
        tracing::debug!("Panel attached as {}", conn.id());

        let state = Arc::new(PanelState::new());
        let task_state = Arc::clone(&state);
        let recv_task = tokio::spawn(async move {
            // Each frame is decoded, classified and appended to completion
            // before the next one is looked at; arrival order is store order.
            while let Some(frame) = conn.recv().await {
                handle_frame(&task_state, &frame).await;
            }
            tracing::debug!("Relay port closed");
        });

        Ok(Self {
            state,
            recv_task: Some(recv_task),
        })
    }

    pub fn state(&self) -> Arc<PanelState> {
        Arc::clone(&self.state)
    }
}

impl Drop for PanelSession {
    fn drop(&mut self) {
        if let Some(task) = self.recv_task.take() {
            // Aborting drops the relay connection, whose guard detaches the
            // port on the hub side.
            task.abort();
        }
    }
}

async fn handle_frame(state: &PanelState, frame: &str) {
    match RelayMessage::from_json(frame) {
        Ok(RelayMessage::Disconnected) => {
            state.capture_connected.store(false, Ordering::SeqCst);
            tracing::info!("Capture context disconnected");
        }
        Ok(message) => {
            if matches!(message, RelayMessage::Loaded { .. }) {
                state.capture_connected.store(true, Ordering::SeqCst);
            }
            let mut store = state.store.write().await;
            let _ = store.append(message);
        }
        Err(ProtocolError::UnknownKind(kind)) => {
            // Drift between the capture and panel builds. The frame is
            // dropped whole; the store must never see it.
            tracing::error!("Rejected relay frame with unknown kind `{}`", kind);
        }
        Err(err) => {
            tracing::warn!("Failed to parse relay frame: {}", err);
        }
    }
}
