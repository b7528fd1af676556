//! Relay hub between the capture and panel contexts.
//!
//! The hub is the middle of the three execution contexts. It owns a single
//! ordered pipe: frames emitted by the capture side funnel through one task
//! and are forwarded to the attached panel, so arrival order at the panel
//! always equals emission order. Delivery is best-effort - a frame emitted
//! while no panel is attached is dropped, there is no replay buffer - but
//! frames are never reordered.
//!
//! Both ends may come and go. A page navigation attaches a fresh capture
//! connection; when the previous one is torn down the hub synthesizes a
//! single in-band `Disconnected` frame for the panel. The panel may attach
//! late, detach and reattach; a new attachment supersedes a live one.

use tagscope_common::{constants, ProtocolError, RelayMessage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay hub is no longer running")]
    HubClosed,

    #[error("Unknown channel name `{got}` (expected `{expected}`)")]
    WrongChannel { expected: String, got: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Hub configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// The port name the panel must open its connection under
    pub channel_name: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_name: constants::CHANNEL_NAME.to_string(),
        }
    }
}

enum Control {
    AttachCapture {
        frames: mpsc::UnboundedReceiver<String>,
    },
    AttachPanel {
        channel_name: String,
        frames: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<Result<Uuid, RelayError>>,
    },
    DetachPanel {
        id: Uuid,
    },
}

/// Handle to a running relay hub. Cloneable; the hub task ends once every
/// handle is dropped.
#[derive(Clone)]
pub struct RelayHandle {
    control: mpsc::UnboundedSender<Control>,
}

/// The relay hub task
pub struct RelayHub;

impl RelayHub {
    /// Spawn the hub task and return a handle to it.
    pub fn spawn(config: RelayConfig) -> RelayHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_hub(config, control_rx));
        RelayHandle { control: control_tx }
    }
}

impl RelayHandle {
    /// Register the capture side. A fresh attach (page navigation) replaces
    /// the previous connection.
    pub fn attach_capture(&self) -> Result<CaptureConn, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.control
            .send(Control::AttachCapture { frames: rx })
            .map_err(|_| RelayError::HubClosed)?;
        Ok(CaptureConn { frames: tx })
    }

    /// Open the panel's port under the fixed channel name. A second attach
    /// supersedes a live one; the superseded receiver closes.
    pub async fn attach_panel(&self, channel_name: &str) -> Result<PanelConn, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(Control::AttachPanel {
                channel_name: channel_name.to_string(),
                frames: tx,
                reply: reply_tx,
            })
            .map_err(|_| RelayError::HubClosed)?;
        let id = reply_rx.await.map_err(|_| RelayError::HubClosed)??;
        Ok(PanelConn {
            id,
            frames: rx,
            _guard: DetachGuard {
                id,
                control: self.control.clone(),
            },
        })
    }
}

/// Capture-side sender, cloned across the taps of one page. Teardown is
/// signalled once the last clone drops; the hub then forwards one
/// `Disconnected` frame to the attached panel.
#[derive(Clone)]
pub struct CaptureConn {
    frames: mpsc::UnboundedSender<String>,
}

impl CaptureConn {
    /// Non-blocking send. The caller never suspends; an error only means the
    /// hub is gone and the observation is dropped.
    pub fn send(&self, message: &RelayMessage) -> Result<(), RelayError> {
        self.send_frame(message.to_json()?)
    }

    /// Send a pre-serialized frame. The hub treats frames as opaque; only
    /// the panel side decodes them.
    pub fn send_frame(&self, frame: String) -> Result<(), RelayError> {
        self.frames.send(frame).map_err(|_| RelayError::HubClosed)
    }
}

/// Panel-side receiver. Dropping it detaches the port and releases the
/// hub-side listener.
#[derive(Debug)]
pub struct PanelConn {
    id: Uuid,
    frames: mpsc::UnboundedReceiver<String>,
    _guard: DetachGuard,
}

impl PanelConn {
    /// Receive the next frame. `None` means the port closed: the hub shut
    /// down or a newer panel attachment superseded this one.
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug)]
struct DetachGuard {
    id: Uuid,
    control: mpsc::UnboundedSender<Control>,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let _ = self.control.send(Control::DetachPanel { id: self.id });
    }
}

async fn run_hub(config: RelayConfig, mut control_rx: mpsc::UnboundedReceiver<Control>) {
    let mut capture_rx: Option<mpsc::UnboundedReceiver<String>> = None;
    let mut panel: Option<(Uuid, mpsc::UnboundedSender<String>)> = None;

    loop {
        tokio::select! {
            // Pending capture frames drain before control changes take
            // effect, so attach/detach never reorders the stream.
            biased;

            frame = recv_frame(&mut capture_rx), if capture_rx.is_some() => {
                match frame {
                    Some(frame) => {
                        if let Some((_, tx)) = &panel {
                            // A closed receiver means the panel is mid-detach;
                            // the frame is dropped, never re-queued.
                            let _ = tx.send(frame);
                        }
                    }
                    None => {
                        // Capture context tore down (navigation, page close)
                        capture_rx = None;
                        tracing::debug!("Capture connection closed");
                        if let Some((_, tx)) = &panel {
                            if let Ok(frame) = RelayMessage::Disconnected.to_json() {
                                let _ = tx.send(frame);
                            }
                        }
                    }
                }
            }

            ctl = control_rx.recv() => {
                match ctl {
                    Some(Control::AttachCapture { frames }) => {
                        if capture_rx.is_some() {
                            tracing::debug!("Replacing capture connection");
                        }
                        capture_rx = Some(frames);
                    }
                    Some(Control::AttachPanel { channel_name, frames, reply }) => {
                        if channel_name != config.channel_name {
                            let _ = reply.send(Err(RelayError::WrongChannel {
                                expected: config.channel_name.clone(),
                                got: channel_name,
                            }));
                            continue;
                        }
                        let id = Uuid::new_v4();
                        if let Some((old, _)) = panel.replace((id, frames)) {
                            tracing::debug!("Panel attachment {} superseded by {}", old, id);
                        }
                        let _ = reply.send(Ok(id));
                    }
                    Some(Control::DetachPanel { id }) => {
                        // Only the current attachment may detach itself; a
                        // stale guard from a superseded connection is a no-op.
                        if panel.as_ref().is_some_and(|(pid, _)| *pid == id) {
                            panel = None;
                            tracing::debug!("Panel attachment {} detached", id);
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

async fn recv_frame(rx: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
