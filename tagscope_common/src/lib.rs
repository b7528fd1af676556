//! Tagscope Common - Shared wire protocol for the tracking debugger
//!
//! This crate contains the message definitions and serialization helpers
//! used by the capture, relay and panel sides.

mod params;

pub use params::{params_from_query, params_from_url};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to serialize message: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to deserialize message: {0}")]
    Decode(serde_json::Error),

    /// A well-formed frame carrying a kind string this build does not know.
    /// Indicates drift between the capture and panel code versions.
    #[error("Unknown message kind `{0}`")]
    UnknownKind(String),
}

/// The two tracking-queue variants observed on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueVariant {
    #[serde(rename = "_paq")]
    Paq,

    #[serde(rename = "_ppas")]
    Ppas,
}

impl QueueVariant {
    /// The in-page global the queue is mounted under
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueVariant::Paq => "_paq",
            QueueVariant::Ppas => "_ppas",
        }
    }
}

/// One query parameter in wire order. Duplicate names are kept as separate
/// entries; collapsing them into a map would lose information classification
/// depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One call pushed onto a tracking queue: the method/event name followed by
/// its (opaque) arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueCall {
    data: Vec<Value>,
}

impl QueueCall {
    pub fn new(event_name: impl Into<String>, arguments: Vec<Value>) -> Self {
        let mut data = Vec::with_capacity(arguments.len() + 1);
        data.push(Value::String(event_name.into()));
        data.extend(arguments);
        Self { data }
    }

    /// Build from a raw argument list. Returns `None` for an empty list,
    /// which the queue API never produces for a well-formed call.
    pub fn from_data(data: Vec<Value>) -> Option<Self> {
        if data.is_empty() {
            None
        } else {
            Some(Self { data })
        }
    }

    /// The method/event name, i.e. the first element when it is a string.
    pub fn event_name(&self) -> Option<&str> {
        self.data.first().and_then(Value::as_str)
    }

    /// Everything after the event name.
    pub fn arguments(&self) -> &[Value] {
        self.data.get(1..).unwrap_or(&[])
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }
}

/// The shape of one collector request. A batch bundles several logical
/// tracking events into a single HTTP call; each member is classified
/// independently downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestShape {
    Single { params: Vec<Param> },
    Batch { requests: Vec<Vec<Param>> },
}

/// A message on the relay channel, tagged by a `type` kind string. This is
/// the only message shape valid on the port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMessage {
    /// Instrumentation finished attaching to one queue variant. Emitted at
    /// most once per variant per page lifetime.
    Loaded { variant: QueueVariant },

    /// One call pushed onto a tracking queue, captured before the library
    /// processed it. `stack` is best-effort call-stack text with the
    /// instrumentation's own frames stripped; it may be absent.
    QueueEntry {
        variant: QueueVariant,
        call: QueueCall,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        stack: Option<String>,
    },

    /// One outgoing request to the collector endpoint.
    NetworkEvent {
        variant: QueueVariant,
        url: String,
        shape: RequestShape,
    },

    /// The capture context tore down (navigation, page close). Synthesized
    /// by the relay hub, never sent by the capture side itself.
    Disconnected,
}

/// Kind strings this build understands. Used to tell protocol drift apart
/// from plain garbage when a frame fails to decode.
const KNOWN_KINDS: [&str; 4] = ["LOADED", "QUEUE_ENTRY", "NETWORK_EVENT", "DISCONNECTED"];

impl RelayMessage {
    /// Serialize the message to a JSON frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Deserialize from a JSON frame
    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str::<Self>(data) {
            Ok(msg) => Ok(msg),
            Err(err) => {
                if let Ok(value) = serde_json::from_str::<Value>(data) {
                    if let Some(kind) = value.get("type").and_then(Value::as_str) {
                        if !KNOWN_KINDS.contains(&kind) {
                            return Err(ProtocolError::UnknownKind(kind.to_string()));
                        }
                    }
                }
                Err(ProtocolError::Decode(err))
            }
        }
    }

    /// The filterable observation tag, or `None` for channel lifecycle
    /// messages that are not observations.
    pub fn tag(&self) -> Option<MessageTag> {
        match self {
            RelayMessage::Loaded { .. } => Some(MessageTag::Loaded),
            RelayMessage::QueueEntry { variant, .. } => match variant {
                QueueVariant::Paq => Some(MessageTag::PaqEntry),
                QueueVariant::Ppas => Some(MessageTag::PpasEntry),
            },
            RelayMessage::NetworkEvent { variant, .. } => match variant {
                QueueVariant::Paq => Some(MessageTag::PaqNetworkEvent),
                QueueVariant::Ppas => Some(MessageTag::PpasNetworkEvent),
            },
            RelayMessage::Disconnected => None,
        }
    }
}

/// Observation tag used by the panel's filter badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageTag {
    PaqEntry,
    PaqNetworkEvent,
    PpasEntry,
    PpasNetworkEvent,
    Loaded,
}

/// Constants for the protocol
pub mod constants {
    /// Channel name the panel opens its port under
    pub const CHANNEL_NAME: &str = "devtools";

    /// Collector endpoint suffixes recognized by default
    pub const DEFAULT_COLLECTOR_ENDPOINTS: [&str; 3] = ["ppms.php", "piwik.php", "matomo.php"];

    /// Protocol version
    pub const PROTOCOL_VERSION: &str = "1.1.0";
}
