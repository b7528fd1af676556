//! Session-scoped entry log with filtering and a selection cursor

use crate::classifier::{classify, EventKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tagscope_common::{MessageTag, RelayMessage, RequestShape};
use tokio::sync::broadcast;

/// Classification outcome attached to a network-event entry. A batch is
/// classified member by member; there is no kind for the batch as a whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    Single(EventKind),
    Batch(Vec<EventKind>),
}

/// One row of the log. Immutable after append; destroyed only by `reset`.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    /// Arrival-order key, strictly increasing across the store's lifetime
    pub id: u64,
    pub received_at: DateTime<Utc>,
    pub message: RelayMessage,
    /// Present only for network events
    pub derived: Option<DerivedKind>,
}

impl Entry {
    pub fn tag(&self) -> Option<MessageTag> {
        self.message.tag()
    }

    /// Label the event list renders for this row.
    pub fn label(&self) -> String {
        match (&self.message, &self.derived) {
            (RelayMessage::Loaded { variant }, _) => format!("{} loaded", variant.as_str()),
            (RelayMessage::QueueEntry { call, .. }, _) => {
                call.event_name().unwrap_or("(unnamed call)").to_string()
            }
            (RelayMessage::NetworkEvent { .. }, Some(DerivedKind::Single(kind))) => {
                kind.label().to_string()
            }
            (RelayMessage::NetworkEvent { .. }, Some(DerivedKind::Batch(kinds))) => kinds
                .iter()
                .map(|kind| kind.label())
                .collect::<Vec<_>>()
                .join(", "),
            (RelayMessage::NetworkEvent { .. }, None) => EventKind::BrokenEvent.label().to_string(),
            (RelayMessage::Disconnected, _) => String::new(),
        }
    }

    /// True exactly for a single network event that carried no parameters at
    /// all and therefore classified as broken. The panel renders a
    /// "possibly a heartbeat ping" hint for these and nothing else.
    pub fn possible_heartbeat(&self) -> bool {
        let empty_single = matches!(
            &self.message,
            RelayMessage::NetworkEvent {
                shape: RequestShape::Single { params },
                ..
            } if params.is_empty()
        );
        empty_single
            && matches!(
                self.derived,
                Some(DerivedKind::Single(EventKind::BrokenEvent))
            )
    }
}

/// Active observation-kind filter. Empty means no filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    tags: BTreeSet<MessageTag>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tags(tags: impl IntoIterator<Item = MessageTag>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn matches(&self, tag: MessageTag) -> bool {
        self.tags.is_empty() || self.tags.contains(&tag)
    }
}

/// Events broadcast to live panel subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum PanelEvent {
    #[serde(rename = "entry")]
    NewEntry(Entry),
    #[serde(rename = "clear")]
    Clear,
}

/// Append-only, insertion-ordered log of relayed observations, scoped to
/// one panel attachment. All mutation funnels through the panel context;
/// the store itself is plain synchronous state.
pub struct EntryStore {
    entries: Vec<Entry>,
    next_id: u64,
    filter: FilterSet,
    selected: Option<u64>,
    events: broadcast::Sender<PanelEvent>,
}

impl EntryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            entries: Vec::new(),
            next_id: 1,
            filter: FilterSet::new(),
            selected: None,
            events,
        }
    }

    /// Append one relayed observation, enriching network events with their
    /// classified kind(s). Always succeeds for observations; channel
    /// lifecycle messages are not observations and are not stored.
    pub fn append(&mut self, message: RelayMessage) -> Option<&Entry> {
        message.tag()?;

        let derived = match &message {
            RelayMessage::NetworkEvent { shape, .. } => Some(derive_kind(shape)),
            _ => None,
        };
        let entry = Entry {
            id: self.next_id,
            received_at: Utc::now(),
            message,
            derived,
        };
        self.next_id += 1;
        self.entries.push(entry.clone());

        // Ignored when nobody subscribed
        let _ = self.events.send(PanelEvent::NewEntry(entry));
        self.entries.last()
    }

    /// Clear the log and the selection. Idempotent; the active filter and
    /// the id sequence survive, so ids never repeat within one session.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.selected = None;
        let _ = self.events.send(PanelEvent::Clear);
    }

    /// Ordered sub-sequence of entries matching `filter`. Pure projection:
    /// no mutation, no id reassignment.
    pub fn filtered_view(&self, filter: &FilterSet) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|entry| entry.tag().is_some_and(|tag| filter.matches(tag)))
            .collect()
    }

    /// The view under the active filter
    pub fn visible_entries(&self) -> Vec<&Entry> {
        self.filtered_view(&self.filter)
    }

    /// Install a new active filter. A selection pointing at an entry the
    /// new filter hides is cleared rather than left dangling.
    pub fn set_filter(&mut self, filter: FilterSet) {
        self.filter = filter;
        if let Some(id) = self.selected {
            let still_visible = self
                .entry(id)
                .and_then(Entry::tag)
                .is_some_and(|tag| self.filter.matches(tag));
            if !still_visible {
                self.selected = None;
            }
        }
    }

    pub fn filter(&self) -> &FilterSet {
        &self.filter
    }

    pub fn entry(&self, id: u64) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Select an entry for the detail view. Only entries visible under the
    /// active filter are selectable.
    pub fn select(&mut self, id: u64) -> bool {
        let selectable = self
            .entry(id)
            .and_then(Entry::tag)
            .is_some_and(|tag| self.filter.matches(tag));
        if selectable {
            self.selected = Some(id);
        }
        selectable
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&Entry> {
        self.selected.and_then(|id| self.entry(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe to live panel events
    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_kind(shape: &RequestShape) -> DerivedKind {
    match shape {
        RequestShape::Single { params } => DerivedKind::Single(classify(params)),
        RequestShape::Batch { requests } => {
            DerivedKind::Batch(requests.iter().map(|params| classify(params)).collect())
        }
    }
}
