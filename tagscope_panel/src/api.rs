//! Panel-facing HTTP server with WebSocket support
//!
//! This is the boundary the presentation layer consumes: it reads the
//! filtered entry log and the selection, and issues commands (reset, filter,
//! select). It never mutates entry contents.

use crate::session::PanelState;
use crate::store::{Entry, FilterSet, PanelEvent};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tagscope_common::constants;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Version data supplied by the version-check collaborator. The panel only
/// ever reads it.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub current: String,
    pub latest: String,
}

/// App state for the panel server
#[derive(Clone)]
struct AppState {
    panel: Arc<PanelState>,
    version: Option<VersionInfo>,
}

/// Start the panel API server on the given port
pub async fn start_server(
    port: u16,
    panel: Arc<PanelState>,
    version: Option<VersionInfo>,
) -> Result<JoinHandle<()>> {
    let state = AppState { panel, version };

    let app = Router::new()
        .route("/api/entries", get(get_entries))
        .route("/api/entries/{id}", get(get_entry))
        .route("/api/entries/{id}/select", post(select_entry))
        .route("/api/selection", get(get_selection))
        .route("/api/selection/clear", post(clear_selection))
        .route("/api/filter", post(set_filter))
        .route("/api/reset", post(reset))
        .route("/api/status", get(get_status))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind panel API to {}", addr))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Ok(handle)
}

/// Entry as the presentation layer sees it: the stored fields plus the
/// render label and the heartbeat hint.
#[derive(Serialize)]
struct EntryView {
    #[serde(flatten)]
    entry: Entry,
    label: String,
    possible_heartbeat: bool,
}

impl EntryView {
    fn from_entry(entry: &Entry) -> Self {
        Self {
            label: entry.label(),
            possible_heartbeat: entry.possible_heartbeat(),
            entry: entry.clone(),
        }
    }
}

/// Get the entries visible under the active filter, in arrival order
async fn get_entries(State(state): State<AppState>) -> Json<Vec<EntryView>> {
    let store = state.panel.store.read().await;
    Json(store.visible_entries().into_iter().map(EntryView::from_entry).collect())
}

/// Get a single entry by id
async fn get_entry(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let store = state.panel.store.read().await;
    match store.entry(id) {
        Some(entry) => Json(EntryView::from_entry(entry)).into_response(),
        None => (StatusCode::NOT_FOUND, "Entry not found").into_response(),
    }
}

/// Select an entry for the detail view. Only entries visible under the
/// active filter are selectable.
async fn select_entry(State(state): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    let mut store = state.panel.store.write().await;
    if store.select(id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Get the entry the detail view shows, if any
async fn get_selection(State(state): State<AppState>) -> Response {
    let store = state.panel.store.read().await;
    match store.selected() {
        Some(entry) => Json(EntryView::from_entry(entry)).into_response(),
        None => (StatusCode::NOT_FOUND, "Nothing selected").into_response(),
    }
}

/// Clear the selection cursor
async fn clear_selection(State(state): State<AppState>) -> StatusCode {
    state.panel.store.write().await.clear_selection();
    StatusCode::OK
}

/// Install a new filter set; an empty set shows everything
async fn set_filter(State(state): State<AppState>, Json(filter): Json<FilterSet>) -> StatusCode {
    state.panel.store.write().await.set_filter(filter);
    StatusCode::OK
}

/// Clear the whole log
async fn reset(State(state): State<AppState>) -> StatusCode {
    state.panel.store.write().await.reset();
    StatusCode::OK
}

/// Session status response
#[derive(Serialize)]
struct StatusResponse {
    capture_connected: bool,
    protocol_version: &'static str,
    entries: usize,
    selected_id: Option<u64>,
    filter: FilterSet,
    version: Option<VersionInfo>,
}

/// Get session status for the panel header
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let store = state.panel.store.read().await;
    Json(StatusResponse {
        capture_connected: state.panel.capture_connected(),
        protocol_version: constants::PROTOCOL_VERSION,
        entries: store.len(),
        selected_id: store.selected().map(|entry| entry.id),
        filter: store.filter().clone(),
        version: state.version.clone(),
    })
}

// ============================================================================
// WebSocket
// ============================================================================

/// WebSocket handler for live updates
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Send the current view, then follow with live events
    let (snapshot, mut event_rx) = {
        let store = state.panel.store.read().await;
        let snapshot: Vec<EntryView> = store
            .visible_entries()
            .into_iter()
            .map(EntryView::from_entry)
            .collect();
        (snapshot, store.subscribe())
    };

    let initial_msg = serde_json::json!({
        "type": "entries",
        "data": snapshot
    });
    if let Ok(json) = serde_json::to_string(&initial_msg) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    let send_task = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            let payload = match &event {
                PanelEvent::NewEntry(entry) => serde_json::to_string(&serde_json::json!({
                    "type": "entry",
                    "data": EntryView::from_entry(entry)
                })),
                PanelEvent::Clear => serde_json::to_string(&event),
            };
            if let Ok(json) = payload {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Drain incoming messages until the peer goes away
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}
