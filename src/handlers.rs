//! HTTP route handlers.
//!
//! The detached graph window is a thin page: every user action (search,
//! clear, refresh, shortcuts, pointer input, timelapse) is posted to a
//! window route, applied to that window's session and controller here, and
//! answered with a fresh [`WindowView`]. Sync messages from the opener reach
//! the page through a WebSocket fed by the storage mailbox.

use crate::api::GraphSource;
use crate::controller::LoadOutcome;
use crate::models::{NodeId, Point, SyncMessage};
use crate::sync::{InboundEvent, StorageSubscription, SyncBridge};
use crate::templates::render_graph_view;
use crate::timelapse::TimelapseCommands;
use crate::window::{GraphWindow, Preferences, StandaloneParams, WindowView};
use crate::{AppState, API_ORIGIN};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, RawQuery, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
        .into_response()
}

async fn resolve_window(
    state: &AppState,
    brain_id: &str,
    origin: &str,
) -> Result<Arc<Mutex<GraphWindow>>, Response> {
    state.window(brain_id, origin).await.map_err(|e| {
        tracing::error!(error = %e, brain_id, origin, "failed to open window state");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
    })
}

/// Fetches the brain's graph into one window. The lock is not held across
/// the fetch, so a newer request from the same window can overtake this
/// one; the controller then discards whichever result is stale.
async fn load_window(
    state: &AppState,
    window: &Mutex<GraphWindow>,
    brain_id: &str,
    refresh: bool,
) -> (LoadOutcome, WindowView) {
    let token = window.lock().await.controller.begin_fetch();
    let result = state.client.fetch_graph(brain_id).await;

    let mut w = window.lock().await;
    let now = Instant::now();
    let (load, camera) = if refresh {
        let outcome = w.controller.finish_refresh(token, result, now);
        (outcome.load, outcome.camera)
    } else {
        (w.controller.finish_load(token, result), None)
    };
    let synced = w.sync(now);

    let mut view = w.view(now);
    view.camera = camera.or(synced);
    view.stale = load == LoadOutcome::Stale;
    (load, view)
}

/// Re-applies the stored theme to every open window.
async fn recolour_windows(state: &AppState) {
    let now = Instant::now();
    for window in state.all_windows().await {
        window.lock().await.sync(now);
    }
}

// ============================================================================
// Graph Window Page
// ============================================================================

pub async fn graph_view(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let params = StandaloneParams::from_query(query.as_deref().unwrap_or(""));
    let origin = match state.open_graph_window(&params).await {
        Ok(origin) => origin,
        Err(e) => {
            tracing::error!(error = %e, "failed to open graph window");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    };
    let dark_mode = match Preferences::open(&state.db) {
        Ok(prefs) => prefs.dark_mode(),
        Err(e) => {
            tracing::warn!(error = %e, "preferences unavailable; using light theme");
            false
        }
    };
    Html(render_graph_view(&params, &origin, dark_mode)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DarkModeRequest {
    pub enabled: bool,
}

/// Persists the theme and recolours every open window.
pub async fn set_dark_mode(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DarkModeRequest>,
) -> Response {
    let saved = Preferences::open(&state.db).and_then(|prefs| prefs.set_dark_mode(req.enabled));
    if let Err(e) = saved {
        tracing::error!(error = %e, "failed to store dark mode preference");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    recolour_windows(&state).await;
    Json(serde_json::json!({ "darkMode": req.enabled })).into_response()
}

// ============================================================================
// Graph API
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct GraphApiParams {
    /// Diff against the previous snapshot and highlight new nodes.
    #[serde(default)]
    pub refresh: bool,
    /// Window the fetch belongs to.
    pub origin: Option<String>,
}

pub async fn graph_api(
    State(state): State<Arc<AppState>>,
    Path(brain_id): Path<String>,
    Query(params): Query<GraphApiParams>,
) -> Response {
    let origin = params.origin.as_deref().unwrap_or(API_ORIGIN);
    let window = match resolve_window(&state, &brain_id, origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };

    let (load, view) = load_window(&state, &window, &brain_id, params.refresh).await;
    if load == LoadOutcome::Failed && view.snapshot.nodes.is_empty() {
        let message = view.snapshot.error.as_deref().unwrap_or("graph unavailable").to_string();
        return error_response(StatusCode::BAD_GATEWAY, message);
    }
    Json(view).into_response()
}

// ============================================================================
// Window Actions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
}

pub async fn window_search(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
    Json(req): Json<SearchRequest>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let mut w = window.lock().await;
    let now = Instant::now();
    match w.search(&req.query, now) {
        Ok(camera) => {
            let mut view = w.view(now);
            view.camera = camera;
            Json(view).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn window_clear(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let mut w = window.lock().await;
    let now = Instant::now();
    if let Err(e) = w.clear(now) {
        tracing::error!(error = %e, "failed to publish clear");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    Json(w.view(now)).into_response()
}

/// Refresh button: tells the opener, then re-fetches and diffs.
pub async fn window_refresh(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let requested = window.lock().await.session.request_refresh();
    if let Err(e) = requested {
        tracing::error!(error = %e, "failed to publish refresh");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    let (_, view) = load_window(&state, &window, &brain_id, true).await;
    Json(view).into_response()
}

#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyResponse {
    shortcut: Option<String>,
    #[serde(flatten)]
    view: WindowView,
}

pub async fn window_key(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
    Json(req): Json<KeyRequest>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let now = Instant::now();
    let handled = window.lock().await.handle_key(&req.key, req.ctrl, req.meta, now);
    let (shortcut, camera) = match handled {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, key = %req.key, "shortcut failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    };
    if shortcut == Some(crate::window::Shortcut::ToggleDarkMode) {
        recolour_windows(&state).await;
    }

    let mut view = window.lock().await.view(now);
    view.camera = camera;
    Json(KeyResponse {
        shortcut: shortcut.map(|s| format!("{:?}", s)),
        view,
    })
    .into_response()
}

/// A message the opener posted to the page, forwarded verbatim.
pub async fn window_message(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
    Json(raw): Json<serde_json::Value>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let now = Instant::now();
    let effect = {
        let mut w = window.lock().await;
        match w.accept_window(&raw.to_string()) {
            Some(event) => w.apply(event, now),
            None => Default::default(),
        }
    };

    let mut view = if effect.refresh {
        load_window(&state, &window, &brain_id, true).await.1
    } else {
        window.lock().await.view(now)
    };
    view.camera = view.camera.or(effect.camera);
    Json(view).into_response()
}

// ============================================================================
// Pointer and Layout
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NodePosition {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Deserialize)]
pub struct PositionsRequest {
    pub positions: Vec<NodePosition>,
}

/// Layout tick from the page. Answers the initial zoom the first time.
pub async fn window_positions(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
    Json(req): Json<PositionsRequest>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let zoom = window
        .lock()
        .await
        .controller
        .update_positions(req.positions.into_iter().map(|p| (p.id, Point::new(p.x, p.y))));
    Json(serde_json::json!({ "initialZoom": zoom })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRequest {
    pub node_id: NodeId,
}

pub async fn window_click(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
    Json(req): Json<ClickRequest>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let camera = window
        .lock()
        .await
        .controller
        .click_node(&req.node_id, Instant::now());
    Json(serde_json::json!({ "camera": camera })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragRequest {
    pub node_id: NodeId,
    pub x: f64,
    pub y: f64,
}

pub async fn window_drag(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
    Json(req): Json<DragRequest>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    window
        .lock()
        .await
        .controller
        .drag_node(&req.node_id, Point::new(req.x, req.y));
    StatusCode::NO_CONTENT.into_response()
}

pub async fn window_drag_end(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    window.lock().await.controller.end_drag();
    StatusCode::NO_CONTENT.into_response()
}

// ============================================================================
// Timelapse
// ============================================================================

pub async fn timelapse_start(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let mut w = window.lock().await;
    let now = Instant::now();
    w.controller.start_timelapse(now);
    Json(w.controller.timelapse_frame(now)).into_response()
}

/// Current frame of the running timelapse, or `null` when none was started.
pub async fn timelapse_frame(
    State(state): State<Arc<AppState>>,
    Path((brain_id, origin)): Path<(String, String)>,
) -> Response {
    let window = match resolve_window(&state, &brain_id, &origin).await {
        Ok(w) => w,
        Err(response) => return response,
    };
    let frame = window.lock().await.controller.timelapse_frame(Instant::now());
    Json(frame).into_response()
}

// ============================================================================
// Sync WebSocket
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SyncSocketParams {
    pub origin: Option<String>,
}

/// What a socket receives for each accepted mailbox message. `view` is set
/// when the socket belongs to a graph window the message was applied to.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncPush {
    message: SyncMessage,
    view: Option<WindowView>,
}

pub async fn sync_ws(
    State(state): State<Arc<AppState>>,
    Path(brain_id): Path<String>,
    Query(params): Query<SyncSocketParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = params
        .origin
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| format!("conn-{:016x}", rand::random::<u64>()));
    ws.on_upgrade(move |socket| handle_sync_socket(socket, state, brain_id, origin))
}

async fn apply_sync(
    state: &AppState,
    window: &Mutex<GraphWindow>,
    brain_id: &str,
    message: SyncMessage,
) -> WindowView {
    let now = Instant::now();
    let effect = window.lock().await.apply(InboundEvent::Sync(message), now);
    let mut view = if effect.refresh {
        load_window(state, window, brain_id, true).await.1
    } else {
        window.lock().await.view(now)
    };
    view.camera = view.camera.or(effect.camera);
    view
}

/// Mailbox -> socket. Own writes and other brains are filtered by the
/// window's bridge (or a local one for sockets without a window). Ends when
/// the receiving side is dropped or the mailbox goes away.
async fn relay_mailbox(
    state: Arc<AppState>,
    brain_id: String,
    origin: String,
    mut subscription: StorageSubscription,
    tx: mpsc::UnboundedSender<String>,
) {
    let mut fallback = SyncBridge::new(&brain_id, &origin, state.storage.clone());
    loop {
        let event = tokio::select! {
            event = subscription.next() => event,
            _ = tx.closed() => break,
        };
        let Some(event) = event else { break };

        let window = state.find_window(&brain_id, &origin).await;
        let accepted = match &window {
            Some(w) => w.lock().await.accept_storage(&event),
            None => fallback.accept_storage(&event),
        };
        let Some(InboundEvent::Sync(message)) = accepted else {
            continue;
        };
        let view = match &window {
            Some(w) => Some(apply_sync(&state, w, &brain_id, message.clone()).await),
            None => None,
        };

        let json = match serde_json::to_string(&SyncPush { message, view }) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode sync push");
                continue;
            }
        };
        if tx.send(json).is_err() {
            break;
        }
    }
}

/// Socket -> mailbox, one text frame. Returns whether it was published.
fn publish_incoming(bridge: &mut SyncBridge, text: &str) -> bool {
    let msg: SyncMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed sync message from socket");
            return false;
        }
    };
    if msg.brain_id != bridge.brain_id() {
        tracing::debug!(got = %msg.brain_id, "socket sent message for another brain");
        return false;
    }
    match bridge.publish(msg) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "failed to write sync mailbox");
            false
        }
    }
}

async fn handle_sync_socket(socket: WebSocket, state: Arc<AppState>, brain_id: String, origin: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::info!(brain_id = %brain_id, origin = %origin, "sync socket connected");

    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
    let relay = tokio::spawn(relay_mailbox(
        state.clone(),
        brain_id.clone(),
        origin.clone(),
        state.storage.subscribe(),
        push_tx,
    ));
    let mut writer = tokio::spawn(async move {
        while let Some(json) = push_rx.recv().await {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut outbound = SyncBridge::new(&brain_id, &origin, state.storage.clone());
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        publish_incoming(&mut outbound, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    relay.abort();
    writer.abort();
    state.close_window(&brain_id, &origin).await;
    tracing::info!(brain_id = %brain_id, origin = %origin, "sync socket closed");
}
