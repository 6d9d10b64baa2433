//! brainTrace graph view - library re-exports for the server binary and tests.
//!
//! The crate drives the knowledge-graph view of a brain: it normalizes
//! whatever the backend returns into one graph shape, keeps the render state
//! (colours, highlights, camera and timelapse choreography), and keeps a
//! main window and its detached graph window in step.

use sled::Db;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub mod api;
pub mod camera;
pub mod chat;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod highlight;
pub mod interaction;
pub mod models;
pub mod normalize;
pub mod sync;
pub mod templates;
pub mod timelapse;
pub mod window;

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_BIND: &str = "127.0.0.1:5173";
pub const DEFAULT_SYNC_DB: &str = ".braintrace_sync";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub bind: String,
    pub sync_db: PathBuf,
    pub http_timeout: Duration,
}

impl Config {
    /// Reads `BRAINTRACE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let http_timeout = lookup("BRAINTRACE_HTTP_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        Self {
            backend_url: lookup("BRAINTRACE_BACKEND_URL")
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            bind: lookup("BRAINTRACE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            sync_db: PathBuf::from(
                lookup("BRAINTRACE_SYNC_DB").unwrap_or_else(|| DEFAULT_SYNC_DB.to_string()),
            ),
            http_timeout: Duration::from_secs(http_timeout),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Origin used by API callers that do not name a window.
pub const API_ORIGIN: &str = "api";

/// A window is identified by its brain and its sync origin.
pub type WindowKey = (String, String);

/// One graph window (session + controller) per open page. Fetch tokens live
/// in each window's controller, so one window's refresh never makes another
/// window's response stale.
pub type WindowMap = HashMap<WindowKey, Arc<Mutex<GraphWindow>>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub client: BackendClient,
    pub db: Db,
    pub storage: StorageChannel,
    pub windows: Arc<RwLock<WindowMap>>,
}

impl AppState {
    pub fn new(config: Config) -> error::Result<Self> {
        let db = sled::open(&config.sync_db)?;
        Self::with_db(config, db)
    }

    /// Build state over an already-open database (tests use a temporary one).
    pub fn with_db(config: Config, db: Db) -> error::Result<Self> {
        let client = BackendClient::new(&config.backend_url, config.http_timeout)?;
        let storage = StorageChannel::open(&db)?;
        Ok(Self {
            config,
            client,
            db,
            storage,
            windows: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn build_window(&self, params: &StandaloneParams, origin: &str) -> error::Result<GraphWindow> {
        let bridge = SyncBridge::new(&params.brain_id, origin, self.storage.clone());
        let session = WindowSession::new(params, Preferences::open(&self.db)?).with_bridge(bridge);
        Ok(GraphWindow::new(session, ControllerConfig::default().view))
    }

    /// Registers a window seeded from its page URL and returns its origin.
    pub async fn open_graph_window(&self, params: &StandaloneParams) -> error::Result<String> {
        let origin = format!("window-{:016x}", rand::random::<u64>());
        let window = self.build_window(params, &origin)?;
        self.windows.write().await.insert(
            (params.brain_id.clone(), origin.clone()),
            Arc::new(Mutex::new(window)),
        );
        tracing::debug!(brain_id = %params.brain_id, origin = %origin, "graph window opened");
        Ok(origin)
    }

    pub async fn find_window(&self, brain_id: &str, origin: &str) -> Option<Arc<Mutex<GraphWindow>>> {
        self.windows
            .read()
            .await
            .get(&(brain_id.to_string(), origin.to_string()))
            .cloned()
    }

    /// The window's state, created unseeded on first use when the page was
    /// not served from here.
    pub async fn window(&self, brain_id: &str, origin: &str) -> error::Result<Arc<Mutex<GraphWindow>>> {
        if let Some(w) = self.find_window(brain_id, origin).await {
            return Ok(w);
        }
        let params = StandaloneParams {
            brain_id: brain_id.to_string(),
            ..StandaloneParams::default()
        };
        let window = self.build_window(&params, origin)?;
        let mut windows = self.windows.write().await;
        let entry = windows
            .entry((brain_id.to_string(), origin.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(window)));
        Ok(entry.clone())
    }

    pub async fn close_window(&self, brain_id: &str, origin: &str) {
        let key = (brain_id.to_string(), origin.to_string());
        if self.windows.write().await.remove(&key).is_some() {
            tracing::debug!(brain_id, origin, "graph window closed");
        }
    }

    pub async fn all_windows(&self) -> Vec<Arc<Mutex<GraphWindow>>> {
        self.windows.read().await.values().cloned().collect()
    }
}

// Re-export commonly used types
pub use api::{fetch_graph_or_sample, BackendClient, GraphSource};
pub use camera::{execute_plan, initial_zoom, CameraPlan, CameraState, CameraStep, ViewSize, Viewport};
pub use chat::{ChatBackend, ChatSession, ANSWER_FAILED_MESSAGE};
pub use controller::{
    ControllerConfig, GraphRenderController, LoadOutcome, RefreshOutcome, RenderSnapshot,
    RequestToken, Theme,
};
pub use error::{GraphError, Result};
pub use highlight::{ClearTrigger, HighlightKind, Highlights, HighlightSet};
pub use models::{
    ChannelKey, GraphData, GraphLink, GraphNode, GraphStats, NodeGroup, NodeId, Point,
    SearchMirror, SyncAction, SyncMessage, WindowMessage,
};
pub use normalize::{compute_link_counts, default_graph, normalize};
pub use sync::{
    open_window, InboundEvent, StorageChannel, StorageEvent, SyncBridge, WindowHandle, WindowInbox,
};
pub use timelapse::{Timelapse, TimelapseCommands, TimelapseFrame};
pub use window::{
    GraphWindow, Preferences, SearchState, Shortcut, StandaloneParams, SyncEffect, WindowSession,
    WindowView,
};
