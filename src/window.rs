//! Detached graph window session.
//!
//! A window opened from the main view is seeded from its URL, keeps its own
//! search state, reacts to sync events from the opener, and owns a couple of
//! user preferences. It never touches the graph snapshot directly: it hands
//! highlight lists, overrides and clear/refresh triggers to its render
//! controller.

use crate::camera::{CameraPlan, ViewSize};
use crate::controller::{ControllerConfig, GraphRenderController, RenderSnapshot, Theme};
use crate::error::{GraphError, Result};
use crate::highlight::{ClearTrigger, HighlightKind};
use crate::models::{GraphData, GraphStats, SearchMirror, SyncAction};
use crate::sync::{InboundEvent, StorageEvent, SyncBridge};
use serde::Serialize;
use std::time::Instant;

pub const DEFAULT_BRAIN_ID: &str = "default-brain-id";
pub const PREFS_TREE: &str = "prefs";
pub const DARK_MODE_KEY: &str = "graphDarkMode";

// ============================================================================
// URL Seeding
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneParams {
    pub brain_id: String,
    pub referenced_nodes: Vec<String>,
    pub node_count: Option<usize>,
}

impl Default for StandaloneParams {
    fn default() -> Self {
        Self {
            brain_id: DEFAULT_BRAIN_ID.to_string(),
            referenced_nodes: Vec::new(),
            node_count: None,
        }
    }
}

/// The opener percent-encodes the JSON list before putting it in the query
/// string, so it arrives encoded twice.
fn parse_referenced(value: &str) -> Vec<String> {
    let decoded = match urlencoding::decode(value) {
        Ok(d) => d.into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "referencedNodes is not valid UTF-8 after decoding");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<String>>(&decoded) {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!(error = %e, "invalid referencedNodes parameter");
            Vec::new()
        }
    }
}

impl StandaloneParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = StandaloneParams::default();
        let query = query.trim_start_matches('?');
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "brainId" if !value.is_empty() => params.brain_id = value.into_owned(),
                "referencedNodes" => params.referenced_nodes = parse_referenced(&value),
                "nodeCount" => params.node_count = value.parse().ok(),
                _ => {}
            }
        }
        params
    }

    /// URL the opener navigates a new window to.
    pub fn to_url(&self, origin: &str) -> Result<String> {
        let mut url = url::Url::parse(origin)
            .and_then(|u| u.join("/graph-view"))
            .map_err(|e| GraphError::InvalidParams(format!("bad origin {}: {}", origin, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("brainId", &self.brain_id);
            if !self.referenced_nodes.is_empty() {
                let json = serde_json::to_string(&self.referenced_nodes)?;
                pairs.append_pair("referencedNodes", &urlencoding::encode(&json));
            }
            if let Some(n) = self.node_count {
                pairs.append_pair("nodeCount", &n.to_string());
            }
        }
        Ok(url.to_string())
    }
}

// ============================================================================
// Preferences
// ============================================================================

#[derive(Clone)]
pub struct Preferences {
    tree: sled::Tree,
}

impl Preferences {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(PREFS_TREE)?,
        })
    }

    /// Stored as a JSON boolean; anything unreadable means light mode.
    pub fn dark_mode(&self) -> bool {
        self.tree
            .get(DARK_MODE_KEY)
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice(&v).ok())
            .unwrap_or(false)
    }

    pub fn set_dark_mode(&self, on: bool) -> Result<()> {
        self.tree.insert(DARK_MODE_KEY, serde_json::to_vec(&on)?)?;
        Ok(())
    }
}

// ============================================================================
// Keyboard Shortcuts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    FocusSearch,
    ClearSearch,
    ToggleAdvanced,
    ToggleDarkMode,
}

impl Shortcut {
    /// Ctrl and Cmd are interchangeable.
    pub fn from_key(key: &str, ctrl: bool, meta: bool) -> Option<Self> {
        let modifier = ctrl || meta;
        match key {
            "Escape" => Some(Shortcut::ClearSearch),
            "f" | "F" if modifier => Some(Shortcut::FocusSearch),
            "k" | "K" if modifier => Some(Shortcut::ToggleAdvanced),
            "d" | "D" if modifier => Some(Shortcut::ToggleDarkMode),
            _ => None,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchState {
    Idle,
    Searching,
    Highlighted,
}

/// Case-insensitive: a name matches when it contains any whitespace-separated
/// term of the query.
pub fn search_names(names: &[String], query: &str) -> Vec<String> {
    let query = query.to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return Vec::new();
    }
    names
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            terms.iter().any(|t| lower.contains(t))
        })
        .cloned()
        .collect()
}

pub struct WindowSession {
    brain_id: String,
    state: SearchState,
    query: String,
    all_names: Vec<String>,
    stats: GraphStats,
    /// Referenced list handed in from outside (URL or opener).
    external_referenced: Vec<String>,
    /// What is actually highlighted: search matches or the external list.
    local_referenced: Vec<String>,
    focus_names: Vec<String>,
    refresh_counter: u64,
    clear_trigger: ClearTrigger,
    advanced_open: bool,
    search_focused: bool,
    prefs: Preferences,
    bridge: Option<SyncBridge>,
}

impl WindowSession {
    pub fn new(params: &StandaloneParams, prefs: Preferences) -> Self {
        Self {
            brain_id: params.brain_id.clone(),
            state: SearchState::Idle,
            query: String::new(),
            all_names: Vec::new(),
            stats: GraphStats::default(),
            external_referenced: params.referenced_nodes.clone(),
            local_referenced: params.referenced_nodes.clone(),
            focus_names: Vec::new(),
            refresh_counter: 0,
            clear_trigger: ClearTrigger::default(),
            advanced_open: false,
            search_focused: false,
            prefs,
            bridge: None,
        }
    }

    /// Publish user actions (clear, refresh) to the other window.
    pub fn with_bridge(mut self, bridge: SyncBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn brain_id(&self) -> &str {
        &self.brain_id
    }

    pub fn bridge_mut(&mut self) -> Option<&mut SyncBridge> {
        self.bridge.as_mut()
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn referenced(&self) -> &[String] {
        &self.local_referenced
    }

    pub fn refresh_counter(&self) -> u64 {
        self.refresh_counter
    }

    pub fn clear_trigger(&self) -> ClearTrigger {
        self.clear_trigger
    }

    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    pub fn is_advanced_open(&self) -> bool {
        self.advanced_open
    }

    pub fn is_search_focused(&self) -> bool {
        self.search_focused
    }

    /// Read through to the stored preference, so every window agrees.
    pub fn is_dark_mode(&self) -> bool {
        self.prefs.dark_mode()
    }

    pub fn theme(&self) -> Theme {
        if self.is_dark_mode() {
            Theme::Dark
        } else {
            Theme::Light
        }
    }

    pub fn controller_config(&self, view: ViewSize) -> ControllerConfig {
        ControllerConfig {
            theme: self.theme(),
            view,
        }
    }

    /// The controller loaded a new snapshot.
    pub fn graph_updated(&mut self, data: &GraphData) {
        self.all_names = data.node_names();
        self.stats = data.stats();
    }

    pub fn set_focus_names(&mut self, names: Vec<String>) {
        self.focus_names = names;
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// Runs a search and returns the matches. An empty query (or an empty
    /// graph) drops back to idle and restores the external referenced list.
    pub fn search(&mut self, query: &str) -> &[String] {
        self.query = query.to_string();
        if query.trim().is_empty() || self.all_names.is_empty() {
            self.state = SearchState::Idle;
            self.local_referenced = self.external_referenced.clone();
            return &self.local_referenced;
        }

        self.local_referenced = search_names(&self.all_names, query);
        self.state = if self.local_referenced.is_empty() {
            SearchState::Searching
        } else {
            SearchState::Highlighted
        };
        tracing::debug!(query, matches = self.local_referenced.len(), "node search");
        &self.local_referenced
    }

    pub fn search_mirror(&self) -> SearchMirror {
        SearchMirror {
            brain_id: self.brain_id.clone(),
            query: self.query.clone(),
            matches: self.local_referenced.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Writes the search mirror slot for the opener, if bridged.
    pub fn publish_search(&self) -> Result<()> {
        if let Some(bridge) = &self.bridge {
            bridge.storage().write_search(&self.search_mirror())?;
        }
        Ok(())
    }

    fn reset_highlights(&mut self) -> ClearTrigger {
        self.query.clear();
        self.local_referenced.clear();
        self.state = SearchState::Idle;
        self.clear_trigger.bump()
    }

    /// Explicit clear: wipes search and highlights here and asks the other
    /// window to do the same.
    pub fn clear(&mut self) -> Result<ClearTrigger> {
        let trigger = self.reset_highlights();
        if let Some(bridge) = &mut self.bridge {
            bridge.publish(bridge.message(SyncAction::ClearHighlights))?;
        }
        Ok(trigger)
    }

    /// Refresh button: bump the local counter and tell the other window.
    pub fn request_refresh(&mut self) -> Result<u64> {
        self.refresh_counter += 1;
        if let Some(bridge) = &mut self.bridge {
            bridge.publish(bridge.message(SyncAction::Refresh))?;
        }
        Ok(self.refresh_counter)
    }

    pub fn toggle_advanced(&mut self) -> bool {
        self.advanced_open = !self.advanced_open;
        self.advanced_open
    }

    /// Flips and persists the dark-mode preference. The caller rebuilds the
    /// controller config from [`theme`](Self::theme).
    pub fn toggle_dark_mode(&mut self) -> Result<bool> {
        let on = !self.is_dark_mode();
        self.prefs.set_dark_mode(on)?;
        Ok(on)
    }

    pub fn handle_key(&mut self, key: &str, ctrl: bool, meta: bool) -> Result<Option<Shortcut>> {
        let Some(shortcut) = Shortcut::from_key(key, ctrl, meta) else {
            return Ok(None);
        };
        match shortcut {
            Shortcut::FocusSearch => self.search_focused = true,
            Shortcut::ClearSearch => {
                self.clear()?;
                self.search_focused = false;
            }
            Shortcut::ToggleAdvanced => {
                self.toggle_advanced();
            }
            Shortcut::ToggleDarkMode => {
                self.toggle_dark_mode()?;
            }
        }
        Ok(Some(shortcut))
    }

    // ------------------------------------------------------------------------
    // Inbound Sync
    // ------------------------------------------------------------------------

    /// Applies an event from the opener. Returns whether anything changed.
    pub fn apply(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::ReferencedNodes(nodes) => {
                self.external_referenced = nodes.clone();
                self.local_referenced = nodes;
                self.state = SearchState::Idle;
                true
            }
            InboundEvent::Sync(msg) => {
                if msg.brain_id != self.brain_id {
                    tracing::debug!(got = %msg.brain_id, "sync event for another brain ignored");
                    return false;
                }
                match msg.action {
                    SyncAction::Refresh | SyncAction::MemoUpdate => self.refresh_counter += 1,
                    SyncAction::ClearHighlights => {
                        self.reset_highlights();
                        self.focus_names.clear();
                    }
                }
                if let Some(nodes) = msg.referenced_nodes {
                    self.external_referenced = nodes;
                    if self.state == SearchState::Idle {
                        self.local_referenced = self.external_referenced.clone();
                    }
                }
                if let Some(names) = msg.focus_node_names {
                    self.focus_names = names;
                }
                true
            }
        }
    }

    /// Show/hide overrides: referenced and focus are forced hidden while this
    /// window's list for them is empty. The newly-added set belongs to the
    /// controller's own refresh diff and is left alone.
    pub fn overrides(&self) -> [(HighlightKind, Option<bool>); 3] {
        [
            (
                HighlightKind::Referenced,
                Some(!self.local_referenced.is_empty()),
            ),
            (HighlightKind::Focus, Some(!self.focus_names.is_empty())),
            (HighlightKind::NewlyAdded, None),
        ]
    }

    /// Push this window's highlight state into its controller. Lists are only
    /// handed over when they differ from what the controller already shows,
    /// so repeated calls neither restart pulses nor plan camera moves.
    /// Returns the camera plan of the last list that changed.
    pub fn sync_controller(
        &self,
        controller: &mut GraphRenderController,
        now: Instant,
    ) -> Option<CameraPlan> {
        controller.clear_all(self.clear_trigger);
        for (kind, show) in self.overrides() {
            controller.set_external_override(kind, show);
        }

        let mut camera = None;
        if controller.highlights().get(HighlightKind::Focus).names() != self.focus_names.as_slice() {
            camera = controller.set_focus(self.focus_names.clone(), now);
        }
        if controller.highlights().get(HighlightKind::Referenced).names()
            != self.local_referenced.as_slice()
        {
            camera = controller
                .set_referenced(self.local_referenced.clone(), now)
                .or(camera);
        }
        camera
    }
}

// ============================================================================
// Graph Window
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchView {
    pub state: SearchState,
    pub query: String,
    pub matches: Vec<String>,
}

/// Everything the page needs after an action: the render snapshot plus the
/// window-local state and any camera move to play.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowView {
    #[serde(flatten)]
    pub snapshot: RenderSnapshot,
    pub search: SearchView,
    pub newly_added: Vec<String>,
    pub camera: Option<CameraPlan>,
    pub advanced_open: bool,
    pub search_focused: bool,
    pub stale: bool,
}

/// What an inbound sync event asks of the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncEffect {
    /// The graph should be re-fetched and diffed.
    pub refresh: bool,
    pub camera: Option<CameraPlan>,
}

/// One open graph window: its session and its own render controller. Fetch
/// tokens are per controller, so windows never make each other's results
/// stale.
pub struct GraphWindow {
    pub session: WindowSession,
    pub controller: GraphRenderController,
}

impl GraphWindow {
    pub fn new(session: WindowSession, view: ViewSize) -> Self {
        let controller = GraphRenderController::new(session.controller_config(view));
        Self {
            session,
            controller,
        }
    }

    /// Bring session and controller back in line after any change.
    pub fn sync(&mut self, now: Instant) -> Option<CameraPlan> {
        self.session.graph_updated(self.controller.graph());
        let theme = self.session.theme();
        if self.controller.config().theme != theme {
            let config = ControllerConfig {
                theme,
                ..*self.controller.config()
            };
            self.controller.reconfigure(config);
        }
        self.session.sync_controller(&mut self.controller, now)
    }

    /// Filters a mailbox change through this window's bridge, so messages
    /// arriving on both paths are applied once.
    pub fn accept_storage(&mut self, event: &StorageEvent) -> Option<InboundEvent> {
        self.session.bridge_mut()?.accept_storage(event)
    }

    /// Same for a message posted by the opener.
    pub fn accept_window(&mut self, raw: &str) -> Option<InboundEvent> {
        self.session.bridge_mut()?.accept_window(raw)
    }

    pub fn apply(&mut self, event: InboundEvent, now: Instant) -> SyncEffect {
        let before = self.session.refresh_counter();
        if !self.session.apply(event) {
            return SyncEffect::default();
        }
        SyncEffect {
            refresh: self.session.refresh_counter() != before,
            camera: self.sync(now),
        }
    }

    pub fn search(&mut self, query: &str, now: Instant) -> Result<Option<CameraPlan>> {
        self.session.graph_updated(self.controller.graph());
        self.session.search(query);
        self.session.publish_search()?;
        Ok(self.sync(now))
    }

    /// Clear button: resets every highlight set here and tells the opener.
    pub fn clear(&mut self, now: Instant) -> Result<()> {
        self.session.clear()?;
        self.sync(now);
        Ok(())
    }

    pub fn handle_key(
        &mut self,
        key: &str,
        ctrl: bool,
        meta: bool,
        now: Instant,
    ) -> Result<(Option<Shortcut>, Option<CameraPlan>)> {
        let shortcut = self.session.handle_key(key, ctrl, meta)?;
        let camera = self.sync(now);
        Ok((shortcut, camera))
    }

    pub fn view(&self, now: Instant) -> WindowView {
        WindowView {
            snapshot: self.controller.snapshot(now),
            search: SearchView {
                state: self.session.state(),
                query: self.session.query().to_string(),
                matches: self.session.referenced().to_vec(),
            },
            newly_added: self
                .controller
                .highlights()
                .get(HighlightKind::NewlyAdded)
                .names()
                .to_vec(),
            camera: None,
            advanced_open: self.session.is_advanced_open(),
            search_focused: self.session.is_search_focused(),
            stale: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncMessage;
    use crate::sync::StorageChannel;
    use serde_json::json;

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn session(db: &sled::Db, query: &str) -> WindowSession {
        let params = StandaloneParams::from_query(query);
        WindowSession::new(&params, Preferences::open(db).unwrap())
    }

    fn graph(names: &[&str]) -> GraphData {
        let nodes: Vec<_> = names.iter().map(|n| json!({"id": n})).collect();
        crate::normalize::normalize(&json!({"nodes": nodes, "links": []}))
    }

    #[test]
    fn test_params_from_query() {
        let p = StandaloneParams::from_query("?brainId=42&referencedNodes=%5B%22x%22%5D");
        assert_eq!(p.brain_id, "42");
        assert_eq!(p.referenced_nodes, vec!["x".to_string()]);
        assert_eq!(p.node_count, None);

        let d = StandaloneParams::from_query("");
        assert_eq!(d.brain_id, DEFAULT_BRAIN_ID);
        assert!(d.referenced_nodes.is_empty());

        let bad = StandaloneParams::from_query("brainId=1&referencedNodes=%7Bnope&nodeCount=12");
        assert!(bad.referenced_nodes.is_empty());
        assert_eq!(bad.node_count, Some(12));
    }

    #[test]
    fn test_url_round_trip() {
        let params = StandaloneParams {
            brain_id: "42".into(),
            referenced_nodes: vec!["인공지능".into(), "a b&c".into()],
            node_count: Some(3),
        };
        let url = params.to_url("http://localhost:5173").unwrap();
        assert!(url.starts_with("http://localhost:5173/graph-view?brainId=42&"));
        let query = url::Url::parse(&url).unwrap().query().unwrap().to_string();
        assert_eq!(StandaloneParams::from_query(&query), params);

        assert!(matches!(
            params.to_url("not a url"),
            Err(GraphError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_search_state_machine() {
        let db = temp_db();
        let mut s = session(&db, "brainId=42&referencedNodes=%5B%22Alpha%22%5D");
        s.graph_updated(&graph(&["Alpha", "Beta", "alphabet soup", "Gamma"]));
        assert_eq!(s.state(), SearchState::Idle);
        assert_eq!(s.stats(), GraphStats { nodes: 4, links: 0 });

        let hits = s.search("ALPHA gam").to_vec();
        assert_eq!(hits, vec!["Alpha", "alphabet soup", "Gamma"]);
        assert_eq!(s.state(), SearchState::Highlighted);

        s.search("zzz");
        assert_eq!(s.state(), SearchState::Searching);
        assert!(s.referenced().is_empty());

        // Empty query restores the list handed in by the opener.
        s.search("   ");
        assert_eq!(s.state(), SearchState::Idle);
        assert_eq!(s.referenced(), ["Alpha".to_string()]);
    }

    #[test]
    fn test_escape_clears_and_publishes() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let bridge = SyncBridge::new("42", "standalone", storage.clone());
        let mut s = session(&db, "brainId=42").with_bridge(bridge);
        s.graph_updated(&graph(&["a", "b"]));
        s.search("a");
        s.handle_key("f", true, false).unwrap();
        assert!(s.is_search_focused());

        assert_eq!(
            s.handle_key("Escape", false, false).unwrap(),
            Some(Shortcut::ClearSearch)
        );
        assert_eq!(s.state(), SearchState::Idle);
        assert!(s.query().is_empty());
        assert!(!s.is_search_focused());
        assert_eq!(s.clear_trigger(), ClearTrigger(1));

        let stored = storage
            .read(crate::models::ChannelKey::GraphStateSync)
            .unwrap();
        assert_eq!(stored.action, SyncAction::ClearHighlights);
        assert_eq!(stored.origin.as_deref(), Some("standalone"));
    }

    #[test]
    fn test_shortcuts() {
        assert_eq!(Shortcut::from_key("k", false, true), Some(Shortcut::ToggleAdvanced));
        assert_eq!(Shortcut::from_key("k", false, false), None);
        assert_eq!(Shortcut::from_key("d", true, false), Some(Shortcut::ToggleDarkMode));
        assert_eq!(Shortcut::from_key("x", true, true), None);
    }

    #[test]
    fn test_dark_mode_is_persisted() {
        let db = temp_db();
        let mut s = session(&db, "");
        assert!(!s.is_dark_mode());
        s.handle_key("d", false, true).unwrap();
        assert!(s.is_dark_mode());
        assert_eq!(s.theme(), Theme::Dark);

        let reopened = session(&db, "");
        assert!(reopened.is_dark_mode());

        s.handle_key("k", true, false).unwrap();
        assert!(s.is_advanced_open());
    }

    #[test]
    fn test_inbound_events() {
        let db = temp_db();
        let mut s = session(&db, "brainId=42");

        let foreign = SyncMessage::new("7", SyncAction::Refresh);
        assert!(!s.apply(InboundEvent::Sync(foreign)));
        assert_eq!(s.refresh_counter(), 0);

        assert!(s.apply(InboundEvent::Sync(SyncMessage::new("42", SyncAction::Refresh))));
        assert!(s.apply(InboundEvent::Sync(SyncMessage::new("42", SyncAction::MemoUpdate))));
        assert_eq!(s.refresh_counter(), 2);

        s.apply(InboundEvent::ReferencedNodes(vec!["x".into()]));
        assert_eq!(s.referenced(), ["x".to_string()]);

        let mut with_focus = SyncMessage::new("42", SyncAction::ClearHighlights);
        with_focus.focus_node_names = Some(vec!["f".into()]);
        s.apply(InboundEvent::Sync(with_focus));
        assert!(s.referenced().is_empty());
        assert_eq!(s.clear_trigger(), ClearTrigger(1));
        let overrides = s.overrides();
        assert_eq!(overrides[0], (HighlightKind::Referenced, Some(false)));
        assert_eq!(overrides[1], (HighlightKind::Focus, Some(true)));
    }

    #[test]
    fn test_sync_controller_applies_overrides_and_clear() {
        let db = temp_db();
        let mut s = session(&db, "brainId=42&referencedNodes=%5B%22a%22%5D");
        let mut controller = GraphRenderController::new(s.controller_config(ViewSize::new(800.0, 600.0)));
        controller.load_inline(&json!({"nodes": [{"id": "a"}, {"id": "b"}], "links": []}));
        let now = Instant::now();

        s.sync_controller(&mut controller, now);
        assert!(controller.highlights().is_shown(HighlightKind::Referenced));
        assert!(!controller.highlights().is_shown(HighlightKind::NewlyAdded));

        s.clear().unwrap();
        s.sync_controller(&mut controller, now);
        for kind in HighlightKind::ALL {
            assert!(!controller.highlights().is_shown(kind));
        }
    }

    #[test]
    fn test_search_mirror_slot() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let mut s = session(&db, "brainId=42");
        s.graph_updated(&graph(&["a", "b"]));
        s.search("b");
        storage.write_search(&s.search_mirror()).unwrap();
        let mirror = storage.read_search().unwrap();
        assert_eq!(mirror.query, "b");
        assert_eq!(mirror.matches, vec!["b".to_string()]);
    }

    fn window(db: &sled::Db, query: &str) -> GraphWindow {
        GraphWindow::new(session(db, query), ViewSize::new(800.0, 600.0))
    }

    #[test]
    fn test_sync_controller_keeps_refresh_highlight() {
        let db = temp_db();
        let s = session(&db, "brainId=42");
        let mut c = GraphRenderController::new(s.controller_config(ViewSize::new(800.0, 600.0)));
        c.load_inline(&json!({"nodes": [{"id": "a"}, {"id": "b"}], "links": []}));
        let token = c.begin_fetch();
        let now = Instant::now();
        let outcome = c.finish_refresh(
            token,
            Ok(json!({"nodes": [{"id": "a"}, {"id": "b"}, {"id": "c"}], "links": []})),
            now,
        );
        assert_eq!(outcome.added, vec!["c".to_string()]);

        s.sync_controller(&mut c, now);
        assert!(c.highlights().is_shown(HighlightKind::NewlyAdded));
        assert_eq!(
            c.highlights().get(HighlightKind::NewlyAdded).names(),
            ["c".to_string()]
        );
    }

    #[test]
    fn test_sync_controller_does_not_restart_pulses() {
        let db = temp_db();
        let s = session(&db, "brainId=42&referencedNodes=%5B%22a%22%5D");
        let mut c = GraphRenderController::new(s.controller_config(ViewSize::new(800.0, 600.0)));
        c.load_inline(&json!({"nodes": [{"id": "a"}, {"id": "b"}], "links": []}));
        c.update_positions(vec![("a".to_string(), crate::models::Point::new(3.0, 4.0))]);

        let t0 = Instant::now();
        assert!(s.sync_controller(&mut c, t0).is_some());
        let later = t0 + std::time::Duration::from_millis(700);
        assert!(s.sync_controller(&mut c, later).is_none());
        assert_eq!(
            c.highlights().get(HighlightKind::Referenced).pulse_started(),
            Some(t0)
        );
    }

    #[test]
    fn test_window_search_then_clear_resets_every_set() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let bridge = SyncBridge::new("42", "standalone", storage.clone());
        let mut w = GraphWindow::new(
            session(&db, "brainId=42").with_bridge(bridge),
            ViewSize::new(800.0, 600.0),
        );
        w.controller
            .load_inline(&json!({"nodes": [{"id": "Alpha"}, {"id": "Beta"}], "links": []}));
        let now = Instant::now();
        let token = w.controller.begin_fetch();
        w.controller.finish_refresh(
            token,
            Ok(json!({"nodes": [{"id": "Alpha"}, {"id": "Beta"}, {"id": "Gamma"}], "links": []})),
            now,
        );

        w.search("alp", now).unwrap();
        let view = w.view(now);
        assert_eq!(view.search.state, SearchState::Highlighted);
        assert_eq!(view.search.matches, vec!["Alpha".to_string()]);
        assert_eq!(view.newly_added, vec!["Gamma".to_string()]);
        assert_eq!(storage.read_search().unwrap().matches, vec!["Alpha".to_string()]);
        let alpha = view.snapshot.nodes.iter().find(|n| n.id == "Alpha").unwrap();
        assert_eq!(alpha.highlights, vec![HighlightKind::Referenced]);

        w.clear(now).unwrap();
        let view = w.view(now);
        assert!(view.newly_added.is_empty());
        assert!(view.snapshot.nodes.iter().all(|n| n.highlights.is_empty()));
        assert_eq!(view.search.state, SearchState::Idle);
        assert_eq!(
            storage.read(crate::models::ChannelKey::GraphStateSync).unwrap().action,
            SyncAction::ClearHighlights
        );
    }

    #[test]
    fn test_window_inbound_events() {
        let db = temp_db();
        let mut w = window(&db, "brainId=42");
        w.controller
            .load_inline(&json!({"nodes": [{"id": "a"}, {"id": "b"}], "links": []}));
        let now = Instant::now();

        let effect = w.apply(InboundEvent::Sync(SyncMessage::new("42", SyncAction::MemoUpdate)), now);
        assert!(effect.refresh);
        assert_eq!(
            w.apply(InboundEvent::Sync(SyncMessage::new("7", SyncAction::Refresh)), now),
            SyncEffect::default()
        );

        let effect = w.apply(InboundEvent::ReferencedNodes(vec!["b".into()]), now);
        assert!(!effect.refresh);
        assert!(w.controller.highlights().is_shown(HighlightKind::Referenced));

        w.apply(
            InboundEvent::Sync(SyncMessage::new("42", SyncAction::ClearHighlights)),
            now,
        );
        for kind in HighlightKind::ALL {
            assert!(!w.controller.highlights().is_shown(kind));
        }
    }

    #[test]
    fn test_window_escape_and_dark_mode_keys() {
        let db = temp_db();
        let mut w = window(&db, "brainId=42");
        w.controller.load_inline(&json!({"nodes": [{"id": "a"}], "links": []}));
        let now = Instant::now();
        w.search("a", now).unwrap();

        let (shortcut, _) = w.handle_key("Escape", false, false, now).unwrap();
        assert_eq!(shortcut, Some(Shortcut::ClearSearch));
        assert!(!w.controller.highlights().is_shown(HighlightKind::Referenced));

        w.handle_key("d", true, false, now).unwrap();
        assert_eq!(w.controller.config().theme, Theme::Dark);
        assert_eq!(w.view(now).snapshot.theme, Theme::Dark);
    }
}
