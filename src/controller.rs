//! Graph render controller.
//!
//! Owns the canonical graph snapshot and everything derived from it: node
//! colours, highlight sets, pulse timing, camera plans and the timelapse
//! schedule. The renderer (force layout + canvas) reads a [`RenderSnapshot`]
//! and feeds layout coordinates back through [`GraphRenderController::update_positions`].
//!
//! Every fetch is tagged with a [`RequestToken`]. Only the result of the most
//! recently issued fetch is applied; anything older that resolves later is
//! discarded, so an overtaken refresh cannot roll the graph back.

use crate::api::GraphSource;
use crate::camera::{initial_zoom, recenter_plan, zoom_to_node_plan, CameraPlan, ViewSize};
use crate::error::Result;
use crate::highlight::{ClearTrigger, HighlightKind, Highlights};
use crate::interaction::{Click, ClickTracker, Drag};
use crate::models::{GraphData, GraphLink, GraphStats, NodeGroup, NodeId, Point};
use crate::normalize::normalize;
use crate::timelapse::{Timelapse, TimelapseCommands, TimelapseFrame};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tokio::sync::watch;

// ============================================================================
// Theme
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Node fill colours by connectivity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub hub: &'static str,
    pub linked: &'static str,
    pub leaf: &'static str,
}

const LIGHT_PALETTE: Palette = Palette {
    hub: "#e03131",
    linked: "#f08c00",
    leaf: "#4263eb",
};

const DARK_PALETTE: Palette = Palette {
    hub: "#ff8787",
    linked: "#ffd43b",
    leaf: "#74c0fc",
};

impl Theme {
    pub fn palette(self) -> Palette {
        match self {
            Theme::Light => LIGHT_PALETTE,
            Theme::Dark => DARK_PALETTE,
        }
    }

    pub fn toggled(self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl Palette {
    pub fn color_for(&self, link_count: usize) -> &'static str {
        match link_count {
            n if n >= 3 => self.hub,
            2 => self.linked,
            _ => self.leaf,
        }
    }
}

/// Fixed at construction; a theme change builds a new config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub theme: Theme,
    pub view: ViewSize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            view: ViewSize::new(1200.0, 800.0),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RequestToken(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Applied(GraphStats),
    /// A newer fetch was issued before this one resolved.
    Stale,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub load: LoadOutcome,
    /// Names present now but absent from the previous snapshot.
    pub added: Vec<String>,
    pub camera: Option<CameraPlan>,
}

// ============================================================================
// Render Snapshot
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: NodeId,
    pub name: String,
    pub group: NodeGroup,
    pub color: String,
    pub link_count: usize,
    pub highlights: Vec<HighlightKind>,
    /// Pulse ring progress for the highest-priority highlight.
    pub pulse: Option<f64>,
    pub position: Option<Point>,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightView {
    pub kind: HighlightKind,
    pub names: Vec<String>,
    pub shown: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSnapshot {
    pub nodes: Vec<NodeView>,
    pub links: Vec<GraphLink>,
    pub stats: GraphStats,
    pub initial_zoom: f64,
    pub highlights: Vec<HighlightView>,
    pub theme: Theme,
    pub loading: bool,
    pub error: Option<String>,
}

// ============================================================================
// Controller
// ============================================================================

pub struct GraphRenderController {
    config: ControllerConfig,
    graph: GraphData,
    has_snapshot: bool,
    highlights: Highlights,
    loading: bool,
    error: Option<String>,
    issued: u64,
    initial_zoom_applied: bool,
    timelapse: Option<Timelapse>,
    clicks: ClickTracker,
    drag: Option<Drag>,
    stats_tx: watch::Sender<GraphStats>,
}

impl GraphRenderController {
    pub fn new(config: ControllerConfig) -> Self {
        let (stats_tx, _) = watch::channel(GraphStats::default());
        Self {
            config,
            graph: GraphData::default(),
            has_snapshot: false,
            highlights: Highlights::default(),
            loading: false,
            error: None,
            issued: 0,
            initial_zoom_applied: false,
            timelapse: None,
            clicks: ClickTracker::default(),
            drag: None,
            stats_tx,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Swap in a new configuration (e.g. after a theme toggle) and recolour.
    pub fn reconfigure(&mut self, config: ControllerConfig) {
        self.config = config;
        self.apply_colors();
    }

    pub fn graph(&self) -> &GraphData {
        &self.graph
    }

    pub fn highlights(&self) -> &Highlights {
        &self.highlights
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Node/link counts, updated on every applied snapshot.
    pub fn subscribe(&self) -> watch::Receiver<GraphStats> {
        self.stats_tx.subscribe()
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Issue a token for a new fetch and show the loading state.
    pub fn begin_fetch(&mut self) -> RequestToken {
        self.issued += 1;
        self.loading = true;
        RequestToken(self.issued)
    }

    fn is_current(&self, token: RequestToken) -> bool {
        token.0 == self.issued
    }

    fn apply_colors(&mut self) {
        let palette = self.config.theme.palette();
        for node in &mut self.graph.nodes {
            node.color = Some(palette.color_for(node.link_count).to_string());
        }
    }

    fn store(&mut self, mut data: GraphData) -> GraphStats {
        // Keep layout coordinates of nodes that survive the reload.
        let previous: HashMap<&str, (Option<Point>, Option<Point>)> = self
            .graph
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), (n.position, n.pinned)))
            .collect();
        for node in &mut data.nodes {
            if let Some((position, pinned)) = previous.get(node.id.as_str()) {
                node.position = *position;
                node.pinned = *pinned;
            }
        }

        self.graph = data;
        self.has_snapshot = true;
        self.apply_colors();
        let stats = self.graph.stats();
        self.stats_tx.send_replace(stats);
        stats
    }

    /// Apply the result of a fetch started with [`begin_fetch`](Self::begin_fetch).
    pub fn finish_load(&mut self, token: RequestToken, result: Result<Value>) -> LoadOutcome {
        if !self.is_current(token) {
            tracing::debug!(token = token.0, latest = self.issued, "discarding stale graph fetch");
            return LoadOutcome::Stale;
        }
        self.loading = false;
        match result {
            Ok(raw) => {
                self.error = None;
                let stats = self.store(normalize(&raw));
                tracing::info!(nodes = stats.nodes, links = stats.links, "graph loaded");
                LoadOutcome::Applied(stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "graph fetch failed");
                self.error = Some(format!("Failed to load graph: {}", e));
                LoadOutcome::Failed
            }
        }
    }

    /// Like [`finish_load`](Self::finish_load), but diffs node names against
    /// the previous snapshot and highlights the additions.
    pub fn finish_refresh(
        &mut self,
        token: RequestToken,
        result: Result<Value>,
        now: Instant,
    ) -> RefreshOutcome {
        let had_snapshot = self.has_snapshot;
        let before: HashSet<String> = self.graph.nodes.iter().map(|n| n.name.clone()).collect();

        let load = self.finish_load(token, result);
        if !matches!(load, LoadOutcome::Applied(_)) {
            return RefreshOutcome {
                load,
                added: Vec::new(),
                camera: None,
            };
        }

        let mut seen = HashSet::new();
        let added: Vec<String> = if had_snapshot {
            self.graph
                .nodes
                .iter()
                .filter(|n| !before.contains(&n.name) && seen.insert(n.name.clone()))
                .map(|n| n.name.clone())
                .collect()
        } else {
            Vec::new()
        };

        self.highlights
            .get_mut(HighlightKind::NewlyAdded)
            .replace(added.clone(), now);
        let camera = if added.is_empty() {
            None
        } else {
            tracing::info!(count = added.len(), "new nodes since last snapshot");
            self.plan_for(&added)
        };

        RefreshOutcome {
            load,
            added,
            camera,
        }
    }

    /// Accept an inline payload instead of fetching.
    pub fn load_inline(&mut self, raw: &Value) -> GraphStats {
        self.issued += 1;
        self.loading = false;
        self.error = None;
        self.store(normalize(raw))
    }

    pub async fn load<S: GraphSource>(&mut self, source: &S, brain_id: &str) -> LoadOutcome {
        let token = self.begin_fetch();
        let result = source.fetch_graph(brain_id).await;
        self.finish_load(token, result)
    }

    pub async fn refresh<S: GraphSource>(
        &mut self,
        source: &S,
        brain_id: &str,
        now: Instant,
    ) -> RefreshOutcome {
        let token = self.begin_fetch();
        let result = source.fetch_graph(brain_id).await;
        self.finish_refresh(token, result, now)
    }

    // ------------------------------------------------------------------------
    // Highlights
    // ------------------------------------------------------------------------

    fn plan_for(&self, names: &[String]) -> Option<CameraPlan> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let positions: Vec<Point> = self
            .graph
            .nodes
            .iter()
            .filter(|n| wanted.contains(n.name.as_str()))
            .filter_map(|n| n.position)
            .collect();
        let plan = recenter_plan(positions, self.config.view);
        if plan.is_none() {
            tracing::debug!(targets = names.len(), "no layout coordinates yet; camera stays put");
        }
        plan
    }

    /// Nodes cited by a chat answer.
    pub fn set_referenced(&mut self, names: Vec<String>, now: Instant) -> Option<CameraPlan> {
        self.highlights
            .get_mut(HighlightKind::Referenced)
            .replace(names, now);
        let names = self.highlights.get(HighlightKind::Referenced).names().to_vec();
        if names.is_empty() {
            None
        } else {
            self.plan_for(&names)
        }
    }

    /// Nodes the user navigated to from a source file; always recenters.
    pub fn set_focus(&mut self, names: Vec<String>, now: Instant) -> Option<CameraPlan> {
        self.highlights.get_mut(HighlightKind::Focus).replace(names, now);
        let names = self.highlights.get(HighlightKind::Focus).names().to_vec();
        self.plan_for(&names)
    }

    /// Clears every highlight set when `trigger` is a new counter value.
    pub fn clear_all(&mut self, trigger: ClearTrigger) -> bool {
        let cleared = self.highlights.clear_all(trigger);
        if cleared {
            tracing::debug!(trigger = trigger.0, "highlights cleared");
        }
        cleared
    }

    pub fn set_external_override(&mut self, kind: HighlightKind, show: Option<bool>) {
        self.highlights.set_override(kind, show);
    }

    // ------------------------------------------------------------------------
    // Layout Feedback
    // ------------------------------------------------------------------------

    /// Record coordinates from a layout tick. Returns the initial zoom the
    /// first time geometry becomes known after a load.
    pub fn update_positions<I>(&mut self, positions: I) -> Option<f64>
    where
        I: IntoIterator<Item = (NodeId, Point)>,
    {
        let positions: HashMap<NodeId, Point> = positions.into_iter().collect();
        let mut any = false;
        for node in &mut self.graph.nodes {
            if node.pinned.is_some() {
                continue;
            }
            if let Some(p) = positions.get(&node.id) {
                node.position = Some(*p);
                any = true;
            }
        }

        if any && self.has_snapshot && !self.initial_zoom_applied {
            self.initial_zoom_applied = true;
            Some(initial_zoom(self.graph.nodes.len()))
        } else {
            None
        }
    }

    pub fn drag_node(&mut self, id: &str, at: Point) {
        if let Some(node) = self.graph.nodes.iter_mut().find(|n| n.id == id) {
            node.pinned = Some(at);
            node.position = Some(at);
            self.drag = Some(Drag {
                node: id.to_string(),
                at,
            });
        }
    }

    /// Release the dragged node back to the simulation.
    pub fn end_drag(&mut self) {
        if let Some(drag) = self.drag.take() {
            if let Some(node) = self.graph.nodes.iter_mut().find(|n| n.id == drag.node) {
                node.pinned = None;
            }
        }
    }

    /// Single clicks only select; a double-click zooms onto the node.
    pub fn click_node(&mut self, id: &str, now: Instant) -> Option<CameraPlan> {
        match self.clicks.node_click(id, now) {
            Click::Single(_) => None,
            Click::Double(id) => self
                .graph
                .node(&id)
                .and_then(|n| n.position)
                .map(zoom_to_node_plan),
        }
    }

    // ------------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------------

    pub fn snapshot(&self, now: Instant) -> RenderSnapshot {
        let palette = self.config.theme.palette();
        let nodes = self
            .graph
            .nodes
            .iter()
            .map(|n| {
                let kinds = self.highlights.kinds_for(&n.name);
                let pulse = kinds
                    .first()
                    .and_then(|k| self.highlights.get(*k).pulse_progress(now));
                NodeView {
                    id: n.id.clone(),
                    name: n.name.clone(),
                    group: n.group.clone(),
                    color: n
                        .color
                        .clone()
                        .unwrap_or_else(|| palette.color_for(n.link_count).to_string()),
                    link_count: n.link_count,
                    highlights: kinds,
                    pulse,
                    position: n.position,
                    pinned: n.pinned.is_some(),
                }
            })
            .collect();

        let highlights = HighlightKind::ALL
            .into_iter()
            .map(|kind| HighlightView {
                kind,
                names: self.highlights.get(kind).names().to_vec(),
                shown: self.highlights.is_shown(kind),
            })
            .collect();

        RenderSnapshot {
            nodes,
            links: self.graph.links.clone(),
            stats: self.graph.stats(),
            initial_zoom: initial_zoom(self.graph.nodes.len()),
            highlights,
            theme: self.config.theme,
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

impl TimelapseCommands for GraphRenderController {
    fn start_timelapse(&mut self, now: Instant) {
        let mut rng = rand::thread_rng();
        self.timelapse = Some(Timelapse::new(&self.graph, now, &mut rng));
        tracing::debug!(nodes = self.graph.nodes.len(), "timelapse started");
    }

    fn timelapse_frame(&self, now: Instant) -> Option<TimelapseFrame> {
        self.timelapse.as_ref().map(|t| t.frame(now))
    }
}

// ============================================================================
// Tests
// ============================================================================
