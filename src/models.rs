//! Data models for the graph view.
//!
//! This module contains the canonical graph snapshot types, the cross-window
//! sync payloads, and the request/response bodies of the backend graph API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Graph Snapshot
// ============================================================================

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Node grouping as sent by the backend: usually a number, sometimes a
/// category/type label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeGroup {
    Number(i64),
    Label(String),
}

impl Default for NodeGroup {
    fn default() -> Self {
        NodeGroup::Number(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub group: NodeGroup,
    /// Number of links referencing this node, in either direction.
    #[serde(default)]
    pub link_count: usize,
    /// Fill colour, assigned by the render controller from the theme palette.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Layout coordinates; owned by the force simulation once it starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    /// Fixed coordinates while the user drags the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<Point>,
    /// Raw backend fields we do not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: &str, name: &str, group: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            group: NodeGroup::Number(group),
            link_count: 0,
            color: None,
            position: None,
            pinned: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: NodeId,
    pub target: NodeId,
    pub relation: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphLink {
    pub fn new(source: &str, target: &str, relation: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            relation: relation.to_string(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

impl GraphData {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.nodes.len(),
            links: self.links.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub links: usize,
}

// ============================================================================
// Cross-Window Sync
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    #[serde(alias = "refresh_from_fullscreen")]
    Refresh,
    #[serde(alias = "clear_highlights_from_fullscreen")]
    ClearHighlights,
    MemoUpdate,
}

/// Advisory state change exchanged between a main window and its detached
/// graph window. Never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub brain_id: String,
    pub action: SyncAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_nodes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_node_names: Option<Vec<String>>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Window that wrote the message; readers skip their own writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl SyncMessage {
    pub fn new(brain_id: &str, action: SyncAction) -> Self {
        Self {
            brain_id: brain_id.to_string(),
            action,
            referenced_nodes: None,
            focus_node_names: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin: None,
        }
    }
}

/// Keys of the shared storage mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    GraphStateSync,
    StandaloneGraphState,
    GraphRefresh,
}

impl ChannelKey {
    pub const ALL: [ChannelKey; 3] = [
        ChannelKey::GraphStateSync,
        ChannelKey::StandaloneGraphState,
        ChannelKey::GraphRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKey::GraphStateSync => "graphStateSync",
            ChannelKey::StandaloneGraphState => "standaloneGraphState",
            ChannelKey::GraphRefresh => "graphRefresh",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    /// Mailbox key a given action is published under.
    pub fn for_action(action: SyncAction) -> Self {
        match action {
            SyncAction::Refresh => ChannelKey::GraphRefresh,
            SyncAction::ClearHighlights | SyncAction::MemoUpdate => ChannelKey::GraphStateSync,
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message posted directly to a window handle, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowMessage {
    UpdateReferencedNodes {
        #[serde(default)]
        nodes: Vec<String>,
    },
    GraphStateSync {
        message: SyncMessage,
    },
}

/// Search state a detached window mirrors into the `standaloneGraphState`
/// mailbox slot so the opener can show what is being looked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMirror {
    pub brain_id: String,
    pub query: String,
    #[serde(default)]
    pub matches: Vec<String>,
    pub timestamp: i64,
}

// ============================================================================
// Backend API Bodies
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProcessTextRequest {
    pub text: String,
    pub source_id: String,
    pub brain_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessTextResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerRequest {
    pub question: String,
    pub brain_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    #[serde(default)]
    pub referenced_nodes: Vec<String>,
    #[serde(default)]
    pub chat_id: Option<Value>,
}
