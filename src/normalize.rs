//! Normalization of backend graph payloads.
//!
//! The graph endpoint has no fixed schema: depending on the backend version
//! it returns a bare array, `{nodes, links}`, `{vertices, edges}` or a Cypher
//! result set. Everything is folded into the canonical [`GraphData`] here.
//! Normalization never fails; unusable input yields [`default_graph`] so the
//! view is never blank.

use crate::models::{GraphData, GraphLink, GraphNode, NodeGroup};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

const NODE_ID_FIELDS: &[&str] = &["id", "nodeId", "_id", "name", "label"];
const NODE_NAME_FIELDS: &[&str] = &["name", "label", "title"];
const NODE_GROUP_FIELDS: &[&str] = &["group", "category", "type"];
const ENDPOINT_ID_FIELDS: &[&str] = &["id", "_id", "nodeId", "name"];
const RELATION_FIELDS: &[&str] = &["relation", "label", "type", "name"];
const DEFAULT_RELATION: &str = "연결";

/// Keys the canonical node owns; raw values under these are not carried in `extra`.
const NODE_OWN_FIELDS: &[&str] = &["id", "name", "group", "linkCount", "color", "position", "pinned"];

// ============================================================================
// Field Helpers
// ============================================================================

/// Reads a field as an identifier-like string. Empty strings, zero, null and
/// non-scalar values count as absent.
fn scalar_field(obj: &Map<String, Value>, field: &str) -> Option<String> {
    match obj.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn first_field(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| scalar_field(obj, f))
}

fn group_field(obj: &Map<String, Value>) -> NodeGroup {
    for field in NODE_GROUP_FIELDS {
        match obj.get(*field) {
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64().filter(|i| *i != 0) {
                    return NodeGroup::Number(i);
                }
            }
            Some(Value::String(s)) if !s.is_empty() => return NodeGroup::Label(s.clone()),
            _ => {}
        }
    }
    NodeGroup::default()
}

fn is_truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

fn without_fields(obj: &Map<String, Value>, fields: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| !fields.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// ============================================================================
// Shape Detection
// ============================================================================

fn as_vec(v: Option<&Value>) -> Vec<Value> {
    match v {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Pulls raw node and link arrays out of whichever shape the backend sent.
fn extract_raw(data: &Value) -> (Vec<Value>, Vec<Value>) {
    match data {
        Value::Array(items) => {
            let nodes = items
                .iter()
                .filter(|item| {
                    item.get("type").and_then(Value::as_str) == Some("node")
                        || !is_truthy(item.get("source"))
                })
                .cloned()
                .collect();
            let links = items
                .iter()
                .filter(|item| {
                    item.get("type").and_then(Value::as_str) == Some("link")
                        || (is_truthy(item.get("source")) && is_truthy(item.get("target")))
                })
                .cloned()
                .collect();
            (nodes, links)
        }
        Value::Object(obj) => {
            if is_truthy(obj.get("nodes")) || is_truthy(obj.get("vertices")) {
                let nodes = if is_truthy(obj.get("nodes")) {
                    as_vec(obj.get("nodes"))
                } else {
                    as_vec(obj.get("vertices"))
                };
                let links = if is_truthy(obj.get("links")) {
                    as_vec(obj.get("links"))
                } else {
                    as_vec(obj.get("edges"))
                };
                (nodes, links)
            } else if let Some(Value::Array(results)) = obj.get("results") {
                let mut nodes = Vec::new();
                let mut links = Vec::new();
                for result in results {
                    nodes.extend(as_vec(result.get("nodes")));
                    links.extend(as_vec(result.get("relationships")));
                }
                (nodes, links)
            } else {
                (Vec::new(), Vec::new())
            }
        }
        _ => (Vec::new(), Vec::new()),
    }
}

// ============================================================================
// Normalization
// ============================================================================

fn normalize_node(raw: &Value, index: usize) -> GraphNode {
    match raw {
        Value::String(s) => GraphNode {
            id: s.clone(),
            name: s.clone(),
            ..GraphNode::new("", "", 1)
        },
        Value::Object(obj) => {
            let id = first_field(obj, NODE_ID_FIELDS).unwrap_or_else(|| format!("node-{}", index));
            let name = first_field(obj, NODE_NAME_FIELDS).unwrap_or_else(|| id.clone());
            GraphNode {
                group: group_field(obj),
                extra: without_fields(obj, NODE_OWN_FIELDS),
                ..GraphNode::new(&id, &name, 1)
            }
        }
        Value::Array(_) => {
            let id = format!("node-{}", index);
            GraphNode::new(&id, &id, 1)
        }
        _ => GraphNode::new(&format!("node-{}", index), &format!("노드 {}", index), 1),
    }
}

fn resolve_endpoint(value: Option<&Value>, fallback: String) -> Option<String> {
    match value? {
        Value::Object(obj) => Some(first_field(obj, ENDPOINT_ID_FIELDS).unwrap_or(fallback)),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_link(raw: &Value, index: usize, node_ids: &HashSet<&str>) -> Option<GraphLink> {
    let obj = raw.as_object()?;
    let source = resolve_endpoint(obj.get("source"), format!("source-{}", index));
    let target = resolve_endpoint(obj.get("target"), format!("target-{}", index));

    let (source, target) = match (source, target) {
        (Some(s), Some(t)) if node_ids.contains(s.as_str()) && node_ids.contains(t.as_str()) => {
            (s, t)
        }
        (s, t) => {
            tracing::debug!(source = ?s, target = ?t, "dropping link with unknown endpoint");
            return None;
        }
    };

    let relation = first_field(obj, RELATION_FIELDS).unwrap_or_else(|| DEFAULT_RELATION.to_string());
    Some(GraphLink {
        source,
        target,
        relation,
        extra: without_fields(obj, &["source", "target", "relation"]),
    })
}

/// Folds any backend graph payload into canonical `{nodes, links}` form with
/// per-node link counts filled in.
pub fn normalize(raw: &Value) -> GraphData {
    if !raw.is_object() && !raw.is_array() {
        tracing::warn!("graph payload is missing or not an object; using default graph");
        return default_graph();
    }

    let (raw_nodes, raw_links) = extract_raw(raw);
    if raw_nodes.is_empty() {
        tracing::warn!("graph payload has no nodes; using default graph");
        return default_graph();
    }

    let nodes: Vec<GraphNode> = raw_nodes
        .iter()
        .enumerate()
        .map(|(i, n)| normalize_node(n, i))
        .collect();

    let links = {
        let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        raw_links
            .iter()
            .enumerate()
            .filter_map(|(i, l)| normalize_link(l, i, &node_ids))
            .collect()
    };

    let mut data = GraphData { nodes, links };
    compute_link_counts(&mut data);
    data
}

/// Recomputes `link_count` for every node from the current link list.
pub fn compute_link_counts(data: &mut GraphData) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for link in &data.links {
        *counts.entry(link.source.as_str()).or_insert(0) += 1;
        *counts.entry(link.target.as_str()).or_insert(0) += 1;
    }
    let counts: HashMap<String, usize> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    for node in &mut data.nodes {
        node.link_count = counts.get(&node.id).copied().unwrap_or(0);
    }
}

/// Graph shown when the payload is unusable.
pub fn default_graph() -> GraphData {
    let mut data = GraphData {
        nodes: vec![
            GraphNode::new("main", "메인 노드", 1),
            GraphNode::new("node1", "노드 1", 2),
            GraphNode::new("node2", "노드 2", 2),
        ],
        links: vec![
            GraphLink::new("main", "node1", "관계 1"),
            GraphLink::new("main", "node2", "관계 2"),
        ],
    };
    compute_link_counts(&mut data);
    data
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(data: &GraphData) -> Vec<&str> {
        data.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_unusable_input_yields_default_graph() {
        let cases = vec![
            Value::Null,
            json!(42),
            json!("graph"),
            json!({}),
            json!({"nodes": []}),
            json!({"vertices": [], "edges": [{"source": "a", "target": "b"}]}),
            json!({"results": []}),
            json!([]),
        ];
        for case in cases {
            assert_eq!(normalize(&case), default_graph(), "input: {}", case);
        }
    }

    #[test]
    fn test_default_graph_shape() {
        let d = default_graph();
        assert_eq!(ids(&d), vec!["main", "node1", "node2"]);
        assert_eq!(d.links.len(), 2);
        assert_eq!(d.node("main").unwrap().link_count, 2);
    }

    #[test]
    fn test_two_node_scenario() {
        let raw = json!({"nodes": [{"id": "a"}, {"id": "b"}], "links": [{"source": "a", "target": "b"}]});
        let data = normalize(&raw);
        assert_eq!(data.nodes.len(), 2);
        assert_eq!(data.links.len(), 1);
        assert!(data.nodes.iter().all(|n| n.link_count == 1));
        assert_eq!(data.links[0].relation, "연결");
        assert_eq!(data.nodes[0].name, "a");
        assert_eq!(data.nodes[0].group, NodeGroup::Number(1));
    }

    #[test]
    fn test_links_with_unknown_endpoints_are_dropped() {
        let raw = json!({
            "nodes": [{"id": "a"}, {"id": "b"}],
            "links": [
                {"source": "a", "target": "b"},
                {"source": "a", "target": "ghost"},
                {"source": "nobody", "target": "b"},
                {"target": "b"},
                "not-a-link"
            ]
        });
        let data = normalize(&raw);
        assert_eq!(data.links.len(), 1);
        let node_ids: HashSet<&str> = data.nodes.iter().map(|n| n.id.as_str()).collect();
        for link in &data.links {
            assert!(node_ids.contains(link.source.as_str()));
            assert!(node_ids.contains(link.target.as_str()));
        }
    }

    #[test]
    fn test_vertices_and_edges_shape() {
        let raw = json!({
            "vertices": [{"nodeId": 7, "title": "Seven"}, {"_id": "x", "label": "Ex"}],
            "edges": [{"source": {"id": 7}, "target": {"_id": "x"}, "type": "KNOWS"}]
        });
        let data = normalize(&raw);
        assert_eq!(ids(&data), vec!["7", "x"]);
        assert_eq!(data.nodes[0].name, "Seven");
        assert_eq!(data.nodes[1].name, "Ex");
        assert_eq!(data.links.len(), 1);
        assert_eq!(data.links[0].source, "7");
        assert_eq!(data.links[0].target, "x");
        assert_eq!(data.links[0].relation, "KNOWS");
    }

    #[test]
    fn test_object_endpoints_unwrap() {
        let raw = json!({
            "nodes": [{"id": "a", "category": "concept"}, {"name": "b"}],
            "links": [{"source": {"id": "a"}, "target": {"name": "b"}, "label": "uses"}]
        });
        let data = normalize(&raw);
        assert_eq!(data.links.len(), 1);
        assert_eq!(data.links[0].source, "a");
        assert_eq!(data.links[0].target, "b");
        assert_eq!(data.links[0].relation, "uses");
        assert_eq!(data.nodes[0].group, NodeGroup::Label("concept".to_string()));
    }

    #[test]
    fn test_array_payload() {
        let raw = json!([
            {"id": "a"},
            {"id": "b", "type": "node"},
            {"source": "a", "target": "b", "relation": "r"},
        ]);
        let data = normalize(&raw);
        assert_eq!(ids(&data), vec!["a", "b"]);
        assert_eq!(data.links.len(), 1);
        assert_eq!(data.links[0].relation, "r");
    }

    #[test]
    fn test_cypher_results_concatenate() {
        let raw = json!({
            "results": [
                {"nodes": [{"id": "a"}], "relationships": []},
                {"nodes": [{"id": "b"}], "relationships": [{"source": "a", "target": "b"}]}
            ]
        });
        let data = normalize(&raw);
        assert_eq!(ids(&data), vec!["a", "b"]);
        assert_eq!(data.links.len(), 1);
    }

    #[test]
    fn test_scalar_nodes() {
        let raw = json!({"nodes": ["alpha", 3, null]});
        let data = normalize(&raw);
        assert_eq!(data.nodes[0].id, "alpha");
        assert_eq!(data.nodes[0].name, "alpha");
        assert_eq!(data.nodes[1].id, "node-1");
        assert_eq!(data.nodes[1].name, "노드 1");
        assert_eq!(data.nodes[2].id, "node-2");
    }

    #[test]
    fn test_extra_fields_preserved() {
        let raw = json!({"nodes": [{"id": "a", "name": "A", "description": "first"}]});
        let data = normalize(&raw);
        assert_eq!(data.nodes[0].extra.get("description"), Some(&json!("first")));
        assert!(data.nodes[0].extra.get("id").is_none());
    }

    #[test]
    fn test_link_count_increments_by_one_per_new_link() {
        let mut data = normalize(&json!({
            "nodes": [{"id": "a"}, {"id": "b"}, {"id": "c"}],
            "links": [{"source": "a", "target": "b"}]
        }));
        let before: Vec<usize> = data.nodes.iter().map(|n| n.link_count).collect();
        data.links.push(GraphLink::new("b", "c", "next"));
        compute_link_counts(&mut data);
        let after: Vec<usize> = data.nodes.iter().map(|n| n.link_count).collect();
        assert_eq!(before, vec![1, 1, 0]);
        assert_eq!(after, vec![1, 2, 1]);
    }
}
