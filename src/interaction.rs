//! Pointer interaction on the canvas: click disambiguation and node drag.

use crate::models::{NodeId, Point};
use std::time::{Duration, Instant};

/// Two clicks on the same node closer together than this are a double-click.
pub const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Click {
    Single(NodeId),
    Double(NodeId),
}

/// Remembers the last node click. Clicks on the empty canvas are not node
/// clicks and leave the bookkeeping untouched, so a node click, a background
/// click and a second node click inside the window still count as a
/// double-click.
#[derive(Debug, Default)]
pub struct ClickTracker {
    last: Option<(NodeId, Instant)>,
}

impl ClickTracker {
    pub fn node_click(&mut self, id: &str, now: Instant) -> Click {
        let is_double = matches!(
            &self.last,
            Some((prev, at)) if prev == id && now.saturating_duration_since(*at) < DOUBLE_CLICK_WINDOW
        );
        if is_double {
            self.last = None;
            Click::Double(id.to_string())
        } else {
            self.last = Some((id.to_string(), now));
            Click::Single(id.to_string())
        }
    }
}

/// A node being dragged; it stays pinned at the pointer until release.
#[derive(Debug, Clone, PartialEq)]
pub struct Drag {
    pub node: NodeId,
    pub at: Point,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_click_same_node_within_window() {
        let t0 = Instant::now();
        let mut clicks = ClickTracker::default();
        assert_eq!(clicks.node_click("a", t0), Click::Single("a".into()));
        assert_eq!(
            clicks.node_click("a", t0 + Duration::from_millis(200)),
            Click::Double("a".into())
        );
        // A third click starts over.
        assert_eq!(
            clicks.node_click("a", t0 + Duration::from_millis(250)),
            Click::Single("a".into())
        );
    }

    #[test]
    fn test_slow_or_different_clicks_are_single() {
        let t0 = Instant::now();
        let mut clicks = ClickTracker::default();
        clicks.node_click("a", t0);
        assert_eq!(
            clicks.node_click("a", t0 + Duration::from_millis(300)),
            Click::Single("a".into())
        );
        assert_eq!(
            clicks.node_click("b", t0 + Duration::from_millis(350)),
            Click::Single("b".into())
        );
    }
}
