//! Highlight sets and pulse timing.
//!
//! Three independent named sets drive node emphasis: nodes cited by a chat
//! answer, nodes navigated to from a source file, and nodes that appeared
//! since the previous snapshot. Each carries its own visibility flag and a
//! pulse start time used to draw an expanding ring.

use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// One full expansion of the pulse ring.
pub const PULSE_PERIOD: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HighlightKind {
    Referenced,
    Focus,
    NewlyAdded,
}

impl HighlightKind {
    pub const ALL: [HighlightKind; 3] = [
        HighlightKind::Referenced,
        HighlightKind::Focus,
        HighlightKind::NewlyAdded,
    ];
}

#[derive(Debug, Clone, Default)]
pub struct HighlightSet {
    names: Vec<String>,
    lookup: HashSet<String>,
    visible: bool,
    pulse_started: Option<Instant>,
}

impl HighlightSet {
    /// Replace the set. A non-empty set becomes visible with a fresh pulse;
    /// an empty one is hidden.
    pub fn replace(&mut self, names: Vec<String>, now: Instant) {
        self.lookup = names.iter().cloned().collect();
        self.visible = !names.is_empty();
        self.pulse_started = if self.visible { Some(now) } else { None };
        self.names = names;
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.lookup.clear();
        self.visible = false;
        self.pulse_started = None;
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.pulse_started = None;
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn pulse_started(&self) -> Option<Instant> {
        self.pulse_started
    }

    /// Pulse ring progress in `[0, 1)`, or `None` when not pulsing.
    pub fn pulse_progress(&self, now: Instant) -> Option<f64> {
        let started = self.pulse_started?;
        if !self.visible {
            return None;
        }
        let elapsed = now.saturating_duration_since(started).as_millis() as f64;
        let period = PULSE_PERIOD.as_millis() as f64;
        Some((elapsed % period) / period)
    }
}

/// Edge-triggered clear request. Each bump is a distinct request even when
/// nothing else changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct ClearTrigger(pub u64);

impl ClearTrigger {
    pub fn bump(&mut self) -> ClearTrigger {
        self.0 += 1;
        *self
    }
}

/// The three highlight sets plus per-set overrides imposed from outside
/// (the full-screen window hides a set when its local list is empty).
#[derive(Debug, Clone, Default)]
pub struct Highlights {
    referenced: HighlightSet,
    focus: HighlightSet,
    newly_added: HighlightSet,
    overrides: [Option<bool>; 3],
    last_clear: ClearTrigger,
}

fn slot(kind: HighlightKind) -> usize {
    match kind {
        HighlightKind::Referenced => 0,
        HighlightKind::Focus => 1,
        HighlightKind::NewlyAdded => 2,
    }
}

impl Highlights {
    pub fn get(&self, kind: HighlightKind) -> &HighlightSet {
        match kind {
            HighlightKind::Referenced => &self.referenced,
            HighlightKind::Focus => &self.focus,
            HighlightKind::NewlyAdded => &self.newly_added,
        }
    }

    pub fn get_mut(&mut self, kind: HighlightKind) -> &mut HighlightSet {
        match kind {
            HighlightKind::Referenced => &mut self.referenced,
            HighlightKind::Focus => &mut self.focus,
            HighlightKind::NewlyAdded => &mut self.newly_added,
        }
    }

    pub fn set_override(&mut self, kind: HighlightKind, show: Option<bool>) {
        self.overrides[slot(kind)] = show;
    }

    /// Whether a set is currently drawn: visible, non-empty and not
    /// overridden to hidden.
    pub fn is_shown(&self, kind: HighlightKind) -> bool {
        let set = self.get(kind);
        let visible = self.overrides[slot(kind)].unwrap_or(set.is_visible());
        visible && !set.is_empty()
    }

    /// Highlight kinds a node name is shown under, in drawing priority order.
    pub fn kinds_for(&self, name: &str) -> Vec<HighlightKind> {
        HighlightKind::ALL
            .into_iter()
            .filter(|k| self.is_shown(*k) && self.get(*k).contains(name))
            .collect()
    }

    /// Clears all three sets if `trigger` is newer than the last one seen.
    /// Returns whether a clear happened.
    pub fn clear_all(&mut self, trigger: ClearTrigger) -> bool {
        if trigger <= self.last_clear {
            return false;
        }
        self.last_clear = trigger;
        for kind in HighlightKind::ALL {
            self.get_mut(kind).clear();
        }
        true
    }

    pub fn last_clear(&self) -> ClearTrigger {
        self.last_clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_replace_marks_visible_and_stamps_pulse() {
        let now = Instant::now();
        let mut set = HighlightSet::default();
        set.replace(names(&["a", "b"]), now);
        assert!(set.is_visible());
        assert!(set.contains("a"));
        assert_eq!(set.pulse_started(), Some(now));

        set.replace(Vec::new(), now);
        assert!(!set.is_visible());
        assert!(set.pulse_started().is_none());
    }

    #[test]
    fn test_pulse_progress_wraps_each_period() {
        let start = Instant::now();
        let mut set = HighlightSet::default();
        set.replace(names(&["a"]), start);
        assert_eq!(set.pulse_progress(start), Some(0.0));
        let half = set.pulse_progress(start + Duration::from_millis(750)).unwrap();
        assert!((half - 0.5).abs() < 1e-9);
        let wrapped = set.pulse_progress(start + Duration::from_millis(1500 + 150)).unwrap();
        assert!((wrapped - 0.1).abs() < 1e-9);
        set.hide();
        assert!(set.pulse_progress(start).is_none());
    }

    #[test]
    fn test_clear_all_is_edge_triggered_and_idempotent() {
        let now = Instant::now();
        let mut h = Highlights::default();
        let mut trigger = ClearTrigger::default();
        for kind in HighlightKind::ALL {
            h.get_mut(kind).replace(names(&["x"]), now);
        }

        assert!(h.clear_all(trigger.bump()));
        for kind in HighlightKind::ALL {
            assert!(h.get(kind).is_empty());
            assert!(!h.is_shown(kind));
        }

        assert!(h.clear_all(trigger.bump()));
        for kind in HighlightKind::ALL {
            assert!(h.get(kind).is_empty());
            assert!(!h.get(kind).is_visible());
        }

        // Replaying an old counter value does nothing.
        h.get_mut(HighlightKind::Focus).replace(names(&["y"]), now);
        assert!(!h.clear_all(ClearTrigger(1)));
        assert!(h.is_shown(HighlightKind::Focus));
    }

    #[test]
    fn test_override_hides_without_dropping_names() {
        let now = Instant::now();
        let mut h = Highlights::default();
        h.get_mut(HighlightKind::Referenced).replace(names(&["a"]), now);
        h.set_override(HighlightKind::Referenced, Some(false));
        assert!(!h.is_shown(HighlightKind::Referenced));
        assert!(h.get(HighlightKind::Referenced).contains("a"));
        h.set_override(HighlightKind::Referenced, None);
        assert_eq!(h.kinds_for("a"), vec![HighlightKind::Referenced]);
    }
}
