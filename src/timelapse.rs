//! Timelapse: a staggered, shuffled reveal of every node in the graph.
//!
//! The whole reveal takes `min(6000, 800 + 80·N)` ms. Each node fades in over
//! a shared `clamp(10·N, 200, 800)` ms window with an ease-in-out curve, and
//! links appear once both of their endpoints are visible. Starting a new
//! timelapse simply replaces the previous schedule.

use crate::models::{GraphData, NodeId};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MAX_TOTAL_MS: u64 = 6000;
const BASE_TOTAL_MS: u64 = 800;
const PER_NODE_MS: u64 = 80;
const MIN_FADE_MS: u64 = 200;
const MAX_FADE_MS: u64 = 800;
const FADE_PER_NODE_MS: u64 = 10;

pub fn total_duration(node_count: usize) -> Duration {
    let ms = BASE_TOTAL_MS + PER_NODE_MS * node_count as u64;
    Duration::from_millis(ms.min(MAX_TOTAL_MS))
}

pub fn fade_duration(node_count: usize) -> Duration {
    let ms = (FADE_PER_NODE_MS * node_count as u64).clamp(MIN_FADE_MS, MAX_FADE_MS);
    Duration::from_millis(ms)
}

/// Quadratic ease-in-out on `[0, 1]`.
pub fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        -1.0 + (4.0 - 2.0 * t) * t
    }
}

/// What the renderer should draw at one instant of a timelapse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelapseFrame {
    /// Opacity of each node that has started to appear.
    pub node_opacity: HashMap<NodeId, f64>,
    /// Indices into the snapshot's link list whose endpoints are both visible.
    pub visible_links: Vec<usize>,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct Timelapse {
    started: Instant,
    total: Duration,
    fade: Duration,
    appear_at: HashMap<NodeId, Duration>,
    links: Vec<(NodeId, NodeId)>,
}

impl Timelapse {
    pub fn new<R: Rng + ?Sized>(graph: &GraphData, now: Instant, rng: &mut R) -> Self {
        let mut order: Vec<NodeId> = graph.nodes.iter().map(|n| n.id.clone()).collect();
        order.shuffle(rng);

        let n = order.len();
        let total = total_duration(n);
        let fade = fade_duration(n);
        let spread = total.saturating_sub(fade);
        let appear_at = order
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let offset = if n > 1 {
                    spread * i as u32 / (n - 1) as u32
                } else {
                    Duration::ZERO
                };
                (id, offset)
            })
            .collect();

        Self {
            started: now,
            total,
            fade,
            appear_at,
            links: graph
                .links
                .iter()
                .map(|l| (l.source.clone(), l.target.clone()))
                .collect(),
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn fade(&self) -> Duration {
        self.fade
    }

    /// Offset at which a node starts fading in.
    pub fn appear_at(&self, id: &str) -> Option<Duration> {
        self.appear_at.get(id).copied()
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.total
    }

    pub fn frame(&self, now: Instant) -> TimelapseFrame {
        let elapsed = now.saturating_duration_since(self.started);
        let fade_ms = self.fade.as_secs_f64() * 1000.0;

        let node_opacity: HashMap<NodeId, f64> = self
            .appear_at
            .iter()
            .filter(|(_, at)| elapsed >= **at)
            .map(|(id, at)| {
                let into = (elapsed - *at).as_secs_f64() * 1000.0;
                let t = if fade_ms > 0.0 { into / fade_ms } else { 1.0 };
                (id.clone(), ease_in_out(t))
            })
            .filter(|(_, opacity)| *opacity > 0.0)
            .collect();

        let visible_links = self
            .links
            .iter()
            .enumerate()
            .filter(|(_, (s, t))| node_opacity.contains_key(s) && node_opacity.contains_key(t))
            .map(|(i, _)| i)
            .collect();

        TimelapseFrame {
            node_opacity,
            visible_links,
            finished: elapsed >= self.total,
        }
    }
}

/// Command interface a parent or sibling uses to drive the reveal without
/// reaching into the render controller's internals.
pub trait TimelapseCommands {
    fn start_timelapse(&mut self, now: Instant);
    fn timelapse_frame(&self, now: Instant) -> Option<TimelapseFrame>;
}
