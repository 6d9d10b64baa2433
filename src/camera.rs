//! Camera choreography for the graph canvas.
//!
//! The renderer owns the actual zoom/pan animation; this module decides
//! *what* to animate. Recentering on a set of nodes zooms far out first,
//! then glides to the target's centroid and finally zooms in to fit it,
//! with pauses between stages so each animation settles before the next.

use crate::models::Point;
use serde::Serialize;
use std::time::Duration;

pub const MAX_ZOOM: f64 = 5.0;
/// Padding added to the target bounding box, in graph units.
pub const FIT_PADDING: f64 = 500.0;
/// Scale zoomed out to before travelling.
pub const ZOOM_OUT_SCALE: f64 = 0.05;
/// Scale used when zooming onto a single double-clicked node.
pub const NODE_ZOOM_SCALE: f64 = 3.0;

pub const ZOOM_OUT_DURATION: Duration = Duration::from_millis(400);
pub const CENTER_DELAY: Duration = Duration::from_millis(900);
pub const CENTER_DURATION: Duration = Duration::from_millis(800);
pub const ZOOM_DELAY: Duration = Duration::from_millis(1000);
pub const ZOOM_IN_DURATION: Duration = Duration::from_millis(800);

/// Canvas size in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewSize {
    pub width: f64,
    pub height: f64,
}

impl ViewSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

// ============================================================================
// Initial Zoom
// ============================================================================

/// Zoom applied once, when layout geometry is first known. Larger graphs
/// start further out.
pub fn initial_zoom(node_count: usize) -> f64 {
    match node_count {
        n if n >= 1000 => 0.045,
        n if n >= 500 => 0.08,
        n if n >= 200 => 0.15,
        n if n >= 100 => 0.25,
        n if n >= 50 => 0.4,
        n if n >= 20 => 0.6,
        n if n >= 5 => 0.8,
        _ => 1.0,
    }
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum CameraStep {
    Zoom { scale: f64, duration_ms: u64 },
    Center { x: f64, y: f64, duration_ms: u64 },
    Wait { duration_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CameraPlan {
    pub steps: Vec<CameraStep>,
}

impl CameraPlan {
    pub fn final_scale(&self) -> Option<f64> {
        self.steps.iter().rev().find_map(|s| match s {
            CameraStep::Zoom { scale, .. } => Some(*scale),
            _ => None,
        })
    }

    pub fn center(&self) -> Option<Point> {
        self.steps.iter().find_map(|s| match s {
            CameraStep::Center { x, y, .. } => Some(Point::new(*x, *y)),
            _ => None,
        })
    }

    pub fn total_duration(&self) -> Duration {
        let ms: u64 = self
            .steps
            .iter()
            .map(|s| match s {
                CameraStep::Wait { duration_ms } => *duration_ms,
                _ => 0,
            })
            .sum();
        Duration::from_millis(ms)
    }
}

fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Plans a camera move that frames `positions`. Returns `None` when no
/// target node has layout coordinates yet; that is not an error, the
/// camera simply stays put.
pub fn recenter_plan<I>(positions: I, view: ViewSize) -> Option<CameraPlan>
where
    I: IntoIterator<Item = Point>,
{
    let mut iter = positions.into_iter();
    let first = iter.next()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for p in iter {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let center = Point::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);
    let box_w = max_x - min_x;
    let box_h = max_y - min_y;
    let scale = (view.width / (box_w + FIT_PADDING))
        .min(view.height / (box_h + FIT_PADDING))
        .min(MAX_ZOOM);

    Some(CameraPlan {
        steps: vec![
            CameraStep::Zoom {
                scale: ZOOM_OUT_SCALE,
                duration_ms: ms(ZOOM_OUT_DURATION),
            },
            CameraStep::Wait {
                duration_ms: ms(CENTER_DELAY),
            },
            CameraStep::Center {
                x: center.x,
                y: center.y,
                duration_ms: ms(CENTER_DURATION),
            },
            CameraStep::Wait {
                duration_ms: ms(ZOOM_DELAY),
            },
            CameraStep::Zoom {
                scale,
                duration_ms: ms(ZOOM_IN_DURATION),
            },
        ],
    })
}

/// Double-click: glide to the node, then zoom in on it.
pub fn zoom_to_node_plan(at: Point) -> CameraPlan {
    CameraPlan {
        steps: vec![
            CameraStep::Center {
                x: at.x,
                y: at.y,
                duration_ms: ms(CENTER_DURATION),
            },
            CameraStep::Zoom {
                scale: NODE_ZOOM_SCALE,
                duration_ms: ms(ZOOM_IN_DURATION),
            },
        ],
    }
}

// ============================================================================
// Execution
// ============================================================================

/// The renderer's camera, as seen by plan execution.
pub trait Viewport {
    fn zoom(&mut self, scale: f64, duration: Duration);
    fn center_at(&mut self, at: Point, duration: Duration);
}

/// Plain camera model; also what tests and the HTTP layer use to report the
/// camera a plan ends in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraState {
    pub scale: f64,
    pub center: Point,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            center: Point::default(),
        }
    }
}

impl Viewport for CameraState {
    fn zoom(&mut self, scale: f64, _duration: Duration) {
        self.scale = scale;
    }

    fn center_at(&mut self, at: Point, _duration: Duration) {
        self.center = at;
    }
}

/// Runs a plan step by step, sleeping through the `Wait` stages.
pub async fn execute_plan<V: Viewport + ?Sized>(plan: &CameraPlan, viewport: &mut V) {
    for step in &plan.steps {
        match step {
            CameraStep::Zoom { scale, duration_ms } => {
                viewport.zoom(*scale, Duration::from_millis(*duration_ms));
            }
            CameraStep::Center { x, y, duration_ms } => {
                viewport.center_at(Point::new(*x, *y), Duration::from_millis(*duration_ms));
            }
            CameraStep::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_zoom_table() {
        assert_eq!(initial_zoom(2), 1.0);
        assert_eq!(initial_zoom(4), 1.0);
        assert_eq!(initial_zoom(5), 0.8);
        assert_eq!(initial_zoom(20), 0.6);
        assert_eq!(initial_zoom(99), 0.4);
        assert_eq!(initial_zoom(100), 0.25);
        assert_eq!(initial_zoom(999), 0.08);
        assert_eq!(initial_zoom(1000), 0.045);
        assert_eq!(initial_zoom(50_000), 0.045);
    }

    #[test]
    fn test_recenter_without_positions_is_noop() {
        assert!(recenter_plan(Vec::<Point>::new(), ViewSize::new(800.0, 600.0)).is_none());
    }

    #[test]
    fn test_recenter_plan_stages_and_fit() {
        let points = vec![Point::new(0.0, 0.0), Point::new(100.0, 50.0)];
        let plan = recenter_plan(points, ViewSize::new(1200.0, 800.0)).unwrap();

        assert_eq!(plan.steps.len(), 5);
        assert_eq!(
            plan.steps[0],
            CameraStep::Zoom {
                scale: ZOOM_OUT_SCALE,
                duration_ms: 400
            }
        );
        assert_eq!(plan.steps[1], CameraStep::Wait { duration_ms: 900 });
        assert_eq!(plan.center(), Some(Point::new(50.0, 25.0)));
        assert_eq!(plan.steps[3], CameraStep::Wait { duration_ms: 1000 });
        // min(1200 / 600, 800 / 550, 5)
        let expected = (1200.0_f64 / 600.0).min(800.0 / 550.0);
        assert!((plan.final_scale().unwrap() - expected).abs() < 1e-9);
        assert_eq!(plan.total_duration(), Duration::from_millis(1900));
    }

    #[test]
    fn test_recenter_zoom_is_capped() {
        let plan = recenter_plan(vec![Point::new(3.0, 4.0)], ViewSize::new(10_000.0, 10_000.0)).unwrap();
        assert_eq!(plan.final_scale(), Some(MAX_ZOOM));
        assert_eq!(plan.center(), Some(Point::new(3.0, 4.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_plan_applies_steps_in_order() {
        let plan = recenter_plan(
            vec![Point::new(-10.0, -10.0), Point::new(10.0, 10.0)],
            ViewSize::new(520.0, 520.0),
        )
        .unwrap();
        let mut camera = CameraState::default();
        let started = tokio::time::Instant::now();
        execute_plan(&plan, &mut camera).await;
        assert!(started.elapsed() >= Duration::from_millis(1900));
        assert_eq!(camera.center, Point::new(0.0, 0.0));
        assert!((camera.scale - 1.0).abs() < 1e-9);
    }
}
