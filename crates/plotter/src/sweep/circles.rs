//! Concentric arcs around an anchor, and horizontal lines.

use std::sync::Arc;

use kurbo::Rect;
use ropeplot_geom::{Config, Point, Side};
use ropeplot_protocol::PenCommand;

use super::{
    park, phased,
    trace::{Boundary, Drive, Edges, Shading, SpeedProfile, Toward, Trace},
    Op, Phase, Stride,
};
use crate::{
    config::PlotterConfig,
    sampler::{ImageSampler, Tone},
};

// The left pass shades the darkest parts, the right pass fills in the middle
// tones, and the lines go over only the blackest bits.
const LEFT_PASS_BELOW: u8 = 120;
const RIGHT_PASS_BELOW: u8 = 180;
const LINES_BELOW: u8 = 60;

const EPSILON: f64 = 1e-9;

/// Arcs around one anchor, clipped to a rectangle.
///
/// The arcs go back and forth: up (shortening the far rope) along one
/// radius, then down along the next one out.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ArcGrid {
    rect: Rect,
    anchor: Side,
    anchor_x: f64,
}

impl ArcGrid {
    pub(crate) fn new(rect: Rect, anchor: Side, geometry: &Config) -> Self {
        ArcGrid {
            rect,
            anchor,
            anchor_x: geometry.anchor(anchor).x,
        }
    }

    fn x_edge(&self, side: Side) -> f64 {
        match side {
            Side::Left => self.rect.x0,
            Side::Right => self.rect.x1,
        }
    }

    fn near_x(&self) -> f64 {
        self.x_edge(self.anchor)
    }

    fn far_x(&self) -> f64 {
        self.x_edge(self.anchor.other())
    }

    /// The radius that touches the near top corner.
    pub(crate) fn r_min(&self) -> f64 {
        (self.near_x() - self.anchor_x).hypot(self.rect.y0)
    }

    /// The radius that touches the far bottom corner.
    pub(crate) fn r_max(&self) -> f64 {
        (self.far_x() - self.anchor_x).hypot(self.rect.y1)
    }

    // Where the circle of radius `r` crosses height `y`, on the canvas side
    // of the anchor.
    fn x_at(&self, r: f64, y: f64) -> Option<f64> {
        let dx = (r * r - y * y).max(0.0).sqrt();
        let x = match self.anchor {
            Side::Left => self.anchor_x + dx,
            Side::Right => self.anchor_x - dx,
        };
        (r >= y).then_some(x)
    }

    fn y_at(&self, r: f64, x: f64) -> Option<f64> {
        let dx = x - self.anchor_x;
        (r >= dx.abs()).then(|| (r * r - dx * dx).max(0.0).sqrt())
    }

    fn beyond_far(&self, x: f64) -> bool {
        match self.anchor {
            Side::Left => x > self.far_x(),
            Side::Right => x < self.far_x(),
        }
    }

    fn contains(&self, p: Point) -> bool {
        let r = &self.rect;
        p.x >= r.x0 - EPSILON
            && p.x <= r.x1 + EPSILON
            && p.y >= r.y0 - EPSILON
            && p.y <= r.y1 + EPSILON
    }

    /// Where an upward arc of radius `r` enters the rectangle: on the near
    /// edge, or on the bottom edge if the near edge is out of reach.
    pub(crate) fn up_start(&self, r: f64) -> Option<Point> {
        let y = self.y_at(r, self.near_x())?;
        let start = if y > self.rect.y1 {
            Point::new(self.x_at(r, self.rect.y1)?, self.rect.y1)
        } else {
            Point::new(self.near_x(), y)
        };
        self.contains(start).then_some(start)
    }

    /// Where a downward arc of radius `r` enters the rectangle: on the top
    /// edge, or on the far edge if the top edge is out of reach.
    pub(crate) fn down_start(&self, r: f64) -> Option<Point> {
        let x = self.x_at(r, self.rect.y0)?;
        let start = if self.beyond_far(x) {
            Point::new(self.far_x(), self.y_at(r, self.far_x())?)
        } else {
            Point::new(x, self.rect.y0)
        };
        self.contains(start).then_some(start)
    }

    fn arc(&self, r: f64, toward: Toward, shading: Shading) -> Vec<Op> {
        let (start, edges) = match toward {
            Toward::Shorten => (
                self.up_start(r),
                Edges::top().and(Edges::side(self.anchor.other())),
            ),
            Toward::Lengthen => (
                self.down_start(r),
                Edges::bottom().and(Edges::side(self.anchor)),
            ),
        };
        let Some(start) = start else {
            return Vec::new();
        };
        vec![
            Op::MoveTo {
                target: start,
                pen: PenCommand::Up,
                hold: true,
            },
            Op::Trace(Trace {
                shading,
                drive: Drive::Arc {
                    anchor: self.anchor,
                    toward,
                },
                boundary: Boundary {
                    rect: self.rect,
                    edges,
                },
            }),
        ]
    }

    /// Pairs of arcs at radii `r_min + i * step` (up) and
    /// `r_min + (i + 1) * step` (down), for odd `i` below `count`.
    pub(crate) fn strides(
        self,
        count: usize,
        step: f64,
        shading: Shading,
    ) -> impl Iterator<Item = (Vec<Op>, f32)> {
        let r_min = self.r_min();
        let pairs = count / 2;
        let total = (2 * pairs).max(1) as f32;
        (0..pairs).flat_map(move |k| {
            let i = 2 * k + 1;
            let up = self.arc(r_min + i as f64 * step, Toward::Shorten, shading.clone());
            let down = self.arc(
                r_min + (i + 1) as f64 * step,
                Toward::Lengthen,
                shading.clone(),
            );
            [
                (up, (2 * k + 1) as f32 / total),
                (down, (2 * k + 2) as f32 / total),
            ]
        })
    }
}

/// How the ropes hold a line horizontal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LineDrive {
    /// Both ropes at the same speed. The line sags a bit.
    Sweep,
    /// One rope drives, the other follows the target height.
    Level,
}

/// Back-and-forth lines down a rectangle, `spacing` apart: rightward on
/// even rows, leftward on odd ones.
pub(crate) fn line_strides(
    rect: Rect,
    count: usize,
    spacing: f64,
    shading: Shading,
    line_drive: LineDrive,
) -> impl Iterator<Item = (Vec<Op>, f32)> {
    let pairs = count.div_ceil(2);
    let total = (2 * pairs).max(1) as f32;
    let line = move |row: usize, toward: Side, shading: Shading| {
        let y = rect.y0 + row as f64 * spacing;
        if y > rect.y1 + EPSILON {
            return Vec::new();
        }
        let start_x = match toward {
            Side::Left => rect.x1,
            Side::Right => rect.x0,
        };
        let drive = match line_drive {
            LineDrive::Sweep => Drive::Sweep { toward },
            LineDrive::Level => Drive::Level { drive: toward, y },
        };
        vec![
            Op::MoveTo {
                target: Point::new(start_x, y),
                pen: PenCommand::Up,
                hold: true,
            },
            Op::Trace(Trace {
                shading,
                drive,
                boundary: Boundary {
                    rect,
                    edges: Edges::side(toward),
                },
            }),
        ]
    };
    (0..pairs).flat_map(move |k| {
        let i = 2 * k;
        [
            (line(i, Side::Right, shading.clone()), (2 * k + 1) as f32 / total),
            (line(i + 1, Side::Left, shading.clone()), (2 * k + 2) as f32 / total),
        ]
    })
}

fn photo_shading(
    image: &Arc<dyn ImageSampler>,
    below: u8,
    config: &PlotterConfig,
) -> Shading {
    let threshold = Shading::below_intensity(below);
    Shading {
        image: Arc::clone(image),
        tone: Tone::Photo,
        threshold,
        speed: SpeedProfile::Banded {
            threshold,
            fast: config.speeds.fast,
            slow: config.speeds.slow,
        },
        wave: None,
    }
}

/// Arcs around the left anchor, then around the right one, then lines.
pub(crate) fn circles(
    geometry: &Config,
    image: Arc<dyn ImageSampler>,
    config: &PlotterConfig,
) -> impl Iterator<Item = Stride> {
    let rect = geometry.canvas_rect();
    let n = config.scanlines as usize;

    let mut phases = Vec::with_capacity(3);
    for (index, (side, below)) in [(Side::Left, LEFT_PASS_BELOW), (Side::Right, RIGHT_PASS_BELOW)]
        .into_iter()
        .enumerate()
    {
        let grid = ArcGrid::new(rect, side, geometry);
        let step = (grid.r_max() - grid.r_min()) / n as f64;
        let shading = photo_shading(&image, below, config);
        phases.push(Phase::nth_of(index, 3, grid.strides(n, step, shading)));
    }
    let shading = photo_shading(&image, LINES_BELOW, config);
    phases.push(Phase::nth_of(
        2,
        3,
        line_strides(rect, n, rect.height() / n as f64, shading, LineDrive::Sweep),
    ));

    phased(phases, park(geometry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sampler::Grayscale, testing::small_config};

    fn geometry() -> Config {
        Config::new(small_config().geometry).unwrap()
    }

    fn starts(ops: &[Op]) -> Option<Point> {
        match ops.first() {
            Some(Op::MoveTo { target, .. }) => Some(*target),
            _ => None,
        }
    }

    #[test]
    fn radii_touch_the_corners() {
        let geom = geometry();
        let rect = geom.canvas_rect();
        let left = ArcGrid::new(rect, Side::Left, &geom);
        assert!((left.r_min() - rect.x0.hypot(rect.y0)).abs() < 1e-9);
        assert!((left.r_max() - rect.x1.hypot(rect.y1)).abs() < 1e-9);

        let d = geom.anchor_distance().get();
        let right = ArcGrid::new(rect, Side::Right, &geom);
        assert!((right.r_min() - (d - rect.x1).hypot(rect.y0)).abs() < 1e-9);
        assert!((right.r_max() - (d - rect.x0).hypot(rect.y1)).abs() < 1e-9);
    }

    #[test]
    fn arcs_start_on_the_rect() {
        let geom = geometry();
        let rect = geom.canvas_rect();
        for side in [Side::Left, Side::Right] {
            let grid = ArcGrid::new(rect, side, &geom);
            let (lo, hi) = (grid.r_min(), grid.r_max());
            for k in 1..20 {
                let r = lo + (hi - lo) * k as f64 / 20.0;
                for start in [grid.up_start(r), grid.down_start(r)] {
                    let p = start.unwrap();
                    assert!((geom.anchor(side).distance_to(p) - r).abs() < 1e-6);
                    let on_edge = (p.x - rect.x0).abs() < 1e-6
                        || (p.x - rect.x1).abs() < 1e-6
                        || (p.y - rect.y0).abs() < 1e-6
                        || (p.y - rect.y1).abs() < 1e-6;
                    assert!(on_edge, "{p:?} isn't on {rect:?}");
                }
            }
            assert!(grid.up_start(hi * 2.0).is_none());
        }
    }

    #[test]
    fn slow_exactly_where_the_pen_is_down() {
        let config = small_config();
        let pixels = image::GrayImage::new(2, 2);
        let image: Arc<dyn ImageSampler> = Arc::new(Grayscale::from_image(pixels).unwrap());
        for below in [LEFT_PASS_BELOW, RIGHT_PASS_BELOW, LINES_BELOW] {
            let shading = photo_shading(&image, below, &config);
            for v in 0..=255u8 {
                let darkness = Tone::Photo.darkness(v);
                assert_eq!(darkness > shading.threshold, v < below);
                let expected = if v < below {
                    config.speeds.slow
                } else {
                    config.speeds.fast
                };
                assert_eq!(shading.speed.speed(darkness), expected);
            }
        }
    }

    #[test]
    fn lines_alternate() {
        let geom = geometry();
        let rect = geom.canvas_rect();
        let pixels = image::GrayImage::from_pixel(10, 10, image::Luma([0]));
        let image: Arc<dyn ImageSampler> = Arc::new(Grayscale::from_image(pixels).unwrap());
        let shading = photo_shading(&image, LINES_BELOW, &small_config());
        let strides: Vec<_> =
            line_strides(rect, 4, rect.height() / 4.0, shading, LineDrive::Sweep).collect();
        assert_eq!(strides.len(), 4);
        let xs: Vec<f64> = strides.iter().map(|(ops, _)| starts(ops).unwrap().x).collect();
        assert_eq!(xs, [rect.x0, rect.x1, rect.x0, rect.x1]);
        assert_eq!(strides.last().unwrap().1, 1.0);
        for pair in strides.windows(2) {
            assert!(pair[0].1 < pair[1].1);
            assert!(starts(&pair[0].0).unwrap().y < starts(&pair[1].0).unwrap().y);
        }
    }
}
