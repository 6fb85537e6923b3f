//! Image-driven traces: the inner control loop of every sweep.
//!
//! A trace keeps one or both ropes running at a speed and, on every tick,
//! works out where the pen is from the encoders, looks at the image under it,
//! and lifts or lowers the pen accordingly. It ends when the pen crosses one of
//! the selected edges of its boundary.

use std::{f64::consts::PI, sync::Arc, time::Duration};

use kurbo::Rect;
use log::{debug, warn};
use ropeplot_geom::{Config, Point, Side};

use crate::{
    axis::AxisId,
    chalk::ChalkTick,
    motion::{Coordinator, Motion, Watchdog},
    sampler::{ImageSampler, Tone},
    PlotError, Result,
};

/// Drive speed as a function of darkness.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpeedProfile {
    /// Slow above the darkness threshold, fast below it.
    Banded { threshold: f64, fast: f64, slow: f64 },
    /// `fast - k * darkness^exponent`.
    Curve { fast: f64, k: f64, exponent: f64 },
}

impl SpeedProfile {
    pub fn speed(&self, darkness: f64) -> f64 {
        let darkness = darkness.clamp(0.0, 1.0);
        match *self {
            SpeedProfile::Banded {
                threshold,
                fast,
                slow,
            } => {
                if darkness > threshold {
                    slow
                } else {
                    fast
                }
            }
            SpeedProfile::Curve { fast, k, exponent } => fast - k * darkness.powf(exponent),
        }
    }

    /// The speed at full darkness, which is the slowest the profile goes.
    pub fn slowest(&self) -> f64 {
        match *self {
            SpeedProfile::Banded { fast, slow, .. } => fast.min(slow),
            SpeedProfile::Curve { fast, k, .. } => fast - k,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toward {
    Shorten,
    Lengthen,
}

/// Which ropes move during a trace, and how.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Drive {
    /// The anchor rope holds still (or wiggles, with a [`Wave`]) and the
    /// other rope runs, so the pen follows a circle around the anchor.
    Arc { anchor: Side, toward: Toward },
    /// Both ropes run at the same speed in opposite directions, moving the
    /// pen toward one side.
    Sweep { toward: Side },
    /// The `drive` rope shortens while the other rope is regulated to keep
    /// the pen at height `y`.
    Level { drive: Side, y: f64 },
}

impl Drive {
    fn primary(&self) -> Side {
        match *self {
            Drive::Arc { anchor, .. } => anchor.other(),
            Drive::Sweep { toward } => toward,
            Drive::Level { drive, .. } => drive,
        }
    }
}

/// A side-to-side wiggle of the anchor rope, bigger on darker parts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wave {
    /// Peak displacement at full darkness, in angle units.
    pub amplitude: f64,
    pub half_period: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Edges {
    pub top: bool,
    pub bottom: bool,
    pub left: bool,
    pub right: bool,
}

impl Edges {
    pub fn top() -> Edges {
        Edges {
            top: true,
            ..Edges::default()
        }
    }

    pub fn bottom() -> Edges {
        Edges {
            bottom: true,
            ..Edges::default()
        }
    }

    pub fn side(side: Side) -> Edges {
        match side {
            Side::Left => Edges {
                left: true,
                ..Edges::default()
            },
            Side::Right => Edges {
                right: true,
                ..Edges::default()
            },
        }
    }

    pub fn and(self, other: Edges) -> Edges {
        Edges {
            top: self.top || other.top,
            bottom: self.bottom || other.bottom,
            left: self.left || other.left,
            right: self.right || other.right,
        }
    }
}

/// Where a trace stops.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    /// In doorframe coordinates.
    pub rect: Rect,
    pub edges: Edges,
}

impl Boundary {
    pub fn crossed(&self, p: &Point) -> bool {
        let r = &self.rect;
        let e = &self.edges;
        (e.top && p.y <= r.y0)
            || (e.bottom && p.y >= r.y1)
            || (e.left && p.x <= r.x0)
            || (e.right && p.x >= r.x1)
    }
}

/// How a trace turns the image into pen strokes.
#[derive(Clone)]
pub struct Shading {
    pub image: Arc<dyn ImageSampler>,
    pub tone: Tone,
    /// The pen goes down where the darkness is above this.
    pub threshold: f64,
    pub speed: SpeedProfile,
    pub wave: Option<Wave>,
}

impl Shading {
    /// The darkness threshold that puts the pen down on intensities strictly
    /// below `intensity`, for [`Tone::Photo`].
    pub fn below_intensity(intensity: u8) -> f64 {
        Tone::Photo.darkness(intensity)
    }
}

#[derive(Clone)]
pub struct Trace {
    pub shading: Shading,
    pub drive: Drive,
    pub boundary: Boundary,
}

impl Trace {
    /// How many driving ticks the trace may take before it counts as stuck.
    ///
    /// Neither rope needs to change by more than the boundary's diagonal, so
    /// this allows four times its width plus its height at the slowest speed.
    /// `None` if the speed profile can stop altogether.
    fn tick_budget(&self, geometry: &Config, tick: Duration, slack: u32) -> Option<u32> {
        let slowest = self.shading.speed.slowest();
        if !(slowest > 0.0) || tick.is_zero() {
            return None;
        }
        let rect = &self.boundary.rect;
        let span = (rect.width() + rect.height()) * geometry.cm_to_angle().abs();
        let ticks = (4.0 * span / (slowest * tick.as_secs_f64())).ceil();
        Some((ticks.min(u32::MAX as f64) as u32).saturating_add(slack))
    }
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace")
            .field("drive", &self.drive)
            .field("boundary", &self.boundary)
            .finish_non_exhaustive()
    }
}

struct WaveState {
    wave: Wave,
    // Anchor position the wiggle is centered on.
    center: i32,
    weight: f64,
    next_sample: Duration,
}

impl WaveState {
    fn set_point(&mut self, now: Duration, darkness: f64) -> i32 {
        if now >= self.next_sample {
            self.weight = self.wave.amplitude * darkness;
            self.next_sample = now + self.wave.half_period;
        }
        let phase = now.as_secs_f64() * PI / self.wave.half_period.as_secs_f64();
        self.center + (phase.sin() * self.weight).round() as i32
    }
}

fn axis_id(side: Side) -> AxisId {
    match side {
        Side::Left => AxisId::Left,
        Side::Right => AxisId::Right,
    }
}

impl Coordinator {
    /// Runs a trace until it leaves its boundary.
    pub fn trace(&mut self, geometry: &Config, trace: &Trace) -> Result<Motion> {
        let result = self.trace_inner(geometry, trace);
        if !matches!(result, Ok(Motion::Arrived)) {
            self.stop_all();
        }
        result
    }

    fn trace_inner(&mut self, geometry: &Config, trace: &Trace) -> Result<Motion> {
        debug!("tracing {:?}", trace.drive);
        let shading = &trace.shading;
        let sign = geometry.shorten_sign() as f64;
        let tick = self.timing.tick();
        let primary = trace.drive.primary();

        let mut wave = match (trace.drive, shading.wave) {
            (Drive::Arc { anchor, .. }, Some(w)) if !w.half_period.is_zero() => Some(WaveState {
                wave: w,
                center: self.drive(anchor).position(),
                weight: 0.0,
                next_sample: self.clock.now(),
            }),
            _ => None,
        };

        let budget = trace.tick_budget(geometry, tick, self.timing.stall_ticks);
        let mut driven = 0u32;
        let mut watchdog = Watchdog::new(self.timing.stall_ticks);
        loop {
            let p = geometry.point_from_motor_positions(&self.drive_positions());
            if trace.boundary.crossed(&p) {
                break;
            }

            let intensity = shading.image.sample_norm(&geometry.normalize(&p));
            let darkness = shading.tone.darkness(intensity);
            let pen_down = darkness > shading.threshold;
            self.pen.set_position_sp(if pen_down {
                self.pen_settings.down
            } else {
                self.pen_settings.up
            });
            let speed = shading.speed.speed(darkness);

            let mut waiting_on = None;
            match &mut self.chalk {
                Some(chalk) if pen_down => match chalk.tick() {
                    ChalkTick::Exhausted => return Ok(Motion::NeedsReload),
                    ChalkTick::Extruding => waiting_on = Some(AxisId::Chalk),
                    ChalkTick::Idle => {}
                },
                Some(chalk) => chalk.rest(),
                None => {}
            }
            if !self.pen.target_reached() {
                waiting_on = Some(AxisId::Pen);
            }

            // Axes that should move during this tick.
            let mut commanded: Vec<Side> = Vec::with_capacity(2);
            if waiting_on.is_some() {
                self.stop_drives();
            } else {
                driven += 1;
                if budget.is_some_and(|b| driven > b) {
                    warn!("trace never left {:?}", trace.boundary.rect);
                    return Err(PlotError::MotionStalled {
                        axis: axis_id(primary),
                        ticks: driven,
                    });
                }

                let velocity = (sign * speed).round() as i32;
                match trace.drive {
                    Drive::Arc { anchor, toward } => {
                        let v = match toward {
                            Toward::Shorten => velocity,
                            Toward::Lengthen => -velocity,
                        };
                        self.drive(anchor.other()).run_forever(v);
                        commanded.push(anchor.other());
                        match &mut wave {
                            Some(w) => {
                                let sp = w.set_point(self.clock.now(), darkness);
                                let anchor_drive = self.drive(anchor);
                                anchor_drive.set_position_sp(sp);
                                anchor_drive.run();
                                if !anchor_drive.target_reached() {
                                    commanded.push(anchor);
                                }
                            }
                            None => self.drive(anchor).stop(),
                        }
                    }
                    Drive::Sweep { toward } => {
                        self.drive(toward).run_forever(velocity);
                        self.drive(toward.other()).run_forever(-velocity);
                        commanded.extend([toward, toward.other()]);
                    }
                    Drive::Level { drive, y } => {
                        self.drive(drive).run_forever(velocity);
                        commanded.push(drive);
                        let targets = geometry.motor_targets(&Point::new(p.x, y));
                        let other = self.drive(drive.other());
                        other.set_position_sp(*targets.get(drive.other()));
                        other.run();
                        if !other.target_reached() {
                            commanded.push(drive.other());
                        }
                    }
                }
            }
            self.pen.run();
            self.clock.sleep(tick);

            let observed: Vec<(AxisId, i32)> = match waiting_on {
                Some(AxisId::Chalk) => vec![(
                    AxisId::Chalk,
                    self.chalk.as_ref().map_or(0, |c| c.position()),
                )],
                Some(_) => vec![(AxisId::Pen, self.pen.position())],
                None => commanded
                    .into_iter()
                    .map(|side| (axis_id(side), self.drive(side).position()))
                    .collect(),
            };
            watchdog.observe(&observed)?;
        }

        self.stop_drives();
        self.pen.stop();
        if let Some(chalk) = &mut self.chalk {
            chalk.rest();
        }
        Ok(Motion::Arrived)
    }
}
