//! Drawings, broken up into resumable strides.
//!
//! A drawing is an iterator of [`Stride`]s: short lists of moves and traces
//! that each end with a progress report. A [`Job`] runs one stride per call to
//! [`Job::advance`], so the caller can pause, report progress, or give up
//! between strides.

use std::{collections::VecDeque, iter, time::Duration};

use log::{debug, info};
use ropeplot_geom::{Config, NormPoint, Point};
use ropeplot_protocol::PenCommand;

use crate::{motion::Motion, PlotError, Plotter, Result};

mod circles;
mod etch;
mod replay;
mod trace;
mod waves;

pub(crate) use circles::circles;
pub(crate) use etch::optimized_etch;
pub(crate) use replay::replay;
pub use trace::{Boundary, Drive, Edges, Shading, SpeedProfile, Toward, Trace, Wave};
pub(crate) use waves::circle_waves;

#[derive(Clone, Debug)]
pub enum Op {
    Pen(PenCommand),
    MoveTo {
        target: Point,
        pen: PenCommand,
        hold: bool,
    },
    Trace(Trace),
}

#[derive(Clone, Debug)]
pub struct Stride {
    pub ops: Vec<Op>,
    /// Fraction of the drawing that is done once this stride is.
    pub progress: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Step {
    /// A stride finished; the drawing is this fraction done.
    Progress(f32),
    /// The chalk is being replaced. Call [`Job::advance`] again to check
    /// whether someone has confirmed the reload.
    AwaitingReload,
    Done,
}

/// A part of a drawing that owns a fixed share of its progress.
pub(crate) struct Phase {
    pub strides: Box<dyn Iterator<Item = (Vec<Op>, f32)>>,
    pub start: f32,
    pub share: f32,
}

impl Phase {
    /// One of `count` equal phases.
    pub(crate) fn nth_of(
        index: usize,
        count: usize,
        strides: impl Iterator<Item = (Vec<Op>, f32)> + 'static,
    ) -> Phase {
        let mut strides = strides.peekable();
        // Phases with nothing to draw still move the progress along.
        let strides: Box<dyn Iterator<Item = (Vec<Op>, f32)>> = if strides.peek().is_none() {
            Box::new(iter::once((Vec::new(), 1.0)))
        } else {
            Box::new(strides)
        };
        Phase {
            strides,
            start: index as f32 / count as f32,
            share: 1.0 / count as f32,
        }
    }
}

pub(crate) fn phased(phases: Vec<Phase>, park: Stride) -> impl Iterator<Item = Stride> {
    phases
        .into_iter()
        .flat_map(
            |Phase {
                 strides,
                 start,
                 share,
             }| {
                strides.map(move |(ops, fraction)| Stride {
                    ops,
                    progress: start + share * fraction,
                })
            },
        )
        .chain(iter::once(park))
}

/// Lifts the pen and goes back to the top-left corner of the canvas.
pub(crate) fn park(geometry: &Config) -> Stride {
    Stride {
        ops: vec![Op::MoveTo {
            target: geometry.denormalize(&NormPoint::origin()),
            pen: PenCommand::Up,
            hold: true,
        }],
        progress: 1.0,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum JobState {
    Running,
    AwaitingReload { since: Duration },
    Finished,
}

/// A drawing in progress.
///
/// The job has the plotter to itself until it's dropped. Dropping it, even
/// halfway through, stops every motor.
pub struct Job<'a> {
    plotter: &'a mut Plotter,
    strides: Box<dyn Iterator<Item = Stride>>,
    // The rest of the current stride. If an op gets interrupted by a chalk
    // reload, it stays at the front and runs again afterwards.
    pending: VecDeque<Op>,
    stride_progress: f32,
    progress: f32,
    state: JobState,
}

impl<'a> Job<'a> {
    pub(crate) fn new(
        plotter: &'a mut Plotter,
        strides: impl Iterator<Item = Stride> + 'static,
    ) -> Job<'a> {
        Job {
            plotter,
            strides: Box::new(strides),
            pending: VecDeque::new(),
            stride_progress: 0.0,
            progress: 0.0,
            state: JobState::Running,
        }
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }

    pub fn is_awaiting_reload(&self) -> bool {
        matches!(self.state, JobState::AwaitingReload { .. })
    }

    /// Runs the next stride, or checks once for a reload confirmation.
    ///
    /// After an error the job is over: every motor has been stopped and
    /// later calls return [`Step::Done`].
    pub fn advance(&mut self) -> Result<Step> {
        match self.state {
            JobState::Finished => return Ok(Step::Done),
            JobState::AwaitingReload { since } => {
                let coord = self.plotter.coordinator();
                if !coord.reload_confirmed() {
                    let waited = coord.now() - since;
                    if let Some(timeout) = coord.timing.reload_timeout() {
                        if waited >= timeout {
                            self.finish();
                            return Err(PlotError::SensorFault { waited });
                        }
                    }
                    return Ok(Step::AwaitingReload);
                }
                info!("chalk reloaded, resuming");
                self.state = JobState::Running;
            }
            JobState::Running => {}
        }

        let result = self.run_stride();
        if result.is_err() {
            self.finish();
        }
        result
    }

    fn finish(&mut self) {
        self.state = JobState::Finished;
        self.pending.clear();
        self.plotter.stop_all();
    }

    fn run_stride(&mut self) -> Result<Step> {
        if self.pending.is_empty() {
            match self.strides.next() {
                Some(stride) => {
                    debug!("stride of {} ops, to {:.3}", stride.ops.len(), stride.progress);
                    self.pending = stride.ops.into();
                    self.stride_progress = stride.progress;
                }
                None => {
                    self.finish();
                    if self.progress < 1.0 {
                        self.progress = 1.0;
                        return Ok(Step::Progress(1.0));
                    }
                    return Ok(Step::Done);
                }
            }
        }

        while let Some(op) = self.pending.front() {
            match self.plotter.execute(op)? {
                Motion::Arrived => {
                    self.pending.pop_front();
                }
                Motion::NeedsReload => {
                    self.plotter.coordinator().begin_reload()?;
                    self.state = JobState::AwaitingReload {
                        since: self.plotter.coordinator().now(),
                    };
                    return Ok(Step::AwaitingReload);
                }
            }
        }

        self.progress = self.progress.max(self.stride_progress.clamp(0.0, 1.0));
        Ok(Step::Progress(self.progress))
    }
}

impl Drop for Job<'_> {
    fn drop(&mut self) {
        self.plotter.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        axis::MotorAxis,
        config::{ChalkSettings, PlotterConfig},
        sampler::{Grayscale, ImageSampler},
        sim::{SimRig, SimSettings},
        testing::small_config,
    };
    use image::{GrayImage, Luma};
    use std::sync::Arc;

    fn sim_plotter(config: PlotterConfig, settings: SimSettings) -> (SimRig, Plotter) {
        let sim = SimRig::new(Config::new(config.geometry).unwrap(), settings);
        let plotter = Plotter::new(config, sim.rig()).unwrap();
        (sim, plotter)
    }

    fn half_dark() -> Arc<Grayscale> {
        Arc::new(
            Grayscale::from_image(GrayImage::from_fn(32, 32, |x, _| {
                Luma([if x < 16 { 0 } else { 255 }])
            }))
            .unwrap(),
        )
    }

    fn run_to_end(job: &mut Job) -> Vec<Step> {
        let mut steps = Vec::new();
        loop {
            let step = job.advance().unwrap();
            steps.push(step);
            if step == Step::Done {
                return steps;
            }
            assert!(steps.len() < 1000, "the job never finished");
        }
    }

    #[test]
    fn replay_visits_points_in_order() {
        let (sim, mut plotter) = sim_plotter(small_config(), SimSettings::default());
        let points = [
            NormPoint::new(0.0, 0.0),
            NormPoint::new(0.5, 0.5),
            NormPoint::new(1.0, 1.0),
        ];
        let mut job = plotter.plot_points(&points).unwrap();
        let steps = run_to_end(&mut job);
        assert_eq!(
            steps,
            [
                Step::Progress(1.0 / 3.0),
                Step::Progress(2.0 / 3.0),
                Step::Progress(1.0),
                Step::Done
            ]
        );
        assert!(job.is_finished());
        drop(job);

        // One stroke, from the first point to the last.
        let trace = sim.world.pen_trace();
        assert_eq!(trace.strokes.len(), 1);
        let geometry = plotter.geometry();
        let stroke = &trace.strokes[0];
        let end = geometry.denormalize(&points[2]);
        assert!(stroke.last().unwrap().distance_to(end) < 0.5);
        // Parked at the origin with the pen up.
        let origin = geometry.denormalize(&NormPoint::origin());
        let parked = geometry.point_from_motor_positions(&sim.drive_positions());
        assert!(parked.distance_to(origin) < 0.5);
        assert_eq!(sim.pen.position(), plotter.config().pen.up);
    }

    #[test]
    fn circles_finish() {
        let (sim, mut plotter) = sim_plotter(small_config(), SimSettings::default());
        let mut job = plotter.plot_circles(half_dark());
        let steps = run_to_end(&mut job);
        drop(job);

        let progress: Vec<f32> = steps
            .iter()
            .filter_map(|s| match s {
                Step::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&1.0));
        assert!(!sim.any_running());

        // Everything drawn is on the dark half of the canvas, give or take.
        let geometry = plotter.geometry();
        let trace = sim.world.pen_trace();
        assert!(trace.points().count() > 0);
        for p in trace.points() {
            assert!(geometry.normalize(p).x < 0.6, "drew at {p:?}");
        }
    }

    #[test]
    fn waves_and_etch_finish() {
        let (sim, mut plotter) = sim_plotter(small_config(), SimSettings::default());
        let image = half_dark();
        let mut job = plotter.plot_circle_waves(image.clone());
        assert_eq!(run_to_end(&mut job).last(), Some(&Step::Done));
        drop(job);

        let mut job = plotter.optimized_etch(&image);
        let steps = run_to_end(&mut job);
        assert_eq!(steps[steps.len() - 2], Step::Progress(1.0));
        drop(job);
        assert!(!sim.any_running());
    }

    #[test]
    fn abandoned_jobs_stop_everything() {
        let (sim, mut plotter) = sim_plotter(small_config(), SimSettings::default());
        let image: Arc<dyn ImageSampler> = half_dark();
        for strides in 0..4 {
            let mut job = plotter.plot_circles(image.clone());
            for _ in 0..strides {
                job.advance().unwrap();
            }
            drop(job);
            assert!(!sim.any_running(), "still running after {strides} strides");
        }
    }

    #[test]
    fn stall_ends_the_job() {
        let (sim, mut plotter) = sim_plotter(small_config(), SimSettings::default());
        sim.left.jam();
        let mut job = plotter.plot_circles(half_dark());
        assert!(matches!(
            job.advance(),
            Err(PlotError::MotionStalled { .. })
        ));
        assert!(!sim.any_running());
        assert!(job.is_finished());
        assert_eq!(job.advance().unwrap(), Step::Done);
    }

    #[test]
    fn reload_barrier_holds_the_drives() {
        let mut config = small_config();
        config.chalk = Some(ChalkSettings::default());
        let settings = SimSettings {
            chalk: true,
            ..SimSettings::default()
        };
        let (sim, mut plotter) = sim_plotter(config, settings);
        let extruder = sim.extruder.clone().unwrap();

        // Nearly used up, and asking for more.
        extruder.displace(20600.0);
        sim.chalk_sensor.press();

        let points = [NormPoint::new(0.2, 0.2), NormPoint::new(0.8, 0.2)];
        let mut job = plotter.plot_points(&points).unwrap();
        assert_eq!(job.advance().unwrap(), Step::AwaitingReload);
        assert!(job.is_awaiting_reload());
        assert_eq!(extruder.position(), 0);

        let parked = sim.drive_positions();
        let polls = sim.button.polls();
        for _ in 0..5 {
            sim.world.advance(Duration::from_millis(500));
            assert_eq!(job.advance().unwrap(), Step::AwaitingReload);
            assert!(!sim.any_running());
            assert_eq!(sim.drive_positions(), parked);
        }
        assert_eq!(sim.button.polls(), polls + 5);

        sim.chalk_sensor.release();
        sim.button.press();
        assert_eq!(job.advance().unwrap(), Step::Progress(0.5));
        assert!(sim.drive_positions() != parked);
        assert_eq!(job.advance().unwrap(), Step::Progress(1.0));
        assert_eq!(job.advance().unwrap(), Step::Done);
    }

    #[test]
    fn chalk_runs_out_mid_trace() {
        let mut config = small_config();
        config.chalk = Some(ChalkSettings::default());
        let settings = SimSettings {
            chalk: true,
            ..SimSettings::default()
        };
        let (sim, mut plotter) = sim_plotter(config, settings);
        let extruder = sim.extruder.clone().unwrap();
        extruder.displace(20600.0);
        // Enough checks to get the pen down and the first arc going.
        sim.chalk_sensor.press_after(60);

        let mut job = plotter.plot_circles(half_dark());
        assert_eq!(job.advance().unwrap(), Step::AwaitingReload);
        assert!(matches!(job.pending.front(), Some(Op::Trace(_))));
        assert!(sim.world.pen_trace().points().count() > 1);
        assert_eq!(extruder.position(), 0);

        let stopped = sim.drive_positions();
        for _ in 0..3 {
            sim.world.advance(Duration::from_millis(500));
            assert_eq!(job.advance().unwrap(), Step::AwaitingReload);
            assert!(!sim.any_running());
            assert_eq!(sim.drive_positions(), stopped);
        }

        sim.chalk_sensor.release();
        sim.button.press();
        let steps = run_to_end(&mut job);
        assert_eq!(steps.last(), Some(&Step::Done));
        assert!(steps.contains(&Step::Progress(1.0)));
        assert!(!steps.contains(&Step::AwaitingReload));
    }

    #[test]
    fn reload_can_time_out() {
        let mut config = small_config();
        config.chalk = Some(ChalkSettings::default());
        config.timing.reload_timeout_ms = Some(1000);
        let settings = SimSettings {
            chalk: true,
            ..SimSettings::default()
        };
        let (sim, mut plotter) = sim_plotter(config, settings);
        sim.extruder.as_ref().unwrap().displace(20600.0);
        sim.chalk_sensor.press();

        let mut job = plotter.plot_points(&[NormPoint::new(0.5, 0.5)]).unwrap();
        assert_eq!(job.advance().unwrap(), Step::AwaitingReload);
        sim.world.advance(Duration::from_millis(600));
        assert_eq!(job.advance().unwrap(), Step::AwaitingReload);
        sim.world.advance(Duration::from_millis(600));
        assert!(matches!(job.advance(), Err(PlotError::SensorFault { .. })));
        assert_eq!(job.advance().unwrap(), Step::Done);
        assert!(!sim.any_running());
    }
}
