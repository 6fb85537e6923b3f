//! Control software for a two-rope wall plotter.
//!
//! Two motors at the top corners of a doorframe reel ropes in and out, and
//! the pen hangs where the ropes meet. A [`Plotter`] owns all the hardware;
//! drawings run as [`Job`]s that borrow it one stride at a time.

use std::{path::Path, sync::Arc};

use log::info;
use ropeplot_geom::{Config, GeometryInputs, NormPoint, Point};
use ropeplot_protocol::{ManualControl, Pattern, PenCommand, Position};

pub mod axis;
pub mod chalk;
pub mod clock;
pub mod config;
mod error;
pub mod motion;
pub mod pen;
pub mod sampler;
pub mod sim;
pub mod sweep;

pub use axis::{PidGains, Rig};
pub use config::PlotterConfig;
pub use error::{PlotError, Result};
pub use motion::{Coordinator, Motion};
pub use pen::ChalkStatus;
pub use sampler::{Grayscale, ImageSampler};
pub use sweep::{Job, Step};

use sweep::Op;

/// What a drawing needs besides the plotter itself.
#[derive(Clone, Default)]
pub struct PlotInput {
    pub image: Option<Arc<Grayscale>>,
    pub points: Option<Vec<NormPoint>>,
}

pub struct Plotter {
    geometry: Config,
    config: PlotterConfig,
    motion: Coordinator,
}

impl Plotter {
    /// Checks the configuration, then takes over the hardware.
    ///
    /// Nothing is written to the motors unless the configuration is valid.
    pub fn new(config: PlotterConfig, rig: Rig) -> Result<Plotter> {
        config.validate()?;
        let geometry = Config::new(config.geometry)?;
        let motion = Coordinator::new(rig, &config)?;
        let canvas = geometry.canvas();
        info!(
            "canvas is {:.1}cm square, {:.1}cm from the top and {:.1}cm from the sides",
            canvas.canvas_size, canvas.v_margin, canvas.h_margin
        );
        Ok(Plotter {
            geometry,
            config,
            motion,
        })
    }

    pub fn geometry(&self) -> &Config {
        &self.geometry
    }

    pub fn config(&self) -> &PlotterConfig {
        &self.config
    }

    pub(crate) fn coordinator(&mut self) -> &mut Coordinator {
        &mut self.motion
    }

    /// Replaces the geometry. If the new one is invalid, the old one stays.
    ///
    /// The motors aren't touched: the pen is assumed to be at the new rest
    /// point if the motors are at zero.
    pub fn reconfigure(&mut self, inputs: GeometryInputs) -> Result<()> {
        self.geometry.reconfigure(inputs)?;
        self.config.geometry = inputs;
        Ok(())
    }

    pub fn position(&self) -> Position {
        let angles = self.motion.drive_positions();
        Position {
            norm: self.geometry.norm_from_motor_positions(&angles),
            angles,
        }
    }

    pub fn battery_voltage(&self) -> Option<f64> {
        self.motion.battery_voltage()
    }

    /// Retunes both drive regulators, for example when the ropes get
    /// heavier.
    pub fn set_drive_gains(&mut self, gains: PidGains) {
        self.motion.set_drive_gains(gains);
        self.config.drive_gains = gains;
    }

    /// Jogs the drive motors at full power, until told to stop.
    pub fn manual(&mut self, control: ManualControl) {
        let shorten = 100 * self.geometry.shorten_sign();
        let m = &mut self.motion;
        match control {
            ManualControl::ShortenLeft => m.left.run_direct(shorten),
            ManualControl::LengthenLeft => m.left.run_direct(-shorten),
            ManualControl::StopLeft => m.left.stop(),
            ManualControl::ShortenRight => m.right.run_direct(shorten),
            ManualControl::LengthenRight => m.right.run_direct(-shorten),
            ManualControl::StopRight => m.right.stop(),
            ManualControl::StopAll => m.stop_all(),
        }
    }

    pub fn stop_all(&mut self) {
        self.motion.stop_all();
    }

    pub fn move_to_point(&mut self, target: Point) -> Result<Motion> {
        let targets = self.geometry.motor_targets(&target);
        self.motion.move_to(targets, true, PenCommand::Unchanged)
    }

    pub fn move_to_norm(&mut self, target: NormPoint) -> Result<Motion> {
        self.move_to_point(self.geometry.denormalize(&target))
    }

    pub fn pen_up(&mut self) -> Result<()> {
        self.motion.pen_up()
    }

    pub fn pen_down(&mut self) -> Result<ChalkStatus> {
        self.motion.pen_down()
    }

    /// Retracts the chalk extruder and blocks until the button is pressed.
    pub fn reload_chalk(&mut self) -> Result<()> {
        self.motion.reload_chalk()
    }

    /// Visits a few points around the top left of the canvas and comes back.
    pub fn test_drive(&mut self) -> Result<()> {
        info!("test drive");
        for (x, y) in [(0.0, 0.5), (0.3, 0.3), (0.0, 0.0)] {
            while self.move_to_norm(NormPoint::new(x, y))? == Motion::NeedsReload {
                self.reload_chalk()?;
            }
        }
        Ok(())
    }

    pub(crate) fn execute(&mut self, op: &Op) -> Result<Motion> {
        match op {
            Op::Pen(PenCommand::Up) => {
                self.motion.pen_up()?;
                Ok(Motion::Arrived)
            }
            Op::Pen(PenCommand::Down) => Ok(match self.motion.pen_down()? {
                ChalkStatus::Ready => Motion::Arrived,
                ChalkStatus::NeedsReload => Motion::NeedsReload,
            }),
            Op::Pen(PenCommand::Unchanged) => Ok(Motion::Arrived),
            Op::MoveTo { target, pen, hold } => {
                let targets = self.geometry.motor_targets(target);
                self.motion.move_to(targets, *hold, *pen)
            }
            Op::Trace(trace) => self.motion.trace(&self.geometry, trace),
        }
    }

    pub fn plot_circles(&mut self, image: Arc<dyn ImageSampler>) -> Job<'_> {
        info!("plotting circles");
        let strides = sweep::circles(&self.geometry, image, &self.config);
        Job::new(self, strides)
    }

    pub fn plot_circle_waves(&mut self, image: Arc<dyn ImageSampler>) -> Job<'_> {
        info!("plotting circle waves");
        let strides = sweep::circle_waves(&self.geometry, image, &self.config);
        Job::new(self, strides)
    }

    pub fn optimized_etch(&mut self, image: &Grayscale) -> Job<'_> {
        info!("etching");
        let strides = sweep::optimized_etch(&self.geometry, image, &self.config);
        Job::new(self, strides)
    }

    /// Replays a coordinate file. The whole file is read and checked before
    /// anything moves.
    pub fn plot_from_file(&mut self, path: impl AsRef<Path>) -> Result<Job<'_>> {
        let points = ropeplot_protocol::replay::read(path)?;
        self.plot_points(&points)
    }

    pub fn plot_points(&mut self, points: &[NormPoint]) -> Result<Job<'_>> {
        if points.is_empty() {
            return Err(ropeplot_protocol::replay::FormatError::ZeroPoints.into());
        }
        info!("replaying {} points", points.len());
        let strides = sweep::replay(&self.geometry, points);
        Ok(Job::new(self, strides))
    }

    pub fn plot(&mut self, pattern: Pattern, input: &PlotInput) -> Result<Job<'_>> {
        let missing = |what| PlotError::MissingInput { pattern, what };
        match pattern {
            Pattern::Circles | Pattern::CircleWaves | Pattern::Etch => {
                let image = input.image.clone().ok_or_else(|| missing("an image"))?;
                Ok(match pattern {
                    Pattern::Circles => self.plot_circles(image),
                    Pattern::CircleWaves => self.plot_circle_waves(image),
                    _ => self.optimized_etch(&image),
                })
            }
            Pattern::Replay => {
                let points = input.points.as_deref().ok_or_else(|| missing("a point list"))?;
                self.plot_points(points)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        axis::MotorAxis,
        sim::{SimRig, SimSettings},
        testing::small_config,
    };
    use ropeplot_geom::GeometryError;

    fn plotter(config: PlotterConfig) -> (SimRig, Plotter) {
        let geometry = Config::new(config.geometry).unwrap();
        let sim = SimRig::new(geometry, SimSettings::default());
        let plotter = Plotter::new(config, sim.rig()).unwrap();
        (sim, plotter)
    }

    #[test]
    fn bad_geometry_never_touches_motors() {
        let good = small_config();
        let sim = SimRig::new(Config::new(good.geometry).unwrap(), SimSettings::default());

        let mut config = good;
        config.geometry.left_rest = 10.0;
        config.geometry.right_rest = 20.0;
        match Plotter::new(config, sim.rig()) {
            Err(PlotError::Geometry(GeometryError::NotATriangle { .. })) => {}
            Err(e) => panic!("wrong error {e}"),
            Ok(_) => panic!("accepted a broken geometry"),
        }
        assert_eq!(sim.total_writes(), 0);
    }

    #[test]
    fn manual_jog() {
        let (sim, mut plotter) = plotter(small_config());
        plotter.manual(ManualControl::ShortenLeft);
        sim.world.advance(std::time::Duration::from_millis(100));
        plotter.manual(ManualControl::StopLeft);
        // Negative calibration: shortening counts up.
        assert!(sim.left.position() > 0);
        assert_eq!(sim.right.position(), 0);

        plotter.manual(ManualControl::LengthenRight);
        assert!(sim.any_running());
        plotter.manual(ManualControl::StopAll);
        assert!(!sim.any_running());
    }

    #[test]
    fn test_drive_comes_home() {
        let (sim, mut plotter) = plotter(small_config());
        plotter.test_drive().unwrap();
        let pos = plotter.position();
        let origin = plotter.geometry().motor_targets_norm(&NormPoint::origin());
        assert!((pos.angles.left - origin.left).abs() <= 5);
        assert!((pos.angles.right - origin.right).abs() <= 5);
        assert!(!sim.any_running());
    }

    #[test]
    fn reconfigure_keeps_old_geometry_on_error() {
        let (_sim, mut plotter) = plotter(small_config());
        let before = *plotter.geometry().inputs();

        let mut bad = before;
        bad.anchor_distance = 1000.0;
        assert!(plotter.reconfigure(bad).is_err());
        assert_eq!(*plotter.geometry().inputs(), before);

        let mut good = before;
        good.cm_to_angle = -60.0;
        plotter.reconfigure(good).unwrap();
        assert_eq!(plotter.geometry().cm_to_angle(), -60.0);
        assert_eq!(plotter.config().geometry, good);
    }

    #[test]
    fn gains_and_battery() {
        let (sim, mut plotter) = plotter(small_config());
        let gains = PidGains {
            kp: 3.0,
            ki: 0.0,
            kd: 0.1,
            precision: 2,
        };
        plotter.set_drive_gains(gains);
        assert_eq!(sim.left.gains(), gains);
        assert_eq!(sim.right.gains(), gains);
        assert_eq!(plotter.config().drive_gains, gains);

        sim.battery.set(6.9);
        assert_eq!(plotter.battery_voltage(), Some(6.9));
    }

    #[test]
    fn plot_needs_its_input() {
        let (_sim, mut plotter) = plotter(small_config());
        assert!(matches!(
            plotter.plot(Pattern::Etch, &PlotInput::default()),
            Err(PlotError::MissingInput {
                pattern: Pattern::Etch,
                ..
            })
        ));
        assert!(matches!(
            plotter.plot_points(&[]),
            Err(PlotError::Format(_))
        ));
    }
}
