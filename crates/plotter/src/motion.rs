//! Coordinated moves of the two drive ropes.

use std::time::Duration;

use log::{debug, warn};
use ropeplot_geom::{MotorAngles, Side};
use ropeplot_protocol::PenCommand;

use crate::{
    axis::{Acknowledge, AxisId, MotorAxis, PidGains, Polarity, PowerSupply, Rig, StopAction},
    chalk::{Chalk, ChalkTick},
    clock::Clock,
    config::{PenSettings, PlotterConfig, Timing},
    pen::ChalkStatus,
    PlotError, Result,
};

/// How a blocking move ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Motion {
    Arrived,
    /// The chalk ran out on the way. Every motor has been stopped, and the
    /// move needs to be repeated once the chalk is reloaded.
    NeedsReload,
}

/// Notices commanded axes that stop moving.
///
/// Each control tick reports the axes that are supposed to be moving and
/// where they are. An axis that reports the same position for `limit`
/// consecutive ticks is stalled. Axes that aren't reported start over.
pub(crate) struct Watchdog {
    limit: u32,
    idle: [Option<(i32, u32)>; AxisId::COUNT],
}

impl Watchdog {
    pub(crate) fn new(limit: u32) -> Self {
        Watchdog {
            limit,
            idle: [None; AxisId::COUNT],
        }
    }

    pub(crate) fn observe(&mut self, commanded: &[(AxisId, i32)]) -> Result<()> {
        let mut next = [None; AxisId::COUNT];
        for &(axis, pos) in commanded {
            let ticks = match self.idle[axis.index()] {
                Some((last, ticks)) if last == pos => ticks + 1,
                _ => 0,
            };
            if ticks >= self.limit {
                warn!("{axis} motor stalled at {pos} after {ticks} ticks");
                return Err(PlotError::MotionStalled { axis, ticks });
            }
            next[axis.index()] = Some((pos, ticks));
        }
        self.idle = next;
        Ok(())
    }
}

/// Sole owner of the plotter's hardware.
pub struct Coordinator {
    pub(crate) left: Box<dyn MotorAxis>,
    pub(crate) right: Box<dyn MotorAxis>,
    pub(crate) pen: Box<dyn MotorAxis>,
    pub(crate) chalk: Option<Chalk>,
    pub(crate) button: Box<dyn Acknowledge>,
    pub(crate) battery: Option<Box<dyn PowerSupply>>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) timing: Timing,
    pub(crate) pen_settings: PenSettings,
}

impl Coordinator {
    /// Sets up the motors, and finds the chalk extruder's end stop if the
    /// config asks for chalk.
    pub fn new(rig: Rig, config: &PlotterConfig) -> Result<Self> {
        let Rig {
            mut left,
            mut right,
            mut pen,
            chalk,
            button,
            battery,
            mut clock,
        } = rig;

        if config.chalk.is_some() && chalk.is_none() {
            return Err(PlotError::InvalidSetting {
                name: "chalk",
                reason: "this rig has no chalk extruder",
            });
        }

        for drive in [&mut left, &mut right] {
            drive.set_gains(config.drive_gains);
            drive.set_stop_action(StopAction::Brake);
        }
        pen.set_gains(config.pen_gains);
        if config.invert_right {
            right.set_polarity(Polarity::Inversed);
        }

        let chalk = match (config.chalk, chalk) {
            (Some(settings), Some(hw)) => {
                Some(Chalk::calibrate(hw, settings, clock.as_mut(), &config.timing)?)
            }
            _ => None,
        };

        let mut coord = Coordinator {
            left,
            right,
            pen,
            chalk,
            button,
            battery,
            clock,
            timing: config.timing,
            pen_settings: config.pen,
        };
        coord.set_control_zeroes();
        Ok(coord)
    }

    pub(crate) fn drive(&mut self, side: Side) -> &mut dyn MotorAxis {
        match side {
            Side::Left => self.left.as_mut(),
            Side::Right => self.right.as_mut(),
        }
    }

    pub fn drive_positions(&self) -> MotorAngles {
        MotorAngles::new(self.left.position(), self.right.position())
    }

    /// Declares the current position to be the rest point, with the pen up.
    pub fn set_control_zeroes(&mut self) {
        self.left.set_position(0);
        self.right.set_position(0);
        self.pen.set_position(self.pen_settings.up);
    }

    pub fn set_drive_gains(&mut self, gains: PidGains) {
        self.left.set_gains(gains);
        self.right.set_gains(gains);
    }

    pub(crate) fn stop_drives(&mut self) {
        self.left.stop();
        self.right.stop();
    }

    pub fn stop_all(&mut self) {
        self.stop_drives();
        self.pen.stop();
        if let Some(chalk) = &mut self.chalk {
            chalk.rest();
        }
    }

    // The chalk rule for one tick of a move: only while the pen is meant to
    // be down.
    fn chalk_exhausted(&mut self) -> bool {
        if self.pen.position_sp() != self.pen_settings.down {
            return false;
        }
        self.chalk
            .as_mut()
            .is_some_and(|chalk| chalk.tick() == ChalkTick::Exhausted)
    }

    pub fn battery_voltage(&self) -> Option<f64> {
        self.battery.as_ref().map(|b| b.voltage())
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Drives both ropes to the given motor angles and waits until they get
    /// there.
    ///
    /// With `hold`, the regulators keep running for the settle time after
    /// arriving, so that the pen comes to rest on the target.
    pub fn move_to(&mut self, targets: MotorAngles, hold: bool, pen: PenCommand) -> Result<Motion> {
        let result = self.move_to_inner(targets, hold, pen);
        if !matches!(result, Ok(Motion::Arrived)) {
            self.stop_all();
        }
        result
    }

    fn move_to_inner(
        &mut self,
        targets: MotorAngles,
        hold: bool,
        pen: PenCommand,
    ) -> Result<Motion> {
        debug!("moving to {targets:?}, pen {pen:?}");
        self.left.set_position_sp(targets.left);
        self.right.set_position_sp(targets.right);

        match pen {
            PenCommand::Up => self.pen_up()?,
            PenCommand::Down => {
                if self.pen_down()? == ChalkStatus::NeedsReload {
                    return Ok(Motion::NeedsReload);
                }
            }
            PenCommand::Unchanged => {}
        }

        let tick = self.timing.tick();
        let mut watchdog = Watchdog::new(self.timing.stall_ticks);
        loop {
            self.left.run();
            self.right.run();
            if self.chalk_exhausted() {
                return Ok(Motion::NeedsReload);
            }

            if self.left.target_reached() && self.right.target_reached() {
                break;
            }

            self.clock.sleep(tick);
            let mut pending = Vec::with_capacity(2);
            if !self.left.target_reached() {
                pending.push((AxisId::Left, self.left.position()));
            }
            if !self.right.target_reached() {
                pending.push((AxisId::Right, self.right.position()));
            }
            watchdog.observe(&pending)?;
        }

        if hold {
            let until = self.clock.now() + self.timing.settle();
            while self.clock.now() < until {
                self.left.run();
                self.right.run();
                if self.chalk_exhausted() {
                    return Ok(Motion::NeedsReload);
                }
                self.clock.sleep(tick);
            }
        }

        self.stop_drives();
        self.pen.stop();
        if let Some(chalk) = &mut self.chalk {
            chalk.rest();
        }
        Ok(Motion::Arrived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ChalkSettings,
        sim::{SimRig, SimSettings},
        testing::small_config,
    };
    use ropeplot_geom::Config;

    fn coordinator(sim: &SimRig, config: &PlotterConfig) -> Coordinator {
        Coordinator::new(sim.rig(), config).unwrap()
    }

    fn chalk_coordinator() -> (SimRig, Coordinator) {
        let mut config = small_config();
        config.chalk = Some(ChalkSettings::default());
        let settings = SimSettings {
            chalk: true,
            ..SimSettings::default()
        };
        let sim = SimRig::new(Config::new(config.geometry).unwrap(), settings);
        let coord = coordinator(&sim, &config);
        (sim, coord)
    }

    #[test]
    fn watchdog_counts_per_axis() {
        let mut dog = Watchdog::new(3);
        for i in 0..10 {
            // The left axis keeps moving, the right one doesn't.
            let res = dog.observe(&[(AxisId::Left, i), (AxisId::Right, 7)]);
            if i < 3 {
                assert!(res.is_ok());
            } else {
                assert!(matches!(
                    res,
                    Err(PlotError::MotionStalled {
                        axis: AxisId::Right,
                        ticks: 3
                    })
                ));
                return;
            }
        }
        panic!("no stall");
    }

    #[test]
    fn watchdog_forgets_idle_axes() {
        let mut dog = Watchdog::new(2);
        dog.observe(&[(AxisId::Pen, 1)]).unwrap();
        dog.observe(&[(AxisId::Pen, 1)]).unwrap();
        dog.observe(&[]).unwrap();
        dog.observe(&[(AxisId::Pen, 1)]).unwrap();
        dog.observe(&[(AxisId::Pen, 1)]).unwrap();
        assert!(dog.observe(&[(AxisId::Pen, 1)]).is_err());
    }

    #[test]
    fn setup_writes_settings() {
        let mut config = small_config();
        config.invert_right = true;
        let settings = SimSettings {
            mirror_right: true,
            ..SimSettings::default()
        };
        let sim = SimRig::new(Config::new(config.geometry).unwrap(), settings);
        let mut coord = coordinator(&sim, &config);
        assert_eq!(sim.left.stop_action(), StopAction::Brake);
        assert_eq!(sim.right.stop_action(), StopAction::Brake);
        assert_eq!(sim.right.polarity(), Polarity::Inversed);
        assert_eq!(sim.left.polarity(), Polarity::Normal);
        assert_eq!(sim.pen.gains(), config.pen_gains);
        assert_eq!(sim.left.gains(), config.drive_gains);

        // The inversion makes the mirrored motor pull its rope the right way.
        let targets = MotorAngles::new(100, 200);
        coord.move_to(targets, true, PenCommand::Unchanged).unwrap();
        assert_eq!(sim.left.rope_position(), 100);
        assert_eq!(sim.right.rope_position(), 200);

        let gains = PidGains {
            kp: 1.5,
            ..config.drive_gains
        };
        coord.set_drive_gains(gains);
        assert_eq!(sim.left.gains(), gains);
        assert_eq!(sim.right.gains(), gains);
    }

    #[test]
    fn move_arrives_and_stops() {
        let config = small_config();
        let geom = Config::new(config.geometry).unwrap();
        let sim = SimRig::new(geom, SimSettings::default());
        let mut coord = coordinator(&sim, &config);

        let targets = MotorAngles::new(-300, 450);
        let start = sim.world.now();
        let motion = coord.move_to(targets, true, PenCommand::Unchanged).unwrap();
        assert_eq!(motion, Motion::Arrived);
        assert_eq!(coord.drive_positions(), targets);
        assert!(!sim.any_running());
        // 450 units at 1000 per second, then the settle time.
        assert!(sim.world.now() - start >= config.timing.settle());
    }

    #[test]
    fn jammed_drive_stalls() {
        let config = small_config();
        let geom = Config::new(config.geometry).unwrap();
        let sim = SimRig::new(geom, SimSettings::default());
        let mut coord = coordinator(&sim, &config);

        sim.right.jam();
        let err = coord
            .move_to(MotorAngles::new(200, 200), false, PenCommand::Unchanged)
            .unwrap_err();
        assert!(matches!(
            err,
            PlotError::MotionStalled {
                axis: AxisId::Right,
                ..
            }
        ));
        assert!(!sim.any_running());
        // The left rope still got where it was going.
        assert_eq!(sim.left.position(), 200);
    }

    #[test]
    fn move_with_pen_down() {
        let config = small_config();
        let geom = Config::new(config.geometry).unwrap();
        let sim = SimRig::new(geom, SimSettings::default());
        let mut coord = coordinator(&sim, &config);

        let motion = coord
            .move_to(MotorAngles::new(100, -100), false, PenCommand::Down)
            .unwrap();
        assert_eq!(motion, Motion::Arrived);
        assert_eq!(sim.pen.position(), config.pen.down);
        assert!(!sim.world.pen_trace().strokes.is_empty());
    }

    #[test]
    fn chalk_runs_out_mid_move() {
        let (sim, mut coord) = chalk_coordinator();
        assert_eq!(coord.pen_down().unwrap(), ChalkStatus::Ready);
        // A worn-out stick that only asks for more once the move is under way.
        sim.extruder.as_ref().unwrap().displace(20600.0);
        sim.chalk_sensor.press_after(5);

        let motion = coord
            .move_to(MotorAngles::new(500, -500), false, PenCommand::Unchanged)
            .unwrap();
        assert_eq!(motion, Motion::NeedsReload);
        assert!(!sim.any_running());
        let left = sim.left.position();
        assert!(left > 0 && left < 500, "stopped at {left}");
    }

    #[test]
    fn chalk_runs_out_while_settling() {
        let (sim, mut coord) = chalk_coordinator();
        coord.pen_down().unwrap();
        sim.extruder.as_ref().unwrap().displace(20600.0);
        // Getting there takes three ticks, settling takes dozens.
        sim.chalk_sensor.press_after(10);

        let targets = MotorAngles::new(30, 30);
        let motion = coord.move_to(targets, true, PenCommand::Unchanged).unwrap();
        assert_eq!(motion, Motion::NeedsReload);
        assert_eq!(sim.drive_positions(), targets);
        assert!(!sim.any_running());
    }
}
