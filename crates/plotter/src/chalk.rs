//! The chalk extruder.
//!
//! A stick of chalk sits in a tube behind the pen holder. When the tip wears
//! down, a touch sensor behind the stick closes, and a motor pushes the stick
//! forward. Once the motor has pushed past its travel limit, the stick is used
//! up: the motor pulls back to its zero position and waits for a human to put
//! a new stick in and press the button.

use log::info;

use crate::{
    axis::{AxisId, ChalkHardware, MotorAxis, TouchSensor},
    clock::Clock,
    config::{ChalkSettings, Timing},
    motion::{Coordinator, Watchdog},
    PlotError, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChalkTick {
    /// The chalk touches; nothing to do.
    Idle,
    /// Pushing the chalk forward.
    Extruding,
    /// The stick is used up.
    Exhausted,
}

/// A calibrated chalk extruder. The only way to get one is
/// [`Chalk::calibrate`], which finds the end stop.
pub struct Chalk {
    extruder: Box<dyn MotorAxis>,
    sensor: Box<dyn TouchSensor>,
    settings: ChalkSettings,
}

impl Chalk {
    /// Runs the extruder back slowly until it stalls against its end stop,
    /// and defines that spot as the zero offset.
    pub fn calibrate(
        hw: ChalkHardware,
        settings: ChalkSettings,
        clock: &mut dyn Clock,
        timing: &Timing,
    ) -> Result<Chalk> {
        let ChalkHardware {
            mut extruder,
            sensor,
        } = hw;

        info!("finding the chalk extruder's end stop");
        extruder.run_direct(settings.calibrate_duty);
        let start = clock.now();
        while !extruder.is_stalled() {
            if clock.now() - start >= timing.calibrate_timeout() {
                extruder.stop();
                let ticks = (timing.calibrate_timeout_ms / timing.tick_ms.max(1)) as u32;
                return Err(PlotError::MotionStalled {
                    axis: AxisId::Chalk,
                    ticks,
                });
            }
            clock.sleep(timing.tick());
        }
        extruder.stop();
        extruder.set_position(settings.zero_offset);

        Ok(Chalk {
            extruder,
            sensor,
            settings,
        })
    }

    /// One control tick of chalk replenishment, while the pen is down.
    pub fn tick(&mut self) -> ChalkTick {
        if self.sensor.is_pressed() {
            self.extruder.run_direct(self.settings.extrude_duty);
            if self.exhausted() {
                self.extruder.stop();
                ChalkTick::Exhausted
            } else {
                ChalkTick::Extruding
            }
        } else {
            self.extruder.stop();
            ChalkTick::Idle
        }
    }

    pub fn position(&self) -> i32 {
        self.extruder.position()
    }

    pub fn exhausted(&self) -> bool {
        self.extruder.position() > self.settings.travel_limit
    }

    pub(crate) fn sensor_pressed(&self) -> bool {
        self.sensor.is_pressed()
    }

    pub(crate) fn push(&mut self) {
        self.extruder.run_forever(self.settings.settle_speed);
    }

    pub(crate) fn rest(&mut self) {
        self.extruder.stop();
    }

    /// Pulls the extruder back to zero to make room for a new stick.
    pub fn retract(&mut self, clock: &mut dyn Clock, timing: &Timing) -> Result<()> {
        info!("chalk used up, pulling the extruder back");
        self.extruder.run_to_abs_pos(0, self.settings.reload_speed);
        let mut watchdog = Watchdog::new(timing.stall_ticks);
        while self.extruder.is_running() {
            clock.sleep(timing.tick());
            if let Err(e) = watchdog.observe(&[(AxisId::Chalk, self.extruder.position())]) {
                self.extruder.stop();
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Coordinator {
    pub fn has_chalk(&self) -> bool {
        self.chalk.is_some()
    }

    /// Stops everything and pulls the chalk extruder back. After this, the
    /// caller waits for [`Coordinator::reload_confirmed`].
    pub fn begin_reload(&mut self) -> Result<()> {
        self.stop_all();
        if let Some(chalk) = &mut self.chalk {
            chalk.retract(self.clock.as_mut(), &self.timing)?;
        }
        Ok(())
    }

    /// Checks the button once.
    pub fn reload_confirmed(&mut self) -> bool {
        self.button.is_confirmed()
    }

    /// The blocking version of a reload: retracts, then checks the button
    /// every `reload_poll` until someone presses it.
    pub fn reload_chalk(&mut self) -> Result<()> {
        if self.chalk.is_none() {
            return Ok(());
        }
        self.begin_reload()?;

        let start = self.clock.now();
        loop {
            if self.reload_confirmed() {
                info!("chalk reloaded");
                return Ok(());
            }
            let waited = self.clock.now() - start;
            if let Some(timeout) = self.timing.reload_timeout() {
                if waited >= timeout {
                    return Err(PlotError::SensorFault { waited });
                }
            }
            self.clock.sleep(self.timing.reload_poll());
        }
    }
}
