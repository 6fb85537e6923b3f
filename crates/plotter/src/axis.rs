//! The hardware the plotter talks to.
//!
//! Positions and speeds are in the motor's own angle units (degrees on the
//! usual servo motors). Speeds are angle units per second, and duty cycles are
//! percentages in `-100..=100`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AxisId {
    Left,
    Right,
    Pen,
    Chalk,
}

impl AxisId {
    pub(crate) const COUNT: usize = 4;

    pub(crate) fn index(self) -> usize {
        match self {
            AxisId::Left => 0,
            AxisId::Right => 1,
            AxisId::Pen => 2,
            AxisId::Chalk => 3,
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AxisId::Left => "left",
            AxisId::Right => "right",
            AxisId::Pen => "pen",
            AxisId::Chalk => "chalk",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopAction {
    #[default]
    Coast,
    Brake,
    Hold,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    #[default]
    Normal,
    Inversed,
}

/// Position regulator settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// How close (in angle units) counts as having reached the set-point.
    #[serde(default)]
    pub precision: i32,
}

impl PidGains {
    pub const DRIVE: PidGains = PidGains {
        kp: 2.2,
        ki: 0.2,
        kd: 0.02,
        precision: 5,
    };

    pub const PEN: PidGains = PidGains {
        kp: 2.0,
        ki: 0.1,
        kd: 0.0,
        precision: 10,
    };
}

/// One regulated motor with an encoder.
pub trait MotorAxis {
    fn position(&self) -> i32;

    /// Redefines the current position without moving.
    fn set_position(&mut self, position: i32);

    fn position_sp(&self) -> i32;

    fn set_position_sp(&mut self, sp: i32);

    /// Runs one step of the position regulator toward the set-point. The
    /// motor keeps the resulting drive until the next call or a stop.
    fn run(&mut self);

    fn run_forever(&mut self, speed: i32);

    fn run_direct(&mut self, duty: i32);

    /// Moves to an absolute position on its own, updating the set-point.
    /// [`MotorAxis::is_running`] stays true until it gets there.
    fn run_to_abs_pos(&mut self, position: i32, speed: i32);

    fn stop(&mut self);

    fn set_stop_action(&mut self, action: StopAction);

    /// Whether the position is within the regulator's precision of the set-point.
    fn target_reached(&self) -> bool;

    fn is_running(&self) -> bool;

    fn is_stalled(&self) -> bool;

    fn set_polarity(&mut self, polarity: Polarity);

    fn set_gains(&mut self, gains: PidGains);
}

pub trait TouchSensor {
    fn is_pressed(&self) -> bool;
}

/// The button a human presses after loading a new stick of chalk.
pub trait Acknowledge {
    fn is_confirmed(&mut self) -> bool;
}

pub trait PowerSupply {
    /// Battery voltage, in volts.
    fn voltage(&self) -> f64;
}

pub struct ChalkHardware {
    pub extruder: Box<dyn MotorAxis>,
    /// Pressed when the chalk needs pushing forward.
    pub sensor: Box<dyn TouchSensor>,
}

/// Everything a [`Plotter`](crate::Plotter) drives. The plotter takes sole
/// ownership of it.
pub struct Rig {
    pub left: Box<dyn MotorAxis>,
    pub right: Box<dyn MotorAxis>,
    pub pen: Box<dyn MotorAxis>,
    pub chalk: Option<ChalkHardware>,
    pub button: Box<dyn Acknowledge>,
    pub battery: Option<Box<dyn PowerSupply>>,
    pub clock: Box<dyn Clock>,
}
