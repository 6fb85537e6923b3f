//! Plotter settings, loadable from TOML.
//!
//! Every field has a default, so a config file only needs the values that
//! differ for a particular rig. Usually that's just the `[geometry]` table.

use std::{path::Path, time::Duration};

use ropeplot_geom::{Config, GeometryInputs};
use serde::{Deserialize, Serialize};

use crate::{axis::PidGains, PlotError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotterConfig {
    pub geometry: GeometryInputs,
    pub drive_gains: PidGains,
    pub pen_gains: PidGains,
    /// Chalk extruder settings. The extruder is only used if this is present.
    pub chalk: Option<ChalkSettings>,
    /// Number of circles (and lines) across the canvas.
    pub scanlines: u32,
    /// Spacing between circles and lines when etching, in cm.
    pub r_step: f64,
    pub pen: PenSettings,
    pub speeds: SpeedSettings,
    pub timing: Timing,
    /// Reverse the right drive motor, for rigs where it's mounted mirrored.
    pub invert_right: bool,
}

impl Default for PlotterConfig {
    fn default() -> Self {
        PlotterConfig {
            geometry: GeometryInputs::default(),
            drive_gains: PidGains::DRIVE,
            pen_gains: PidGains::PEN,
            chalk: None,
            scanlines: 100,
            r_step: 2.0,
            pen: PenSettings::default(),
            speeds: SpeedSettings::default(),
            timing: Timing::default(),
            invert_right: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenSettings {
    /// Pen motor position with the pen off the canvas.
    pub up: i32,
    /// Pen motor position with the pen touching the canvas.
    pub down: i32,
    pub speed: i32,
}

impl Default for PenSettings {
    fn default() -> Self {
        PenSettings {
            up: 0,
            down: -90,
            speed: 400,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedSettings {
    /// Drive speed over light parts of the image.
    pub fast: f64,
    /// Drive speed while drawing.
    pub slow: f64,
    /// Circle waves go at `curve_fast - curve_k * darkness^curve_exponent`.
    pub curve_fast: f64,
    pub curve_k: f64,
    pub curve_exponent: f64,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        SpeedSettings {
            fast: 520.0,
            slow: 320.0,
            curve_fast: 600.0,
            curve_k: 578.0,
            curve_exponent: 0.9,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChalkSettings {
    /// Extruder position past which the chalk stick is used up.
    pub travel_limit: i32,
    /// Duty cycle for pushing chalk forward while moving.
    pub extrude_duty: i32,
    /// Speed for pushing chalk forward right after the pen goes down.
    pub settle_speed: i32,
    /// Duty cycle for finding the end stop at startup.
    pub calibrate_duty: i32,
    /// Position of the end stop.
    pub zero_offset: i32,
    /// Speed for pulling the extruder back for a new stick.
    pub reload_speed: i32,
}

impl Default for ChalkSettings {
    fn default() -> Self {
        ChalkSettings {
            travel_limit: 20552,
            extrude_duty: 60,
            settle_speed: 150,
            calibrate_duty: -50,
            zero_offset: -10,
            reload_speed: 600,
        }
    }
}

/// Control loop timing. Durations are in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub tick_ms: u64,
    /// How long to keep regulating after arriving at a braked move.
    pub settle_ms: u64,
    /// Pause after the pen goes down, before trusting the chalk sensor.
    pub debounce_ms: u64,
    /// How often to check the button while waiting for a chalk reload.
    pub reload_poll_ms: u64,
    /// Give up waiting for a chalk reload after this long. Waits forever if absent.
    pub reload_timeout_ms: Option<u64>,
    /// Consecutive ticks without movement before a commanded axis counts as stalled.
    pub stall_ticks: u32,
    /// Longest time the extruder may take to find its end stop.
    pub calibrate_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            tick_ms: 16,
            settle_ms: 700,
            debounce_ms: 500,
            reload_poll_ms: 500,
            reload_timeout_ms: None,
            stall_ticks: 125,
            calibrate_timeout_ms: 60_000,
        }
    }
}

impl Timing {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reload_poll(&self) -> Duration {
        Duration::from_millis(self.reload_poll_ms)
    }

    pub fn reload_timeout(&self) -> Option<Duration> {
        self.reload_timeout_ms.map(Duration::from_millis)
    }

    pub fn calibrate_timeout(&self) -> Duration {
        Duration::from_millis(self.calibrate_timeout_ms)
    }
}

fn invalid(name: &'static str, reason: &'static str) -> PlotError {
    PlotError::InvalidSetting { name, reason }
}

impl PlotterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: PlotterConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> String {
        // All of our fields are plain values and tables, which toml can always write.
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Checks everything that can be checked without touching hardware.
    pub fn validate(&self) -> Result<()> {
        Config::new(self.geometry)?;

        if self.scanlines == 0 {
            return Err(invalid("scanlines", "must be at least 1"));
        }
        if !(self.r_step.is_finite() && self.r_step > 0.0) {
            return Err(invalid("r_step", "must be a positive distance"));
        }
        if self.timing.tick_ms == 0 {
            return Err(invalid("timing.tick_ms", "must be positive"));
        }
        if self.timing.stall_ticks == 0 {
            return Err(invalid("timing.stall_ticks", "must be positive"));
        }
        if self.pen.speed <= 0 {
            return Err(invalid("pen.speed", "must be positive"));
        }
        let s = &self.speeds;
        if !(s.slow > 0.0 && s.fast >= s.slow) {
            return Err(invalid("speeds", "need 0 < slow <= fast"));
        }
        if !(s.curve_k >= 0.0 && s.curve_k < s.curve_fast && s.curve_exponent > 0.0) {
            return Err(invalid("speeds", "the darkness curve must stay positive"));
        }
        for gains in [&self.drive_gains, &self.pen_gains] {
            if gains.precision < 0 {
                return Err(invalid("precision", "must not be negative"));
            }
        }
        if let Some(chalk) = &self.chalk {
            if chalk.travel_limit <= chalk.zero_offset {
                return Err(invalid("chalk.travel_limit", "must be past the end stop"));
            }
            if chalk.calibrate_duty == 0 {
                return Err(invalid("chalk.calibrate_duty", "must be non-zero"));
            }
        }
        Ok(())
    }
}
