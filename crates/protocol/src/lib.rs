#![cfg_attr(not(feature = "std"), no_std)]

use core::{fmt, str::FromStr};

use ropeplot_geom::{MotorAngles, NormPoint};
use serde::{Deserialize, Serialize};

#[cfg(feature = "std")]
pub mod replay;

/// What to do with the pen at the start of a move.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenCommand {
    Up,
    Down,
    #[default]
    Unchanged,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualControl {
    ShortenLeft,
    LengthenLeft,
    StopLeft,
    ShortenRight,
    LengthenRight,
    StopRight,
    StopAll,
}

/// The drawings a plotter knows how to make.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    /// Concentric arcs around both anchors, finished with horizontal lines.
    Circles,
    /// Arcs around the left anchor, wiggling the pen on the dark parts.
    CircleWaves,
    /// Circles and lines restricted to the bounding box of each brightness band.
    Etch,
    /// A pre-recorded list of points.
    Replay,
}

impl Pattern {
    pub const ALL: [Pattern; 4] = [
        Pattern::Circles,
        Pattern::CircleWaves,
        Pattern::Etch,
        Pattern::Replay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pattern::Circles => "circles",
            Pattern::CircleWaves => "circle-waves",
            Pattern::Etch => "etch",
            Pattern::Replay => "replay",
        }
    }

    /// Whether the pattern samples an image while it draws.
    pub fn needs_image(self) -> bool {
        !matches!(self, Pattern::Replay)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown pattern (expected one of circles, circle-waves, etch, replay)")]
pub struct UnknownPattern;

impl FromStr for Pattern {
    type Err = UnknownPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or(UnknownPattern)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub norm: NormPoint,
    pub angles: MotorAngles,
}
