use std::time::Duration;

use ropeplot_geom::GeometryError;
use ropeplot_protocol::{replay::FormatError, Pattern};

use crate::axis::AxisId;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    /// The measured ropes and anchors don't describe a usable canvas.
    #[error("invalid geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// A commanded axis stopped making progress before reaching its target.
    #[error("the {axis} motor made no progress for {ticks} ticks")]
    MotionStalled { axis: AxisId, ticks: u32 },

    #[error("bad coordinate file: {0}")]
    Format(#[from] FormatError),

    /// Nobody acknowledged a chalk reload in time.
    #[error("gave up waiting for a chalk reload after {waited:?}")]
    SensorFault { waited: Duration },

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting {
        name: &'static str,
        reason: &'static str,
    },

    #[error("the {pattern} pattern needs {what}")]
    MissingInput {
        pattern: Pattern,
        what: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load image: {0}")]
    Image(#[from] image::ImageError),

    #[error("the image has no pixels")]
    EmptyImage,
}

pub type Result<T, E = PlotError> = std::result::Result<T, E>;
