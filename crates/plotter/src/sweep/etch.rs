//! Etching: several passes, each over only the pixels darker than a level.
//!
//! Every pass works on a black and white mask of the image and only covers
//! the bounding box of the mask, so light images finish a lot faster than
//! with [`circles`](super::circles::circles).

use std::sync::Arc;

use kurbo::Rect;
use log::{info, warn};
use ropeplot_geom::{Config, NormPoint, Side};

use super::{
    circles::{line_strides, ArcGrid, LineDrive},
    park, phased,
    trace::{Shading, SpeedProfile},
    Op, Phase, Stride,
};
use crate::{
    config::PlotterConfig,
    sampler::{Grayscale, ImageSampler, Tone},
};

/// Intensity levels of the passes: left arcs, right arcs, then lines.
pub const LEVELS: [u8; 3] = [180, 120, 65];

pub(crate) fn optimized_etch(
    geometry: &Config,
    image: &Grayscale,
    config: &PlotterConfig,
) -> impl Iterator<Item = Stride> {
    let (width, _) = image.dimensions();
    let width = width as f64;
    let r_step = config.r_step;

    let mut phases = Vec::with_capacity(LEVELS.len());
    for (band, level) in LEVELS.into_iter().enumerate() {
        let mask = image.select_below(level);
        let Some(bbox) = mask.nonzero_bbox() else {
            warn!("nothing darker than {level}, skipping pass {band}");
            phases.push(Phase::nth_of(band, LEVELS.len(), std::iter::empty()));
            continue;
        };

        let top_left =
            geometry.denormalize(&NormPoint::new(bbox.x0 as f64 / width, bbox.y0 as f64 / width));
        let bottom_right =
            geometry.denormalize(&NormPoint::new(bbox.x1 as f64 / width, bbox.y1 as f64 / width));
        let rect = Rect::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y);
        info!("pass {band}: darker than {level} inside {rect:?}");

        let shading = Shading {
            image: Arc::new(mask),
            tone: Tone::Mask,
            threshold: 0.5,
            speed: SpeedProfile::Banded {
                threshold: 0.5,
                fast: config.speeds.fast,
                slow: config.speeds.slow,
            },
            wave: None,
        };

        let strides: Box<dyn Iterator<Item = (Vec<Op>, f32)>> = match band {
            0 | 1 => {
                let side = if band == 0 { Side::Left } else { Side::Right };
                let grid = ArcGrid::new(rect, side, geometry);
                let count = ((grid.r_max() - grid.r_min()) / r_step).round() as usize;
                Box::new(grid.strides(count, r_step, shading))
            }
            _ => {
                let count = (rect.height() / r_step).round() as usize;
                Box::new(line_strides(rect, count, r_step, shading, LineDrive::Level))
            }
        };
        phases.push(Phase::nth_of(band, LEVELS.len(), strides));
    }

    phased(phases, park(geometry))
}
