use std::{sync::Arc, time::Duration};

use ropeplot_geom::{Config, Side};

use super::{
    circles::ArcGrid,
    park, phased,
    trace::{Shading, SpeedProfile, Wave},
    Phase, Stride,
};
use crate::{
    config::PlotterConfig,
    sampler::{ImageSampler, Tone},
};

const THRESHOLD: f64 = 0.2;
const HALF_PERIOD: Duration = Duration::from_millis(500);
// Neighbouring waves overlap a little at full darkness.
const OVERLAP: f64 = 1.15;

fn wave_shading(
    geometry: &Config,
    image: Arc<dyn ImageSampler>,
    config: &PlotterConfig,
    step: f64,
) -> Shading {
    let speeds = &config.speeds;
    Shading {
        image,
        tone: Tone::Photo,
        threshold: THRESHOLD,
        speed: SpeedProfile::Curve {
            fast: speeds.curve_fast,
            k: speeds.curve_k,
            exponent: speeds.curve_exponent,
        },
        wave: Some(Wave {
            amplitude: step * geometry.cm_to_angle().abs() / 2.0 * OVERLAP,
            half_period: HALF_PERIOD,
        }),
    }
}

/// Arcs around the left anchor that wiggle more where the image is darker.
pub(crate) fn circle_waves(
    geometry: &Config,
    image: Arc<dyn ImageSampler>,
    config: &PlotterConfig,
) -> impl Iterator<Item = Stride> {
    let grid = ArcGrid::new(geometry.canvas_rect(), Side::Left, geometry);
    let n = config.scanlines as usize;
    let step = (grid.r_max() - grid.r_min()) / n as f64;
    let shading = wave_shading(geometry, image, config, step);
    phased(
        vec![Phase::nth_of(0, 1, grid.strides(n, step, shading))],
        park(geometry),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::small_config;

    #[test]
    fn waves_fill_half_a_step() {
        let config = small_config();
        let geometry = Config::new(config.geometry).unwrap();
        let image: Arc<dyn ImageSampler> = Arc::new(
            crate::sampler::Grayscale::from_image(image::GrayImage::new(4, 4)).unwrap(),
        );
        let shading = wave_shading(&geometry, image, &config, 2.0);
        let wave = shading.wave.unwrap();
        // A 2cm step is 2 * |k| angle units, half of it on each side.
        let expected = geometry.cm_to_angle().abs() * OVERLAP;
        assert!((wave.amplitude - expected).abs() < 1e-9);
        assert_eq!(shading.speed.speed(0.0), config.speeds.curve_fast);
    }
}
