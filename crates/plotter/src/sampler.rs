use std::path::Path;

use image::{GrayImage, Luma};
use ropeplot_geom::NormPoint;

use crate::{PlotError, Result};

/// A rectangle of pixels. `x1` and `y1` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// A grayscale image that the sweeps look at while they draw.
pub trait ImageSampler: Send + Sync {
    fn dimensions(&self) -> (u32, u32);

    /// The intensity of a pixel, in `0..=255`. Coordinates past the edge are
    /// clamped to it.
    fn intensity(&self, x: u32, y: u32) -> u8;

    /// The smallest rectangle containing every non-zero pixel.
    fn nonzero_bbox(&self) -> Option<PixelRect>;

    /// The intensity under a canvas-normalized point.
    ///
    /// The canvas is square and spans the width of the image, so both
    /// coordinates scale by the width.
    fn sample_norm(&self, p: &NormPoint) -> u8 {
        let (w, h) = self.dimensions();
        let x = clamp_coord(p.x * w as f64, w);
        let y = clamp_coord(p.y * w as f64, h);
        self.intensity(x, y)
    }
}

fn clamp_coord(v: f64, len: u32) -> u32 {
    // Also catches NaN.
    if !(v > 0.0) {
        return 0;
    }
    (v as u32).min(len.saturating_sub(1))
}

/// How to turn an intensity into darkness, from 0 (leave blank) to 1 (draw).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    /// Black is dark.
    Photo,
    /// White is a selected pixel.
    Mask,
}

impl Tone {
    pub fn darkness(self, intensity: u8) -> f64 {
        match self {
            Tone::Photo => (255 - intensity) as f64 / 255.0,
            Tone::Mask => intensity as f64 / 255.0,
        }
    }
}

pub struct Grayscale {
    pixels: GrayImage,
}

impl Grayscale {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let img = image::open(path)?;
        Grayscale::from_image(img.into_luma8())
    }

    pub fn from_image(pixels: GrayImage) -> Result<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(PlotError::EmptyImage);
        }
        Ok(Grayscale { pixels })
    }

    /// A mask that is white wherever this image is darker than `level`, and
    /// black everywhere else.
    pub fn select_below(&self, level: u8) -> Grayscale {
        let pixels = GrayImage::from_fn(self.pixels.width(), self.pixels.height(), |x, y| {
            let Luma([v]) = *self.pixels.get_pixel(x, y);
            Luma([if v < level { 255 } else { 0 }])
        });
        Grayscale { pixels }
    }
}

impl ImageSampler for Grayscale {
    fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    fn intensity(&self, x: u32, y: u32) -> u8 {
        let x = x.min(self.pixels.width() - 1);
        let y = y.min(self.pixels.height() - 1);
        self.pixels.get_pixel(x, y).0[0]
    }

    fn nonzero_bbox(&self) -> Option<PixelRect> {
        let mut bbox: Option<PixelRect> = None;
        for (x, y, px) in self.pixels.enumerate_pixels() {
            if px.0[0] == 0 {
                continue;
            }
            let r = bbox.get_or_insert(PixelRect {
                x0: x,
                y0: y,
                x1: x + 1,
                y1: y + 1,
            });
            r.x0 = r.x0.min(x);
            r.y0 = r.y0.min(y);
            r.x1 = r.x1.max(x + 1);
            r.y1 = r.y1.max(y + 1);
        }
        bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Grayscale {
        Grayscale::from_image(GrayImage::from_fn(w, h, |x, _| Luma([(x * 255 / (w - 1)) as u8])))
            .unwrap()
    }

    #[test]
    fn sampling_clamps() {
        let img = gradient(10, 5);
        assert_eq!(img.sample_norm(&NormPoint::new(0.0, 0.0)), 0);
        assert_eq!(img.sample_norm(&NormPoint::new(1.0, 1.0)), 255);
        assert_eq!(img.sample_norm(&NormPoint::new(-3.0, 7.0)), 0);
        assert_eq!(img.sample_norm(&NormPoint::new(55.0, -1.0)), 255);
        assert_eq!(img.sample_norm(&NormPoint::new(f64::NAN, 0.5)), 0);
        // The vertical coordinate scales by the width too.
        assert_eq!(img.intensity(3, 100), img.sample_norm(&NormPoint::new(0.35, 0.9)));
    }

    #[test]
    fn darkness() {
        assert_eq!(Tone::Photo.darkness(0), 1.0);
        assert_eq!(Tone::Photo.darkness(255), 0.0);
        assert_eq!(Tone::Mask.darkness(255), 1.0);
        assert_eq!(Tone::Mask.darkness(0), 0.0);
    }

    #[test]
    fn mask_bbox() {
        let img = Grayscale::from_image(GrayImage::from_fn(20, 10, |x, y| {
            if (4..9).contains(&x) && (2..7).contains(&y) {
                Luma([30])
            } else {
                Luma([200])
            }
        }))
        .unwrap();

        let mask = img.select_below(65);
        assert_eq!(
            mask.nonzero_bbox(),
            Some(PixelRect {
                x0: 4,
                y0: 2,
                x1: 9,
                y1: 7
            })
        );
        assert_eq!(mask.intensity(5, 5), 255);
        assert_eq!(mask.intensity(0, 0), 0);
        assert_eq!(img.select_below(30).nonzero_bbox(), None);
    }

    #[test]
    fn empty_image() {
        assert!(matches!(
            Grayscale::from_image(GrayImage::new(0, 3)),
            Err(PlotError::EmptyImage)
        ));
    }
}
