//! Basic geometry of a two-rope plotter, including conversion between canvas
//! coordinates, rope lengths and motor angles.
//!
//! The two ropes hang from "anchors" at the top of a doorframe. The global
//! frame has its origin at the left anchor, x pointing right and y pointing
//! down, measured in centimeters. When the ropes have their rest lengths the
//! pen hangs at the "rest point," which is also the top-left corner of the
//! square canvas. The canvas is centered between the anchors.
//!
//! This crate supports `no_std` and uses `libm` for its square roots.

#![cfg_attr(not(feature = "std"), no_std)]

use libm::{fabs, sqrt};

pub type Point = euclid::Point2D<f64, Cm>;
pub type NormPoint = euclid::Point2D<f64, Canvas>;

/// Centimeters in the doorframe frame.
pub struct Cm;

/// Canvas-normalized units: the drawable square is `[0, 1] x [0, 1]`.
pub struct Canvas;

pub type Len = euclid::Length<f64, Cm>;

fn square(x: f64) -> f64 {
    x * x
}

pub trait LenExt {
    fn cm(self) -> Len;
}

impl LenExt for f64 {
    fn cm(self) -> Len {
        Len::new(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LeftRight<T> {
    pub left: T,
    pub right: T,
}

impl<T> LeftRight<T> {
    pub fn new(left: T, right: T) -> Self {
        LeftRight { left, right }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// Lengths of the ropes, from the anchors to the pen.
pub type RopeLengths = LeftRight<Len>;

/// Positions of the two drive motors, in the motors' signed integer angle
/// units. Zero corresponds to the rest length of each rope.
pub type MotorAngles = LeftRight<i32>;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("geometry input `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("geometry input `{0}` must be positive")]
    NonPositive(&'static str),
    #[error("ropes of {left}cm and {right}cm cannot span an anchor distance of {distance}cm")]
    NotATriangle { left: f64, right: f64, distance: f64 },
    #[error("the rest point hangs outside the anchors")]
    RestPointOutside,
    #[error("the rest point leaves no room for a canvas")]
    EmptyCanvas,
    #[error("the cm-to-angle calibration must be non-zero")]
    ZeroCalibration,
}

/// The measured quantities that determine the geometry.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeometryInputs {
    /// Length of the left rope when the pen is at the rest point, in cm.
    pub left_rest: f64,
    /// Length of the right rope when the pen is at the rest point, in cm.
    pub right_rest: f64,
    /// Horizontal distance between the anchors, in cm. (We assume that the
    /// anchors are aligned vertically.)
    pub anchor_distance: f64,
    /// How many motor angle units it takes to let out one centimeter of rope.
    /// Negative if letting out rope turns the motor backwards.
    pub cm_to_angle: f64,
}

impl Default for GeometryInputs {
    fn default() -> Self {
        // Rest point 20cm right of and 20cm below the left anchor of a
        // 100cm doorframe, giving a 60cm canvas.
        GeometryInputs {
            left_rest: sqrt(square(20.0) + square(20.0)),
            right_rest: sqrt(square(80.0) + square(20.0)),
            anchor_distance: 100.0,
            cm_to_angle: -175.0,
        }
    }
}

/// Values derived from the rope triangle.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CanvasGeometry {
    /// Height of the rope triangle: the distance from the anchors down to
    /// the top edge of the canvas.
    pub v_margin: f64,
    /// Distance from the left anchor to the left edge of the canvas.
    pub h_margin: f64,
    /// Side length of the square canvas.
    pub canvas_size: f64,
}

/// Area of a triangle with the given side lengths, by Heron's formula.
///
/// Side lengths that do not form a triangle give an area of zero.
pub fn triangle_area(a: f64, b: f64, c: f64) -> f64 {
    let half_p = (a + b + c) / 2.0;
    let product = half_p * (half_p - a) * (half_p - b) * (half_p - c);
    sqrt(product.max(0.0))
}

pub fn canvas_geometry(l0: f64, r0: f64, dist: f64) -> Result<CanvasGeometry, GeometryError> {
    for (name, value) in [("left_rest", l0), ("right_rest", r0), ("anchor_distance", dist)] {
        if !value.is_finite() {
            return Err(GeometryError::NonFinite(name));
        }
        if value <= 0.0 {
            return Err(GeometryError::NonPositive(name));
        }
    }

    if l0 + r0 <= dist || l0 + dist <= r0 || r0 + dist <= l0 {
        return Err(GeometryError::NotATriangle {
            left: l0,
            right: r0,
            distance: dist,
        });
    }

    // An obtuse angle at the left anchor puts the rest point left of it.
    if square(r0) > square(l0) + square(dist) {
        return Err(GeometryError::RestPointOutside);
    }

    let v_margin = triangle_area(l0, r0, dist) / dist * 2.0;
    let h_margin = sqrt((square(l0) - square(v_margin)).max(0.0));
    let canvas_size = dist - 2.0 * h_margin;
    if canvas_size <= dist * 1e-9 || !canvas_size.is_finite() {
        return Err(GeometryError::EmptyCanvas);
    }

    Ok(CanvasGeometry {
        v_margin,
        h_margin,
        canvas_size,
    })
}

/// The geometric configuration of a plotter.
///
/// The derived canvas values are always consistent with the inputs: the only
/// way to change the inputs is through [`Config::reconfigure`], which
/// recomputes everything or changes nothing.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "GeometryInputs", into = "GeometryInputs")]
pub struct Config {
    inputs: GeometryInputs,
    canvas: CanvasGeometry,
}

impl TryFrom<GeometryInputs> for Config {
    type Error = GeometryError;

    fn try_from(inputs: GeometryInputs) -> Result<Self, GeometryError> {
        Config::new(inputs)
    }
}

impl From<Config> for GeometryInputs {
    fn from(c: Config) -> Self {
        c.inputs
    }
}

impl Config {
    pub fn new(inputs: GeometryInputs) -> Result<Self, GeometryError> {
        if !inputs.cm_to_angle.is_finite() {
            return Err(GeometryError::NonFinite("cm_to_angle"));
        }
        if inputs.cm_to_angle == 0.0 {
            return Err(GeometryError::ZeroCalibration);
        }
        let canvas = canvas_geometry(inputs.left_rest, inputs.right_rest, inputs.anchor_distance)?;
        Ok(Config { inputs, canvas })
    }

    /// Replaces the inputs, recomputing the canvas. On error the old
    /// geometry is left untouched.
    pub fn reconfigure(&mut self, inputs: GeometryInputs) -> Result<(), GeometryError> {
        *self = Config::new(inputs)?;
        Ok(())
    }

    pub fn inputs(&self) -> &GeometryInputs {
        &self.inputs
    }

    pub fn canvas(&self) -> &CanvasGeometry {
        &self.canvas
    }

    pub fn anchor_distance(&self) -> Len {
        self.inputs.anchor_distance.cm()
    }

    pub fn cm_to_angle(&self) -> f64 {
        self.inputs.cm_to_angle
    }

    /// The sign of a motor velocity that shortens its rope.
    pub fn shorten_sign(&self) -> i32 {
        if self.inputs.cm_to_angle > 0.0 {
            -1
        } else {
            1
        }
    }

    pub fn anchor(&self, side: Side) -> Point {
        match side {
            Side::Left => Point::new(0.0, 0.0),
            Side::Right => Point::new(self.inputs.anchor_distance, 0.0),
        }
    }

    pub fn rope_lengths(&self, p: &Point) -> RopeLengths {
        let d = self.inputs.anchor_distance;
        RopeLengths {
            left: sqrt(square(p.x) + square(p.y)).cm(),
            right: sqrt(square(d - p.x) + square(p.y)).cm(),
        }
    }

    /// Motor targets for the given rope lengths, truncated toward zero.
    pub fn rope_lengths_to_angles(&self, lengths: &RopeLengths) -> MotorAngles {
        let k = self.inputs.cm_to_angle;
        MotorAngles {
            left: ((lengths.left.get() - self.inputs.left_rest) * k) as i32,
            right: ((lengths.right.get() - self.inputs.right_rest) * k) as i32,
        }
    }

    pub fn angles_to_rope_lengths(&self, angles: &MotorAngles) -> RopeLengths {
        let k = self.inputs.cm_to_angle;
        RopeLengths {
            left: (angles.left as f64 / k + self.inputs.left_rest).cm(),
            right: (angles.right as f64 / k + self.inputs.right_rest).cm(),
        }
    }

    /// Solves the rope triangle: the height from Heron's formula gives `y`,
    /// and Pythagoras on the left rope gives `x`.
    pub fn rope_lengths_to_point(&self, lengths: &RopeLengths) -> Point {
        let d = self.inputs.anchor_distance;
        let l = lengths.left.get();
        let r = lengths.right.get();
        let y = triangle_area(l, r, d) * 2.0 / d;
        let x = sqrt((square(l) - square(y)).max(0.0));
        Point::new(x, y)
    }

    pub fn motor_targets(&self, p: &Point) -> MotorAngles {
        self.rope_lengths_to_angles(&self.rope_lengths(p))
    }

    pub fn point_from_motor_positions(&self, angles: &MotorAngles) -> Point {
        self.rope_lengths_to_point(&self.angles_to_rope_lengths(angles))
    }

    pub fn normalize(&self, p: &Point) -> NormPoint {
        let c = &self.canvas;
        NormPoint::new(
            (p.x - c.h_margin) / c.canvas_size,
            (p.y - c.v_margin) / c.canvas_size,
        )
    }

    pub fn denormalize(&self, p: &NormPoint) -> Point {
        let c = &self.canvas;
        Point::new(
            p.x * c.canvas_size + c.h_margin,
            p.y * c.canvas_size + c.v_margin,
        )
    }

    pub fn motor_targets_norm(&self, p: &NormPoint) -> MotorAngles {
        self.motor_targets(&self.denormalize(p))
    }

    pub fn norm_from_motor_positions(&self, angles: &MotorAngles) -> NormPoint {
        self.normalize(&self.point_from_motor_positions(angles))
    }

    /// How far one angle unit moves a rope end, in cm.
    pub fn angle_resolution(&self) -> Len {
        (1.0 / fabs(self.inputs.cm_to_angle)).cm()
    }

    #[cfg(feature = "kurbo")]
    pub fn canvas_rect(&self) -> kurbo::Rect {
        let c = &self.canvas;
        kurbo::Rect::new(
            c.h_margin,
            c.v_margin,
            c.h_margin + c.canvas_size,
            c.v_margin + c.canvas_size,
        )
    }
}
