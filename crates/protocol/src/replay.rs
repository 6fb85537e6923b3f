//! The coordinate file format for replaying a recorded drawing.
//!
//! The first line holds the number of points `N`. Each of the next `N` lines
//! holds one canvas-normalized point as `x,y`. Anything after the `N`th point
//! is ignored.

use std::{fmt::Write as _, path::Path};

use ropeplot_geom::NormPoint;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("the coordinate file is empty")]
    Empty,
    #[error("the first line should be a point count, found {text:?}")]
    BadCount { text: String },
    #[error("the coordinate file declares zero points")]
    ZeroPoints,
    #[error("the coordinate file declares {expected} points but only holds {found}")]
    Truncated { expected: usize, found: usize },
    #[error("line {line}: expected `x,y`, found {text:?}")]
    BadPoint { line: usize, text: String },
    #[error("line {line}: point ({x}, {y}) is outside the canvas")]
    OutOfRange { line: usize, x: f64, y: f64 },
    #[error("failed to read the coordinate file")]
    Io(#[from] std::io::Error),
}

fn parse_coord(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a whole coordinate file, validating every point before returning.
pub fn parse(input: &str) -> Result<Vec<NormPoint>, FormatError> {
    if input.trim().is_empty() {
        return Err(FormatError::Empty);
    }
    let mut lines = input.lines();
    let first = lines.next().ok_or(FormatError::Empty)?;
    let count: usize = first.trim().parse().map_err(|_| FormatError::BadCount {
        text: first.to_owned(),
    })?;
    if count == 0 {
        return Err(FormatError::ZeroPoints);
    }

    let mut points = Vec::with_capacity(count);
    for (idx, text) in lines.take(count).enumerate() {
        // Line numbers are 1-based, and the count is on line 1.
        let line = idx + 2;
        let bad = || FormatError::BadPoint {
            line,
            text: text.to_owned(),
        };
        let (x, y) = text.split_once(',').ok_or_else(bad)?;
        let (x, y) = (parse_coord(x).ok_or_else(bad)?, parse_coord(y).ok_or_else(bad)?);
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return Err(FormatError::OutOfRange { line, x, y });
        }
        points.push(NormPoint::new(x, y));
    }

    if points.len() < count {
        return Err(FormatError::Truncated {
            expected: count,
            found: points.len(),
        });
    }
    Ok(points)
}

pub fn read(path: impl AsRef<Path>) -> Result<Vec<NormPoint>, FormatError> {
    let contents = std::fs::read_to_string(path)?;
    parse(&contents)
}

pub fn write(points: &[NormPoint]) -> String {
    let mut out = format!("{}\n", points.len());
    for p in points {
        // Writing to a String can't fail.
        let _ = writeln!(out, "{},{}", p.x, p.y);
    }
    out
}
