use std::path::Path;

use kurbo::Rect;
use ropeplot_geom::Config;
use ropeplot_plotter::sim::PenTrace;
use svg::{
    node::element::{path::Data, Circle, Path as SvgPath, Rectangle},
    Document,
};

// Multiply all dimensions by 10 because firefox doesn't like to see small svgs.
const SCALE: f64 = 10.0;

fn outline(rect: Rect) -> Rectangle {
    Rectangle::new()
        .set("x", rect.x0 * SCALE)
        .set("y", rect.y0 * SCALE)
        .set("width", rect.width() * SCALE)
        .set("height", rect.height() * SCALE)
        .set("fill", "none")
        .set("stroke", "lightgray")
        .set("stroke-width", 2)
}

/// The doorframe, the canvas and everything the pen drew.
pub fn illustrate(trace: &PenTrace, geometry: &Config) -> Document {
    let canvas = geometry.canvas_rect();
    let w = geometry.anchor_distance().get() * SCALE;
    let h = (canvas.y1 + canvas.y0) * SCALE;
    let mut document = Document::new()
        .set("viewBox", (0.0, 0.0, w, h))
        .add(outline(canvas));

    for stroke in &trace.strokes {
        let Some((first, rest)) = stroke.split_first() else {
            continue;
        };
        if rest.is_empty() {
            document = document.add(
                Circle::new()
                    .set("cx", first.x * SCALE)
                    .set("cy", first.y * SCALE)
                    .set("r", 1.0)
                    .set("fill", "black"),
            );
            continue;
        }
        let data = rest.iter().fold(
            Data::new().move_to((first.x * SCALE, first.y * SCALE)),
            |data, p| data.line_to((p.x * SCALE, p.y * SCALE)),
        );
        document = document.add(
            SvgPath::new()
                .set("fill", "none")
                .set("stroke", "black")
                .set("stroke-width", 1)
                .set("d", data),
        );
    }
    document
}

pub fn write_svg(path: &Path, trace: &PenTrace, geometry: &Config) -> anyhow::Result<()> {
    svg::save(path, &illustrate(trace, geometry))?;
    Ok(())
}
