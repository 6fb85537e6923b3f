use ropeplot_geom::{Config, NormPoint, Point};
use ropeplot_protocol::PenCommand;

use super::{Op, Stride};

fn line_to(target: Point) -> Op {
    Op::MoveTo {
        target,
        pen: PenCommand::Unchanged,
        hold: false,
    }
}

/// Draws a polyline through canvas-normalized points.
///
/// The pen goes down at the first point and stays down until the last one.
/// Each point after the first is one stride.
pub(crate) fn replay(geometry: &Config, points: &[NormPoint]) -> impl Iterator<Item = Stride> {
    let n = points.len() as f32;
    let mut targets = points.iter().map(|p| geometry.denormalize(p));
    let mut strides = Vec::with_capacity(points.len() + 1);

    if let Some(first) = targets.next() {
        let mut ops = vec![Op::Pen(PenCommand::Up), line_to(first), Op::Pen(PenCommand::Down)];
        let progress = match targets.next() {
            Some(second) => {
                ops.push(line_to(second));
                1.0 / n
            }
            None => 0.0,
        };
        strides.push(Stride { ops, progress });
    }
    for (k, target) in targets.enumerate() {
        strides.push(Stride {
            ops: vec![line_to(target)],
            progress: (k + 2) as f32 / n,
        });
    }

    let origin = geometry.denormalize(&NormPoint::origin());
    strides.push(Stride {
        ops: vec![Op::Pen(PenCommand::Up), line_to(origin)],
        progress: 1.0,
    });
    strides.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::small_config;

    #[test]
    fn one_stride_per_segment() {
        let geometry = Config::new(small_config().geometry).unwrap();
        let points = [
            NormPoint::new(0.1, 0.1),
            NormPoint::new(0.5, 0.2),
            NormPoint::new(0.9, 0.8),
        ];
        let strides: Vec<Stride> = replay(&geometry, &points).collect();
        let progress: Vec<f32> = strides.iter().map(|s| s.progress).collect();
        assert_eq!(progress, [1.0f32 / 3.0, 2.0 / 3.0, 1.0]);

        assert!(matches!(
            strides[0].ops[..],
            [
                Op::Pen(PenCommand::Up),
                Op::MoveTo { .. },
                Op::Pen(PenCommand::Down),
                Op::MoveTo { .. }
            ]
        ));
        match &strides[1].ops[..] {
            [Op::MoveTo { target, .. }] => {
                assert_eq!(*target, geometry.denormalize(&points[2]));
            }
            other => panic!("unexpected ops {other:?}"),
        }
        assert!(matches!(strides[2].ops[0], Op::Pen(PenCommand::Up)));
    }

    #[test]
    fn single_point() {
        let geometry = Config::new(small_config().geometry).unwrap();
        let strides: Vec<Stride> = replay(&geometry, &[NormPoint::new(0.5, 0.5)]).collect();
        assert_eq!(strides.len(), 2);
        assert_eq!(strides[0].progress, 0.0);
        assert_eq!(strides[0].ops.len(), 3);
    }
}
