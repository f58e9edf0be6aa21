use std::fmt;
use std::str::FromStr;

use crate::error::SvgError;
use crate::path::format_number;
use crate::types::{Matrix, Point};

/// Coefficient tolerance used when comparing transforms.
pub const TRANSFORM_TOLERANCE: f32 = 0.01;

/// A single named transform operation. Equality compares the resulting
/// matrices, so `scale(2)` equals `scale(2, 2)` and `matrix(2 0 0 2 0 0)`.
#[derive(Debug, Clone, Copy)]
pub enum Transform {
    Translate { x: f32, y: f32 },
    Scale { x: f32, y: f32 },
    Rotate { angle: f32, center: Option<Point> },
    /// Skew angles in degrees (`skewX`/`skewY`).
    Skew { ax: f32, ay: f32 },
    /// Raw shear factors.
    Shear { x: f32, y: f32 },
    Matrix(Matrix),
}

impl Transform {
    pub fn matrix(&self) -> Matrix {
        match *self {
            Transform::Translate { x, y } => Matrix::translate(x, y),
            Transform::Scale { x, y } => Matrix::scale(x, y),
            Transform::Rotate { angle, center } => match center {
                Some(c) => Matrix::rotate_about(angle, c.x, c.y),
                None => Matrix::rotate(angle),
            },
            Transform::Skew { ax, ay } => Matrix::skew(ax, ay),
            Transform::Shear { x, y } => Matrix::shear(x, y),
            Transform::Matrix(m) => m,
        }
    }

    pub fn write(&self) -> String {
        match *self {
            Transform::Translate { x, y } => {
                if y == 0.0 {
                    format!("translate({})", format_number(x))
                } else {
                    format!("translate({}, {})", format_number(x), format_number(y))
                }
            }
            Transform::Scale { x, y } => {
                if (x - y).abs() < 1e-6 {
                    format!("scale({})", format_number(x))
                } else {
                    format!("scale({}, {})", format_number(x), format_number(y))
                }
            }
            Transform::Rotate { angle, center } => match center {
                Some(c) => format!(
                    "rotate({}, {}, {})",
                    format_number(angle),
                    format_number(c.x),
                    format_number(c.y)
                ),
                None => format!("rotate({})", format_number(angle)),
            },
            Transform::Skew { ax, ay } => {
                if ay == 0.0 {
                    format!("skewX({})", format_number(ax))
                } else if ax == 0.0 {
                    format!("skewY({})", format_number(ay))
                } else {
                    Transform::Matrix(self.matrix()).write()
                }
            }
            Transform::Shear { x, y } => {
                format!("shear({}, {})", format_number(x), format_number(y))
            }
            Transform::Matrix(m) => {
                let parts: Vec<String> = m
                    .coefficients()
                    .iter()
                    .map(|v| format_number(*v))
                    .collect();
                format!("matrix({})", parts.join(", "))
            }
        }
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        self.matrix()
            .approx_eq(&other.matrix(), TRANSFORM_TOLERANCE)
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.write())
    }
}

/// Ordered transform list as found in a `transform` attribute.
#[derive(Debug, Clone, Default)]
pub struct TransformList(pub Vec<Transform>);

impl TransformList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, transform: Transform) {
        self.0.push(transform);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transform> {
        self.0.iter()
    }

    /// Folds the list into one matrix. The last operation in document order
    /// is applied to local coordinates first, as in `transform="a b"`.
    pub fn compose(&self) -> Matrix {
        self.0
            .iter()
            .fold(Matrix::identity(), |acc, t| acc.mul(t.matrix()))
    }

    pub fn write(&self) -> String {
        self.0
            .iter()
            .map(Transform::write)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn parse(text: &str) -> Result<Self, SvgError> {
        parse_transform_list(text)
    }
}

impl PartialEq for TransformList {
    fn eq(&self, other: &Self) -> bool {
        self.compose()
            .approx_eq(&other.compose(), TRANSFORM_TOLERANCE)
    }
}

impl fmt::Display for TransformList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.write())
    }
}

impl FromStr for TransformList {
    type Err = SvgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_transform_list(s)
    }
}

fn malformed(input: &str, reason: impl Into<String>) -> SvgError {
    SvgError::MalformedTransform {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn parse_args(input: &str, name: &str, args: &str) -> Result<Vec<f32>, SvgError> {
    args.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .map_err(|_| malformed(input, format!("{name}: '{s}' is not a number")))
        })
        .collect()
}

pub fn parse_transform_list(input: &str) -> Result<TransformList, SvgError> {
    let mut out = TransformList::new();
    let mut s = input.trim();

    while !s.is_empty() {
        let Some(open) = s.find('(') else {
            return Err(malformed(input, format!("expected '(' after '{}'", s.trim())));
        };
        let name = s[..open].trim();
        let Some(close) = s[open + 1..].find(')') else {
            return Err(malformed(input, format!("unterminated '{name}('")));
        };
        let args = parse_args(input, name, &s[open + 1..open + 1 + close])?;

        let transform = match name {
            "translate" => match args.as_slice() {
                [x] => Transform::Translate { x: *x, y: 0.0 },
                [x, y] => Transform::Translate { x: *x, y: *y },
                _ => {
                    return Err(malformed(
                        input,
                        "translate transforms must be in the format 'translate(x [,y])'",
                    ));
                }
            },
            "scale" => match args.as_slice() {
                [x] => Transform::Scale { x: *x, y: *x },
                [x, y] => Transform::Scale { x: *x, y: *y },
                _ => {
                    return Err(malformed(
                        input,
                        "scale transforms must be in the format 'scale(x [,y])'",
                    ));
                }
            },
            "rotate" => match args.as_slice() {
                [a] => Transform::Rotate {
                    angle: *a,
                    center: None,
                },
                [a, cx, cy] => Transform::Rotate {
                    angle: *a,
                    center: Some(Point::new(*cx, *cy)),
                },
                _ => {
                    return Err(malformed(
                        input,
                        "rotate transforms must be in the format 'rotate(angle [cx cy])'",
                    ));
                }
            },
            "matrix" => match args.as_slice() {
                [a, b, c, d, e, f] => Transform::Matrix(Matrix::new(*a, *b, *c, *d, *e, *f)),
                _ => {
                    return Err(malformed(
                        input,
                        "matrix transforms must be in the format 'matrix(a, b, c, d, e, f)'",
                    ));
                }
            },
            "shear" => match args.as_slice() {
                [x] => Transform::Shear { x: *x, y: 0.0 },
                [x, y] => Transform::Shear { x: *x, y: *y },
                _ => {
                    return Err(malformed(
                        input,
                        "shear transforms must be in the format 'shear(x [,y])'",
                    ));
                }
            },
            "skewX" => match args.as_slice() {
                [a] => Transform::Skew { ax: *a, ay: 0.0 },
                _ => return Err(malformed(input, "skewX takes exactly one angle")),
            },
            "skewY" => match args.as_slice() {
                [a] => Transform::Skew { ax: 0.0, ay: *a },
                _ => return Err(malformed(input, "skewY takes exactly one angle")),
            },
            other => return Err(malformed(input, format!("unknown transform '{other}'"))),
        };
        out.push(transform);

        s = s[open + 1 + close + 1..].trim_start_matches(|c: char| c.is_whitespace() || c == ',');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_named_transform() {
        let list = parse_transform_list(
            "translate(10) scale(2 3), rotate(45, 5, 5) skewX(10) skewY(20) shear(0.5) matrix(1 0 0 1 3 4)",
        )
        .expect("transform list");
        assert_eq!(list.0.len(), 7);
        assert!(matches!(list.0[0], Transform::Translate { y, .. } if y == 0.0));
        assert!(matches!(
            list.0[2],
            Transform::Rotate {
                center: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn argument_count_mismatch_is_malformed() {
        for bad in [
            "translate()",
            "rotate(1, 2)",
            "matrix(1 2 3)",
            "scale(1 2 3)",
            "skewX(1 2)",
            "translate(1",
            "bogus(1)",
            "scale(a)",
        ] {
            let err = parse_transform_list(bad).expect_err(bad);
            assert!(
                matches!(err, SvgError::MalformedTransform { ref reason, .. } if !reason.is_empty()),
                "{bad} should fail with a reason"
            );
        }
    }

    #[test]
    fn compose_applies_rightmost_first() {
        let list = parse_transform_list("translate(10, 0) scale(2)").expect("list");
        let (x, y) = list.compose().apply(1.0, 1.0);
        assert_eq!((x, y), (12.0, 2.0));
        assert!(TransformList::new().compose().is_identity());
    }

    #[test]
    fn equality_is_by_matrix() {
        let a = Transform::Scale { x: 2.0, y: 2.0 };
        let b = Transform::Matrix(Matrix::new(2.0, 0.0, 0.0, 2.005, 0.0, 0.0));
        assert_eq!(a, b);
        assert_ne!(a, Transform::Scale { x: 2.0, y: 2.1 });
    }

    #[test]
    fn single_argument_scale_is_written_compactly() {
        assert_eq!(Transform::Scale { x: 2.0, y: 2.0 }.write(), "scale(2)");
        assert_eq!(Transform::Scale { x: 2.0, y: 3.0 }.write(), "scale(2, 3)");
    }

    #[test]
    fn write_then_parse_round_trips_matrix() {
        let lists = [
            "translate(3.25, -4) rotate(30) scale(1.5, 0.5)",
            "rotate(12.5, 50, 50) skewX(15) skewY(-7)",
            "matrix(0.5 0.25 -0.25 0.5 10 20) shear(0.2, 0.1)",
            "scale(2) translate(-1.125)",
        ];
        for text in lists {
            let list = parse_transform_list(text).expect(text);
            let mut combined = list.clone();
            combined.push(Transform::Skew { ax: 10.0, ay: 5.0 });
            for candidate in [list, combined] {
                let reparsed = parse_transform_list(&candidate.write()).expect("reparse");
                assert!(
                    reparsed
                        .compose()
                        .approx_eq(&candidate.compose(), TRANSFORM_TOLERANCE),
                    "{} did not round-trip",
                    candidate
                );
            }
        }
    }
}
