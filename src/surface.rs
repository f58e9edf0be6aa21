//! Paint backend capability consumed by the renderer.

use crate::error::SvgError;
use crate::path::Path;
use crate::types::{Color, Matrix, Point, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

impl FillRule {
    pub fn from_keyword(value: &str) -> FillRule {
        match value.trim() {
            "evenodd" => FillRule::EvenOdd,
            _ => FillRule::NonZero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

impl LineCap {
    pub fn from_keyword(value: &str) -> LineCap {
        match value.trim() {
            "round" => LineCap::Round,
            "square" => LineCap::Square,
            _ => LineCap::Butt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

impl LineJoin {
    pub fn from_keyword(value: &str) -> LineJoin {
        match value.trim() {
            "round" => LineJoin::Round,
            "bevel" => LineJoin::Bevel,
            _ => LineJoin::Miter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpreadMethod {
    #[default]
    Pad,
    Reflect,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Color,
}

/// Fill source. Gradient geometry is expressed in the coordinate system
/// produced by `transform`, which maps into the path's user space.
#[derive(Debug, Clone, PartialEq)]
pub enum Brush {
    Solid(Color),
    LinearGradient {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
        spread: SpreadMethod,
        transform: Matrix,
    },
    RadialGradient {
        center: Point,
        focus: Point,
        radius: f32,
        stops: Vec<GradientStop>,
        spread: SpreadMethod,
        transform: Matrix,
    },
}

impl Brush {
    pub fn with_opacity(self, opacity: f32) -> Brush {
        let fade = |stops: Vec<GradientStop>| {
            stops
                .into_iter()
                .map(|s| GradientStop {
                    offset: s.offset,
                    color: s.color.with_opacity(opacity),
                })
                .collect()
        };
        match self {
            Brush::Solid(c) => Brush::Solid(c.with_opacity(opacity)),
            Brush::LinearGradient {
                start,
                end,
                stops,
                spread,
                transform,
            } => Brush::LinearGradient {
                start,
                end,
                stops: fade(stops),
                spread,
                transform,
            },
            Brush::RadialGradient {
                center,
                focus,
                radius,
                stops,
                spread,
                transform,
            } => Brush::RadialGradient {
                center,
                focus,
                radius,
                stops: fade(stops),
                spread,
                transform,
            },
        }
    }

    pub fn solid_color(&self) -> Option<Color> {
        match self {
            Brush::Solid(c) => Some(*c),
            _ => None,
        }
    }
}

/// Dash lengths and offset in multiples of the pen width.
#[derive(Debug, Clone, PartialEq)]
pub struct DashPattern {
    pub array: Vec<f32>,
    pub offset: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pen {
    pub brush: Brush,
    pub width: f32,
    pub cap: LineCap,
    pub join: LineJoin,
    pub miter_limit: f32,
    pub dash: Option<DashPattern>,
}

impl Pen {
    pub fn new(brush: Brush, width: f32) -> Pen {
        Pen {
            brush,
            width,
            cap: LineCap::Butt,
            join: LineJoin::Miter,
            miter_limit: 4.0,
            dash: None,
        }
    }
}

/// Union of paths, each with its own fill rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClipArea {
    pub parts: Vec<(Path, FillRule)>,
}

impl ClipArea {
    pub fn bounds(&self) -> Option<Rect> {
        self.parts
            .iter()
            .filter_map(|(path, _)| path.bounds())
            .reduce(|a, b| a.union(&b))
    }
}

/// Intersection of clip areas in device space. No areas means unclipped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClipRegion {
    areas: Vec<ClipArea>,
}

impl ClipRegion {
    pub fn infinite() -> ClipRegion {
        ClipRegion::default()
    }

    pub fn from_rect(rect: Rect) -> ClipRegion {
        let mut path = Path::new();
        path.add_rect(rect);
        ClipRegion::from_path(path, FillRule::NonZero)
    }

    pub fn from_path(path: Path, rule: FillRule) -> ClipRegion {
        ClipRegion::from_area(ClipArea {
            parts: vec![(path, rule)],
        })
    }

    pub fn from_area(area: ClipArea) -> ClipRegion {
        ClipRegion { areas: vec![area] }
    }

    pub fn is_infinite(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn areas(&self) -> &[ClipArea] {
        &self.areas
    }

    pub fn intersect(&self, other: &ClipRegion) -> ClipRegion {
        let mut areas = self.areas.clone();
        areas.extend(other.areas.iter().cloned());
        ClipRegion { areas }
    }

    /// Bounding box of the clipped area; `None` when unclipped.
    pub fn bounds(&self) -> Option<Rect> {
        let mut out: Option<Rect> = None;
        for area in &self.areas {
            let b = area.bounds().unwrap_or(Rect::EMPTY);
            out = Some(match out {
                None => b,
                Some(acc) => acc.intersect(&b).unwrap_or(Rect::EMPTY),
            });
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    Replace,
    Intersect,
}

/// Drawing target. Paths are given in user space and mapped through the
/// current transform; clip regions are in device space.
pub trait Surface {
    fn size(&self) -> (u32, u32);

    fn transform(&self) -> Matrix;

    fn set_transform(&mut self, transform: Matrix);

    fn clip(&self) -> ClipRegion;

    fn set_clip(&mut self, region: &ClipRegion, mode: CombineMode);

    fn smoothing(&self) -> bool;

    fn set_smoothing(&mut self, enabled: bool);

    fn fill_path(&mut self, brush: &Brush, path: &Path, rule: FillRule) -> Result<(), SvgError>;

    fn stroke_path(&mut self, pen: &Pen, path: &Path) -> Result<(), SvgError>;

    /// Composites a premultiplied pixmap at device position `(x, y)`,
    /// ignoring the current transform.
    fn draw_pixmap(&mut self, pixmap: &tiny_skia::Pixmap, x: i32, y: i32)
    -> Result<(), SvgError>;

    /// Draws `image` scaled into `dest`, in user space.
    fn draw_image(&mut self, image: &tiny_skia::Pixmap, dest: Rect) -> Result<(), SvgError>;
}
