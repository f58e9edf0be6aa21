use std::fmt;

use lightningcss::traits::Parse;
use lightningcss::values::color::{CssColor, SRGB};

use crate::attributes::{parse_number_or_percent, AttributeValue, LengthContext};
use crate::document::{Document, NodeId};
use crate::path::format_number;
use crate::registry::normalize_reference;
use crate::shapes::ElementKind;
use crate::surface::{Brush, GradientStop, SpreadMethod};
use crate::types::{Color, Matrix, Point, Rect};

/// Value of `fill`, `stroke` and the other paint properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    None,
    Color(Color),
    CurrentColor,
    /// `url(#id)` paint server with an optional fallback.
    Server {
        id: String,
        fallback: Option<Box<Paint>>,
    },
}

impl Paint {
    pub fn parse(input: &str) -> Option<Paint> {
        let v = input.trim();
        if v.is_empty() {
            return None;
        }
        if v.eq_ignore_ascii_case("none") {
            return Some(Paint::None);
        }
        if v.eq_ignore_ascii_case("currentcolor") {
            return Some(Paint::CurrentColor);
        }
        if v.len() >= 4 && v[..4].eq_ignore_ascii_case("url(") {
            let close = v.find(')')?;
            let id = normalize_reference(&v[..=close]);
            if id.is_empty() {
                return None;
            }
            let rest = v[close + 1..].trim();
            let fallback = if rest.is_empty() {
                None
            } else {
                Some(Box::new(Paint::parse(rest)?))
            };
            return Some(Paint::Server {
                id: id.to_string(),
                fallback,
            });
        }
        parse_color(v).map(Paint::Color)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Paint::None)
    }
}

impl fmt::Display for Paint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Paint::None => f.write_str("none"),
            Paint::CurrentColor => f.write_str("currentColor"),
            Paint::Color(c) => write_color(f, *c),
            Paint::Server { id, fallback } => {
                write!(f, "url(#{id})")?;
                if let Some(fallback) = fallback {
                    write!(f, " {fallback}")?;
                }
                Ok(())
            }
        }
    }
}

fn write_color(f: &mut fmt::Formatter<'_>, color: Color) -> fmt::Result {
    let [r, g, b, a] = color.to_rgba8();
    if a == 255 {
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    } else {
        write!(f, "rgba({r}, {g}, {b}, {})", format_number(color.a))
    }
}

/// Parses any CSS color lightningcss understands.
pub fn parse_color(input: &str) -> Option<Color> {
    let color = CssColor::parse_string(input.trim()).ok()?;
    css_color_to_color(&color)
}

fn css_color_to_color(color: &CssColor) -> Option<Color> {
    if let CssColor::RGBA(rgba) = color {
        let alpha = (rgba.alpha as f32 / 255.0).clamp(0.0, 1.0);
        return Some(Color::from_rgba8(rgba.red, rgba.green, rgba.blue, 255).with_opacity(alpha));
    }
    if let Ok(srgb) = SRGB::try_from(color) {
        let alpha = if srgb.alpha.is_finite() {
            srgb.alpha.clamp(0.0, 1.0)
        } else {
            1.0
        };
        return Some(Color::rgba(srgb.r, srgb.g, srgb.b, alpha));
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientUnits {
    ObjectBoundingBox,
    UserSpaceOnUse,
}

/// A gradient coordinate: a fraction when written as a percentage, else a
/// plain number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub value: f32,
    pub is_percent: bool,
}

impl Coord {
    const fn percent(value: f32) -> Coord {
        Coord {
            value,
            is_percent: true,
        }
    }

    fn parse(input: &str) -> Option<Coord> {
        let s = input.trim();
        if let Some(p) = s.strip_suffix('%') {
            let v = p.trim().parse::<f32>().ok()?;
            return Some(Coord::percent(v / 100.0));
        }
        let v = s.trim_end_matches("px").parse::<f32>().ok()?;
        Some(Coord {
            value: v,
            is_percent: false,
        })
    }

    fn resolve(self, units: GradientUnits, basis: f32) -> f32 {
        match (units, self.is_percent) {
            (GradientUnits::UserSpaceOnUse, true) => self.value * basis,
            _ => self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GradientShape {
    Linear {
        x1: Coord,
        y1: Coord,
        x2: Coord,
        y2: Coord,
    },
    Radial {
        cx: Coord,
        cy: Coord,
        r: Coord,
        fx: Option<Coord>,
        fy: Option<Coord>,
    },
}

/// A `linearGradient` or `radialGradient` with its `href` chain applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    pub shape: GradientShape,
    pub units: GradientUnits,
    pub transform: Matrix,
    pub spread: SpreadMethod,
    pub stops: Vec<GradientStop>,
}

const MAX_HREF_CHAIN: usize = 16;

impl Document {
    /// Resolves the gradient element at `node`. Attributes and stops missing
    /// on the element are taken from the element its `href` points to.
    pub fn gradient(&self, node: NodeId) -> Option<Gradient> {
        let kind = self.kind(node)?;
        if !matches!(
            kind,
            ElementKind::LinearGradient | ElementKind::RadialGradient
        ) {
            return None;
        }

        let mut chain = vec![node];
        let mut current = node;
        while chain.len() < MAX_HREF_CHAIN {
            let Some(next) = self.href_target(current) else {
                break;
            };
            if chain.contains(&next) {
                break;
            }
            if !matches!(
                self.kind(next),
                Some(ElementKind::LinearGradient | ElementKind::RadialGradient)
            ) {
                break;
            }
            chain.push(next);
            current = next;
        }

        let lookup = |name: &str| -> Option<String> {
            chain
                .iter()
                .find_map(|n| self.attribute(*n, name).map(AttributeValue::to_text))
        };
        let coord = |name: &str, default: Coord| -> Coord {
            lookup(name)
                .and_then(|raw| Coord::parse(&raw))
                .unwrap_or(default)
        };

        let units = match lookup("gradientUnits").as_deref().map(str::trim) {
            Some("userSpaceOnUse") => GradientUnits::UserSpaceOnUse,
            _ => GradientUnits::ObjectBoundingBox,
        };
        let spread = match lookup("spreadMethod").as_deref().map(str::trim) {
            Some("reflect") => SpreadMethod::Reflect,
            Some("repeat") => SpreadMethod::Repeat,
            _ => SpreadMethod::Pad,
        };
        let transform = chain
            .iter()
            .find_map(|n| match self.attribute(*n, "gradientTransform") {
                Some(AttributeValue::Transforms(list)) => Some(list.compose()),
                _ => None,
            })
            .unwrap_or_default();

        let shape = match kind {
            ElementKind::LinearGradient => GradientShape::Linear {
                x1: coord("x1", Coord::percent(0.0)),
                y1: coord("y1", Coord::percent(0.0)),
                x2: coord("x2", Coord::percent(1.0)),
                y2: coord("y2", Coord::percent(0.0)),
            },
            _ => GradientShape::Radial {
                cx: coord("cx", Coord::percent(0.5)),
                cy: coord("cy", Coord::percent(0.5)),
                r: coord("r", Coord::percent(0.5)),
                fx: lookup("fx").and_then(|raw| Coord::parse(&raw)),
                fy: lookup("fy").and_then(|raw| Coord::parse(&raw)),
            },
        };

        let stops = chain
            .iter()
            .map(|n| self.gradient_stops(*n))
            .find(|stops| !stops.is_empty())
            .unwrap_or_default();

        Some(Gradient {
            shape,
            units,
            transform,
            spread,
            stops,
        })
    }

    fn gradient_stops(&self, node: NodeId) -> Vec<GradientStop> {
        let mut stops: Vec<GradientStop> = Vec::new();
        let mut last = 0.0f32;
        for child in self.children(node) {
            if self.kind(*child) != Some(ElementKind::Stop) {
                continue;
            }
            let offset = self
                .attribute(*child, "offset")
                .map(|v| match v {
                    AttributeValue::Length(l) if l.unit == crate::attributes::Unit::Percent => {
                        l.value / 100.0
                    }
                    other => parse_number_or_percent(&other.to_text()).unwrap_or(0.0),
                })
                .unwrap_or(0.0)
                .clamp(0.0, 1.0)
                .max(last);
            last = offset;
            let color = match self.resolve_paint(*child, "stop-color") {
                Paint::Color(c) => c,
                _ => Color::BLACK,
            };
            let opacity = self.resolve_number(*child, "stop-opacity").clamp(0.0, 1.0);
            stops.push(GradientStop {
                offset,
                color: color.with_opacity(opacity),
            });
        }
        stops
    }

    /// Local target of an `href`/`xlink:href` attribute.
    pub fn href_target(&self, node: NodeId) -> Option<NodeId> {
        let href = self
            .attribute(node, "href")
            .or_else(|| self.attribute(node, "xlink:href"))?
            .to_text();
        let href = href.trim();
        if !href.starts_with('#') {
            return None;
        }
        self.get_element_by_id(href)
    }
}

impl Gradient {
    /// Brush for an element whose bounding box is `bbox`. Returns `None` when
    /// the gradient cannot paint (no stops, or an empty box for
    /// `objectBoundingBox` units).
    pub fn to_brush(&self, bbox: Option<Rect>, ctx: &LengthContext) -> Option<Brush> {
        match self.stops.as_slice() {
            [] => return None,
            [only] => return Some(Brush::Solid(only.color)),
            _ => {}
        }
        let base = match self.units {
            GradientUnits::ObjectBoundingBox => {
                let bbox = bbox.filter(|b| !b.is_empty())?;
                Matrix::translate(bbox.x, bbox.y).mul(Matrix::scale(bbox.width, bbox.height))
            }
            GradientUnits::UserSpaceOnUse => Matrix::identity(),
        };
        let transform = base.mul(self.transform);
        let (w, h) = (ctx.viewport_width, ctx.viewport_height);
        let diag = libm::sqrtf((w * w + h * h) / 2.0);

        let brush = match self.shape {
            GradientShape::Linear { x1, y1, x2, y2 } => Brush::LinearGradient {
                start: Point::new(x1.resolve(self.units, w), y1.resolve(self.units, h)),
                end: Point::new(x2.resolve(self.units, w), y2.resolve(self.units, h)),
                stops: self.stops.clone(),
                spread: self.spread,
                transform,
            },
            GradientShape::Radial { cx, cy, r, fx, fy } => {
                let center = Point::new(cx.resolve(self.units, w), cy.resolve(self.units, h));
                let focus = Point::new(
                    fx.map(|c| c.resolve(self.units, w)).unwrap_or(center.x),
                    fy.map(|c| c.resolve(self.units, h)).unwrap_or(center.y),
                );
                let radius = r.resolve(self.units, diag);
                if radius <= 0.0 {
                    let last = self.stops.last()?;
                    return Some(Brush::Solid(last.color));
                }
                Brush::RadialGradient {
                    center,
                    focus,
                    radius,
                    stops: self.stops.clone(),
                    spread: self.spread,
                    transform,
                }
            }
        };
        Some(brush)
    }
}
