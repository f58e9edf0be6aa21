use std::fmt;

use crate::error::SvgError;
use crate::paint::Paint;
use crate::path::{format_number, Path};
use crate::transform::TransformList;
use crate::types::Point;

pub const DPI: f32 = 96.0;
pub const DEFAULT_FONT_SIZE: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Px,
    Pt,
    Pc,
    Mm,
    Cm,
    In,
    Percent,
    Em,
    Ex,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Unit::None => "",
            Unit::Px => "px",
            Unit::Pt => "pt",
            Unit::Pc => "pc",
            Unit::Mm => "mm",
            Unit::Cm => "cm",
            Unit::In => "in",
            Unit::Percent => "%",
            Unit::Em => "em",
            Unit::Ex => "ex",
        }
    }
}

/// Which viewport dimension a percentage refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
    Other,
}

/// Inputs needed to turn relative units into user units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthContext {
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub font_size: f32,
}

impl Default for LengthContext {
    fn default() -> Self {
        Self {
            viewport_width: 100.0,
            viewport_height: 100.0,
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f32,
    pub unit: Unit,
}

impl Length {
    pub const ZERO: Length = Length {
        value: 0.0,
        unit: Unit::None,
    };

    pub fn new(value: f32, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn user(value: f32) -> Self {
        Self {
            value,
            unit: Unit::None,
        }
    }

    pub fn parse(input: &str) -> Option<Length> {
        let s = input.trim();
        if s.is_empty() {
            return None;
        }
        let split = s
            .char_indices()
            .find(|(i, c)| {
                !(c.is_ascii_digit()
                    || *c == '.'
                    || ((*c == '-' || *c == '+')
                        && (*i == 0 || matches!(s.as_bytes()[i - 1], b'e' | b'E')))
                    || ((*c == 'e' || *c == 'E')
                        && s[i + 1..]
                            .chars()
                            .next()
                            .is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')))
            })
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let value = s[..split].parse::<f32>().ok()?;
        let unit = match s[split..].trim().to_ascii_lowercase().as_str() {
            "" => Unit::None,
            "px" => Unit::Px,
            "pt" => Unit::Pt,
            "pc" => Unit::Pc,
            "mm" => Unit::Mm,
            "cm" => Unit::Cm,
            "in" => Unit::In,
            "%" => Unit::Percent,
            "em" => Unit::Em,
            "ex" => Unit::Ex,
            _ => return None,
        };
        Some(Length { value, unit })
    }

    pub fn to_user(&self, ctx: &LengthContext, axis: Axis) -> f32 {
        match self.unit {
            Unit::None | Unit::Px => self.value,
            Unit::Pt => self.value * DPI / 72.0,
            Unit::Pc => self.value * DPI / 6.0,
            Unit::Mm => self.value * DPI / 25.4,
            Unit::Cm => self.value * DPI / 2.54,
            Unit::In => self.value * DPI,
            Unit::Em => self.value * ctx.font_size,
            Unit::Ex => self.value * ctx.font_size / 2.0,
            Unit::Percent => {
                let basis = match axis {
                    Axis::Horizontal => ctx.viewport_width,
                    Axis::Vertical => ctx.viewport_height,
                    Axis::Other => libm::sqrtf(
                        (ctx.viewport_width * ctx.viewport_width
                            + ctx.viewport_height * ctx.viewport_height)
                            / 2.0,
                    ),
                };
                self.value / 100.0 * basis
            }
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", format_number(self.value), self.unit.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Paint,
    Number,
    Length,
    LengthList,
    Keyword,
}

/// A presentation property: how to parse it, whether it inherits and its
/// initial value.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDef {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub inherited: bool,
    pub default: &'static str,
}

const fn prop(
    name: &'static str,
    kind: PropertyKind,
    inherited: bool,
    default: &'static str,
) -> PropertyDef {
    PropertyDef {
        name,
        kind,
        inherited,
        default,
    }
}

pub static PROPERTIES: &[PropertyDef] = &[
    prop("fill", PropertyKind::Paint, true, "black"),
    prop("fill-opacity", PropertyKind::Number, true, "1"),
    prop("fill-rule", PropertyKind::Keyword, true, "nonzero"),
    prop("stroke", PropertyKind::Paint, true, "none"),
    prop("stroke-width", PropertyKind::Length, true, "1"),
    prop("stroke-opacity", PropertyKind::Number, true, "1"),
    prop("stroke-linecap", PropertyKind::Keyword, true, "butt"),
    prop("stroke-linejoin", PropertyKind::Keyword, true, "miter"),
    prop("stroke-miterlimit", PropertyKind::Number, true, "4"),
    prop("stroke-dasharray", PropertyKind::LengthList, true, "none"),
    prop("stroke-dashoffset", PropertyKind::Length, true, "0"),
    prop("visibility", PropertyKind::Keyword, true, "visible"),
    prop("shape-rendering", PropertyKind::Keyword, true, "auto"),
    prop("clip-rule", PropertyKind::Keyword, true, "nonzero"),
    prop("color", PropertyKind::Paint, true, "black"),
    prop("font-family", PropertyKind::Keyword, true, "serif"),
    prop("font-size", PropertyKind::Length, true, "16"),
    prop("font-style", PropertyKind::Keyword, true, "normal"),
    prop("font-weight", PropertyKind::Keyword, true, "normal"),
    prop("text-anchor", PropertyKind::Keyword, true, "start"),
    prop("opacity", PropertyKind::Number, false, "1"),
    prop("display", PropertyKind::Keyword, false, "inline"),
    prop("clip", PropertyKind::Keyword, false, "auto"),
    prop("clip-path", PropertyKind::Keyword, false, "none"),
    prop("filter", PropertyKind::Keyword, false, "none"),
    prop("stop-color", PropertyKind::Paint, false, "black"),
    prop("stop-opacity", PropertyKind::Number, false, "1"),
    prop("flood-color", PropertyKind::Paint, false, "black"),
    prop("flood-opacity", PropertyKind::Number, false, "1"),
];

pub fn property_def(name: &str) -> Option<&'static PropertyDef> {
    PROPERTIES.iter().find(|p| p.name == name)
}

pub fn is_inherited(name: &str) -> bool {
    property_def(name).is_some_and(|p| p.inherited)
}

/// Geometry attributes stored as lengths regardless of element kind.
const LENGTH_ATTRIBUTES: &[&str] = &[
    "x", "y", "width", "height", "cx", "cy", "r", "rx", "ry", "x1", "y1", "x2", "y2", "fx", "fy",
    "dx", "dy", "offset",
];

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Number(f32),
    Length(Length),
    LengthList(Vec<Length>),
    Paint(Paint),
    Points(Vec<Point>),
    Path(Path),
    Transforms(TransformList),
    Inherit,
}

impl AttributeValue {
    /// Parses raw attribute text into the typed form its name calls for.
    /// Values that do not parse are kept as text and ignored by consumers.
    pub fn parse(name: &str, raw: &str) -> Result<AttributeValue, SvgError> {
        let trimmed = raw.trim();
        if trimmed == "inherit" {
            return Ok(AttributeValue::Inherit);
        }
        match name {
            "transform" | "gradientTransform" => {
                return TransformList::parse(trimmed).map(AttributeValue::Transforms);
            }
            "d" => return Ok(AttributeValue::Path(Path::parse_lenient(trimmed))),
            "points" => return Ok(AttributeValue::Points(parse_points(trimmed))),
            _ => {}
        }
        if LENGTH_ATTRIBUTES.contains(&name) {
            return Ok(Length::parse(trimmed)
                .map(AttributeValue::Length)
                .unwrap_or_else(|| AttributeValue::Text(raw.to_string())));
        }
        let Some(def) = property_def(name) else {
            return Ok(AttributeValue::Text(raw.to_string()));
        };
        let parsed = match def.kind {
            PropertyKind::Paint => Paint::parse(trimmed).map(AttributeValue::Paint),
            PropertyKind::Number => parse_number_or_percent(trimmed).map(AttributeValue::Number),
            PropertyKind::Length => Length::parse(trimmed).map(AttributeValue::Length),
            PropertyKind::LengthList => parse_length_list(trimmed).map(AttributeValue::LengthList),
            PropertyKind::Keyword => Some(AttributeValue::Text(trimmed.to_string())),
        };
        Ok(parsed.unwrap_or_else(|| AttributeValue::Text(raw.to_string())))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f32> {
        match self {
            AttributeValue::Number(v) => Some(*v),
            AttributeValue::Length(l) if matches!(l.unit, Unit::None | Unit::Px) => Some(l.value),
            AttributeValue::Text(s) => s.trim().parse::<f32>().ok(),
            _ => None,
        }
    }

    pub fn as_length(&self) -> Option<Length> {
        match self {
            AttributeValue::Length(l) => Some(*l),
            AttributeValue::Number(v) => Some(Length::user(*v)),
            AttributeValue::Text(s) => Length::parse(s),
            _ => None,
        }
    }

    pub fn as_paint(&self) -> Option<&Paint> {
        match self {
            AttributeValue::Paint(p) => Some(p),
            _ => None,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Number(v) => format_number(*v),
            AttributeValue::Length(l) => l.to_string(),
            AttributeValue::LengthList(list) => {
                if list.is_empty() {
                    "none".to_string()
                } else {
                    list.iter()
                        .map(|l| l.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                }
            }
            AttributeValue::Paint(p) => p.to_string(),
            AttributeValue::Points(points) => points
                .iter()
                .map(|p| format!("{},{}", format_number(p.x), format_number(p.y)))
                .collect::<Vec<_>>()
                .join(" "),
            AttributeValue::Path(path) => path.write(),
            AttributeValue::Transforms(list) => list.write(),
            AttributeValue::Inherit => "inherit".to_string(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

pub(crate) fn parse_number_or_percent(input: &str) -> Option<f32> {
    let s = input.trim();
    if let Some(pct) = s.strip_suffix('%') {
        return pct.trim().parse::<f32>().ok().map(|v| v / 100.0);
    }
    s.parse::<f32>().ok()
}

pub(crate) fn parse_number_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect()
}

/// `none` yields an empty list; any unparsable entry invalidates the list.
fn parse_length_list(input: &str) -> Option<Vec<Length>> {
    if input.eq_ignore_ascii_case("none") {
        return Some(Vec::new());
    }
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(Length::parse)
        .collect()
}

fn parse_points(input: &str) -> Vec<Point> {
    let nums = parse_number_list(input);
    nums.chunks_exact(2)
        .map(|pair| Point::new(pair[0], pair[1]))
        .collect()
}

/// Ordered attribute mapping. Keys are unique; insertion order is kept for
/// serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces an existing value in place; returns the previous value.
    pub fn set(&mut self, name: &str, value: AttributeValue) -> Option<AttributeValue> {
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| key == name) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((name.to_string(), value));
        None
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        let idx = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    #[test]
    fn lengths_convert_at_96_dpi() {
        let ctx = LengthContext::default();
        let inch = Length::parse("1in").expect("in");
        assert_eq!(inch.to_user(&ctx, Axis::Other), 96.0);
        let pt = Length::parse("72pt").expect("pt");
        assert!((pt.to_user(&ctx, Axis::Other) - 96.0).abs() < 1e-3);
        let mm = Length::parse("25.4mm").expect("mm");
        assert!((mm.to_user(&ctx, Axis::Other) - 96.0).abs() < 1e-3);
        let em = Length::parse("2em").expect("em");
        assert_eq!(em.to_user(&ctx, Axis::Other), 32.0);
        assert_eq!(Length::parse("-1.5e1").map(|l| l.value), Some(-15.0));
        assert!(Length::parse("12furlongs").is_none());
    }

    #[test]
    fn percentages_follow_axis() {
        let ctx = LengthContext {
            viewport_width: 200.0,
            viewport_height: 50.0,
            font_size: 16.0,
        };
        let half = Length::parse("50%").expect("pct");
        assert_eq!(half.to_user(&ctx, Axis::Horizontal), 100.0);
        assert_eq!(half.to_user(&ctx, Axis::Vertical), 25.0);
    }

    #[test]
    fn values_parse_by_property_kind() {
        assert_eq!(
            AttributeValue::parse("fill", "red").expect("fill"),
            AttributeValue::Paint(Paint::Color(Color::rgb(1.0, 0.0, 0.0)))
        );
        assert_eq!(
            AttributeValue::parse("fill-opacity", "50%").expect("opacity"),
            AttributeValue::Number(0.5)
        );
        assert_eq!(
            AttributeValue::parse("stroke", "inherit").expect("inherit"),
            AttributeValue::Inherit
        );
        assert_eq!(
            AttributeValue::parse("stroke-dasharray", "none").expect("dash"),
            AttributeValue::LengthList(Vec::new())
        );
        assert!(matches!(
            AttributeValue::parse("r", "5").expect("r"),
            AttributeValue::Length(Length { value, .. }) if value == 5.0
        ));
        assert!(AttributeValue::parse("transform", "rotate(1, 2)").is_err());
    }

    #[test]
    fn store_keeps_insertion_order_and_unique_keys() {
        let mut store = AttributeStore::new();
        store.set("b", AttributeValue::Text("1".into()));
        store.set("a", AttributeValue::Text("2".into()));
        let previous = store.set("b", AttributeValue::Text("3".into()));
        assert_eq!(previous, Some(AttributeValue::Text("1".into())));
        let keys: Vec<&str> = store.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(store.remove("b"), Some(AttributeValue::Text("3".into())));
        assert_eq!(store.len(), 1);
    }
}
