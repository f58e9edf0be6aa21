//! Tree walk that paints a [`Document`] onto a [`Surface`].
//!
//! Each element goes through the same nested steps: push its transform,
//! optionally divert through its filter, set its clip, paint (fill and
//! stroke, or the children), then restore clip and transform. Failures in
//! one element are recorded in the [`RenderReport`] and never abort the
//! document.

use std::fmt;

use rayon::prelude::*;
use tiny_skia::Pixmap;

use crate::attributes::{AttributeValue, Axis, Length, LengthContext, Unit};
use crate::document::{Document, NodeId};
use crate::error::SvgError;
use crate::loader;
use crate::paint::Paint;
use crate::path::Path;
use crate::raster::{decode_image, parse_data_uri, RasterSurface};
use crate::shapes::{ElementKind, Geometry, GeometryMode};
use crate::surface::{
    Brush, ClipArea, ClipRegion, CombineMode, DashPattern, FillRule, LineCap, LineJoin, Pen,
    Surface,
};
use crate::types::{Color, Matrix, Rect};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Fill applied to raster targets before painting.
    pub background: Option<Color>,
    /// Global switch; when off no element is anti-aliased.
    pub anti_alias: bool,
    /// Nesting limit for `use` references.
    pub max_use_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            background: None,
            anti_alias: true,
            max_use_depth: 16,
        }
    }
}

/// A feature that was skipped while rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderWarning {
    MissingReference {
        node: NodeId,
        property: String,
        reference: String,
    },
    FilterFailed {
        node: NodeId,
        message: String,
    },
    InvalidClipRect {
        node: NodeId,
        value: String,
    },
    ElementFailed {
        node: NodeId,
        message: String,
    },
    ImageUnavailable {
        node: NodeId,
        message: String,
    },
    UseDepthExceeded {
        node: NodeId,
    },
}

impl RenderWarning {
    pub fn node(&self) -> NodeId {
        match self {
            RenderWarning::MissingReference { node, .. }
            | RenderWarning::FilterFailed { node, .. }
            | RenderWarning::InvalidClipRect { node, .. }
            | RenderWarning::ElementFailed { node, .. }
            | RenderWarning::ImageUnavailable { node, .. }
            | RenderWarning::UseDepthExceeded { node } => *node,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RenderWarning::MissingReference { .. } => "missing_reference",
            RenderWarning::FilterFailed { .. } => "filter_failed",
            RenderWarning::InvalidClipRect { .. } => "invalid_clip_rect",
            RenderWarning::ElementFailed { .. } => "element_failed",
            RenderWarning::ImageUnavailable { .. } => "image_unavailable",
            RenderWarning::UseDepthExceeded { .. } => "use_depth_exceeded",
        }
    }
}

impl fmt::Display for RenderWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderWarning::MissingReference {
                property,
                reference,
                ..
            } => write!(f, "{property} references missing element '{reference}'"),
            RenderWarning::FilterFailed { message, .. } => {
                write!(f, "filter failed, rendered unfiltered: {message}")
            }
            RenderWarning::InvalidClipRect { value, .. } => write!(f, "invalid clip '{value}'"),
            RenderWarning::ElementFailed { message, .. } => write!(f, "element failed: {message}"),
            RenderWarning::ImageUnavailable { message, .. } => {
                write!(f, "image unavailable: {message}")
            }
            RenderWarning::UseDepthExceeded { .. } => write!(f, "use nesting too deep"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    pub warnings: Vec<RenderWarning>,
    /// Leaf elements that produced at least one drawing call.
    pub painted: usize,
}

impl RenderReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Opinionated default: "meet" and centered.
fn viewbox_to_viewport_matrix(view_box: Option<Rect>, w: f32, h: f32) -> Matrix {
    let Some(vb) = view_box else {
        return Matrix::identity();
    };
    let sx = if vb.width > 0.0 { w / vb.width } else { 1.0 };
    let sy = if vb.height > 0.0 { h / vb.height } else { 1.0 };
    let s = sx.min(sy);
    let tx = (w - vb.width * s) * 0.5 - vb.x * s;
    let ty = (h - vb.height * s) * 0.5 - vb.y * s;
    Matrix::translate(tx, ty).mul(Matrix::scale(s, s))
}

/// `shape-rendering` values other than `auto` turn anti-aliasing off.
fn requires_smooth_rendering(shape_rendering: &str) -> bool {
    !matches!(
        shape_rendering,
        "optimizeSpeed" | "crispEdges" | "geometricPrecision"
    )
}

/// Dash lengths and offset in multiples of the stroke width. Non-positive
/// entries count as 1, odd arrays repeat once, and round caps lengthen dashes
/// and shorten gaps by one width.
pub fn dash_pattern(
    dashes: &[f32],
    offset: f32,
    stroke_width: f32,
    cap: LineCap,
) -> Option<DashPattern> {
    if dashes.is_empty() {
        return None;
    }
    let width = if stroke_width <= 0.0 { 1.0 } else { stroke_width };
    let mut values = dashes.to_vec();
    if values.len() % 2 != 0 {
        values.extend_from_slice(dashes);
    }
    let mut array: Vec<f32> = values
        .into_iter()
        .map(|v| (if v <= 0.0 { 1.0 } else { v }) / width)
        .collect();
    if cap == LineCap::Round {
        let mut adjust = 1.0;
        for v in &mut array {
            *v += adjust;
            adjust = -adjust;
        }
    }
    let offset = if offset == 0.0 {
        0.0
    } else {
        (if offset <= 0.0 { 1.0 } else { offset }) / width
    };
    Some(DashPattern { array, offset })
}

/// `rect(top, right, bottom, left)` against `bounds`. Right and bottom are
/// measured from the left and top edges; `auto` keeps the edge.
fn parse_clip_rect(value: &str, bounds: Rect) -> Option<Rect> {
    let inner = value.trim().strip_prefix("rect(")?.strip_suffix(')')?;
    let parts: Vec<&str> = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    let [top, right, bottom, left] = parts.as_slice() else {
        return None;
    };
    let top = clip_offset(top)?;
    let right = clip_offset(right)?;
    let bottom = clip_offset(bottom)?;
    let left = clip_offset(left)?;

    let x0 = bounds.x + left.unwrap_or(0.0);
    let y0 = bounds.y + top.unwrap_or(0.0);
    let x1 = right.map(|r| bounds.x + r).unwrap_or(bounds.right());
    let y1 = bottom.map(|b| bounds.y + b).unwrap_or(bounds.bottom());
    Some(Rect::from_ltrb(x0, y0, x1.max(x0), y1.max(y0)))
}

fn clip_offset(raw: &str) -> Option<Option<f32>> {
    if raw.eq_ignore_ascii_case("auto") {
        return Some(None);
    }
    let length = Length::parse(raw)?;
    Some(Some(length.to_user(&LengthContext::default(), Axis::Other)))
}

pub struct Renderer<'a> {
    doc: &'a Document,
    options: RenderOptions,
    report: RenderReport,
    use_depth: usize,
}

impl<'a> Renderer<'a> {
    pub fn new(doc: &'a Document, options: RenderOptions) -> Self {
        Self {
            doc,
            options,
            report: RenderReport::default(),
            use_depth: 0,
        }
    }

    pub fn report(&self) -> &RenderReport {
        &self.report
    }

    pub fn finish(self) -> RenderReport {
        if let Some(logger) = self.doc.logger() {
            logger.increment("svg.render.painted", self.report.painted as u64);
        }
        self.report
    }

    fn warn(&mut self, warning: RenderWarning) {
        if let Some(logger) = self.doc.logger() {
            let node = warning.node().raw().to_string();
            let detail = warning.to_string();
            logger.log_event(
                "svg.render_warning",
                &[
                    ("kind", warning.kind()),
                    ("node", node.as_str()),
                    ("detail", detail.as_str()),
                ],
            );
            logger.increment(&format!("svg.render.{}", warning.kind()), 1);
        }
        self.report.warnings.push(warning);
    }

    /// Renders `node` and its subtree. With `skip_filter` set the element's
    /// filter is ignored; the filter pass uses this to draw its source.
    /// Returns whether anything was painted.
    pub fn render_node(
        &mut self,
        surface: &mut dyn Surface,
        node: NodeId,
        skip_filter: bool,
    ) -> Result<bool, SvgError> {
        let doc = self.doc;
        let Some(kind) = doc.kind(node) else {
            return Ok(false);
        };
        let drawable = kind.is_renderable()
            || kind.is_container()
            || matches!(kind, ElementKind::Use | ElementKind::Image)
            || (kind == ElementKind::Symbol && self.use_depth > 0);
        if !drawable || !doc.is_visible(node) || !doc.is_displayable(node) {
            return Ok(false);
        }
        let local = self.local_matrix(&*surface, node, kind);
        if !local.is_invertible() {
            return Ok(false);
        }
        let shape = match kind.geometry() {
            Some(geometry) => match doc.path(node, GeometryMode::Paint) {
                Some(path) if !path.is_empty() => Some((geometry, path)),
                _ => return Ok(false),
            },
            None => None,
        };

        let parent = surface.transform();
        let current = parent.mul(local);
        if !skip_filter {
            if let Some(filter) = self.filter_reference(node) {
                match self.render_filtered(surface, node, filter, current.scale_factor()) {
                    Ok(()) => return Ok(true),
                    Err(err) => self.warn(RenderWarning::FilterFailed {
                        node,
                        message: err.to_string(),
                    }),
                }
            }
        }

        surface.set_transform(current);
        let result = self.render_clipped(surface, node, kind, shape);
        surface.set_transform(parent);
        result
    }

    fn local_matrix(&self, surface: &dyn Surface, node: NodeId, kind: ElementKind) -> Matrix {
        let doc = self.doc;
        let mut m = doc
            .element(node)
            .map(|el| el.transforms().compose())
            .unwrap_or_default();
        let len = |name: &str, axis: Axis, default: f32| {
            doc.length_attribute(node, name, axis, default)
        };
        match kind {
            ElementKind::Svg if node == doc.root() => {
                let (w, h) = surface.size();
                let view_box = doc.view_box(node).or_else(|| {
                    let sized = doc.has_attribute(node, "width") && doc.has_attribute(node, "height");
                    sized.then(|| {
                        let (vw, vh) = doc.viewport_size(node);
                        Rect::new(0.0, 0.0, vw, vh)
                    })
                });
                m = m.mul(viewbox_to_viewport_matrix(view_box, w as f32, h as f32));
            }
            ElementKind::Svg => {
                m = m.mul(Matrix::translate(
                    len("x", Axis::Horizontal, 0.0),
                    len("y", Axis::Vertical, 0.0),
                ));
                if let Some(vb) = doc.view_box(node) {
                    let w = len("width", Axis::Horizontal, vb.width);
                    let h = len("height", Axis::Vertical, vb.height);
                    m = m.mul(viewbox_to_viewport_matrix(Some(vb), w, h));
                }
            }
            ElementKind::Use => {
                m = m.mul(Matrix::translate(
                    len("x", Axis::Horizontal, 0.0),
                    len("y", Axis::Vertical, 0.0),
                ));
            }
            _ => {}
        }
        m
    }

    fn filter_reference(&mut self, node: NodeId) -> Option<NodeId> {
        let doc = self.doc;
        let reference = doc.resolve_keyword(node, "filter");
        if reference.is_empty() || reference == "none" {
            return None;
        }
        let target = doc
            .get_element_by_id(&reference)
            .filter(|n| doc.kind(*n) == Some(ElementKind::Filter));
        if target.is_none() {
            self.warn(RenderWarning::MissingReference {
                node,
                property: "filter".to_string(),
                reference,
            });
        }
        target
    }

    /// Draws `node` unfiltered into an offscreen raster at the parent
    /// transform, runs the filter over it and composites the result.
    fn render_filtered(
        &mut self,
        surface: &mut dyn Surface,
        node: NodeId,
        filter: NodeId,
        scale: f32,
    ) -> Result<(), SvgError> {
        let program = self.doc.filter_program(filter, scale)?;
        let (w, h) = surface.size();
        let mut offscreen = RasterSurface::new(w, h)?;
        offscreen.set_transform(surface.transform());
        offscreen.set_smoothing(surface.smoothing());
        // A failed run is followed by an unfiltered render, which reports
        // the element again.
        let snapshot = self.report.clone();
        let filtered = self
            .render_node(&mut offscreen, node, true)
            .and_then(|_| program.apply(offscreen.into_pixmap()));
        match filtered {
            Ok(filtered) => surface.draw_pixmap(&filtered, 0, 0),
            Err(err) => {
                self.report = snapshot;
                Err(err)
            }
        }
    }

    fn render_clipped(
        &mut self,
        surface: &mut dyn Surface,
        node: NodeId,
        kind: ElementKind,
        shape: Option<(&'static dyn Geometry, Path)>,
    ) -> Result<bool, SvgError> {
        let previous = match self.clip_region(&*surface, node) {
            Some(region) => {
                let previous = surface.clip();
                surface.set_clip(&region, CombineMode::Intersect);
                Some(previous)
            }
            None => None,
        };
        let result = self.paint(surface, node, kind, shape);
        if let Some(previous) = previous {
            surface.set_clip(&previous, CombineMode::Replace);
        }
        result
    }

    /// Device-space clip from `clip-path` and `clip: rect(..)`, intersected.
    fn clip_region(&mut self, surface: &dyn Surface, node: NodeId) -> Option<ClipRegion> {
        let doc = self.doc;
        let device = surface.transform();
        let mut region: Option<ClipRegion> = None;

        let reference = doc.resolve_keyword(node, "clip-path");
        if !reference.is_empty() && reference != "none" {
            let clip_path = doc
                .get_element_by_id(&reference)
                .filter(|n| doc.kind(*n) == Some(ElementKind::ClipPath));
            match clip_path {
                Some(clip_path) => {
                    region = Some(ClipRegion::from_area(
                        self.clip_area(clip_path, node, device),
                    ));
                }
                None => self.warn(RenderWarning::MissingReference {
                    node,
                    property: "clip-path".to_string(),
                    reference,
                }),
            }
        }

        let clip = doc.resolve_keyword(node, "clip");
        if clip.starts_with("rect(") {
            match parse_clip_rect(&clip, doc.local_bounds(node)) {
                Some(rect) => {
                    let mut path = Path::new();
                    path.add_rect(rect);
                    let rect_region =
                        ClipRegion::from_path(path.transform(&device), FillRule::NonZero);
                    region = Some(match region {
                        Some(existing) => existing.intersect(&rect_region),
                        None => rect_region,
                    });
                }
                None => self.warn(RenderWarning::InvalidClipRect { node, value: clip }),
            }
        }
        region
    }

    fn clip_area(&self, clip_path: NodeId, target: NodeId, device: Matrix) -> ClipArea {
        let doc = self.doc;
        let mut matrix = device;
        let units = doc
            .attribute(clip_path, "clipPathUnits")
            .map(AttributeValue::to_text);
        if units.as_deref().map(str::trim) == Some("objectBoundingBox") {
            let bbox = doc
                .path(target, GeometryMode::Paint)
                .and_then(|p| p.bounds())
                .unwrap_or_else(|| doc.local_bounds(target));
            matrix = matrix
                .mul(Matrix::translate(bbox.x, bbox.y))
                .mul(Matrix::scale(bbox.width, bbox.height));
        }
        if let Some(el) = doc.element(clip_path) {
            matrix = matrix.mul(el.transforms().compose());
        }
        let mut area = ClipArea::default();
        for child in doc.children(clip_path) {
            self.collect_clip_parts(*child, matrix, 0, &mut area);
        }
        area
    }

    fn collect_clip_parts(&self, node: NodeId, matrix: Matrix, depth: usize, area: &mut ClipArea) {
        let doc = self.doc;
        let Some(el) = doc.element(node) else {
            return;
        };
        if depth > self.options.max_use_depth || !doc.is_displayable(node) || !doc.is_visible(node)
        {
            return;
        }
        let matrix = matrix.mul(el.transforms().compose());
        match el.kind() {
            kind if kind.is_renderable() => {
                if let Some(path) = doc.path(node, GeometryMode::Paint) {
                    let rule = FillRule::from_keyword(&doc.resolve_keyword(node, "clip-rule"));
                    area.parts.push((path.transform(&matrix), rule));
                }
            }
            ElementKind::Use => {
                if let Some(target) = doc.href_target(node) {
                    let offset = Matrix::translate(
                        doc.length_attribute(node, "x", Axis::Horizontal, 0.0),
                        doc.length_attribute(node, "y", Axis::Vertical, 0.0),
                    );
                    self.collect_clip_parts(target, matrix.mul(offset), depth + 1, area);
                }
            }
            kind if kind.is_container() => {
                for child in doc.children(node) {
                    self.collect_clip_parts(*child, matrix, depth + 1, area);
                }
            }
            _ => {}
        }
    }

    fn paint(
        &mut self,
        surface: &mut dyn Surface,
        node: NodeId,
        kind: ElementKind,
        shape: Option<(&'static dyn Geometry, Path)>,
    ) -> Result<bool, SvgError> {
        let leaf = shape.is_some() || kind == ElementKind::Image;
        if !leaf {
            return match kind {
                ElementKind::Use => self.render_use(surface, node),
                _ => self.render_children(surface, node),
            };
        }

        let smooth = self.options.anti_alias
            && requires_smooth_rendering(&self.doc.resolve_keyword(node, "shape-rendering"));
        let previous = surface.smoothing();
        if previous != smooth {
            surface.set_smoothing(smooth);
        }
        let result = match shape {
            Some((geometry, path)) => self.paint_shape(surface, node, geometry, &path),
            None => self.paint_image(surface, node),
        };
        if previous != smooth {
            surface.set_smoothing(previous);
        }
        if matches!(result, Ok(true)) {
            self.report.painted += 1;
        }
        result
    }

    fn render_children(&mut self, surface: &mut dyn Surface, node: NodeId) -> Result<bool, SvgError> {
        let doc = self.doc;
        let mut painted = false;
        for &child in doc.children(node) {
            match self.render_node(surface, child, false) {
                Ok(drawn) => painted |= drawn,
                Err(err) => self.warn(RenderWarning::ElementFailed {
                    node: child,
                    message: err.to_string(),
                }),
            }
        }
        Ok(painted)
    }

    fn render_use(&mut self, surface: &mut dyn Surface, node: NodeId) -> Result<bool, SvgError> {
        let Some(target) = self.doc.href_target(node) else {
            let reference = self
                .doc
                .attribute(node, "href")
                .or_else(|| self.doc.attribute(node, "xlink:href"))
                .map(AttributeValue::to_text)
                .unwrap_or_default();
            self.warn(RenderWarning::MissingReference {
                node,
                property: "href".to_string(),
                reference,
            });
            return Ok(false);
        };
        if self.use_depth >= self.options.max_use_depth {
            self.warn(RenderWarning::UseDepthExceeded { node });
            return Ok(false);
        }
        self.use_depth += 1;
        let result = match self.doc.kind(target) {
            Some(ElementKind::Symbol) => self.render_children(surface, target),
            _ => self.render_node(surface, target, false),
        };
        self.use_depth -= 1;
        result
    }

    fn paint_shape(
        &mut self,
        surface: &mut dyn Surface,
        node: NodeId,
        geometry: &dyn Geometry,
        path: &Path,
    ) -> Result<bool, SvgError> {
        let filled = if geometry.fillable() {
            self.fill(surface, node, path)?
        } else {
            false
        };
        let stroked = self.stroke(surface, node, path)?;
        Ok(filled || stroked)
    }

    fn opacity(&self, node: NodeId, property: &str) -> f32 {
        let doc = self.doc;
        (doc.resolve_number(node, property) * doc.resolve_number(node, "opacity")).clamp(0.0, 1.0)
    }

    fn brush(&mut self, node: NodeId, paint: &Paint, opacity: f32, property: &str) -> Option<Brush> {
        let doc = self.doc;
        match paint {
            Paint::None | Paint::CurrentColor => None,
            Paint::Color(color) => Some(Brush::Solid(*color).with_opacity(opacity)),
            Paint::Server { id, fallback } => {
                let gradient = doc.get_element_by_id(id).and_then(|n| doc.gradient(n));
                match gradient {
                    Some(gradient) => {
                        let bbox = doc
                            .path(node, GeometryMode::Paint)
                            .and_then(|p| p.bounds());
                        gradient
                            .to_brush(bbox, &doc.length_context(node))
                            .map(|b| b.with_opacity(opacity))
                    }
                    None => {
                        self.warn(RenderWarning::MissingReference {
                            node,
                            property: property.to_string(),
                            reference: id.clone(),
                        });
                        let fallback = fallback.as_deref()?;
                        self.brush(node, fallback, opacity, property)
                    }
                }
            }
        }
    }

    fn fill(&mut self, surface: &mut dyn Surface, node: NodeId, path: &Path) -> Result<bool, SvgError> {
        let paint = self.doc.resolve_paint(node, "fill");
        let opacity = self.opacity(node, "fill-opacity");
        let Some(brush) = self.brush(node, &paint, opacity, "fill") else {
            return Ok(false);
        };
        let rule = FillRule::from_keyword(&self.doc.resolve_keyword(node, "fill-rule"));
        surface.fill_path(&brush, path, rule)?;
        Ok(true)
    }

    /// Strokes `path`, or fills a cap shape when the path is a single point.
    fn stroke(&mut self, surface: &mut dyn Surface, node: NodeId, path: &Path) -> Result<bool, SvgError> {
        let doc = self.doc;
        let paint = doc.resolve_paint(node, "stroke");
        if paint.is_none() {
            return Ok(false);
        }
        let width = doc.resolve_length(node, "stroke-width", Axis::Other);
        if width <= 0.0 {
            return Ok(false);
        }
        let opacity = self.opacity(node, "stroke-opacity");
        let Some(brush) = self.brush(node, &paint, opacity, "stroke") else {
            return Ok(false);
        };
        let Some(bounds) = path.bounds() else {
            return Ok(false);
        };
        let cap = LineCap::from_keyword(&doc.resolve_keyword(node, "stroke-linecap"));

        if bounds.is_degenerate() {
            let half = width / 2.0;
            let mut cap_path = Path::new();
            match cap {
                LineCap::Round => cap_path.add_ellipse(bounds.x, bounds.y, half, half),
                LineCap::Square => {
                    cap_path.add_rect(Rect::new(bounds.x - half, bounds.y - half, width, width))
                }
                LineCap::Butt => return Ok(false),
            }
            surface.fill_path(&brush, &cap_path, FillRule::NonZero)?;
            return Ok(true);
        }

        let mut pen = Pen::new(brush, width);
        pen.cap = cap;
        pen.join = LineJoin::from_keyword(&doc.resolve_keyword(node, "stroke-linejoin"));
        pen.miter_limit = doc.resolve_number(node, "stroke-miterlimit").max(1.0);
        let ctx = doc.length_context(node);
        if let Some(AttributeValue::LengthList(dashes)) = doc.resolve(node, "stroke-dasharray") {
            let dashes: Vec<f32> = dashes.iter().map(|l| l.to_user(&ctx, Axis::Other)).collect();
            let offset = doc.resolve_length(node, "stroke-dashoffset", Axis::Other);
            pen.dash = dash_pattern(&dashes, offset, width, cap);
        }
        surface.stroke_path(&pen, path)?;
        Ok(true)
    }

    fn paint_image(&mut self, surface: &mut dyn Surface, node: NodeId) -> Result<bool, SvgError> {
        let doc = self.doc;
        let dest = doc.local_bounds(node);
        if dest.is_empty() {
            return Ok(false);
        }
        let Some(href) = doc
            .attribute(node, "href")
            .or_else(|| doc.attribute(node, "xlink:href"))
            .map(AttributeValue::to_text)
        else {
            return Ok(false);
        };
        match self.load_image(&href) {
            Ok(image) => {
                surface.draw_image(&image, dest)?;
                Ok(true)
            }
            Err(err) => {
                self.warn(RenderWarning::ImageUnavailable {
                    node,
                    message: err.to_string(),
                });
                Ok(false)
            }
        }
    }

    fn load_image(&self, href: &str) -> Result<Pixmap, SvgError> {
        let href = href.trim();
        if href.starts_with("data:") {
            let (mime, data) = parse_data_uri(href)
                .ok_or_else(|| SvgError::Load("malformed data URI".to_string()))?;
            return decode_image(&data, Some(mime.as_str()))
                .ok_or_else(|| SvgError::Load(format!("cannot decode {mime} image")));
        }
        let url = loader::resolve_url(self.doc.base_uri(), href)?;
        let data = loader::fetch_bytes(&url)?;
        decode_image(&data, None).ok_or_else(|| SvgError::Load(format!("cannot decode {url}")))
    }
}

impl Document {
    pub fn render(&self, surface: &mut dyn Surface) -> Result<RenderReport, SvgError> {
        self.render_with(surface, &RenderOptions::default())
    }

    pub fn render_with(
        &self,
        surface: &mut dyn Surface,
        options: &RenderOptions,
    ) -> Result<RenderReport, SvgError> {
        let mut renderer = Renderer::new(self, options.clone());
        renderer.render_node(surface, self.root(), false)?;
        Ok(renderer.finish())
    }

    /// Pixel size of the root viewport: `width`/`height`, else the `viewBox`
    /// size, rounded up.
    pub fn image_size(&self) -> (u32, u32) {
        let root = self.root();
        let ctx = LengthContext::default();
        let (vw, vh) = self.viewport_size(root);
        let dim = |name: &str, axis: Axis, fallback: f32| {
            self.attribute(root, name)
                .and_then(AttributeValue::as_length)
                .filter(|l| l.unit != Unit::Percent)
                .map(|l| l.to_user(&ctx, axis))
                .unwrap_or(fallback)
        };
        let w = dim("width", Axis::Horizontal, vw);
        let h = dim("height", Axis::Vertical, vh);
        (w.ceil().max(1.0) as u32, h.ceil().max(1.0) as u32)
    }

    pub fn render_to_pixmap(
        &self,
        width: u32,
        height: u32,
        options: &RenderOptions,
    ) -> Result<(Pixmap, RenderReport), SvgError> {
        let mut surface = RasterSurface::new(width, height)?;
        if let Some(background) = options.background {
            surface.clear(background);
        }
        let report = self.render_with(&mut surface, options)?;
        Ok((surface.into_pixmap(), report))
    }
}

/// Renders independent documents in parallel, each at its own
/// [`Document::image_size`]. Results keep the input order.
pub fn render_batch(
    documents: Vec<Document>,
    options: &RenderOptions,
) -> Vec<Result<(Pixmap, RenderReport), SvgError>> {
    documents
        .into_par_iter()
        .map(|doc| {
            let (w, h) = doc.image_size();
            doc.render_to_pixmap(w, h, options)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugLogger;
    use crate::recording::{Command, RecordingSurface};

    fn add(doc: &mut Document, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let node = doc.create_element(tag);
        for (name, value) in attrs {
            doc.set_attribute(node, name, value).expect("attribute");
        }
        doc.append_child(parent, node).expect("append");
        node
    }

    fn fill_bounds(command: &Command) -> Rect {
        match command {
            Command::Fill { path, .. } => path.bounds().expect("fill path bounds"),
            other => panic!("fill expected, got {other:?}"),
        }
    }

    /// Delegates to a recorder but fails every fill with a blue brush.
    struct FailingSurface {
        inner: RecordingSurface,
    }

    impl Surface for FailingSurface {
        fn size(&self) -> (u32, u32) {
            self.inner.size()
        }
        fn transform(&self) -> Matrix {
            self.inner.transform()
        }
        fn set_transform(&mut self, transform: Matrix) {
            self.inner.set_transform(transform)
        }
        fn clip(&self) -> ClipRegion {
            self.inner.clip()
        }
        fn set_clip(&mut self, region: &ClipRegion, mode: CombineMode) {
            self.inner.set_clip(region, mode)
        }
        fn smoothing(&self) -> bool {
            self.inner.smoothing()
        }
        fn set_smoothing(&mut self, enabled: bool) {
            self.inner.set_smoothing(enabled)
        }
        fn fill_path(&mut self, brush: &Brush, path: &Path, rule: FillRule) -> Result<(), SvgError> {
            if brush.solid_color() == Some(Color::rgb(0.0, 0.0, 1.0)) {
                return Err(SvgError::Raster("backend refused blue".to_string()));
            }
            self.inner.fill_path(brush, path, rule)
        }
        fn stroke_path(&mut self, pen: &Pen, path: &Path) -> Result<(), SvgError> {
            self.inner.stroke_path(pen, path)
        }
        fn draw_pixmap(&mut self, pixmap: &Pixmap, x: i32, y: i32) -> Result<(), SvgError> {
            self.inner.draw_pixmap(pixmap, x, y)
        }
        fn draw_image(&mut self, image: &Pixmap, dest: Rect) -> Result<(), SvgError> {
            self.inner.draw_image(image, dest)
        }
    }

    #[test]
    fn circle_with_clip_rect_renders_one_clipped_fill() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.set_attribute(root, "clip", "rect(0, 100, 100, 0)").expect("clip");
        add(&mut doc, root, "circle", &[("cx", "50"), ("cy", "50"), ("r", "40"), ("fill", "red")]);

        let mut surface = RecordingSurface::new(100, 100);
        let report = doc.render(&mut surface).expect("render");
        assert!(report.is_clean(), "{:?}", report.warnings);

        let fills: Vec<&Command> = surface.fills().collect();
        assert_eq!(fills.len(), 1);
        let Command::Fill { brush, clip, .. } = fills[0] else {
            panic!("fill expected");
        };
        assert_eq!(brush, &Brush::Solid(Color::rgb(1.0, 0.0, 0.0)));
        assert!(fill_bounds(fills[0]).approx_eq(&Rect::new(10.0, 10.0, 80.0, 80.0), 0.01));
        let clip_bounds = clip.bounds().expect("clip set");
        assert!(clip_bounds.approx_eq(&Rect::new(0.0, 0.0, 100.0, 100.0), 0.01));
        assert_eq!(surface.strokes().count(), 0);
        assert!(surface.clip().is_infinite(), "clip restored after render");
    }

    #[test]
    fn zero_length_round_capped_line_fills_a_cap() {
        let mut doc = Document::new();
        let root = doc.root();
        add(
            &mut doc,
            root,
            "line",
            &[
                ("x1", "0"),
                ("y1", "0"),
                ("x2", "0"),
                ("y2", "0"),
                ("stroke", "black"),
                ("stroke-width", "4"),
                ("stroke-linecap", "round"),
            ],
        );
        let mut surface = RecordingSurface::new(10, 10);
        doc.render(&mut surface).expect("render");
        assert_eq!(surface.strokes().count(), 0);
        let fills: Vec<&Command> = surface.fills().collect();
        assert_eq!(fills.len(), 1, "only the cap is filled; lines have no fill");
        assert!(fill_bounds(fills[0]).approx_eq(&Rect::new(-2.0, -2.0, 4.0, 4.0), 0.01));
    }

    #[test]
    fn butt_capped_point_draws_nothing() {
        let mut doc = Document::new();
        let root = doc.root();
        add(
            &mut doc,
            root,
            "path",
            &[("d", "M5 5 L5 5"), ("stroke", "black"), ("stroke-width", "2"), ("fill", "none")],
        );
        let mut surface = RecordingSurface::new(10, 10);
        doc.render(&mut surface).expect("render");
        assert_eq!(surface.fills().count() + surface.strokes().count(), 0);
    }

    #[test]
    fn clip_is_restored_when_a_child_fails() {
        let mut doc = Document::new();
        let root = doc.root();
        let clip = add(&mut doc, root, "clipPath", &[("id", "c")]);
        add(&mut doc, clip, "rect", &[("width", "50"), ("height", "50")]);
        let group = add(&mut doc, root, "g", &[("clip-path", "url(#c)")]);
        let failing = add(&mut doc, group, "rect", &[("width", "10"), ("height", "10"), ("fill", "blue")]);
        add(&mut doc, group, "rect", &[("width", "20"), ("height", "20"), ("fill", "green")]);

        let mut surface = FailingSurface {
            inner: RecordingSurface::new(100, 100),
        };
        let before = surface.clip();
        let report = doc.render(&mut surface).expect("render continues");
        assert_eq!(surface.clip(), before);
        assert_eq!(surface.transform(), Matrix::identity());
        assert!(report.warnings.iter().any(|w| matches!(
            w,
            RenderWarning::ElementFailed { node, .. } if *node == failing
        )));

        let fills: Vec<&Command> = surface.inner.fills().collect();
        assert_eq!(fills.len(), 1, "sibling after the failure still paints");
        let Command::Fill { clip, .. } = fills[0] else {
            panic!("fill expected");
        };
        assert!(clip.bounds().expect("clipped").approx_eq(&Rect::new(0.0, 0.0, 50.0, 50.0), 0.01));
    }

    #[test]
    fn dash_arrays_are_normalized_to_stroke_width() {
        let plain = dash_pattern(&[4.0, 0.0, 2.0], 3.0, 2.0, LineCap::Butt).expect("dashes");
        assert_eq!(plain.array, vec![2.0, 0.5, 1.0, 2.0, 0.5, 1.0]);
        assert_eq!(plain.offset, 1.5);

        let round = dash_pattern(&[4.0, 2.0], 0.0, 2.0, LineCap::Round).expect("dashes");
        assert_eq!(round.array, vec![3.0, 0.0]);
        assert_eq!(round.offset, 0.0);

        assert!(dash_pattern(&[], 0.0, 2.0, LineCap::Butt).is_none());
    }

    #[test]
    fn stroke_pen_carries_style() {
        let mut doc = Document::new();
        let root = doc.root();
        add(
            &mut doc,
            root,
            "polyline",
            &[
                ("points", "0,0 10,0 10,10"),
                ("fill", "none"),
                ("stroke", "#0000ff"),
                ("stroke-width", "2"),
                ("stroke-linejoin", "bevel"),
                ("stroke-dasharray", "4 2"),
                ("stroke-opacity", "0.5"),
            ],
        );
        let mut surface = RecordingSurface::new(20, 20);
        doc.render(&mut surface).expect("render");
        let Some(Command::Stroke { pen, .. }) = surface.strokes().next() else {
            panic!("stroke expected");
        };
        assert_eq!(pen.width, 2.0);
        assert_eq!(pen.join, LineJoin::Bevel);
        assert_eq!(pen.brush, Brush::Solid(Color::rgba(0.0, 0.0, 1.0, 0.5)));
        assert_eq!(pen.dash.as_ref().map(|d| d.array.clone()), Some(vec![2.0, 1.0]));
    }

    #[test]
    fn hidden_and_undisplayed_elements_are_skipped() {
        let mut doc = Document::new();
        let root = doc.root();
        add(&mut doc, root, "rect", &[("width", "5"), ("height", "5"), ("display", "none")]);
        let hidden = add(&mut doc, root, "g", &[("visibility", "hidden")]);
        add(&mut doc, hidden, "rect", &[("width", "5"), ("height", "5")]);
        add(&mut doc, root, "rect", &[("width", "5"), ("height", "0")]);
        let mut surface = RecordingSurface::new(10, 10);
        let report = doc.render(&mut surface).expect("render");
        assert_eq!(surface.fills().count(), 0);
        assert_eq!(report.painted, 0);
    }

    #[test]
    fn root_view_box_maps_to_surface() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.set_attribute(root, "viewBox", "0 0 50 50").expect("viewBox");
        add(&mut doc, root, "rect", &[("width", "10"), ("height", "10"), ("transform", "translate(5)")]);
        let mut surface = RecordingSurface::new(100, 100);
        doc.render(&mut surface).expect("render");
        let Some(Command::Fill { transform, .. }) = surface.fills().next() else {
            panic!("fill expected");
        };
        let expected = Matrix::scale(2.0, 2.0).mul(Matrix::translate(5.0, 0.0));
        assert!(transform.approx_eq(&expected, 1e-4), "{transform:?}");
        assert_eq!(surface.transform(), Matrix::identity());
    }

    #[test]
    fn shape_rendering_controls_smoothing() {
        let mut doc = Document::new();
        let root = doc.root();
        add(
            &mut doc,
            root,
            "rect",
            &[("width", "5"), ("height", "5"), ("shape-rendering", "crispEdges")],
        );
        let mut surface = RecordingSurface::new(10, 10);
        doc.render(&mut surface).expect("render");
        let Some(Command::Fill { smoothing, .. }) = surface.fills().next() else {
            panic!("fill expected");
        };
        assert!(!smoothing);
        assert!(surface.smoothing(), "smoothing restored");
    }

    #[test]
    fn gradients_and_fallbacks() {
        let mut doc = Document::new();
        let root = doc.root();
        let grad = add(&mut doc, root, "linearGradient", &[("id", "g")]);
        add(&mut doc, grad, "stop", &[("offset", "0"), ("stop-color", "red")]);
        add(&mut doc, grad, "stop", &[("offset", "1"), ("stop-color", "blue")]);
        add(&mut doc, root, "rect", &[("width", "10"), ("height", "10"), ("fill", "url(#g)")]);
        add(
            &mut doc,
            root,
            "rect",
            &[("width", "10"), ("height", "10"), ("fill", "url(#nope) green")],
        );

        let mut surface = RecordingSurface::new(10, 10);
        let report = doc.render(&mut surface).expect("render");
        let brushes: Vec<&Brush> = surface
            .fills()
            .map(|c| match c {
                Command::Fill { brush, .. } => brush,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(brushes.len(), 2);
        assert!(matches!(brushes[0], Brush::LinearGradient { .. }));
        assert_eq!(brushes[1].solid_color(), Some(Color::from_rgba8(0, 128, 0, 255)));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind(), "missing_reference");
    }

    #[test]
    fn use_renders_target_and_bounds_recursion() {
        let mut doc = Document::new();
        let root = doc.root();
        let defs = add(&mut doc, root, "defs", &[]);
        add(&mut doc, defs, "rect", &[("id", "box"), ("width", "4"), ("height", "4")]);
        add(&mut doc, root, "use", &[("href", "#box"), ("x", "10"), ("y", "20")]);
        let looping = add(&mut doc, root, "g", &[("id", "loop")]);
        add(&mut doc, looping, "use", &[("href", "#loop")]);

        let mut surface = RecordingSurface::new(50, 50);
        let report = doc
            .render_with(
                &mut surface,
                &RenderOptions {
                    max_use_depth: 3,
                    ..RenderOptions::default()
                },
            )
            .expect("render");
        let Some(Command::Fill { transform, .. }) = surface.fills().next() else {
            panic!("fill expected");
        };
        assert_eq!(*transform, Matrix::translate(10.0, 20.0));
        assert_eq!(surface.fills().count(), 1, "defs content is not drawn directly");
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, RenderWarning::UseDepthExceeded { .. })));
    }

    #[test]
    fn broken_filter_falls_back_to_unfiltered_rendering() {
        let logger = DebugLogger::in_memory();
        let mut doc = Document::new();
        doc.set_logger(Some(logger.clone()));
        let root = doc.root();
        let filter = add(&mut doc, root, "filter", &[("id", "f")]);
        add(&mut doc, filter, "feGaussianBlur", &[("stdDeviation", "0")]);
        add(&mut doc, root, "rect", &[("width", "5"), ("height", "5"), ("filter", "url(#f)")]);

        let mut surface = RecordingSurface::new(10, 10);
        let report = doc.render(&mut surface).expect("render");
        assert_eq!(surface.fills().count(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(report.warnings[0], RenderWarning::FilterFailed { .. }));
        assert_eq!(logger.count("svg.render.filter_failed"), 1);
        assert!(logger.lines().iter().any(|l| l.contains("svg.render_warning")));
    }

    #[test]
    fn failing_filter_run_reports_the_element_once() {
        let mut doc = Document::new();
        let root = doc.root();
        let filter = add(&mut doc, root, "filter", &[("id", "f")]);
        add(&mut doc, filter, "feOffset", &[("in", "nothing"), ("dx", "1")]);
        add(
            &mut doc,
            root,
            "rect",
            &[("width", "5"), ("height", "5"), ("filter", "url(#f)"), ("clip-path", "url(#gone)")],
        );

        let mut surface = RecordingSurface::new(10, 10);
        let report = doc.render(&mut surface).expect("render");
        let kinds: Vec<&str> = report.warnings.iter().map(RenderWarning::kind).collect();
        assert_eq!(kinds, ["filter_failed", "missing_reference"]);
        assert_eq!(report.painted, 1);
        assert_eq!(surface.fills().count(), 1);
    }

    #[test]
    fn huge_blur_deviation_degrades_to_unfiltered_rendering() {
        let mut doc = Document::new();
        let root = doc.root();
        let filter = add(&mut doc, root, "filter", &[("id", "f")]);
        add(&mut doc, filter, "feGaussianBlur", &[("stdDeviation", "1e11")]);
        add(&mut doc, root, "rect", &[("width", "5"), ("height", "5"), ("filter", "url(#f)")]);

        let mut surface = RecordingSurface::new(10, 10);
        let report = doc.render(&mut surface).expect("render");
        assert_eq!(surface.fills().count(), 1);
        assert!(matches!(report.warnings.as_slice(), [RenderWarning::FilterFailed { .. }]));
    }

    #[test]
    fn filtered_elements_are_composited_from_an_offscreen_pass() {
        let mut doc = Document::new();
        let root = doc.root();
        let filter = add(&mut doc, root, "filter", &[("id", "f")]);
        add(&mut doc, filter, "feGaussianBlur", &[("stdDeviation", "1")]);
        add(&mut doc, root, "rect", &[("width", "5"), ("height", "5"), ("filter", "url(#f)")]);

        let mut surface = RecordingSurface::new(10, 10);
        let report = doc.render(&mut surface).expect("render");
        assert!(report.is_clean(), "{:?}", report.warnings);
        assert_eq!(surface.fills().count(), 0);
        assert!(surface.commands().iter().any(|c| matches!(
            c,
            Command::DrawPixmap { x: 0, y: 0, width: 10, height: 10 }
        )));
    }

    #[test]
    fn missing_clip_path_is_reported_and_ignored() {
        let mut doc = Document::new();
        let root = doc.root();
        add(&mut doc, root, "rect", &[("width", "5"), ("height", "5"), ("clip-path", "url(#gone)")]);
        let mut surface = RecordingSurface::new(10, 10);
        let report = doc.render(&mut surface).expect("render");
        assert_eq!(surface.fills().count(), 1);
        assert_eq!(report.warnings[0].kind(), "missing_reference");
    }

    #[test]
    fn raster_output_and_batches() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.set_attribute(root, "width", "20").expect("width");
        doc.set_attribute(root, "height", "20").expect("height");
        add(&mut doc, root, "circle", &[("cx", "10"), ("cy", "10"), ("r", "6"), ("fill", "red")]);
        assert_eq!(doc.image_size(), (20, 20));

        let options = RenderOptions {
            background: Some(Color::WHITE),
            ..RenderOptions::default()
        };
        let (pixmap, _) = doc.render_to_pixmap(20, 20, &options).expect("render");
        let center = pixmap.pixel(10, 10).expect("center");
        assert_eq!((center.red(), center.green(), center.alpha()), (255, 0, 255));
        let corner = pixmap.pixel(0, 0).expect("corner");
        assert_eq!((corner.red(), corner.green(), corner.blue()), (255, 255, 255));

        let results = render_batch(vec![doc.clone(), doc], &options);
        assert_eq!(results.len(), 2);
        for result in results {
            let (pixmap, report) = result.expect("batch render");
            assert_eq!((pixmap.width(), pixmap.height()), (20, 20));
            assert_eq!(report.painted, 1);
        }
    }
}
