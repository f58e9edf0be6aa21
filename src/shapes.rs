use crate::attributes::{AttributeValue, Axis};
use crate::document::{Document, NodeId};
use crate::paint::Paint;
use crate::path::Path;
use crate::types::{Point, Rect};

/// Element behavior selected from the tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Svg,
    Group,
    Anchor,
    Switch,
    Use,
    Defs,
    Symbol,
    Circle,
    Ellipse,
    Line,
    Rect,
    Path,
    Polyline,
    Polygon,
    Image,
    Text,
    TSpan,
    ClipPath,
    Mask,
    Marker,
    LinearGradient,
    RadialGradient,
    Stop,
    Filter,
    FeGaussianBlur,
    FeOffset,
    FeFlood,
    FeMerge,
    FeMergeNode,
    FeColorMatrix,
    Style,
    Title,
    Desc,
    Unknown,
}

impl ElementKind {
    pub fn from_tag(tag: &str) -> ElementKind {
        let local = tag.rsplit(':').next().unwrap_or(tag);
        match local {
            "svg" => ElementKind::Svg,
            "g" => ElementKind::Group,
            "a" => ElementKind::Anchor,
            "switch" => ElementKind::Switch,
            "use" => ElementKind::Use,
            "defs" => ElementKind::Defs,
            "symbol" => ElementKind::Symbol,
            "circle" => ElementKind::Circle,
            "ellipse" => ElementKind::Ellipse,
            "line" => ElementKind::Line,
            "rect" => ElementKind::Rect,
            "path" => ElementKind::Path,
            "polyline" => ElementKind::Polyline,
            "polygon" => ElementKind::Polygon,
            "image" => ElementKind::Image,
            "text" => ElementKind::Text,
            "tspan" => ElementKind::TSpan,
            "clipPath" => ElementKind::ClipPath,
            "mask" => ElementKind::Mask,
            "marker" => ElementKind::Marker,
            "linearGradient" => ElementKind::LinearGradient,
            "radialGradient" => ElementKind::RadialGradient,
            "stop" => ElementKind::Stop,
            "filter" => ElementKind::Filter,
            "feGaussianBlur" => ElementKind::FeGaussianBlur,
            "feOffset" => ElementKind::FeOffset,
            "feFlood" => ElementKind::FeFlood,
            "feMerge" => ElementKind::FeMerge,
            "feMergeNode" => ElementKind::FeMergeNode,
            "feColorMatrix" => ElementKind::FeColorMatrix,
            "style" => ElementKind::Style,
            "title" => ElementKind::Title,
            "desc" => ElementKind::Desc,
            _ => ElementKind::Unknown,
        }
    }

    /// Leaf elements painted with fill and stroke.
    pub fn is_renderable(self) -> bool {
        self.geometry().is_some()
    }

    /// Elements whose children are rendered in document order.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            ElementKind::Svg | ElementKind::Group | ElementKind::Anchor | ElementKind::Switch
        )
    }

    pub fn is_filter_primitive(self) -> bool {
        matches!(
            self,
            ElementKind::FeGaussianBlur
                | ElementKind::FeOffset
                | ElementKind::FeFlood
                | ElementKind::FeMerge
                | ElementKind::FeColorMatrix
        )
    }

    pub fn geometry(self) -> Option<&'static dyn Geometry> {
        match self {
            ElementKind::Circle => Some(&CircleGeometry),
            ElementKind::Ellipse => Some(&EllipseGeometry),
            ElementKind::Line => Some(&LineGeometry),
            ElementKind::Rect => Some(&RectGeometry),
            ElementKind::Path => Some(&PathDataGeometry),
            ElementKind::Polyline => Some(&PolyGeometry { closed: false }),
            ElementKind::Polygon => Some(&PolyGeometry { closed: true }),
            _ => None,
        }
    }

    /// Whether changing attribute `name` invalidates the cached path.
    pub fn affects_geometry(self, name: &str) -> bool {
        match self.geometry() {
            Some(geometry) => name == "font-size" || geometry.attributes().contains(&name),
            None => false,
        }
    }
}

/// Which outline a shape produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryMode {
    /// The outline to fill and stroke; stroke width adds nothing.
    Paint,
    /// The region the element occupies, grown by half the stroke width.
    Bounds,
}

/// Per-kind path construction.
pub trait Geometry: Sync {
    /// Attributes the path depends on.
    fn attributes(&self) -> &'static [&'static str];

    fn build(&self, doc: &Document, node: NodeId, mode: GeometryMode) -> Option<Path>;

    /// Lines have no interior; their fill is always `none`.
    fn fillable(&self) -> bool {
        true
    }
}

struct CircleGeometry;
struct EllipseGeometry;
struct LineGeometry;
struct RectGeometry;
struct PathDataGeometry;
struct PolyGeometry {
    closed: bool,
}

fn len(doc: &Document, node: NodeId, name: &str, axis: Axis) -> f32 {
    doc.length_attribute(node, name, axis, 0.0)
}

/// Half the stroke width when the element is stroked at all.
fn stroke_allowance(doc: &Document, node: NodeId) -> f32 {
    if doc.resolve_paint(node, "stroke") == Paint::None {
        return 0.0;
    }
    (doc.resolve_length(node, "stroke-width", Axis::Other) / 2.0).max(0.0)
}

fn stroke_outline(path: &Path, width: f32) -> Option<Path> {
    let sk = path.to_skia()?;
    let stroke = tiny_skia::Stroke {
        width,
        ..tiny_skia::Stroke::default()
    };
    let outline = sk.stroke(&stroke, 1.0)?;
    Some(Path::from_skia(&outline))
}

fn with_outline(path: Path, doc: &Document, node: NodeId, mode: GeometryMode) -> Path {
    if mode == GeometryMode::Paint {
        return path;
    }
    let half = stroke_allowance(doc, node);
    if half <= 0.0 {
        return path;
    }
    stroke_outline(&path, half * 2.0).unwrap_or(path)
}

impl Geometry for CircleGeometry {
    fn attributes(&self) -> &'static [&'static str] {
        &["cx", "cy", "r"]
    }

    fn build(&self, doc: &Document, node: NodeId, mode: GeometryMode) -> Option<Path> {
        let cx = len(doc, node, "cx", Axis::Horizontal);
        let cy = len(doc, node, "cy", Axis::Vertical);
        let r = len(doc, node, "r", Axis::Other);
        if r <= 0.0 {
            return None;
        }
        let r = match mode {
            GeometryMode::Paint => r,
            GeometryMode::Bounds => r + stroke_allowance(doc, node),
        };
        let mut path = Path::new();
        path.add_ellipse(cx, cy, r, r);
        Some(path)
    }
}

impl Geometry for EllipseGeometry {
    fn attributes(&self) -> &'static [&'static str] {
        &["cx", "cy", "rx", "ry"]
    }

    fn build(&self, doc: &Document, node: NodeId, mode: GeometryMode) -> Option<Path> {
        let cx = len(doc, node, "cx", Axis::Horizontal);
        let cy = len(doc, node, "cy", Axis::Vertical);
        let rx = len(doc, node, "rx", Axis::Horizontal);
        let ry = len(doc, node, "ry", Axis::Vertical);
        if rx <= 0.0 || ry <= 0.0 {
            return None;
        }
        let grow = match mode {
            GeometryMode::Paint => 0.0,
            GeometryMode::Bounds => stroke_allowance(doc, node),
        };
        let mut path = Path::new();
        path.add_ellipse(cx, cy, rx + grow, ry + grow);
        Some(path)
    }
}

impl Geometry for LineGeometry {
    fn attributes(&self) -> &'static [&'static str] {
        &["x1", "y1", "x2", "y2", "stroke-width"]
    }

    fn build(&self, doc: &Document, node: NodeId, mode: GeometryMode) -> Option<Path> {
        let stroke_width = doc.resolve_length(node, "stroke-width", Axis::Other);
        if stroke_width <= 0.0 {
            return None;
        }
        let start = Point::new(
            len(doc, node, "x1", Axis::Horizontal),
            len(doc, node, "y1", Axis::Vertical),
        );
        let end = Point::new(
            len(doc, node, "x2", Axis::Horizontal),
            len(doc, node, "y2", Axis::Vertical),
        );
        let mut path = Path::new();
        match mode {
            GeometryMode::Paint => {
                path.move_to(start.x, start.y);
                path.line_to(end.x, end.y);
            }
            GeometryMode::Bounds => {
                let radius = stroke_width / 2.0;
                path.add_ellipse(start.x, start.y, radius, radius);
                path.add_ellipse(end.x, end.y, radius, radius);
            }
        }
        Some(path)
    }

    fn fillable(&self) -> bool {
        false
    }
}

impl Geometry for RectGeometry {
    fn attributes(&self) -> &'static [&'static str] {
        &["x", "y", "width", "height", "rx", "ry"]
    }

    fn build(&self, doc: &Document, node: NodeId, mode: GeometryMode) -> Option<Path> {
        let x = len(doc, node, "x", Axis::Horizontal);
        let y = len(doc, node, "y", Axis::Vertical);
        let w = len(doc, node, "width", Axis::Horizontal);
        let h = len(doc, node, "height", Axis::Vertical);
        if w <= 0.0 || h <= 0.0 {
            return None;
        }
        let rx_set = doc.has_attribute(node, "rx");
        let ry_set = doc.has_attribute(node, "ry");
        let mut rx = len(doc, node, "rx", Axis::Horizontal).max(0.0);
        let mut ry = len(doc, node, "ry", Axis::Vertical).max(0.0);
        if rx_set && !ry_set {
            ry = rx;
        } else if ry_set && !rx_set {
            rx = ry;
        }
        let rx = rx.min(w / 2.0);
        let ry = ry.min(h / 2.0);

        let rect = match mode {
            GeometryMode::Paint => Rect::new(x, y, w, h),
            GeometryMode::Bounds => {
                let half = stroke_allowance(doc, node);
                Rect::new(x, y, w, h).inflate(half, half)
            }
        };
        let mut path = Path::new();
        if rx > 0.0 && ry > 0.0 {
            path.add_rounded_rect(rect, rx, ry);
        } else {
            path.add_rect(rect);
        }
        Some(path)
    }
}

impl Geometry for PathDataGeometry {
    fn attributes(&self) -> &'static [&'static str] {
        &["d"]
    }

    fn build(&self, doc: &Document, node: NodeId, mode: GeometryMode) -> Option<Path> {
        let path = match doc.attribute(node, "d")? {
            AttributeValue::Path(path) => path.clone(),
            other => Path::parse_lenient(&other.to_text()),
        };
        if path.is_empty() {
            return None;
        }
        Some(with_outline(path, doc, node, mode))
    }
}

impl Geometry for PolyGeometry {
    fn attributes(&self) -> &'static [&'static str] {
        &["points"]
    }

    fn build(&self, doc: &Document, node: NodeId, mode: GeometryMode) -> Option<Path> {
        let points = match doc.attribute(node, "points")? {
            AttributeValue::Points(points) => points.clone(),
            _ => return None,
        };
        let (first, rest) = points.split_first()?;
        if rest.is_empty() {
            return None;
        }
        let mut path = Path::new();
        path.move_to(first.x, first.y);
        for p in rest {
            path.line_to(p.x, p.y);
        }
        if self.closed {
            path.close();
        }
        Some(with_outline(path, doc, node, mode))
    }
}

impl Document {
    /// Untransformed outline of a shape element. Paint-mode results are
    /// cached until a geometry attribute changes.
    pub fn path(&self, node: NodeId, mode: GeometryMode) -> Option<Path> {
        let el = self.element(node)?;
        let geometry = el.kind().geometry()?;
        if mode == GeometryMode::Bounds {
            return geometry.build(self, node, mode);
        }
        {
            let cache = el.geometry.borrow();
            if !cache.dirty {
                return cache.path.clone();
            }
        }
        let path = geometry.build(self, node, mode);
        let mut cache = el.geometry.borrow_mut();
        cache.path = path.clone();
        cache.dirty = false;
        path
    }

    pub fn is_geometry_dirty(&self, node: NodeId) -> bool {
        self.element(node)
            .map(|el| el.geometry.borrow().dirty)
            .unwrap_or(false)
    }

    /// Region occupied by `node` in its own user space (before its
    /// `transform`). Empty when the element has no geometry.
    pub fn local_bounds(&self, node: NodeId) -> Rect {
        self.local_bounds_at_depth(node, 0)
    }

    fn local_bounds_at_depth(&self, node: NodeId, depth: usize) -> Rect {
        const MAX_DEPTH: usize = 32;
        let Some(kind) = self.kind(node) else {
            return Rect::EMPTY;
        };
        if depth > MAX_DEPTH {
            return Rect::EMPTY;
        }
        if kind.is_renderable() {
            return self
                .path(node, GeometryMode::Bounds)
                .and_then(|p| p.bounds())
                .unwrap_or(Rect::EMPTY);
        }
        match kind {
            ElementKind::Svg if node == self.root() => {
                let (w, h) = self.viewport_size(node);
                self.view_box(node)
                    .unwrap_or_else(|| Rect::new(0.0, 0.0, w, h))
            }
            ElementKind::Use => {
                let Some(target) = self.href_target(node) else {
                    return Rect::EMPTY;
                };
                let inner = self.bounds_at_depth(target, depth + 1);
                if inner == Rect::EMPTY {
                    return inner;
                }
                let dx = len(self, node, "x", Axis::Horizontal);
                let dy = len(self, node, "y", Axis::Vertical);
                Rect::new(inner.x + dx, inner.y + dy, inner.width, inner.height)
            }
            ElementKind::Image => Rect::new(
                len(self, node, "x", Axis::Horizontal),
                len(self, node, "y", Axis::Vertical),
                len(self, node, "width", Axis::Horizontal),
                len(self, node, "height", Axis::Vertical),
            ),
            k if k.is_container() || k == ElementKind::ClipPath => self
                .children(node)
                .iter()
                .map(|c| self.bounds_at_depth(*c, depth + 1))
                .filter(|r| *r != Rect::EMPTY)
                .reduce(|a, b| a.union(&b))
                .unwrap_or(Rect::EMPTY),
            _ => Rect::EMPTY,
        }
    }

    /// Bounding box of `node` after its own `transform`.
    pub fn bounds(&self, node: NodeId) -> Rect {
        self.bounds_at_depth(node, 0)
    }

    fn bounds_at_depth(&self, node: NodeId, depth: usize) -> Rect {
        let local = self.local_bounds_at_depth(node, depth);
        if local == Rect::EMPTY {
            return local;
        }
        match self.element(node) {
            Some(el) if !el.transforms().is_empty() => el.transforms().compose().map_rect(&local),
            _ => local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(doc: &mut Document, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let node = doc.create_element(tag);
        for (name, value) in attrs {
            doc.set_attribute(node, name, value).expect(name);
        }
        let root = doc.root();
        doc.append_child(root, node).expect("attach");
        node
    }

    #[test]
    fn kinds_come_from_local_tag_names() {
        assert_eq!(ElementKind::from_tag("circle"), ElementKind::Circle);
        assert_eq!(ElementKind::from_tag("svg:rect"), ElementKind::Rect);
        assert_eq!(ElementKind::from_tag("feGaussianBlur"), ElementKind::FeGaussianBlur);
        assert_eq!(ElementKind::from_tag("blink"), ElementKind::Unknown);
        assert!(ElementKind::Circle.affects_geometry("r"));
        assert!(!ElementKind::Circle.affects_geometry("fill"));
        assert!(ElementKind::Line.affects_geometry("stroke-width"));
        assert!(!ElementKind::Group.affects_geometry("x"));
    }

    #[test]
    fn radius_change_invalidates_cached_path() {
        let mut doc = Document::new();
        let circle = attached(&mut doc, "circle", &[("cx", "0"), ("cy", "0"), ("r", "5")]);
        assert!(doc.is_geometry_dirty(circle));
        let first = doc
            .path(circle, GeometryMode::Paint)
            .and_then(|p| p.bounds())
            .expect("first bounds");
        assert!(!doc.is_geometry_dirty(circle));
        let again = doc
            .path(circle, GeometryMode::Paint)
            .and_then(|p| p.bounds())
            .expect("cached bounds");
        assert_eq!(first, again);

        doc.set_attribute(circle, "r", "10").expect("r");
        assert!(doc.is_geometry_dirty(circle));
        let second = doc
            .path(circle, GeometryMode::Paint)
            .and_then(|p| p.bounds())
            .expect("second bounds");
        assert_ne!(first, second);
        assert!(second.approx_eq(&Rect::new(-10.0, -10.0, 20.0, 20.0), 1e-3));
    }

    #[test]
    fn non_geometry_attributes_keep_the_cache() {
        let mut doc = Document::new();
        let circle = attached(&mut doc, "circle", &[("r", "5")]);
        doc.path(circle, GeometryMode::Paint);
        doc.set_attribute(circle, "fill", "blue").expect("fill");
        assert!(!doc.is_geometry_dirty(circle));
    }

    #[test]
    fn zero_radius_has_no_path_and_empty_bounds() {
        let mut doc = Document::new();
        let circle = attached(&mut doc, "circle", &[("cx", "3"), ("r", "0")]);
        assert!(doc.path(circle, GeometryMode::Paint).is_none());
        assert_eq!(doc.bounds(circle), Rect::EMPTY);
    }

    #[test]
    fn bounds_mode_adds_half_stroke_width() {
        let mut doc = Document::new();
        let circle = attached(
            &mut doc,
            "circle",
            &[("cx", "50"), ("cy", "50"), ("r", "40"), ("stroke", "red"), ("stroke-width", "4")],
        );
        let painted = doc
            .path(circle, GeometryMode::Paint)
            .and_then(|p| p.bounds())
            .expect("paint");
        assert!(painted.approx_eq(&Rect::new(10.0, 10.0, 80.0, 80.0), 1e-3));
        assert!(doc.bounds(circle).approx_eq(&Rect::new(8.0, 8.0, 84.0, 84.0), 1e-3));
    }

    #[test]
    fn line_paints_a_segment_but_bounds_cover_end_caps() {
        let mut doc = Document::new();
        let line = attached(
            &mut doc,
            "line",
            &[("x1", "0"), ("y1", "0"), ("x2", "10"), ("y2", "0"), ("stroke-width", "4")],
        );
        let painted = doc.path(line, GeometryMode::Paint).expect("segment");
        assert_eq!(painted.len(), 2);
        assert!(doc.bounds(line).approx_eq(&Rect::new(-2.0, -2.0, 14.0, 4.0), 1e-3));
        assert!(!ElementKind::Line.geometry().expect("line").fillable());

        doc.set_attribute(line, "stroke-width", "0").expect("width");
        assert!(doc.path(line, GeometryMode::Paint).is_none());
    }

    #[test]
    fn rect_radii_mirror_and_clamp() {
        let mut doc = Document::new();
        let rect = attached(
            &mut doc,
            "rect",
            &[("x", "0"), ("y", "0"), ("width", "20"), ("height", "10"), ("rx", "30")],
        );
        let path = doc.path(rect, GeometryMode::Paint).expect("rect");
        assert!(path.len() > 5);
        let b = path.bounds().expect("bounds");
        assert!(b.approx_eq(&Rect::new(0.0, 0.0, 20.0, 10.0), 1e-3));
    }

    #[test]
    fn transformed_and_container_bounds() {
        let mut doc = Document::new();
        let root = doc.root();
        let group = doc.create_element("g");
        doc.set_attribute(group, "transform", "translate(100, 0)").expect("transform");
        doc.append_child(root, group).expect("group");
        let poly = doc.create_element("polygon");
        doc.set_attribute(poly, "points", "0,0 10,0 10,10").expect("points");
        doc.append_child(group, poly).expect("poly");
        assert!(doc.bounds(group).approx_eq(&Rect::new(100.0, 0.0, 10.0, 10.0), 1e-3));
    }

    fn paint_bounds(doc: &Document, node: NodeId) -> Rect {
        doc.path(node, GeometryMode::Paint)
            .and_then(|p| p.bounds())
            .expect("paint bounds")
    }

    #[test]
    fn inherited_font_size_change_invalidates_em_lengths() {
        let mut doc = Document::new();
        let group = attached(&mut doc, "g", &[("font-size", "10")]);
        let circle = doc.create_element("circle");
        doc.set_attribute(circle, "r", "1em").expect("r");
        doc.append_child(group, circle).expect("circle");
        assert!(paint_bounds(&doc, circle).approx_eq(&Rect::new(-10.0, -10.0, 20.0, 20.0), 1e-3));

        doc.set_attribute(group, "font-size", "20").expect("font-size");
        assert!(doc.is_geometry_dirty(circle));
        let painted = paint_bounds(&doc, circle);
        assert!(painted.approx_eq(&Rect::new(-20.0, -20.0, 40.0, 40.0), 1e-3));
        assert!(painted.approx_eq(&doc.local_bounds(circle), 1e-3));
    }

    #[test]
    fn viewport_change_invalidates_percentage_lengths() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.set_attribute(root, "width", "100").expect("width");
        doc.set_attribute(root, "height", "100").expect("height");
        let circle = attached(&mut doc, "circle", &[("cx", "50%"), ("r", "1")]);
        assert!((paint_bounds(&doc, circle).x - 49.0).abs() < 1e-3);

        doc.set_attribute(root, "width", "200").expect("width");
        assert!((paint_bounds(&doc, circle).x - 99.0).abs() < 1e-3);
    }

    #[test]
    fn moving_a_subtree_recomputes_its_geometry() {
        use crate::recording::RecordingSurface;

        let mut doc = Document::new();
        let thin = attached(&mut doc, "g", &[("stroke-width", "0")]);
        let thick = attached(&mut doc, "g", &[("stroke-width", "4")]);
        let line = doc.create_element("line");
        for (name, value) in [("x2", "10"), ("stroke", "black")] {
            doc.set_attribute(line, name, value).expect(name);
        }
        doc.append_child(thin, line).expect("line");
        assert!(doc.path(line, GeometryMode::Paint).is_none());

        doc.remove_child(thin, line).expect("remove");
        assert!(doc.is_geometry_dirty(line));
        doc.append_child(thick, line).expect("move");
        assert!(doc.path(line, GeometryMode::Paint).is_some());

        let mut surface = RecordingSurface::new(20, 20);
        doc.render(&mut surface).expect("render");
        assert_eq!(surface.strokes().count(), 1);
    }
}
