use crate::error::SvgError;
use crate::types::{Matrix, Point, Rect};

/// Bezier approximation constant for a quarter circle.
pub(crate) const KAPPA: f32 = 0.552_284_75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSegment {
    MoveTo {
        end: Point,
    },
    LineTo {
        start: Point,
        end: Point,
    },
    CubicTo {
        start: Point,
        c1: Point,
        c2: Point,
        end: Point,
    },
    QuadTo {
        start: Point,
        control: Point,
        end: Point,
    },
    ArcTo {
        start: Point,
        rx: f32,
        ry: f32,
        rotation: f32,
        large_arc: bool,
        sweep: bool,
        end: Point,
    },
    Close {
        start: Point,
        end: Point,
    },
}

impl PathSegment {
    pub fn start(&self) -> Point {
        match *self {
            PathSegment::MoveTo { end } => end,
            PathSegment::LineTo { start, .. }
            | PathSegment::CubicTo { start, .. }
            | PathSegment::QuadTo { start, .. }
            | PathSegment::ArcTo { start, .. }
            | PathSegment::Close { start, .. } => start,
        }
    }

    pub fn end(&self) -> Point {
        match *self {
            PathSegment::MoveTo { end }
            | PathSegment::LineTo { end, .. }
            | PathSegment::CubicTo { end, .. }
            | PathSegment::QuadTo { end, .. }
            | PathSegment::ArcTo { end, .. }
            | PathSegment::Close { end, .. } => end,
        }
    }
}

/// Device-independent outline made of segments with resolved endpoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    segments: Vec<PathSegment>,
    current: Point,
    subpath_start: Point,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn current_point(&self) -> Point {
        self.current
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        let end = Point::new(x, y);
        self.segments.push(PathSegment::MoveTo { end });
        self.current = end;
        self.subpath_start = end;
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        self.ensure_started();
        let end = Point::new(x, y);
        self.segments.push(PathSegment::LineTo {
            start: self.current,
            end,
        });
        self.current = end;
    }

    pub fn cubic_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.ensure_started();
        let end = Point::new(x, y);
        self.segments.push(PathSegment::CubicTo {
            start: self.current,
            c1: Point::new(x1, y1),
            c2: Point::new(x2, y2),
            end,
        });
        self.current = end;
    }

    pub fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.ensure_started();
        let end = Point::new(x, y);
        self.segments.push(PathSegment::QuadTo {
            start: self.current,
            control: Point::new(x1, y1),
            end,
        });
        self.current = end;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn arc_to(
        &mut self,
        rx: f32,
        ry: f32,
        rotation: f32,
        large_arc: bool,
        sweep: bool,
        x: f32,
        y: f32,
    ) {
        self.ensure_started();
        let end = Point::new(x, y);
        self.segments.push(PathSegment::ArcTo {
            start: self.current,
            rx,
            ry,
            rotation,
            large_arc,
            sweep,
            end,
        });
        self.current = end;
    }

    pub fn close(&mut self) {
        if self.segments.is_empty() {
            return;
        }
        self.segments.push(PathSegment::Close {
            start: self.current,
            end: self.subpath_start,
        });
        self.current = self.subpath_start;
    }

    fn ensure_started(&mut self) {
        if self.segments.is_empty() {
            self.segments.push(PathSegment::MoveTo { end: self.current });
            self.subpath_start = self.current;
        }
    }

    pub fn append(&mut self, other: &Path) {
        for seg in &other.segments {
            self.segments.push(*seg);
        }
        if !other.segments.is_empty() {
            self.current = other.current;
            self.subpath_start = other.subpath_start;
        }
    }

    /// Closed ellipse as four cubic quarter arcs, starting at angle zero.
    pub fn add_ellipse(&mut self, cx: f32, cy: f32, rx: f32, ry: f32) {
        let ox = rx * KAPPA;
        let oy = ry * KAPPA;
        self.move_to(cx + rx, cy);
        self.cubic_to(cx + rx, cy + oy, cx + ox, cy + ry, cx, cy + ry);
        self.cubic_to(cx - ox, cy + ry, cx - rx, cy + oy, cx - rx, cy);
        self.cubic_to(cx - rx, cy - oy, cx - ox, cy - ry, cx, cy - ry);
        self.cubic_to(cx + ox, cy - ry, cx + rx, cy - oy, cx + rx, cy);
        self.close();
    }

    pub fn add_rect(&mut self, rect: Rect) {
        self.move_to(rect.left(), rect.top());
        self.line_to(rect.right(), rect.top());
        self.line_to(rect.right(), rect.bottom());
        self.line_to(rect.left(), rect.bottom());
        self.close();
    }

    /// Rectangle with elliptical corners; radii are clamped to half the side lengths.
    pub fn add_rounded_rect(&mut self, rect: Rect, rx: f32, ry: f32) {
        let rx = rx.min(rect.width / 2.0).max(0.0);
        let ry = ry.min(rect.height / 2.0).max(0.0);
        if rx <= 0.0 || ry <= 0.0 {
            self.add_rect(rect);
            return;
        }
        let (l, t, r, b) = (rect.left(), rect.top(), rect.right(), rect.bottom());
        let ox = rx * KAPPA;
        let oy = ry * KAPPA;
        self.move_to(l + rx, t);
        self.line_to(r - rx, t);
        self.cubic_to(r - rx + ox, t, r, t + ry - oy, r, t + ry);
        self.line_to(r, b - ry);
        self.cubic_to(r, b - ry + oy, r - rx + ox, b, r - rx, b);
        self.line_to(l + rx, b);
        self.cubic_to(l + rx - ox, b, l, b - ry + oy, l, b - ry);
        self.line_to(l, t + ry);
        self.cubic_to(l, t + ry - oy, l + rx - ox, t, l + rx, t);
        self.close();
    }

    /// Same path with arcs and quadratics lowered to cubics.
    pub fn to_cubics(&self) -> Path {
        let mut out = Path::new();
        for seg in &self.segments {
            match *seg {
                PathSegment::MoveTo { end } => out.move_to(end.x, end.y),
                PathSegment::LineTo { end, .. } => out.line_to(end.x, end.y),
                PathSegment::CubicTo { c1, c2, end, .. } => {
                    out.cubic_to(c1.x, c1.y, c2.x, c2.y, end.x, end.y)
                }
                PathSegment::QuadTo {
                    start,
                    control,
                    end,
                } => {
                    let (c1, c2) = quad_to_cubic(start, control, end);
                    out.cubic_to(c1.x, c1.y, c2.x, c2.y, end.x, end.y);
                }
                PathSegment::ArcTo {
                    start,
                    rx,
                    ry,
                    rotation,
                    large_arc,
                    sweep,
                    end,
                } => {
                    for (c1, c2, to) in arc_to_cubics(start, rx, ry, rotation, large_arc, sweep, end)
                    {
                        match (c1, c2) {
                            (Some(c1), Some(c2)) => out.cubic_to(c1.x, c1.y, c2.x, c2.y, to.x, to.y),
                            _ => out.line_to(to.x, to.y),
                        }
                    }
                }
                PathSegment::Close { .. } => out.close(),
            }
        }
        out
    }

    /// Maps every point through `matrix`. Arcs are lowered to cubics first so
    /// non-uniform transforms stay exact.
    pub fn transform(&self, matrix: &Matrix) -> Path {
        if matrix.is_identity() {
            return self.clone();
        }
        let lowered = self.to_cubics();
        let m = *matrix;
        let mut out = Path::new();
        for seg in &lowered.segments {
            match *seg {
                PathSegment::MoveTo { end } => {
                    let p = m.apply_point(end);
                    out.move_to(p.x, p.y);
                }
                PathSegment::LineTo { end, .. } => {
                    let p = m.apply_point(end);
                    out.line_to(p.x, p.y);
                }
                PathSegment::CubicTo { c1, c2, end, .. } => {
                    let c1 = m.apply_point(c1);
                    let c2 = m.apply_point(c2);
                    let p = m.apply_point(end);
                    out.cubic_to(c1.x, c1.y, c2.x, c2.y, p.x, p.y);
                }
                PathSegment::QuadTo { control, end, .. } => {
                    let c = m.apply_point(control);
                    let p = m.apply_point(end);
                    out.quad_to(c.x, c.y, p.x, p.y);
                }
                PathSegment::ArcTo { end, .. } => {
                    let p = m.apply_point(end);
                    out.line_to(p.x, p.y);
                }
                PathSegment::Close { .. } => out.close(),
            }
        }
        out
    }

    /// Tight bounding box including curve extrema; `None` for an empty path.
    pub fn bounds(&self) -> Option<Rect> {
        if self.segments.is_empty() {
            return None;
        }
        let mut points: Vec<Point> = Vec::with_capacity(self.segments.len() * 2);
        for seg in &self.to_cubics().segments {
            match *seg {
                PathSegment::MoveTo { end } | PathSegment::LineTo { end, .. } => points.push(end),
                PathSegment::CubicTo { start, c1, c2, end } => {
                    points.push(start);
                    points.push(end);
                    for t in cubic_extrema(start, c1, c2, end) {
                        points.push(cubic_point(start, c1, c2, end, t));
                    }
                }
                PathSegment::QuadTo {
                    start,
                    control,
                    end,
                } => {
                    points.push(start);
                    points.push(end);
                    let (c1, c2) = quad_to_cubic(start, control, end);
                    for t in cubic_extrema(start, c1, c2, end) {
                        points.push(cubic_point(start, c1, c2, end, t));
                    }
                }
                PathSegment::ArcTo { end, .. } | PathSegment::Close { end, .. } => points.push(end),
            }
        }
        Rect::from_points(points)
    }

    pub fn to_skia(&self) -> Option<tiny_skia::Path> {
        let mut pb = tiny_skia::PathBuilder::new();
        for seg in &self.to_cubics().segments {
            match *seg {
                PathSegment::MoveTo { end } => pb.move_to(end.x, end.y),
                PathSegment::LineTo { end, .. } => pb.line_to(end.x, end.y),
                PathSegment::CubicTo { c1, c2, end, .. } => {
                    pb.cubic_to(c1.x, c1.y, c2.x, c2.y, end.x, end.y)
                }
                PathSegment::QuadTo { control, end, .. } => {
                    pb.quad_to(control.x, control.y, end.x, end.y)
                }
                PathSegment::ArcTo { end, .. } => pb.line_to(end.x, end.y),
                PathSegment::Close { .. } => pb.close(),
            }
        }
        pb.finish()
    }

    pub fn from_skia(path: &tiny_skia::Path) -> Path {
        let mut out = Path::new();
        for seg in path.segments() {
            match seg {
                tiny_skia::PathSegment::MoveTo(p) => out.move_to(p.x, p.y),
                tiny_skia::PathSegment::LineTo(p) => out.line_to(p.x, p.y),
                tiny_skia::PathSegment::QuadTo(c, p) => out.quad_to(c.x, c.y, p.x, p.y),
                tiny_skia::PathSegment::CubicTo(c1, c2, p) => {
                    out.cubic_to(c1.x, c1.y, c2.x, c2.y, p.x, p.y)
                }
                tiny_skia::PathSegment::Close => out.close(),
            }
        }
        out
    }

    /// Parses SVG path data. Fails on the first malformed command.
    pub fn parse(data: &str) -> Result<Path, SvgError> {
        let (path, error) = parse_path_data(data);
        match error {
            Some(reason) => Err(SvgError::MalformedPathData {
                input: data.to_string(),
                reason,
            }),
            None => Ok(path),
        }
    }

    /// Parses SVG path data, keeping every segment before the first error.
    pub fn parse_lenient(data: &str) -> Path {
        parse_path_data(data).0
    }

    /// Serializes to absolute path data.
    pub fn write(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if !out.is_empty() {
                out.push(' ');
            }
            match *seg {
                PathSegment::MoveTo { end } => {
                    out.push_str(&format!("M {} {}", format_number(end.x), format_number(end.y)))
                }
                PathSegment::LineTo { end, .. } => {
                    out.push_str(&format!("L {} {}", format_number(end.x), format_number(end.y)))
                }
                PathSegment::CubicTo { c1, c2, end, .. } => out.push_str(&format!(
                    "C {} {} {} {} {} {}",
                    format_number(c1.x),
                    format_number(c1.y),
                    format_number(c2.x),
                    format_number(c2.y),
                    format_number(end.x),
                    format_number(end.y)
                )),
                PathSegment::QuadTo { control, end, .. } => out.push_str(&format!(
                    "Q {} {} {} {}",
                    format_number(control.x),
                    format_number(control.y),
                    format_number(end.x),
                    format_number(end.y)
                )),
                PathSegment::ArcTo {
                    rx,
                    ry,
                    rotation,
                    large_arc,
                    sweep,
                    end,
                    ..
                } => out.push_str(&format!(
                    "A {} {} {} {} {} {} {}",
                    format_number(rx),
                    format_number(ry),
                    format_number(rotation),
                    u8::from(large_arc),
                    u8::from(sweep),
                    format_number(end.x),
                    format_number(end.y)
                )),
                PathSegment::Close { .. } => out.push('Z'),
            }
        }
        out
    }
}

/// Shortest decimal text for `value`, trimmed of trailing zeros.
pub(crate) fn format_number(value: f32) -> String {
    if value == value.trunc() && value.abs() < 1e9 {
        return format!("{}", value as i64);
    }
    let mut s = format!("{:.4}", value);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

fn cubic_point(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let c = 3.0 * mt * t * t;
    let d = t * t * t;
    Point::new(
        a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    )
}

/// Parameters in (0, 1) where the cubic's derivative vanishes on either axis.
fn cubic_extrema(p0: Point, p1: Point, p2: Point, p3: Point) -> Vec<f32> {
    let mut out = Vec::new();
    for (v0, v1, v2, v3) in [(p0.x, p1.x, p2.x, p3.x), (p0.y, p1.y, p2.y, p3.y)] {
        let d0 = v1 - v0;
        let d1 = v2 - v1;
        let d2 = v3 - v2;
        let a = d0 - 2.0 * d1 + d2;
        let b = 2.0 * (d1 - d0);
        let c = d0;
        if a.abs() < 1e-9 {
            if b.abs() > 1e-9 {
                out.push(-c / b);
            }
        } else {
            let disc = b * b - 4.0 * a * c;
            if disc >= 0.0 {
                let sq = libm::sqrtf(disc);
                out.push((-b + sq) / (2.0 * a));
                out.push((-b - sq) / (2.0 * a));
            }
        }
    }
    out.retain(|t| *t > 0.0 && *t < 1.0);
    out
}

fn quad_to_cubic(p0: Point, p1: Point, p2: Point) -> (Point, Point) {
    let c1 = Point::new(
        p0.x + (2.0 / 3.0) * (p1.x - p0.x),
        p0.y + (2.0 / 3.0) * (p1.y - p0.y),
    );
    let c2 = Point::new(
        p2.x + (2.0 / 3.0) * (p1.x - p2.x),
        p2.y + (2.0 / 3.0) * (p1.y - p2.y),
    );
    (c1, c2)
}

type CubicPiece = (Option<Point>, Option<Point>, Point);

/// Elliptical arc to cubic pieces via the center parameterization.
/// Degenerate radii produce a single straight piece.
fn arc_to_cubics(
    from: Point,
    rx_in: f32,
    ry_in: f32,
    x_axis_rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    to: Point,
) -> Vec<CubicPiece> {
    use std::f32::consts::PI;

    let (x0, y0, x1, y1) = (from.x, from.y, to.x, to.y);
    let mut rx = rx_in.abs();
    let mut ry = ry_in.abs();
    if rx == 0.0 || ry == 0.0 || (x0 == x1 && y0 == y1) {
        return vec![(None, None, to)];
    }

    let phi = x_axis_rotation_deg.to_radians();
    let sin_phi = libm::sinf(phi);
    let cos_phi = libm::cosf(phi);

    let dx2 = (x0 - x1) / 2.0;
    let dy2 = (y0 - y1) / 2.0;
    let x1p = cos_phi * dx2 + sin_phi * dy2;
    let y1p = -sin_phi * dx2 + cos_phi * dy2;

    let x1p2 = x1p * x1p;
    let y1p2 = y1p * y1p;
    let lambda = (x1p2 / (rx * rx)) + (y1p2 / (ry * ry));
    if lambda > 1.0 {
        let s = libm::sqrtf(lambda);
        rx *= s;
        ry *= s;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p2 - ry2 * x1p2;
    let den = rx2 * y1p2 + ry2 * x1p2;
    let mut coef = 0.0;
    if den != 0.0 {
        let sign = if large_arc == sweep { -1.0 } else { 1.0 };
        coef = sign * libm::sqrtf((num / den).max(0.0));
    }
    let cxp = coef * (rx * y1p / ry);
    let cyp = coef * (-ry * x1p / rx);

    let cx = cos_phi * cxp - sin_phi * cyp + (x0 + x1) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (y0 + y1) / 2.0;

    fn angle(ux: f32, uy: f32, vx: f32, vy: f32) -> f32 {
        let dot = ux * vx + uy * vy;
        let det = ux * vy - uy * vx;
        libm::atan2f(det, dot)
    }

    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;

    let mut theta1 = angle(1.0, 0.0, ux, uy);
    let mut dtheta = angle(ux, uy, vx, vy);
    if !sweep && dtheta > 0.0 {
        dtheta -= 2.0 * PI;
    } else if sweep && dtheta < 0.0 {
        dtheta += 2.0 * PI;
    }

    let count = libm::ceilf(dtheta.abs() / (PI / 2.0)).max(1.0) as i32;
    let delta = dtheta / count as f32;
    let map = |x: f32, y: f32| -> Point {
        let x = rx * x;
        let y = ry * y;
        Point::new(cx + cos_phi * x - sin_phi * y, cy + sin_phi * x + cos_phi * y)
    };

    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let t1 = theta1;
        let t2 = theta1 + delta;
        let k = (4.0 / 3.0) * libm::tanf((t2 - t1) / 4.0);
        let (s1, c1) = (libm::sinf(t1), libm::cosf(t1));
        let (s2, c2) = (libm::sinf(t2), libm::cosf(t2));
        let p1 = map(c1 - k * s1, s1 + k * c1);
        let p2 = map(c2 + k * s2, s2 - k * c2);
        // Land exactly on the requested endpoint.
        let end = if i == count - 1 { to } else { map(c2, s2) };
        out.push((Some(p1), Some(p2), end));
        theta1 = t2;
    }
    out
}

/// Returns the parsed prefix and, on failure, the reason parsing stopped.
fn parse_path_data(data: &str) -> (Path, Option<String>) {
    let mut path = Path::new();
    let mut p = PathDataParser::new(data);
    let mut cmd: Option<u8> = None;
    let mut last_cubic_ctrl2: Option<Point> = None;
    let mut last_quad_ctrl: Option<Point> = None;

    loop {
        p.skip_ws();
        let Some(b) = p.peek() else { break };
        if b.is_ascii_alphabetic() {
            p.i += 1;
            if !b"MmLlHhVvCcSsQqTtAaZz".contains(&b) {
                return (path, Some(format!("unknown command '{}'", b as char)));
            }
            if cmd.is_none() && !matches!(b, b'M' | b'm') {
                return (path, Some("path data must start with a moveto".to_string()));
            }
            cmd = Some(b);
        } else {
            match cmd {
                None => return (path, Some("expected a command".to_string())),
                Some(b'Z' | b'z') => {
                    return (path, Some("closepath takes no arguments".to_string()));
                }
                _ => {}
            }
        }
        let Some(c) = cmd else { break };
        let rel = c.is_ascii_lowercase();
        let cur = path.current_point();
        let offset = |x: f32, y: f32| -> Point {
            if rel {
                Point::new(cur.x + x, cur.y + y)
            } else {
                Point::new(x, y)
            }
        };

        match c.to_ascii_uppercase() {
            b'M' => {
                let Some((x, y)) = p.next_pair() else {
                    return (path, Some("moveto expects a coordinate pair".to_string()));
                };
                let pt = offset(x, y);
                path.move_to(pt.x, pt.y);
                // Subsequent implicit pairs are linetos.
                cmd = Some(if rel { b'l' } else { b'L' });
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            b'L' => {
                let Some((x, y)) = p.next_pair() else {
                    return (path, Some("lineto expects a coordinate pair".to_string()));
                };
                let pt = offset(x, y);
                path.line_to(pt.x, pt.y);
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            b'H' => {
                let Some(x) = p.next_number() else {
                    return (path, Some("horizontal lineto expects a number".to_string()));
                };
                let x = if rel { cur.x + x } else { x };
                path.line_to(x, cur.y);
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            b'V' => {
                let Some(y) = p.next_number() else {
                    return (path, Some("vertical lineto expects a number".to_string()));
                };
                let y = if rel { cur.y + y } else { y };
                path.line_to(cur.x, y);
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            b'C' => {
                let (Some((x1, y1)), Some((x2, y2)), Some((x, y))) =
                    (p.next_pair(), p.next_pair(), p.next_pair())
                else {
                    return (path, Some("curveto expects three coordinate pairs".to_string()));
                };
                let c1 = offset(x1, y1);
                let c2 = offset(x2, y2);
                let end = offset(x, y);
                path.cubic_to(c1.x, c1.y, c2.x, c2.y, end.x, end.y);
                last_cubic_ctrl2 = Some(c2);
                last_quad_ctrl = None;
            }
            b'S' => {
                let (Some((x2, y2)), Some((x, y))) = (p.next_pair(), p.next_pair()) else {
                    return (
                        path,
                        Some("smooth curveto expects two coordinate pairs".to_string()),
                    );
                };
                let c1 = match last_cubic_ctrl2 {
                    Some(prev) => Point::new(2.0 * cur.x - prev.x, 2.0 * cur.y - prev.y),
                    None => cur,
                };
                let c2 = offset(x2, y2);
                let end = offset(x, y);
                path.cubic_to(c1.x, c1.y, c2.x, c2.y, end.x, end.y);
                last_cubic_ctrl2 = Some(c2);
                last_quad_ctrl = None;
            }
            b'Q' => {
                let (Some((x1, y1)), Some((x, y))) = (p.next_pair(), p.next_pair()) else {
                    return (
                        path,
                        Some("quadratic curveto expects two coordinate pairs".to_string()),
                    );
                };
                let ctrl = offset(x1, y1);
                let end = offset(x, y);
                path.quad_to(ctrl.x, ctrl.y, end.x, end.y);
                last_quad_ctrl = Some(ctrl);
                last_cubic_ctrl2 = None;
            }
            b'T' => {
                let Some((x, y)) = p.next_pair() else {
                    return (
                        path,
                        Some("smooth quadratic curveto expects a coordinate pair".to_string()),
                    );
                };
                let ctrl = match last_quad_ctrl {
                    Some(prev) => Point::new(2.0 * cur.x - prev.x, 2.0 * cur.y - prev.y),
                    None => cur,
                };
                let end = offset(x, y);
                path.quad_to(ctrl.x, ctrl.y, end.x, end.y);
                last_quad_ctrl = Some(ctrl);
                last_cubic_ctrl2 = None;
            }
            b'A' => {
                let (Some(rx), Some(ry), Some(rot), Some(large), Some(sweep), Some((x, y))) = (
                    p.next_number(),
                    p.next_number(),
                    p.next_number(),
                    p.next_flag(),
                    p.next_flag(),
                    p.next_pair(),
                ) else {
                    return (path, Some("arc expects seven arguments".to_string()));
                };
                let end = offset(x, y);
                path.arc_to(rx, ry, rot, large, sweep, end.x, end.y);
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            b'Z' => {
                path.close();
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            _ => return (path, Some(format!("unknown command '{}'", c as char))),
        }
    }

    (path, None)
}

struct PathDataParser<'a> {
    bytes: &'a [u8],
    i: usize,
}

impl<'a> PathDataParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.i).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if matches!(b, b' ' | b'\n' | b'\r' | b'\t' | b',') {
                self.i += 1;
            } else {
                break;
            }
        }
    }

    fn next_number(&mut self) -> Option<f32> {
        self.skip_ws();
        let start = self.i;
        let mut has = false;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.i += 1;
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.i += 1;
            has = true;
        }
        if self.peek() == Some(b'.') {
            self.i += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.i += 1;
                has = true;
            }
        }
        if has && matches!(self.peek(), Some(b'e' | b'E')) {
            let mark = self.i;
            self.i += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.i += 1;
            }
            let digits_start = self.i;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.i += 1;
            }
            if self.i == digits_start {
                self.i = mark;
            }
        }
        if !has {
            self.i = start;
            return None;
        }
        let s = std::str::from_utf8(&self.bytes[start..self.i]).ok()?;
        s.parse::<f32>().ok()
    }

    /// Arc flags may be packed without separators (`a5 5 0 01 20 20`).
    fn next_flag(&mut self) -> Option<bool> {
        self.skip_ws();
        match self.peek()? {
            b'0' => {
                self.i += 1;
                Some(false)
            }
            b'1' => {
                self.i += 1;
                Some(true)
            }
            _ => None,
        }
    }

    fn next_pair(&mut self) -> Option<(f32, f32)> {
        let x = self.next_number()?;
        let y = self.next_number()?;
        Some((x, y))
    }
}
