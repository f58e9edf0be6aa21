#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn lerp(self, other: Point, t: f32) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

/// Axis-aligned rectangle in user or device units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const EMPTY: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    /// Smallest rectangle containing every point; `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Option<Rect> {
        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        if !min_x.is_finite() || !min_y.is_finite() || !max_x.is_finite() || !max_y.is_finite() {
            return None;
        }
        Some(Rect::from_ltrb(min_x, min_y, max_x, max_y))
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True when the rectangle has collapsed to a single point.
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 && self.height <= 0.0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_ltrb(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right < left || bottom < top {
            return None;
        }
        Some(Rect::from_ltrb(left, top, right, bottom))
    }

    pub fn inflate(&self, dx: f32, dy: f32) -> Rect {
        Rect::from_ltrb(
            self.left() - dx,
            self.top() - dy,
            self.right() + dx,
            self.bottom() + dy,
        )
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.left(), self.top()),
            Point::new(self.right(), self.top()),
            Point::new(self.right(), self.bottom()),
            Point::new(self.left(), self.bottom()),
        ]
    }

    pub fn approx_eq(&self, other: &Rect, tolerance: f32) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}

/// Non-premultiplied RGBA color, channels in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };

    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    pub fn with_opacity(self, opacity: f32) -> Self {
        Self {
            a: (self.a * opacity).clamp(0.0, 1.0),
            ..self
        }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

/// 2D affine matrix `[a c e; b d f; 0 0 1]`, SVG `matrix(a b c d e f)` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn rotate(deg: f32) -> Self {
        let rad = deg.to_radians();
        let s = libm::sinf(rad);
        let c = libm::cosf(rad);
        Self {
            a: c,
            b: s,
            c: -s,
            d: c,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn rotate_about(deg: f32, cx: f32, cy: f32) -> Self {
        Matrix::translate(cx, cy)
            .mul(Matrix::rotate(deg))
            .mul(Matrix::translate(-cx, -cy))
    }

    /// Raw shear factors: `x' = x + sx*y`, `y' = sy*x + y`.
    pub fn shear(sx: f32, sy: f32) -> Self {
        Self {
            b: sy,
            c: sx,
            ..Self::IDENTITY
        }
    }

    /// Skew by angles in degrees.
    pub fn skew(ax_deg: f32, ay_deg: f32) -> Self {
        Matrix::shear(
            libm::tanf(ax_deg.to_radians()),
            libm::tanf(ay_deg.to_radians()),
        )
    }

    /// `self * other`: `other` is applied to points first.
    pub fn mul(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn apply(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn apply_point(self, p: Point) -> Point {
        let (x, y) = self.apply(p.x, p.y);
        Point::new(x, y)
    }

    pub fn determinant(self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    pub fn is_invertible(self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > f32::EPSILON
    }

    pub fn invert(self) -> Option<Self> {
        if !self.is_invertible() {
            return None;
        }
        let det = self.determinant();
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }

    pub fn is_identity(self) -> bool {
        self.approx_eq(&Matrix::IDENTITY, 1e-6)
    }

    pub fn scale_factor(self) -> f32 {
        libm::sqrtf(self.determinant().abs()).max(0.0)
    }

    /// Bounding box of a transformed rectangle.
    pub fn map_rect(self, rect: &Rect) -> Rect {
        Rect::from_points(rect.corners().into_iter().map(|p| self.apply_point(p)))
            .unwrap_or(Rect::EMPTY)
    }

    pub fn coefficients(self) -> [f32; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    pub fn approx_eq(&self, other: &Matrix, tolerance: f32) -> bool {
        self.coefficients()
            .iter()
            .zip(other.coefficients().iter())
            .all(|(l, r)| (l - r).abs() <= tolerance)
    }

    pub(crate) fn to_skia(self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_mul_applies_right_operand_first() {
        let m = Matrix::translate(10.0, 0.0).mul(Matrix::scale(2.0, 2.0));
        assert_eq!(m.apply(1.0, 1.0), (12.0, 2.0));
    }

    #[test]
    fn rotate_about_keeps_center_fixed() {
        let m = Matrix::rotate_about(90.0, 5.0, 5.0);
        let (x, y) = m.apply(5.0, 5.0);
        assert!((x - 5.0).abs() < 1e-4 && (y - 5.0).abs() < 1e-4);
        let (x, y) = m.apply(10.0, 5.0);
        assert!((x - 5.0).abs() < 1e-4 && (y - 10.0).abs() < 1e-4);
    }

    #[test]
    fn invert_round_trips() {
        let m = Matrix::new(2.0, 0.5, -1.0, 3.0, 4.0, 5.0);
        let inv = m.invert().expect("invertible");
        assert!(m.mul(inv).approx_eq(&Matrix::IDENTITY, 1e-5));
        assert!(Matrix::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn rect_intersect_and_union() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersect(&b), Some(Rect::new(5.0, 5.0, 5.0, 5.0)));
        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 15.0, 15.0));
        assert_eq!(a.intersect(&Rect::new(20.0, 20.0, 1.0, 1.0)), None);
    }

    #[test]
    fn map_rect_bounds_rotated_square() {
        let r = Matrix::rotate(45.0).map_rect(&Rect::new(0.0, 0.0, 1.0, 1.0));
        assert!((r.width - std::f32::consts::SQRT_2).abs() < 1e-4);
    }
}
