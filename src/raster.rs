use base64::Engine;
use tiny_skia::{
    FilterQuality, LinearGradient, Mask, Pixmap, PixmapPaint, RadialGradient, Shader, SpreadMode,
    Stroke, StrokeDash, Transform,
};

use crate::error::SvgError;
use crate::path::Path;
use crate::surface::{
    Brush, ClipRegion, CombineMode, FillRule, GradientStop, LineCap, LineJoin, Pen, SpreadMethod,
    Surface,
};
use crate::types::{Color, Matrix, Rect};

/// Surface drawing into a premultiplied RGBA pixmap.
pub struct RasterSurface {
    pixmap: Pixmap,
    transform: Matrix,
    clip: ClipRegion,
    mask: Option<Mask>,
    smoothing: bool,
}

impl std::fmt::Debug for RasterSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterSurface")
            .field("width", &self.pixmap.width())
            .field("height", &self.pixmap.height())
            .field("transform", &self.transform)
            .field("clip", &self.clip)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Result<Self, SvgError> {
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            SvgError::Raster(format!("invalid surface size {width}x{height}"))
        })?;
        Ok(Self::from_pixmap(pixmap))
    }

    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Self {
            pixmap,
            transform: Matrix::identity(),
            clip: ClipRegion::infinite(),
            mask: None,
            smoothing: true,
        }
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    pub fn into_pixmap(self) -> Pixmap {
        self.pixmap
    }

    pub fn clear(&mut self, color: Color) {
        self.pixmap.fill(to_sk_color(color));
    }

    /// Unpremultiplied color at a device pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        let px = self.pixmap.pixel(x, y)?.demultiply();
        Some(Color::from_rgba8(px.red(), px.green(), px.blue(), px.alpha()))
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, SvgError> {
        self.pixmap
            .encode_png()
            .map_err(|e| SvgError::Raster(format!("png encode failed: {e}")))
    }

    pub fn to_data_uri(&self) -> Result<String, SvgError> {
        let png = self.encode_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }

    fn rebuild_mask(&mut self) {
        if self.clip.is_infinite() {
            self.mask = None;
            return;
        }
        let (w, h) = (self.pixmap.width(), self.pixmap.height());
        let mut combined: Option<Mask> = None;
        for area in self.clip.areas() {
            let Some(mut mask) = Mask::new(w, h) else {
                continue;
            };
            for (path, rule) in &area.parts {
                if let Some(sk) = path.to_skia() {
                    mask.fill_path(&sk, to_sk_fill_rule(*rule), true, Transform::identity());
                }
            }
            combined = Some(match combined {
                None => mask,
                Some(mut acc) => {
                    for (dst, src) in acc.data_mut().iter_mut().zip(mask.data()) {
                        *dst = ((*dst as u16 * *src as u16 + 127) / 255) as u8;
                    }
                    acc
                }
            });
        }
        self.mask = combined.or_else(|| Mask::new(w, h));
    }
}

impl Surface for RasterSurface {
    fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    fn transform(&self) -> Matrix {
        self.transform
    }

    fn set_transform(&mut self, transform: Matrix) {
        self.transform = transform;
    }

    fn clip(&self) -> ClipRegion {
        self.clip.clone()
    }

    fn set_clip(&mut self, region: &ClipRegion, mode: CombineMode) {
        self.clip = match mode {
            CombineMode::Replace => region.clone(),
            CombineMode::Intersect => self.clip.intersect(region),
        };
        self.rebuild_mask();
    }

    fn smoothing(&self) -> bool {
        self.smoothing
    }

    fn set_smoothing(&mut self, enabled: bool) {
        self.smoothing = enabled;
    }

    fn fill_path(&mut self, brush: &Brush, path: &Path, rule: FillRule) -> Result<(), SvgError> {
        let Some(sk) = path.to_skia() else {
            return Ok(());
        };
        let Some(paint) = brush_paint(brush, self.smoothing) else {
            return Ok(());
        };
        self.pixmap.fill_path(
            &sk,
            &paint,
            to_sk_fill_rule(rule),
            self.transform.to_skia(),
            self.mask.as_ref(),
        );
        Ok(())
    }

    fn stroke_path(&mut self, pen: &Pen, path: &Path) -> Result<(), SvgError> {
        let Some(sk) = path.to_skia() else {
            return Ok(());
        };
        let Some(paint) = brush_paint(&pen.brush, self.smoothing) else {
            return Ok(());
        };
        let stroke = build_stroke(pen);
        self.pixmap.stroke_path(
            &sk,
            &paint,
            &stroke,
            self.transform.to_skia(),
            self.mask.as_ref(),
        );
        Ok(())
    }

    fn draw_pixmap(&mut self, pixmap: &Pixmap, x: i32, y: i32) -> Result<(), SvgError> {
        self.pixmap.draw_pixmap(
            x,
            y,
            pixmap.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            self.mask.as_ref(),
        );
        Ok(())
    }

    fn draw_image(&mut self, image: &Pixmap, dest: Rect) -> Result<(), SvgError> {
        if dest.is_empty() || image.width() == 0 || image.height() == 0 {
            return Ok(());
        }
        let placement = self
            .transform
            .mul(Matrix::translate(dest.x, dest.y))
            .mul(Matrix::scale(
                dest.width / image.width() as f32,
                dest.height / image.height() as f32,
            ));
        let paint = PixmapPaint {
            quality: if self.smoothing {
                FilterQuality::Bilinear
            } else {
                FilterQuality::Nearest
            },
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            image.as_ref(),
            &paint,
            placement.to_skia(),
            self.mask.as_ref(),
        );
        Ok(())
    }
}

fn to_sk_fill_rule(rule: FillRule) -> tiny_skia::FillRule {
    match rule {
        FillRule::NonZero => tiny_skia::FillRule::Winding,
        FillRule::EvenOdd => tiny_skia::FillRule::EvenOdd,
    }
}

fn to_spread_mode(spread: SpreadMethod) -> SpreadMode {
    match spread {
        SpreadMethod::Pad => SpreadMode::Pad,
        SpreadMethod::Reflect => SpreadMode::Reflect,
        SpreadMethod::Repeat => SpreadMode::Repeat,
    }
}

fn brush_paint(brush: &Brush, anti_alias: bool) -> Option<tiny_skia::Paint<'static>> {
    let mut paint = tiny_skia::Paint {
        anti_alias,
        ..tiny_skia::Paint::default()
    };
    match brush {
        Brush::Solid(color) => {
            if color.a <= 0.0 {
                return None;
            }
            paint.set_color(to_sk_color(*color));
        }
        Brush::LinearGradient {
            start,
            end,
            stops,
            spread,
            transform,
        } => {
            paint.shader = LinearGradient::new(
                tiny_skia::Point::from_xy(start.x, start.y),
                tiny_skia::Point::from_xy(end.x, end.y),
                sk_stops(stops),
                to_spread_mode(*spread),
                transform.to_skia(),
            )
            .unwrap_or_else(|| last_stop_shader(stops));
        }
        Brush::RadialGradient {
            center,
            focus,
            radius,
            stops,
            spread,
            transform,
        } => {
            paint.shader = RadialGradient::new(
                tiny_skia::Point::from_xy(focus.x, focus.y),
                tiny_skia::Point::from_xy(center.x, center.y),
                *radius,
                sk_stops(stops),
                to_spread_mode(*spread),
                transform.to_skia(),
            )
            .unwrap_or_else(|| last_stop_shader(stops));
        }
    }
    Some(paint)
}

fn last_stop_shader(stops: &[GradientStop]) -> Shader<'static> {
    let color = stops.last().map(|s| s.color).unwrap_or(Color::TRANSPARENT);
    Shader::SolidColor(to_sk_color(color))
}

fn sk_stops(stops: &[GradientStop]) -> Vec<tiny_skia::GradientStop> {
    stops
        .iter()
        .map(|s| tiny_skia::GradientStop::new(s.offset.clamp(0.0, 1.0), to_sk_color(s.color)))
        .collect()
}

fn build_stroke(pen: &Pen) -> Stroke {
    let mut stroke = Stroke {
        width: pen.width.max(0.0),
        miter_limit: pen.miter_limit.max(1.0),
        ..Stroke::default()
    };
    stroke.line_cap = match pen.cap {
        LineCap::Round => tiny_skia::LineCap::Round,
        LineCap::Square => tiny_skia::LineCap::Square,
        LineCap::Butt => tiny_skia::LineCap::Butt,
    };
    stroke.line_join = match pen.join {
        LineJoin::Round => tiny_skia::LineJoin::Round,
        LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
        LineJoin::Miter => tiny_skia::LineJoin::Miter,
    };

    if let Some(dash) = &pen.dash {
        let mut pattern: Vec<f32> = dash
            .array
            .iter()
            .map(|d| (d * pen.width).max(0.0))
            .collect();
        if pattern.len() % 2 == 1 {
            let copy = pattern.clone();
            pattern.extend(copy);
        }
        if pattern.len() >= 2 {
            stroke.dash = StrokeDash::new(pattern, dash.offset * pen.width);
        }
    }
    stroke
}

pub(crate) fn to_sk_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        color.a.clamp(0.0, 1.0),
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

/// Loads an image from a `data:` URI or raw bytes.
pub fn decode_image(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let guessed_format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        Some(_) => None,
        None => image::guess_format(data).ok(),
    };

    let decoded = match guessed_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

/// Splits a `data:` URI into its media type and decoded payload.
pub fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("text/plain")
        .to_string();
    let data = if header.contains(";base64") {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}
