use std::collections::HashMap;

use tiny_skia::{Pixmap, PixmapPaint, Transform};

use crate::attributes::{parse_number_list, AttributeValue};
use crate::document::{Document, NodeId};
use crate::error::SvgError;
use crate::paint::Paint;
use crate::raster::to_sk_color;
use crate::shapes::ElementKind;
use crate::types::Color;

pub const SOURCE_GRAPHIC: &str = "SourceGraphic";
pub const SOURCE_ALPHA: &str = "SourceAlpha";

/// Largest accepted blur deviation in device pixels. Clamped edges make any
/// wider kernel equivalent to a flat average over the surface.
pub const MAX_STD_DEVIATION: f32 = 8192.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlurType {
    #[default]
    Both,
    HorizontalOnly,
    VerticalOnly,
}

/// Box-weighted separable blur with an integer kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianBlur {
    std_deviation: f32,
    blur_type: BlurType,
    kernel: Vec<i64>,
    kernel_sum: i64,
}

impl GaussianBlur {
    pub fn new(std_deviation: f32, blur_type: BlurType) -> Result<Self, SvgError> {
        if !std_deviation.is_finite() || std_deviation <= 0.0 {
            return Err(SvgError::InvalidFilterParameter(format!(
                "stdDeviation must be greater than 0, got {std_deviation}"
            )));
        }
        if std_deviation > MAX_STD_DEVIATION {
            return Err(SvgError::InvalidFilterParameter(format!(
                "stdDeviation {std_deviation} exceeds {MAX_STD_DEVIATION}"
            )));
        }
        let size = (std_deviation * 2.0 + 1.0) as usize;
        let mut kernel = vec![0i64; size];
        let mut i = 1usize;
        while i as f32 <= std_deviation {
            let near = (std_deviation - i as f32) as usize;
            let far = (std_deviation + i as f32) as usize;
            let weight = ((near + 1) * (near + 1)) as i64;
            kernel[near] = weight;
            kernel[far] = weight;
            i += 1;
        }
        kernel[std_deviation as usize] = ((std_deviation + 1.0) * (std_deviation + 1.0)) as i64;
        let kernel_sum = kernel.iter().sum();
        Ok(Self {
            std_deviation,
            blur_type,
            kernel,
            kernel_sum,
        })
    }

    pub fn std_deviation(&self) -> f32 {
        self.std_deviation
    }

    pub fn blur_type(&self) -> BlurType {
        self.blur_type
    }

    pub fn kernel(&self) -> &[i64] {
        &self.kernel
    }

    /// Horizontal pass then vertical pass; edges clamp to the nearest pixel.
    pub fn apply(&self, src: &Pixmap) -> Result<Pixmap, SvgError> {
        let (w, h) = (src.width() as usize, src.height() as usize);
        let input = src.data();
        let offset = |i: usize| (i as f32 - self.std_deviation) as i64;

        let mut horizontal = input.to_vec();
        if self.blur_type != BlurType::VerticalOnly {
            for y in 0..h {
                let row = y * w;
                for x in 0..w {
                    let mut sums = [0i64; 4];
                    let mut read = offset(x);
                    for weight in &self.kernel {
                        let px = read.clamp(0, w as i64 - 1) as usize;
                        let base = (row + px) * 4;
                        for (c, sum) in sums.iter_mut().enumerate() {
                            *sum += weight * input[base + c] as i64;
                        }
                        read += 1;
                    }
                    let out = (row + x) * 4;
                    for (c, sum) in sums.iter().enumerate() {
                        horizontal[out + c] = (sum / self.kernel_sum) as u8;
                    }
                }
            }
        }

        let mut output = horizontal.clone();
        if self.blur_type != BlurType::HorizontalOnly {
            for y in 0..h {
                for x in 0..w {
                    let mut sums = [0i64; 4];
                    let mut read = offset(y);
                    for weight in &self.kernel {
                        let py = read.clamp(0, h as i64 - 1) as usize;
                        let base = (py * w + x) * 4;
                        for (c, sum) in sums.iter_mut().enumerate() {
                            *sum += weight * horizontal[base + c] as i64;
                        }
                        read += 1;
                    }
                    let out = (y * w + x) * 4;
                    for (c, sum) in sums.iter().enumerate() {
                        output[out + c] = (sum / self.kernel_sum) as u8;
                    }
                }
            }
        }

        let mut pixmap = blank_like(src)?;
        pixmap.data_mut().copy_from_slice(&output);
        Ok(pixmap)
    }
}

/// `feColorMatrix` operation, applied to unpremultiplied channels.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorMatrix {
    Matrix([f32; 20]),
    Saturate(f32),
    HueRotate(f32),
    LuminanceToAlpha,
}

impl ColorMatrix {
    #[rustfmt::skip]
    pub fn coefficients(&self) -> [f32; 20] {
        match *self {
            ColorMatrix::Matrix(m) => m,
            ColorMatrix::Saturate(s) => [
                0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s, 0.0, 0.0,
                0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s, 0.0, 0.0,
                0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
            ColorMatrix::HueRotate(deg) => {
                let rad = deg.to_radians();
                let (sin, cos) = (libm::sinf(rad), libm::cosf(rad));
                [
                    0.213 + cos * 0.787 - sin * 0.213,
                    0.715 - cos * 0.715 - sin * 0.715,
                    0.072 - cos * 0.072 + sin * 0.928,
                    0.0,
                    0.0,
                    0.213 - cos * 0.213 + sin * 0.143,
                    0.715 + cos * 0.285 + sin * 0.140,
                    0.072 - cos * 0.072 - sin * 0.283,
                    0.0,
                    0.0,
                    0.213 - cos * 0.213 - sin * 0.787,
                    0.715 - cos * 0.715 + sin * 0.715,
                    0.072 + cos * 0.928 + sin * 0.072,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                    1.0,
                    0.0,
                ]
            }
            ColorMatrix::LuminanceToAlpha => [
                0.0, 0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 0.0, 0.0,
                0.2125, 0.7154, 0.0721, 0.0, 0.0,
            ],
        }
    }

    pub fn apply(&self, src: &Pixmap) -> Result<Pixmap, SvgError> {
        let m = self.coefficients();
        let mut out = blank_like(src)?;
        for (s, d) in src.pixels().iter().zip(out.pixels_mut().iter_mut()) {
            let c = s.demultiply();
            let v = [
                c.red() as f32 / 255.0,
                c.green() as f32 / 255.0,
                c.blue() as f32 / 255.0,
                c.alpha() as f32 / 255.0,
            ];
            let row = |r: usize| {
                let k = &m[r * 5..r * 5 + 5];
                (k[0] * v[0] + k[1] * v[1] + k[2] * v[2] + k[3] * v[3] + k[4]).clamp(0.0, 1.0)
            };
            let color = tiny_skia::ColorU8::from_rgba(
                (row(0) * 255.0).round() as u8,
                (row(1) * 255.0).round() as u8,
                (row(2) * 255.0).round() as u8,
                (row(3) * 255.0).round() as u8,
            );
            *d = color.premultiply();
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// One or two passes; unequal deviations run one pass per axis.
    GaussianBlur(Vec<GaussianBlur>),
    /// Device-pixel displacement.
    Offset { dx: f32, dy: f32 },
    Flood { color: Color },
    /// Inputs composited in order; `None` means the previous result.
    Merge { inputs: Vec<Option<String>> },
    ColorMatrix(ColorMatrix),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterStep {
    pub primitive: Primitive,
    pub input: Option<String>,
    pub result: Option<String>,
}

/// Primitives of one `filter` element, resolved for a device scale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterProgram {
    pub steps: Vec<FilterStep>,
}

/// Named rasters shared by the primitives of one filter run.
#[derive(Default)]
pub struct ImageBuffer {
    buffers: HashMap<String, Pixmap>,
}

impl ImageBuffer {
    pub fn new(source: Pixmap) -> Self {
        let mut alpha = source.clone();
        for px in alpha.pixels_mut() {
            *px = tiny_skia::PremultipliedColorU8::from_rgba(0, 0, 0, px.alpha())
                .unwrap_or(tiny_skia::PremultipliedColorU8::TRANSPARENT);
        }
        let mut buffers = HashMap::new();
        buffers.insert(SOURCE_GRAPHIC.to_string(), source);
        buffers.insert(SOURCE_ALPHA.to_string(), alpha);
        Self { buffers }
    }

    pub fn get(&self, name: &str) -> Result<&Pixmap, SvgError> {
        self.buffers.get(name).ok_or_else(|| {
            SvgError::InvalidFilterParameter(format!("unknown filter input '{name}'"))
        })
    }

    pub fn insert(&mut self, name: String, image: Pixmap) {
        self.buffers.insert(name, image);
    }

    pub fn take(&mut self, name: &str) -> Option<Pixmap> {
        self.buffers.remove(name)
    }
}

impl FilterProgram {
    /// Runs every step over `source` and returns the last result.
    pub fn apply(&self, source: Pixmap) -> Result<Pixmap, SvgError> {
        let mut buffer = ImageBuffer::new(source);
        let mut previous = SOURCE_GRAPHIC.to_string();
        for (index, step) in self.steps.iter().enumerate() {
            let input_name = step.input.clone().unwrap_or_else(|| previous.clone());
            let output = match &step.primitive {
                Primitive::GaussianBlur(passes) => {
                    let mut image = buffer.get(&input_name)?.clone();
                    for pass in passes {
                        image = pass.apply(&image)?;
                    }
                    image
                }
                Primitive::Offset { dx, dy } => offset(buffer.get(&input_name)?, *dx, *dy)?,
                Primitive::Flood { color } => {
                    let mut image = blank_like(buffer.get(SOURCE_GRAPHIC)?)?;
                    image.fill(to_sk_color(*color));
                    image
                }
                Primitive::Merge { inputs } => {
                    let mut image = blank_like(buffer.get(SOURCE_GRAPHIC)?)?;
                    for input in inputs {
                        let name = input.as_deref().unwrap_or(previous.as_str());
                        let layer = buffer.get(name)?;
                        image.draw_pixmap(
                            0,
                            0,
                            layer.as_ref(),
                            &PixmapPaint::default(),
                            Transform::identity(),
                            None,
                        );
                    }
                    image
                }
                Primitive::ColorMatrix(matrix) => matrix.apply(buffer.get(&input_name)?)?,
            };
            let name = step
                .result
                .clone()
                .unwrap_or_else(|| format!("__step{index}"));
            buffer.insert(name.clone(), output);
            previous = name;
        }
        buffer.take(&previous).ok_or_else(|| {
            SvgError::InvalidFilterParameter(format!("filter result '{previous}' missing"))
        })
    }
}

fn blank_like(src: &Pixmap) -> Result<Pixmap, SvgError> {
    Pixmap::new(src.width(), src.height())
        .ok_or_else(|| SvgError::Raster("cannot allocate filter buffer".to_string()))
}

fn offset(src: &Pixmap, dx: f32, dy: f32) -> Result<Pixmap, SvgError> {
    let (dx, dy) = (dx.round() as i64, dy.round() as i64);
    let (w, h) = (src.width() as i64, src.height() as i64);
    let mut out = blank_like(src)?;
    let from = src.pixels();
    let to = out.pixels_mut();
    for y in 0..h {
        let sy = y - dy;
        if sy < 0 || sy >= h {
            continue;
        }
        for x in 0..w {
            let sx = x - dx;
            if sx < 0 || sx >= w {
                continue;
            }
            to[(y * w + x) as usize] = from[(sy * w + sx) as usize];
        }
    }
    Ok(out)
}

fn text_attr(doc: &Document, node: NodeId, name: &str) -> Option<String> {
    doc.attribute(node, name)
        .map(AttributeValue::to_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn number_attr(doc: &Document, node: NodeId, name: &str, default: f32) -> f32 {
    doc.attribute(node, name)
        .and_then(AttributeValue::as_number)
        .unwrap_or(default)
}

impl Document {
    /// Builds the primitive list of a `filter` element. Lengths are scaled by
    /// `scale` (device pixels per user unit).
    pub fn filter_program(&self, filter: NodeId, scale: f32) -> Result<FilterProgram, SvgError> {
        if self.kind(filter) != Some(ElementKind::Filter) {
            return Err(SvgError::MissingReferencedElement(format!(
                "node {} is not a filter",
                filter.raw()
            )));
        }
        let mut program = FilterProgram::default();
        for child in self.children(filter) {
            let child = *child;
            let Some(kind) = self.kind(child) else {
                continue;
            };
            let primitive = match kind {
                ElementKind::FeGaussianBlur => {
                    let raw = text_attr(self, child, "stdDeviation").unwrap_or_default();
                    let values = parse_number_list(&raw);
                    let (sx, sy) = match values.as_slice() {
                        [s] => (*s, *s),
                        [sx, sy] => (*sx, *sy),
                        _ => {
                            return Err(SvgError::InvalidFilterParameter(format!(
                                "invalid stdDeviation '{raw}'"
                            )));
                        }
                    };
                    let passes = if sx == sy {
                        vec![GaussianBlur::new(sx * scale, BlurType::Both)?]
                    } else if sx < 0.0 || sy < 0.0 || (sx == 0.0 && sy == 0.0) {
                        return Err(SvgError::InvalidFilterParameter(format!(
                            "invalid stdDeviation '{raw}'"
                        )));
                    } else {
                        let mut passes = Vec::new();
                        if sx > 0.0 {
                            passes.push(GaussianBlur::new(sx * scale, BlurType::HorizontalOnly)?);
                        }
                        if sy > 0.0 {
                            passes.push(GaussianBlur::new(sy * scale, BlurType::VerticalOnly)?);
                        }
                        passes
                    };
                    Primitive::GaussianBlur(passes)
                }
                ElementKind::FeOffset => Primitive::Offset {
                    dx: number_attr(self, child, "dx", 0.0) * scale,
                    dy: number_attr(self, child, "dy", 0.0) * scale,
                },
                ElementKind::FeFlood => {
                    let color = match self.resolve_paint(child, "flood-color") {
                        Paint::Color(c) => c,
                        _ => Color::BLACK,
                    };
                    let opacity = self.resolve_number(child, "flood-opacity").clamp(0.0, 1.0);
                    Primitive::Flood {
                        color: color.with_opacity(opacity),
                    }
                }
                ElementKind::FeMerge => Primitive::Merge {
                    inputs: self
                        .children(child)
                        .iter()
                        .filter(|n| self.kind(**n) == Some(ElementKind::FeMergeNode))
                        .map(|n| text_attr(self, *n, "in"))
                        .collect(),
                },
                ElementKind::FeColorMatrix => Primitive::ColorMatrix(self.color_matrix(child)?),
                _ => continue,
            };
            program.steps.push(FilterStep {
                primitive,
                input: text_attr(self, child, "in"),
                result: text_attr(self, child, "result"),
            });
        }
        Ok(program)
    }

    fn color_matrix(&self, node: NodeId) -> Result<ColorMatrix, SvgError> {
        let values = text_attr(self, node, "values").map(|raw| parse_number_list(&raw));
        let kind = text_attr(self, node, "type").unwrap_or_else(|| "matrix".to_string());
        match kind.as_str() {
            "matrix" => match values {
                None => Ok(ColorMatrix::Saturate(1.0)),
                Some(v) => {
                    let m: [f32; 20] = v.as_slice().try_into().map_err(|_| {
                        SvgError::InvalidFilterParameter(format!(
                            "feColorMatrix matrix needs 20 values, got {}",
                            v.len()
                        ))
                    })?;
                    Ok(ColorMatrix::Matrix(m))
                }
            },
            "saturate" => Ok(ColorMatrix::Saturate(
                values.and_then(|v| v.first().copied()).unwrap_or(1.0),
            )),
            "hueRotate" => Ok(ColorMatrix::HueRotate(
                values.and_then(|v| v.first().copied()).unwrap_or(0.0),
            )),
            "luminanceToAlpha" => Ok(ColorMatrix::LuminanceToAlpha),
            other => Err(SvgError::InvalidFilterParameter(format!(
                "unknown feColorMatrix type '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixmap_with(w: u32, h: u32, paint: impl Fn(u32, u32) -> [u8; 4]) -> Pixmap {
        let mut pixmap = Pixmap::new(w, h).expect("pixmap");
        for y in 0..h {
            for x in 0..w {
                let [r, g, b, a] = paint(x, y);
                pixmap.pixels_mut()[(y * w + x) as usize] =
                    tiny_skia::PremultipliedColorU8::from_rgba(r, g, b, a).expect("premultiplied");
            }
        }
        pixmap
    }

    fn alpha_at(p: &Pixmap, x: u32, y: u32) -> u8 {
        p.pixel(x, y).expect("pixel").alpha()
    }

    #[test]
    fn kernel_weights_are_symmetric_squares() {
        let blur = GaussianBlur::new(2.0, BlurType::Both).expect("blur");
        assert_eq!(blur.kernel(), &[1, 4, 9, 4, 1]);
        let fractional = GaussianBlur::new(1.5, BlurType::Both).expect("blur");
        assert_eq!(fractional.kernel(), &[1, 6, 1, 0]);
    }

    #[test]
    fn non_positive_deviation_is_rejected() {
        for sd in [0.0, -1.0, f32::NAN] {
            assert!(matches!(
                GaussianBlur::new(sd, BlurType::Both),
                Err(SvgError::InvalidFilterParameter(_))
            ));
        }
    }

    #[test]
    fn oversized_deviation_is_rejected_without_allocating() {
        for sd in [1.0e11, MAX_STD_DEVIATION * 2.0] {
            assert!(matches!(
                GaussianBlur::new(sd, BlurType::Both),
                Err(SvgError::InvalidFilterParameter(_))
            ));
        }
        let widest = GaussianBlur::new(MAX_STD_DEVIATION, BlurType::HorizontalOnly).expect("limit");
        assert_eq!(widest.kernel().len(), MAX_STD_DEVIATION as usize * 2 + 1);
    }

    #[test]
    fn uniform_images_are_unchanged_thanks_to_edge_clamping() {
        let src = pixmap_with(6, 4, |_, _| [40, 80, 120, 200]);
        let out = GaussianBlur::new(2.0, BlurType::Both)
            .expect("blur")
            .apply(&src)
            .expect("apply");
        assert_eq!(out.data(), src.data());
    }

    #[test]
    fn single_axis_blur_spreads_along_one_axis() {
        let src = pixmap_with(5, 5, |x, y| if x == 2 && y == 2 { [0, 0, 0, 255] } else { [0; 4] });
        let h = GaussianBlur::new(1.0, BlurType::HorizontalOnly)
            .expect("blur")
            .apply(&src)
            .expect("apply");
        assert!(alpha_at(&h, 1, 2) > 0);
        assert_eq!(alpha_at(&h, 2, 1), 0);

        let v = GaussianBlur::new(1.0, BlurType::VerticalOnly)
            .expect("blur")
            .apply(&src)
            .expect("apply");
        assert!(alpha_at(&v, 2, 1) > 0);
        assert_eq!(alpha_at(&v, 1, 2), 0);

        let both = GaussianBlur::new(1.0, BlurType::Both)
            .expect("blur")
            .apply(&src)
            .expect("apply");
        assert!(alpha_at(&both, 1, 1) > 0);
        assert!(alpha_at(&both, 2, 2) < 255);
    }

    #[test]
    fn offset_merge_and_named_buffers() {
        let src = pixmap_with(4, 4, |x, y| if x == 0 && y == 0 { [255, 0, 0, 255] } else { [0; 4] });
        let program = FilterProgram {
            steps: vec![
                FilterStep {
                    primitive: Primitive::Offset { dx: 2.0, dy: 1.0 },
                    input: Some(SOURCE_ALPHA.to_string()),
                    result: Some("shadow".to_string()),
                },
                FilterStep {
                    primitive: Primitive::Merge {
                        inputs: vec![Some("shadow".to_string()), Some(SOURCE_GRAPHIC.to_string())],
                    },
                    input: None,
                    result: None,
                },
            ],
        };
        let out = program.apply(src).expect("apply");
        let shadow = out.pixel(2, 1).expect("pixel");
        assert_eq!((shadow.red(), shadow.alpha()), (0, 255));
        let original = out.pixel(0, 0).expect("pixel");
        assert_eq!((original.red(), original.alpha()), (255, 255));
    }

    #[test]
    fn unknown_inputs_fail() {
        let program = FilterProgram {
            steps: vec![FilterStep {
                primitive: Primitive::Offset { dx: 1.0, dy: 0.0 },
                input: Some("nowhere".to_string()),
                result: None,
            }],
        };
        let src = Pixmap::new(2, 2).expect("pixmap");
        assert!(matches!(program.apply(src), Err(SvgError::InvalidFilterParameter(_))));
    }

    #[test]
    fn color_matrices() {
        let gray = ColorMatrix::Saturate(0.0).coefficients();
        assert!((gray[0] - 0.213).abs() < 1e-6);
        let identity = ColorMatrix::HueRotate(0.0).coefficients();
        assert!((identity[0] - 1.0).abs() < 1e-5 && identity[1].abs() < 1e-5);

        let src = pixmap_with(1, 1, |_, _| [255, 255, 255, 255]);
        let out = ColorMatrix::LuminanceToAlpha.apply(&src).expect("apply");
        assert_eq!(out.pixel(0, 0).expect("pixel").alpha(), 255);
    }

    #[test]
    fn programs_come_from_filter_children() {
        let mut doc = Document::new();
        let filter = doc.create_element("filter");
        let blur = doc.create_element("feGaussianBlur");
        doc.set_attribute(blur, "stdDeviation", "2 0").expect("sd");
        doc.set_attribute(blur, "result", "soft").expect("result");
        doc.append_child(filter, blur).expect("blur");
        let flood = doc.create_element("feFlood");
        doc.set_attribute(flood, "flood-color", "red").expect("color");
        doc.set_attribute(flood, "flood-opacity", "0.5").expect("opacity");
        doc.append_child(filter, flood).expect("flood");
        let root = doc.root();
        doc.append_child(root, filter).expect("filter");

        let program = doc.filter_program(filter, 2.0).expect("program");
        assert_eq!(program.steps.len(), 2);
        let Primitive::GaussianBlur(passes) = &program.steps[0].primitive else {
            panic!("blur expected");
        };
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].blur_type(), BlurType::HorizontalOnly);
        assert_eq!(passes[0].std_deviation(), 4.0);
        assert_eq!(program.steps[0].result.as_deref(), Some("soft"));
        assert_eq!(
            program.steps[1].primitive,
            Primitive::Flood {
                color: Color::rgba(1.0, 0.0, 0.0, 0.5)
            }
        );

        doc.set_attribute(blur, "stdDeviation", "0").expect("sd");
        assert!(matches!(
            doc.filter_program(filter, 1.0),
            Err(SvgError::InvalidFilterParameter(_))
        ));
    }
}
