//! SVG document model with a CSS cascade, id registry, transform and path
//! geometry, and a renderer that drives a pluggable drawing surface.
//!
//! ```no_run
//! use svgdraw::{Document, RenderOptions};
//!
//! let doc = Document::parse_str(r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
//!     <circle cx="10" cy="10" r="8" fill="teal"/>
//! </svg>"#)?;
//! let (pixmap, report) = doc.render_to_pixmap(20, 20, &RenderOptions::default())?;
//! assert!(report.is_clean());
//! # let _ = pixmap;
//! # Ok::<(), svgdraw::SvgError>(())
//! ```

mod attributes;
mod debug;
mod document;
mod error;
mod filter;
mod font;
mod loader;
mod paint;
mod parse;
mod path;
mod raster;
mod recording;
mod registry;
mod render;
mod shapes;
mod style;
mod surface;
mod transform;
mod types;

pub use attributes::{
    AttributeStore, AttributeValue, Axis, DEFAULT_FONT_SIZE, DPI, Length, LengthContext,
    PropertyDef, PropertyKind, Unit, is_inherited, property_def,
};
pub use debug::DebugLogger;
pub use document::{Document, DocumentEvent, Element, InsertOptions, NodeData, NodeId};
pub use error::SvgError;
pub use filter::{
    BlurType, ColorMatrix, FilterProgram, FilterStep, GaussianBlur, ImageBuffer,
    MAX_STD_DEVIATION, Primitive, SOURCE_ALPHA, SOURCE_GRAPHIC,
};
pub use font::{FontInfo, FontMetricsProvider, TtfMetricsProvider};
#[cfg(feature = "http")]
pub use loader::HttpLoader;
pub use loader::{
    DefaultLoader, FileLoader, ReferenceLoader, ResolvedReference, fetch_bytes, resolve_url,
};
pub use paint::{Coord, Gradient, GradientShape, GradientUnits, Paint, parse_color};
pub use parse::{ParseOptions, TreeBuilder, TreeEvent, substitute_entities, tree_events};
pub use path::{Path, PathSegment};
pub use raster::{RasterSurface, decode_image, parse_data_uri};
pub use recording::{Command, RecordingSurface};
pub use registry::{AssignedId, IdRegistry, normalize_reference, split_external_reference};
pub use render::{RenderOptions, RenderReport, RenderWarning, Renderer, dash_pattern, render_batch};
pub use shapes::{ElementKind, Geometry, GeometryMode};
pub use style::{
    Declaration, Selector, Specificity, StyleRule, Stylesheet, default_length, parse_declarations,
};
pub use surface::{
    Brush, ClipArea, ClipRegion, CombineMode, DashPattern, FillRule, GradientStop, LineCap,
    LineJoin, Pen, SpreadMethod, Surface,
};
pub use tiny_skia::Pixmap;
pub use transform::{TRANSFORM_TOLERANCE, Transform, TransformList, parse_transform_list};
pub use types::{Color, Matrix, Point, Rect};
