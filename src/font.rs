use std::fs;
use std::path::Path;

use ttf_parser::name::name_id;

use crate::error::SvgError;

/// Naming and vertical metrics read from a font file.
#[derive(Debug, Clone, PartialEq)]
pub struct FontInfo {
    pub family: String,
    pub subfamily: String,
    pub full_name: Option<String>,
    pub postscript_name: Option<String>,
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
    pub line_gap: i16,
}

impl FontInfo {
    /// Line height in user units for `font_size`.
    pub fn line_height(&self, font_size: f32) -> f32 {
        if self.units_per_em == 0 {
            return font_size * 1.2;
        }
        let units = self.ascender as f32 - self.descender as f32 + self.line_gap as f32;
        units * font_size / self.units_per_em as f32
    }
}

/// Source of font naming information.
pub trait FontMetricsProvider: Send + Sync {
    fn font_info(&self, data: &[u8], source_name: Option<&str>) -> Result<FontInfo, SvgError>;

    fn font_info_from_file(&self, path: &Path) -> Result<FontInfo, SvgError> {
        let data = fs::read(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str());
        self.font_info(&data, stem)
    }
}

/// Reads TrueType/OpenType `name` and `hhea` tables with `ttf-parser`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtfMetricsProvider;

impl FontMetricsProvider for TtfMetricsProvider {
    fn font_info(&self, data: &[u8], source_name: Option<&str>) -> Result<FontInfo, SvgError> {
        let face = ttf_parser::Face::parse(data, 0).map_err(|e| {
            SvgError::Load(format!(
                "invalid font data for {}: {e}",
                source_name.unwrap_or("font")
            ))
        })?;
        let entries = face
            .names()
            .into_iter()
            .filter_map(|entry| entry.to_string().map(|name| (entry.name_id, name)));
        let names = pick_names(entries, source_name);
        Ok(FontInfo {
            family: names.family,
            subfamily: names.subfamily,
            full_name: names.full_name,
            postscript_name: names.postscript_name,
            units_per_em: face.units_per_em(),
            ascender: face.ascender(),
            descender: face.descender(),
            line_gap: face.line_gap(),
        })
    }
}

struct Names {
    family: String,
    subfamily: String,
    full_name: Option<String>,
    postscript_name: Option<String>,
}

/// First decodable entry per name id; typographic names win over legacy ones.
fn pick_names(entries: impl Iterator<Item = (u16, String)>, source_name: Option<&str>) -> Names {
    let mut typographic_family = None;
    let mut family = None;
    let mut typographic_subfamily = None;
    let mut subfamily = None;
    let mut full_name = None;
    let mut postscript_name = None;

    for (id, name) in entries {
        let slot = match id {
            name_id::TYPOGRAPHIC_FAMILY => &mut typographic_family,
            name_id::FAMILY => &mut family,
            name_id::TYPOGRAPHIC_SUBFAMILY => &mut typographic_subfamily,
            name_id::SUBFAMILY => &mut subfamily,
            name_id::FULL_NAME => &mut full_name,
            name_id::POST_SCRIPT_NAME => &mut postscript_name,
            _ => continue,
        };
        if slot.is_none() && !name.trim().is_empty() {
            *slot = Some(name);
        }
    }

    let family = typographic_family
        .or(family)
        .or_else(|| full_name.clone())
        .or_else(|| postscript_name.clone())
        .or_else(|| source_name.map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());
    Names {
        family,
        subfamily: typographic_subfamily
            .or(subfamily)
            .unwrap_or_else(|| "Regular".to_string()),
        full_name,
        postscript_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typographic_names_take_precedence() {
        let names = pick_names(
            vec![
                (name_id::FAMILY, "Example Sans Light".to_string()),
                (name_id::SUBFAMILY, "Regular".to_string()),
                (name_id::TYPOGRAPHIC_FAMILY, "Example Sans".to_string()),
                (name_id::TYPOGRAPHIC_SUBFAMILY, "Light".to_string()),
                (name_id::POST_SCRIPT_NAME, "ExampleSans-Light".to_string()),
                (name_id::FAMILY, "Ignored Duplicate".to_string()),
            ]
            .into_iter(),
            None,
        );
        assert_eq!(names.family, "Example Sans");
        assert_eq!(names.subfamily, "Light");
        assert_eq!(names.postscript_name.as_deref(), Some("ExampleSans-Light"));
        assert_eq!(names.full_name, None);
    }

    #[test]
    fn missing_names_fall_back_to_source_and_regular() {
        let names = pick_names(std::iter::empty(), Some("Handwriting"));
        assert_eq!(names.family, "Handwriting");
        assert_eq!(names.subfamily, "Regular");
    }

    #[test]
    fn invalid_font_data_is_a_load_error() {
        let err = TtfMetricsProvider
            .font_info(b"not a font", Some("broken"))
            .expect_err("garbage must not parse");
        assert!(matches!(err, SvgError::Load(ref m) if m.contains("broken")));
    }

    #[test]
    fn line_height_scales_with_units_per_em() {
        let info = FontInfo {
            family: "A".to_string(),
            subfamily: "Regular".to_string(),
            full_name: None,
            postscript_name: None,
            units_per_em: 1000,
            ascender: 800,
            descender: -200,
            line_gap: 100,
        };
        assert!((info.line_height(10.0) - 11.0).abs() < 1e-4);
    }
}
