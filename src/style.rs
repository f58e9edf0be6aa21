use lightningcss::printer::PrinterOptions;
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, StyleAttribute, StyleSheet};
use lightningcss::traits::ToCss;

use crate::attributes::{
    is_inherited, property_def, Axis, AttributeValue, Length, LengthContext, Unit,
    DEFAULT_FONT_SIZE,
};
use crate::document::{Document, NodeId};
use crate::paint::Paint;
use crate::shapes::ElementKind;
use crate::types::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Specificity(pub u16, pub u16, pub u16);

#[derive(Debug, Clone, PartialEq)]
struct SimpleSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

/// Descendant-combinator chain of simple selectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    parts: Vec<SimpleSelector>,
    pub specificity: Specificity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    pub selector: Selector,
    pub declarations: Vec<Declaration>,
    pub order: usize,
}

/// Rules collected from `<style>` elements and caller-supplied CSS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    rules: Vec<StyleRule>,
}

impl Stylesheet {
    pub fn parse(css: &str) -> Self {
        Self::parse_all([css])
    }

    pub fn parse_all<'a>(sources: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Stylesheet::default();
        let mut order = 0usize;
        for css in sources {
            let css = css.trim();
            if css.is_empty() {
                continue;
            }
            let Ok(sheet) = StyleSheet::parse(css, ParserOptions::default()) else {
                continue;
            };
            collect_style_rules(sheet.rules, &mut out.rules, &mut order);
        }
        out
    }

    pub fn rules(&self) -> &[StyleRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules matching `node`, lowest precedence first.
    pub fn matching_rules(&self, doc: &Document, node: NodeId) -> Vec<&StyleRule> {
        let mut matched: Vec<&StyleRule> = self
            .rules
            .iter()
            .filter(|rule| selector_matches(doc, node, &rule.selector))
            .collect();
        matched.sort_by(|a, b| {
            a.selector
                .specificity
                .cmp(&b.selector.specificity)
                .then(a.order.cmp(&b.order))
        });
        matched
    }
}

fn collect_style_rules(rules: CssRuleList, out: &mut Vec<StyleRule>, order: &mut usize) {
    for rule in rules.0 {
        match rule {
            CssRule::Style(style_rule) => {
                let selectors = style_rule
                    .selectors
                    .to_css_string(PrinterOptions::default())
                    .unwrap_or_default();
                let declarations = style_rule
                    .declarations
                    .to_css_string(PrinterOptions::default())
                    .unwrap_or_default();
                let declarations = parse_declarations(&declarations);
                if declarations.is_empty() {
                    *order += 1;
                    continue;
                }
                for selector_raw in selectors.split(',') {
                    if let Some(selector) = parse_selector(selector_raw) {
                        out.push(StyleRule {
                            selector,
                            declarations: declarations.clone(),
                            order: *order,
                        });
                    }
                }
                *order += 1;
            }
            CssRule::Media(media) => collect_style_rules(media.rules, out, order),
            _ => {}
        }
    }
}

/// Parses a declaration block (`fill: red; stroke: blue !important`).
pub fn parse_declarations(input: &str) -> Vec<Declaration> {
    let mut out = Vec::new();
    if let Ok(style_attr) = StyleAttribute::parse(input, ParserOptions::default()) {
        for (props, important) in [
            (&style_attr.declarations.declarations, false),
            (&style_attr.declarations.important_declarations, true),
        ] {
            for prop in props {
                let Ok(value) = prop.value_to_css_string(PrinterOptions::default()) else {
                    continue;
                };
                out.push(Declaration {
                    name: prop.property_id().name().to_string(),
                    value,
                    important,
                });
            }
        }
    }
    if out.is_empty() && input.contains(':') {
        return parse_declarations_legacy(input);
    }
    out
}

fn parse_declarations_legacy(input: &str) -> Vec<Declaration> {
    let mut out = Vec::new();
    for decl in input.split(';') {
        let Some((key, value)) = decl.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let mut value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let important = value.to_ascii_lowercase().contains("!important");
        if important {
            value = value
                .rsplit_once('!')
                .map(|(v, _)| v.trim())
                .unwrap_or(value);
        }
        out.push(Declaration {
            name: key.to_ascii_lowercase(),
            value: value.to_string(),
            important,
        });
    }
    out
}

fn parse_selector(raw: &str) -> Option<Selector> {
    let selector = raw.trim();
    if selector.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    let mut spec = Specificity::default();
    for token in selector.split_whitespace() {
        let part = parse_simple_selector(token)?;
        if part.id.is_some() {
            spec.0 += 1;
        }
        spec.1 += part.classes.len() as u16;
        if part.tag.is_some() {
            spec.2 += 1;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return None;
    }
    Some(Selector {
        parts,
        specificity: spec,
    })
}

fn parse_simple_selector(token: &str) -> Option<SimpleSelector> {
    if token.is_empty() || token.contains([':', '[', ']', '>', '+', '~']) {
        return None;
    }
    let bytes = token.as_bytes();
    let len = bytes.len();
    let mut i = 0usize;
    let mut tag = None;
    let mut id = None;
    let mut classes = Vec::new();

    if bytes[0] == b'*' {
        i = 1;
    } else if is_ident_start(bytes[0]) {
        i += 1;
        while i < len && is_ident_char(bytes[i]) {
            i += 1;
        }
        tag = Some(token[..i].to_string());
    }

    while i < len {
        let marker = bytes[i];
        i += 1;
        let start = i;
        while i < len && is_ident_char(bytes[i]) {
            i += 1;
        }
        if start == i {
            return None;
        }
        let name = token[start..i].to_string();
        match marker {
            b'.' => classes.push(name),
            b'#' if id.is_none() => id = Some(name),
            _ => return None,
        }
    }

    if tag.is_none() && id.is_none() && classes.is_empty() && bytes[0] != b'*' {
        return None;
    }
    Some(SimpleSelector { tag, id, classes })
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, b'_' | b'-')
}

fn simple_selector_matches(doc: &Document, node: NodeId, selector: &SimpleSelector) -> bool {
    let Some(el) = doc.element(node) else {
        return false;
    };
    if let Some(tag) = &selector.tag {
        if !el.tag().eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &selector.id {
        if el.id() != Some(id.as_str()) {
            return false;
        }
    }
    if !selector.classes.is_empty() {
        let class_attr = el
            .attribute("class")
            .map(AttributeValue::to_text)
            .unwrap_or_default();
        for class_name in &selector.classes {
            if !class_attr.split_whitespace().any(|c| c == class_name) {
                return false;
            }
        }
    }
    true
}

fn selector_matches(doc: &Document, node: NodeId, selector: &Selector) -> bool {
    let Some(last) = selector.parts.last() else {
        return false;
    };
    if !simple_selector_matches(doc, node, last) {
        return false;
    }
    let mut anchor = doc.parent(node);
    for part in selector.parts.iter().rev().skip(1) {
        let mut probe = anchor;
        let mut matched = None;
        while let Some(candidate) = probe {
            if simple_selector_matches(doc, candidate, part) {
                matched = Some(candidate);
                break;
            }
            probe = doc.parent(candidate);
        }
        let Some(candidate) = matched else {
            return false;
        };
        anchor = doc.parent(candidate);
    }
    true
}

impl Document {
    /// The value specified directly on `node` for `name`, before inheritance.
    ///
    /// Precedence, highest first: important inline style, important
    /// stylesheet rules, inline style, stylesheet rules (by specificity then
    /// source order), presentation attribute.
    pub fn specified_value(&self, node: NodeId, name: &str) -> Option<AttributeValue> {
        let el = self.element(node)?;
        let inline = el
            .attribute("style")
            .map(|style| parse_declarations(&style.to_text()))
            .unwrap_or_default();
        let find_inline = |important: bool| {
            inline
                .iter()
                .rev()
                .find(|d| d.name == name && d.important == important)
                .map(|d| d.value.clone())
        };

        let mut sheet_normal: Option<String> = None;
        let mut sheet_important: Option<String> = None;
        if !self.stylesheet().is_empty() {
            for rule in self.stylesheet().matching_rules(self, node) {
                for decl in rule.declarations.iter().filter(|d| d.name == name) {
                    if decl.important {
                        sheet_important = Some(decl.value.clone());
                    } else {
                        sheet_normal = Some(decl.value.clone());
                    }
                }
            }
        }

        let from_css = find_inline(true)
            .or(sheet_important)
            .or_else(|| find_inline(false))
            .or(sheet_normal);
        if let Some(text) = from_css {
            return AttributeValue::parse(name, &text).ok();
        }
        el.attribute(name).cloned()
    }

    /// Effective value of a property: the specified value, else the nearest
    /// ancestor's for inherited properties (or explicit `inherit`), else the
    /// initial value. Unknown properties with no value resolve to `None`.
    pub fn resolve(&self, node: NodeId, name: &str) -> Option<AttributeValue> {
        let inherited = is_inherited(name);
        let mut current = Some(node);
        while let Some(n) = current {
            match self.specified_value(n, name) {
                Some(AttributeValue::Inherit) => current = self.parent(n),
                Some(value) => return Some(value),
                None if inherited => current = self.parent(n),
                None => break,
            }
        }
        default_value(name)
    }

    pub fn resolve_keyword(&self, node: NodeId, name: &str) -> String {
        self.resolve(node, name)
            .map(|v| v.to_text().trim().to_string())
            .unwrap_or_default()
    }

    pub fn resolve_number(&self, node: NodeId, name: &str) -> f32 {
        self.resolve(node, name)
            .and_then(|v| v.as_number())
            .or_else(|| default_value(name).and_then(|v| v.as_number()))
            .unwrap_or(0.0)
    }

    /// Paint with `currentColor` replaced by the resolved `color`.
    pub fn resolve_paint(&self, node: NodeId, name: &str) -> Paint {
        let paint = match self.resolve(node, name) {
            Some(AttributeValue::Paint(p)) => p,
            _ => Paint::None,
        };
        match paint {
            Paint::CurrentColor => Paint::Color(self.current_color(node)),
            Paint::Server { id, fallback } => Paint::Server {
                id,
                fallback: fallback.map(|f| match *f {
                    Paint::CurrentColor => Box::new(Paint::Color(self.current_color(node))),
                    other => Box::new(other),
                }),
            },
            other => other,
        }
    }

    fn current_color(&self, node: NodeId) -> Color {
        match self.resolve(node, "color") {
            Some(AttributeValue::Paint(Paint::Color(c))) => c,
            _ => Color::BLACK,
        }
    }

    /// Resolved length property in user units.
    pub fn resolve_length(&self, node: NodeId, name: &str, axis: Axis) -> f32 {
        let ctx = self.length_context(node);
        self.resolve(node, name)
            .and_then(|v| v.as_length())
            .or_else(|| default_value(name).and_then(|v| v.as_length()))
            .map(|l| l.to_user(&ctx, axis))
            .unwrap_or(0.0)
    }

    /// Geometry attribute (not cascaded) in user units.
    pub fn length_attribute(&self, node: NodeId, name: &str, axis: Axis, default: f32) -> f32 {
        match self.attribute(node, name).and_then(AttributeValue::as_length) {
            Some(length) => length.to_user(&self.length_context(node), axis),
            None => default,
        }
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn font_size(&self, node: NodeId) -> f32 {
        let parent_size = self
            .parent(node)
            .map(|p| self.font_size(p))
            .unwrap_or(DEFAULT_FONT_SIZE);
        let specified = match self.specified_value(node, "font-size") {
            Some(AttributeValue::Inherit) | None => return parent_size,
            Some(value) => value,
        };
        let Some(length) = specified.as_length() else {
            return parent_size;
        };
        match length.unit {
            Unit::Em => length.value * parent_size,
            Unit::Ex => length.value * parent_size / 2.0,
            Unit::Percent => length.value / 100.0 * parent_size,
            _ => length.to_user(&LengthContext::default(), Axis::Other),
        }
    }

    /// Viewport size and font size used to resolve relative lengths on `node`.
    pub fn length_context(&self, node: NodeId) -> LengthContext {
        let mut ctx = LengthContext {
            font_size: self.font_size(node),
            ..LengthContext::default()
        };
        let viewport_owner = self
            .ancestors(node)
            .into_iter()
            .find(|n| self.kind(*n) == Some(ElementKind::Svg));
        if let Some(owner) = viewport_owner {
            let (w, h) = self.viewport_size(owner);
            ctx.viewport_width = w;
            ctx.viewport_height = h;
        }
        ctx
    }

    /// User-space size established by an `svg` element: its `viewBox` if
    /// present, else its `width`/`height`.
    pub fn viewport_size(&self, svg: NodeId) -> (f32, f32) {
        if let Some(vb) = self.view_box(svg) {
            return (vb.width, vb.height);
        }
        let fallback = LengthContext::default();
        let w = self
            .attribute(svg, "width")
            .and_then(AttributeValue::as_length)
            .filter(|l| l.unit != Unit::Percent)
            .map(|l| l.to_user(&fallback, Axis::Horizontal))
            .unwrap_or(fallback.viewport_width);
        let h = self
            .attribute(svg, "height")
            .and_then(AttributeValue::as_length)
            .filter(|l| l.unit != Unit::Percent)
            .map(|l| l.to_user(&fallback, Axis::Vertical))
            .unwrap_or(fallback.viewport_height);
        (w, h)
    }

    pub fn view_box(&self, svg: NodeId) -> Option<crate::types::Rect> {
        let raw = self.attribute(svg, "viewBox")?.to_text();
        let nums = crate::attributes::parse_number_list(&raw);
        match nums.as_slice() {
            [x, y, w, h] if *w > 0.0 && *h > 0.0 => {
                Some(crate::types::Rect::new(*x, *y, *w, *h))
            }
            _ => None,
        }
    }

    pub fn is_visible(&self, node: NodeId) -> bool {
        !matches!(
            self.resolve_keyword(node, "visibility").as_str(),
            "hidden" | "collapse"
        )
    }

    pub fn is_displayable(&self, node: NodeId) -> bool {
        self.specified_value(node, "display")
            .map(|v| v.to_text().trim() != "none")
            .unwrap_or(true)
    }
}

fn default_value(name: &str) -> Option<AttributeValue> {
    let def = property_def(name)?;
    Some(
        AttributeValue::parse(name, def.default)
            .unwrap_or_else(|_| AttributeValue::Text(def.default.to_string())),
    )
}

/// Initial value of a known property as a length, for callers that need a
/// number without a document.
pub fn default_length(name: &str) -> Option<Length> {
    default_value(name).and_then(|v| v.as_length())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_chain() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let root = doc.root();
        let group = doc.create_element("g");
        let circle = doc.create_element("circle");
        doc.append_child(root, group).expect("group");
        doc.append_child(group, circle).expect("circle");
        (doc, group, circle)
    }

    fn red() -> AttributeValue {
        AttributeValue::Paint(Paint::Color(Color::rgb(1.0, 0.0, 0.0)))
    }

    #[test]
    fn inherited_properties_follow_the_parent() {
        let (mut doc, group, circle) = doc_with_chain();
        doc.set_attribute(group, "fill", "red").expect("fill");
        assert_eq!(doc.resolve(circle, "fill"), doc.resolve(group, "fill"));
        assert_eq!(doc.resolve(circle, "fill"), Some(red()));

        doc.set_attribute(circle, "fill", "blue").expect("fill");
        assert_eq!(
            doc.resolve(circle, "fill"),
            Some(AttributeValue::Paint(Paint::Color(Color::rgb(0.0, 0.0, 1.0))))
        );
    }

    #[test]
    fn explicit_inherit_reaches_past_non_inherited_defaults() {
        let (mut doc, group, circle) = doc_with_chain();
        doc.set_attribute(group, "opacity", "0.5").expect("opacity");
        assert_eq!(doc.resolve_number(circle, "opacity"), 1.0);
        doc.set_attribute(circle, "opacity", "inherit").expect("inherit");
        assert_eq!(doc.resolve_number(circle, "opacity"), 0.5);
    }

    #[test]
    fn defaults_and_unknown_properties() {
        let (doc, _, circle) = doc_with_chain();
        assert_eq!(
            doc.resolve(circle, "fill"),
            Some(AttributeValue::Paint(Paint::Color(Color::BLACK)))
        );
        assert_eq!(doc.resolve(circle, "stroke"), Some(AttributeValue::Paint(Paint::None)));
        assert_eq!(doc.resolve_number(circle, "stroke-miterlimit"), 4.0);
        assert_eq!(doc.resolve(circle, "no-such-property"), None);
    }

    #[test]
    fn stylesheet_rules_order_by_specificity_then_source() {
        let (mut doc, group, circle) = doc_with_chain();
        doc.set_attribute(circle, "class", "dot").expect("class");
        doc.set_attribute(circle, "id", "c1").expect("id");
        doc.add_stylesheet("#c1 { fill: red } .dot { fill: blue } circle { fill: green }");
        assert_eq!(doc.resolve(circle, "fill"), Some(red()));

        doc.add_stylesheet("g circle.dot { stroke: blue } .dot { stroke: red }");
        assert_eq!(
            doc.resolve_paint(circle, "stroke"),
            Paint::Color(Color::rgb(0.0, 0.0, 1.0))
        );
        assert_eq!(doc.resolve_paint(group, "stroke"), Paint::None);
    }

    #[test]
    fn inline_style_beats_rules_and_presentation_attributes() {
        let (mut doc, _, circle) = doc_with_chain();
        doc.set_attribute(circle, "fill", "green").expect("fill");
        doc.set_attribute(circle, "class", "dot").expect("class");
        doc.add_stylesheet(".dot { fill: blue }");
        assert_eq!(
            doc.resolve_paint(circle, "fill"),
            Paint::Color(Color::rgb(0.0, 0.0, 1.0))
        );
        doc.set_attribute(circle, "style", "fill: red").expect("style");
        assert_eq!(doc.resolve(circle, "fill"), Some(red()));

        doc.add_stylesheet(".dot { fill: yellow !important }");
        assert_eq!(
            doc.resolve_paint(circle, "fill"),
            Paint::Color(Color::rgb(1.0, 1.0, 0.0))
        );
    }

    #[test]
    fn style_elements_feed_the_cascade() {
        let (mut doc, _, circle) = doc_with_chain();
        let root = doc.root();
        let style = doc.create_element("style");
        let css = doc.create_content("circle { stroke-width: 3 }");
        doc.append_child(style, css).expect("css");
        doc.append_child(root, style).expect("style");
        assert_eq!(doc.resolve_length(circle, "stroke-width", Axis::Other), 3.0);
        doc.remove_child(root, style).expect("remove");
        assert_eq!(doc.resolve_length(circle, "stroke-width", Axis::Other), 1.0);
    }

    #[test]
    fn current_color_uses_color_property() {
        let (mut doc, group, circle) = doc_with_chain();
        doc.set_attribute(group, "color", "red").expect("color");
        doc.set_attribute(circle, "fill", "currentColor").expect("fill");
        assert_eq!(doc.resolve_paint(circle, "fill"), Paint::Color(Color::rgb(1.0, 0.0, 0.0)));
    }

    #[test]
    fn relative_lengths_use_viewport_and_font_size() {
        let (mut doc, group, circle) = doc_with_chain();
        let root = doc.root();
        doc.set_attribute(root, "viewBox", "0 0 200 50").expect("viewBox");
        doc.set_attribute(group, "font-size", "20").expect("font-size");
        doc.set_attribute(circle, "cx", "50%").expect("cx");
        doc.set_attribute(circle, "r", "2em").expect("r");
        assert_eq!(doc.length_attribute(circle, "cx", Axis::Horizontal, 0.0), 100.0);
        assert_eq!(doc.length_attribute(circle, "r", Axis::Other, 0.0), 40.0);
    }

    #[test]
    fn legacy_declarations_split_on_semicolons() {
        let decls = parse_declarations_legacy("fill: red; stroke: blue !important;");
        assert_eq!(decls.len(), 2);
        assert!(decls[1].important);
        assert_eq!(decls[1].value, "blue");
    }
}
