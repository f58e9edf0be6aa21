//! XML front end: turns SVG text into a [`Document`].
//!
//! Parsing runs in two stages. `roxmltree` tokenizes the text into a flat
//! stream of [`TreeEvent`]s, then [`TreeBuilder`] replays the stream through
//! the ordinary tree mutation API so ids, styles and geometry caches are set
//! up exactly as for programmatic construction.

use std::collections::HashMap;

use url::Url;

use crate::document::{Document, InsertOptions, NodeId};
use crate::error::SvgError;

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Base for relative references; also stored on the document.
    pub base_uri: Option<Url>,
    /// Entity table substituted into the text before tokenizing.
    pub entities: HashMap<String, String>,
    /// Rename conflicting ids instead of failing.
    pub auto_rename_ids: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            base_uri: None,
            entities: HashMap::new(),
            auto_rename_ids: true,
        }
    }
}

/// Tree-construction event.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    Start {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    End,
}

/// Replaces `&name;` for every entry of `entities`.
pub fn substitute_entities(text: &str, entities: &HashMap<String, String>) -> String {
    if entities.is_empty() || !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let replaced = after.find(';').and_then(|semi| {
            let name = &after[..semi];
            entities.get(name).map(|value| (value, semi))
        });
        match replaced {
            Some((value, semi)) => {
                out.push_str(value);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Tokenizes `text` into tree events. Whitespace-only text, comments and
/// processing instructions are dropped.
pub fn tree_events(text: &str) -> Result<Vec<TreeEvent>, SvgError> {
    let mut options = roxmltree::ParsingOptions::default();
    options.allow_dtd = true;
    let xml = roxmltree::Document::parse_with_options(text, options)?;
    let mut events = Vec::new();
    push_events(xml.root_element(), &mut events);
    Ok(events)
}

fn push_events(node: roxmltree::Node<'_, '_>, out: &mut Vec<TreeEvent>) {
    let attributes = node
        .attributes()
        .map(|a| (qualified_name(a.namespace(), a.name()), a.value().to_string()))
        .collect();
    out.push(TreeEvent::Start {
        tag: node.tag_name().name().to_string(),
        attributes,
    });
    for child in node.children() {
        if child.is_element() {
            push_events(child, out);
        } else if child.is_text() {
            let text = child.text().unwrap_or_default();
            if !text.trim().is_empty() {
                out.push(TreeEvent::Text(text.to_string()));
            }
        }
    }
    out.push(TreeEvent::End);
}

fn qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(XLINK_NS) => format!("xlink:{name}"),
        Some(XML_NS) => format!("xml:{name}"),
        _ => name.to_string(),
    }
}

/// Builds a document from [`TreeEvent`]s.
///
/// The first `Start` event creates the root; every later element is attached
/// to its parent as soon as it starts, so its id is registered in document
/// order.
#[derive(Debug)]
pub struct TreeBuilder {
    doc: Option<Document>,
    stack: Vec<NodeId>,
    insert: InsertOptions,
    base_uri: Option<Url>,
    entities: HashMap<String, String>,
}

impl TreeBuilder {
    pub fn new(options: &ParseOptions) -> Self {
        Self {
            doc: None,
            stack: Vec::new(),
            insert: InsertOptions {
                auto_rename: options.auto_rename_ids,
                auto_fix_children: options.auto_rename_ids,
            },
            base_uri: options.base_uri.clone(),
            entities: options.entities.clone(),
        }
    }

    pub fn handle(&mut self, event: TreeEvent) -> Result<(), SvgError> {
        match event {
            TreeEvent::Start { tag, attributes } => self.start(&tag, &attributes),
            TreeEvent::Text(text) => {
                let (doc, parent) = self.open()?;
                let content = doc.create_content(&text);
                doc.append_child(parent, content)
            }
            TreeEvent::End => {
                self.stack
                    .pop()
                    .ok_or_else(|| SvgError::Xml("unbalanced end of element".to_string()))?;
                Ok(())
            }
        }
    }

    fn start(&mut self, tag: &str, attributes: &[(String, String)]) -> Result<(), SvgError> {
        if self.doc.is_none() {
            let mut doc = Document::with_root(tag);
            doc.set_base_uri(self.base_uri.clone());
            doc.set_entities(self.entities.clone());
            let root = doc.root();
            for (name, value) in attributes {
                if name == "id" {
                    doc.set_id(root, Some(value.as_str()), self.insert.auto_rename)?;
                } else {
                    doc.set_attribute(root, name, value)?;
                }
            }
            self.stack.push(root);
            self.doc = Some(doc);
            return Ok(());
        }
        let parent = *self
            .stack
            .last()
            .ok_or_else(|| SvgError::Xml("more than one root element".to_string()))?;
        let doc = self
            .doc
            .as_mut()
            .ok_or_else(|| SvgError::Xml("no root element".to_string()))?;
        let node = doc.create_element(tag);
        for (name, value) in attributes {
            doc.set_attribute(node, name, value)?;
        }
        let index = doc.children(parent).len();
        doc.insert_child(parent, index, node, self.insert)?;
        self.stack.push(node);
        Ok(())
    }

    fn open(&mut self) -> Result<(&mut Document, NodeId), SvgError> {
        let parent = *self
            .stack
            .last()
            .ok_or_else(|| SvgError::Xml("text outside the root element".to_string()))?;
        let doc = self
            .doc
            .as_mut()
            .ok_or_else(|| SvgError::Xml("text before the root element".to_string()))?;
        Ok((doc, parent))
    }

    pub fn finish(self) -> Result<Document, SvgError> {
        if !self.stack.is_empty() {
            return Err(SvgError::Xml("unclosed elements at end of input".to_string()));
        }
        let mut doc = self
            .doc
            .ok_or_else(|| SvgError::Xml("no root element".to_string()))?;
        doc.drain_events();
        Ok(doc)
    }
}

impl Document {
    pub fn parse_str(text: &str) -> Result<Document, SvgError> {
        Self::parse_with(text, &ParseOptions::default())
    }

    pub fn parse_with(text: &str, options: &ParseOptions) -> Result<Document, SvgError> {
        let text = substitute_entities(text, &options.entities);
        let mut builder = TreeBuilder::new(options);
        for event in tree_events(&text)? {
            builder.handle(event)?;
        }
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::Paint;
    use crate::types::Color;

    #[test]
    fn event_stream_follows_document_order() {
        let events = tree_events(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><!-- c --><g id="a"><rect/></g>
            <text>hi</text></svg>"#,
        )
        .expect("events");
        let starts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                TreeEvent::Start { tag, .. } => Some(tag.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, ["svg", "g", "rect", "text"]);
        assert!(events.contains(&TreeEvent::Text("hi".to_string())));
        let ends = events.iter().filter(|e| **e == TreeEvent::End).count();
        assert_eq!(ends, 4, "one End per Start");
    }

    #[test]
    fn builds_tree_with_ids_and_namespaced_href() {
        let doc = Document::parse_str(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink"
                 width="10" height="10">
                <circle id="dot" r="2"/>
                <use xlink:href="#dot" x="3"/>
            </svg>"##,
        )
        .expect("parse");
        let dot = doc.get_element_by_id("dot").expect("registered id");
        assert_eq!(doc.tag(dot), Some("circle"));
        let uses = doc.get_elements_by_tag("use");
        assert_eq!(uses.len(), 1);
        assert_eq!(doc.href_target(uses[0]), Some(dot));
    }

    #[test]
    fn duplicate_ids_follow_auto_rename_option() {
        let text = r#"<svg xmlns="http://www.w3.org/2000/svg"><g id="a"/><g id="a"/></svg>"#;
        let doc = Document::parse_str(text).expect("auto rename");
        assert!(doc.get_element_by_id("a").is_some());
        assert!(doc.get_element_by_id("a#1").is_some());

        let strict = ParseOptions {
            auto_rename_ids: false,
            ..ParseOptions::default()
        };
        assert!(matches!(
            Document::parse_with(text, &strict),
            Err(SvgError::DuplicateId(_))
        ));
    }

    #[test]
    fn root_id_is_validated_like_any_other() {
        let text = r#"<svg xmlns="http://www.w3.org/2000/svg" id="1"><rect id="1"/></svg>"#;
        let doc = Document::parse_str(text).expect("auto rename");
        assert_eq!(doc.get_element_by_id("id1"), Some(doc.root()));
        assert_eq!(doc.element(doc.root()).and_then(|el| el.id()), Some("id1"));
        let rect = doc.get_elements_by_tag("rect")[0];
        assert_eq!(doc.element(rect).and_then(|el| el.id()), Some("id1#1"));

        let strict = ParseOptions {
            auto_rename_ids: false,
            ..ParseOptions::default()
        };
        assert!(matches!(
            Document::parse_with(text, &strict),
            Err(SvgError::InvalidIdFormat(_))
        ));
    }

    #[test]
    fn entities_are_substituted_before_tokenizing() {
        let mut entities = HashMap::new();
        entities.insert("ink".to_string(), "#ff0000".to_string());
        assert_eq!(
            substitute_entities("fill=&ink; &amp; &other;", &entities),
            "fill=#ff0000 &amp; &other;"
        );
        let options = ParseOptions {
            entities,
            ..ParseOptions::default()
        };
        let doc = Document::parse_with(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><rect id="r" fill="&ink;"/></svg>"#,
            &options,
        )
        .expect("parse");
        let rect = doc.get_element_by_id("r").expect("rect");
        assert_eq!(
            doc.resolve_paint(rect, "fill"),
            Paint::Color(Color::rgb(1.0, 0.0, 0.0))
        );
        assert_eq!(doc.entities().get("ink").map(String::as_str), Some("#ff0000"));
    }

    #[test]
    fn style_elements_feed_the_cascade() {
        let doc = Document::parse_str(
            r#"<svg xmlns="http://www.w3.org/2000/svg">
                <style>.hot { fill: #00ff00 }</style>
                <rect id="r" class="hot" fill="blue"/>
                <rect id="s" class="hot" style="fill: black"/>
            </svg>"#,
        )
        .expect("parse");
        let r = doc.get_element_by_id("r").expect("r");
        let s = doc.get_element_by_id("s").expect("s");
        assert_eq!(doc.resolve_paint(r, "fill"), Paint::Color(Color::rgb(0.0, 1.0, 0.0)));
        assert_eq!(doc.resolve_paint(s, "fill"), Paint::Color(Color::BLACK));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(Document::parse_str("<svg><g></svg>"), Err(SvgError::Xml(_))));
        assert!(matches!(
            Document::parse_str(r#"<svg xmlns="http://www.w3.org/2000/svg"><g transform="spin(3)"/></svg>"#),
            Err(SvgError::MalformedTransform { .. })
        ));
        let mut builder = TreeBuilder::new(&ParseOptions::default());
        assert!(builder.handle(TreeEvent::End).is_err());
    }

    #[test]
    fn base_uri_is_kept_on_the_document() {
        let options = ParseOptions {
            base_uri: Some(Url::parse("file:///art/a.svg").expect("url")),
            ..ParseOptions::default()
        };
        let doc = Document::parse_with(r#"<svg xmlns="http://www.w3.org/2000/svg"/>"#, &options)
            .expect("parse");
        assert_eq!(doc.base_uri().map(Url::as_str), Some("file:///art/a.svg"));
    }
}
