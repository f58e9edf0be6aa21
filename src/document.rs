use std::cell::RefCell;
use std::collections::HashMap;

use crate::attributes::{AttributeStore, AttributeValue};
use crate::debug::DebugLogger;
use crate::error::SvgError;
use crate::path::Path;
use crate::registry::IdRegistry;
use crate::shapes::ElementKind;
use crate::style::Stylesheet;
use crate::transform::TransformList;

/// Stable handle of a node inside its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a subtree's ids are reconciled with the registry on insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Rename the inserted element's own id on conflict instead of failing.
    pub auto_rename: bool,
    /// Rename ids of the inserted element's descendants on conflict.
    pub auto_fix_children: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            auto_rename: true,
            auto_fix_children: true,
        }
    }
}

impl InsertOptions {
    pub fn strict() -> Self {
        Self {
            auto_rename: false,
            auto_fix_children: false,
        }
    }
}

/// Notifications produced by tree mutations, drained with [`Document::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    IdAdded {
        node: NodeId,
        id: String,
    },
    IdRemoved {
        node: NodeId,
        id: String,
    },
    IdChanged {
        node: NodeId,
        old: String,
        new: String,
    },
    AttributeChanged {
        node: NodeId,
        name: String,
        value: Option<String>,
    },
}

impl DocumentEvent {
    fn log(&self, logger: &DebugLogger) {
        match self {
            DocumentEvent::IdAdded { node, id } => logger.log_event(
                "svg.id_added",
                &[("node", &node.raw().to_string()), ("id", id)],
            ),
            DocumentEvent::IdRemoved { node, id } => logger.log_event(
                "svg.id_removed",
                &[("node", &node.raw().to_string()), ("id", id)],
            ),
            DocumentEvent::IdChanged { node, old, new } => logger.log_event(
                "svg.id_changed",
                &[("node", &node.raw().to_string()), ("old", old), ("new", new)],
            ),
            DocumentEvent::AttributeChanged { node, name, value } => logger.log_event(
                "svg.attribute_changed",
                &[
                    ("node", &node.raw().to_string()),
                    ("name", name),
                    ("value", value.as_deref().unwrap_or("")),
                ],
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GeometryCache {
    pub(crate) path: Option<Path>,
    pub(crate) dirty: bool,
}

impl Default for GeometryCache {
    fn default() -> Self {
        Self {
            path: None,
            dirty: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    tag: String,
    kind: ElementKind,
    attributes: AttributeStore,
    id: Option<String>,
    transforms: TransformList,
    children: Vec<NodeId>,
    pub(crate) geometry: RefCell<GeometryCache>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            kind: ElementKind::from_tag(tag),
            attributes: AttributeStore::new(),
            id: None,
            transforms: TransformList::new(),
            children: Vec::new(),
            geometry: RefCell::new(GeometryCache::default()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn transforms(&self) -> &TransformList {
        &self.transforms
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn mark_dirty(&self) {
        self.geometry.borrow_mut().dirty = true;
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Element(Element),
    /// Text or CDATA payload; immutable and childless.
    Content(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    data: NodeData,
}

/// Element tree with its id registry, stylesheet and parse context.
///
/// Nodes live in an arena and are addressed by [`NodeId`]. A node removed from
/// the tree stays in the arena, detached, and can be inserted again.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    registry: IdRegistry,
    base_uri: Option<url::Url>,
    entities: HashMap<String, String>,
    stylesheet: Stylesheet,
    extra_css: Vec<String>,
    events: Vec<DocumentEvent>,
    logger: Option<DebugLogger>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document whose root is an `svg` element.
    pub fn new() -> Self {
        Self::with_root("svg")
    }

    pub fn with_root(tag: &str) -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                data: NodeData::Element(Element::new(tag)),
            }],
            root: NodeId(0),
            registry: IdRegistry::new(),
            base_uri: None,
            entities: HashMap::new(),
            stylesheet: Stylesheet::default(),
            extra_css: Vec::new(),
            events: Vec::new(),
            logger: None,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn registry(&self) -> &IdRegistry {
        &self.registry
    }

    pub fn base_uri(&self) -> Option<&url::Url> {
        self.base_uri.as_ref()
    }

    pub fn set_base_uri(&mut self, base_uri: Option<url::Url>) {
        self.base_uri = base_uri;
    }

    pub fn entities(&self) -> &HashMap<String, String> {
        &self.entities
    }

    pub fn set_entities(&mut self, entities: HashMap<String, String>) {
        self.entities = entities;
    }

    pub fn stylesheet(&self) -> &Stylesheet {
        &self.stylesheet
    }

    /// Adds CSS that applies in addition to the document's `<style>` elements.
    pub fn add_stylesheet(&mut self, css: &str) {
        self.extra_css.push(css.to_string());
        self.rebuild_stylesheet();
    }

    pub fn logger(&self) -> Option<&DebugLogger> {
        self.logger.as_ref()
    }

    pub fn set_logger(&mut self, logger: Option<DebugLogger>) {
        self.logger = logger;
    }

    pub fn drain_events(&mut self) -> Vec<DocumentEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: DocumentEvent) {
        if let Some(logger) = &self.logger {
            event.log(logger);
        }
        self.events.push(event);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node.index()).map(|n| &n.data)
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match self.node(node)? {
            NodeData::Element(el) => Some(el),
            NodeData::Content(_) => None,
        }
    }

    fn element_mut(&mut self, node: NodeId) -> Result<&mut Element, SvgError> {
        match self.nodes.get_mut(node.index()).map(|n| &mut n.data) {
            Some(NodeData::Element(el)) => Ok(el),
            Some(NodeData::Content(_)) => Err(SvgError::InvalidNode(format!(
                "node {} is not an element",
                node.raw()
            ))),
            None => Err(SvgError::InvalidNode(format!(
                "node {} does not exist",
                node.raw()
            ))),
        }
    }

    pub fn content(&self, node: NodeId) -> Option<&str> {
        match self.node(node)? {
            NodeData::Content(text) => Some(text.as_str()),
            NodeData::Element(_) => None,
        }
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(Element::tag)
    }

    pub fn kind(&self, node: NodeId) -> Option<ElementKind> {
        self.element(node).map(Element::kind)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.index()).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.element(node).map(Element::children).unwrap_or(&[])
    }

    /// Concatenated text of the node's direct content children.
    pub fn text_content(&self, node: NodeId) -> String {
        self.children(node)
            .iter()
            .filter_map(|child| self.content(*child))
            .collect()
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&AttributeValue> {
        self.element(node)?.attribute(name)
    }

    /// True when the node is reachable from the document root.
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == self.root {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element(Element::new(tag)))
    }

    pub fn create_content(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Content(text.to_string()))
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { parent: None, data });
        id
    }

    /// Pre-order traversal starting at (and including) `node`.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if self.node(n).is_none() {
                continue;
            }
            out.push(n);
            for child in self.children(n).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(node);
        while let Some(n) = current {
            out.push(n);
            current = self.parent(n);
        }
        out
    }

    pub fn get_elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|n| self.tag(*n) == Some(tag))
            .collect()
    }

    /// Local lookup by bare id, `#id` or `url(#id)`.
    pub fn get_element_by_id(&self, reference: &str) -> Option<NodeId> {
        self.registry.get(reference)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SvgError> {
        let index = self.children(parent).len();
        self.insert_child(parent, index, child, InsertOptions::default())
    }

    /// Inserts a detached node under `parent`. When `parent` is attached, the
    /// subtree's ids are validated and registered first; on failure nothing
    /// changes.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
        options: InsertOptions,
    ) -> Result<(), SvgError> {
        self.element(parent).ok_or_else(|| {
            SvgError::InvalidNode(format!("parent {} is not an element", parent.raw()))
        })?;
        if self.node(child).is_none() {
            return Err(SvgError::InvalidNode(format!(
                "node {} does not exist",
                child.raw()
            )));
        }
        if child == self.root || self.parent(child).is_some() {
            return Err(SvgError::InvalidNode(format!(
                "node {} is already in a tree",
                child.raw()
            )));
        }
        if child == parent || self.ancestors(parent).contains(&child) {
            return Err(SvgError::InvalidNode(
                "cannot insert a node into its own subtree".to_string(),
            ));
        }

        if self.is_attached(parent) {
            self.register_subtree(child, options)?;
        }

        let el = self.element_mut(parent)?;
        let index = index.min(el.children.len());
        el.children.insert(index, child);
        self.nodes[child.index()].parent = Some(parent);
        self.mark_subtree_dirty(child);

        if self.touches_style(parent, child) {
            self.rebuild_stylesheet();
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SvgError> {
        if self.parent(child) != Some(parent) {
            return Err(SvgError::InvalidNode(format!(
                "node {} is not a child of {}",
                child.raw(),
                parent.raw()
            )));
        }
        let was_attached = self.is_attached(parent);
        let style_change = self.touches_style(parent, child);

        let el = self.element_mut(parent)?;
        el.children.retain(|c| *c != child);
        self.nodes[child.index()].parent = None;
        self.mark_subtree_dirty(child);

        if was_attached {
            self.unregister_subtree(child);
        }
        if style_change {
            self.rebuild_stylesheet();
        }
        Ok(())
    }

    /// Detaches `node` from its parent, if any.
    pub fn detach(&mut self, node: NodeId) -> Result<(), SvgError> {
        match self.parent(node) {
            Some(parent) => self.remove_child(parent, node),
            None => Ok(()),
        }
    }

    fn register_subtree(&mut self, node: NodeId, options: InsertOptions) -> Result<(), SvgError> {
        let mut targets: Vec<(NodeId, String, bool)> = Vec::new();
        for n in self.descendants(node) {
            let Some(id) = self.element(n).and_then(Element::id) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            let rename = if n == node {
                options.auto_rename
            } else {
                options.auto_fix_children
            };
            targets.push((n, id.to_string(), rename));
        }

        let planned = self
            .registry
            .plan(targets.iter().map(|(_, id, rename)| (id.as_str(), *rename)))?;

        for ((n, old, _), new) in targets.into_iter().zip(planned) {
            if new != old {
                self.element_mut(n)?.id = Some(new.clone());
                self.emit(DocumentEvent::IdChanged {
                    node: n,
                    old,
                    new: new.clone(),
                });
            }
            self.registry.insert_planned(new.clone(), n);
            self.emit(DocumentEvent::IdAdded { node: n, id: new });
        }
        Ok(())
    }

    fn unregister_subtree(&mut self, node: NodeId) {
        // Children leave the registry before their parent.
        let mut order = self.descendants(node);
        order.reverse();
        for n in order {
            let Some(id) = self.element(n).and_then(Element::id).map(str::to_string) else {
                continue;
            };
            if self.registry.remove(&id, n) {
                self.emit(DocumentEvent::IdRemoved { node: n, id });
            }
        }
    }

    /// Changes an element's id. For attached elements the registry is
    /// updated and the final (possibly renamed) id is returned.
    pub fn set_id(
        &mut self,
        node: NodeId,
        id: Option<&str>,
        auto_rename: bool,
    ) -> Result<Option<String>, SvgError> {
        let old = self.element_mut(node)?.id.clone();
        let id = id.filter(|s| !s.is_empty());
        if old.as_deref() == id {
            return Ok(old);
        }
        if !self.is_attached(node) {
            self.element_mut(node)?.id = id.map(str::to_string);
            return Ok(id.map(str::to_string));
        }

        let new = match id {
            Some(requested) => Some(self.registry.ensure_valid_id(requested, auto_rename)?),
            None => None,
        };
        if let Some(old_id) = &old {
            if self.registry.remove(old_id, node) {
                self.emit(DocumentEvent::IdRemoved {
                    node,
                    id: old_id.clone(),
                });
            }
        }
        if let Some(new_id) = &new {
            self.registry.insert_planned(new_id.clone(), node);
            if let Some(old_id) = &old {
                self.emit(DocumentEvent::IdChanged {
                    node,
                    old: old_id.clone(),
                    new: new_id.clone(),
                });
            }
            self.emit(DocumentEvent::IdAdded {
                node,
                id: new_id.clone(),
            });
        }
        self.element_mut(node)?.id = new.clone();
        Ok(new)
    }

    /// Sets an attribute from its textual form.
    ///
    /// `id` goes through the registry without auto-rename; `transform` is
    /// parsed eagerly and a malformed list is rejected.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, raw: &str) -> Result<(), SvgError> {
        if name == "id" {
            self.set_id(node, Some(raw), false)?;
            self.emit(DocumentEvent::AttributeChanged {
                node,
                name: name.to_string(),
                value: Some(raw.to_string()),
            });
            return Ok(());
        }
        let value = match name {
            "style" | "class" => AttributeValue::Text(raw.to_string()),
            _ => AttributeValue::parse(name, raw)?,
        };
        self.set_attribute_value(node, name, value)
    }

    pub fn set_attribute_value(
        &mut self,
        node: NodeId,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), SvgError> {
        let text = value.to_text();
        let el = self.element_mut(node)?;
        if name == "transform" {
            el.transforms = match &value {
                AttributeValue::Transforms(list) => list.clone(),
                _ => TransformList::new(),
            };
        }
        el.attributes.set(name, value);
        self.after_attribute_change(node, name, Some(text));
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), SvgError> {
        if name == "id" {
            self.set_id(node, None, false)?;
        }
        let el = self.element_mut(node)?;
        if el.attributes.remove(name).is_none() {
            return Ok(());
        }
        if name == "transform" {
            el.transforms = TransformList::new();
        }
        self.after_attribute_change(node, name, None);
        Ok(())
    }

    fn after_attribute_change(&mut self, node: NodeId, name: &str, value: Option<String>) {
        let Some(kind) = self.kind(node) else {
            return;
        };
        if kind.affects_geometry(name) {
            if let Some(el) = self.element(node) {
                el.mark_dirty();
            }
        }
        // Stroke width and font size reach descendant geometry through
        // inheritance; an svg viewport resolves descendant percentages.
        let inherited = matches!(name, "stroke-width" | "font-size" | "style" | "class");
        let viewport = kind == ElementKind::Svg && matches!(name, "width" | "height" | "viewBox");
        if inherited || viewport {
            self.mark_subtree_dirty(node);
        }
        self.emit(DocumentEvent::AttributeChanged {
            node,
            name: name.to_string(),
            value,
        });
    }

    fn mark_subtree_dirty(&self, node: NodeId) {
        for n in self.descendants(node) {
            if let Some(el) = self.element(n) {
                el.mark_dirty();
            }
        }
    }

    /// Copies the subtree at `node` into `target` as a detached subtree.
    /// Ids are kept on the copies and registered once the copy is attached.
    pub fn deep_copy(&self, node: NodeId, target: &mut Document) -> Result<NodeId, SvgError> {
        let copy = match self.node(node) {
            Some(NodeData::Content(text)) => return Ok(target.create_content(text)),
            Some(NodeData::Element(el)) => {
                let mut fresh = Element::new(&el.tag);
                fresh.attributes = el.attributes.clone();
                fresh.id = el.id.clone();
                fresh.transforms = el.transforms.clone();
                target.push_node(NodeData::Element(fresh))
            }
            None => {
                return Err(SvgError::InvalidNode(format!(
                    "node {} does not exist",
                    node.raw()
                )));
            }
        };
        for child in self.children(node).to_vec() {
            let child_copy = self.deep_copy(child, target)?;
            target.nodes[child_copy.index()].parent = Some(copy);
            target.element_mut(copy)?.children.push(child_copy);
        }
        Ok(copy)
    }

    /// Deep-copies `node` into `target` under `parent`, registering the
    /// copied ids against `target`.
    pub fn import_into(
        &self,
        node: NodeId,
        target: &mut Document,
        parent: NodeId,
        options: InsertOptions,
    ) -> Result<NodeId, SvgError> {
        let copy = self.deep_copy(node, target)?;
        let index = target.children(parent).len();
        target.insert_child(parent, index, copy, options)?;
        Ok(copy)
    }

    fn touches_style(&self, parent: NodeId, child: NodeId) -> bool {
        self.kind(parent) == Some(ElementKind::Style)
            || self
                .descendants(child)
                .iter()
                .any(|n| self.kind(*n) == Some(ElementKind::Style))
    }

    /// Rebuilds the cascade from attached `<style>` elements and added CSS.
    pub fn rebuild_stylesheet(&mut self) {
        let mut sources: Vec<String> = self
            .descendants(self.root)
            .into_iter()
            .filter(|n| self.kind(*n) == Some(ElementKind::Style))
            .map(|n| self.text_content(n))
            .collect();
        sources.extend(self.extra_css.iter().cloned());
        self.stylesheet = Stylesheet::parse_all(sources.iter().map(String::as_str));
        for n in self.descendants(self.root) {
            if let Some(el) = self.element(n) {
                el.mark_dirty();
            }
        }
    }
}
