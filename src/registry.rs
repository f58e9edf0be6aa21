use std::collections::{HashMap, HashSet};

use crate::document::NodeId;
use crate::error::SvgError;

/// Per-document map from id to element.
#[derive(Debug, Clone, Default)]
pub struct IdRegistry {
    ids: HashMap<String, NodeId>,
}

/// Outcome of registering an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedId {
    pub id: String,
    pub renamed: bool,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.ids.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Looks up a bare id, a `#id` fragment or a `url(#id)` / `url("#id")` wrapper.
    pub fn get(&self, reference: &str) -> Option<NodeId> {
        let id = normalize_reference(reference);
        self.ids.get(id).copied()
    }

    /// Returns the id that would be registered for `id`.
    ///
    /// A leading digit is invalid; with `auto_rename` it gets an `id` prefix.
    /// A collision gets a `#N` suffix one past the existing numeric suffix.
    pub fn ensure_valid_id(&self, id: &str, auto_rename: bool) -> Result<String, SvgError> {
        ensure_valid_id_in(id, auto_rename, |candidate| self.ids.contains_key(candidate))
    }

    pub fn add(
        &mut self,
        id: &str,
        node: NodeId,
        auto_rename: bool,
    ) -> Result<AssignedId, SvgError> {
        let valid = self.ensure_valid_id(id, auto_rename)?;
        let renamed = valid != id;
        self.ids.insert(valid.clone(), node);
        Ok(AssignedId { id: valid, renamed })
    }

    /// Validates a batch of ids against the registry and each other without
    /// mutating anything. Either every entry gets a final id or none does.
    pub fn plan<'a>(
        &self,
        requests: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<Vec<String>, SvgError> {
        let mut staged: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for (id, auto_rename) in requests {
            let valid = ensure_valid_id_in(id, auto_rename, |candidate| {
                self.ids.contains_key(candidate) || staged.contains(candidate)
            })?;
            staged.insert(valid.clone());
            out.push(valid);
        }
        Ok(out)
    }

    /// Inserts an id already produced by [`IdRegistry::plan`].
    pub(crate) fn insert_planned(&mut self, id: String, node: NodeId) {
        self.ids.insert(id, node);
    }

    /// Removes `id` if it maps to `node`.
    pub fn remove(&mut self, id: &str, node: NodeId) -> bool {
        if self.ids.get(id) == Some(&node) {
            self.ids.remove(id);
            return true;
        }
        false
    }
}

fn ensure_valid_id_in(
    id: &str,
    auto_rename: bool,
    taken: impl Fn(&str) -> bool,
) -> Result<String, SvgError> {
    let mut candidate = id.to_string();
    loop {
        if candidate.is_empty() {
            return Ok(candidate);
        }
        if candidate.starts_with(|c: char| c.is_ascii_digit()) {
            if !auto_rename {
                return Err(SvgError::InvalidIdFormat(candidate));
            }
            candidate = format!("id{candidate}");
            continue;
        }
        if !taken(&candidate) {
            return Ok(candidate);
        }
        if !auto_rename {
            return Err(SvgError::DuplicateId(candidate));
        }
        candidate = bump_suffix(&candidate);
    }
}

/// `node` -> `node#1`, `node#1` -> `node#2`.
fn bump_suffix(id: &str) -> String {
    if let Some(hash) = id.rfind('#') {
        let digits = &id[hash + 1..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = digits.parse::<u64>() {
                return format!("{}#{}", &id[..hash], n + 1);
            }
        }
    }
    format!("{id}#1")
}

/// Strips `url(...)`, quotes and a leading `#`.
pub fn normalize_reference(reference: &str) -> &str {
    let mut s = reference.trim();
    if let Some(inner) = s.strip_prefix("url(") {
        s = inner.trim_end_matches(')').trim();
        s = s.trim_matches('"').trim_matches('\'');
    }
    s.strip_prefix('#').unwrap_or(s)
}

/// Splits `doc.svg#frag` style references. Local references return `None`.
pub fn split_external_reference(reference: &str) -> Option<(&str, &str)> {
    let mut s = reference.trim();
    if let Some(inner) = s.strip_prefix("url(") {
        s = inner.trim_end_matches(')').trim();
        s = s.trim_matches('"').trim_matches('\'');
    }
    if s.starts_with('#') {
        return None;
    }
    let hash = s.rfind('#')?;
    let (uri, fragment) = (&s[..hash], &s[hash + 1..]);
    if uri.is_empty() || fragment.is_empty() {
        return None;
    }
    Some((uri, fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u32) -> NodeId {
        NodeId::from_raw(n)
    }

    #[test]
    fn digit_prefixed_ids_are_prefixed_or_rejected() {
        let reg = IdRegistry::new();
        assert_eq!(reg.ensure_valid_id("1", true).expect("renamed"), "id1");
        assert!(matches!(
            reg.ensure_valid_id("1", false),
            Err(SvgError::InvalidIdFormat(_))
        ));
    }

    #[test]
    fn collisions_get_incrementing_suffix() {
        let mut reg = IdRegistry::new();
        assert_eq!(reg.add("node", node(1), true).expect("first").id, "node");
        let second = reg.add("node", node(2), true).expect("second");
        assert_eq!(second, AssignedId { id: "node#1".into(), renamed: true });
        assert_eq!(reg.add("node", node(3), true).expect("third").id, "node#2");
        assert!(matches!(
            reg.add("node", node(4), false),
            Err(SvgError::DuplicateId(_))
        ));
    }

    #[test]
    fn lookup_accepts_fragment_and_url_forms() {
        let mut reg = IdRegistry::new();
        reg.add("grad", node(7), false).expect("add");
        for reference in ["grad", "#grad", "url(#grad)", "url(\"#grad\")", " url('#grad') "] {
            assert_eq!(reg.get(reference), Some(node(7)), "{reference}");
        }
        assert_eq!(reg.get("#missing"), None);
    }

    #[test]
    fn plan_is_all_or_nothing() {
        let mut reg = IdRegistry::new();
        reg.add("a", node(1), false).expect("add");
        let planned = reg
            .plan([("a", true), ("a", true), ("b", false)])
            .expect("plan");
        assert_eq!(planned, vec!["a#1", "a#2", "b"]);
        assert!(reg.plan([("c", false), ("a", false)]).is_err());
        assert!(!reg.contains("c"));
    }

    #[test]
    fn remove_only_matches_owner() {
        let mut reg = IdRegistry::new();
        reg.add("x", node(1), false).expect("add");
        assert!(!reg.remove("x", node(2)));
        assert!(reg.remove("x", node(1)));
        assert!(reg.is_empty());
    }

    #[test]
    fn external_references_split_on_last_hash() {
        assert_eq!(
            split_external_reference("url(other.svg#shape)"),
            Some(("other.svg", "shape"))
        );
        assert_eq!(split_external_reference("#local"), None);
    }
}
