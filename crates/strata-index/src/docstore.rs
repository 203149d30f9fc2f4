//! Arena of chunk nodes addressed by id.
//!
//! Nodes live in insertion order in a `Vec`; an id → slot map resolves links.
//! Parent and child references are plain ids, so the tree has no owning
//! back-pointers.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strata_core::{ChunkNode, NodeId, StrataError};

/// Version tag written into `docstore.json`.
pub const DOCSTORE_VERSION: u32 = 1;

#[derive(Serialize)]
struct DocstoreRef<'a> {
    version: u32,
    nodes: &'a [ChunkNode],
}

#[derive(Deserialize)]
struct DocstoreOwned {
    version: u32,
    nodes: Vec<ChunkNode>,
}

/// All nodes of an index across every tier.
///
/// # Examples
///
/// ```
/// use strata_core::{ChunkNode, Span};
/// use strata_index::NodeStore;
///
/// let mut store = NodeStore::new();
/// let node = ChunkNode::new("doc", 0, Span::new(0, 5), "Hello");
/// let id = node.id.clone();
/// store.insert(vec![node]).unwrap();
///
/// assert_eq!(store.get(&id).unwrap().text, "Hello");
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Vec<ChunkNode>,
    slots: HashMap<NodeId, usize>,
}

impl PartialEq for NodeStore {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl NodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a batch of nodes.
    ///
    /// # Errors
    ///
    /// Same as [`NodeStore::insert`].
    pub fn from_nodes(nodes: Vec<ChunkNode>) -> Result<Self, StrataError> {
        let mut store = Self::new();
        store.insert(nodes)?;
        Ok(store)
    }

    /// Add a batch of nodes. Returns how many were new.
    ///
    /// Re-inserting a node identical to a stored one is a no-op. The batch is
    /// applied all-or-nothing.
    ///
    /// # Errors
    ///
    /// - [`StrataError::DuplicateId`] if an id is already used by a node with
    ///   different content (in the store or earlier in the batch).
    /// - [`StrataError::NotFound`] if a parent or child id is present neither
    ///   in the store nor in the batch.
    pub fn insert(&mut self, nodes: Vec<ChunkNode>) -> Result<usize, StrataError> {
        let mut fresh: Vec<ChunkNode> = Vec::with_capacity(nodes.len());
        let mut batch: HashMap<NodeId, usize> = HashMap::new();

        for node in nodes {
            if let Some(existing) = self.lookup(&node.id) {
                if *existing != node {
                    return Err(StrataError::DuplicateId { id: node.id });
                }
                continue;
            }
            if let Some(&pos) = batch.get(&node.id) {
                if fresh[pos] != node {
                    return Err(StrataError::DuplicateId { id: node.id });
                }
                continue;
            }
            batch.insert(node.id.clone(), fresh.len());
            fresh.push(node);
        }

        let known = |id: &NodeId| self.slots.contains_key(id) || batch.contains_key(id);
        for node in &fresh {
            if let Some(parent) = &node.parent_id {
                if !known(parent) {
                    return Err(StrataError::NotFound { id: parent.clone() });
                }
            }
            if let Some(child) = node.child_ids.iter().find(|c| !known(c)) {
                return Err(StrataError::NotFound { id: child.clone() });
            }
        }

        let added = fresh.len();
        for node in fresh {
            self.slots.insert(node.id.clone(), self.nodes.len());
            self.nodes.push(node);
        }
        Ok(added)
    }

    /// Look up a node.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] if no node has this id.
    pub fn get(&self, id: &NodeId) -> Result<&ChunkNode, StrataError> {
        self.lookup(id)
            .ok_or_else(|| StrataError::NotFound { id: id.clone() })
    }

    /// Look up a node, returning `None` if absent.
    pub fn lookup(&self, id: &NodeId) -> Option<&ChunkNode> {
        self.slots.get(id).map(|&slot| &self.nodes[slot])
    }

    /// Whether a node with this id is stored.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.slots.contains_key(id)
    }

    /// Ancestors from the immediate parent up to the root.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] if the node or any ancestor is
    /// missing.
    pub fn ancestors(&self, id: &NodeId) -> Result<Vec<&ChunkNode>, StrataError> {
        let mut chain = Vec::new();
        let mut current = self.get(id)?;
        while let Some(parent_id) = &current.parent_id {
            let parent = self.get(parent_id)?;
            if chain.len() > self.nodes.len() {
                return Err(StrataError::Merge {
                    id: id.clone(),
                    reason: "parent links form a cycle".into(),
                });
            }
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    /// Children in document order.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] if the node or any child is missing.
    pub fn children(&self, id: &NodeId) -> Result<Vec<&ChunkNode>, StrataError> {
        self.get(id)?
            .child_ids
            .iter()
            .map(|child| self.get(child))
            .collect()
    }

    /// Nodes without children, in insertion order.
    pub fn leaves(&self) -> impl Iterator<Item = &ChunkNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ChunkNode> {
        self.nodes.iter()
    }

    /// Node count per tier.
    pub fn tier_counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.tier).or_insert(0) += 1;
        }
        counts
    }

    /// Deepest tier present, or `None` for an empty store.
    pub fn max_tier(&self) -> Option<usize> {
        self.nodes.iter().map(|n| n.tier).max()
    }

    /// Check every link invariant of the hierarchy.
    ///
    /// - parent and child references agree in both directions
    /// - a child sits exactly one tier below its parent
    /// - children partition their parent's span with no gaps or overlaps
    /// - roots are tier 0 and leaves are exactly the deepest tier
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Merge`] naming the first offending node.
    pub fn validate(&self) -> Result<(), StrataError> {
        let max_tier = self.max_tier().unwrap_or(0);
        let violation = |id: &NodeId, reason: String| StrataError::Merge {
            id: id.clone(),
            reason,
        };

        for node in &self.nodes {
            match &node.parent_id {
                Some(parent_id) => {
                    let parent = self.lookup(parent_id).ok_or_else(|| {
                        violation(&node.id, format!("parent {parent_id} is missing"))
                    })?;
                    if !parent.child_ids.contains(&node.id) {
                        return Err(violation(
                            &node.id,
                            format!("parent {parent_id} does not list it as a child"),
                        ));
                    }
                    if parent.tier + 1 != node.tier {
                        return Err(violation(
                            &node.id,
                            format!("tier {} under parent at tier {}", node.tier, parent.tier),
                        ));
                    }
                }
                None if node.tier != 0 => {
                    return Err(violation(
                        &node.id,
                        format!("root node at tier {}", node.tier),
                    ));
                }
                None => {}
            }

            if node.is_leaf() {
                if node.tier != max_tier {
                    return Err(violation(
                        &node.id,
                        format!("leaf at tier {} but deepest tier is {max_tier}", node.tier),
                    ));
                }
                continue;
            }

            let mut cursor = node.span.start;
            let mut seen = HashSet::new();
            for child_id in &node.child_ids {
                if !seen.insert(child_id) {
                    return Err(violation(&node.id, format!("child {child_id} listed twice")));
                }
                let child = self.lookup(child_id).ok_or_else(|| {
                    violation(&node.id, format!("child {child_id} is missing"))
                })?;
                if child.parent_id.as_ref() != Some(&node.id) {
                    return Err(violation(
                        child_id,
                        format!("listed as a child of {} but points elsewhere", node.id),
                    ));
                }
                if child.span.start != cursor {
                    return Err(violation(
                        child_id,
                        format!("span starts at {} but sibling coverage ends at {cursor}", child.span.start),
                    ));
                }
                cursor = child.span.end;
            }
            if cursor != node.span.end {
                return Err(violation(
                    &node.id,
                    format!("children end at {cursor} but span ends at {}", node.span.end),
                ));
            }
        }

        Ok(())
    }

    /// Serialize every node, preserving order and links.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, StrataError> {
        let file = DocstoreRef {
            version: DOCSTORE_VERSION,
            nodes: &self.nodes,
        };
        Ok(serde_json::to_string(&file)?)
    }

    /// Rebuild a store from [`NodeStore::to_json`] output.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Serialization`] for malformed JSON,
    /// [`StrataError::Config`] for an unknown version, and the
    /// [`NodeStore::insert`] errors for broken links.
    pub fn from_json(json: &str) -> Result<Self, StrataError> {
        let file: DocstoreOwned = serde_json::from_str(json)?;
        if file.version != DOCSTORE_VERSION {
            return Err(StrataError::Config(format!(
                "unsupported docstore version {} (expected {DOCSTORE_VERSION})",
                file.version
            )));
        }
        Self::from_nodes(file.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Span;

    /// root(0..8) -> [a(0..4), b(4..8)]
    fn small_tree() -> Vec<ChunkNode> {
        let mut root = ChunkNode::new("d", 0, Span::new(0, 8), "abcdefgh");
        let mut a = ChunkNode::new("d", 1, Span::new(0, 4), "abcd");
        let mut b = ChunkNode::new("d", 1, Span::new(4, 8), "efgh");
        a.parent_id = Some(root.id.clone());
        b.parent_id = Some(root.id.clone());
        root.child_ids = vec![a.id.clone(), b.id.clone()];
        vec![root, a, b]
    }

    #[test]
    fn insert_is_idempotent() {
        let mut store = NodeStore::new();
        assert_eq!(store.insert(small_tree()).unwrap(), 3);
        assert_eq!(store.insert(small_tree()).unwrap(), 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn conflicting_duplicate_rejected() {
        let mut store = NodeStore::from_nodes(small_tree()).unwrap();
        let mut changed = small_tree()[1].clone();
        changed.text = "ABCD".into();
        let err = store.insert(vec![changed]).unwrap_err();
        assert!(matches!(err, StrataError::DuplicateId { .. }));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn dangling_reference_rejects_whole_batch() {
        let mut store = NodeStore::new();
        let nodes = small_tree();
        let orphan_child = nodes[1].clone();
        let err = store.insert(vec![orphan_child]).unwrap_err();
        assert!(matches!(err, StrataError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn ancestors_and_children() {
        let nodes = small_tree();
        let root_id = nodes[0].id.clone();
        let leaf_id = nodes[2].id.clone();
        let store = NodeStore::from_nodes(nodes).unwrap();

        let ancestors = store.ancestors(&leaf_id).unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].id, root_id);
        assert!(store.ancestors(&root_id).unwrap().is_empty());

        let children: Vec<_> = store.children(&root_id).unwrap().iter().map(|n| n.text.clone()).collect();
        assert_eq!(children, vec!["abcd", "efgh"]);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = NodeStore::new();
        assert!(matches!(
            store.get(&NodeId::new("nope")),
            Err(StrataError::NotFound { .. })
        ));
    }

    #[test]
    fn validate_accepts_consistent_tree() {
        let store = NodeStore::from_nodes(small_tree()).unwrap();
        store.validate().unwrap();
        assert_eq!(store.tier_counts(), BTreeMap::from([(0, 1), (1, 2)]));
        assert_eq!(store.leaves().count(), 2);
    }

    #[test]
    fn validate_catches_span_gap() {
        let mut nodes = small_tree();
        nodes[2].span = Span::new(5, 8);
        let store = NodeStore::from_nodes(nodes).unwrap();
        let err = store.validate().unwrap_err();
        assert!(matches!(err, StrataError::Merge { .. }));
    }

    #[test]
    fn validate_catches_one_sided_link() {
        let mut nodes = small_tree();
        nodes[0].child_ids.pop();
        let store = NodeStore::from_nodes(nodes).unwrap();
        assert!(store.validate().is_err());
    }

    #[test]
    fn json_round_trip_preserves_order_and_links() {
        let store = NodeStore::from_nodes(small_tree()).unwrap();
        let json = store.to_json().unwrap();
        let back = NodeStore::from_json(&json).unwrap();
        assert_eq!(back, store);
        back.validate().unwrap();
    }

    #[test]
    fn json_with_unknown_version_rejected() {
        let err = NodeStore::from_json(r#"{"version":99,"nodes":[]}"#).unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }
}
