//! Auto-merging of retrieved leaves into their parents.
//!
//! When enough of a parent's children were retrieved, the children are
//! replaced by the parent so the answer sees one coherent passage instead of
//! fragments. Merging repeats bottom-up until no parent qualifies.

use std::collections::BTreeMap;

use strata_core::{NodeId, Passage, ScoreAggregate, ScoredNode, StrataError};
use strata_index::NodeStore;
use tracing::debug;

/// A retrieval result after merging.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedNode {
    /// Node id (a leaf or an ancestor).
    pub id: NodeId,
    /// Aggregated score.
    pub score: f32,
    /// Best original rank among the nodes it covers.
    pub rank: usize,
    /// Retrieved ids this node absorbed, sorted; empty if returned as-is.
    pub merged_from: Vec<NodeId>,
}

impl MergedNode {
    /// View as a ranked hit, e.g. to feed the result back into a merge.
    pub fn as_scored(&self) -> ScoredNode {
        ScoredNode {
            id: self.id.clone(),
            score: self.score,
            rank: self.rank,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    score: f32,
    rank: usize,
    merged_from: Vec<NodeId>,
}

impl Candidate {
    fn constituents(&self, id: &NodeId) -> Vec<NodeId> {
        if self.merged_from.is_empty() {
            vec![id.clone()]
        } else {
            self.merged_from.clone()
        }
    }
}

/// Replaces sibling groups with their parent once a ratio of them is present.
///
/// # Examples
///
/// ```
/// use strata_core::ScoreAggregate;
/// use strata_retrieve::AutoMerger;
///
/// let merger = AutoMerger::new(0.5, ScoreAggregate::Max).unwrap();
/// assert_eq!(merger.ratio(), 0.5);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AutoMerger {
    ratio: f64,
    aggregate: ScoreAggregate,
}

impl Default for AutoMerger {
    /// Half of the children, max aggregate.
    fn default() -> Self {
        Self {
            ratio: 0.5,
            aggregate: ScoreAggregate::Max,
        }
    }
}

impl AutoMerger {
    /// Create a merger with threshold `ratio` in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] if the ratio is out of range.
    pub fn new(ratio: f64, aggregate: ScoreAggregate) -> Result<Self, StrataError> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(StrataError::Config(format!(
                "merge ratio must be in (0, 1], got {ratio}"
            )));
        }
        Ok(Self { ratio, aggregate })
    }

    /// The merge threshold.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Merge ranked hits.
    ///
    /// Duplicate ids keep their best entry. A hit whose ancestor is also
    /// present is folded into that ancestor. Then, repeatedly, each parent
    /// (in ascending id order) with `present / total >= ratio` children
    /// replaces them. The result is ordered by best original rank and never
    /// holds a node together with one of its ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Merge`] if a hit, parent or child is missing
    /// from the store or links disagree.
    pub fn merge(
        &self,
        hits: &[ScoredNode],
        store: &NodeStore,
    ) -> Result<Vec<MergedNode>, StrataError> {
        let mut candidates: BTreeMap<NodeId, Candidate> = BTreeMap::new();
        for hit in hits {
            if !store.contains(&hit.id) {
                return Err(StrataError::Merge {
                    id: hit.id.clone(),
                    reason: "retrieved node is not in the store".into(),
                });
            }
            let better = candidates.get(&hit.id).map_or(true, |c| {
                hit.score > c.score || (hit.score == c.score && hit.rank < c.rank)
            });
            if better {
                candidates.insert(
                    hit.id.clone(),
                    Candidate {
                        score: hit.score,
                        rank: hit.rank,
                        merged_from: Vec::new(),
                    },
                );
            }
        }

        self.fold_into_ancestors(&mut candidates, store)?;

        let mut passes = 0;
        while self.merge_pass(&mut candidates, store)? {
            self.fold_into_ancestors(&mut candidates, store)?;
            passes += 1;
        }

        let mut merged: Vec<MergedNode> = candidates
            .into_iter()
            .map(|(id, c)| MergedNode {
                id,
                score: c.score,
                rank: c.rank,
                merged_from: c.merged_from,
            })
            .collect();
        merged.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));

        debug!(
            hits = hits.len(),
            merged = merged.len(),
            passes,
            "auto-merge complete"
        );
        Ok(merged)
    }

    /// One bottom-up pass. Returns whether anything merged.
    fn merge_pass(
        &self,
        candidates: &mut BTreeMap<NodeId, Candidate>,
        store: &NodeStore,
    ) -> Result<bool, StrataError> {
        let mut groups: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for id in candidates.keys() {
            let node = store.get(id).map_err(|_| missing(id, "node"))?;
            if let Some(parent_id) = &node.parent_id {
                groups.entry(parent_id.clone()).or_default().push(id.clone());
            }
        }

        let mut changed = false;
        for (parent_id, present) in groups {
            let parent = store
                .lookup(&parent_id)
                .ok_or_else(|| missing(&present[0], &format!("parent {parent_id}")))?;
            let total = parent.child_ids.len();
            if let Some(stray) = present.iter().find(|c| !parent.child_ids.contains(c)) {
                return Err(StrataError::Merge {
                    id: stray.clone(),
                    reason: format!("parent {parent_id} does not list it as a child"),
                });
            }
            if (present.len() as f64) / (total as f64) < self.ratio {
                continue;
            }

            let replaced: Vec<(NodeId, Candidate)> = present
                .iter()
                .filter_map(|id| candidates.remove(id).map(|c| (id.clone(), c)))
                .collect();
            let merged = self.combine(None, &replaced);
            debug!(
                parent = %parent_id,
                present = present.len(),
                total,
                "merged children into parent"
            );
            candidates.insert(parent_id, merged);
            changed = true;
        }

        Ok(changed)
    }

    /// Fold every candidate with a present ancestor into its topmost present
    /// ancestor.
    fn fold_into_ancestors(
        &self,
        candidates: &mut BTreeMap<NodeId, Candidate>,
        store: &NodeStore,
    ) -> Result<(), StrataError> {
        let ids: Vec<NodeId> = candidates.keys().cloned().collect();
        for id in ids {
            if !candidates.contains_key(&id) {
                continue;
            }
            let ancestors = store
                .ancestors(&id)
                .map_err(|e| missing(&id, &format!("ancestor ({e})")))?;
            let Some(top) = ancestors
                .iter()
                .rev()
                .find(|a| candidates.contains_key(&a.id))
                .map(|a| a.id.clone())
            else {
                continue;
            };

            let Some(folded) = candidates.remove(&id) else {
                continue;
            };
            if let Some(existing) = candidates.remove(&top) {
                let merged = self.combine(Some((&top, &existing)), &[(id, folded)]);
                candidates.insert(top, merged);
            }
        }
        Ok(())
    }

    fn combine(
        &self,
        base: Option<(&NodeId, &Candidate)>,
        replaced: &[(NodeId, Candidate)],
    ) -> Candidate {
        let mut scores = Vec::with_capacity(replaced.len() + 1);
        let mut rank = usize::MAX;
        let mut merged_from = Vec::new();

        if let Some((id, c)) = base {
            scores.push(c.score);
            rank = c.rank;
            merged_from.extend(c.constituents(id));
        }
        for (id, c) in replaced {
            scores.push(c.score);
            rank = rank.min(c.rank);
            merged_from.extend(c.constituents(id));
        }
        merged_from.sort();
        merged_from.dedup();

        Candidate {
            score: aggregate(self.aggregate, &scores),
            rank,
            merged_from,
        }
    }
}

fn aggregate(kind: ScoreAggregate, scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    match kind {
        ScoreAggregate::Max => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        ScoreAggregate::Mean => scores.iter().sum::<f32>() / scores.len() as f32,
    }
}

fn missing(id: &NodeId, what: &str) -> StrataError {
    StrataError::Merge {
        id: id.clone(),
        reason: format!("{what} is missing from the store"),
    }
}

/// Turn merged nodes into passages carrying each node's text.
///
/// # Errors
///
/// Returns [`StrataError::Merge`] if a node is missing.
pub fn to_passages(merged: &[MergedNode], store: &NodeStore) -> Result<Vec<Passage>, StrataError> {
    merged
        .iter()
        .map(|m| {
            let node = store.get(&m.id).map_err(|_| missing(&m.id, "node"))?;
            let mut passage = Passage::from_node(node, m.score);
            passage.merged_from = m.merged_from.clone();
            Ok(passage)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{ChunkNode, Span};

    /// root -> [p0, p1, p2]; each parent has four leaves (l0..l12)
    fn tree() -> (NodeStore, Vec<NodeId>, Vec<NodeId>, NodeId) {
        let mut root = ChunkNode::new("d", 0, Span::new(0, 120), "r");
        let mut parents = Vec::new();
        let mut leaves = Vec::new();
        for p in 0..3 {
            let mut parent = ChunkNode::new("d", 1, Span::new(p * 40, p * 40 + 40), "p");
            parent.parent_id = Some(root.id.clone());
            for l in 0..4 {
                let start = p * 40 + l * 10;
                let mut leaf = ChunkNode::new("d", 2, Span::new(start, start + 10), "l");
                leaf.parent_id = Some(parent.id.clone());
                parent.child_ids.push(leaf.id.clone());
                leaves.push(leaf);
            }
            root.child_ids.push(parent.id.clone());
            parents.push(parent);
        }
        let root_id = root.id.clone();
        let parent_ids = parents.iter().map(|n| n.id.clone()).collect();
        let leaf_ids = leaves.iter().map(|n| n.id.clone()).collect();

        let mut nodes = vec![root];
        nodes.extend(parents);
        nodes.extend(leaves);
        let store = NodeStore::from_nodes(nodes).unwrap();
        store.validate().unwrap();
        (store, parent_ids, leaf_ids, root_id)
    }

    fn hit(id: &NodeId, score: f32, rank: usize) -> ScoredNode {
        ScoredNode {
            id: id.clone(),
            score,
            rank,
        }
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        assert!(AutoMerger::new(0.0, ScoreAggregate::Max).is_err());
        assert!(AutoMerger::new(1.5, ScoreAggregate::Max).is_err());
        assert!(AutoMerger::new(1.0, ScoreAggregate::Max).is_ok());
    }

    #[test]
    fn below_threshold_leaves_are_kept() {
        let (store, _, leaves, _) = tree();
        let merger = AutoMerger::new(0.5, ScoreAggregate::Max).unwrap();
        let hits = vec![hit(&leaves[0], 0.9, 0), hit(&leaves[5], 0.8, 1)];
        let merged = merger.merge(&hits, &store).unwrap();
        let ids: Vec<_> = merged.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![leaves[0].clone(), leaves[5].clone()]);
        assert!(merged.iter().all(|m| m.merged_from.is_empty()));
    }

    #[test]
    fn half_of_siblings_merges_at_threshold() {
        let (store, parents, leaves, _) = tree();
        let merger = AutoMerger::new(0.5, ScoreAggregate::Max).unwrap();
        let hits = vec![
            hit(&leaves[1], 0.7, 1),
            hit(&leaves[0], 0.9, 0),
            hit(&leaves[6], 0.5, 2),
        ];
        let merged = merger.merge(&hits, &store).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, parents[0]);
        assert_eq!(merged[0].score, 0.9);
        assert_eq!(merged[0].rank, 0);
        let mut expected = vec![leaves[0].clone(), leaves[1].clone()];
        expected.sort();
        assert_eq!(merged[0].merged_from, expected);
        assert_eq!(merged[1].id, leaves[6]);
    }

    #[test]
    fn merging_cascades_to_root() {
        let (store, _, leaves, root) = tree();
        let merger = AutoMerger::new(0.5, ScoreAggregate::Mean).unwrap();
        let hits: Vec<_> = [0, 1, 4, 5]
            .iter()
            .enumerate()
            .map(|(rank, &i)| hit(&leaves[i], 1.0 - rank as f32 * 0.1, rank))
            .collect();
        let merged = merger.merge(&hits, &store).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, root);
        assert_eq!(merged[0].merged_from.len(), 4);
    }

    #[test]
    fn descendant_folds_into_retrieved_ancestor() {
        let (store, parents, leaves, _) = tree();
        let merger = AutoMerger::new(1.0, ScoreAggregate::Max).unwrap();
        let hits = vec![hit(&leaves[2], 0.95, 0), hit(&parents[0], 0.4, 3)];
        let merged = merger.merge(&hits, &store).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, parents[0]);
        assert_eq!(merged[0].score, 0.95);
        assert_eq!(merged[0].rank, 0);
    }

    #[test]
    fn duplicates_keep_best_entry() {
        let (store, _, leaves, _) = tree();
        let merger = AutoMerger::new(1.0, ScoreAggregate::Max).unwrap();
        let hits = vec![hit(&leaves[3], 0.2, 4), hit(&leaves[3], 0.6, 1)];
        let merged = merger.merge(&hits, &store).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 0.6);
        assert_eq!(merged[0].rank, 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let (store, _, leaves, _) = tree();
        for ratio in [0.25, 0.5, 0.75, 1.0] {
            let merger = AutoMerger::new(ratio, ScoreAggregate::Max).unwrap();
            let hits: Vec<_> = [0, 1, 2, 5, 7]
                .iter()
                .enumerate()
                .map(|(rank, &i)| hit(&leaves[i], 0.9 - rank as f32 * 0.1, rank))
                .collect();
            let once = merger.merge(&hits, &store).unwrap();
            let again_in: Vec<_> = once.iter().map(MergedNode::as_scored).collect();
            let twice = merger.merge(&again_in, &store).unwrap();
            let strip = |v: &[MergedNode]| {
                v.iter()
                    .map(|m| (m.id.clone(), m.score, m.rank))
                    .collect::<Vec<_>>()
            };
            assert_eq!(strip(&once), strip(&twice), "ratio {ratio}");
        }
    }

    #[test]
    fn output_has_no_ancestor_pairs() {
        let (store, parents, leaves, _) = tree();
        let merger = AutoMerger::new(0.75, ScoreAggregate::Max).unwrap();
        let hits = vec![
            hit(&leaves[0], 0.9, 0),
            hit(&leaves[1], 0.8, 1),
            hit(&leaves[2], 0.7, 2),
            hit(&parents[1], 0.6, 3),
            hit(&leaves[7], 0.5, 4),
        ];
        let merged = merger.merge(&hits, &store).unwrap();
        for a in &merged {
            let ancestors = store.ancestors(&a.id).unwrap();
            for b in &merged {
                assert!(ancestors.iter().all(|n| n.id != b.id));
            }
        }
    }

    #[test]
    fn unknown_hit_is_merge_error() {
        let (store, _, _, _) = tree();
        let merger = AutoMerger::new(0.5, ScoreAggregate::Max).unwrap();
        let err = merger
            .merge(&[hit(&NodeId::new("ghost"), 1.0, 0)], &store)
            .unwrap_err();
        assert!(matches!(err, StrataError::Merge { .. }));
    }

    #[test]
    fn passages_carry_node_text() {
        let (store, parents, leaves, _) = tree();
        let merger = AutoMerger::new(0.5, ScoreAggregate::Max).unwrap();
        let hits = vec![hit(&leaves[0], 0.9, 0), hit(&leaves[1], 0.8, 1)];
        let merged = merger.merge(&hits, &store).unwrap();
        let passages = to_passages(&merged, &store).unwrap();
        assert_eq!(passages[0].id, parents[0]);
        assert_eq!(passages[0].text, "p");
        assert_eq!(passages[0].tier, 1);
        assert_eq!(passages[0].merged_from.len(), 2);
    }
}
