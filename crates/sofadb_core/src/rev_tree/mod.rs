//! Revision trees.
//!
//! Every document keeps the full shape of its history as a forest of
//! revisions. Nodes live in an arena and refer to their parent by index;
//! a `(pos, hash)` lookup table finds nodes by revision.
//!
//! ## Invariants
//!
//! - A node's parent is exactly one generation older than the node
//! - Leaves are always [`RevStatus::Available`]
//! - Roots are either first revisions or the oldest survivors of stemming
//!
//! All functions here are pure; nothing in this module touches storage.

mod merge;

pub use merge::{MergeOutcome, MergeResult};

use crate::error::{CoreError, CoreResult};
use crate::types::Revision;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a revision's body is still stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevStatus {
    /// The body is stored and can be read.
    Available,
    /// Only the revision id survives (compacted or never received).
    Missing,
}

/// One node of a revision tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevNode {
    /// Generation number.
    pub pos: u64,
    /// Revision hash.
    pub hash: String,
    /// Arena index of the parent node.
    pub parent: Option<usize>,
    /// Body availability.
    pub status: RevStatus,
    /// Whether this revision is a deletion.
    pub deleted: bool,
}

impl RevNode {
    /// The revision this node stands for.
    #[must_use]
    pub fn rev(&self) -> Revision {
        Revision::new(self.pos, self.hash.clone())
    }
}

/// A leaf revision with its deletion flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafInfo {
    /// The leaf revision.
    pub rev: Revision,
    /// Whether the leaf is a deletion.
    pub deleted: bool,
}

/// A document's revision forest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevTree {
    nodes: Vec<RevNode>,
    index: HashMap<Revision, usize>,
}

impl RevTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a tree from stored nodes.
    ///
    /// # Errors
    ///
    /// Returns `invalid_rev_tree` if a parent index is out of range, a
    /// parent is not exactly one generation older, or a revision repeats.
    pub fn from_nodes(nodes: Vec<RevNode>) -> CoreResult<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.pos == 0 || node.hash.is_empty() {
                return Err(CoreError::invalid_rev_tree(format!(
                    "node {i} has an invalid revision"
                )));
            }
            if let Some(parent) = node.parent {
                let Some(parent_node) = nodes.get(parent).filter(|_| parent != i) else {
                    return Err(CoreError::invalid_rev_tree(format!(
                        "node {i} ({}) points at missing parent {parent}",
                        node.rev()
                    )));
                };
                if parent_node.pos + 1 != node.pos {
                    return Err(CoreError::invalid_rev_tree(format!(
                        "node {} has parent {} of the wrong generation",
                        node.rev(),
                        parent_node.rev()
                    )));
                }
            }
            if index.insert(node.rev(), i).is_some() {
                return Err(CoreError::invalid_rev_tree(format!(
                    "revision {} appears twice",
                    node.rev()
                )));
            }
        }
        Ok(Self { nodes, index })
    }

    /// Returns the arena nodes.
    #[must_use]
    pub fn nodes(&self) -> &[RevNode] {
        &self.nodes
    }

    /// Number of revisions in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a revision.
    #[must_use]
    pub fn get(&self, rev: &Revision) -> Option<&RevNode> {
        self.index.get(rev).map(|&i| &self.nodes[i])
    }

    /// Returns true if the revision is in the tree.
    #[must_use]
    pub fn contains(&self, rev: &Revision) -> bool {
        self.index.contains_key(rev)
    }

    /// Returns true if the revision is in the tree and is a deletion.
    #[must_use]
    pub fn is_deleted(&self, rev: &Revision) -> bool {
        self.get(rev).is_some_and(|n| n.deleted)
    }

    /// Returns true if the revision is in the tree with its body stored.
    #[must_use]
    pub fn is_available(&self, rev: &Revision) -> bool {
        self.get(rev).is_some_and(|n| n.status == RevStatus::Available)
    }

    /// Returns true if the revision is a leaf.
    #[must_use]
    pub fn is_leaf(&self, rev: &Revision) -> bool {
        match self.index.get(rev) {
            Some(&i) => self.child_counts()[i] == 0,
            None => false,
        }
    }

    /// All leaves, best first.
    ///
    /// Ranking: non-deleted before deleted, then higher generation, then
    /// lexicographically greater hash.
    #[must_use]
    pub fn collect_leaves(&self) -> Vec<LeafInfo> {
        let counts = self.child_counts();
        let mut leaves: Vec<LeafInfo> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| counts[*i] == 0)
            .map(|(_, n)| LeafInfo {
                rev: n.rev(),
                deleted: n.deleted,
            })
            .collect();
        leaves.sort_by(|a, b| a.deleted.cmp(&b.deleted).then_with(|| b.rev.cmp(&a.rev)));
        leaves
    }

    /// The winning revision, or `None` for an empty tree.
    #[must_use]
    pub fn winning_rev(&self) -> Option<Revision> {
        self.collect_leaves().into_iter().next().map(|l| l.rev)
    }

    /// Non-deleted leaves other than the winner, best first.
    #[must_use]
    pub fn collect_conflicts(&self) -> Vec<Revision> {
        let mut leaves = self.collect_leaves().into_iter();
        leaves.next();
        leaves.filter(|l| !l.deleted).map(|l| l.rev).collect()
    }

    /// Depth-first walk from every root.
    ///
    /// The visitor receives `(is_leaf, pos, hash, parent, node)`. Roots and
    /// siblings are visited in revision order.
    pub fn traverse<F>(&self, mut visitor: F)
    where
        F: FnMut(bool, u64, &str, Option<&RevNode>, &RevNode),
    {
        let children = self.children();
        let mut roots: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].parent.is_none())
            .collect();
        roots.sort_by_key(|&i| std::cmp::Reverse(self.nodes[i].rev()));

        let mut stack = roots;
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            let parent = node.parent.map(|p| &self.nodes[p]);
            visitor(children[i].is_empty(), node.pos, &node.hash, parent, node);
            let mut kids = children[i].clone();
            kids.sort_by_key(|&c| std::cmp::Reverse(self.nodes[c].rev()));
            stack.extend(kids);
        }
    }

    /// Distance from every revision to its nearest leaf.
    #[must_use]
    pub fn compute_height(&self) -> HashMap<Revision, u64> {
        self.heights()
            .into_iter()
            .enumerate()
            .map(|(i, h)| (self.nodes[i].rev(), h))
            .collect()
    }

    /// Available revisions farther than `retention` from every leaf.
    #[must_use]
    pub fn compaction_candidates(&self, retention: u64) -> Vec<Revision> {
        let heights = self.heights();
        let mut revs: Vec<Revision> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| n.status == RevStatus::Available && heights[*i] > retention)
            .map(|(_, n)| n.rev())
            .collect();
        revs.sort();
        revs
    }

    /// Ancestry of `rev`, newest first, ending at its root.
    #[must_use]
    pub fn rev_path(&self, rev: &Revision) -> Option<Vec<Revision>> {
        let mut cur = Some(*self.index.get(rev)?);
        let mut path = Vec::new();
        while let Some(i) = cur {
            path.push(self.nodes[i].rev());
            cur = self.nodes[i].parent;
        }
        Some(path)
    }

    /// Every root-to-leaf path, each ordered root first.
    #[must_use]
    pub fn root_to_leaf(&self) -> Vec<Vec<Revision>> {
        self.collect_leaves()
            .iter()
            .filter_map(|leaf| self.rev_path(&leaf.rev))
            .map(|mut path| {
                path.reverse();
                path
            })
            .collect()
    }

    /// The best leaf descending from `rev`, or `rev` itself if it is a leaf.
    #[must_use]
    pub fn latest(&self, rev: &Revision) -> Option<Revision> {
        let target = *self.index.get(rev)?;
        self.collect_leaves()
            .into_iter()
            .map(|leaf| leaf.rev)
            .find(|leaf| self.descends_from(self.index[leaf], target))
    }

    /// Marks an available revision as missing. Returns false if the
    /// revision is unknown or already missing.
    pub fn mark_missing(&mut self, rev: &Revision) -> bool {
        match self.index.get(rev) {
            Some(&i) if self.nodes[i].status == RevStatus::Available => {
                self.nodes[i].status = RevStatus::Missing;
                true
            }
            _ => false,
        }
    }

    fn descends_from(&self, node: usize, ancestor: usize) -> bool {
        let mut cur = Some(node);
        while let Some(i) = cur {
            if i == ancestor {
                return true;
            }
            cur = self.nodes[i].parent;
        }
        false
    }

    fn child_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes.len()];
        for node in &self.nodes {
            if let Some(p) = node.parent {
                counts[p] += 1;
            }
        }
        counts
    }

    fn children(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(p) = node.parent {
                children[p].push(i);
            }
        }
        children
    }

    // Parents are one generation older than their children, so visiting
    // nodes from the highest generation down settles every child first.
    fn heights(&self) -> Vec<u64> {
        let counts = self.child_counts();
        let mut heights: Vec<u64> = counts
            .iter()
            .map(|&c| if c == 0 { 0 } else { u64::MAX })
            .collect();
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.nodes[i].pos));
        for i in order {
            if let Some(p) = self.nodes[i].parent {
                heights[p] = heights[p].min(heights[i].saturating_add(1));
            }
        }
        heights
    }

    fn push(&mut self, node: RevNode) -> usize {
        let i = self.nodes.len();
        self.index.insert(node.rev(), i);
        self.nodes.push(node);
        i
    }

    /// Keeps the nodes for which `keep(index)` holds. Children of removed
    /// nodes become roots.
    fn retain<F: Fn(usize) -> bool>(&mut self, keep: F) -> Vec<Revision> {
        let mut remap = vec![None; self.nodes.len()];
        let mut kept = Vec::with_capacity(self.nodes.len());
        let mut removed = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if keep(i) {
                remap[i] = Some(kept.len());
                kept.push(node.clone());
            } else {
                removed.push(node.rev());
            }
        }
        for node in &mut kept {
            node.parent = node.parent.and_then(|p| remap[p]);
        }
        self.index = kept.iter().enumerate().map(|(i, n)| (n.rev(), i)).collect();
        self.nodes = kept;
        removed
    }
}
