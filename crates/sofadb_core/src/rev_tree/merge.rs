//! Inserting revision paths, stemming and leaf removal.

use super::{RevNode, RevStatus, RevTree};
use crate::error::{CoreError, CoreResult};
use crate::types::Revision;

/// How a merged path attached to the existing tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The path extended an existing leaf, or started an empty tree.
    NewLeaf,
    /// The path forked from an internal node or started a new root.
    NewBranch,
    /// The path's last revision was already known; nothing was added.
    InternalNode,
}

/// Result of [`RevTree::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// How the path attached.
    pub outcome: MergeOutcome,
    /// Revisions removed by stemming.
    pub stemmed: Vec<Revision>,
}

impl RevTree {
    /// Merges a revision path into the tree and stems it to `revs_limit`.
    ///
    /// `path` is ordered oldest first; its last revision becomes an
    /// available leaf with the given deletion flag, earlier revisions that
    /// are not yet known are inserted as missing. A known root matching a
    /// path entry is relinked under its predecessor, restoring history that
    /// an earlier stem dropped. A `revs_limit` of 0 disables stemming.
    ///
    /// # Errors
    ///
    /// Returns `bad_request` if the path is empty, its generations are not
    /// consecutive, or it contradicts the stored parent of a known revision.
    pub fn merge(
        &mut self,
        path: &[Revision],
        deleted: bool,
        revs_limit: u64,
    ) -> CoreResult<MergeResult> {
        self.check_path(path)?;
        let Some(leaf) = path.last() else {
            return Err(CoreError::bad_request("empty revision path"));
        };
        if self.contains(leaf) {
            return Ok(MergeResult {
                outcome: MergeOutcome::InternalNode,
                stemmed: Vec::new(),
            });
        }

        let counts = self.child_counts();
        let attach = path.iter().rev().find_map(|r| self.index.get(r).copied());
        let outcome = match attach {
            Some(i) if counts[i] == 0 => MergeOutcome::NewLeaf,
            None if self.is_empty() => MergeOutcome::NewLeaf,
            _ => MergeOutcome::NewBranch,
        };

        let last = path.len() - 1;
        let mut prev: Option<usize> = None;
        for (i, rev) in path.iter().enumerate() {
            let idx = match self.index.get(rev).copied() {
                Some(idx) => {
                    if self.nodes[idx].parent.is_none() {
                        self.nodes[idx].parent = prev;
                    }
                    idx
                }
                None => self.push(RevNode {
                    pos: rev.pos,
                    hash: rev.hash.clone(),
                    parent: prev,
                    status: if i == last {
                        RevStatus::Available
                    } else {
                        RevStatus::Missing
                    },
                    deleted: i == last && deleted,
                }),
            };
            prev = Some(idx);
        }

        let stemmed = self.stem(revs_limit);
        Ok(MergeResult { outcome, stemmed })
    }

    /// Removes every revision at least `depth` away from all leaves and
    /// returns the removed revisions. Orphaned children become roots.
    pub fn stem(&mut self, depth: u64) -> Vec<Revision> {
        if depth == 0 {
            return Vec::new();
        }
        let heights = self.heights();
        if heights.iter().all(|&h| h < depth) {
            return Vec::new();
        }
        self.retain(|i| heights[i] < depth)
    }

    /// Removes a leaf and every ancestor no other leaf shares.
    ///
    /// Returns `None` if `rev` is not a leaf of this tree.
    pub fn remove_leaf(&mut self, rev: &Revision) -> Option<Vec<Revision>> {
        let start = *self.index.get(rev)?;
        let mut counts = self.child_counts();
        if counts[start] != 0 {
            return None;
        }
        let mut doomed = vec![false; self.nodes.len()];
        doomed[start] = true;
        let mut cur = self.nodes[start].parent;
        while let Some(p) = cur {
            counts[p] -= 1;
            if counts[p] != 0 {
                break;
            }
            doomed[p] = true;
            cur = self.nodes[p].parent;
        }
        Some(self.retain(|i| !doomed[i]))
    }

    fn check_path(&self, path: &[Revision]) -> CoreResult<()> {
        for pair in path.windows(2) {
            if pair[0].pos + 1 != pair[1].pos {
                return Err(CoreError::bad_request(format!(
                    "revision path jumps from {} to {}",
                    pair[0], pair[1]
                )));
            }
            let stored_parent = self
                .get(&pair[1])
                .and_then(|n| n.parent)
                .map(|p| self.nodes[p].rev());
            if stored_parent.is_some_and(|p| p != pair[0]) {
                return Err(CoreError::bad_request(format!(
                    "revision {} does not descend from {}",
                    pair[1], pair[0]
                )));
            }
        }
        Ok(())
    }
}
