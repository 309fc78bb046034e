use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::OnceLock;

use append_only_vec::AppendOnlyVec;
use chrono::{DateTime, Utc};
use git2::Oid;

use crate::core::segment::Segment;

/// Topological layer of a commit; strictly increases from child to parent.
pub type Score = u32;

/// Arena slot of a node inside a [`CommitGraph`](crate::core::CommitGraph).
pub type NodeIdx = usize;

/// A commit node in the DAG.
///
/// Edge sets and segments are append-only and safe to grow while other
/// threads read them; the score is raise-only and the relative flag only ever
/// transitions false to true. A node is created once per distinct commit ID
/// and lives as long as the graph that owns it.
pub struct CommitNode {
    /// Unique commit ID (SHA)
    id: Oid,
    score: AtomicU32,
    relative: AtomicBool,
    /// Arena slots of direct ancestors
    parents: AppendOnlyVec<NodeIdx>,
    /// Inverse relation, maintained by `CommitGraph::add_parent`
    children: AppendOnlyVec<NodeIdx>,
    /// One edge descriptor per parent edge, consumed by rendering
    segments: AppendOnlyVec<Segment>,
    /// Commit metadata, attached when the log record is parsed; never read here
    details: OnceLock<CommitDetails>,
}

/// Metadata of a commit record, attached to a node by the log reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetails {
    /// Author name
    pub author: String,
    /// Author email
    pub email: String,
    /// Commit message (short)
    pub summary: String,
    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
}

impl CommitNode {
    /// Create a node with an initial guessed score, typically derived from
    /// arrival order in the log stream.
    pub fn new(id: Oid, initial_score: Score) -> Self {
        Self {
            id,
            score: AtomicU32::new(initial_score),
            relative: AtomicBool::new(false),
            parents: AppendOnlyVec::new(),
            children: AppendOnlyVec::new(),
            segments: AppendOnlyVec::new(),
            details: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Oid {
        self.id
    }

    pub fn score(&self) -> Score {
        self.score.load(Ordering::SeqCst)
    }

    /// True once this node is an ancestor of (or equal to) the checked-out
    /// commit.
    pub fn is_relative(&self) -> bool {
        self.relative.load(Ordering::SeqCst)
    }

    /// Unconditionally set the score, bypassing the ordering invariant.
    /// Only meaningful on the initial-assignment path, before any edges
    /// exist.
    pub fn override_score(&self, value: Score) {
        self.score.store(value, Ordering::SeqCst);
    }

    /// Fold externally known flags into the node (monotonic OR).
    pub fn apply_flags(&self, is_checked_out: bool) {
        if is_checked_out {
            self.relative.store(true, Ordering::SeqCst);
        }
    }

    /// Raise the score to `to` if it is currently lower. Returns the prior
    /// value, so the caller can tell whether the raise took effect.
    pub(crate) fn raise_score(&self, to: Score) -> Score {
        self.score.fetch_max(to, Ordering::SeqCst)
    }

    /// Set the relative flag, returning whether it was already set.
    pub(crate) fn mark_relative(&self) -> bool {
        self.relative.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn link_parent(&self, parent: NodeIdx) {
        self.parents.push(parent);
    }

    pub(crate) fn link_child(&self, child: NodeIdx) {
        self.children.push(child);
    }

    pub(crate) fn push_segment(&self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Arena slots of this node's direct ancestors. Snapshot-safe: appends
    /// that race with the iteration are simply not observed.
    pub fn parents(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.parents.iter().copied()
    }

    /// Arena slots of the nodes that named this node as a parent.
    pub fn children(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.children.iter().copied()
    }

    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Check if this is a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.len() == 0
    }

    /// Check if this is a merge commit (multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Point-in-time copy of the edge descriptors that start at this node.
    pub fn start_segments(&self) -> Vec<Segment> {
        self.segments.iter().copied().collect()
    }

    /// Attach the commit metadata. Returns false if it was already attached.
    pub fn attach_details(&self, details: CommitDetails) -> bool {
        self.details.set(details).is_ok()
    }

    pub fn details(&self) -> Option<&CommitDetails> {
        self.details.get()
    }
}

impl std::fmt::Debug for CommitNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitNode")
            .field("id", &self.id)
            .field("score", &self.score())
            .field("relative", &self.is_relative())
            .field("parents", &self.parents.len())
            .field("children", &self.children.len())
            .finish()
    }
}
