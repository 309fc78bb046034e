use append_only_vec::AppendOnlyVec;
use dashmap::DashMap;
use git2::Oid;
use smallvec::SmallVec;

use crate::core::node::{CommitNode, NodeIdx, Score};
use crate::core::segment::Segment;

/// Directed acyclic graph of commit history, built incrementally as commits
/// stream in from a log reader.
///
/// Nodes live in an append-only arena and are addressed by [`NodeIdx`];
/// parent/child relations are index sets into the arena. All mutating
/// operations are safe to call concurrently from multiple workers: edge
/// collections grow lock-free, scores are raised with atomic maximum updates
/// and the relative flag is a monotonic boolean. The graph only ever grows;
/// nodes and edges are never removed.
pub struct CommitGraph {
    /// Node arena; a slot never moves once pushed
    nodes: AppendOnlyVec<CommitNode>,
    /// Commit ID -> arena slot
    index: DashMap<Oid, NodeIdx>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self {
            nodes: AppendOnlyVec::new(),
            index: DashMap::new(),
        }
    }

    /// Get the node for `id`, creating it with `initial_score` on first
    /// sight. One node exists per distinct commit ID for the lifetime of the
    /// graph; the initial score is the caller's best guess, typically the
    /// arrival index in the log stream.
    pub fn intern(&self, id: Oid, initial_score: Score) -> NodeIdx {
        *self
            .index
            .entry(id)
            .or_insert_with(|| self.nodes.push(CommitNode::new(id, initial_score)))
    }

    pub fn lookup(&self, id: &Oid) -> Option<NodeIdx> {
        self.index.get(id).map(|slot| *slot)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CommitNode> {
        self.nodes.iter()
    }

    /// Link `parent` as a direct ancestor of `child` and re-establish the
    /// ordering invariant, raising the parent to at least `min_score`.
    /// Returns the maximum score produced by the propagation.
    ///
    /// This is the single graph-mutating entry point. Calls for distinct
    /// edges may race freely; the caller guarantees at most one call per
    /// concrete child-parent pair. Panics if the parent fails to outrank the
    /// child afterwards, which indicates corrupt input (a cycle) or a bug.
    pub fn add_parent(&self, child: NodeIdx, parent: NodeIdx, min_score: Score) -> Score {
        let child_node = &self.nodes[child];
        let parent_node = &self.nodes[parent];

        // Relativity must reach the parent before the edge is published, so
        // no traversal can see a relative child with a non-relative parent.
        if child_node.is_relative() {
            self.make_relative(parent);
        }

        child_node.link_parent(parent);
        parent_node.link_child(child);

        // A marking that raced the link above may have scanned the parent
        // list before our push landed; re-propagate now that the edge is
        // visible.
        if child_node.is_relative() && !parent_node.is_relative() {
            self.make_relative(parent);
        }

        // The choke point where "this parent must outrank this child" is
        // enforced, whatever provisional score the parent arrived with.
        let child_score = child_node.score();
        let floor = min_score.max(child_score + 1);
        let max_seen = self.ensure_score_above(parent, floor);

        let segment = if child_node.parent_count() > 1 {
            Segment::merge(child_node.id(), parent_node.id())
        } else {
            Segment::new(child_node.id(), parent_node.id())
        };
        child_node.push_segment(segment);

        let parent_score = parent_node.score();
        assert!(
            parent_score > child_score,
            "score invariant violated: parent {} (score {}) does not outrank child {} (score {})",
            parent_node.id(),
            parent_score,
            child_node.id(),
            child_score,
        );

        max_seen
    }

    /// Raise `node`'s score to at least `min_score` and transitively keep
    /// every ancestor strictly above its descendants. Returns the maximum
    /// score seen across the visited subtree, or the current score when
    /// nothing had to change.
    ///
    /// Iterative on an explicit work stack: ancestor chains can be tens of
    /// thousands of nodes deep. Per-node updates are atomic raise-only
    /// maxima, so propagations racing from different start nodes compose
    /// without a lock; a node already at or above its bound is left alone
    /// and not re-pushed, which bounds the work to the nodes that actually
    /// move.
    pub fn ensure_score_above(&self, node: NodeIdx, min_score: Score) -> Score {
        let prior = self.nodes[node].raise_score(min_score);
        if prior >= min_score {
            return prior;
        }

        let mut max_seen = min_score;
        let mut stack: SmallVec<[NodeIdx; 32]> = SmallVec::new();
        stack.push(node);
        while let Some(idx) = stack.pop() {
            // re-read: a racing propagation may have raised this node again
            let bound = self.nodes[idx].score() + 1;
            for parent in self.nodes[idx].parents() {
                if self.nodes[parent].raise_score(bound) < bound {
                    max_seen = max_seen.max(bound);
                    stack.push(parent);
                }
            }
        }
        max_seen
    }

    /// Mark `node` and every strict ancestor as relative to the current
    /// checkout.
    ///
    /// An already-relative node is skipped outright: relativity implies the
    /// whole ancestor set is marked, so there is nothing left to flood. The
    /// same pruning keeps the iterative walk from revisiting shared
    /// ancestors through merge fan-in.
    pub fn make_relative(&self, node: NodeIdx) {
        if self.nodes[node].mark_relative() {
            return;
        }
        let mut stack: SmallVec<[NodeIdx; 32]> = SmallVec::new();
        stack.push(node);
        while let Some(idx) = stack.pop() {
            for parent in self.nodes[idx].parents() {
                if !self.nodes[parent].mark_relative() {
                    stack.push(parent);
                }
            }
        }
    }

    /// Get all root commits (no parents)
    pub fn roots(&self) -> Vec<NodeIdx> {
        (0..self.nodes.len())
            .filter(|&idx| self.nodes[idx].is_root())
            .collect()
    }

    /// Get all leaf commits (no children)
    pub fn leaves(&self) -> Vec<NodeIdx> {
        (0..self.nodes.len())
            .filter(|&idx| self.nodes[idx].child_count() == 0)
            .collect()
    }

    /// Check if the graph contains orphan branches
    pub fn has_orphan_branches(&self) -> bool {
        self.roots().len() > 1
    }

    /// Get statistics about the graph
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_commits: self.nodes.len(),
            ..GraphStats::default()
        };
        for node in self.nodes.iter() {
            stats.total_edges += node.parent_count();
            if node.is_merge() {
                stats.merge_commits += 1;
            }
            if node.is_root() {
                stats.root_commits += 1;
            }
            if node.child_count() == 0 {
                stats.leaf_commits += 1;
            }
            if node.is_relative() {
                stats.relative_commits += 1;
            }
            stats.max_score = stats.max_score.max(node.score());
        }
        stats.has_orphans = stats.root_commits > 1;
        stats
    }
}

impl std::ops::Index<NodeIdx> for CommitGraph {
    type Output = CommitNode;

    fn index(&self, idx: NodeIdx) -> &CommitNode {
        &self.nodes[idx]
    }
}

impl Default for CommitGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommitGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitGraph")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub total_commits: usize,
    pub total_edges: usize,
    pub merge_commits: usize,
    pub root_commits: usize,
    pub leaf_commits: usize,
    pub relative_commits: usize,
    pub max_score: Score,
    pub has_orphans: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::segment::SegmentKind;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::thread;

    fn oid(n: u32) -> Oid {
        Oid::from_str(&format!("{:040x}", n)).unwrap()
    }

    #[test]
    fn single_edge_wires_both_ends_and_raises_the_parent() {
        let graph = CommitGraph::new();
        let child = graph.intern(oid(1), 0);
        let parent = graph.intern(oid(2), 0);

        let max = graph.add_parent(child, parent, 1);

        assert_eq!(max, 1);
        assert_eq!(graph[parent].score(), 1);
        assert_eq!(graph[child].parents().collect::<Vec<_>>(), vec![parent]);
        assert_eq!(graph[parent].children().collect::<Vec<_>>(), vec![child]);

        let segments = graph[child].start_segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].from, oid(1));
        assert_eq!(segments[0].to, oid(2));
        assert_eq!(segments[0].kind, SegmentKind::Regular);
    }

    #[test]
    fn raising_a_deep_node_re_raises_the_whole_chain() {
        let graph = CommitGraph::new();
        let a = graph.intern(oid(1), 5);
        let b = graph.intern(oid(2), 0);
        let c = graph.intern(oid(3), 0);

        let max = graph.add_parent(b, a, 6);
        assert_eq!(max, 6);
        assert!(graph[a].score() >= 6);

        // b must now outrank c, which pushes a up a second time
        let max = graph.add_parent(c, b, 7);
        assert_eq!(max, 8);
        assert_eq!(graph[b].score(), 7);
        assert_eq!(graph[a].score(), 8);
        assert!(graph[a].score() > graph[b].score());
        assert!(graph[b].score() > graph[c].score());
    }

    #[test]
    fn relative_floods_toward_ancestors_only() {
        let graph = CommitGraph::new();
        let a = graph.intern(oid(1), 0);
        let b = graph.intern(oid(2), 0);
        let c = graph.intern(oid(3), 0);
        graph.add_parent(b, a, 1);
        graph.add_parent(c, b, 2);

        graph.make_relative(b);

        assert!(graph[a].is_relative());
        assert!(graph[b].is_relative());
        assert!(!graph[c].is_relative());
    }

    #[test]
    fn raise_below_the_current_score_changes_nothing() {
        let graph = CommitGraph::new();
        let a = graph.intern(oid(1), 0);
        let b = graph.intern(oid(2), 0);
        graph.add_parent(b, a, 4);
        assert_eq!(graph[a].score(), 4);

        assert_eq!(graph.ensure_score_above(b, 0), 0);
        assert_eq!(graph.ensure_score_above(a, 4), 4);
        assert_eq!(graph[a].score(), 4);
        assert_eq!(graph[b].score(), 0);
    }

    #[test]
    fn every_added_parent_is_visible_from_both_ends() {
        let graph = CommitGraph::new();
        let child = graph.intern(oid(100), 0);
        let parents: Vec<NodeIdx> = (1..=5)
            .map(|n| graph.intern(oid(n), 0))
            .collect();

        for (i, &parent) in parents.iter().enumerate() {
            graph.add_parent(child, parent, i as Score + 1);
        }

        assert_eq!(graph[child].parent_count(), 5);
        assert!(graph[child].is_merge());
        for &parent in &parents {
            assert!(graph[parent].children().any(|idx| idx == child));
            assert!(graph[parent].score() > graph[child].score());
        }

        // first edge is plain, later ones are merge edges
        let kinds: Vec<SegmentKind> = graph[child]
            .start_segments()
            .iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(kinds[0], SegmentKind::Regular);
        assert!(kinds[1..].iter().all(|&k| k == SegmentKind::Merge));
    }

    #[test]
    fn marking_twice_marks_the_same_set_once() {
        let graph = CommitGraph::new();
        let top = graph.intern(oid(1), 0);
        let left = graph.intern(oid(2), 0);
        let right = graph.intern(oid(3), 0);
        let bottom = graph.intern(oid(4), 0);
        graph.add_parent(left, top, 1);
        graph.add_parent(right, top, 1);
        graph.add_parent(bottom, left, 2);
        graph.add_parent(bottom, right, 2);

        graph.make_relative(bottom);
        let first: Vec<bool> = graph.nodes().map(|n| n.is_relative()).collect();
        graph.make_relative(bottom);
        let second: Vec<bool> = graph.nodes().map(|n| n.is_relative()).collect();

        assert_eq!(first, second);
        assert!(first.iter().all(|&r| r));
    }

    #[test]
    fn edges_added_after_marking_carry_relativity_to_the_parent() {
        let graph = CommitGraph::new();
        let parent = graph.intern(oid(1), 0);
        let child = graph.intern(oid(2), 0);

        graph.make_relative(child);
        assert!(!graph[parent].is_relative());

        graph.add_parent(child, parent, 1);
        assert!(graph[parent].is_relative());
    }

    #[test]
    fn intern_returns_the_same_slot_for_a_known_id() {
        let graph = CommitGraph::new();
        let first = graph.intern(oid(7), 3);
        let second = graph.intern(oid(7), 99);
        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
        // the original score guess wins
        assert_eq!(graph[first].score(), 3);
        assert_eq!(graph.lookup(&oid(7)), Some(first));
        assert_eq!(graph.lookup(&oid(8)), None);
    }

    #[test]
    fn stats_reflect_the_linked_structure() {
        let graph = CommitGraph::new();
        let base = graph.intern(oid(1), 0);
        let b1 = graph.intern(oid(2), 0);
        let b2 = graph.intern(oid(3), 0);
        let merge = graph.intern(oid(4), 0);
        let stray = graph.intern(oid(5), 0);
        graph.add_parent(b1, base, 1);
        graph.add_parent(b2, base, 1);
        graph.add_parent(merge, b1, 2);
        graph.add_parent(merge, b2, 2);
        graph.make_relative(merge);

        let stats = graph.stats();
        assert_eq!(stats.total_commits, 5);
        assert_eq!(stats.total_edges, 4);
        assert_eq!(stats.merge_commits, 1);
        assert_eq!(stats.root_commits, 2); // base and the stray node
        assert_eq!(stats.leaf_commits, 2); // merge and the stray node
        assert_eq!(stats.relative_commits, 4);
        assert!(stats.has_orphans);
        assert_eq!(stats.max_score, graph[base].score());

        assert_eq!(graph.roots(), vec![base, stray]);
        assert_eq!(graph.leaves(), vec![merge, stray]);
        assert!(graph.has_orphan_branches());
    }

    /// Insertion order must not matter: the score/relative assignment is the
    /// least fixed point of the per-edge constraints, so a shuffled
    /// multi-threaded build has to land on exactly the sequential result.
    #[test]
    fn concurrent_insertion_matches_the_sequential_fixed_point() {
        const NODES: usize = 400;
        const WORKERS: usize = 4;
        let mut rng = StdRng::seed_from_u64(42);

        // parents get smaller indices than their children, so the input is
        // acyclic by construction; at most one edge per concrete pair
        let mut edges: Vec<(NodeIdx, NodeIdx, Score)> = Vec::new();
        let mut pairs = HashSet::new();
        for child in 1..NODES {
            let parent = rng.gen_range(0..child);
            pairs.insert((child, parent));
            edges.push((child, parent, rng.gen_range(0..60)));
            if child > 2 && rng.gen_bool(0.3) {
                let extra = rng.gen_range(0..child);
                if pairs.insert((child, extra)) {
                    edges.push((child, extra, rng.gen_range(0..60)));
                }
            }
        }
        let marks: Vec<NodeIdx> = (0..NODES).filter(|_| rng.gen_bool(0.05)).collect();

        let sequential = CommitGraph::new();
        for i in 0..NODES {
            sequential.intern(oid(i as u32), i as Score);
        }
        for &(child, parent, floor) in &edges {
            sequential.add_parent(child, parent, floor);
        }
        for &mark in &marks {
            sequential.make_relative(mark);
        }

        let concurrent = CommitGraph::new();
        for i in 0..NODES {
            concurrent.intern(oid(i as u32), i as Score);
        }
        let mut shuffled = edges.clone();
        shuffled.shuffle(&mut rng);
        thread::scope(|scope| {
            for chunk in shuffled.chunks(shuffled.len() / WORKERS + 1) {
                let concurrent = &concurrent;
                scope.spawn(move || {
                    for &(child, parent, floor) in chunk {
                        concurrent.add_parent(child, parent, floor);
                    }
                });
            }
            let concurrent = &concurrent;
            let marks = &marks;
            scope.spawn(move || {
                for &mark in marks {
                    concurrent.make_relative(mark);
                }
            });
        });

        for i in 0..NODES {
            assert_eq!(
                sequential[i].score(),
                concurrent[i].score(),
                "score of node {} depends on insertion order",
                i
            );
            assert_eq!(
                sequential[i].is_relative(),
                concurrent[i].is_relative(),
                "relative flag of node {} depends on insertion order",
                i
            );
        }
        for &(child, parent, _) in &edges {
            assert!(concurrent[parent].score() > concurrent[child].score());
        }
    }
}
