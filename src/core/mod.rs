pub mod graph;
pub mod node;
pub mod segment;

pub use graph::{CommitGraph, GraphStats};
pub use node::{CommitDetails, CommitNode, NodeIdx, Score};
pub use segment::{Segment, SegmentKind};
