pub mod core;
pub mod git_backend;

pub use crate::core::{
    CommitDetails, CommitGraph, CommitNode, GraphStats, NodeIdx, Score, Segment, SegmentKind,
};
pub use crate::git_backend::HistoryLoader;
