use git2::Oid;

/// An edge descriptor connecting a commit to one of its parents.
///
/// Produced once per parent edge and consumed by a rendering layer; this
/// crate never reads one back after appending it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Origin commit ID (child)
    pub from: Oid,
    /// Destination commit ID (parent)
    pub to: Oid,
    /// Segment kind (for the renderer)
    pub kind: SegmentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// First parent edge of a commit
    Regular,
    /// Second and later parent edges of a merge commit
    Merge,
}

impl Segment {
    pub fn new(from: Oid, to: Oid) -> Self {
        Self {
            from,
            to,
            kind: SegmentKind::Regular,
        }
    }

    pub fn merge(from: Oid, to: Oid) -> Self {
        Self {
            from,
            to,
            kind: SegmentKind::Merge,
        }
    }
}
