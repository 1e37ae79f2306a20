//! Handle orientation: which side of each node an edge attaches to.
//!
//! Orientation is independent of validity.  It only depends on the vertical
//! centres of the two endpoints plus two role overrides, and is recomputed
//! when either endpoint stops moving (drag end, never during a drag).

use std::collections::BTreeSet;

use crate::domain::node::{Edge, Handle, Node, NodeId, NodeRole, Position};

/// The inputs the resolver needs from one endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub role: NodeRole,
    /// Vertical centre in absolute canvas coordinates.
    pub center_y: f64,
}

impl Anchor {
    /// Builds the anchor of `node` whose top-left corner sits at the absolute
    /// position `origin`.
    pub fn of(node: &Node, origin: Position) -> Self {
        Self {
            role: node.role,
            center_y: origin.y + f64::from(node.size.height) / 2.0,
        }
    }
}

/// Attachment sides chosen for one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlePair {
    pub source: Handle,
    pub target: Handle,
}

/// Chooses the source and target handles for an edge.
///
/// A target at or below its source is entered from the top (`bottom → top`),
/// otherwise from the bottom (`top → bottom`).  A user entry always emits from
/// its bottom handle and a target always receives on its top handle; for a
/// direct `U → T` pair both overrides agree.
pub fn resolve_handles(source: Anchor, target: Anchor) -> HandlePair {
    let (mut source_handle, mut target_handle) = if target.center_y >= source.center_y {
        (Handle::Bottom, Handle::Top)
    } else {
        (Handle::Top, Handle::Bottom)
    };

    if source.role == NodeRole::User {
        source_handle = Handle::Bottom;
    }
    if target.role == NodeRole::Target {
        target_handle = Handle::Top;
    }

    HandlePair {
        source: source_handle,
        target: target_handle,
    }
}

/// Collects the handles of `node` that carry at least one of `edges`.
pub fn active_handles<'a, I>(node: &NodeId, edges: I) -> BTreeSet<Handle>
where
    I: IntoIterator<Item = &'a Edge>,
{
    let mut handles = BTreeSet::new();
    for edge in edges {
        if &edge.source == node {
            handles.insert(edge.source_handle);
        }
        if &edge.target == node {
            handles.insert(edge.target_handle);
        }
    }
    handles
}
