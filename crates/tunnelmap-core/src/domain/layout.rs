//! Container and leaf node sizing.
//!
//! Two independent rules live here:
//!
//! - **Containers** (`M` nodes) grow geometrically with their direct child
//!   count: `MIN · GROWTH^n`.  Each extra child multiplies the footprint
//!   instead of adding a fixed increment, which keeps children visually
//!   separated without tracking per-child positions.
//! - **Leaves** (`S`/`C`/`T`/`U`) are a fixed icon square when collapsed, and
//!   a fixed width plus one line per populated detail field when expanded.
//!
//! Both are deterministic functions of the current graph, so applying them
//! twice in a row is a no-op.

use std::collections::BTreeMap;

use crate::domain::node::{Node, NodeId, NodeRole, Size};

/// Width of an empty container.
pub const CONTAINER_MIN_WIDTH: u32 = 360;
/// Height of an empty container.
pub const CONTAINER_MIN_HEIGHT: u32 = 240;
/// Per-child growth factor of a container's width and height.
pub const CONTAINER_GROWTH: f64 = 1.15;

/// Side length of a collapsed leaf node.
pub const LEAF_COLLAPSED_SIZE: u32 = 56;
/// Width of an expanded leaf node.
pub const LEAF_EXPANDED_WIDTH: u32 = 240;
/// Height of an expanded leaf node with no optional field populated.
pub const LEAF_BASE_HEIGHT: u32 = 64;
/// Extra height per populated optional field.
pub const LEAF_LINE_HEIGHT: u32 = 20;

/// Size of a container holding `child_count` direct children.
pub fn container_size(child_count: usize) -> Size {
    if child_count == 0 {
        return Size::new(CONTAINER_MIN_WIDTH, CONTAINER_MIN_HEIGHT);
    }
    let exponent = i32::try_from(child_count).unwrap_or(i32::MAX);
    let factor = CONTAINER_GROWTH.powi(exponent);
    // `as` saturates for values beyond u32::MAX.
    Size::new(
        (f64::from(CONTAINER_MIN_WIDTH) * factor).round() as u32,
        (f64::from(CONTAINER_MIN_HEIGHT) * factor).round() as u32,
    )
}

/// Recomputes the size of container `container` from its current child count.
///
/// Returns `true` if the stored size changed.  The new size is compared with
/// the stored one before writing, so a second call with no intervening child
/// change leaves `nodes` untouched and returns `false`.  Ids that do not name
/// a master container are ignored.
pub fn resize_container(container: &NodeId, nodes: &mut BTreeMap<NodeId, Node>) -> bool {
    let child_count = nodes
        .values()
        .filter(|n| n.parent.as_ref() == Some(container))
        .count();
    let size = container_size(child_count);

    match nodes.get_mut(container) {
        Some(node) if node.role == NodeRole::Master && node.size != size => {
            node.size = size;
            true
        }
        _ => false,
    }
}

/// Number of optional detail lines an expanded leaf shows.
fn populated_fields(node: &Node) -> u32 {
    let data = &node.data;
    [
        !data.tunnel_address.trim().is_empty(),
        !data.target_address.trim().is_empty(),
        !data.submission.is_none(),
    ]
    .into_iter()
    .filter(|populated| *populated)
    .count() as u32
}

/// Size of a leaf node given its expanded state and populated fields.
///
/// Only the *number* of populated fields matters, never their length.
pub fn leaf_size(node: &Node) -> Size {
    if !node.data.is_expanded {
        return Size::new(LEAF_COLLAPSED_SIZE, LEAF_COLLAPSED_SIZE);
    }
    Size::new(
        LEAF_EXPANDED_WIDTH,
        LEAF_BASE_HEIGHT + LEAF_LINE_HEIGHT * populated_fields(node),
    )
}

/// Applies [`leaf_size`] to a non-container node.  Returns `true` on change.
pub fn apply_leaf_size(node: &mut Node) -> bool {
    if node.role == NodeRole::Master {
        return false;
    }
    let size = leaf_size(node);
    if node.size == size {
        return false;
    }
    node.size = size;
    true
}

// ── Tests ─────────────────────────────────────────────────────────────────────
