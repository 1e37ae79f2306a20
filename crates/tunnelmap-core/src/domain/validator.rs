//! Connection rules between graph nodes.
//!
//! [`can_connect`] decides whether a proposed edge is legal.  The rules are
//! checked in a fixed order and the first failure wins, so the reported
//! [`ValidationError`] is deterministic for any pair of nodes:
//!
//! 1. No self-loops.
//! 2. At most one edge per unordered node pair.
//! 3. Master containers are never endpoints.
//! 4. User entries never receive; targets never send.
//! 5. A user entry sends to one server or client, once.
//! 6. A target receives from one server or client, once.
//! 7. A server sends to clients or targets.
//! 8. A client sends to servers, clients or targets.
//! 9. Inside one container only `client → server` is allowed.
//!
//! On success the edge's cosmetic [`EdgeStyle`] is returned.  The style is a
//! pure function of the two roles and never influences validity.

use thiserror::Error;

use crate::domain::node::{Edge, EdgeStyle, Node, NodeRole};

/// Reason a proposed connection was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a node cannot connect to itself")]
    SelfLoop,

    #[error("these nodes are already connected")]
    Duplicate,

    #[error("master containers cannot be connected; connect their servers or clients instead")]
    MasterEndpoint,

    #[error("a user entry cannot receive connections")]
    UserAsTarget,

    #[error("a target cannot start a connection")]
    TargetAsSource,

    #[error("a user entry can only connect to a server or client")]
    UserTargetRole,

    #[error("this user entry already has an outgoing connection")]
    UserAlreadyConnected,

    #[error("a target can only be reached from a server or client")]
    TargetSourceRole,

    #[error("this target already has an incoming connection")]
    TargetAlreadyConnected,

    #[error("a server can only connect to a client or target")]
    ServerTargetRole,

    #[error("a client can only connect to a server, client or target")]
    ClientTargetRole,

    #[error("inside one container only a client may connect to a server")]
    InternalDirection,
}

/// Decides whether `source → target` may be added to a graph that already
/// contains `edges`.
///
/// # Errors
///
/// Returns the [`ValidationError`] of the first rule that fails.
pub fn can_connect<'a, I>(source: &Node, target: &Node, edges: I) -> Result<EdgeStyle, ValidationError>
where
    I: IntoIterator<Item = &'a Edge>,
{
    if source.id == target.id {
        return Err(ValidationError::SelfLoop);
    }

    // One pass over the edge set gathers everything rules 2, 5 and 6 need.
    let mut duplicate = false;
    let mut source_outgoing = 0usize;
    let mut target_incoming = 0usize;
    for edge in edges {
        if edge.joins(&source.id, &target.id) {
            duplicate = true;
        }
        if edge.source == source.id {
            source_outgoing += 1;
        }
        if edge.target == target.id {
            target_incoming += 1;
        }
    }

    if duplicate {
        return Err(ValidationError::Duplicate);
    }
    check_roles(source.role, target.role)?;
    if source.role == NodeRole::User && source_outgoing > 0 {
        return Err(ValidationError::UserAlreadyConnected);
    }
    if target.role == NodeRole::Target && target_incoming > 0 {
        return Err(ValidationError::TargetAlreadyConnected);
    }
    check_containment(source, target)?;

    Ok(edge_style(source.role, target.role))
}

/// Rules 3–8 restricted to the role table, ignoring edge history.
///
/// Cardinality checks for users and targets run after this in
/// [`can_connect`], so a `U → T` pair fails here with
/// [`ValidationError::UserTargetRole`] regardless of existing edges.
pub fn check_roles(source: NodeRole, target: NodeRole) -> Result<(), ValidationError> {
    use NodeRole::*;

    if source == Master || target == Master {
        return Err(ValidationError::MasterEndpoint);
    }
    if target == User {
        return Err(ValidationError::UserAsTarget);
    }
    if source == Target {
        return Err(ValidationError::TargetAsSource);
    }
    match (source, target) {
        (User, Server | Client) => Ok(()),
        (User, _) => Err(ValidationError::UserTargetRole),
        (Server | Client, Target) => Ok(()),
        (_, Target) => Err(ValidationError::TargetSourceRole),
        (Server, Client) => Ok(()),
        (Server, _) => Err(ValidationError::ServerTargetRole),
        (Client, Server | Client) => Ok(()),
        (Client, _) => Err(ValidationError::ClientTargetRole),
        // Master, Target as source and User as target are rejected above.
        _ => Err(ValidationError::MasterEndpoint),
    }
}

/// Rule 9: two nodes in the same container may only be joined `C → S`.
///
/// Also used by the graph store to re-check existing edges when a node is
/// moved between containers.
pub fn check_containment(source: &Node, target: &Node) -> Result<(), ValidationError> {
    let same_container = matches!(
        (&source.parent, &target.parent),
        (Some(a), Some(b)) if a == b
    );
    if same_container && !(source.role == NodeRole::Client && target.role == NodeRole::Server) {
        return Err(ValidationError::InternalDirection);
    }
    Ok(())
}

/// Cosmetic edge style for a role pair.
pub fn edge_style(source: NodeRole, target: NodeRole) -> EdgeStyle {
    use NodeRole::*;
    match (source, target) {
        (Server, Client) | (Client, Server) => EdgeStyle::Tunnel,
        (User | Server | Client, Target) => EdgeStyle::Delivery,
        _ => EdgeStyle::Plain,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
