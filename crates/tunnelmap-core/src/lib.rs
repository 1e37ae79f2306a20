//! # tunnelmap-core
//!
//! Shared library for TunnelMap containing the topology graph model, the
//! connection rules, container layout, address inference, and the instance
//! URL format understood by the remote control APIs.
//!
//! This crate has zero dependencies on network sockets, async runtimes, or UI
//! frameworks.  Every function here is a pure transform over a graph snapshot
//! and can be unit-tested without any harness.
//!
//! # Architecture overview
//!
//! An operator composes a network of tunnel endpoints as a directed graph:
//!
//! - **Masters** (`M`) are containers, one per remote control API.
//! - **Servers** (`S`) and **clients** (`C`) live inside masters and become
//!   tunnel instances on submission.
//! - **Targets** (`T`) and **user entries** (`U`) are free-standing terminals.
//!
//! This crate is split into two modules:
//!
//! - **`domain`** – The graph entities and the collaborators that keep its
//!   derived state consistent: the connection validator, handle orientation,
//!   container layout, address resolution, and the [`GraphStore`] that runs
//!   them after every mutation.
//!
//! - **`protocol`** – The `server://` / `client://` instance URL encoding sent
//!   to the control APIs, and its decoder.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tunnelmap_core::GraphStore` instead of `tunnelmap_core::domain::graph::GraphStore`.
pub use domain::address::{resolve_client_tunnel_address, ClientAddress};
pub use domain::graph::{GraphError, GraphEvent, GraphStore};
pub use domain::master::MasterConfig;
pub use domain::node::{
    Edge, EdgeId, EdgeStyle, Handle, LogLevel, Node, NodeData, NodeId, NodeRole, Position, Size,
    SubmissionState, SubmissionStatus, TlsMode,
};
pub use domain::validator::{can_connect, ValidationError};
pub use protocol::instance_url::{
    build_instance_url, parse_instance_url, InstanceParams, InstanceRole, InstanceUrlError,
};
