//! Domain entities for TunnelMap.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//! Nothing here opens a socket, reads a file, or spawns a task; the editor
//! crate owns all of that and calls into these modules with graph snapshots.
//!
//! Leaf-first dependency order:
//!
//! - **`node`** – Node/edge entity types shared by everything else.
//! - **`master`** – Description of one remote control API.
//! - **`address`** – Infers the address a client must dial to reach a server.
//! - **`validator`** – Decides whether a proposed connection is legal.
//! - **`handles`** – Decides which side of each node an edge attaches to.
//! - **`layout`** – Container and leaf node sizing.
//! - **`graph`** – The store that owns the node/edge collections and runs the
//!   collaborators above after every mutation.

pub mod address;
pub mod graph;
pub mod handles;
pub mod layout;
pub mod master;
pub mod node;
pub mod validator;
