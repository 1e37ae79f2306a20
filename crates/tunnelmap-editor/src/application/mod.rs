//! Application layer use cases for the topology editor.
//!
//! The *application* layer sits between the domain in `tunnelmap_core`
//! (graph rules, layout, address inference) and the infrastructure (HTTP,
//! files, terminal).  Use cases here:
//!
//! - **Orchestrate** the [`GraphStore`](tunnelmap_core::GraphStore) to fulfil
//!   an operator goal, such as "create every tunnel in this graph".
//! - **Depend on seams** ([`ControlApi`](crate::infrastructure::control_api::ControlApi),
//!   [`Confirmer`](submit::Confirmer)) so tests can drive them without a
//!   network or a terminal.
//!
//! # Sub-modules
//!
//! - **`build_topology`** – Builds a graph from a declarative description,
//!   passing every node and link through the store's commands.
//!
//! - **`plan`** – Enumerates the instances a graph turns into and groups them
//!   by owning master.
//!
//! - **`handshake`** – Watches a master's event stream for the tunnel
//!   handshake log line.
//!
//! - **`submit`** – The submission cycle: preflight, confirmation, concurrent
//!   creation and handshake listening.

pub mod build_topology;
pub mod handshake;
pub mod plan;
pub mod submit;
