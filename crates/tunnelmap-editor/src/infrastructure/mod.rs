//! Infrastructure layer for the topology editor.
//!
//! Contains the adapters that touch the outside world: the control API HTTP
//! client and its event-stream decoder, TOML file storage, and the terminal
//! confirmation prompt.
//!
//! **Dependency rule**: this layer may depend on `tunnelmap_core` and on the
//! seams declared by `application`; the domain never imports it.

pub mod control_api;
pub mod prompt;
pub mod sse;
pub mod storage;
