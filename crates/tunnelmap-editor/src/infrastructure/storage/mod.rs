//! Storage infrastructure: reading the editor's input files.
//!
//! - `config` reads the TOML editor configuration (timeouts and the list of
//!   control APIs) from an explicit path or the platform config directory.
//! - `topology` reads a declarative topology description that is turned into
//!   a graph by the `build_topology` use case.
//!
//! Neither file is written back; the graph itself is not persisted.

pub mod config;
pub mod topology;
