//! Reads a topology description file.

use std::path::Path;

use crate::application::build_topology::TopologyConfig;
use crate::infrastructure::storage::config::ConfigError;

/// Loads and parses the TOML topology description at `path`.
///
/// Unlike the editor configuration, a missing topology file is an error.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_topology(path: &Path) -> Result<TopologyConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}
