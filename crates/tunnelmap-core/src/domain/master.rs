//! Description of one remote control API that a master container represents.

use serde::{Deserialize, Serialize};

use crate::domain::node::LogLevel;

/// Connection details and defaults of a control API.
///
/// Containers reference a `MasterConfig` by [`id`](MasterConfig::id) through
/// their `master_id` field; the graph store keeps the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    pub id: String,
    /// Human-readable name shown in confirmation prompts.
    pub name: String,
    /// Base URL of the control API, e.g. `https://master1.example.com:9090/api`.
    pub api_url: String,
    pub api_key: String,
    /// Level the master applies to instances that carry no `log` parameter.
    pub default_log_level: LogLevel,
}

impl MasterConfig {
    pub fn new(id: impl Into<String>, api_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            api_url: api_url.into(),
            api_key: String::new(),
            default_log_level: LogLevel::Info,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Returns `true` when both the API URL and the key are present.
    pub fn is_complete(&self) -> bool {
        !self.api_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}
