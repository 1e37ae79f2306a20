//! BuildTopologyUseCase: turns a declarative topology description into a graph.
//!
//! The description names nodes by label and lists links between labels.  Every
//! node and link goes through the [`GraphStore`] commands, so containers are
//! sized, handles oriented, cross-master client addresses resolved and target
//! addresses copied exactly as if an operator had drawn the graph by hand.
//!
//! Links the connection rules reject do not abort the build; they are
//! collected in [`BuiltTopology::rejected`] so the caller can report them.
//!
//! ```toml
//! [[containers]]
//! label = "edge-a"
//! master = "m1"
//!
//!   [[containers.nodes]]
//!   label = "web-in"
//!   role = "server"
//!   tunnel_address = "0.0.0.0:10000"
//!
//! [[nodes]]
//! label = "web"
//! role = "target"
//! target_address = "127.0.0.1:8080"
//!
//! [[links]]
//! from = "web-in"
//! to = "web"
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use tunnelmap_core::{GraphError, GraphStore, LogLevel, MasterConfig, Node, NodeId, NodeRole, TlsMode};

/// Errors that abort building a topology.
#[derive(Debug, Error)]
pub enum BuildTopologyError {
    #[error("label '{0}' is used by more than one node")]
    DuplicateLabel(String),

    #[error("link refers to unknown node '{0}'")]
    UnknownLabel(String),

    #[error("could not place node '{label}': {source}")]
    Placement {
        label: String,
        #[source]
        source: GraphError,
    },
}

// ── Description schema ────────────────────────────────────────────────────────

/// A topology description.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TopologyConfig {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    /// Free-standing nodes: targets, user entries, top-level servers/clients.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

/// A master container and its children.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContainerSpec {
    pub label: String,
    /// Id of the configured control API this container represents.
    pub master: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// One non-container node.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub label: String,
    pub role: NodeRole,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub tunnel_key: String,
    #[serde(default)]
    pub tunnel_address: String,
    #[serde(default)]
    pub target_address: String,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default)]
    pub log: LogLevel,
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub key_path: String,
    pub min_pool: Option<u32>,
    pub max_pool: Option<u32>,
    #[serde(default)]
    pub expanded: bool,
}

/// A directed link between two labelled nodes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LinkSpec {
    pub from: String,
    pub to: String,
}

impl NodeSpec {
    fn to_node(&self) -> Node {
        Node::new(self.role, self.label.clone())
            .at(self.x, self.y)
            .with_data(|d| {
                d.tunnel_key.clone_from(&self.tunnel_key);
                d.tunnel_address.clone_from(&self.tunnel_address);
                d.target_address.clone_from(&self.target_address);
                d.tls_mode = self.tls;
                d.log_level = self.log;
                d.cert_path.clone_from(&self.cert_path);
                d.key_path.clone_from(&self.key_path);
                d.min_pool = self.min_pool;
                d.max_pool = self.max_pool;
                d.is_expanded = self.expanded;
            })
    }
}

// ── Use case ──────────────────────────────────────────────────────────────────

/// A link the connection rules refused.
#[derive(Debug, Clone)]
pub struct RejectedLink {
    pub from: String,
    pub to: String,
    pub reason: GraphError,
}

/// Result of [`build_topology`].
#[derive(Debug)]
pub struct BuiltTopology {
    pub store: GraphStore,
    /// Node id of every label.
    pub labels: HashMap<String, NodeId>,
    pub rejected: Vec<RejectedLink>,
}

impl BuiltTopology {
    pub fn id_of(&self, label: &str) -> Option<&NodeId> {
        self.labels.get(label)
    }
}

/// Builds a graph from `config`, registering `masters` first.
///
/// # Errors
///
/// - [`BuildTopologyError::DuplicateLabel`] if two nodes share a label.
/// - [`BuildTopologyError::UnknownLabel`] if a link names a missing node.
/// - [`BuildTopologyError::Placement`] if a node cannot be added (for example a
///   target declared inside a container).
pub fn build_topology<I>(config: &TopologyConfig, masters: I) -> Result<BuiltTopology, BuildTopologyError>
where
    I: IntoIterator<Item = MasterConfig>,
{
    let mut store = GraphStore::new();
    for master in masters {
        store.upsert_master(master);
    }

    let mut labels: HashMap<String, NodeId> = HashMap::new();
    let mut place = |store: &mut GraphStore, label: &str, node: Node| -> Result<NodeId, BuildTopologyError> {
        if labels.contains_key(label) {
            return Err(BuildTopologyError::DuplicateLabel(label.to_string()));
        }
        let id = store.add_node(node).map_err(|source| BuildTopologyError::Placement {
            label: label.to_string(),
            source,
        })?;
        labels.insert(label.to_string(), id.clone());
        Ok(id)
    };

    for container in &config.containers {
        let node = Node::master(container.label.clone(), container.master.clone())
            .at(container.x, container.y);
        let container_id = place(&mut store, &container.label, node)?;
        for child in &container.nodes {
            place(&mut store, &child.label, child.to_node().in_container(&container_id))?;
        }
    }
    for entry in &config.nodes {
        place(&mut store, &entry.label, entry.to_node())?;
    }

    let mut rejected = Vec::new();
    for link in &config.links {
        let source = labels
            .get(&link.from)
            .ok_or_else(|| BuildTopologyError::UnknownLabel(link.from.clone()))?;
        let target = labels
            .get(&link.to)
            .ok_or_else(|| BuildTopologyError::UnknownLabel(link.to.clone()))?;
        if let Err(reason) = store.connect(source, target) {
            warn!("link {} -> {} rejected: {reason}", link.from, link.to);
            rejected.push(RejectedLink {
                from: link.from.clone(),
                to: link.to.clone(),
                reason,
            });
        }
    }

    info!(
        "built topology: {} nodes, {} edges, {} rejected link(s)",
        store.node_count(),
        store.edge_count(),
        rejected.len()
    );
    Ok(BuiltTopology {
        store,
        labels,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnelmap_core::ValidationError;

    fn no_masters() -> Vec<MasterConfig> {
        Vec::new()
    }

    fn parse(toml_str: &str) -> TopologyConfig {
        toml::from_str(toml_str).expect("valid topology TOML")
    }

    #[test]
    fn test_builds_containers_children_and_links() {
        // Arrange
        let config = parse(
            r#"
[[containers]]
label = "edge"
master = "m1"

  [[containers.nodes]]
  label = "srv"
  role = "server"
  tunnel_address = "0.0.0.0:10000"
  target_address = "127.0.0.1:8080"

[[nodes]]
label = "web"
role = "target"

[[links]]
from = "srv"
to = "web"
"#,
        );

        // Act
        let built = build_topology(&config, [MasterConfig::new("m1", "https://m1.example.com/api")]).unwrap();

        // Assert
        assert!(built.rejected.is_empty());
        assert_eq!(built.store.edge_count(), 1);
        let web = built.store.node(built.id_of("web").unwrap()).unwrap();
        assert_eq!(web.data.target_address, "127.0.0.1:8080");
        let srv = built.store.node(built.id_of("srv").unwrap()).unwrap();
        assert_eq!(srv.parent.as_ref(), built.id_of("edge"));
    }

    #[test]
    fn test_rejected_links_are_collected() {
        let config = parse(
            r#"
[[nodes]]
label = "u"
role = "user"

[[nodes]]
label = "t"
role = "target"

[[links]]
from = "u"
to = "t"
"#,
        );

        let built = build_topology(&config, no_masters()).unwrap();

        assert_eq!(built.rejected.len(), 1);
        assert!(matches!(
            built.rejected[0].reason,
            GraphError::Rejected(ValidationError::UserTargetRole)
        ));
    }

    #[test]
    fn test_duplicate_label_is_an_error() {
        let config = parse(
            r#"
[[nodes]]
label = "x"
role = "user"

[[nodes]]
label = "x"
role = "target"
"#,
        );
        assert!(matches!(
            build_topology(&config, no_masters()),
            Err(BuildTopologyError::DuplicateLabel(label)) if label == "x"
        ));
    }

    #[test]
    fn test_unknown_link_label_is_an_error() {
        let config = parse(
            r#"
[[nodes]]
label = "u"
role = "user"

[[links]]
from = "u"
to = "nowhere"
"#,
        );
        assert!(matches!(
            build_topology(&config, no_masters()),
            Err(BuildTopologyError::UnknownLabel(label)) if label == "nowhere"
        ));
    }

    #[test]
    fn test_target_inside_container_is_a_placement_error() {
        let config = parse(
            r#"
[[containers]]
label = "edge"
master = "m1"

  [[containers.nodes]]
  label = "t"
  role = "target"
"#,
        );
        assert!(matches!(
            build_topology(&config, no_masters()),
            Err(BuildTopologyError::Placement { source: GraphError::ParentNotAllowed { .. }, .. })
        ));
    }
}
