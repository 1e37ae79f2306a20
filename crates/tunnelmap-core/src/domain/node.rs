//! Node and edge entities of the topology graph.
//!
//! A [`Node`] is one of five roles (see [`NodeRole`]).  Servers and clients
//! carry the configuration that later becomes a tunnel instance; masters are
//! containers; targets and user entries are terminals.  An [`Edge`] is a
//! directed connection between two non-master nodes.
//!
//! Geometry (`position`, `size`) and `active_handles` are *derived* for most
//! nodes: the [`GraphStore`](crate::domain::graph::GraphStore) recomputes them
//! after each mutation, so callers should not write them directly.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::layout;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Unique identifier of a node.
///
/// Freshly placed nodes get `"<role>-<uuid v4>"`; nodes built from an external
/// description may use any string that is unique within the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Generates a new random id for a node of the given role.
    pub fn generate(role: NodeRole) -> Self {
        Self(format!("{}-{}", role.as_str(), Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique identifier of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(String);

impl EdgeId {
    pub fn generate() -> Self {
        Self(format!("edge-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

/// The five node roles of the topology graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// `M`: a container representing one remote control API.
    Master,
    /// `S`: listens for inbound tunnel connections and forwards to a target.
    Server,
    /// `C`: dials a server, or forwards local traffic directly (single-ended).
    Client,
    /// `T`: the final service address traffic is delivered to.
    Target,
    /// `U`: the traffic originator.
    User,
}

impl NodeRole {
    /// All roles, in `M S C T U` order.
    pub const ALL: [NodeRole; 5] = [
        NodeRole::Master,
        NodeRole::Server,
        NodeRole::Client,
        NodeRole::Target,
        NodeRole::User,
    ];

    /// Single-letter code used in logs (`M`, `S`, `C`, `T`, `U`).
    pub fn code(self) -> char {
        match self {
            NodeRole::Master => 'M',
            NodeRole::Server => 'S',
            NodeRole::Client => 'C',
            NodeRole::Target => 'T',
            NodeRole::User => 'U',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Server => "server",
            NodeRole::Client => "client",
            NodeRole::Target => "target",
            NodeRole::User => "user",
        }
    }

    /// Returns `true` for servers and clients, the only roles that become
    /// tunnel instances and the only roles allowed inside a container.
    pub fn is_tunnel_endpoint(self) -> bool {
        matches!(self, NodeRole::Server | NodeRole::Client)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Canvas position of a node's top-left corner.
///
/// Children of a container are positioned relative to the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Component-wise sum, used to turn a child's relative position absolute.
    pub fn offset_by(self, origin: Position) -> Position {
        Position::new(self.x + origin.x, self.y + origin.y)
    }
}

/// Rendered size of a node in whole pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// The four connection points of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handle {
    Top,
    Bottom,
    Left,
    Right,
}

// ── Enumerated configuration values ───────────────────────────────────────────

/// Instance log level, or the sentinel "use the master's default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Inherit,
    Debug,
    Info,
    Warn,
    Error,
    Event,
}

impl LogLevel {
    /// Query-string value, or `None` for [`LogLevel::Inherit`].
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            LogLevel::Inherit => None,
            LogLevel::Debug => Some("debug"),
            LogLevel::Info => Some("info"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Error => Some("error"),
            LogLevel::Event => Some("event"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "inherit" | "master" => Ok(LogLevel::Inherit),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "event" => Ok(LogLevel::Event),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// TLS mode of a tunnel instance, or the sentinel "use the master's default".
///
/// The numeric codes (`0`, `1`, `2`) are what the instance URL carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsMode {
    #[default]
    #[serde(rename = "inherit")]
    Inherit,
    /// `0`: plain TCP, no encryption.
    #[serde(rename = "0")]
    Plain,
    /// `1`: TLS with a self-signed certificate generated in memory.
    #[serde(rename = "1")]
    SelfSigned,
    /// `2`: TLS with operator-provided certificate and key files.
    #[serde(rename = "2")]
    Custom,
}

impl TlsMode {
    pub fn code(self) -> Option<u8> {
        match self {
            TlsMode::Inherit => None,
            TlsMode::Plain => Some(0),
            TlsMode::SelfSigned => Some(1),
            TlsMode::Custom => Some(2),
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(TlsMode::Plain),
            "1" => Some(TlsMode::SelfSigned),
            "2" => Some(TlsMode::Custom),
            _ => None,
        }
    }
}

// ── Submission status ─────────────────────────────────────────────────────────

/// Progress of a node through the current submission cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionState {
    #[default]
    None,
    Pending,
    Success,
    Error,
}

/// Submission state plus the message shown next to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionStatus {
    pub state: SubmissionState,
    pub message: Option<String>,
}

impl SubmissionStatus {
    pub fn pending() -> Self {
        Self {
            state: SubmissionState::Pending,
            message: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            state: SubmissionState::Success,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: SubmissionState::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_none(&self) -> bool {
        self.state == SubmissionState::None
    }

    /// `Success` and `Error` are final until the next cycle resets them.
    pub fn is_final(&self) -> bool {
        matches!(self.state, SubmissionState::Success | SubmissionState::Error)
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// Operator-editable fields of a node.
///
/// Which fields are meaningful depends on the role:
///
/// | Field                         | M | S | C | T | U |
/// |-------------------------------|---|---|---|---|---|
/// | `master_id`                   | ✓ |   |   |   |   |
/// | `tunnel_key`, `tunnel_address`|   | ✓ | ✓ |   |   |
/// | `target_address`              |   | ✓ | ✓ | ✓ |   |
/// | `tls_mode`, `log_level`       |   | ✓ | ✓ |   |   |
/// | `min_pool`, `max_pool`        |   |   | ✓ |   |   |
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub label: String,
    /// Which configured control API a container represents.
    pub master_id: Option<String>,
    pub tunnel_key: String,
    /// Listen address for servers; dial address for clients.
    pub tunnel_address: String,
    pub target_address: String,
    pub tls_mode: TlsMode,
    pub log_level: LogLevel,
    pub cert_path: String,
    pub key_path: String,
    pub min_pool: Option<u32>,
    pub max_pool: Option<u32>,
    pub is_expanded: bool,
    /// Id of the remote instance this node was loaded from.  Such nodes
    /// already run on their master and are never submitted again.
    pub remote_id: Option<String>,
    pub submission: SubmissionStatus,
}

/// A node of the topology graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    /// Enclosing master container; only servers and clients may have one.
    pub parent: Option<NodeId>,
    pub position: Position,
    pub size: Size,
    pub data: NodeData,
    /// Connection points that currently carry an edge.
    pub active_handles: BTreeSet<Handle>,
}

impl Node {
    /// Creates a top-level node with a generated id at the canvas origin.
    pub fn new(role: NodeRole, label: impl Into<String>) -> Self {
        Self::with_id(NodeId::generate(role), role, label)
    }

    /// Creates a node with an explicit id.
    pub fn with_id(id: NodeId, role: NodeRole, label: impl Into<String>) -> Self {
        let mut node = Self {
            id,
            role,
            parent: None,
            position: Position::default(),
            size: Size::default(),
            data: NodeData {
                label: label.into(),
                ..NodeData::default()
            },
            active_handles: BTreeSet::new(),
        };
        node.size = match role {
            NodeRole::Master => layout::container_size(0),
            _ => layout::leaf_size(&node),
        };
        node
    }

    /// Creates a master container bound to the control API `master_id`.
    pub fn master(label: impl Into<String>, master_id: impl Into<String>) -> Self {
        let mut node = Self::new(NodeRole::Master, label);
        node.data.master_id = Some(master_id.into());
        node
    }

    /// Places the node inside `container`.
    pub fn in_container(mut self, container: &NodeId) -> Self {
        self.parent = Some(container.clone());
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    /// Applies `edit` to the node's data, for building nodes fluently.
    pub fn with_data(mut self, edit: impl FnOnce(&mut NodeData)) -> Self {
        edit(&mut self.data);
        self
    }
}

// ── Edge ──────────────────────────────────────────────────────────────────────

/// Cosmetic style of an edge, a pure function of its endpoint roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStyle {
    Plain,
    /// Server ↔ client tunnel link: animated, dashed.
    Tunnel,
    /// User/server/client → target delivery link.
    Delivery,
}

impl EdgeStyle {
    pub fn is_animated(self) -> bool {
        matches!(self, EdgeStyle::Tunnel)
    }
}

/// A directed connection between two non-master nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub source_handle: Handle,
    pub target_handle: Handle,
    pub style: EdgeStyle,
}

impl Edge {
    /// Returns `true` if either endpoint is `node`.
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }

    /// Returns `true` if the edge joins `a` and `b` in either direction.
    pub fn joins(&self, a: &NodeId, b: &NodeId) -> bool {
        (&self.source == a && &self.target == b) || (&self.source == b && &self.target == a)
    }

    /// The endpoint opposite `node`, if `node` is an endpoint.
    pub fn other_end(&self, node: &NodeId) -> Option<&NodeId> {
        if &self.source == node {
            Some(&self.target)
        } else if &self.target == node {
            Some(&self.source)
        } else {
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
