//! The canonical node/edge store.
//!
//! [`GraphStore`] owns every node and edge plus the registry of configured
//! masters.  All mutation goes through its command methods; each command
//! validates first, applies its change, then runs the derived-state passes
//! that keep the graph consistent before returning:
//!
//! 1. container resize for every container whose child count changed,
//! 2. leaf sizing for nodes whose detail fields or expansion changed,
//! 3. handle orientation for edges whose endpoints moved,
//! 4. active-handle refresh for every endpoint of a touched edge,
//! 5. client address resolution across masters,
//! 6. one-shot `targetAddress` copy along delivery edges.
//!
//! A command that fails leaves the store unchanged.  Derived changes are
//! reported as [`GraphEvent`]s, collected until the caller drains them with
//! [`GraphStore::drain_events`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::address::{
    resolve_client_tunnel_address, sync_target_address, ClientAddress, SyncPreference,
};
use crate::domain::handles::{self, resolve_handles, Anchor};
use crate::domain::layout;
use crate::domain::master::MasterConfig;
use crate::domain::node::{
    Edge, EdgeId, EdgeStyle, Node, NodeData, NodeId, NodeRole, Position, Size, SubmissionStatus,
};
use crate::domain::validator::{can_connect, check_containment, ValidationError};
use crate::protocol::instance_url::parse_instance_url;

/// Vertical spacing between children created by [`GraphStore::expand_master`].
const EXPANDED_CHILD_SPACING: f64 = 72.0;
/// Offset of the first expanded child from the container's top-left corner.
const EXPANDED_CHILD_INSET: f64 = 24.0;

/// Errors returned by [`GraphStore`] commands.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("a node with id {0} already exists")]
    DuplicateNode(NodeId),

    /// Only servers and clients may live inside a container.
    #[error("node {node} has role {role} and cannot be placed in a container")]
    ParentNotAllowed { node: NodeId, role: NodeRole },

    #[error("node {0} is not a master container")]
    ParentNotMaster(NodeId),

    /// Moving the node would leave `edge` violating the container rule.
    #[error("moving the node would invalidate edge {edge}: {reason}")]
    ReparentBreaksEdge {
        edge: EdgeId,
        #[source]
        reason: ValidationError,
    },

    #[error("connection rejected: {0}")]
    Rejected(#[from] ValidationError),
}

/// Derived-state change produced while applying a command.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    ContainerResized { container: NodeId, size: Size },
    /// A client's tunnel address was rewritten by cross-master resolution.
    ClientAddressResolved { client: NodeId, address: String },
    /// Resolution found no port; the client is flagged and keeps its address.
    ClientAddressUnresolved { client: NodeId, raw: String },
    TargetAddressSynced { node: NodeId, address: String },
    NodeRemoved(NodeId),
    EdgeRemoved(EdgeId),
}

/// In-memory entity store for the topology graph.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    masters: HashMap<String, MasterConfig>,
    /// Clients whose cross-master address could not be resolved.
    unresolved: BTreeSet<NodeId>,
    events: Vec<GraphEvent>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Direct children of `container`.
    pub fn children<'a>(&'a self, container: &'a NodeId) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |n| n.parent.as_ref() == Some(container))
    }

    /// Edges with `node` as either endpoint.
    pub fn edges_of<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| e.touches(node))
    }

    pub fn master(&self, master_id: &str) -> Option<&MasterConfig> {
        self.masters.get(master_id)
    }

    pub fn masters(&self) -> impl Iterator<Item = &MasterConfig> {
        self.masters.values()
    }

    /// Configuration of the master whose container holds `node`.
    ///
    /// `None` when the node is top-level, its container has no `master_id`,
    /// or no master with that id is registered.
    pub fn owning_master(&self, node: &NodeId) -> Option<&MasterConfig> {
        let parent = self.nodes.get(node)?.parent.as_ref()?;
        let master_id = self.nodes.get(parent)?.data.master_id.as_deref()?;
        self.masters.get(master_id)
    }

    /// Configuration bound to `container` through its `master_id`.
    pub fn container_master(&self, container: &NodeId) -> Option<&MasterConfig> {
        let node = self.nodes.get(container)?;
        if node.role != NodeRole::Master {
            return None;
        }
        self.masters.get(node.data.master_id.as_deref()?)
    }

    /// Position of `node` in canvas coordinates.
    pub fn absolute_position(&self, node: &NodeId) -> Option<Position> {
        let n = self.nodes.get(node)?;
        match n.parent.as_ref().and_then(|p| self.nodes.get(p)) {
            Some(container) => Some(n.position.offset_by(container.position)),
            None => Some(n.position),
        }
    }

    /// Returns `true` if cross-master resolution failed for client `node`.
    pub fn is_address_unresolved(&self, node: &NodeId) -> bool {
        self.unresolved.contains(node)
    }

    /// Takes all events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Master registry ───────────────────────────────────────────────────────

    /// Registers or replaces a master configuration.
    ///
    /// When the API URL of an existing master changes, every client wired to
    /// a server inside one of its containers is re-resolved.
    pub fn upsert_master(&mut self, config: MasterConfig) {
        let url_changed = self
            .masters
            .get(&config.id)
            .map_or(true, |old| old.api_url != config.api_url);
        let master_id = config.id.clone();
        self.masters.insert(master_id.clone(), config);

        if url_changed {
            debug!("master {master_id} API URL set, re-resolving dependent clients");
            let containers: Vec<NodeId> = self
                .nodes
                .values()
                .filter(|n| {
                    n.role == NodeRole::Master && n.data.master_id.as_deref() == Some(master_id.as_str())
                })
                .map(|n| n.id.clone())
                .collect();
            for container in containers {
                self.reresolve_container(&container);
            }
        }
    }

    // ── Node commands ─────────────────────────────────────────────────────────

    /// Adds `node` to the graph.
    ///
    /// # Errors
    ///
    /// - [`GraphError::DuplicateNode`] if the id is taken.
    /// - [`GraphError::ParentNotAllowed`] if a non-server/client has a parent.
    /// - [`GraphError::NodeNotFound`] / [`GraphError::ParentNotMaster`] if the
    ///   parent is missing or not a master.
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeId, GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        if let Some(parent) = &node.parent {
            self.check_parent(&node.id, node.role, parent)?;
        }

        layout::apply_leaf_size(&mut node);
        node.active_handles.clear();
        let id = node.id.clone();
        let parent = node.parent.clone();
        debug!("adding {} node {id}", node.role);
        self.nodes.insert(id.clone(), node);

        if self.nodes[&id].role == NodeRole::Master {
            self.resize(&id);
        }
        if let Some(parent) = parent {
            self.resize(&parent);
        }
        Ok(id)
    }

    /// Removes a node, every edge touching it and, for containers, all of
    /// their children with their edges.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `id` does not exist.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        let parent = node.parent.clone();

        let mut doomed: BTreeSet<NodeId> = BTreeSet::from([id.clone()]);
        if node.role == NodeRole::Master {
            doomed.extend(self.children(id).map(|c| c.id.clone()));
        }

        let dead_edges: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| doomed.contains(&e.source) || doomed.contains(&e.target))
            .map(|e| e.id.clone())
            .collect();

        let mut survivors: BTreeSet<NodeId> = BTreeSet::new();
        for edge_id in dead_edges {
            if let Some(edge) = self.edges.remove(&edge_id) {
                for end in [edge.source, edge.target] {
                    if !doomed.contains(&end) {
                        survivors.insert(end);
                    }
                }
                self.events.push(GraphEvent::EdgeRemoved(edge_id));
            }
        }

        for dead in &doomed {
            self.nodes.remove(dead);
            self.unresolved.remove(dead);
            self.events.push(GraphEvent::NodeRemoved(dead.clone()));
        }
        info!("removed node {id} ({} node(s) total)", doomed.len());

        if let Some(parent) = parent {
            self.resize(&parent);
        }
        for node in &survivors {
            self.refresh_active_handles(node);
            self.reresolve_client(node);
        }
        Ok(())
    }

    /// Moves a node to `position` (relative to its container, if any) and
    /// re-orients every edge whose endpoints moved.
    ///
    /// Moving a container moves its children with it.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `id` does not exist.
    pub fn move_node(&mut self, id: &NodeId, position: Position) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        node.position = position;

        let mut moved = vec![id.clone()];
        if node.role == NodeRole::Master {
            moved.extend(self.children(id).map(|c| c.id.clone()));
        }
        self.reorient_edges_around(&moved);
        Ok(())
    }

    /// Toggles a node's detail view and recomputes its size.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `id` does not exist.
    pub fn set_expanded(&mut self, id: &NodeId, expanded: bool) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        node.data.is_expanded = expanded;
        if layout::apply_leaf_size(node) {
            self.reorient_edges_around(&[id.clone()]);
        }
        Ok(())
    }

    /// Applies `edit` to the node's fields and propagates the consequences.
    ///
    /// - Leaf size is recomputed.
    /// - A server whose tunnel address changed re-resolves its cross-master
    ///   clients.
    /// - A new non-empty `target_address` is copied along delivery edges, the
    ///   edited side winning.
    /// - A container whose `master_id` changed re-resolves its servers'
    ///   cross-master clients.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `id` does not exist.
    pub fn update_node<F>(&mut self, id: &NodeId, edit: F) -> Result<(), GraphError>
    where
        F: FnOnce(&mut NodeData),
    {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        let before = node.data.clone();
        edit(&mut node.data);
        let role = node.role;
        let after = node.data.clone();
        let resized = layout::apply_leaf_size(node);

        if resized {
            self.reorient_edges_around(&[id.clone()]);
        }

        match role {
            NodeRole::Server if before.tunnel_address != after.tunnel_address => {
                for client in self.tunnel_peers(id) {
                    self.reresolve_client(&client);
                }
            }
            NodeRole::Client if before.tunnel_address != after.tunnel_address => {
                self.reresolve_client(id);
            }
            NodeRole::Master if before.master_id != after.master_id => {
                self.reresolve_container(id);
            }
            _ => {}
        }

        if before.target_address != after.target_address && !after.target_address.trim().is_empty() {
            match role {
                NodeRole::Server | NodeRole::Client => {
                    for target in self.delivery_targets(id) {
                        self.sync_delivery(id, &target, SyncPreference::Upstream);
                    }
                }
                NodeRole::Target => {
                    let upstream: Vec<NodeId> = self
                        .edges
                        .values()
                        .filter(|e| &e.target == id && e.style == EdgeStyle::Delivery)
                        .map(|e| e.source.clone())
                        .collect();
                    for source in upstream {
                        self.sync_delivery(&source, id, SyncPreference::Target);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Moves a server or client into `container`, or to the top level with
    /// `None`.  The node keeps its canvas position.
    ///
    /// # Errors
    ///
    /// - [`GraphError::NodeNotFound`] if the node or container is missing.
    /// - [`GraphError::ParentNotAllowed`] / [`GraphError::ParentNotMaster`]
    ///   for illegal parenting.
    /// - [`GraphError::ReparentBreaksEdge`] if an existing edge would violate
    ///   the container rule afterwards.
    pub fn reparent(&mut self, id: &NodeId, container: Option<NodeId>) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        if node.parent == container {
            return Ok(());
        }
        let old_parent = node.parent.clone();
        if let Some(parent) = &container {
            self.check_parent(id, node.role, parent)?;
        }

        let mut moved = node.clone();
        moved.parent = container.clone();
        for edge in self.edges_of(id) {
            let (source, target) = if &edge.source == id {
                (Some(&moved), self.nodes.get(&edge.target))
            } else {
                (self.nodes.get(&edge.source), Some(&moved))
            };
            if let (Some(source), Some(target)) = (source, target) {
                check_containment(source, target).map_err(|reason| {
                    warn!("reparenting {id} rejected by edge {}: {reason}", edge.id);
                    GraphError::ReparentBreaksEdge {
                        edge: edge.id.clone(),
                        reason,
                    }
                })?;
            }
        }

        let absolute = self.absolute_position(id).unwrap_or_default();
        let origin = container
            .as_ref()
            .and_then(|c| self.absolute_position(c))
            .unwrap_or_default();
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = container.clone();
            node.position = Position::new(absolute.x - origin.x, absolute.y - origin.y);
        }
        info!(
            "reparented {id} from {} to {}",
            old_parent.as_ref().map_or("top level".to_string(), NodeId::to_string),
            container.as_ref().map_or("top level".to_string(), NodeId::to_string),
        );

        for affected in old_parent.iter().chain(container.iter()) {
            self.resize(affected);
        }
        self.reorient_edges_around(&[id.clone()]);
        match self.nodes.get(id).map(|n| n.role) {
            Some(NodeRole::Server) => {
                for client in self.tunnel_peers(id) {
                    self.reresolve_client(&client);
                }
            }
            Some(NodeRole::Client) => self.reresolve_client(id),
            _ => {}
        }
        Ok(())
    }

    /// Removes every node and edge.  Registered masters are kept.
    pub fn clear(&mut self) {
        info!(
            "clearing graph ({} nodes, {} edges)",
            self.nodes.len(),
            self.edges.len()
        );
        self.nodes.clear();
        self.edges.clear();
        self.unresolved.clear();
        self.events.clear();
    }

    /// Renders existing remote instances as children of `container`.
    ///
    /// `instances` yields `(remote id, instance URL)` pairs.  Each URL becomes
    /// one server or client carrying its remote id; URLs that do not decode
    /// are skipped with a warning.  Returns the ids of the created nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] / [`GraphError::ParentNotMaster`]
    /// if `container` is missing or not a master.
    pub fn expand_master<I, S>(&mut self, container: &NodeId, instances: I) -> Result<Vec<NodeId>, GraphError>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        match self.nodes.get(container) {
            None => return Err(GraphError::NodeNotFound(container.clone())),
            Some(n) if n.role != NodeRole::Master => {
                return Err(GraphError::ParentNotMaster(container.clone()))
            }
            Some(_) => {}
        }

        let first_slot = self.children(container).count();
        let mut created = Vec::new();
        for (remote_id, url) in instances {
            let url = url.as_ref();
            let params = match parse_instance_url(url) {
                Ok(p) => p,
                Err(e) => {
                    warn!("skipping instance '{url}' of {container}: {e}");
                    continue;
                }
            };
            let role = params.role.node_role();
            let slot = (first_slot + created.len()) as f64;
            let label = format!("{} {}", role.as_str(), params.tunnel_address);
            let node = Node::new(role, label)
                .in_container(container)
                .at(EXPANDED_CHILD_INSET, EXPANDED_CHILD_INSET + slot * EXPANDED_CHILD_SPACING)
                .with_data(|d| {
                    params.apply_to(d);
                    d.remote_id = Some(remote_id.as_ref().to_string());
                });
            created.push(self.add_node(node)?);
        }
        info!("expanded {container} with {} instance(s)", created.len());
        Ok(created)
    }

    // ── Edge commands ─────────────────────────────────────────────────────────

    /// Connects `source → target` if the connection rules allow it.
    ///
    /// # Errors
    ///
    /// - [`GraphError::NodeNotFound`] if either endpoint is missing.
    /// - [`GraphError::Rejected`] with the first failing rule otherwise.
    pub fn connect(&mut self, source: &NodeId, target: &NodeId) -> Result<EdgeId, GraphError> {
        let s = self
            .nodes
            .get(source)
            .ok_or_else(|| GraphError::NodeNotFound(source.clone()))?;
        let t = self
            .nodes
            .get(target)
            .ok_or_else(|| GraphError::NodeNotFound(target.clone()))?;

        let style = can_connect(s, t, self.edges.values()).map_err(|reason| {
            warn!("rejected connection {} {source} -> {} {target}: {reason}", s.role, t.role);
            reason
        })?;
        let (source_role, target_role) = (s.role, t.role);

        let (sa, ta) = (self.anchor(source), self.anchor(target));
        let pair = match (sa, ta) {
            (Some(sa), Some(ta)) => resolve_handles(sa, ta),
            _ => return Err(GraphError::NodeNotFound(source.clone())),
        };

        let edge = Edge {
            id: EdgeId::generate(),
            source: source.clone(),
            target: target.clone(),
            source_handle: pair.source,
            target_handle: pair.target,
            style,
        };
        let edge_id = edge.id.clone();
        debug!("connected {source_role} {source} -> {target_role} {target} as {edge_id}");
        self.edges.insert(edge_id.clone(), edge);

        self.refresh_active_handles(source);
        self.refresh_active_handles(target);

        match style {
            EdgeStyle::Tunnel => {
                let client = if source_role == NodeRole::Client { source } else { target };
                self.reresolve_client(client);
            }
            EdgeStyle::Delivery if source_role.is_tunnel_endpoint() => {
                self.sync_delivery(source, target, SyncPreference::Upstream);
            }
            _ => {}
        }
        Ok(edge_id)
    }

    /// Removes an edge and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EdgeNotFound`] if `id` does not exist.
    pub fn disconnect(&mut self, id: &EdgeId) -> Result<Edge, GraphError> {
        let edge = self
            .edges
            .remove(id)
            .ok_or_else(|| GraphError::EdgeNotFound(id.clone()))?;
        debug!("disconnected {id}");
        self.events.push(GraphEvent::EdgeRemoved(id.clone()));

        self.refresh_active_handles(&edge.source);
        self.refresh_active_handles(&edge.target);
        if edge.style == EdgeStyle::Tunnel {
            self.reresolve_client(&edge.source);
            self.reresolve_client(&edge.target);
        }
        Ok(edge)
    }

    // ── Submission status ─────────────────────────────────────────────────────

    /// Records a node's submission status for the current cycle.
    ///
    /// `Success` and `Error` are final: once written, later writes are ignored
    /// until [`reset_submission_statuses`](Self::reset_submission_statuses).
    /// Returns `true` if the status was written.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `id` does not exist.
    pub fn set_submission_status(
        &mut self,
        id: &NodeId,
        status: SubmissionStatus,
    ) -> Result<bool, GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        if node.data.submission.is_final() {
            debug!("ignoring status {:?} for {id}: already final", status.state);
            return Ok(false);
        }
        node.data.submission = status;
        if layout::apply_leaf_size(node) {
            self.reorient_edges_around(&[id.clone()]);
        }
        Ok(true)
    }

    /// Clears every node's submission status before a new cycle.
    pub fn reset_submission_statuses(&mut self) {
        let mut resized = Vec::new();
        for node in self.nodes.values_mut() {
            if node.data.submission.is_none() {
                continue;
            }
            node.data.submission = SubmissionStatus::default();
            if layout::apply_leaf_size(node) {
                resized.push(node.id.clone());
            }
        }
        if !resized.is_empty() {
            self.reorient_edges_around(&resized);
        }
    }

    // ── Derived-state passes ──────────────────────────────────────────────────

    fn check_parent(&self, node: &NodeId, role: NodeRole, parent: &NodeId) -> Result<(), GraphError> {
        if !role.is_tunnel_endpoint() {
            return Err(GraphError::ParentNotAllowed {
                node: node.clone(),
                role,
            });
        }
        match self.nodes.get(parent) {
            None => Err(GraphError::NodeNotFound(parent.clone())),
            Some(p) if p.role != NodeRole::Master => Err(GraphError::ParentNotMaster(parent.clone())),
            Some(_) => Ok(()),
        }
    }

    fn resize(&mut self, container: &NodeId) {
        if layout::resize_container(container, &mut self.nodes) {
            if let Some(node) = self.nodes.get(container) {
                debug!(
                    "resized container {container} to {}x{}",
                    node.size.width, node.size.height
                );
                self.events.push(GraphEvent::ContainerResized {
                    container: container.clone(),
                    size: node.size,
                });
            }
        }
    }

    fn anchor(&self, id: &NodeId) -> Option<Anchor> {
        let node = self.nodes.get(id)?;
        Some(Anchor::of(node, self.absolute_position(id)?))
    }

    fn refresh_active_handles(&mut self, id: &NodeId) {
        let active = handles::active_handles(id, self.edges.values());
        if let Some(node) = self.nodes.get_mut(id) {
            node.active_handles = active;
        }
    }

    /// Re-orients every edge touching one of `moved` and refreshes the active
    /// handles of all their endpoints.
    fn reorient_edges_around(&mut self, moved: &[NodeId]) {
        let touched: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| moved.iter().any(|n| e.touches(n)))
            .map(|e| e.id.clone())
            .collect();

        let mut endpoints: BTreeSet<NodeId> = BTreeSet::new();
        for edge_id in touched {
            let Some(edge) = self.edges.get(&edge_id) else {
                continue;
            };
            let (source, target) = (edge.source.clone(), edge.target.clone());
            let (Some(sa), Some(ta)) = (self.anchor(&source), self.anchor(&target)) else {
                continue;
            };
            let pair = resolve_handles(sa, ta);
            if let Some(edge) = self.edges.get_mut(&edge_id) {
                edge.source_handle = pair.source;
                edge.target_handle = pair.target;
            }
            endpoints.insert(source);
            endpoints.insert(target);
        }
        for node in &endpoints {
            self.refresh_active_handles(node);
        }
    }

    /// Nodes joined to `server` by a tunnel edge.
    fn tunnel_peers(&self, server: &NodeId) -> Vec<NodeId> {
        self.edges_of(server)
            .filter(|e| e.style == EdgeStyle::Tunnel)
            .filter_map(|e| e.other_end(server).cloned())
            .collect()
    }

    /// Targets fed by `upstream` through a delivery edge.
    fn delivery_targets(&self, upstream: &NodeId) -> Vec<NodeId> {
        self.edges
            .values()
            .filter(|e| &e.source == upstream && e.style == EdgeStyle::Delivery)
            .map(|e| e.target.clone())
            .collect()
    }

    /// Re-resolves the clients of every server inside `container`.
    fn reresolve_container(&mut self, container: &NodeId) {
        let servers: Vec<NodeId> = self
            .children(container)
            .filter(|n| n.role == NodeRole::Server)
            .map(|n| n.id.clone())
            .collect();
        for server in servers {
            for client in self.tunnel_peers(&server) {
                self.reresolve_client(&client);
            }
        }
    }

    /// Recomputes the tunnel address of `client` from every server it is
    /// wired to across masters.
    ///
    /// A server counts as cross-master when it sits in a container and the
    /// client does not share that container.  With several such links the
    /// last in edge-id order wins.  Non-clients and clients without such a link
    /// only have their unresolved flag cleared.
    fn reresolve_client(&mut self, client: &NodeId) {
        let Some(client_node) = self.nodes.get(client) else {
            return;
        };
        if client_node.role != NodeRole::Client {
            return;
        }

        let mut outcome: Option<ClientAddress> = None;
        for edge in self.edges_of(client).filter(|e| e.style == EdgeStyle::Tunnel) {
            let Some(server) = edge.other_end(client).and_then(|id| self.nodes.get(id)) else {
                continue;
            };
            let cross_master = server.parent.is_some() && server.parent != client_node.parent;
            if server.role != NodeRole::Server || !cross_master {
                continue;
            }
            outcome = Some(match self.owning_master(&server.id) {
                Some(master) => resolve_client_tunnel_address(server, master),
                None => {
                    debug!("no master registered for server {}", server.id);
                    ClientAddress::Unresolved {
                        raw: server.data.tunnel_address.clone(),
                    }
                }
            });
        }

        match outcome {
            Some(ClientAddress::Resolved(address)) => {
                self.unresolved.remove(client);
                let Some(node) = self.nodes.get_mut(client) else {
                    return;
                };
                if node.data.tunnel_address == address {
                    return;
                }
                debug!("client {client} tunnel address resolved to {address}");
                node.data.tunnel_address.clone_from(&address);
                let resized = layout::apply_leaf_size(node);
                self.events.push(GraphEvent::ClientAddressResolved {
                    client: client.clone(),
                    address,
                });
                if resized {
                    self.reorient_edges_around(&[client.clone()]);
                }
            }
            Some(ClientAddress::Unresolved { raw }) => {
                if self.unresolved.insert(client.clone()) {
                    warn!("could not resolve a tunnel address for client {client} from '{raw}'");
                    self.events.push(GraphEvent::ClientAddressUnresolved {
                        client: client.clone(),
                        raw,
                    });
                }
            }
            None => {
                self.unresolved.remove(client);
            }
        }
    }

    /// Copies `targetAddress` once between `upstream` and `target`.
    fn sync_delivery(&mut self, upstream: &NodeId, target: &NodeId, prefer: SyncPreference) {
        let (Some(u), Some(t)) = (self.nodes.get(upstream), self.nodes.get(target)) else {
            return;
        };
        let mut upstream_value = u.data.target_address.clone();
        let mut target_value = t.data.target_address.clone();
        if !sync_target_address(&mut upstream_value, &mut target_value, prefer) {
            return;
        }

        let mut resized = Vec::new();
        for (id, value) in [(upstream, upstream_value), (target, target_value)] {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            if node.data.target_address == value {
                continue;
            }
            debug!("synced target address of {id} to {value}");
            node.data.target_address.clone_from(&value);
            if layout::apply_leaf_size(node) {
                resized.push(id.clone());
            }
            self.events.push(GraphEvent::TargetAddressSynced {
                node: id.clone(),
                address: value,
            });
        }
        if !resized.is_empty() {
            self.reorient_edges_around(&resized);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
