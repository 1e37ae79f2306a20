//! Instance enumeration: which tunnel instances a graph turns into.
//!
//! Every server and client node yields one instance URL, addressed to the
//! control API of the master whose container holds it.  Nodes that cannot be
//! submitted are not silently dropped; they are listed in
//! [`SubmissionPlan::excluded`] with the reason, so the orchestrator can mark
//! them as failed.  Nodes loaded from a master's existing instances are
//! listed in [`SubmissionPlan::existing`] and never planned again.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use tunnelmap_core::{
    build_instance_url, GraphStore, InstanceParams, InstanceRole, MasterConfig, Node, NodeId,
};

/// Why a server or client is left out of a submission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("not inside a master container")]
    NoContainer,

    #[error("container has no master assigned")]
    NoMasterAssigned,

    #[error("master '{0}' is not configured")]
    UnknownMaster(String),

    #[error("master '{0}' is missing its API URL or key")]
    IncompleteMaster(String),

    #[error("tunnel address could not be inferred from the remote server; set it manually")]
    UnresolvedAddress,
}

/// One instance ready to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInstance {
    pub node: NodeId,
    pub label: String,
    pub role: InstanceRole,
    pub master_id: String,
    pub url: String,
}

/// Every instance of a graph, grouped by owning master.
#[derive(Debug, Clone, Default)]
pub struct SubmissionPlan {
    /// Instances keyed by master id.
    pub groups: BTreeMap<String, Vec<PlannedInstance>>,
    /// Configuration of every master that has at least one instance.
    pub masters: BTreeMap<String, MasterConfig>,
    pub excluded: Vec<(NodeId, PlanError)>,
    /// Nodes that already run remotely, with their remote instance id.
    pub existing: Vec<(NodeId, String)>,
}

impl SubmissionPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }

    pub fn instance_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn instances(&self) -> impl Iterator<Item = &PlannedInstance> {
        self.groups.values().flatten()
    }

    pub fn master_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

/// Enumerates the instances of every server and client in `store`.
pub fn enumerate_instances(store: &GraphStore) -> SubmissionPlan {
    let mut plan = SubmissionPlan::default();

    for node in store.nodes().filter(|n| n.role.is_tunnel_endpoint()) {
        if let Some(remote_id) = &node.data.remote_id {
            debug!("{} already runs as {remote_id}", node.id);
            plan.existing.push((node.id.clone(), remote_id.clone()));
            continue;
        }
        match plan_node(store, node) {
            Ok((instance, master)) => {
                debug!("planned {} -> {}", node.id, instance.url);
                plan.masters
                    .entry(master.id.clone())
                    .or_insert_with(|| master.clone());
                plan.groups
                    .entry(instance.master_id.clone())
                    .or_default()
                    .push(instance);
            }
            Err(reason) => {
                debug!("excluding {}: {reason}", node.id);
                plan.excluded.push((node.id.clone(), reason));
            }
        }
    }
    plan
}

fn plan_node<'a>(
    store: &'a GraphStore,
    node: &Node,
) -> Result<(PlannedInstance, &'a MasterConfig), PlanError> {
    let container = node
        .parent
        .as_ref()
        .and_then(|p| store.node(p))
        .ok_or(PlanError::NoContainer)?;
    let master_id = container
        .data
        .master_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or(PlanError::NoMasterAssigned)?;
    let master = store
        .master(master_id)
        .ok_or_else(|| PlanError::UnknownMaster(master_id.to_string()))?;
    if !master.is_complete() {
        return Err(PlanError::IncompleteMaster(master_id.to_string()));
    }
    if store.is_address_unresolved(&node.id) {
        return Err(PlanError::UnresolvedAddress);
    }

    // Only servers and clients reach this point.
    let params = InstanceParams::from_node(node).ok_or(PlanError::NoContainer)?;
    let instance = PlannedInstance {
        node: node.id.clone(),
        label: node.data.label.clone(),
        role: params.role,
        master_id: master_id.to_string(),
        url: build_instance_url(&params, master),
    };
    Ok((instance, master))
}
