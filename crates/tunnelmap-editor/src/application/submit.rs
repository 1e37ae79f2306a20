//! SubmitTopologyUseCase: turns the graph into tunnel instances.
//!
//! One cycle walks the states
//! `Idle → PreflightCheck → AwaitingConfirmation → Submitting → Listening → Done`:
//!
//! 1. The graph is enumerated into a [`SubmissionPlan`] without touching it.
//! 2. The event stream of the listening master must yield one event within the
//!    preflight timeout, otherwise the cycle aborts and the graph is left as
//!    it was.  Once it passes, statuses from the previous cycle are cleared
//!    and excluded nodes are marked as errors.
//! 3. The operator confirms the plan through the [`Confirmer`] seam, on a
//!    blocking thread.
//! 4. The handshake listener attaches to the event stream first, then every
//!    creation request is issued at once.  A failed request only marks its
//!    own node.
//! 5. The cycle waits for the listener to confirm a handshake or time out.
//!
//! Each cycle owns a child of the orchestrator's root [`CancellationToken`].
//! Starting a new cycle, dropping the orchestrator or cancelling the root
//! stops everything still in flight.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tunnelmap_core::{GraphStore, MasterConfig, NodeId, SubmissionState, SubmissionStatus};

use crate::application::handshake::{HandshakeListener, HandshakeOutcome};
use crate::application::plan::{enumerate_instances, PlanError, SubmissionPlan};
use crate::infrastructure::control_api::{ApiError, ControlApi};

/// Where the current cycle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    PreflightCheck,
    AwaitingConfirmation,
    Submitting,
    Listening,
    Done,
}

/// Cycle-level failures.  Per-node failures are written into the graph instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("event stream of master '{master}' is unreachable: {reason}")]
    Preflight { master: String, reason: String },

    #[error("no server or client can be submitted")]
    NothingToSubmit,

    #[error("submission declined")]
    Declined,

    #[error("submission cycle cancelled")]
    Cancelled,
}

/// Asks the operator whether a plan should be created.
///
/// Implementations may block; the orchestrator calls them from
/// [`tokio::task::spawn_blocking`].
#[cfg_attr(test, mockall::automock)]
pub trait Confirmer: Send + Sync {
    /// Returns `true` to go ahead.  `listen_master` is the master whose event
    /// stream will be watched for the handshake.
    fn confirm(&self, plan: &SubmissionPlan, listen_master: &str) -> bool;
}

/// Deadlines and display limits of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitSettings {
    pub preflight_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Provider error messages are cut to this many characters.
    pub error_message_limit: usize,
}

impl Default for SubmitSettings {
    fn default() -> Self {
        Self {
            preflight_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(25),
            error_message_limit: 120,
        }
    }
}

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub cycle_id: Uuid,
    pub created: Vec<NodeId>,
    /// Nodes whose creation request failed, with the truncated message.
    pub failed: Vec<(NodeId, String)>,
    pub excluded: Vec<(NodeId, PlanError)>,
    pub handshake: HandshakeOutcome,
}

/// Cuts `message` to `limit` characters, marking the cut with an ellipsis.
pub fn truncate_message(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(limit).collect();
    cut.push('…');
    cut
}

/// Runs submission cycles against the control APIs.
pub struct SubmissionOrchestrator {
    api: Arc<dyn ControlApi>,
    confirmer: Arc<dyn Confirmer>,
    settings: SubmitSettings,
    root: CancellationToken,
    cycle: Option<CancellationToken>,
    listener: HandshakeListener,
    state: CycleState,
}

impl SubmissionOrchestrator {
    pub fn new(api: Arc<dyn ControlApi>, confirmer: Box<dyn Confirmer>, settings: SubmitSettings) -> Self {
        Self {
            api,
            confirmer: Arc::from(confirmer),
            settings,
            root: CancellationToken::new(),
            cycle: None,
            listener: HandshakeListener::new(),
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Token whose cancellation stops the running cycle and every later one.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancels all in-flight work.  Idempotent.
    pub fn shutdown(&mut self) {
        self.root.cancel();
        self.listener.cancel();
    }

    fn enter(&mut self, state: CycleState) {
        info!("submission cycle: {:?} -> {state:?}", self.state);
        self.state = state;
    }

    /// Runs one submission cycle over `store`.
    ///
    /// `listen_master` selects the master watched for the handshake; the first
    /// master of the plan is used when `None`.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Preflight`] if the listening master's event stream is
    ///   unreachable; nothing is created and no status changes.
    /// - [`SubmitError::NothingToSubmit`] if no node survives enumeration.
    /// - [`SubmitError::Declined`] if the operator refuses the plan.
    /// - [`SubmitError::Cancelled`] if the cycle is cancelled before every
    ///   creation request has settled.
    pub async fn run_cycle(
        &mut self,
        store: &mut GraphStore,
        listen_master: Option<&str>,
    ) -> Result<SubmissionReport, SubmitError> {
        if let Some(previous) = self.cycle.take() {
            previous.cancel();
        }
        self.listener.cancel();
        let token = self.root.child_token();
        self.cycle = Some(token.clone());
        let cycle_id = Uuid::new_v4();
        self.state = CycleState::Idle;
        info!("starting submission cycle {cycle_id}");

        let plan = enumerate_instances(store);
        let Some(listen_id) = listen_master
            .or_else(|| plan.master_ids().next())
            .map(str::to_string)
        else {
            // No master to check.
            Self::mark_excluded(store, &plan);
            return Err(SubmitError::NothingToSubmit);
        };
        let listen = store
            .master(&listen_id)
            .filter(|m| m.is_complete())
            .cloned()
            .ok_or_else(|| SubmitError::Preflight {
                master: listen_id.clone(),
                reason: "master is not configured".to_string(),
            })?;

        self.enter(CycleState::PreflightCheck);
        if let Err(e) = self.preflight(&listen, &token).await {
            self.state = CycleState::Idle;
            return Err(e);
        }

        Self::mark_excluded(store, &plan);
        if plan.is_empty() {
            self.state = CycleState::Idle;
            return Err(SubmitError::NothingToSubmit);
        }

        self.enter(CycleState::AwaitingConfirmation);
        match self.confirm(&plan, &listen_id, &token).await {
            Ok(true) => {}
            Ok(false) => {
                info!("submission cycle {cycle_id} declined");
                self.state = CycleState::Idle;
                return Err(SubmitError::Declined);
            }
            Err(e) => {
                self.state = CycleState::Idle;
                return Err(e);
            }
        }

        self.enter(CycleState::Submitting);
        for instance in plan.instances() {
            record_status(store, &instance.node, SubmissionStatus::pending());
        }
        self.listener
            .start(
                Arc::clone(&self.api),
                listen,
                self.settings.handshake_timeout,
                &token,
            )
            .await;

        let (created, failed) = match self.create_all(store, &plan, &token).await {
            Ok(settled) => settled,
            Err(e) => {
                self.abandon_pending(store, &plan);
                self.listener.cancel();
                self.state = CycleState::Idle;
                return Err(e);
            }
        };
        info!(
            "cycle {cycle_id}: {} created, {} failed, {} excluded",
            created.len(),
            failed.len(),
            plan.excluded.len()
        );

        self.enter(CycleState::Listening);
        let handshake = self.listener.outcome().await;

        self.enter(CycleState::Done);
        Ok(SubmissionReport {
            cycle_id,
            created,
            failed,
            excluded: plan.excluded,
            handshake,
        })
    }

    /// Clears the previous cycle's statuses and marks every excluded node.
    fn mark_excluded(store: &mut GraphStore, plan: &SubmissionPlan) {
        store.reset_submission_statuses();
        for (node, reason) in &plan.excluded {
            warn!("{node} excluded from submission: {reason}");
            record_status(store, node, SubmissionStatus::error(reason.to_string()));
        }
    }

    /// Runs the confirmer off the async runtime.  A prompt that panics counts
    /// as a refusal.
    async fn confirm(
        &self,
        plan: &SubmissionPlan,
        listen_id: &str,
        token: &CancellationToken,
    ) -> Result<bool, SubmitError> {
        let confirmer = Arc::clone(&self.confirmer);
        let plan = plan.clone();
        let listen_id = listen_id.to_string();
        let prompt = tokio::task::spawn_blocking(move || confirmer.confirm(&plan, &listen_id));

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SubmitError::Cancelled),
            answer = prompt => match answer {
                Ok(answer) => Ok(answer),
                Err(e) => {
                    warn!("confirmation task failed: {e}");
                    Ok(false)
                }
            },
        }
    }

    /// Opens `master`'s event stream and reads one event.
    async fn preflight(&self, master: &MasterConfig, token: &CancellationToken) -> Result<(), SubmitError> {
        debug!("preflight: checking event stream of {}", master.id);
        let first_event = async {
            let mut events = self.api.open_events(master).await?;
            match events.next().await {
                Some(Ok(_)) => Ok::<(), ApiError>(()),
                Some(Err(e)) => Err(e),
                None => Err(ApiError::StreamClosed),
            }
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SubmitError::Cancelled),
            result = tokio::time::timeout(self.settings.preflight_timeout, first_event) => result,
        };
        let reason = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no event within {:?}", self.settings.preflight_timeout),
        };
        warn!("preflight against {} failed: {reason}", master.id);
        Err(SubmitError::Preflight {
            master: master.id.clone(),
            reason,
        })
    }

    /// Issues every creation request at once and records each result on its
    /// node as it settles.
    async fn create_all(
        &self,
        store: &mut GraphStore,
        plan: &SubmissionPlan,
        token: &CancellationToken,
    ) -> Result<(Vec<NodeId>, Vec<(NodeId, String)>), SubmitError> {
        let api = Arc::clone(&self.api);
        let mut requests: FuturesUnordered<_> = plan
            .groups
            .iter()
            .filter_map(|(id, instances)| plan.masters.get(id).map(|master| (master, instances)))
            .flat_map(|(master, instances)| instances.iter().map(move |i| (master, i)))
            .map(|(master, instance)| {
                let api = Arc::clone(&api);
                async move {
                    let result = api.create_instance(master, &instance.url).await;
                    (instance, result)
                }
            })
            .collect();

        let mut created = Vec::new();
        let mut failed = Vec::new();
        loop {
            let settled = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SubmitError::Cancelled),
                next = requests.next() => next,
            };
            let Some((instance, result)) = settled else {
                break;
            };
            let status = match result {
                Ok(record) => {
                    info!("created {} on {}", instance.label, instance.master_id);
                    created.push(instance.node.clone());
                    if record.id.is_empty() {
                        SubmissionStatus::success("created")
                    } else {
                        SubmissionStatus::success(format!("created as {}", record.id))
                    }
                }
                Err(e) => {
                    let message = truncate_message(&e.to_string(), self.settings.error_message_limit);
                    warn!("creating {} on {} failed: {e}", instance.label, instance.master_id);
                    failed.push((instance.node.clone(), message.clone()));
                    SubmissionStatus::error(message)
                }
            };
            record_status(store, &instance.node, status);
        }
        Ok((created, failed))
    }

    /// Marks nodes whose request never settled as failed.
    fn abandon_pending(&self, store: &mut GraphStore, plan: &SubmissionPlan) {
        for instance in plan.instances() {
            let still_pending = store
                .node(&instance.node)
                .is_some_and(|n| n.data.submission.state == SubmissionState::Pending);
            if still_pending {
                record_status(
                    store,
                    &instance.node,
                    SubmissionStatus::error(SubmitError::Cancelled.to_string()),
                );
            }
        }
    }
}

/// Writes `status` onto `node`, logging when the node has gone away.
fn record_status(store: &mut GraphStore, node: &NodeId, status: SubmissionStatus) {
    if let Err(e) = store.set_submission_status(node, status) {
        warn!("could not record submission status: {e}");
    }
}

impl Drop for SubmissionOrchestrator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
