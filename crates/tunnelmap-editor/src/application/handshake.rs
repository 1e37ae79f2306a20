//! Handshake confirmation over a control API's event stream.
//!
//! After instances are created, the tunnel ends connect on their own and the
//! control API logs a line such as `Tunnel handshaked: 10.0.0.2:10000 in 35ms`.
//! Observing that line is best-effort telemetry: a timeout does not mean the
//! instances failed.
//!
//! Only one [`HandshakeListener`] task is active at a time; starting a new one
//! cancels the previous one.  [`HandshakeListener::start`] returns once the
//! event stream is open, so requests issued afterwards cannot produce a log
//! line the listener misses.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tunnelmap_core::MasterConfig;

use crate::infrastructure::control_api::{ApiError, ControlApi};
use crate::infrastructure::sse::SseEvent;

/// SSE event name carrying instance logs.
pub const INSTANCE_EVENT: &str = "instance";

fn handshake_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)tunnel\s+handshaked.*?\bin\s+(\d+)\s*ms").ok())
        .as_ref()
}

/// Extracts the latency in milliseconds from a handshake log line.
pub fn match_handshake_line(line: &str) -> Option<u64> {
    let captures = handshake_pattern()?.captures(line)?;
    captures.get(1)?.as_str().parse().ok()
}

/// A confirmed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub latency_ms: u64,
    /// Id of the instance that logged the line, when the payload names one.
    pub instance_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstancePayload {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    logs: String,
    #[serde(default)]
    instance: Option<InstanceRef>,
}

#[derive(Debug, Deserialize)]
struct InstanceRef {
    #[serde(default)]
    id: Option<String>,
}

/// Returns the handshake an event reports, if any.
///
/// Only `instance` events whose JSON payload has `type: "log"` are considered;
/// anything else, including malformed JSON, is ignored.
pub fn detect_handshake(event: &SseEvent) -> Option<Handshake> {
    if event.event != INSTANCE_EVENT {
        return None;
    }
    let payload: InstancePayload = serde_json::from_str(&event.data).ok()?;
    if payload.kind != "log" {
        return None;
    }
    let latency_ms = match_handshake_line(&payload.logs)?;
    Some(Handshake {
        latency_ms,
        instance_id: payload.instance.and_then(|i| i.id),
    })
}

/// How a listening session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Confirmed(Handshake),
    /// No handshake line arrived before the deadline.
    TimedOut,
    /// The cycle was cancelled or a newer listener replaced this one.
    Cancelled,
    /// The event stream could not be opened or ended early.
    Unavailable(String),
}

/// Reads `events` until one reports a handshake.
///
/// Returns `Unavailable` if the stream fails or ends first.
pub async fn scan_for_handshake<S>(events: S) -> HandshakeOutcome
where
    S: Stream<Item = Result<SseEvent, ApiError>>,
{
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                if let Some(handshake) = detect_handshake(&event) {
                    return HandshakeOutcome::Confirmed(handshake);
                }
                debug!("event '{}' is not a handshake", event.event);
            }
            Err(e) => return HandshakeOutcome::Unavailable(e.to_string()),
        }
    }
    HandshakeOutcome::Unavailable(ApiError::StreamClosed.to_string())
}

/// Opens `master`'s event stream and waits up to `deadline` for a handshake.
///
/// The whole session, including opening the stream, races `token`.  The token
/// is cancelled on return so every task tied to it stops exactly once.
pub async fn listen_for_handshake(
    api: Arc<dyn ControlApi>,
    master: MasterConfig,
    deadline: Duration,
    token: CancellationToken,
) -> HandshakeOutcome {
    run_session(api, master, deadline, token, None).await
}

/// [`listen_for_handshake`], signalling `attached` as soon as the open
/// request has been answered.
async fn run_session(
    api: Arc<dyn ControlApi>,
    master: MasterConfig,
    deadline: Duration,
    token: CancellationToken,
    mut attached: Option<oneshot::Sender<()>>,
) -> HandshakeOutcome {
    let session = async {
        let opened = api.open_events(&master).await;
        if let Some(tx) = attached.take() {
            if tx.send(()).is_err() {
                debug!("nobody waits for the listener on {} to attach", master.id);
            }
        }
        let events = match opened {
            Ok(events) => events,
            Err(e) => return HandshakeOutcome::Unavailable(e.to_string()),
        };
        scan_for_handshake(events).await
    };

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => HandshakeOutcome::Cancelled,
        result = tokio::time::timeout(deadline, session) => {
            result.unwrap_or(HandshakeOutcome::TimedOut)
        }
    };
    token.cancel();

    match &outcome {
        HandshakeOutcome::Confirmed(h) => {
            info!("handshake confirmed on {} in {} ms", master.id, h.latency_ms);
        }
        HandshakeOutcome::TimedOut => {
            warn!("no handshake observed on {} within {deadline:?}", master.id);
        }
        HandshakeOutcome::Cancelled => debug!("handshake listener on {} cancelled", master.id),
        HandshakeOutcome::Unavailable(reason) => {
            warn!("handshake listener on {} unavailable: {reason}", master.id);
        }
    }
    outcome
}

/// Owner of the single active listening task.
#[derive(Debug, Default)]
pub struct HandshakeListener {
    token: Option<CancellationToken>,
    task: Option<JoinHandle<HandshakeOutcome>>,
}

impl HandshakeListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts listening on `master`, cancelling any previous session, and
    /// returns once the event stream is attached.
    ///
    /// The session is a child of `parent`: cancelling `parent` stops it too.
    /// A session that cannot open its stream still counts as attached; its
    /// outcome is then `Unavailable`.
    pub async fn start(
        &mut self,
        api: Arc<dyn ControlApi>,
        master: MasterConfig,
        deadline: Duration,
        parent: &CancellationToken,
    ) {
        self.cancel();
        debug!("attaching handshake listener to {}", master.id);
        let master_id = master.id.clone();
        let token = parent.child_token();
        let (attached_tx, attached_rx) = oneshot::channel();
        self.task = Some(tokio::spawn(run_session(
            api,
            master,
            deadline,
            token.clone(),
            Some(attached_tx),
        )));
        self.token = Some(token);

        if attached_rx.await.is_err() {
            debug!("handshake listener on {master_id} ended before attaching");
        }
    }

    /// Cancels the active session, if any.  Calling it twice is harmless.
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Returns `true` while a session is running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Waits for the current session to end and returns its outcome.
    ///
    /// Returns `Cancelled` when no session was started.
    pub async fn outcome(&mut self) -> HandshakeOutcome {
        let Some(task) = self.task.take() else {
            return HandshakeOutcome::Cancelled;
        };
        self.token = None;
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => HandshakeOutcome::Unavailable(format!("listener task failed: {e}")),
        }
    }
}

impl Drop for HandshakeListener {
    fn drop(&mut self) {
        self.cancel();
    }
}
