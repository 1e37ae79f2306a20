//! Integration tests for the submission cycle.
//!
//! # Purpose
//!
//! These tests drive [`SubmissionOrchestrator`] through its public API with a
//! recording [`ControlApi`] double, and the [`HttpControlApi`] against a
//! throwaway HTTP listener.  They verify:
//!
//! - A failed preflight issues zero creation requests and leaves every node
//!   status untouched.
//! - The handshake listener attaches before the first creation request.
//! - A failed creation request marks only its own node.
//! - A handshake log line on the event stream confirms the cycle.
//! - A silent event stream ends the cycle with a timeout, not a failure.
//! - Cancelling mid-cycle settles every pending node exactly once.
//!
//! # Event stream script
//!
//! Every `open_events` call on the double yields the same script: a heartbeat
//! event (consumed by the preflight check), then the scripted events, then
//! either the end of the stream or silence, depending on `hold_open`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tunnelmap_core::{GraphStore, MasterConfig, Node, NodeId, NodeRole, SubmissionState};
use tunnelmap_editor::application::handshake::HandshakeOutcome;
use tunnelmap_editor::application::plan::SubmissionPlan;
use tunnelmap_editor::application::submit::{
    Confirmer, CycleState, SubmissionOrchestrator, SubmitError, SubmitSettings,
};
use tunnelmap_editor::infrastructure::control_api::{
    ApiError, ControlApi, EventStream, HttpControlApi, InstanceRecord,
};
use tunnelmap_editor::infrastructure::sse::SseEvent;

// ── Test doubles ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingApi {
    /// `(master id, instance url)` of every creation request.
    creates: Mutex<Vec<(String, String)>>,
    event_opens: Mutex<Vec<String>>,
    /// `"events"` or `"create"` per call, in call order.
    calls: Mutex<Vec<&'static str>>,
    /// `open_events` fails with this HTTP status.
    events_status: Option<u16>,
    /// Events after the heartbeat.
    script: Vec<SseEvent>,
    /// Keep the stream open (silent) after the script.
    hold_open: bool,
    /// Creation requests whose URL contains this fail with HTTP 409.
    fail_containing: Option<&'static str>,
    /// Creation requests never settle.
    hang_creates: bool,
}

#[async_trait]
impl ControlApi for RecordingApi {
    async fn create_instance(
        &self,
        master: &MasterConfig,
        instance_url: &str,
    ) -> Result<InstanceRecord, ApiError> {
        self.calls.lock().unwrap().push("create");
        self.creates
            .lock()
            .unwrap()
            .push((master.id.clone(), instance_url.to_string()));
        if self.hang_creates {
            futures::future::pending::<()>().await;
        }
        match self.fail_containing {
            Some(needle) if instance_url.contains(needle) => Err(ApiError::Status {
                status: 409,
                message: format!("listen address already in use by another instance: {instance_url}"),
            }),
            _ => Ok(InstanceRecord {
                id: format!("inst-{}", self.creates.lock().unwrap().len()),
                url: instance_url.to_string(),
            }),
        }
    }

    async fn list_instances(&self, _master: &MasterConfig) -> Result<Vec<InstanceRecord>, ApiError> {
        Ok(Vec::new())
    }

    async fn open_events(&self, master: &MasterConfig) -> Result<EventStream, ApiError> {
        self.calls.lock().unwrap().push("events");
        self.event_opens.lock().unwrap().push(master.id.clone());
        if let Some(status) = self.events_status {
            return Err(ApiError::Status {
                status,
                message: "Service Unavailable".to_string(),
            });
        }
        let mut events = vec![SseEvent::new("instance", r#"{"type":"initial"}"#)];
        events.extend(self.script.iter().cloned());
        let scripted = stream::iter(events.into_iter().map(Ok));
        if self.hold_open {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}

/// Accepts every plan that lists at least one instance.
struct AutoConfirm;

impl AutoConfirm {
    fn boxed() -> Box<Self> {
        Box::new(Self)
    }
}

impl Confirmer for AutoConfirm {
    fn confirm(&self, plan: &SubmissionPlan, _listen_master: &str) -> bool {
        plan.instance_count() > 0
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn handshake_event(latency_ms: u64) -> SseEvent {
    SseEvent::new(
        "instance",
        serde_json::json!({
            "type": "log",
            "logs": format!("Tunnel handshaked: 10.0.0.2:10000 in {latency_ms}ms"),
            "instance": { "id": "inst-1" },
            "time": "2024-01-01T00:00:00Z",
        })
        .to_string(),
    )
}

/// One master with two servers listening on ports 10000 and 10001.
fn two_server_graph() -> (GraphStore, NodeId, NodeId) {
    let mut store = GraphStore::new();
    store.upsert_master(MasterConfig::new("m1", "https://master1.example.com/api").with_api_key("k1"));
    let m = store.add_node(Node::master("edge", "m1")).unwrap();
    let mut server = |label: &str, port: u16| {
        store
            .add_node(
                Node::new(NodeRole::Server, label)
                    .in_container(&m)
                    .with_data(|d| {
                        d.tunnel_address = format!("0.0.0.0:{port}");
                        d.target_address = "127.0.0.1:8080".into();
                    }),
            )
            .unwrap()
    };
    let a = server("a", 10000);
    let b = server("b", 10001);
    (store, a, b)
}

fn settings() -> SubmitSettings {
    SubmitSettings {
        preflight_timeout: Duration::from_secs(10),
        handshake_timeout: Duration::from_secs(25),
        error_message_limit: 40,
    }
}

// ── Preflight ─────────────────────────────────────────────────────────────────

/// A non-200 answer from the event stream aborts the cycle before any
/// creation request and before the operator is asked.  No node status
/// changes, not even for nodes the plan would exclude.
#[tokio::test]
async fn test_preflight_failure_issues_zero_creates() {
    // Arrange
    let api = Arc::new(RecordingApi {
        events_status: Some(503),
        ..RecordingApi::default()
    });
    let confirmer = AutoConfirm::boxed();
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), confirmer, settings());
    let (mut store, a, _) = two_server_graph();
    let loose = store.add_node(Node::new(NodeRole::Client, "loose")).unwrap();

    // Act
    let result = orchestrator.run_cycle(&mut store, None).await;

    // Assert
    assert!(matches!(result, Err(SubmitError::Preflight { ref master, .. }) if master == "m1"));
    assert!(api.creates.lock().unwrap().is_empty());
    assert_eq!(orchestrator.state(), CycleState::Idle);
    assert!(store.node(&a).unwrap().data.submission.is_none());
    assert!(store.node(&loose).unwrap().data.submission.is_none());
}

/// Statuses of the previous cycle survive an aborted one.
#[tokio::test]
async fn test_preflight_failure_keeps_previous_statuses() {
    // Arrange
    let api = Arc::new(RecordingApi {
        script: vec![handshake_event(2)],
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, a, _) = two_server_graph();
    orchestrator.run_cycle(&mut store, None).await.unwrap();

    // Act
    let result = orchestrator.run_cycle(&mut store, Some("m2")).await;

    // Assert
    assert!(matches!(result, Err(SubmitError::Preflight { ref master, .. }) if master == "m2"));
    assert_eq!(store.node(&a).unwrap().data.submission.state, SubmissionState::Success);
}

/// An event stream that stays silent past the preflight deadline counts as a
/// preflight failure.
#[tokio::test(start_paused = true)]
async fn test_silent_event_stream_fails_preflight_after_timeout() {
    let api = Arc::new(SilentApi::default());
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, _, _) = two_server_graph();

    let result = orchestrator.run_cycle(&mut store, None).await;

    assert!(matches!(result, Err(SubmitError::Preflight { .. })));
    assert_eq!(*api.creates.lock().unwrap(), 0);
}

/// Event stream that never yields anything.
#[derive(Default)]
struct SilentApi {
    creates: Mutex<usize>,
}

#[async_trait]
impl ControlApi for SilentApi {
    async fn create_instance(
        &self,
        _master: &MasterConfig,
        instance_url: &str,
    ) -> Result<InstanceRecord, ApiError> {
        *self.creates.lock().unwrap() += 1;
        Ok(InstanceRecord {
            id: String::new(),
            url: instance_url.to_string(),
        })
    }

    async fn list_instances(&self, _master: &MasterConfig) -> Result<Vec<InstanceRecord>, ApiError> {
        Ok(Vec::new())
    }

    async fn open_events(&self, _master: &MasterConfig) -> Result<EventStream, ApiError> {
        Ok(stream::pending().boxed())
    }
}

// ── Creation ──────────────────────────────────────────────────────────────────

/// One failing request marks its node as an error with a truncated message;
/// its sibling is still created.
#[tokio::test]
async fn test_failed_create_is_isolated_to_its_node() {
    // Arrange
    let api = Arc::new(RecordingApi {
        script: vec![handshake_event(30)],
        fail_containing: Some(":10001/"),
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, a, b) = two_server_graph();

    // Act
    let report = orchestrator.run_cycle(&mut store, None).await.unwrap();

    // Assert
    assert_eq!(api.creates.lock().unwrap().len(), 2);
    assert_eq!(report.created, vec![a.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, b);

    let ok = &store.node(&a).unwrap().data.submission;
    assert_eq!(ok.state, SubmissionState::Success);

    let failed = &store.node(&b).unwrap().data.submission;
    assert_eq!(failed.state, SubmissionState::Error);
    let message = failed.message.as_deref().unwrap();
    assert!(message.ends_with('…'));
    assert_eq!(message.chars().count(), 41);
}

/// Nodes the plan excludes are marked without being sent.
#[tokio::test]
async fn test_excluded_nodes_are_marked_and_not_sent() {
    let api = Arc::new(RecordingApi {
        script: vec![handshake_event(5)],
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, _, _) = two_server_graph();
    let loose = store.add_node(Node::new(NodeRole::Client, "loose")).unwrap();

    let report = orchestrator.run_cycle(&mut store, None).await.unwrap();

    assert_eq!(api.creates.lock().unwrap().len(), 2);
    assert_eq!(report.excluded.len(), 1);
    let status = &store.node(&loose).unwrap().data.submission;
    assert_eq!(status.state, SubmissionState::Error);
    assert_eq!(status.message.as_deref(), Some("not inside a master container"));
}

/// Nodes loaded from a master's running instances are never sent again.
#[tokio::test]
async fn test_expanded_instances_are_not_created_again() {
    // Arrange
    let api = Arc::new(RecordingApi {
        script: vec![handshake_event(6)],
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, a, b) = two_server_graph();
    let m = store.node(&a).unwrap().parent.clone().unwrap();
    let loaded = store
        .expand_master(
            &m,
            [
                ("remote-1", "server://0.0.0.0:10005/127.0.0.1:8080"),
                ("remote-2", "client://127.0.0.1:10005/127.0.0.1:9000"),
            ],
        )
        .unwrap();

    // Act
    let report = orchestrator.run_cycle(&mut store, None).await.unwrap();

    // Assert
    let creates = api.creates.lock().unwrap().clone();
    assert_eq!(creates.len(), 2);
    assert!(creates.iter().all(|(_, url)| !url.contains(":10005")));
    let mut created = report.created.clone();
    created.sort();
    let mut drawn = vec![a, b];
    drawn.sort();
    assert_eq!(created, drawn);
    for id in loaded {
        assert!(store.node(&id).unwrap().data.submission.is_none());
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// The listener's stream is open before the first creation request goes out,
/// so a handshake logged right after creation cannot be missed.
#[tokio::test]
async fn test_listener_attaches_before_first_create() {
    // Arrange
    let api = Arc::new(RecordingApi {
        script: vec![handshake_event(4)],
        hold_open: true,
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, _, _) = two_server_graph();

    // Act
    orchestrator.run_cycle(&mut store, None).await.unwrap();

    // Assert
    let calls = api.calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["events", "events", "create", "create"]);
}

#[tokio::test]
async fn test_handshake_line_confirms_cycle() {
    // Arrange
    let api = Arc::new(RecordingApi {
        script: vec![handshake_event(35)],
        hold_open: true,
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, _, _) = two_server_graph();

    // Act
    let report = orchestrator.run_cycle(&mut store, Some("m1")).await.unwrap();

    // Assert
    match report.handshake {
        HandshakeOutcome::Confirmed(h) => {
            assert_eq!(h.latency_ms, 35);
            assert_eq!(h.instance_id.as_deref(), Some("inst-1"));
        }
        other => panic!("expected a confirmed handshake, got {other:?}"),
    }
    // Preflight check plus the listener.
    assert_eq!(*api.event_opens.lock().unwrap(), vec!["m1", "m1"]);
    assert_eq!(orchestrator.state(), CycleState::Done);
}

/// No handshake line within the deadline is informational: every instance is
/// still reported as created.
#[tokio::test(start_paused = true)]
async fn test_missing_handshake_times_out_without_failing_nodes() {
    // Arrange
    let api = Arc::new(RecordingApi {
        hold_open: true,
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, a, b) = two_server_graph();

    // Act
    let report = orchestrator.run_cycle(&mut store, None).await.unwrap();

    // Assert
    assert_eq!(report.handshake, HandshakeOutcome::TimedOut);
    assert_eq!(report.created.len(), 2);
    for id in [a, b] {
        assert_eq!(store.node(&id).unwrap().data.submission.state, SubmissionState::Success);
    }
}

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Cancelling while requests are in flight ends the cycle and settles every
/// pending node as an error.
#[tokio::test(start_paused = true)]
async fn test_cancel_during_submission_settles_pending_nodes() {
    // Arrange
    let api = Arc::new(RecordingApi {
        hold_open: true,
        hang_creates: true,
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, a, b) = two_server_graph();
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        token.cancel();
    });

    // Act
    let result = orchestrator.run_cycle(&mut store, None).await;

    // Assert
    assert_eq!(result.unwrap_err(), SubmitError::Cancelled);
    assert_eq!(api.creates.lock().unwrap().len(), 2);
    for id in [a, b] {
        let status = &store.node(&id).unwrap().data.submission;
        assert_eq!(status.state, SubmissionState::Error);
        assert_eq!(status.message.as_deref(), Some("submission cycle cancelled"));
    }
}

/// A second cycle starts from cleared statuses.
#[tokio::test]
async fn test_new_cycle_resets_previous_statuses() {
    let api = Arc::new(RecordingApi {
        script: vec![handshake_event(1)],
        fail_containing: Some(":10001/"),
        ..RecordingApi::default()
    });
    let mut orchestrator = SubmissionOrchestrator::new(api.clone(), AutoConfirm::boxed(), settings());
    let (mut store, _, b) = two_server_graph();

    orchestrator.run_cycle(&mut store, None).await.unwrap();
    store
        .update_node(&b, |d| d.tunnel_address = "0.0.0.0:10002".into())
        .unwrap();
    let second = orchestrator.run_cycle(&mut store, None).await.unwrap();

    assert!(second.failed.is_empty());
    assert_eq!(store.node(&b).unwrap().data.submission.state, SubmissionState::Success);
}

// ── HTTP control API ──────────────────────────────────────────────────────────

/// Serves one canned HTTP response per connection and records request lines.
async fn serve_canned(response: String) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let head = String::from_utf8_lossy(&buf[..n]);
            if let Some(line) = head.lines().next() {
                seen.lock().unwrap().push(line.to_string());
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{addr}/api"), requests)
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Over real HTTP, a 503 from `/events` ends the cycle in a preflight error
/// and no `POST /instances` is ever sent.
#[tokio::test]
async fn test_http_preflight_503_sends_no_post() {
    // Arrange
    let (api_url, requests) = serve_canned(http_response(
        "503 Service Unavailable",
        "application/json",
        r#"{"error":"event stream disabled"}"#,
    ))
    .await;
    let api = Arc::new(HttpControlApi::new().unwrap());
    let mut orchestrator = SubmissionOrchestrator::new(api, AutoConfirm::boxed(), settings());
    let mut store = GraphStore::new();
    store.upsert_master(MasterConfig::new("m1", api_url).with_api_key("k1"));
    let m = store.add_node(Node::master("edge", "m1")).unwrap();
    store
        .add_node(Node::new(NodeRole::Server, "s").in_container(&m))
        .unwrap();

    // Act
    let result = orchestrator.run_cycle(&mut store, None).await;

    // Assert
    match result {
        Err(SubmitError::Preflight { reason, .. }) => {
            assert!(reason.contains("event stream disabled"), "reason: {reason}");
            assert!(reason.contains("503"), "reason: {reason}");
        }
        other => panic!("expected a preflight error, got {other:?}"),
    }
    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /api/events"));
}

#[tokio::test]
async fn test_http_event_stream_is_decoded() {
    let body = "event: instance\ndata: {\"type\":\"log\",\"logs\":\"Tunnel handshaked in 9ms\"}\n\n";
    let (api_url, _) = serve_canned(http_response("200 OK", "text/event-stream", body)).await;
    let api = HttpControlApi::new().unwrap();
    let master = MasterConfig::new("m1", api_url).with_api_key("k1");

    let mut events = api.open_events(&master).await.unwrap();
    let first = events.next().await.unwrap().unwrap();

    assert_eq!(first.event, "instance");
    assert!(first.data.contains("handshaked"));
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_http_create_reports_error_field() {
    let (api_url, requests) = serve_canned(http_response(
        "409 Conflict",
        "application/json",
        r#"{"error":"port in use"}"#,
    ))
    .await;
    let api = HttpControlApi::new().unwrap();
    let master = MasterConfig::new("m1", api_url).with_api_key("k1");

    let result = api.create_instance(&master, "server://0.0.0.0:10000/127.0.0.1:8080").await;

    match result {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 409);
            assert_eq!(message, "port in use");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
    assert!(requests.lock().unwrap()[0].starts_with("POST /api/instances"));
}
