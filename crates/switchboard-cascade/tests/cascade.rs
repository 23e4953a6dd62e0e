//! Cascade behaviour over the scripted transport, on paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use switchboard_cascade::{CascadeConfig, CascadeHandle, Orchestrator, Stage};
use switchboard_core::LinkError;
use switchboard_core::logging::capture_logs;
use switchboard_link::testing::{DialQueue, RemoteEnd, ScriptedConnector};
use switchboard_link::{LinkSnapshot, LinkState};
use tokio::sync::mpsc;
use tracing::Level;

const PRIMARY: &str = "ws://127.0.0.1:8000/ws/admin";
const SECONDARY: &str = "ws://10.0.0.5:9001/ws/admin";
const TERTIARY: &str = "ws://10.0.0.5:9001/ws/chat";
const DELAY: Duration = Duration::from_secs(5);

fn spawn(config: CascadeConfig) -> (CascadeHandle, DialQueue) {
    let (connector, dials) = ScriptedConnector::new();
    (Orchestrator::spawn(config, Arc::new(connector)), dials)
}

fn config_payload(host: &str, port: u16) -> Value {
    json!({
        "status": "success",
        "config": {"neuro_sama": {"server_settings": {"host": host, "port": port}}}
    })
}

/// Read the `get_config` request and answer it with `payload`.
async fn answer_config(remote: &mut RemoteEnd, payload: Value) {
    let request = remote.recv_json().await.expect("primary sent nothing");
    assert_eq!(request["action"], "get_config");
    assert!(remote.push_json(&json!({
        "type": "response",
        "request_id": request["request_id"],
        "payload": payload
    })));
}

async fn wait(cascade: &CascadeHandle, stage: Stage, pred: impl FnMut(&LinkSnapshot) -> bool) -> LinkSnapshot {
    cascade.link(stage).wait_for(pred).await.unwrap()
}

fn is_down(s: &LinkSnapshot) -> bool {
    s.state == LinkState::Closed && !s.reconnect_pending
}

/// All three links open. Returns the remotes in stage order.
async fn bring_up(cascade: &CascadeHandle, dials: &mut DialQueue) -> [RemoteEnd; 3] {
    cascade.start();
    let dial = dials.next().await;
    assert_eq!(dial.url(), PRIMARY);
    let mut primary = dial.accept();
    answer_config(&mut primary, config_payload("10.0.0.5", 9001)).await;

    let dial = dials.next().await;
    assert_eq!(dial.url(), SECONDARY);
    let secondary = dial.accept();

    let dial = dials.next().await;
    assert_eq!(dial.url(), TERTIARY);
    let tertiary = dial.accept();

    let _ = wait(cascade, Stage::Tertiary, |s| s.state == LinkState::Open).await;
    [primary, secondary, tertiary]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cascade_reaches_tertiary_and_routes_push_events() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    let (tx, mut rx) = mpsc::unbounded_channel();
    cascade.set_event_handler(move |event| {
        let _ = tx.send(event);
    });

    let [_primary, _secondary, tertiary] = bring_up(&cascade, &mut dials).await;
    assert!(cascade.primary().is_connected());
    assert!(cascade.secondary().is_connected());
    assert_eq!(
        cascade.config().unwrap()["neuro_sama"]["server_settings"]["host"],
        "10.0.0.5"
    );

    assert!(tertiary.push_json(&json!({"type": "chat_message", "username": "vedal", "text": "hi"})));
    let event = rx.recv().await.unwrap();
    assert_eq!(event["text"], "hi");
}

#[tokio::test(start_paused = true)]
async fn start_twice_dials_once() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    cascade.start();
    cascade.start();
    let _first = dials.next().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(dials.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn empty_server_settings_use_defaults() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    cascade.start();
    let mut primary = dials.next().await.accept();
    answer_config(
        &mut primary,
        json!({"status": "success", "config": {"neuro_sama": {"server_settings": {"host": "", "port": 0}}}}),
    )
    .await;
    assert_eq!(dials.next().await.url(), "ws://127.0.0.1:8001/ws/admin");
}

#[tokio::test(start_paused = true)]
async fn missing_server_settings_halts_cascade() {
    let (logs, _guard) = capture_logs();
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    cascade.start();
    let mut primary = dials.next().await.accept();
    answer_config(&mut primary, json!({"status": "success", "config": {}})).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(dials.try_next().is_none(), "secondary must not be dialed");
    assert!(cascade.primary().is_connected());
    assert_eq!(cascade.secondary().snapshot().state, LinkState::Idle);
    assert!(cascade.config().is_none());
    assert!(logs.has_event(Level::ERROR, "cascade halted"));
}

#[tokio::test(start_paused = true)]
async fn rejected_config_is_logged_with_message() {
    let (logs, _guard) = capture_logs();
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    cascade.start();
    let mut primary = dials.next().await.accept();
    answer_config(&mut primary, json!({"status": "error", "message": "not ready"})).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(dials.try_next().is_none());
    assert!(logs.events().iter().any(|e| {
        e.level == Level::ERROR && e.field("error").is_some_and(|v| v.contains("not ready"))
    }));
}

#[tokio::test(start_paused = true)]
async fn unanswered_config_times_out_then_recovers_on_next_open() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    cascade.start();
    let mut primary = dials.next().await.accept();
    let _unanswered = primary.recv_json().await.unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(dials.try_next().is_none());

    primary.close();
    let dial = dials.next().await;
    assert_eq!(dial.url(), PRIMARY);
    let mut primary = dial.accept();
    answer_config(&mut primary, config_payload("10.0.0.5", 9001)).await;
    assert_eq!(dials.next().await.url(), SECONDARY);
}

#[tokio::test(start_paused = true)]
async fn config_for_a_dropped_primary_is_discarded() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    cascade.start();
    let mut first = dials.next().await.accept();
    let _stale = first.recv_json().await.unwrap();
    first.close();

    let mut primary = dials.next().await.accept();
    answer_config(&mut primary, config_payload("10.0.0.5", 9001)).await;
    let secondary = dials.next().await;
    assert_eq!(secondary.url(), SECONDARY);
    let _secondary = secondary.accept();
    let _tertiary = dials.next().await.accept();

    // The first fetch expires after reconnecting; nothing is redialed.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(dials.try_next().is_none());
    assert!(cascade.secondary().is_connected());
}

#[tokio::test(start_paused = true)]
async fn primary_close_forces_dependents_down() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    let [mut primary, mut secondary, mut tertiary] = bring_up(&cascade, &mut dials).await;

    primary.close();
    let _ = wait(&cascade, Stage::Secondary, is_down).await;
    let _ = wait(&cascade, Stage::Tertiary, is_down).await;
    let snapshot = cascade.primary().snapshot();
    assert_eq!(snapshot.state, LinkState::Closed);
    assert!(snapshot.reconnect_pending);
    assert!(secondary.recv().await.is_none());
    assert!(tertiary.recv().await.is_none());

    // Only the primary comes back on its own, and the cascade follows it.
    let dial = dials.next().await;
    assert_eq!(dial.url(), PRIMARY);
    let mut primary = dial.accept();
    answer_config(&mut primary, config_payload("10.0.0.6", 9002)).await;
    assert_eq!(dials.next().await.url(), "ws://10.0.0.6:9002/ws/admin");
}

#[tokio::test(start_paused = true)]
async fn secondary_close_forces_tertiary_down_then_both_recover() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    let [_primary, mut secondary, mut tertiary] = bring_up(&cascade, &mut dials).await;

    secondary.close();
    let _ = wait(&cascade, Stage::Tertiary, is_down).await;
    assert!(tertiary.recv().await.is_none());
    assert!(cascade.primary().is_connected());

    let started = tokio::time::Instant::now();
    let dial = dials.next().await;
    assert_eq!(dial.url(), SECONDARY);
    assert!(started.elapsed() >= DELAY - Duration::from_millis(1));
    let _secondary = dial.accept();
    assert_eq!(dials.next().await.url(), TERTIARY);
}

#[tokio::test(start_paused = true)]
async fn tertiary_can_be_disabled() {
    let mut config = CascadeConfig::new(PRIMARY);
    config.tertiary_enabled = false;
    let (cascade, mut dials) = spawn(config);
    cascade.start();
    let mut primary = dials.next().await.accept();
    answer_config(&mut primary, config_payload("10.0.0.5", 9001)).await;
    let _secondary = dials.next().await.accept();
    let _ = wait(&cascade, Stage::Secondary, |s| s.state == LinkState::Open).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(dials.try_next().is_none());
    assert_eq!(cascade.tertiary().snapshot().state, LinkState::Idle);
}

#[tokio::test(start_paused = true)]
async fn secondary_requests_are_correlated() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    let [_primary, mut secondary, _tertiary] = bring_up(&cascade, &mut dials).await;

    let link = cascade.secondary().clone();
    let request = tokio::spawn(async move { link.send_request("get_status", json!({})).await });
    let sent = secondary.recv_json().await.unwrap();
    assert_eq!(sent["action"], "get_status");
    let _ = secondary.push_json(&json!({
        "type": "response",
        "request_id": sent["request_id"],
        "payload": {"is_running": true}
    }));
    assert_eq!(request.await.unwrap().unwrap(), json!({"is_running": true}));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_link() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    let [mut primary, mut secondary, mut tertiary] = bring_up(&cascade, &mut dials).await;

    cascade.shutdown().await;
    assert!(primary.recv().await.is_none());
    assert!(secondary.recv().await.is_none());
    assert!(tertiary.recv().await.is_none());

    tokio::time::sleep(DELAY * 3).await;
    assert!(dials.try_next().is_none());
    let err = cascade
        .primary()
        .send_request("get_config", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::LinkGone { .. }));
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_stops_the_cascade() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    let [mut primary, mut secondary, mut tertiary] = bring_up(&cascade, &mut dials).await;
    let copy = cascade.clone();

    drop(cascade);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(copy.primary().is_connected(), "a live clone keeps it running");

    drop(copy);
    assert!(primary.recv().await.is_none());
    assert!(secondary.recv().await.is_none());
    assert!(tertiary.recv().await.is_none());
    tokio::time::sleep(DELAY * 3).await;
    assert!(dials.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn config_watch_and_cleared_event_handler() {
    let (cascade, mut dials) = spawn(CascadeConfig::new(PRIMARY));
    let mut config_rx = cascade.subscribe_config();
    assert!(config_rx.borrow().is_none());
    let (tx, mut rx) = mpsc::unbounded_channel();
    cascade.set_event_handler(move |event| {
        let _ = tx.send(event);
    });

    let [_primary, _secondary, tertiary] = bring_up(&cascade, &mut dials).await;
    let config = config_rx.wait_for(Option::is_some).await.unwrap().clone().unwrap();
    assert_eq!(config["neuro_sama"]["server_settings"]["port"], 9001);

    assert!(tertiary.push_json(&json!({"type": "chat_message", "text": "one"})));
    assert_eq!(rx.recv().await.unwrap()["text"], "one");

    cascade.clear_event_handler();
    assert!(tertiary.push_json(&json!({"type": "chat_message", "text": "two"})));
    let router = cascade.tertiary().router();
    while router.dropped_count() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(router.dropped_count(), 1);
    assert_eq!(router.delivered_count(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn snapshots_cover_every_stage() {
    let (cascade, _dials) = spawn(CascadeConfig::new(PRIMARY));
    let snapshots = cascade.snapshots();
    let stages: Vec<Stage> = snapshots.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert_eq!(snapshots[0].1.endpoint.as_deref(), Some(PRIMARY));
    assert!(snapshots[1].1.endpoint.is_none());
}
