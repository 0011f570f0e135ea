//! Gateway client integration tests
//!
//! Scripted tests run on a paused clock; the socket test uses a local
//! plain-`ws://` server and real time.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use gateway_client::codec::CloseNotice;
use gateway_client::rest::{RestAction, RestExecutor};
use gateway_client::runtime::{NORMAL_CLOSURE, RECONNECT_CLOSURE};
use gateway_client::transport::{GatewayTransport, Incoming, TlsTransport};
use gateway_client::{ExitReason, GatewayClient, GatewayEvent, RunState};
use gateway_core::Snowflake;
use integration_tests::*;
use parking_lot::Mutex;

const STARTUP: &str = "Bot is ready and online.";
const SHUTDOWN: &str = "Bot ending process and exits, shutdown scheduled.";
const FAILURE: &str = "Gateway client encountered an error!";

fn request_shutdown_after<T, R>(client: &GatewayClient<T, R>, delay: Duration)
where
    T: GatewayTransport,
    R: RestExecutor,
{
    let handle = client.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        handle.request();
    });
}

// ============================================================================
// Session establishment
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identify_ready_and_dispatch() {
    let transport = ScriptedTransport::new(vec![vec![
        text(hello(45_000)),
        text(ready(1)),
        text(guild_create(2)),
    ]]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[]), &transport, &rest);

    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    for name in ["READY", "GUILD_CREATE"] {
        let recorder = Arc::clone(&seen);
        client.router_mut().on_event(name, move |e: &GatewayEvent| {
            recorder.lock().push(e.name.clone().unwrap_or_default());
        });
    }
    request_shutdown_after(&client, Duration::from_secs(1));

    let state = client.run().await.unwrap();

    let identify = &transport.sent_on(0)[0];
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "test-token");

    assert_eq!(*seen.lock(), vec!["READY", "GUILD_CREATE"]);
    assert_eq!(state.sequence, 2);
    assert_eq!(state.session_id.as_deref(), Some(SESSION_ID));
    assert_eq!(state.bot_user_id, Some(Snowflake::new(BOT_ID)));
    assert_eq!(state.run_state, RunState::Exited);

    assert_eq!(client.exit_reason(), Some(&ExitReason::ShutdownRequested));
    assert_eq!(transport.closes(), vec![NORMAL_CLOSURE]);
    assert_eq!(rest.messages(), vec![STARTUP, SHUTDOWN]);
}

#[tokio::test(start_paused = true)]
async fn test_server_ping_is_answered() {
    let transport = ScriptedTransport::new(vec![vec![
        text(hello(45_000)),
        Incoming::Ping(b"ping".to_vec()),
    ]]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[]), &transport, &rest);
    request_shutdown_after(&client, Duration::from_secs(1));

    client.run().await.unwrap();

    assert_eq!(transport.pongs(), 1);
}

// ============================================================================
// Reconnect and resume
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_resumes_session() {
    let transport = ScriptedTransport::new(vec![
        vec![
            text(hello(45_000)),
            text(ready(1)),
            text(guild_create(2)),
            Incoming::Close(CloseNotice::abnormal()),
        ],
        vec![text(hello(45_000)), text(resumed(3))],
    ]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[]), &transport, &rest);
    request_shutdown_after(&client, Duration::from_secs(2));

    let state = client.run().await.unwrap();

    let connects = transport.connects();
    assert_eq!(connects.len(), 2);
    assert_eq!(connects[1], format!("{RESUME_URL}/?v=10&encoding=json"));

    let resume = &transport.sent_on(1)[0];
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], SESSION_ID);
    assert_eq!(resume["d"]["seq"], 2);

    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(state.session_id.as_deref(), Some(SESSION_ID));
    assert_eq!(transport.closes(), vec![RECONNECT_CLOSURE, NORMAL_CLOSURE]);
    assert!(rest.messages().contains(&FAILURE.to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_non_resumable_invalid_session_identifies_again() {
    let transport = ScriptedTransport::new(vec![
        vec![text(hello(45_000)), text(ready(1)), text(invalid_session(false))],
        vec![text(hello(45_000)), text(ready(1))],
    ]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[]), &transport, &rest);
    request_shutdown_after(&client, Duration::from_secs(2));

    let state = client.run().await.unwrap();

    let connects = transport.connects();
    assert_eq!(connects.len(), 2);
    assert_eq!(connects[1], format!("{GATEWAY_URL}/?v=10&encoding=json"));
    assert_eq!(transport.sent_on(1)[0]["op"], 2);

    let lookups = rest
        .calls()
        .iter()
        .filter(|(action, _)| *action == RestAction::GetGateway)
        .count();
    assert_eq!(lookups, 2);
    assert_eq!(state.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_heartbeat_ack_forces_resume() {
    let transport = ScriptedTransport::new(vec![
        vec![text(hello(1_000)), text(ready(1))],
        vec![text(hello(1_000)), text(resumed(2)), text(heartbeat_ack())],
    ]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[]), &transport, &rest);
    request_shutdown_after(&client, Duration::from_millis(2_400));

    client.run().await.unwrap();

    let first: Vec<_> = transport.sent_on(0).iter().map(|v| v["op"].clone()).collect();
    assert_eq!(first, vec![2, 1]);
    assert_eq!(transport.sent_on(0)[1]["d"], 1);

    assert_eq!(transport.connects().len(), 2);
    assert_eq!(transport.sent_on(1)[0]["op"], 6);
    assert_eq!(transport.closes(), vec![RECONNECT_CLOSURE, NORMAL_CLOSURE]);
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_failed_connect() {
    let transport = ScriptedTransport::new(vec![
        vec![text(hello(45_000)), text(ready(1)), Incoming::Close(CloseNotice::abnormal())],
        vec![text(hello(45_000)), text(resumed(2))],
    ]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[]), &transport, &rest);

    let failing = transport.clone();
    client.router_mut().on_event("READY", move |_: &GatewayEvent| {
        failing.fail_next_connects(1);
    });
    // Stop as soon as the session is confirmed again
    let handle = client.shutdown_handle();
    client.router_mut().on_event("RESUMED", move |_: &GatewayEvent| handle.request());

    let state = client.run().await.unwrap();

    assert_eq!(transport.connects().len(), 2);
    assert_eq!(transport.sent_on(1)[0]["op"], 6);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(client.exit_reason(), Some(&ExitReason::ShutdownRequested));
    assert!(rest.messages().contains(&FAILURE.to_string()));

    // Offline presence is only sent from the run state
    let last = transport.sent_on(1).last().cloned().unwrap();
    assert_eq!(last["op"], 3);
    assert_eq!(last["d"]["status"], "offline");
}

// ============================================================================
// Exit paths
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_resume_exhausts_retries() {
    // Reconnects get Hello but never RESUMED, and heartbeats go unacknowledged
    let transport = ScriptedTransport::new(vec![
        vec![text(hello(1_000)), text(ready(1)), Incoming::Close(CloseNotice::abnormal())],
        vec![text(hello(1_000))],
        vec![],
    ]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[("GATEWAY_MAX_RETRIES", "2")]), &transport, &rest);

    let state = tokio::time::timeout(Duration::from_secs(3_600), client.run())
        .await
        .expect("client gave up on the unconfirmed session")
        .unwrap();

    assert_eq!(state.run_state, RunState::Exited);
    assert_eq!(state.reconnect_attempts, 2);
    assert_eq!(client.exit_reason(), Some(&ExitReason::RetriesExhausted));
    assert_eq!(transport.connects().len(), 3);
    assert_eq!(transport.sent_on(1)[0]["op"], 6);
    assert!(transport.sent_ops().len() < 10);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnects_exhaust_retries() {
    let transport = ScriptedTransport::new(vec![vec![
        text(hello(45_000)),
        text(ready(1)),
        text(reconnect()),
    ]]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[("GATEWAY_MAX_RETRIES", "2")]), &transport, &rest);

    let failing = transport.clone();
    client.router_mut().on_event("READY", move |_: &GatewayEvent| {
        failing.fail_next_connects(usize::MAX);
    });

    let state = client.run().await.unwrap();

    assert_eq!(state.run_state, RunState::Exited);
    assert_eq!(state.reconnect_attempts, 2);
    assert_eq!(client.exit_reason(), Some(&ExitReason::RetriesExhausted));
    assert_eq!(transport.connects().len(), 1);
    assert_eq!(rest.messages().last().map(String::as_str), Some(FAILURE));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_closes_while_reconnecting_exhaust_retries() {
    let transport = ScriptedTransport::new(vec![
        vec![text(hello(45_000)), text(ready(1)), Incoming::Close(CloseNotice::abnormal())],
        vec![Incoming::Close(CloseNotice::abnormal())],
        vec![Incoming::Close(CloseNotice::abnormal())],
    ]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[("GATEWAY_MAX_RETRIES", "2")]), &transport, &rest);

    let state = client.run().await.unwrap();

    assert_eq!(state.run_state, RunState::Exited);
    assert_eq!(client.exit_reason(), Some(&ExitReason::RetriesExhausted));
    assert_eq!(transport.connects().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_close_code_exits() {
    let transport = ScriptedTransport::new(vec![vec![
        text(hello(45_000)),
        Incoming::Close(CloseNotice::new(4004, "Authentication failed")),
    ]]);
    let rest = RecordingRest::default();
    let config = test_config(&[("GATEWAY_FATAL_CODES", "4004")]);
    let mut client = scripted_client(config, &transport, &rest);

    let state = client.run().await.unwrap();

    assert_eq!(state.run_state, RunState::Exited);
    assert_eq!(client.exit_reason(), Some(&ExitReason::FatalClose(4004)));
    assert_eq!(transport.connects().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_command_from_control_user() {
    let transport = ScriptedTransport::new(vec![vec![
        text(hello(45_000)),
        text(ready(1)),
        // Not a control user
        text(message_create(2, 8, &format!("<@{BOT_ID}> !shutdown"))),
        // Addressed to a different bot
        text(message_create(3, CONTROL_USER_ID, "<@1> !shutdown")),
        text(shutdown_command(4)),
    ]]);
    let rest = RecordingRest::default();
    let mut client = scripted_client(test_config(&[]), &transport, &rest);

    let state = client.run().await.unwrap();

    assert_eq!(state.run_state, RunState::Exited);
    assert_eq!(state.sequence, 4);
    assert_eq!(client.exit_reason(), Some(&ExitReason::ShutdownCommand));
    assert_eq!(transport.closes(), vec![NORMAL_CLOSURE]);

    let presence = transport.sent_on(0).last().cloned().unwrap();
    assert_eq!(presence["op"], 3);
    assert_eq!(presence["d"]["status"], "offline");
    assert_eq!(rest.messages(), vec![STARTUP, SHUTDOWN]);

    let dm = rest
        .calls()
        .into_iter()
        .find(|(action, _)| *action == RestAction::CreateDm)
        .map(|(_, body)| body);
    assert_eq!(dm.unwrap()["recipient_id"], CONTROL_USER_ID.to_string());
}

// ============================================================================
// Real socket
// ============================================================================

#[tokio::test]
async fn test_session_over_local_socket() {
    let gateway = FakeGateway::bind().await.unwrap();
    let rest = RecordingRest::new(gateway.url().unwrap());

    let server = tokio::spawn(async move {
        let mut peer = gateway.accept().await.unwrap();
        assert!(peer.request.starts_with("GET /?v=10&encoding=json HTTP/1.1"));

        peer.send_json(&hello(45_000)).await.unwrap();
        let identify = peer.recv_json().await.unwrap();
        assert_eq!(identify["op"], 2);

        peer.send_json(&ready(1)).await.unwrap();
        peer.send_json(&shutdown_command(2)).await.unwrap();

        let presence = peer.recv_json().await.unwrap();
        (presence, peer.recv().await.unwrap())
    });

    let transport = TlsTransport::new(Duration::from_secs(5));
    let mut client = GatewayClient::new(test_config(&[]), transport, rest.clone());

    let state = tokio::time::timeout(Duration::from_secs(10), client.run())
        .await
        .expect("client finished")
        .unwrap();

    assert_eq!(state.run_state, RunState::Exited);
    assert_eq!(client.exit_reason(), Some(&ExitReason::ShutdownCommand));
    let (presence, close) = server.await.unwrap();
    assert_eq!(presence["op"], 3);
    assert_eq!(presence["d"]["status"], "offline");
    assert_eq!(close, PeerFrame::Close(CloseNotice::new(NORMAL_CLOSURE, "")));
    assert_eq!(rest.messages(), vec![STARTUP, SHUTDOWN]);
}
