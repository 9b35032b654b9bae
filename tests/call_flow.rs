//! End-to-end call flow over the in-memory relay
//!
//! Two controllers in one process, loopback configuration (host candidates
//! only). These tests exercise the full negotiation path: offer/answer via
//! the relay, trickled candidates, control channel open, in-band control
//! traffic, hangup and automatic re-arm.

use peercall::{
    CallConfig, CallEvent, CallStatus, Error, MemoryRelay, SessionController, SignalingRelay,
    SilentMediaSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(15);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn controller(relay: Arc<MemoryRelay>) -> Arc<SessionController> {
    init_tracing();
    SessionController::new(
        CallConfig::loopback(),
        relay,
        Arc::new(SilentMediaSource),
    )
    .await
    .expect("controller should arm")
}

async fn wait_for_status(rx: &mut broadcast::Receiver<CallEvent>, wanted: CallStatus) {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(CallEvent::Status(status)) if status == wanted => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed while waiting for {:?}: {}", wanted, e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for status {:?}", wanted));
}

async fn next_non_status(rx: &mut broadcast::Receiver<CallEvent>) -> CallEvent {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(CallEvent::Status(_)) => continue,
                Ok(event) => break event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for control event")
}

async fn connect_pair(
    relay: &Arc<MemoryRelay>,
) -> (
    Arc<SessionController>,
    Arc<SessionController>,
    broadcast::Receiver<CallEvent>,
    broadcast::Receiver<CallEvent>,
) {
    let caller = controller(relay.clone()).await;
    let answerer = controller(relay.clone()).await;

    let mut caller_events = caller.subscribe();
    let mut answerer_events = answerer.subscribe();

    let call_id = caller.start_as_caller().await.expect("start should succeed");
    answerer
        .answer_call(&call_id)
        .await
        .expect("answer should succeed");

    wait_for_status(&mut caller_events, CallStatus::Connected).await;
    wait_for_status(&mut answerer_events, CallStatus::Connected).await;

    (caller, answerer, caller_events, answerer_events)
}

#[tokio::test]
async fn test_two_peers_connect() {
    let relay = MemoryRelay::new();
    let (caller, answerer, _ce, _ae) = connect_pair(&relay).await;

    assert_eq!(caller.status().await, CallStatus::Connected);
    assert_eq!(answerer.status().await, CallStatus::Connected);
}

#[tokio::test]
async fn test_mute_unmute_reaches_peer_in_order() {
    let relay = MemoryRelay::new();
    let (caller, _answerer, _ce, mut answerer_events) = connect_pair(&relay).await;

    caller.toggle_audio(false).await.unwrap();
    caller.toggle_audio(true).await.unwrap();

    // The control channel is ordered: mute strictly before unmute.
    assert!(matches!(
        next_non_status(&mut answerer_events).await,
        CallEvent::RemoteAudio { muted: true }
    ));
    assert!(matches!(
        next_non_status(&mut answerer_events).await,
        CallEvent::RemoteAudio { muted: false }
    ));
}

#[tokio::test]
async fn test_camera_toggle_reaches_peer() {
    let relay = MemoryRelay::new();
    let (caller, _answerer, _ce, mut answerer_events) = connect_pair(&relay).await;

    caller.toggle_video(false).await.unwrap();

    assert!(matches!(
        next_non_status(&mut answerer_events).await,
        CallEvent::RemoteCamera { enabled: false }
    ));
}

#[tokio::test]
async fn test_text_and_binary_roundtrip() {
    let relay = MemoryRelay::new();
    let (caller, answerer, mut caller_events, mut answerer_events) = connect_pair(&relay).await;

    caller.send_text("hello from the caller").await.unwrap();
    answerer.send_binary(vec![0xde, 0xad, 0xbe, 0xef]).await.unwrap();

    match next_non_status(&mut answerer_events).await {
        CallEvent::RemoteText(text) => assert_eq!(text, "hello from the caller"),
        other => panic!("expected text event, got {:?}", other),
    }
    match next_non_status(&mut caller_events).await {
        CallEvent::RemoteBinary(data) => assert_eq!(data, vec![0xde, 0xad, 0xbe, 0xef]),
        other => panic!("expected binary event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_answer_unknown_call_leaves_session_untouched() {
    let relay = MemoryRelay::new();
    let answerer = controller(relay).await;

    let result = answerer.answer_call("nonexistent-call").await;
    assert!(matches!(result, Err(Error::CallNotFound(_))));
    assert_eq!(answerer.status().await, CallStatus::Idle);
}

#[tokio::test]
async fn test_hangup_tears_down_both_sides() {
    let relay = MemoryRelay::new();
    let (caller, _answerer, mut caller_events, mut answerer_events) = connect_pair(&relay).await;

    caller.hang_up().await.unwrap();

    // The initiating side closes and re-arms synchronously.
    wait_for_status(&mut caller_events, CallStatus::Closed).await;
    wait_for_status(&mut caller_events, CallStatus::Idle).await;

    // The peer observes the in-band closure and re-arms on its own.
    wait_for_status(&mut answerer_events, CallStatus::Closed).await;
    wait_for_status(&mut answerer_events, CallStatus::Idle).await;
}

#[tokio::test]
async fn test_new_call_immediately_after_hangup() {
    let relay = MemoryRelay::new();
    let (caller, answerer, mut caller_events, mut answerer_events) = connect_pair(&relay).await;

    caller.hang_up().await.unwrap();
    wait_for_status(&mut caller_events, CallStatus::Idle).await;
    wait_for_status(&mut answerer_events, CallStatus::Idle).await;

    // Roles swap for the second call; no setup step in between.
    let call_id = answerer.start_as_caller().await.unwrap();
    caller.answer_call(&call_id).await.unwrap();

    wait_for_status(&mut caller_events, CallStatus::Connected).await;
    wait_for_status(&mut answerer_events, CallStatus::Connected).await;
}

#[tokio::test]
async fn test_relay_records_full_negotiation() {
    let relay = MemoryRelay::new();
    let caller = controller(relay.clone()).await;
    let answerer = controller(relay.clone()).await;

    let mut caller_events = caller.subscribe();
    let call_id = caller.start_as_caller().await.unwrap();
    answerer.answer_call(&call_id).await.unwrap();
    wait_for_status(&mut caller_events, CallStatus::Connected).await;

    // Both descriptions ended up in the record; the record outlives the
    // call (cleanup is an external concern).
    let record = relay.fetch_call(&call_id).await.unwrap().unwrap();
    assert!(record.offer.is_some());
    assert!(record.answer.is_some());
}
