//! End-to-end scenarios: capture taps, through the relay hub, into the
//! panel session's entry store.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tagscope_capture::{CaptureConfig, NetworkTap, QueueSink, QueueTap};
use tagscope_common::{constants, MessageTag, QueueCall, QueueVariant};
use tagscope_panel::{DerivedKind, EventKind, FilterSet, PanelSession, PanelState};
use tagscope_relay::{RelayConfig, RelayHub};

/// Stands in for the page's own queue; the tap forwards into it.
struct NullSink;

impl QueueSink for NullSink {
    fn push(&mut self, _call: QueueCall) {}
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn capture_config() -> CaptureConfig {
    CaptureConfig {
        capture_stacks: false,
        ..CaptureConfig::default()
    }
}

async fn wait_for_entries(state: &Arc<PanelState>, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if state.store.read().await.len() >= count {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {count} entries");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_disconnect(state: &Arc<PanelState>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while state.capture_connected() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for capture disconnect");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_queue_call_is_stored_unclassified() {
    init_tracing();
    let hub = RelayHub::spawn(RelayConfig::default());
    let session = PanelSession::attach(&hub, constants::CHANNEL_NAME).await.unwrap();
    let state = session.state();

    let conn = hub.attach_capture().unwrap();
    let mut tap = QueueTap::install(QueueVariant::Paq, NullSink, conn, &capture_config());
    tap.push(QueueCall::new("trackEvent", vec![json!("Category"), json!("Action")]));

    wait_for_entries(&state, 2).await;
    let store = state.store.read().await;
    let view = store.visible_entries();

    // Loaded marker first, then the queue entry, unclassified
    assert_eq!(view[0].tag(), Some(MessageTag::Loaded));
    assert_eq!(view[1].tag(), Some(MessageTag::PaqEntry));
    assert!(view[1].derived.is_none());
    assert!(view[1].label().contains("trackEvent"));
    assert!(state.capture_connected());
}

#[tokio::test]
async fn test_empty_single_is_broken_with_heartbeat_hint() {
    init_tracing();
    let hub = RelayHub::spawn(RelayConfig::default());
    let session = PanelSession::attach(&hub, constants::CHANNEL_NAME).await.unwrap();
    let state = session.state();

    let conn = hub.attach_capture().unwrap();
    let tap = NetworkTap::new(QueueVariant::Ppas, conn, &capture_config());
    tap.observe("https://stats.example.com/ppms.php", None);

    wait_for_entries(&state, 1).await;
    let store = state.store.read().await;
    let view = store.visible_entries();

    assert_eq!(view[0].derived, Some(DerivedKind::Single(EventKind::BrokenEvent)));
    assert!(view[0].possible_heartbeat());
}

#[tokio::test]
async fn test_batch_is_classified_per_member() {
    init_tracing();
    let hub = RelayHub::spawn(RelayConfig::default());
    let session = PanelSession::attach(&hub, constants::CHANNEL_NAME).await.unwrap();
    let state = session.state();

    let conn = hub.attach_capture().unwrap();
    let tap = NetworkTap::new(QueueVariant::Ppas, conn, &capture_config());
    tap.observe(
        "https://stats.example.com/ppms.php",
        Some(r#"{"requests":["?idsite=1&idgoal=7","?"]}"#),
    );

    wait_for_entries(&state, 1).await;
    let store = state.store.read().await;
    let view = store.visible_entries();

    assert_eq!(
        view[0].derived,
        Some(DerivedKind::Batch(vec![
            EventKind::GoalConversion,
            EventKind::BrokenEvent
        ]))
    );
    assert!(!view[0].possible_heartbeat());
}

#[tokio::test]
async fn test_mixed_traffic_keeps_causal_order() {
    init_tracing();
    let hub = RelayHub::spawn(RelayConfig::default());
    let session = PanelSession::attach(&hub, constants::CHANNEL_NAME).await.unwrap();
    let state = session.state();

    let conn = hub.attach_capture().unwrap();
    let mut queue = QueueTap::install(QueueVariant::Paq, NullSink, conn.clone(), &capture_config());
    let network = NetworkTap::new(QueueVariant::Paq, conn, &capture_config());

    // The page pushes a call, the library flushes it to the collector
    queue.push(QueueCall::new("trackGoal", vec![json!(7)]));
    network.observe("https://stats.example.com/piwik.php?idsite=1&idgoal=7", None);
    queue.push(QueueCall::new("trackPageView", vec![]));

    wait_for_entries(&state, 4).await;
    let store = state.store.read().await;
    let view = store.visible_entries();

    let labels: Vec<String> = view.iter().map(|entry| entry.label()).collect();
    assert_eq!(labels, vec!["_paq loaded", "trackGoal", "Goal Conversion", "trackPageView"]);
    assert!(view.windows(2).all(|pair| pair[0].id < pair[1].id));
}

#[tokio::test]
async fn test_filtering_and_selection_against_live_store() {
    init_tracing();
    let hub = RelayHub::spawn(RelayConfig::default());
    let session = PanelSession::attach(&hub, constants::CHANNEL_NAME).await.unwrap();
    let state = session.state();

    let conn = hub.attach_capture().unwrap();
    let mut paq = QueueTap::install(QueueVariant::Paq, NullSink, conn.clone(), &capture_config());
    let mut ppas = QueueTap::install(QueueVariant::Ppas, NullSink, conn, &capture_config());

    paq.push(QueueCall::new("trackEvent", vec![json!("a")]));
    ppas.push(QueueCall::new("trackEvent", vec![json!("b")]));

    // 2 Loaded markers + 2 queue entries
    wait_for_entries(&state, 4).await;
    let mut store = state.store.write().await;

    let paq_entries = store.filtered_view(&FilterSet::from_tags([MessageTag::PaqEntry]));
    assert_eq!(paq_entries.len(), 1);
    let paq_id = paq_entries[0].id;

    assert!(store.select(paq_id));
    store.set_filter(FilterSet::from_tags([MessageTag::PpasEntry]));
    assert!(store.selected().is_none(), "hidden selection must clear");
}

#[tokio::test]
async fn test_unknown_frame_is_rejected_without_corrupting_store() {
    init_tracing();
    let hub = RelayHub::spawn(RelayConfig::default());
    let session = PanelSession::attach(&hub, constants::CHANNEL_NAME).await.unwrap();
    let state = session.state();

    let conn = hub.attach_capture().unwrap();
    let mut tap = QueueTap::install(QueueVariant::Paq, NullSink, conn.clone(), &capture_config());

    // A frame from some newer capture build this panel does not know
    conn.send_frame(r#"{"type":"HEAP_SNAPSHOT","payload":{"bytes":1024}}"#.to_string())
        .unwrap();
    tap.push(QueueCall::new("trackPageView", vec![]));

    wait_for_entries(&state, 2).await;
    let store = state.store.read().await;
    let view = store.visible_entries();

    assert_eq!(view.len(), 2);
    assert_eq!(view[0].tag(), Some(MessageTag::Loaded));
    assert!(view[1].label().contains("trackPageView"));
}

#[tokio::test]
async fn test_capture_teardown_flips_connected_flag() {
    init_tracing();
    let hub = RelayHub::spawn(RelayConfig::default());
    let session = PanelSession::attach(&hub, constants::CHANNEL_NAME).await.unwrap();
    let state = session.state();

    {
        let conn = hub.attach_capture().unwrap();
        let _tap = QueueTap::install(QueueVariant::Paq, NullSink, conn, &capture_config());
        wait_for_entries(&state, 1).await;
        assert!(state.capture_connected());
        // Page navigates away: every capture handle drops
    }

    wait_for_disconnect(&state).await;
    assert!(!state.capture_connected());
}
