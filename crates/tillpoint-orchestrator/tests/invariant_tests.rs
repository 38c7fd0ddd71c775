//! Concurrency and bookkeeping invariants of the terminal.
//!
//! Listener symmetry is checked with the mock backends' lifetime counters:
//! every backend listener a subscription adds must be removed when it is
//! torn down, whatever way the session ended.

mod common;

use common::{Harness, bluetooth_reader, drain, internet_reader, start};
use rstest::rstest;
use tillpoint_backend::{BackendError, BackendEvent, EventKind};
use tillpoint_core::{
    ConnectionStatus, DiscoveryConfiguration, DiscoveryMethod, PaymentIntent, PaymentIntentStatus,
    Platform, constants,
};
use tillpoint_orchestrator::{DiscoveryEvent, TerminalError};

/// (added, removed) on both backends.
fn listener_totals(h: &Harness) -> (usize, usize) {
    (
        h.native.listeners_added() + h.network.listeners_added(),
        h.native.listeners_removed() + h.network.listeners_removed(),
    )
}

fn intent() -> PaymentIntent {
    PaymentIntent::new("pi_guard", PaymentIntentStatus::RequiresPaymentMethod, 2500, "eur")
}

#[rstest]
#[case::native_only(DiscoveryMethod::BluetoothScan, 1)]
#[case::network_only(DiscoveryMethod::Internet, 1)]
#[case::combined(DiscoveryMethod::Combined, 2)]
#[tokio::test]
async fn test_completed_session_removes_its_listeners(
    #[case] method: DiscoveryMethod,
    #[case] expected: usize,
) {
    let h = common::harness(Platform::Ios).await;
    h.native.set_discovered_readers(vec![bluetooth_reader("CHB-1")]);
    h.network.set_discovered_readers(vec![internet_reader("WPE-1")]);
    let (added_before, removed_before) = listener_totals(&h);

    let mut session = start(&h, method);
    let (added, _) = listener_totals(&h);
    assert_eq!(added - added_before, expected);

    let events = drain(&mut session).await;
    assert_eq!(events.last(), Some(&DiscoveryEvent::Completed));

    let (added_after, removed_after) = listener_totals(&h);
    assert_eq!(added_after - added_before, removed_after - removed_before);
    assert_eq!(h.native.listener_count(EventKind::ReadersDiscovered), 0);
    assert_eq!(h.network.listener_count(EventKind::ReadersDiscovered), 0);
}

#[rstest]
#[case::native_only(DiscoveryMethod::BluetoothScan)]
#[case::network_only(DiscoveryMethod::Internet)]
#[case::combined(DiscoveryMethod::Combined)]
#[tokio::test]
async fn test_cancelled_session_removes_its_listeners(#[case] method: DiscoveryMethod) {
    let h = common::harness(Platform::Ios).await;
    h.native.hold("discover_readers");
    h.network.hold("discover_readers");
    let (added_before, removed_before) = listener_totals(&h);

    let session = start(&h, method);
    assert!(h.terminal.is_discovering());
    session.cancel().await;

    let (added_after, removed_after) = listener_totals(&h);
    assert!(added_after > added_before);
    assert_eq!(added_after - added_before, removed_after - removed_before);
    assert!(!h.terminal.is_discovering());
}

#[tokio::test]
async fn test_failed_session_removes_its_listeners() {
    let h = common::harness(Platform::Ios).await;
    h.native
        .fail_next("discover_readers", BackendError::new("Bluetooth unavailable"));
    let (added_before, removed_before) = listener_totals(&h);

    let events = common::discover(&h, DiscoveryMethod::BluetoothScan).await;

    assert!(matches!(events.last(), Some(DiscoveryEvent::Failed(_))));
    let (added_after, removed_after) = listener_totals(&h);
    assert_eq!(added_after - added_before, removed_after - removed_before);
}

#[tokio::test]
async fn test_streams_remove_listeners_on_drop() {
    let h = common::harness(Platform::Ios).await;
    let (added_before, removed_before) = listener_totals(&h);

    let progress = h.terminal.update_progress().unwrap();
    let display = h.terminal.reader_display_messages().unwrap();
    let reconnect = h.terminal.reconnect_events().unwrap();

    // One listener per backend per kind; reconnect covers three kinds.
    let (added, _) = listener_totals(&h);
    assert_eq!(added - added_before, 2 + 2 + 6);

    drop(progress);
    drop(display);
    drop(reconnect);

    let (added_after, removed_after) = listener_totals(&h);
    assert_eq!(added_after - added_before, removed_after - removed_before);
    assert_eq!(h.native.listener_count(EventKind::UpdateProgress), 0);
    assert_eq!(h.network.listener_count(EventKind::ReconnectFailed), 0);
}

#[tokio::test]
async fn test_second_discovery_rejected_without_disturbing_first() {
    let h = common::harness(Platform::Ios).await;
    h.native.set_discovered_readers(vec![bluetooth_reader("CHB-1")]);
    h.native.hold("discover_readers");

    let mut first = start(&h, DiscoveryMethod::BluetoothScan);
    assert!(matches!(first.recv().await, Some(DiscoveryEvent::Readers(_))));
    let listeners = h.native.listener_count(EventKind::ReadersDiscovered);

    for method in [DiscoveryMethod::BluetoothScan, DiscoveryMethod::Internet] {
        let err = h
            .terminal
            .discover_readers(DiscoveryConfiguration::new(method))
            .unwrap_err();
        assert_eq!(err, TerminalError::DiscoveryInProgress);
    }

    assert_eq!(h.native.listener_count(EventKind::ReadersDiscovered), listeners);
    assert_eq!(h.native.call_count("discover_readers"), 1);
    assert_eq!(h.network.call_count("discover_readers"), 0);
    assert_eq!(h.native.call_count("cancel_discover_readers"), 0);

    h.native.release("discover_readers", Ok(()));
    assert_eq!(first.recv().await, Some(DiscoveryEvent::Completed));

    // Once the first session ended a new one may start.
    let events = common::discover(&h, DiscoveryMethod::BluetoothScan).await;
    assert_eq!(events.last(), Some(&DiscoveryEvent::Completed));
}

#[tokio::test]
async fn test_pushed_status_wins_over_initial_query() {
    let h = common::harness(Platform::Android).await;
    h.native.set_connection_status(constants::ANDROID_STATUS_NOT_CONNECTED);
    h.native.hold("get_connection_status");

    let mut statuses = h.terminal.connection_status().unwrap();
    assert!(h.native.wait_for_calls("get_connection_status", 1).await);

    h.native.emit(BackendEvent::ConnectionStatusChanged {
        code: constants::ANDROID_STATUS_CONNECTING,
    });
    h.native.release("get_connection_status", Ok(()));

    assert_eq!(statuses.recv().await, Some(ConnectionStatus::Connecting));

    h.native.emit(BackendEvent::ConnectionStatusChanged {
        code: constants::ANDROID_STATUS_CONNECTED,
    });
    assert_eq!(statuses.recv().await, Some(ConnectionStatus::Connected));
    assert!(statuses.try_recv().is_none());
}

#[tokio::test]
async fn test_initial_status_emitted_without_push() {
    let h = common::harness(Platform::Android).await;
    h.native.set_connection_status(constants::ANDROID_STATUS_CONNECTED);

    let mut statuses = h.terminal.connection_status().unwrap();

    assert_eq!(statuses.recv().await, Some(ConnectionStatus::Connected));
}

#[tokio::test]
async fn test_status_from_inactive_backend_ignored() {
    let h = common::harness(Platform::Ios).await;
    let mut statuses = h.terminal.connection_status().unwrap();
    assert_eq!(statuses.recv().await, Some(ConnectionStatus::NotConnected));

    h.network.emit(BackendEvent::ConnectionStatusChanged {
        code: constants::STATUS_CONNECTED,
    });
    h.native.emit(BackendEvent::ConnectionStatusChanged {
        code: constants::STATUS_CONNECTING,
    });

    assert_eq!(statuses.recv().await, Some(ConnectionStatus::Connecting));
}

#[tokio::test]
async fn test_concurrent_collection_invokes_backend_once() {
    let h = common::harness(Platform::Ios).await;
    h.native.set_payment_intent(intent());
    h.native.hold("collect_payment_method");

    let release = async {
        assert!(h.native.wait_for_calls("collect_payment_method", 1).await);
        assert!(h.terminal.is_collecting_payment_method());
        h.native.release("collect_payment_method", Ok(()));
    };
    let (first, second, ()) = tokio::join!(
        h.terminal.collect_payment_method(None),
        h.terminal.collect_payment_method(None),
        release,
    );

    assert_eq!(first.unwrap().unwrap().id, "pi_guard");
    assert_eq!(second.unwrap(), None);
    assert_eq!(h.native.call_count("collect_payment_method"), 1);
    assert!(!h.terminal.is_collecting_payment_method());
}

#[tokio::test]
async fn test_collection_gate_cleared_after_backend_error() {
    let h = common::harness(Platform::Ios).await;
    h.native.fail_next(
        "collect_payment_method",
        BackendError::new("Card removed").with_code("card_read_timed_out"),
    );

    let err = h.terminal.collect_payment_method(None).await.unwrap_err();
    assert_eq!(err.to_string(), "Card removed");
    assert!(!h.terminal.is_collecting_payment_method());

    h.native.set_payment_intent(intent());
    assert!(h.terminal.collect_payment_method(None).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_reports_leave_latest_merge_last() {
    const ROUNDS: usize = 50;
    const BATCHES: usize = 20;

    let h = common::harness(Platform::Ios).await;

    for round in 1..=ROUNDS {
        h.native.hold("discover_readers");
        h.network.hold("discover_readers");
        let mut session = start(&h, DiscoveryMethod::Combined);
        assert!(h.native.wait_for_calls("discover_readers", round).await);
        assert!(h.network.wait_for_calls("discover_readers", round).await);

        // Both backends report growing lists from their own threads.
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for size in 1..=BATCHES {
                    let readers = (0..size)
                        .map(|n| bluetooth_reader(&format!("CHB-{}", n)))
                        .collect();
                    h.native.emit(BackendEvent::ReadersDiscovered(readers));
                }
            });
            scope.spawn(|| {
                for size in 1..=BATCHES {
                    let readers = (0..size)
                        .map(|n| internet_reader(&format!("WPE-{}", n)))
                        .collect();
                    h.network.emit(BackendEvent::ReadersDiscovered(readers));
                }
            });
        });

        let merged = session.readers();
        assert_eq!(merged.len(), 2 * BATCHES);

        h.native.release("discover_readers", Ok(()));
        let events = drain(&mut session).await;
        h.network.release("discover_readers", Ok(()));

        assert_eq!(events.last(), Some(&DiscoveryEvent::Completed));
        let last_readers = events.iter().rev().find_map(|event| match event {
            DiscoveryEvent::Readers(readers) => Some(readers.clone()),
            _ => None,
        });
        assert_eq!(last_readers.as_ref(), Some(&merged), "round {}", round);
        assert_eq!(h.terminal.discovered_readers().unwrap(), merged, "round {}", round);
    }
}

#[tokio::test]
async fn test_combined_native_failure_leaves_network_call_running() {
    let h = common::harness(Platform::Ios).await;
    h.native.set_discovered_readers(vec![bluetooth_reader("CHB-1")]);
    h.network.hold("discover_readers");
    h.native.fail_next("discover_readers", BackendError::new("Bluetooth unavailable"));
    let (added_before, removed_before) = listener_totals(&h);

    let mut session = start(&h, DiscoveryMethod::Combined);
    assert!(h.network.wait_for_calls("discover_readers", 1).await);
    let events = drain(&mut session).await;

    match events.last() {
        Some(DiscoveryEvent::Failed(err)) => assert_eq!(err.to_string(), "Bluetooth unavailable"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(!h.terminal.is_discovering());
    assert_eq!(h.native.call_count("cancel_discover_readers"), 0);
    assert_eq!(h.network.call_count("cancel_discover_readers"), 0);

    let (added_after, removed_after) = listener_totals(&h);
    assert_eq!(added_after - added_before, removed_after - removed_before);

    h.network.release("discover_readers", Ok(()));
}
