/// Tests for stream reconnection and post-reconnect resynchronisation.
use pandora_cas::{Account, AccountConfig, DeviceNotification};
use pandora_test_utils::MockCloud;
use serde_json::json;
use std::time::Duration;

fn config(mock: &MockCloud) -> AccountConfig {
    let mut cfg = AccountConfig::new("driver@example.com", "hunter2");
    cfg.base_url = mock.base_url();
    cfg
}

/// Test: a force-closed stream reconnects and the fresh `initial-state`
/// replaces stale fields, visible to subscribers with a `changed` set.
#[tokio::test]
async fn reconnect_resyncs_from_initial_state() {
    let _ = tracing_subscriber::fmt::try_init();
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    mock.set_devices(json!({
        "1234": {"id": 1234, "name": "Family car", "model": "DXL 4970", "fuel": 40}
    }));

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;

    let device = account.device(1234).expect("device");
    assert_eq!(device.snapshot().telemetry.fuel, Some(40));
    let (_handle, mut sub) = device.subscribe();

    // The state changes while the stream is down.
    mock.update_device(1234, json!({"fuel": 55}));
    assert!(mock.force_close_ws(1000));

    mock.wait_for_ws_connects(2).await;

    // The reconnected stream must lead with a snapshot carrying fuel 55.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let n = tokio::time::timeout_at(deadline, sub.recv())
            .await
            .expect("update within 15s")
            .expect("subscription open");
        if let DeviceNotification::Updated { view, changed } = n {
            if changed.contains(&"fuel") {
                assert_eq!(view.telemetry.fuel, Some(55));
                break;
            }
        }
    }

    account.close().await;
}

/// Test: several forced closes in a row; the client keeps coming back.
#[tokio::test]
async fn repeated_closes_keep_reconnecting() {
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    mock.set_devices(json!({
        "1234": {"id": 1234, "name": "Family car", "model": "DXL 4970"}
    }));

    let account = Account::start(config(&mock)).await.expect("start");

    for round in 1..=3usize {
        mock.wait_for_ws_connects(round).await;
        mock.wait_for_ws().await;
        assert!(mock.force_close_ws(1000), "round {round}");
    }
    mock.wait_for_ws_connects(4).await;

    account.close().await;
}
