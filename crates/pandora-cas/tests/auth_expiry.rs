/// Tests for session expiry handling on the stream.
use pandora_cas::{Account, AccountConfig};
use pandora_test_utils::MockCloud;
use serde_json::json;

fn config(mock: &MockCloud) -> AccountConfig {
    let mut cfg = AccountConfig::new("driver@example.com", "hunter2");
    cfg.base_url = mock.base_url();
    cfg
}

/// Test: the stream closes with the auth-expired code; the client refreshes
/// exactly once and redials immediately.
#[tokio::test]
async fn auth_expiry_mid_stream_refreshes_once() {
    let _ = tracing_subscriber::fmt::try_init();
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    mock.set_devices(json!({
        "1234": {"id": 1234, "name": "Family car", "model": "DXL 4970", "fuel": 40}
    }));

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;
    assert_eq!(mock.login_count(), 1);

    // The server invalidates the session and closes with the expiry code.
    mock.expire_sessions();
    assert!(mock.force_close_ws(4001));

    // Refresh happens once, then the stream comes back without backoff.
    mock.wait_for_ws_connects(2).await;
    assert_eq!(mock.login_count(), 2, "exactly one refresh login");

    let session = account.session().expect("session");
    assert_eq!(session.session_id, "sid-1", "session must be the refreshed one");

    account.close().await;
}

/// Test: an expired session surfacing as a 401 on the WebSocket dial also
/// triggers a refresh.
#[tokio::test]
async fn auth_expiry_on_dial_refreshes() {
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    mock.set_devices(json!({
        "1234": {"id": 1234, "name": "Family car", "model": "DXL 4970"}
    }));

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;

    // Invalidate the session, then force a plain close: the redial gets a
    // 401 on the upgrade and must refresh before the next attempt.
    mock.expire_sessions();
    assert!(mock.force_close_ws(1000));

    mock.wait_for_ws_connects(2).await;
    assert_eq!(mock.login_count(), 2);

    account.close().await;
}
