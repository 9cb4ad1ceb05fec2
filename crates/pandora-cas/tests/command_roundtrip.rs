/// Tests for command submission, reply correlation, timeout, and
/// per-device serialization.
use pandora_cas::protocol::CommandId;
use pandora_cas::{Account, AccountConfig, CommandOutcome};
use pandora_test_utils::MockCloud;
use serde_json::json;
use std::time::Duration;

fn config(mock: &MockCloud) -> AccountConfig {
    let mut cfg = AccountConfig::new("driver@example.com", "hunter2");
    cfg.base_url = mock.base_url();
    cfg.command_timeout = Duration::from_millis(500);
    cfg
}

fn seed_device(mock: &MockCloud) {
    mock.set_devices(json!({
        "1234": {"id": 1234, "name": "Family car", "model": "DXL 4970"}
    }));
}

/// Test: submit start_engine, reply arrives with result 0, future resolves
/// ok and the command topic fires.
#[tokio::test]
async fn command_round_trip_resolves_ok() {
    let _ = tracing_subscriber::fmt::try_init();
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    seed_device(&mock);
    mock.set_command_reply_result(0);

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;
    let mut commands = account.events().subscribe_commands();

    let outcome = account
        .execute(1234, CommandId::START_ENGINE, true)
        .await
        .expect("submit");
    assert_eq!(outcome, CommandOutcome::Ok);
    assert_eq!(mock.command_log(), vec![(1234, 4)]);

    let event = tokio::time::timeout(Duration::from_secs(5), commands.recv())
        .await
        .expect("command event within 5s")
        .expect("topic open");
    assert_eq!(event.device_id, 1234);
    assert_eq!(event.command_id, CommandId::START_ENGINE);
    assert_eq!(event.result, 0);

    account.close().await;
}

/// Test: a reply with a non-zero result resolves as failure with the
/// vendor code.
#[tokio::test]
async fn rejected_reply_resolves_failure() {
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    seed_device(&mock);
    mock.set_command_reply_result(2);

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;

    let outcome = account
        .execute(1234, CommandId::STOP_ENGINE, true)
        .await
        .expect("submit");
    assert_eq!(outcome, CommandOutcome::Failure(2));

    account.close().await;
}

/// Test: no reply within the deadline resolves timeout, and the command
/// topic fires with a non-zero result.
#[tokio::test]
async fn missing_reply_times_out() {
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    seed_device(&mock);
    // No auto-reply configured: the command is accepted but never answered.

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;
    let mut commands = account.events().subscribe_commands();

    let outcome = account
        .execute(1234, CommandId::CHECK, true)
        .await
        .expect("submit");
    assert_eq!(outcome, CommandOutcome::Timeout);

    let event = tokio::time::timeout(Duration::from_secs(5), commands.recv())
        .await
        .expect("command event within 5s")
        .expect("topic open");
    assert_ne!(event.result, 0, "timeout must publish a non-zero result");

    account.close().await;
}

/// Test: fire-and-forget resolves on HTTP acceptance; the later reply
/// still fires the command topic.
#[tokio::test]
async fn fire_and_forget_resolves_on_http_accept() {
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    seed_device(&mock);
    mock.set_command_reply_result(0);

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;
    let mut commands = account.events().subscribe_commands();

    let started = std::time::Instant::now();
    let outcome = account
        .execute(1234, CommandId::LOCK, false)
        .await
        .expect("submit");
    assert_eq!(outcome, CommandOutcome::Ok);
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "fire-and-forget must not wait for the reply"
    );

    let event = tokio::time::timeout(Duration::from_secs(5), commands.recv())
        .await
        .expect("command event within 5s")
        .expect("topic open");
    assert_eq!(event.result, 0);

    account.close().await;
}

/// Test: an HTTP-level rejection resolves failure without a pending entry.
#[tokio::test]
async fn submission_rejection_resolves_failure() {
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    seed_device(&mock);
    mock.set_command_response(json!({"status": "fail", "action_result": {"code": 9}}));

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;

    let outcome = account
        .execute(1234, CommandId::UNLOCK, true)
        .await
        .expect("submit");
    assert_eq!(outcome, CommandOutcome::Failure(9));

    account.close().await;
}

/// Test: commands for one device are serialised; the second submission
/// waits for the first to terminate.
#[tokio::test]
async fn second_command_waits_for_first() {
    let mock = MockCloud::start("driver@example.com", "hunter2").await.unwrap();
    seed_device(&mock);
    // No replies: each command terminates by its 500 ms deadline.

    let account = Account::start(config(&mock)).await.expect("start");
    mock.wait_for_ws().await;

    let started = std::time::Instant::now();
    let (first, second) = tokio::join!(
        account.execute(1234, CommandId::LOCK, true),
        account.execute(1234, CommandId::UNLOCK, true),
    );
    assert_eq!(first.expect("first"), CommandOutcome::Timeout);
    assert_eq!(second.expect("second"), CommandOutcome::Timeout);
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "second command must queue behind the first's deadline"
    );
    assert_eq!(mock.command_log().len(), 2);

    account.close().await;
}
