//! Periodic snapshot polling.
//!
//! The stream is lossy across reconnects; the poller repairs missed deltas
//! by fetching the HTTP `updates` snapshot on a fixed cadence, plus a
//! one-shot poll shortly after every successful command.  Polls never
//! overlap: a refresh requested while one is inflight is dropped, since the
//! inflight request will deliver fresher data anyway.

use crate::account::{AccountStatus, Shared};
use crate::http::HttpError;
use pandora_protocol::UpdatesResponse;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{debug, warn};

/// Consecutive poll failures before the Account reports `degraded`.
pub const DEGRADED_THRESHOLD: u32 = 10;

// ---------------------------------------------------------------------------
// PollHandle
// ---------------------------------------------------------------------------

/// Handle for requesting out-of-cadence refreshes.
#[derive(Debug, Clone)]
pub(crate) struct PollHandle {
    trigger: Arc<Notify>,
    inflight: Arc<AtomicBool>,
}

impl PollHandle {
    pub(crate) fn new() -> Self {
        PollHandle {
            trigger: Arc::new(Notify::new()),
            inflight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask for a refresh now.  Dropped if a poll is already inflight.
    pub(crate) fn request_refresh(&self) {
        if self.inflight.load(Ordering::Acquire) {
            debug!("refresh request dropped, poll already inflight");
            return;
        }
        self.trigger.notify_one();
    }

    /// Ask for a refresh after `delay` (post-command observation).
    pub(crate) fn request_refresh_after(&self, delay: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.request_refresh();
        });
    }
}

// ---------------------------------------------------------------------------
// Poll execution
// ---------------------------------------------------------------------------

/// One snapshot fetch, applied to the device model.
pub(crate) async fn poll_once(shared: &Shared) -> Result<(), HttpError> {
    let ts = shared.last_ts();
    let resp: UpdatesResponse = shared
        .http
        .get_json("/api/updates", &[("ts", ts.to_string())])
        .await?;
    apply_updates(shared, &resp);
    Ok(())
}

pub(crate) fn apply_updates(shared: &Shared, resp: &UpdatesResponse) {
    for record in resp.devices.values() {
        let device = shared.registry.get_or_create(record.id);
        let changed = device.apply_snapshot(record, resp.ts);
        if !changed.is_empty() {
            debug!(device_id = record.id, ?changed, "snapshot applied");
        }
    }
    shared.store_last_ts(resp.ts);
}

/// Poll cadence task.  Runs until shutdown; one poll at a time.
pub(crate) async fn run_poller_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let period = shared.config.polling_interval;
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {}
            _ = shared.poll.trigger.notified() => {}
        }

        shared.poll.inflight.store(true, Ordering::Release);
        let result = poll_once(&shared).await;
        shared.poll.inflight.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                if consecutive_failures >= DEGRADED_THRESHOLD {
                    shared.set_status(AccountStatus::Ok);
                }
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(error = %e, consecutive_failures, "snapshot poll failed");
                if e.is_auth_expired() {
                    // The refresh is single-flight; a concurrent stream
                    // refresh makes this a no-op wait.
                    if let Err(e) = shared.auth.refresh().await {
                        warn!(error = %e, "session refresh after poll 401 failed");
                    }
                }
                if consecutive_failures == DEGRADED_THRESHOLD {
                    shared.set_status(AccountStatus::Degraded {
                        reason: format!("{DEGRADED_THRESHOLD} consecutive poll failures"),
                    });
                }
            }
        }
    }
}
