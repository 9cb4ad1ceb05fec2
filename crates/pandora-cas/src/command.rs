//! Command submission and reply correlation.
//!
//! Submission is an HTTP POST; completion arrives asynchronously as a
//! `command` frame on the stream.  The two meet in the pending table, keyed
//! by `(device_id, command_id)`.  Completion and timeout race by
//! compare-and-remove on that table, so exactly one of them terminates each
//! command.
//!
//! The upstream rejects overlapping commands for one unit, so submissions
//! are serialised per device: the per-device lock is held from the POST
//! until the reply, timeout, or cancellation, including for fire-and-forget
//! submissions.

use crate::account::Shared;
use crate::events::CommandEvent;
use crate::http::HttpError;
use chrono::Utc;
use pandora_protocol::{CommandId, CommandReply, CommandResponse};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Delay before the one-shot snapshot poll that follows a successful
/// submission, to observe the resulting state change even if the stream
/// misses it.
pub const POST_COMMAND_POLL_DELAY: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Outcome and error types
// ---------------------------------------------------------------------------

/// Terminal state of one submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Accepted.  For fire-and-forget submissions this means the HTTP POST
    /// was accepted; with `ensure_complete` it means the unit replied 0.
    Ok,
    /// The unit (or the submission endpoint) rejected the command.
    Failure(i32),
    /// No reply frame arrived before the deadline.
    Timeout,
    /// The Account closed while the command was outstanding.
    Cancelled,
}

impl CommandOutcome {
    /// Code carried on the command topic: 0 is success, vendor codes are
    /// positive, client-side terminations are negative.
    pub fn result_code(self) -> i32 {
        match self {
            CommandOutcome::Ok => 0,
            CommandOutcome::Failure(code) => code,
            CommandOutcome::Timeout => -1,
            CommandOutcome::Cancelled => -2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("http: {0}")]
    Http(#[from] HttpError),
    #[error("account closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Pending table
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct PendingEntry {
    /// Present only for `ensure_complete` submissions.
    pub(crate) tx: Option<oneshot::Sender<CommandOutcome>>,
    /// Holding this keeps the device serialised until the command
    /// terminates.
    pub(crate) _device_guard: tokio::sync::OwnedMutexGuard<()>,
}

/// Outstanding commands, shared between the submitter and the stream's
/// completer.  The mutex is held only around lookup/insert/remove.
#[derive(Debug, Default)]
pub(crate) struct PendingCommands {
    inner: Mutex<HashMap<(u64, u16), PendingEntry>>,
}

impl PendingCommands {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn insert(&self, device_id: u64, command_id: u16, entry: PendingEntry) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert((device_id, command_id), entry);
        }
    }

    fn remove(&self, device_id: u64, command_id: u16) -> Option<PendingEntry> {
        self.inner
            .lock()
            .ok()
            .and_then(|mut map| map.remove(&(device_id, command_id)))
    }

    fn keys(&self) -> Vec<(u64, u16)> {
        self.inner
            .lock()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// Terminate a pending command.  Returns false when the key was already
/// gone (the other side of the completion/timeout race won).
pub(crate) fn complete_pending(
    shared: &Shared,
    device_id: u64,
    command_id: u16,
    outcome: CommandOutcome,
    reply: Option<i32>,
) -> bool {
    let Some(entry) = shared.pending.remove(device_id, command_id) else {
        return false;
    };
    if let Some(tx) = entry.tx {
        let _ = tx.send(outcome);
    }
    let result = outcome.result_code();
    shared.events.publish_command(CommandEvent {
        device_id,
        command_id: CommandId(command_id),
        result,
        reply,
    });
    if let Some(device) = shared.registry.get(device_id) {
        device.record_command_result(CommandId(command_id), result, Utc::now().timestamp());
    }
    true
}

/// Route a `command` frame from the stream to its pending entry.
pub(crate) fn handle_reply(shared: &Shared, reply: &CommandReply) {
    let outcome = if reply.result == 0 {
        CommandOutcome::Ok
    } else {
        CommandOutcome::Failure(reply.result)
    };
    if complete_pending(
        shared,
        reply.device_id,
        reply.command_id,
        outcome,
        reply.reply,
    ) {
        debug!(
            device_id = reply.device_id,
            command_id = reply.command_id,
            result = reply.result,
            "command reply matched"
        );
    } else {
        debug!(
            device_id = reply.device_id,
            command_id = reply.command_id,
            "unmatched command reply (already timed out or not ours)"
        );
    }
}

/// Cancel everything outstanding (Account close).
pub(crate) fn drain_cancelled(shared: &Shared) {
    for (device_id, command_id) in shared.pending.keys() {
        complete_pending(shared, device_id, command_id, CommandOutcome::Cancelled, None);
    }
}

// ---------------------------------------------------------------------------
// Commander
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Commander {
    shared: Arc<Shared>,
    device_locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Commander {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Commander {
            shared,
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    fn device_lock(&self, device_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .device_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.entry(device_id).or_default().clone()
    }

    /// Submit a command to one device.
    ///
    /// With `ensure_complete` the returned future resolves only once the
    /// reply frame arrives (or the deadline passes); otherwise HTTP
    /// acceptance alone resolves it and the eventual reply only fires the
    /// command topic.
    pub async fn submit(
        &self,
        device_id: u64,
        command: CommandId,
        ensure_complete: bool,
    ) -> Result<CommandOutcome, CommandError> {
        if self.shared.is_closed() {
            return Err(CommandError::Closed);
        }
        // One outstanding command per device: a second submit parks here
        // until the first terminates.
        let guard = self.device_lock(device_id).lock_owned().await;
        if self.shared.is_closed() {
            return Err(CommandError::Closed);
        }

        info!(device_id, command = %command, "submitting command");
        let resp: CommandResponse = self
            .shared
            .http
            .post_form_json(
                "/api/devices/command",
                &[
                    ("id", device_id.to_string()),
                    ("command", command.0.to_string()),
                ],
            )
            .await?;

        if !resp.is_success() {
            let code = resp.failure_code();
            warn!(device_id, command = %command, code, "command rejected at submission");
            self.shared.events.publish_command(CommandEvent {
                device_id,
                command_id: command,
                result: code,
                reply: None,
            });
            return Ok(CommandOutcome::Failure(code));
        }

        let (tx, rx) = if ensure_complete {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        self.shared.pending.insert(
            device_id,
            command.0,
            PendingEntry {
                tx,
                _device_guard: guard,
            },
        );
        self.shared.poll.request_refresh_after(POST_COMMAND_POLL_DELAY);

        // Deadline: whichever of reply and timeout removes the entry first
        // terminates the command.
        let deadline_shared = self.shared.clone();
        let deadline = self.shared.config.command_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if complete_pending(
                &deadline_shared,
                device_id,
                command.0,
                CommandOutcome::Timeout,
                None,
            ) {
                warn!(device_id, command_id = command.0, "command timed out");
            }
        });

        match rx {
            Some(rx) => rx.await.map_err(|_| CommandError::Closed),
            None => Ok(CommandOutcome::Ok),
        }
    }
}
