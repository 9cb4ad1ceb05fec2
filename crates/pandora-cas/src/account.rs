//! Account composition root.
//!
//! One `Account` per credential pair.  Start sequence: login → first
//! snapshot → open stream → start poller.  `close` cancels the tasks,
//! drains outstanding commands with `cancelled`, and releases listeners,
//! in that order.

use crate::auth::{AuthError, Authenticator, Session};
use crate::command::{self, CommandError, CommandOutcome, Commander, PendingCommands};
use crate::config::AccountConfig;
use crate::events::EventBus;
use crate::http::{DEFAULT_TIMEOUT, HttpClient, HttpError};
use crate::model::{Device, DeviceRegistry, DeviceView};
use crate::poller::{self, PollHandle};
use crate::stream;
use pandora_protocol::CommandId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

// ---------------------------------------------------------------------------
// Status observable
// ---------------------------------------------------------------------------

/// User-visible account health, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStatus {
    Ok,
    /// A start-sequence step failed with the attached classified cause;
    /// the Account never reached streaming.
    Errored { cause: String },
    /// Still running, but snapshot polls keep failing.
    Degraded { reason: String },
    /// Credentials are no longer accepted; terminal.
    AuthFailure,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
    #[error("http: {0}")]
    Http(#[from] HttpError),
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared by the Account's tasks: the stream reader, the poller, and
/// the commander all hold an `Arc<Shared>`.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: AccountConfig,
    pub(crate) http: HttpClient,
    pub(crate) auth: Authenticator,
    pub(crate) registry: DeviceRegistry,
    pub(crate) events: EventBus,
    pub(crate) pending: PendingCommands,
    pub(crate) poll: PollHandle,
    status_tx: watch::Sender<AccountStatus>,
    /// Newest snapshot timestamp seen; -1 requests a full first snapshot.
    last_ts: AtomicI64,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: AccountConfig) -> Result<Arc<Self>, HttpError> {
        let http = HttpClient::new(&config.base_url, &config.user_agent, DEFAULT_TIMEOUT)?;
        let auth = Authenticator::new(
            http.clone(),
            config.username.clone(),
            config.password.clone(),
        );
        let (status_tx, _) = watch::channel(AccountStatus::Ok);
        Ok(Arc::new(Shared {
            config,
            http,
            auth,
            registry: DeviceRegistry::new(),
            events: EventBus::new(),
            pending: PendingCommands::new(),
            poll: PollHandle::new(),
            status_tx,
            last_ts: AtomicI64::new(-1),
            closed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn set_status(&self, status: AccountStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    pub(crate) fn status_rx(&self) -> watch::Receiver<AccountStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn last_ts(&self) -> i64 {
        self.last_ts.load(Ordering::Acquire)
    }

    /// Record a snapshot timestamp; never moves backwards.
    pub(crate) fn store_last_ts(&self, ts: i64) {
        self.last_ts.fetch_max(ts, Ordering::AcqRel);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) -> bool {
        self.closed.swap(true, Ordering::AcqRel)
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Account {
    shared: Arc<Shared>,
    commander: Commander,
    shutdown_tx: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Account {
    /// Authenticate, fetch the first snapshot, and spawn the stream and
    /// poller tasks.
    ///
    /// A step failure publishes `Errored` with the classified cause on the
    /// status channel before the error is returned.
    pub async fn start(config: AccountConfig) -> Result<Account, AccountError> {
        let shared = Shared::new(config)?;
        Account::start_on(shared).await
    }

    /// Start against pre-built shared state; holders of a status receiver
    /// from that state observe the `Errored` publication on failure.
    pub(crate) async fn start_on(shared: Arc<Shared>) -> Result<Account, AccountError> {
        if let Err(e) = shared.auth.login().await {
            return Err(Account::errored(&shared, e.into()));
        }
        if let Err(e) = poller::poll_once(&shared).await {
            return Err(Account::errored(&shared, e.into()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stream_task = tokio::spawn(stream::run_stream_loop(
            shared.clone(),
            shutdown_rx.clone(),
        ));
        let poller_task = tokio::spawn(poller::run_poller_loop(shared.clone(), shutdown_rx));

        info!(
            user = %shared.config.username,
            devices = shared.registry.device_ids().len(),
            "account started"
        );
        Ok(Account {
            commander: Commander::new(shared.clone()),
            shared,
            shutdown_tx,
            tasks: std::sync::Mutex::new(vec![stream_task, poller_task]),
        })
    }

    fn errored(shared: &Shared, error: AccountError) -> AccountError {
        shared.set_status(AccountStatus::Errored {
            cause: error.to_string(),
        });
        error
    }

    /// The account health observable.
    pub fn status(&self) -> watch::Receiver<AccountStatus> {
        self.shared.status_rx()
    }

    /// The `pandora_cas_event` / `pandora_cas_command` topics.
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.auth.session()
    }

    pub fn device(&self, device_id: u64) -> Option<Arc<Device>> {
        self.shared.registry.get(device_id)
    }

    pub fn device_ids(&self) -> Vec<u64> {
        self.shared.registry.device_ids()
    }

    /// Current views of every known device.
    pub fn device_views(&self) -> Vec<Arc<DeviceView>> {
        self.shared.registry.views()
    }

    /// Submit a command; see [`Commander::submit`].
    pub async fn execute(
        &self,
        device_id: u64,
        command: CommandId,
        ensure_complete: bool,
    ) -> Result<CommandOutcome, CommandError> {
        self.commander.submit(device_id, command, ensure_complete).await
    }

    /// Shut the Account down.  Idempotent.
    pub async fn close(&self) {
        if self.shared.mark_closed() {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
        command::drain_cancelled(&self.shared);
        self.shared.registry.close_all();
        self.shared.set_status(AccountStatus::Closed);
        info!(user = %self.shared.config.username, "account closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<Shared> {
        Shared::new(AccountConfig::new("u", "p")).expect("shared")
    }

    #[test]
    fn last_ts_never_moves_backwards() {
        let s = shared();
        assert_eq!(s.last_ts(), -1);
        s.store_last_ts(100);
        s.store_last_ts(50);
        assert_eq!(s.last_ts(), 100);
    }

    #[test]
    fn status_updates_are_deduplicated() {
        let s = shared();
        let mut rx = s.status_rx();
        assert_eq!(*rx.borrow_and_update(), AccountStatus::Ok);
        s.set_status(AccountStatus::Ok);
        assert!(!rx.has_changed().unwrap(), "same status must not re-notify");
        s.set_status(AccountStatus::Degraded {
            reason: "poll failures".to_owned(),
        });
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn start_failure_publishes_errored_status() {
        let mut config = AccountConfig::new("u", "p");
        // Nothing listens on the discard port, so login fails fast.
        config.base_url = "http://127.0.0.1:9".to_owned();
        let shared = Shared::new(config).expect("shared");
        let status = shared.status_rx();

        let err = Account::start_on(shared).await.expect_err("must fail");
        match &*status.borrow() {
            AccountStatus::Errored { cause } => assert_eq!(cause, &err.to_string()),
            other => panic!("expected Errored, got {other:?}"),
        }
    }

    #[test]
    fn close_flag_flips_once() {
        let s = shared();
        assert!(!s.is_closed());
        assert!(!s.mark_closed());
        assert!(s.mark_closed(), "second close must observe the first");
        assert!(s.is_closed());
    }
}
