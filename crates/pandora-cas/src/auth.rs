//! Login and session refresh.
//!
//! The upstream session is cookie-based and expires silently; expiry shows
//! up as an HTTP 401, a sentinel body marker, or a WebSocket close with
//! [`AUTH_EXPIRED_CLOSE_CODE`].  `refresh` is single-flight: concurrent
//! callers wait on the same in-flight login instead of stacking duplicate
//! credential posts.

use crate::http::{HttpClient, HttpError};
use pandora_protocol::LoginResponse;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{info, warn};

/// WebSocket close code the cloud uses for an expired session.
pub const AUTH_EXPIRED_CLOSE_CODE: u16 = 4001;

/// Consecutive `BadCredentials` refresh failures before the Account is
/// considered terminally unauthenticated.
pub const MAX_BAD_CREDENTIAL_REFRESHES: u32 = 3;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Credential state for one authenticated cloud session.
///
/// The cookies themselves live in the transport's jar; this records the
/// server-assigned identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: u64,
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("bad credentials")]
    BadCredentials,
    #[error("captcha required")]
    CaptchaRequired,
    #[error("account locked")]
    AccountLocked,
    #[error("upstream unavailable (HTTP {0})")]
    UpstreamUnavailable(u16),
    #[error("http: {0}")]
    Http(#[from] HttpError),
}

// ---------------------------------------------------------------------------
// Expiry recognition
// ---------------------------------------------------------------------------

/// Recognise session expiry from an HTTP probe response.
pub fn response_indicates_expiry(status: u16, body: &str) -> bool {
    status == 401 || body.contains("sid_expired") || body.contains("Session expired")
}

/// Recognise session expiry from a WebSocket close code.
pub fn close_code_indicates_expiry(code: u16) -> bool {
    code == AUTH_EXPIRED_CLOSE_CODE
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Authenticator {
    http: HttpClient,
    username: String,
    password: String,
    session: RwLock<Option<Session>>,
    refresh_gate: tokio::sync::Mutex<()>,
    /// Bumped on every successful login; lets refresh waiters detect that
    /// the refresh they queued behind already did the work.
    generation: AtomicU64,
    bad_credential_streak: AtomicU32,
}

impl Authenticator {
    pub fn new(http: HttpClient, username: String, password: String) -> Self {
        Authenticator {
            http,
            username,
            password,
            session: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            bad_credential_streak: AtomicU32::new(0),
        }
    }

    /// The current session, if one has been established.
    pub fn session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    /// Consecutive refresh failures with `BadCredentials`.
    pub fn bad_credential_streak(&self) -> u32 {
        self.bad_credential_streak.load(Ordering::Acquire)
    }

    /// Exchange the credentials for a session cookie.
    ///
    /// The cookie lands in the shared jar; the returned `Session` records
    /// the issued identifiers.
    pub async fn login(&self) -> Result<Session, AuthError> {
        let resp: Result<LoginResponse, HttpError> = self
            .http
            .post_form_json(
                "/api/users/login",
                &[
                    ("login", self.username.clone()),
                    ("password", self.password.clone()),
                ],
            )
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(HttpError::Status(code @ (401 | 403))) => {
                warn!(code, "login rejected");
                return Err(AuthError::BadCredentials);
            }
            Err(HttpError::Status(code)) if code >= 500 || code == 429 => {
                return Err(AuthError::UpstreamUnavailable(code));
            }
            Err(e) => return Err(e.into()),
        };

        if resp.status != "success" {
            return Err(classify_login_failure(resp.error.as_deref()));
        }

        let session = Session {
            user_id: resp.user_id,
            session_id: resp.session_id,
        };
        if let Ok(mut slot) = self.session.write() {
            *slot = Some(session.clone());
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.bad_credential_streak.store(0, Ordering::Release);
        info!(user_id = session.user_id, session_id = %session.session_id, "session established");
        Ok(session)
    }

    /// Re-establish the session after an expiry signal.
    ///
    /// Single-flight: at most one login is in flight per Account.  Callers
    /// that queued behind an in-flight refresh return as soon as it lands,
    /// without issuing their own.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let seen = self.generation.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            // Someone else refreshed while we waited on the gate.
            return Ok(());
        }
        match self.login().await {
            Ok(_) => Ok(()),
            Err(AuthError::BadCredentials) => {
                let streak = self.bad_credential_streak.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(streak, "refresh failed with bad credentials");
                Err(AuthError::BadCredentials)
            }
            Err(e) => Err(e),
        }
    }
}

fn classify_login_failure(error: Option<&str>) -> AuthError {
    match error {
        Some(e) if e.contains("captcha") => AuthError::CaptchaRequired,
        Some(e) if e.contains("locked") || e.contains("blocked") => AuthError::AccountLocked,
        _ => AuthError::BadCredentials,
    }
}
