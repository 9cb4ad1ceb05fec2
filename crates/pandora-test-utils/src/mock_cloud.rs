//! Scriptable mock of the Pandora cloud.
//!
//! Serves the four upstream surfaces on one ephemeral listener:
//! - `POST /api/users/login` validates credentials and sets the `sid` cookie
//! - `GET  /api/updates` returns the configured snapshot, 401 once expired
//! - `POST /api/devices/command` records submissions, optional auto-reply
//! - `GET  /api/v4/updates` is the WebSocket; it replies to `subscribe` with
//!   an `initial-state` frame, and takes scripted frames / forced closes
//!
//! Tests drive it through the control methods on [`MockCloud`].

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use pandora_protocol::LoginResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Delay before a scripted command reply frame, so the submitter has
/// installed its pending entry before the reply races in.
const COMMAND_REPLY_DELAY: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

enum WsControl {
    Frame(Value),
    Close(u16),
}

struct CloudState {
    username: String,
    password: String,
    user_id: u64,
    login_count: AtomicUsize,
    poll_count: AtomicUsize,
    ws_connect_count: AtomicUsize,
    next_sid: AtomicUsize,
    /// Valid session cookies; cleared by `expire_sessions`.
    sessions: Mutex<HashSet<String>>,
    /// Device map for snapshots, keyed by device id string.
    devices: Mutex<Value>,
    /// Monotonic server timestamp, bumped per snapshot.
    ts: AtomicI64,
    command_log: Mutex<Vec<(u64, u16)>>,
    command_response: Mutex<Value>,
    /// When set, every accepted command POST is followed by a `command`
    /// frame on the WebSocket with this result code.
    command_reply_result: Mutex<Option<i32>>,
    auto_initial_state: AtomicBool,
    ws_control: Mutex<Option<mpsc::UnboundedSender<WsControl>>>,
}

impl CloudState {
    fn cookie_valid(&self, headers: &HeaderMap) -> bool {
        let Some(cookie) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some(sid) = cookie
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("sid="))
        else {
            return false;
        };
        self.sessions
            .lock()
            .map(|s| s.contains(sid))
            .unwrap_or(false)
    }

    fn next_ts(&self) -> i64 {
        self.ts.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn device_list(&self) -> Vec<Value> {
        let devices = self.devices.lock().expect("devices lock");
        devices
            .as_object()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn initial_state_frame(&self) -> Value {
        json!({
            "type": "initial-state",
            "data": {
                "ts": self.next_ts(),
                "devices": self.device_list(),
            }
        })
    }

    fn push_ws(&self, control: WsControl) -> bool {
        let guard = self.ws_control.lock().expect("ws control lock");
        match guard.as_ref() {
            Some(tx) => tx.send(control).is_ok(),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// MockCloud
// ---------------------------------------------------------------------------

pub struct MockCloud {
    addr: SocketAddr,
    state: Arc<CloudState>,
}

impl MockCloud {
    /// Start a mock accepting the given credentials.
    pub async fn start(
        username: &str,
        password: &str,
    ) -> Result<MockCloud, Box<dyn std::error::Error>> {
        let state = Arc::new(CloudState {
            username: username.to_owned(),
            password: password.to_owned(),
            user_id: 77,
            login_count: AtomicUsize::new(0),
            poll_count: AtomicUsize::new(0),
            ws_connect_count: AtomicUsize::new(0),
            next_sid: AtomicUsize::new(0),
            sessions: Mutex::new(HashSet::new()),
            devices: Mutex::new(json!({})),
            ts: AtomicI64::new(1000),
            command_log: Mutex::new(Vec::new()),
            command_response: Mutex::new(json!({"status": "success", "action_result": {}})),
            command_reply_result: Mutex::new(None),
            auto_initial_state: AtomicBool::new(true),
            ws_control: Mutex::new(None),
        });

        let app = Router::new()
            .route("/api/users/login", post(login))
            .route("/api/updates", get(updates))
            .route("/api/devices/command", post(device_command))
            .route("/api/v4/updates", get(ws_updates))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(MockCloud { addr, state })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for the client config.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Replace the whole device map (object keyed by device id string).
    pub fn set_devices(&self, devices: Value) {
        *self.state.devices.lock().expect("devices lock") = devices;
    }

    /// Merge fields into one device's snapshot record.
    pub fn update_device(&self, device_id: u64, fields: Value) {
        let mut devices = self.state.devices.lock().expect("devices lock");
        let key = device_id.to_string();
        let entry = devices
            .as_object_mut()
            .expect("devices must be an object")
            .entry(key)
            .or_insert_with(|| json!({"id": device_id}));
        if let (Some(target), Some(source)) = (entry.as_object_mut(), fields.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
    }

    /// Body returned by `POST /api/devices/command`.
    pub fn set_command_response(&self, body: Value) {
        *self.state.command_response.lock().expect("response lock") = body;
    }

    /// Auto-push a `command` reply frame (with this result) after every
    /// accepted command POST.
    pub fn set_command_reply_result(&self, result: i32) {
        *self.state.command_reply_result.lock().expect("reply lock") = Some(result);
    }

    /// Stop auto-replying to commands (timeout scenarios).
    pub fn clear_command_reply(&self) {
        *self.state.command_reply_result.lock().expect("reply lock") = None;
    }

    /// Push a raw frame onto the current WebSocket connection.
    pub fn push_frame(&self, frame: Value) -> bool {
        self.state.push_ws(WsControl::Frame(frame))
    }

    /// Close the current WebSocket connection with the given close code.
    pub fn force_close_ws(&self, code: u16) -> bool {
        self.state.push_ws(WsControl::Close(code))
    }

    /// Invalidate every issued session; subsequent polls and dials get 401
    /// until the client logs in again.
    pub fn expire_sessions(&self) {
        self.state.sessions.lock().expect("sessions lock").clear();
    }

    /// Control whether a `subscribe` request is answered with an
    /// `initial-state` frame (on by default).
    pub fn set_auto_initial_state(&self, enabled: bool) {
        self.state
            .auto_initial_state
            .store(enabled, Ordering::SeqCst);
    }

    pub fn login_count(&self) -> usize {
        self.state.login_count.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.state.poll_count.load(Ordering::SeqCst)
    }

    pub fn ws_connect_count(&self) -> usize {
        self.state.ws_connect_count.load(Ordering::SeqCst)
    }

    pub fn command_log(&self) -> Vec<(u64, u16)> {
        self.state.command_log.lock().expect("log lock").clone()
    }

    /// Wait until a WebSocket connection is registered (with a timeout so a
    /// broken test fails instead of hanging).
    pub async fn wait_for_ws(&self) {
        for _ in 0..500 {
            if self
                .state
                .ws_control
                .lock()
                .expect("ws control lock")
                .is_some()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no WebSocket connection within 5s");
    }

    /// Wait until at least `n` WebSocket connections have been accepted.
    pub async fn wait_for_ws_connects(&self, n: usize) {
        for _ in 0..1500 {
            if self.ws_connect_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fewer than {n} WebSocket connects within 15s");
    }
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LoginForm {
    login: String,
    password: String,
}

async fn login(
    State(state): State<Arc<CloudState>>,
    Form(form): Form<LoginForm>,
) -> Response {
    state.login_count.fetch_add(1, Ordering::SeqCst);
    if form.login != state.username || form.password != state.password {
        return axum::Json(json!({"status": "fail", "error": "invalid_credentials"}))
            .into_response();
    }
    let sid = format!("sid-{}", state.next_sid.fetch_add(1, Ordering::SeqCst));
    state
        .sessions
        .lock()
        .expect("sessions lock")
        .insert(sid.clone());
    debug!(%sid, "mock login");
    let body = LoginResponse {
        status: "success".to_owned(),
        user_id: state.user_id,
        session_id: sid.clone(),
        error: None,
    };
    (
        [(header::SET_COOKIE, format!("sid={sid}; Path=/"))],
        axum::Json(body),
    )
        .into_response()
}

async fn updates(State(state): State<Arc<CloudState>>, headers: HeaderMap) -> Response {
    if !state.cookie_valid(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.poll_count.fetch_add(1, Ordering::SeqCst);
    let devices = state.devices.lock().expect("devices lock").clone();
    axum::Json(json!({
        "ts": state.next_ts(),
        "devices": devices,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct CommandForm {
    id: u64,
    command: u16,
}

async fn device_command(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Form(form): Form<CommandForm>,
) -> Response {
    if !state.cookie_valid(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state
        .command_log
        .lock()
        .expect("log lock")
        .push((form.id, form.command));

    let body = state.command_response.lock().expect("response lock").clone();
    let reply = *state.command_reply_result.lock().expect("reply lock");
    if body["status"] == "success" {
        if let Some(result) = reply {
            let frame = json!({
                "type": "command",
                "data": {
                    "device_id": form.id,
                    "command_id": form.command,
                    "result": result,
                }
            });
            let state = state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(COMMAND_REPLY_DELAY).await;
                state.push_ws(WsControl::Frame(frame));
            });
        }
    }
    axum::Json(body).into_response()
}

// ---------------------------------------------------------------------------
// WebSocket handler
// ---------------------------------------------------------------------------

async fn ws_updates(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.cookie_valid(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

async fn handle_ws(state: Arc<CloudState>, mut socket: WebSocket) {
    state.ws_connect_count.fetch_add(1, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let my_tx = tx.clone();
    *state.ws_control.lock().expect("ws control lock") = Some(tx);

    loop {
        tokio::select! {
            ctrl = rx.recv() => match ctrl {
                Some(WsControl::Frame(frame)) => {
                    if socket
                        .send(Message::Text(frame.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(WsControl::Close(code)) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // The client's subscribe request asks for a snapshot.
                    if text.contains("subscribe")
                        && state.auto_initial_state.load(Ordering::SeqCst)
                    {
                        let frame = state.initial_state_frame();
                        if socket
                            .send(Message::Text(frame.to_string().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    }

    let mut guard = state.ws_control.lock().expect("ws control lock");
    // A newer connection may already have replaced us; only clear our own.
    if guard.as_ref().is_some_and(|t| t.same_channel(&my_tx)) {
        *guard = None;
    }
}
