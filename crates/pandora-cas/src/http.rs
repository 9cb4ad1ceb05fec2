//! HTTP and WebSocket transport.
//!
//! One `HttpClient` per Account.  Every HTTP call and the WebSocket upgrade
//! share the same cookie jar, so the session cookie set at login is carried
//! everywhere without the callers touching it.
//!
//! Inflight HTTP calls are bounded by a per-Account semaphore of
//! [`MAX_INFLIGHT_REQUESTS`].

use reqwest::cookie::CookieStore;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on concurrent HTTP calls for one Account.
pub const MAX_INFLIGHT_REQUESTS: usize = 4;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Transport-level failure, split so callers can pick a recovery path:
/// network trouble retries, an HTTP status classifies, a parse failure is a
/// protocol defect.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("parse: {0}")]
    Parse(String),
}

impl HttpError {
    /// True when the upstream signalled an expired or missing session.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, HttpError::Status(401))
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        match e.status() {
            Some(code) => HttpError::Status(code.as_u16()),
            None => HttpError::Transport(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// HTTP client with a cookie jar scoped to the service host.
///
/// Cheap to clone; all clones share the jar, the connection pool, and the
/// inflight-request semaphore.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    jar: Arc<reqwest::cookie::Jar>,
    base: reqwest::Url,
    user_agent: String,
    timeout: Duration,
    inflight: Arc<Semaphore>,
}

impl HttpClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, HttpError> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let base = reqwest::Url::parse(base_url)
            .map_err(|e| HttpError::Transport(format!("invalid base URL '{base_url}': {e}")))?;
        Ok(HttpClient {
            client,
            jar,
            base,
            user_agent: user_agent.to_owned(),
            timeout,
            inflight: Arc::new(Semaphore::new(MAX_INFLIGHT_REQUESTS)),
        })
    }

    fn url(&self, path: &str) -> Result<reqwest::Url, HttpError> {
        self.base
            .join(path)
            .map_err(|e| HttpError::Transport(format!("invalid path '{path}': {e}")))
    }

    /// GET `path` with the given query pairs; returns the body on 2xx.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, HttpError> {
        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|_| HttpError::Transport("client shut down".to_owned()))?;
        let resp = self
            .client
            .get(self.url(path)?)
            .query(query)
            .send()
            .await
            .map_err(HttpError::from_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(HttpError::from_reqwest)?;
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        Ok(body)
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, HttpError> {
        let body = self.get(path, query).await?;
        serde_json::from_str(&body).map_err(|e| HttpError::Parse(e.to_string()))
    }

    /// POST an urlencoded form; returns the body on 2xx.
    pub async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<String, HttpError> {
        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|_| HttpError::Transport("client shut down".to_owned()))?;
        let resp = self
            .client
            .post(self.url(path)?)
            .form(form)
            .send()
            .await
            .map_err(HttpError::from_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(HttpError::from_reqwest)?;
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        Ok(body)
    }

    /// POST a form and decode a JSON body.
    pub async fn post_form_json<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, HttpError> {
        let body = self.post_form(path, form).await?;
        serde_json::from_str(&body).map_err(|e| HttpError::Parse(e.to_string()))
    }

    /// Open a WebSocket to `path` on the service host.
    ///
    /// The upgrade request carries the jar's cookies for the host (session
    /// auth) and the configured user-agent.  A rejected upgrade surfaces as
    /// `HttpError::Status` so callers can recognise auth expiry.
    pub async fn open_ws(&self, path: &str) -> Result<WsStream, HttpError> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let http_url = self.url(path)?;
        let mut ws_url = http_url.clone();
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        ws_url
            .set_scheme(scheme)
            .map_err(|()| HttpError::Transport(format!("cannot derive ws scheme for {ws_url}")))?;

        let mut request = ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| HttpError::Transport(format!("invalid ws URL: {e}")))?;

        if let Some(cookie) = self.jar.cookies(&http_url) {
            let value = cookie
                .to_str()
                .map_err(|e| HttpError::Transport(format!("cookie header: {e}")))
                .and_then(|s| {
                    tungstenite::http::HeaderValue::from_str(s)
                        .map_err(|e| HttpError::Transport(format!("cookie header: {e}")))
                })?;
            request
                .headers_mut()
                .insert(tungstenite::http::header::COOKIE, value);
        }
        let ua = tungstenite::http::HeaderValue::from_str(&self.user_agent)
            .map_err(|e| HttpError::Transport(format!("user-agent header: {e}")))?;
        request
            .headers_mut()
            .insert(tungstenite::http::header::USER_AGENT, ua);

        let dial = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| HttpError::Transport("websocket dial timed out".to_owned()))?;
        let (ws, _response) = dial.map_err(|e| match e {
            tungstenite::Error::Http(resp) => HttpError::Status(resp.status().as_u16()),
            other => HttpError::Transport(other.to_string()),
        })?;
        Ok(ws)
    }
}
