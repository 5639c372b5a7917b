//! Chat backend client with cancellable streaming.
//!
//! # Architecture
//!
//! - [`sse`] - incremental `data: <json>` frame decoder ([`EventFrameParser`])
//! - [`sse_types`] - typed frame payloads, validated at the serde boundary
//! - [`stream`] - [`StreamClient`]: one streaming request per outbound message,
//!   cooperative cancellation
//! - [`api`] - [`ConversationApi`]: the conversation/message RPCs the session
//!   engine consumes, with a reqwest implementation ([`HttpApi`])
//!
//! Stream events are delivered through a [`tokio::sync::mpsc`] channel as
//! [`docent_types::StreamEvent`] values.
//!
//! # Error Handling
//!
//! Failures while streaming are delivered as a single terminal
//! `StreamEvent::Error` rather than `Result::Err`, so partial output that has
//! already arrived stays with the caller. A user abort always ends with
//! `StreamEvent::Done`.

pub mod api;
pub mod sse;
pub mod sse_types;
pub mod stream;

use std::time::Duration;

use url::Url;

pub use api::{ApiError, ConversationApi, HttpApi, NewMessage};
pub use docent_types;
pub use sse::{EventFrameParser, Frame};
pub use stream::{CancelOutcome, EventStream, StreamClient, StreamError, StreamRequest};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

// Note: reqwest only exposes tcp_keepalive (idle time); interval/retries use platform defaults.
const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Bearer token for the chat backend.
#[derive(Clone)]
pub struct AuthToken(String);

impl AuthToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

// Manual Debug impl to prevent leaking tokens in logs.
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid server URL {url:?}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("server URL {0:?} cannot carry a path")]
    NotABase(String),
}

/// Base URL of the chat backend plus optional credentials.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    base: Url,
    token: Option<AuthToken>,
}

impl ServerEndpoint {
    pub fn new(base_url: &str, token: Option<AuthToken>) -> Result<Self, EndpointError> {
        let base = Url::parse(base_url).map_err(|source| EndpointError::Parse {
            url: base_url.to_string(),
            source,
        })?;
        if base.cannot_be_a_base() {
            return Err(EndpointError::NotABase(base_url.to_string()));
        }
        Ok(Self { base, token })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    #[must_use]
    pub fn is_https(&self) -> bool {
        self.base.scheme() == "https"
    }

    /// Build a URL by appending percent-encoded path segments to the base path.
    #[must_use]
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

/// Transport settings for [`http_client`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    /// Refuse plain-HTTP connections.
    pub https_only: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            https_only: true,
        }
    }
}

/// Build the shared HTTP client.
///
/// No overall request timeout is set: a streaming response may stay open for
/// as long as the server keeps generating.
pub fn http_client(settings: &HttpSettings) -> Result<reqwest::Client, reqwest::Error> {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_static(concat!("docent/", env!("CARGO_PKG_VERSION"))),
    );

    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .https_only(settings.https_only)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
        .build()
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
