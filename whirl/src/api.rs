//! HTTP collaborators: the message-history API and the liveness endpoint.
//!
//! [`HistoryFetcher`] and [`HealthProbe`] are the seams the session uses;
//! [`ApiClient`] implements both over `reqwest`.

use std::time::Duration;

use url::Url;

use whirl_proto::history::{ApiErrorBody, HistoryMessage, MessagesResponse};
use whirl_proto::message::UserId;

/// Errors from the HTTP collaborators.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The configured base URL cannot be used.
    #[error("invalid API URL: {0}")]
    InvalidUrl(String),

    /// The server rejected the bearer token (HTTP 401).
    #[error("request unauthorized")]
    Unauthorized,

    /// The server could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-supplied error text, if any.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Fetches cumulative history pages for a friend conversation.
pub trait HistoryFetcher: Send + Sync + 'static {
    /// Return up to `page * PAGE_SIZE` most recent messages, newest first.
    fn fetch_page(
        &self,
        friend: UserId,
        page: u32,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryMessage>, FetchError>> + Send;
}

/// Checks whether the server is alive.
pub trait HealthProbe: Send + Sync + 'static {
    /// Succeeds if the liveness endpoint answered with a success status.
    fn check(&self) -> impl std::future::Future<Output = Result<(), FetchError>> + Send;
}

/// `reqwest`-backed client for the REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if `base_url` is not an http(s) URL,
    /// or [`FetchError::Network`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    /// Socket endpoint: the base URL with `http`→`ws` (`https`→`wss`),
    /// path `/websocket/connect` and the token as a query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the URL cannot be rewritten.
    pub fn websocket_url(&self) -> Result<String, FetchError> {
        let mut url = self.endpoint("websocket/connect")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| FetchError::InvalidUrl(format!("cannot switch to {scheme}")))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url.into())
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        Url::parse(&format!("{}/{path}", self.base_url))
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))
    }
}

impl HistoryFetcher for ApiClient {
    async fn fetch_page(&self, friend: UserId, page: u32) -> Result<Vec<HistoryMessage>, FetchError> {
        let url = self.endpoint(&format!("messages/{friend}"))?;
        tracing::debug!(%friend, page, "fetching history page");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("page", page)])
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(body.messages.unwrap_or_default())
    }
}

impl HealthProbe for ApiClient {
    async fn check(&self) -> Result<(), FetchError> {
        let response = self
            .http
            .get(self.endpoint("health")?)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(FetchError::Status {
                status: status.as_u16(),
                message: String::new(),
            })
        }
    }
}
