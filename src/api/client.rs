//! HTTP client for the hosted expenses backend.
//!
//! Every request carries the project API key (`apikey` header) and, when a
//! session is active, the user's bearer token. Without a session the API key
//! doubles as the bearer token, which is what the backend expects for
//! anonymous access.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::connectivity::is_network_error;

/// Failure talking to the remote store, classified by what the caller
/// should do about it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The backend could not be reached (or is temporarily unavailable).
    /// Retryable: the same request may succeed later.
    #[error("network unavailable: {0}")]
    Connectivity(String),
    /// The session is missing, expired, or lacks permission.
    #[error("not authorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    /// The backend refused this particular write (validation, constraint).
    #[error("rejected by remote store ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The request could not be built or the response made no sense.
    #[error("unexpected remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Connectivity(_))
    }

    /// Classify a transport-level failure from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_builder() || err.is_decode() {
            return RemoteError::Malformed(message);
        }
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            return RemoteError::Connectivity(message);
        }
        if is_network_error(&message) {
            RemoteError::Connectivity(message)
        } else {
            RemoteError::Malformed(message)
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => RemoteError::Unauthorized {
                status,
                message: body,
            },
            408 | 429 | 500..=599 => {
                RemoteError::Connectivity(format!("backend unavailable ({}): {}", status, body))
            }
            _ => RemoteError::Rejected {
                status,
                message: body,
            },
        }
    }
}

/// Turn a response into `Ok(response)` or a classified error.
pub async fn check_status(resp: Response) -> Result<Response, RemoteError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status, body))
}

/// HTTP client wrapper for the expenses backend.
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    /// Create a client for `base_url`, optionally with a project API key and
    /// an initial session token.
    pub fn new(base_url: &str, api_key: Option<String>, access_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            access_token: Arc::new(RwLock::new(access_token)),
        }
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the session token (login or session change).
    #[cfg(test)]
    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
    }

    #[cfg(test)]
    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    /// Snapshot of the current session token.
    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    fn with_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        builder = builder.header(
            "X-Client-Info",
            concat!("expensepro-sync/", env!("CARGO_PKG_VERSION")),
        );
        if let Some(ref key) = self.api_key {
            builder = builder.header("apikey", key);
        }
        match token.or(self.api_key.as_deref()) {
            Some(bearer) => builder.bearer_auth(bearer),
            None => builder,
        }
    }

    /// Send an authenticated GET request to a relative API path.
    pub async fn authenticated_get(&self, path: &str) -> Result<Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.access_token.read().await.clone();
        self.with_headers(self.client.get(&url), token.as_deref())
            .send()
            .await
    }

    /// Send an authenticated POST with a JSON body to a relative API path.
    ///
    /// Asks the backend not to echo the written rows back.
    pub async fn authenticated_post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.access_token.read().await.clone();
        self.with_headers(self.client.post(&url), token.as_deref())
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RemoteError::from_status(503, String::new()).is_connectivity());
        assert!(RemoteError::from_status(502, String::new()).is_connectivity());
        assert!(RemoteError::from_status(429, String::new()).is_connectivity());
        assert!(RemoteError::from_status(408, String::new()).is_connectivity());

        assert_eq!(
            RemoteError::from_status(401, "jwt expired".into()),
            RemoteError::Unauthorized {
                status: 401,
                message: "jwt expired".into()
            }
        );
        assert!(matches!(
            RemoteError::from_status(403, String::new()),
            RemoteError::Unauthorized { status: 403, .. }
        ));

        let rejected =
            RemoteError::from_status(400, "invalid input syntax for type numeric".into());
        assert!(!rejected.is_connectivity());
        assert!(matches!(rejected, RemoteError::Rejected { status: 400, .. }));
        assert!(matches!(
            RemoteError::from_status(409, String::new()),
            RemoteError::Rejected { status: 409, .. }
        ));
    }

    #[test]
    fn test_error_messages() {
        let err = RemoteError::from_status(400, "null value in column \"amount\"".into());
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("amount"));
        assert!(RemoteError::Connectivity("dns error".into())
            .to_string()
            .contains("dns error"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new("https://example.supabase.co/", None, None);
        assert_eq!(client.base_url(), "https://example.supabase.co");
    }

    #[tokio::test]
    async fn test_access_token_replace_and_clear() {
        let client = ApiClient::new("http://localhost:54321", None, Some("first".into()));
        assert_eq!(client.access_token().await.as_deref(), Some("first"));

        client.set_access_token("second".into()).await;
        assert_eq!(client.access_token().await.as_deref(), Some("second"));

        client.clear_access_token().await;
        assert!(client.access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connectivity_error() {
        // Port 9 (discard) on localhost is closed on test machines
        let client = ApiClient::new("http://127.0.0.1:9", None, None);
        let err = client
            .authenticated_get("/auth/v1/health")
            .await
            .unwrap_err();
        assert!(RemoteError::from_transport(&err).is_connectivity());
    }
}
