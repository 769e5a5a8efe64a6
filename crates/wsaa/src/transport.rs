//! Delivery of login envelopes to the authority.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::{
    config::TicketCacheConfig,
    error::{TicketError, TicketResult},
};

/// Status and body of a LoginCms HTTP exchange.
///
/// Faults arrive with a 500 status, so a non-success status is not an error
/// at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl TransportResponse {
    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a SOAP envelope to the LoginCms endpoint.
#[async_trait]
pub trait LoginTransport: Send + Sync {
    /// Posts `envelope` and returns whatever the endpoint answered.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Transport`] when no response was received.
    async fn send(&self, envelope: String) -> TicketResult<TransportResponse>;
}

/// [`LoginTransport`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpLoginTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpLoginTransport {
    /// Creates a transport posting to `url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Transport`] if the TLS backend cannot be
    /// initialized.
    pub fn new(url: impl Into<String>, timeout: Duration) -> TicketResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"));
        headers.insert("SOAPAction", HeaderValue::from_static("\"\""));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| TicketError::transport("build HTTP client", error))?;
        Ok(Self { client, url: url.into() })
    }

    /// Creates a transport for the configured endpoint and timeout.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_config(config: &TicketCacheConfig) -> TicketResult<Self> {
        Self::new(config.login_url(), config.request_timeout())
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LoginTransport for HttpLoginTransport {
    async fn send(&self, envelope: String) -> TicketResult<TransportResponse> {
        let response = self
            .client
            .post(&self.url)
            .body(envelope)
            .send()
            .await
            .map_err(|error| {
                let message =
                    if error.is_timeout() { "login request timed out" } else { "login request failed" };
                TicketError::transport(message, error)
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| TicketError::transport("read login response body", error))?;
        Ok(TransportResponse { status, body })
    }
}
