//! REST transport over reqwest.
//!
//! # Responsibilities
//! - POST the payload as `application/octet-stream`
//! - Forward metadata as `x-metadata-<key>` headers
//! - Map non-2xx statuses to `Remote` and client failures to transport errors

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

use crate::load_balancer::endpoint::Endpoint;
use crate::transport::{Call, TransportAdapter, TransportError};

/// Longest error body kept in `TransportError::Remote`.
const MAX_ERROR_BODY: usize = 512;

/// Synchronous request/response adapter.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Use a preconfigured client (pool sizes, proxies, TLS).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn headers(call: &Call) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        for (key, value) in &call.metadata {
            let name = HeaderName::from_bytes(format!("x-metadata-{}", key.to_ascii_lowercase()).as_bytes())
                .map_err(|e| TransportError::Malformed(format!("metadata key '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Malformed(format!("metadata value for '{}': {}", key, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_builder() {
        TransportError::Malformed(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

#[async_trait]
impl TransportAdapter for HttpTransport {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        call: &Call,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let headers = Self::headers(call)?;

        let response = self
            .client
            .post(endpoint.address().clone())
            .headers(headers)
            .timeout(timeout)
            .body(call.payload.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            tracing::debug!(endpoint = %endpoint.id(), status = %status, "Endpoint returned error status");
            return Err(TransportError::Remote {
                code: status.as_u16(),
                message,
            });
        }

        response.bytes().await.map_err(classify)
    }

    /// Any HTTP answer to a HEAD request counts as alive.
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> bool {
        match self
            .client
            .head(endpoint.address().clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(endpoint = %endpoint.id(), error = %e, "Probe failed");
                false
            }
        }
    }
}
