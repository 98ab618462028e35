//! Submission options and responses.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::load_balancer::endpoint::EndpointId;

/// Per-call options for `Router::submit`.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Caller time budget. Falls back to `timeouts.request_ms`.
    pub timeout: Option<Duration>,
    /// Read and populate the response cache for this call.
    pub cacheable: bool,
    /// Cache lifetime. Falls back to `cache.default_ttl_secs`.
    pub ttl: Option<Duration>,
    /// Forwarded to the backend and part of the fingerprint.
    pub metadata: BTreeMap<String, String>,
    /// Instance name to try first.
    pub prefer: Option<String>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cacheable(mut self, ttl: Option<Duration>) -> Self {
        self.cacheable = true;
        self.ttl = ttl;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn prefer(mut self, instance: impl Into<String>) -> Self {
        self.prefer = Some(instance.into());
        self
    }
}

/// A backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub body: Bytes,
    /// Endpoint that produced the body. Cached responses keep the original.
    pub endpoint: EndpointId,
}

impl Response {
    pub fn new(body: impl Into<Bytes>, endpoint: EndpointId) -> Self {
        Self {
            body: body.into(),
            endpoint,
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let opts = SubmitOptions::new()
            .timeout(Duration::from_secs(1))
            .cacheable(None)
            .metadata("lang", "en")
            .prefer("primary");
        assert!(opts.cacheable);
        assert_eq!(opts.metadata.get("lang").map(String::as_str), Some("en"));
        assert_eq!(opts.prefer.as_deref(), Some("primary"));
    }

    #[test]
    fn test_json_body() {
        let r = Response::new(&b"{\"text\":\"hi\"}"[..], EndpointId::new("stt", "a"));
        let v: serde_json::Value = r.json().unwrap();
        assert_eq!(v["text"], "hi");
    }
}
