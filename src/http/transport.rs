//! The seam between the oracle and whatever executes a probe

use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Raw response to a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            latency: Duration::ZERO,
        }
    }
}

/// Failure to obtain any response for a probe
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// The payload cannot be expressed in the configured submit mode
    #[error("Payload cannot be submitted: {0}")]
    Unsubmittable(String),
}

/// Executes one probe against the target.
///
/// Implementations send exactly one request per call and never retry;
/// retries are the oracle's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &str, timeout: Duration) -> Result<TransportResponse, TransportError>;

    /// Sends `key=value` alongside every later payload. Returns false
    /// when the transport has no side channel.
    fn set_extra_param(&self, _key: &str, _value: &str) -> bool {
        false
    }
}

/// Offline transport that blocks any payload containing a listed keyword.
///
/// Used by the `crack-keywords` command to plan payloads against a known
/// blacklist without touching a live target.
#[derive(Debug, Clone, Default)]
pub struct KeywordListTransport {
    keywords: Vec<String>,
}

impl KeywordListTransport {
    pub const BLOCKED_BODY: &'static str = "blocked";

    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).filter(|k: &String| !k.is_empty()).collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

#[async_trait]
impl Transport for KeywordListTransport {
    async fn send(&self, payload: &str, _timeout: Duration) -> Result<TransportResponse, TransportError> {
        let started = Instant::now();
        let body = if self.keywords.iter().any(|k| payload.contains(k.as_str())) {
            Self::BLOCKED_BODY.to_string()
        } else {
            "ok".to_string()
        };
        Ok(TransportResponse {
            status: 200,
            body,
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_list_blocks_substrings() {
        let transport = KeywordListTransport::new(["class", "_", ""]);
        assert_eq!(transport.keywords().len(), 2);

        let blocked = transport.send("''.__class__", Duration::from_secs(1)).await.unwrap();
        assert_eq!(blocked.body, KeywordListTransport::BLOCKED_BODY);

        let passed = transport.send("lipsum", Duration::from_secs(1)).await.unwrap();
        assert_eq!(passed.status, 200);
        assert_ne!(passed.body, KeywordListTransport::BLOCKED_BODY);
    }
}
