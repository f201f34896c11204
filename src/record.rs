use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Classification of a single request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    CredentialUnavailable,
    RateLimited,
    CredentialInvalid,
    MalformedResponse,
    Timeout,
    TransportError,
    UnclassifiedHttpError,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }

    /// Status code sent to the key manager for this outcome.
    ///
    /// Outcomes without an HTTP response of their own map onto the codes the
    /// key manager understands.
    pub fn report_code(self, http_status: Option<u16>) -> u16 {
        match self {
            Outcome::RateLimited => 429,
            Outcome::Timeout => 408,
            Outcome::TransportError => 500,
            _ => http_status.unwrap_or(500),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::CredentialUnavailable => "credential_unavailable",
            Outcome::RateLimited => "rate_limited",
            Outcome::CredentialInvalid => "credential_invalid",
            Outcome::MalformedResponse => "malformed_response",
            Outcome::Timeout => "timeout",
            Outcome::TransportError => "transport_error",
            Outcome::UnclassifiedHttpError => "unclassified_http_error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResult {
    pub success: bool,
    pub outcome: Outcome,
    pub latency: Duration,
    pub first_byte_latency: Option<Duration>,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub error_message: Option<String>,
    pub correlation_id: String,
    pub extracted_text: Option<String>,
}

impl RequestResult {
    pub fn failed(correlation_id: impl Into<String>, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            success: false,
            outcome,
            latency: Duration::ZERO,
            first_byte_latency: None,
            input_bytes: 0,
            output_bytes: 0,
            error_message: Some(message.into()),
            correlation_id: correlation_id.into(),
            extracted_text: None,
        }
    }

    pub fn latency_seconds(&self) -> f64 {
        self.latency.as_secs_f64()
    }
}

/// Append-only collection shared by every worker of a run.
#[derive(Clone, Default)]
pub struct ResultSink {
    results: Arc<Mutex<Vec<RequestResult>>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, result: RequestResult) {
        self.results.lock().await.push(result);
    }

    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of everything appended so far.
    pub async fn snapshot(&self) -> Vec<RequestResult> {
        self.results.lock().await.clone()
    }
}
