use crate::config::RunConfig;
use crate::credentials::{Credential, CredentialCache};
use crate::dispatcher::Task;
use crate::metrics::collector::MetricsCollector;
use crate::record::{Outcome, RequestResult, ResultSink};
use crate::target::{Extraction, Target};
use async_trait::async_trait;
use futures::FutureExt;
use reqwest::{Client, Response, StatusCode};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

const BODY_SNIPPET_CHARS: usize = 200;

/// What the worker learned from one call, before it becomes a [`RequestResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub message: Option<String>,
    /// Short text sent to the key manager alongside the status code.
    pub note: String,
    pub output_bytes: u64,
    pub text: Option<String>,
}

impl Classification {
    fn failure(outcome: Outcome, status: Option<u16>, message: String, note: impl Into<String>) -> Self {
        Self {
            outcome,
            status,
            message: Some(message),
            note: note.into(),
            output_bytes: 0,
            text: None,
        }
    }
}

/// Maps a status code to an outcome. 2xx returns `None`: the body decides.
pub fn classify_status(status: StatusCode) -> Option<Outcome> {
    match status.as_u16() {
        429 => Some(Outcome::RateLimited),
        401 | 403 | 404 => Some(Outcome::CredentialInvalid),
        _ if status.is_success() => None,
        _ => Some(Outcome::UnclassifiedHttpError),
    }
}

/// The request URL carries ports and query values, so it is kept out of the
/// message that error buckets are matched against.
pub fn classify_transport_error(error: reqwest::Error) -> Classification {
    if error.is_timeout() {
        return Classification::failure(Outcome::Timeout, None, "request timeout".to_string(), "Request timeout");
    }
    let connect = error.is_connect();
    let detail = describe(error.without_url());
    if connect {
        Classification::failure(
            Outcome::TransportError,
            None,
            format!("connection error: {}", detail),
            "Connection error",
        )
    } else {
        Classification::failure(
            Outcome::TransportError,
            None,
            format!("transport error: {}", detail),
            "Transport error",
        )
    }
}

fn describe(error: reqwest::Error) -> String {
    match std::error::Error::source(&error) {
        Some(source) => format!("{} ({})", error, source),
        None => error.to_string(),
    }
}

/// Classifies a 2xx body against what the target expects.
pub fn classify_body(target: &dyn Target, status: u16, body: &[u8]) -> Classification {
    let output_bytes = body.len() as u64;
    let parsed: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            let mut classification = Classification::failure(
                Outcome::MalformedResponse,
                Some(status),
                format!("malformed response: body is not JSON ({})", e),
                "Format error: body is not JSON",
            );
            classification.output_bytes = output_bytes;
            return classification;
        }
    };

    match target.extract(&parsed) {
        Extraction::Text(text) => Classification {
            outcome: Outcome::Success,
            status: Some(status),
            message: None,
            note: String::new(),
            output_bytes,
            text: Some(text),
        },
        Extraction::Unexpected(reason) => {
            let mut classification = Classification::failure(
                Outcome::MalformedResponse,
                Some(status),
                format!("malformed response: {}", reason),
                format!("Format error: {}", reason),
            );
            classification.output_bytes = output_bytes;
            classification
        }
    }
}

/// Executes one timed call per dispatched slot and always records a result.
pub struct Worker {
    target: Arc<dyn Target>,
    credentials: Arc<CredentialCache>,
    client: Client,
    sink: ResultSink,
    metrics: MetricsCollector,
    config: Arc<RunConfig>,
}

impl Worker {
    pub fn new(
        target: Arc<dyn Target>,
        credentials: Arc<CredentialCache>,
        client: Client,
        sink: ResultSink,
        metrics: MetricsCollector,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            target,
            credentials,
            client,
            sink,
            metrics,
            config,
        }
    }

    pub fn correlation_id(&self, index: u64) -> String {
        format!("{}-{}-{}", self.target.name(), index, Uuid::new_v4())
    }

    pub async fn attempt(&self, correlation_id: &str) -> RequestResult {
        let started = Instant::now();

        let credential = match self
            .credentials
            .get(
                self.config.max_credential_retries,
                self.config.credential_retry_interval,
            )
            .await
        {
            Ok(credential) => credential,
            Err(e) => {
                log::warn!("[{}] {}", correlation_id, e);
                let mut result = RequestResult::failed(
                    correlation_id,
                    Outcome::CredentialUnavailable,
                    format!("credential unavailable: {}", e),
                );
                result.latency = started.elapsed();
                return result;
            }
        };

        let mut input_bytes = 0;
        let mut first_byte_latency = None;
        let classification = match self.target.prepare(&self.client, &credential, correlation_id) {
            Ok(prepared) => {
                input_bytes = prepared.input_bytes;
                match prepared.request.timeout(self.config.request_timeout).send().await {
                    Ok(response) => {
                        first_byte_latency = Some(started.elapsed());
                        self.classify_response(response).await
                    }
                    Err(e) => classify_transport_error(e),
                }
            }
            Err(e) => Classification::failure(
                Outcome::TransportError,
                None,
                format!("transport error: could not build request: {}", e),
                "Request build error",
            ),
        };
        let latency = started.elapsed();

        self.log_outcome(correlation_id, &credential, &classification);
        if !classification.outcome.is_success() {
            self.credentials
                .report_outcome(
                    &credential,
                    classification.outcome,
                    classification.outcome.report_code(classification.status),
                    &classification.note,
                )
                .await;
        }

        RequestResult {
            success: classification.outcome.is_success(),
            outcome: classification.outcome,
            latency,
            first_byte_latency,
            input_bytes,
            output_bytes: classification.output_bytes,
            error_message: classification.message,
            correlation_id: correlation_id.to_string(),
            extracted_text: classification.text,
        }
    }

    async fn classify_response(&self, response: Response) -> Classification {
        let status = response.status();
        match classify_status(status) {
            None => match response.bytes().await {
                Ok(body) => classify_body(self.target.as_ref(), status.as_u16(), &body),
                Err(e) => classify_transport_error(e),
            },
            Some(outcome) => {
                let code = status.as_u16();
                let body = response.text().await.unwrap_or_default();
                let output_bytes = body.len() as u64;
                let (message, note) = match outcome {
                    Outcome::RateLimited => (
                        "rate limited (429)".to_string(),
                        "Rate limit exceeded".to_string(),
                    ),
                    Outcome::CredentialInvalid => (
                        format!("credential rejected ({})", code),
                        format!("Key invalid: {}", code),
                    ),
                    _ => {
                        let mut message = format!("http error ({})", code);
                        let snippet: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
                        if !snippet.is_empty() {
                            message.push_str(" | body: ");
                            message.push_str(&snippet);
                        }
                        (message, format!("HTTP error: {}", code))
                    }
                };
                let mut classification = Classification::failure(outcome, Some(code), message, note);
                classification.output_bytes = output_bytes;
                classification
            }
        }
    }

    fn log_outcome(&self, correlation_id: &str, credential: &Credential, classification: &Classification) {
        match classification.outcome {
            Outcome::Success => log::debug!(
                "[{}] [{}] ok: {}",
                correlation_id,
                credential.abbreviated(),
                classification.text.as_deref().unwrap_or_default()
            ),
            outcome => log::warn!(
                "[{}] [{}] {}: {}",
                correlation_id,
                credential.abbreviated(),
                outcome,
                classification.message.as_deref().unwrap_or_default()
            ),
        }
    }
}

#[async_trait]
impl Task for Worker {
    async fn execute(&self, index: u64) {
        let correlation_id = self.correlation_id(index);
        let started = Instant::now();
        self.metrics.increment_in_flight();

        let result = match AssertUnwindSafe(self.attempt(&correlation_id))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                log::error!("[{}] worker panicked: {}", correlation_id, reason);
                let mut result = RequestResult::failed(
                    &correlation_id,
                    Outcome::TransportError,
                    format!("unexpected worker failure: {}", reason),
                );
                result.latency = started.elapsed();
                result
            }
        };

        self.metrics.decrement_in_flight();
        if result.success {
            self.metrics.record_success(result.latency);
        } else {
            self.metrics.record_failure();
        }
        self.sink.push(result).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
