//! Request builders for the services a load test can be pointed at.
//!
//! A [`Target`] knows how to turn a credential into one outbound request and
//! how to tell a well-formed response body from an unexpected one. Status code
//! handling, timing and reporting stay with the worker.

pub mod audio;
pub mod speech;
pub mod transcription;
pub mod translation;

use crate::config::TargetConfig;
use crate::credentials::Credential;
use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

pub use speech::SpeechRecognitionTarget;
pub use transcription::TranscriptionTarget;
pub use translation::TranslationTarget;

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const SUBSCRIPTION_REGION_HEADER: &str = "Ocp-Apim-Subscription-Region";
pub const TRACE_ID_HEADER: &str = "X-ClientTraceId";

/// A request ready to be sent, plus the size of what it carries.
pub struct PreparedRequest {
    pub request: RequestBuilder,
    pub input_bytes: u64,
}

/// What a target made of a 2xx response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Unexpected(String),
}

pub trait Target: Send + Sync {
    /// Prefix for correlation ids.
    fn name(&self) -> &str;

    fn prepare(&self, client: &Client, credential: &Credential, correlation_id: &str) -> Result<PreparedRequest>;

    fn extract(&self, body: &Value) -> Extraction;
}

/// Substitutes `{region}` in an endpoint template.
pub fn render_endpoint(template: &str, region: &str) -> Result<Url> {
    let raw = template.replace("{region}", region);
    Url::parse(&raw).map_err(|e| Error::Target(format!("invalid endpoint '{}': {}", raw, e)))
}

pub fn build_target(config: &TargetConfig) -> Result<Arc<dyn Target>> {
    let target: Arc<dyn Target> = match config {
        TargetConfig::Translation {
            endpoint,
            from,
            to,
            text,
        } => Arc::new(TranslationTarget::new(endpoint, from, to, text)?),
        TargetConfig::SpeechRecognition {
            endpoint,
            audio,
            language,
            sample_rate,
        } => {
            let audio = audio::load(audio)?;
            Arc::new(SpeechRecognitionTarget::new(
                endpoint,
                audio.bytes,
                language,
                audio.sample_rate.unwrap_or(*sample_rate),
            )?)
        }
        TargetConfig::Transcription {
            endpoint,
            api_version,
            audio,
            locales,
        } => {
            let audio = audio::load(audio)?;
            Arc::new(TranscriptionTarget::new(
                endpoint,
                api_version,
                &audio.file_name,
                audio.bytes,
                locales.clone(),
            )?)
        }
    };
    Ok(target)
}

/// Validates a template up front so per-request rendering cannot surprise.
fn check_template(template: &str) -> Result<()> {
    render_endpoint(template, "eastasia").map(|_| ())
}
