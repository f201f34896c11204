use super::{check_template, render_endpoint, Extraction, PreparedRequest, Target, SUBSCRIPTION_KEY_HEADER, TRACE_ID_HEADER};
use crate::credentials::Credential;
use crate::error::Result;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

/// Fast transcription: multipart upload of an audio file plus a JSON definition.
pub struct TranscriptionTarget {
    endpoint: String,
    api_version: String,
    file_name: String,
    audio: Arc<Vec<u8>>,
    definition: String,
}

impl TranscriptionTarget {
    pub fn new(
        endpoint: &str,
        api_version: &str,
        file_name: &str,
        audio: Arc<Vec<u8>>,
        locales: Vec<String>,
    ) -> Result<Self> {
        check_template(endpoint)?;
        let definition = serde_json::to_string(&json!({
            "locales": locales,
            "profanityFilterMode": "Masked",
            "channels": [0],
        }))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            api_version: api_version.to_string(),
            file_name: file_name.to_string(),
            audio,
            definition,
        })
    }
}

impl Target for TranscriptionTarget {
    fn name(&self) -> &str {
        "Transcription"
    }

    fn prepare(&self, client: &Client, credential: &Credential, correlation_id: &str) -> Result<PreparedRequest> {
        let url = render_endpoint(&self.endpoint, &credential.region)?;
        let audio = Part::bytes(self.audio.as_ref().clone())
            .file_name(self.file_name.clone())
            .mime_str("audio/wav")?;
        let definition = Part::text(self.definition.clone()).mime_str("application/json")?;
        let form = Form::new().part("audio", audio).part("definition", definition);

        let request = client
            .post(url)
            .query(&[("api-version", self.api_version.as_str())])
            .header(SUBSCRIPTION_KEY_HEADER, &credential.key)
            .header(TRACE_ID_HEADER, correlation_id)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form);

        Ok(PreparedRequest {
            request,
            input_bytes: self.audio.len() as u64,
        })
    }

    fn extract(&self, body: &Value) -> Extraction {
        let combined = body
            .get("combinedPhrases")
            .and_then(|phrases| phrases.get(0))
            .and_then(|phrase| phrase.get("text"))
            .and_then(Value::as_str);
        let channel = || {
            body.pointer("/results/channels/0/lexical")
                .and_then(Value::as_str)
        };

        match combined.or_else(channel) {
            Some(text) => Extraction::Text(text.to_string()),
            None => Extraction::Unexpected("transcription response has no text".to_string()),
        }
    }
}
