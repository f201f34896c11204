use super::{check_template, render_endpoint, Extraction, PreparedRequest, Target, SUBSCRIPTION_KEY_HEADER, TRACE_ID_HEADER};
use crate::credentials::Credential;
use crate::error::Result;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;

/// Short-audio speech recognition against the regional REST endpoint.
pub struct SpeechRecognitionTarget {
    endpoint: String,
    audio: Arc<Vec<u8>>,
    language: String,
    content_type: String,
}

impl SpeechRecognitionTarget {
    pub fn new(endpoint: &str, audio: Arc<Vec<u8>>, language: &str, sample_rate: u32) -> Result<Self> {
        check_template(endpoint)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            audio,
            language: language.to_string(),
            content_type: format!("audio/wav; codecs=audio/pcm; samplerate={}", sample_rate),
        })
    }
}

impl Target for SpeechRecognitionTarget {
    fn name(&self) -> &str {
        "SpeechRecognition"
    }

    fn prepare(&self, client: &Client, credential: &Credential, correlation_id: &str) -> Result<PreparedRequest> {
        let url = render_endpoint(&self.endpoint, &credential.region)?;
        let request = client
            .post(url)
            .query(&[("language", self.language.as_str()), ("format", "detailed")])
            .header(SUBSCRIPTION_KEY_HEADER, &credential.key)
            .header(TRACE_ID_HEADER, correlation_id)
            .header(reqwest::header::CONTENT_TYPE, &self.content_type)
            .header(reqwest::header::ACCEPT, "application/json;text/xml")
            .body(self.audio.as_ref().clone());

        Ok(PreparedRequest {
            request,
            input_bytes: self.audio.len() as u64,
        })
    }

    /// Only `RecognitionStatus: Success` counts; a `NoMatch` is a 2xx with nothing in it.
    fn extract(&self, body: &Value) -> Extraction {
        match body.get("RecognitionStatus").and_then(Value::as_str) {
            Some("Success") => Extraction::Text(
                body.get("DisplayText")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            Some("NoMatch") => Extraction::Unexpected("recognition no match".to_string()),
            Some(status) => Extraction::Unexpected(format!("recognition status {}", status)),
            None => Extraction::Unexpected("response has no RecognitionStatus".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> SpeechRecognitionTarget {
        SpeechRecognitionTarget::new(
            "https://{region}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
            Arc::new(vec![0u8; 64]),
            "zh-CN",
            44100,
        )
        .unwrap()
    }

    #[test]
    fn success_status_yields_display_text() {
        let body = json!({ "RecognitionStatus": "Success", "DisplayText": "你好。" });
        assert_eq!(target().extract(&body), Extraction::Text("你好。".to_string()));
    }

    #[test]
    fn no_match_is_unexpected() {
        let body = json!({ "RecognitionStatus": "NoMatch" });
        assert_eq!(
            target().extract(&body),
            Extraction::Unexpected("recognition no match".to_string())
        );
    }

    #[test]
    fn endpoint_follows_credential_region() {
        let credential = Credential::new("k-123456789", "westus2");
        let prepared = target().prepare(&Client::new(), &credential, "id").unwrap();
        let request = prepared.request.build().unwrap();
        assert_eq!(request.url().host_str(), Some("westus2.stt.speech.microsoft.com"));
        assert_eq!(prepared.input_bytes, 64);
        assert_eq!(
            request.headers()[reqwest::header::CONTENT_TYPE],
            "audio/wav; codecs=audio/pcm; samplerate=44100"
        );
    }
}
