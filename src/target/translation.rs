use super::{
    check_template, render_endpoint, Extraction, PreparedRequest, Target, SUBSCRIPTION_KEY_HEADER,
    SUBSCRIPTION_REGION_HEADER, TRACE_ID_HEADER,
};
use crate::credentials::Credential;
use crate::error::Result;
use reqwest::Client;
use serde_json::{json, Value};

/// Text translation: one JSON document per request.
pub struct TranslationTarget {
    endpoint: String,
    from: String,
    to: String,
    body: Vec<u8>,
}

impl TranslationTarget {
    pub fn new(endpoint: &str, from: &str, to: &str, text: &str) -> Result<Self> {
        check_template(endpoint)?;
        let body = serde_json::to_vec(&json!([{ "text": text }]))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            body,
        })
    }
}

impl Target for TranslationTarget {
    fn name(&self) -> &str {
        "TextTranslation"
    }

    fn prepare(&self, client: &Client, credential: &Credential, correlation_id: &str) -> Result<PreparedRequest> {
        let url = render_endpoint(&self.endpoint, &credential.region)?;
        let request = client
            .post(url)
            .query(&[("api-version", "3.0"), ("from", self.from.as_str()), ("to", self.to.as_str())])
            .header(SUBSCRIPTION_KEY_HEADER, &credential.key)
            .header(SUBSCRIPTION_REGION_HEADER, &credential.region)
            .header(TRACE_ID_HEADER, correlation_id)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(self.body.clone());

        Ok(PreparedRequest {
            request,
            input_bytes: self.body.len() as u64,
        })
    }

    fn extract(&self, body: &Value) -> Extraction {
        match body
            .get(0)
            .and_then(|first| first.get("translations"))
            .and_then(|translations| translations.get(0))
            .and_then(|translation| translation.get("text"))
            .and_then(Value::as_str)
        {
            Some(text) => Extraction::Text(text.to_string()),
            None => Extraction::Unexpected("translation response has no translations".to_string()),
        }
    }
}
