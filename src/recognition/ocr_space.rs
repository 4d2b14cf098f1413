//! OCR.space backend — remote recognition by image URL.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{RecognitionConfig, TextRecognizer};
use crate::error::RecognitionError;

const PROVIDER: &str = "ocr.space";

pub struct OcrSpaceRecognizer {
    config: RecognitionConfig,
    client: reqwest::Client,
}

impl OcrSpaceRecognizer {
    pub fn new(config: RecognitionConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextRecognizer for OcrSpaceRecognizer {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn recognize(&self, image_url: &str) -> Result<String, RecognitionError> {
        let engine = self.config.engine.to_string();
        let form = [
            ("apikey", self.config.api_key.expose_secret()),
            ("url", image_url),
            ("language", self.config.language.as_str()),
            ("OCREngine", engine.as_str()),
            ("scale", "true"),
        ];

        let resp = self
            .client
            .post(&self.config.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| RecognitionError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| RecognitionError::RequestFailed {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(RecognitionError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("{status}: {body}"),
            });
        }

        let text = parse_response(&body)?;
        tracing::debug!(url = %image_url, text = %text, "OCR.space recognized text");
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    /// String or array of strings, depending on the failure.
    #[serde(default)]
    error_message: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

/// Extract the recognized text from an OCR.space response body.
fn parse_response(body: &str) -> Result<String, RecognitionError> {
    let resp: OcrResponse =
        serde_json::from_str(body).map_err(|e| RecognitionError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;

    if resp.is_errored_on_processing {
        let reason = match &resp.error_message {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            _ => "processing failed".to_string(),
        };
        return Err(RecognitionError::RequestFailed {
            provider: PROVIDER.into(),
            reason,
        });
    }

    let text = resp
        .parsed_results
        .iter()
        .map(|r| r.parsed_text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(text)
}
