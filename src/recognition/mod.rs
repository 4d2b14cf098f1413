//! Optical text recognition for image attachments.
//!
//! The engine only sees [`TextRecognizer`]: image URL in, best-effort text
//! out. [`OcrSpaceRecognizer`] is the bundled remote implementation.

mod ocr_space;

pub use ocr_space::OcrSpaceRecognizer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RecognitionError;

/// Image URL → recognized text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Provider name, for logs.
    fn provider_name(&self) -> &str;

    async fn recognize(&self, image_url: &str) -> Result<String, RecognitionError>;
}

/// Recognizer used when no OCR backend is configured. Always fails.
pub struct DisabledRecognizer;

#[async_trait]
impl TextRecognizer for DisabledRecognizer {
    fn provider_name(&self) -> &str {
        "disabled"
    }

    async fn recognize(&self, _image_url: &str) -> Result<String, RecognitionError> {
        Err(RecognitionError::Disabled)
    }
}

/// Configuration for the OCR.space backend.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub api_key: secrecy::SecretString,
    pub endpoint: String,
    pub language: String,
    pub engine: u8,
}

/// Create a recognizer, or the disabled one when `config` is `None`.
pub fn create_recognizer(config: Option<&RecognitionConfig>) -> Arc<dyn TextRecognizer> {
    match config {
        Some(config) => {
            tracing::info!(
                "Using OCR.space recognition (engine {}, language {})",
                config.engine,
                config.language
            );
            Arc::new(OcrSpaceRecognizer::new(config.clone()))
        }
        None => {
            tracing::info!("Image recognition disabled");
            Arc::new(DisabledRecognizer)
        }
    }
}

/// Run `recognize` bounded by `timeout`; expiry is a `RecognitionError::Timeout`.
pub async fn recognize_with_timeout(
    recognizer: &dyn TextRecognizer,
    image_url: &str,
    timeout: Duration,
) -> Result<String, RecognitionError> {
    match tokio::time::timeout(timeout, recognizer.recognize(image_url)).await {
        Ok(result) => result,
        Err(_) => Err(RecognitionError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowRecognizer;

    #[async_trait]
    impl TextRecognizer for SlowRecognizer {
        fn provider_name(&self) -> &str {
            "slow"
        }

        async fn recognize(&self, _image_url: &str) -> Result<String, RecognitionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("6".into())
        }
    }

    #[tokio::test]
    async fn disabled_recognizer_always_fails() {
        let r = create_recognizer(None);
        assert_eq!(r.provider_name(), "disabled");
        assert!(matches!(
            r.recognize("https://cdn/x.png").await,
            Err(RecognitionError::Disabled)
        ));
    }

    #[tokio::test]
    async fn timeout_bounds_slow_recognizers() {
        let timeout = Duration::from_millis(50);
        let result = recognize_with_timeout(&SlowRecognizer, "https://cdn/x.png", timeout).await;
        assert!(matches!(result, Err(RecognitionError::Timeout(d)) if d == timeout));
    }

    #[test]
    fn configured_recognizer_is_ocr_space() {
        let config = RecognitionConfig {
            api_key: secrecy::SecretString::from("k"),
            endpoint: "https://api.ocr.space/parse/image".into(),
            language: "eng".into(),
            engine: 2,
        };
        assert_eq!(create_recognizer(Some(&config)).provider_name(), "ocr.space");
    }
}
