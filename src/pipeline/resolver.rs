//! Number-source resolver: message text first, image attachment second.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::channels::{Attachment, ChatMessage};
use crate::config::PipelineConfig;
use crate::expr::evaluate;
use crate::pipeline::types::Candidate;
use crate::recognition::{TextRecognizer, recognize_with_timeout};

pub struct Resolver {
    recognizer: Arc<dyn TextRecognizer>,
    image_extensions: Vec<String>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, config: &PipelineConfig) -> Self {
        Self {
            recognizer,
            image_extensions: config.image_extensions.clone(),
            timeout: config.recognition_timeout,
        }
    }

    /// Resolve the value a message stands for.
    ///
    /// The image is only consulted when the text does not evaluate and
    /// `allow_image_fallback` is set.
    pub async fn resolve(&self, message: &ChatMessage, allow_image_fallback: bool) -> Candidate {
        if let Ok(n) = evaluate(&message.content) {
            return Candidate::Text(n);
        }
        if allow_image_fallback {
            return self.resolve_image(message).await;
        }
        Candidate::Unknown { recognized: None }
    }

    /// Resolve from the image attachment alone, ignoring the text.
    pub async fn resolve_image(&self, message: &ChatMessage) -> Candidate {
        let Some(attachment) = self.image_attachment(message) else {
            return Candidate::Unknown { recognized: None };
        };
        let Some(text) = self.recognize(&message.id, attachment).await else {
            return Candidate::Unknown { recognized: None };
        };
        match evaluate(&text) {
            Ok(value) => Candidate::Image {
                value,
                recognized: text,
            },
            Err(e) => {
                debug!(id = %message.id, error = %e, "Recognized text did not evaluate");
                Candidate::Unknown {
                    recognized: Some(text),
                }
            }
        }
    }

    /// First attachment with a configured image extension.
    pub fn image_attachment<'a>(&self, message: &'a ChatMessage) -> Option<&'a Attachment> {
        message.image_attachment(&self.image_extensions)
    }

    async fn recognize(&self, message_id: &str, attachment: &Attachment) -> Option<String> {
        match recognize_with_timeout(self.recognizer.as_ref(), &attachment.url, self.timeout).await
        {
            Ok(text) => {
                debug!(
                    id = %message_id,
                    provider = self.recognizer.provider_name(),
                    text = %text,
                    "Image recognized"
                );
                Some(text)
            }
            Err(e) => {
                warn!(
                    id = %message_id,
                    provider = self.recognizer.provider_name(),
                    file = %attachment.filename,
                    error = %e,
                    "Image recognition failed"
                );
                None
            }
        }
    }
}
