//! HTTP backends for OCR and vision chat
//!
//! Both endpoints speak JSON over HTTPS with bearer authentication:
//! - `POST {base_url}/ocr` returns `pages[].markdown`
//! - `POST {base_url}/chat/completions` is OpenAI-compatible and takes an
//!   `image_url` data-URL content part

use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prism_core::SpecialistFault;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default request timeout for backend calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Backend settings as they appear in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// API base URL, without trailing slash
    pub base_url: String,
    /// Model name sent with every request
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Authenticated JSON client for one backend
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpBackend {
    /// Create a backend client
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    /// Create a backend from configuration, reading the key from the environment
    ///
    /// A missing key variable is logged and the backend is built without
    /// authentication.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &HttpBackendConfig) -> anyhow::Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.is_empty() => Some(SecretString::from(key)),
                _ => {
                    warn!(env = %var, base_url = %config.base_url, "Backend API key not set");
                    None
                }
            },
            None => None,
        };
        Self::new(config.base_url.clone(), config.model.clone(), api_key)
    }

    /// Base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, SpecialistFault> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpecialistFault::Failed(anyhow!(
                "{} returned {}: {}",
                path,
                status,
                sanitize_error(&body)
            )));
        }

        response
            .json::<R>()
            .await
            .with_context(|| format!("invalid response from {}", path))
            .map_err(SpecialistFault::Failed)
    }

    /// Extract markdown text from a document or image
    ///
    /// # Errors
    ///
    /// Returns `SpecialistFault::Failed` on transport errors, non-2xx
    /// responses and malformed bodies.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn ocr(&self, bytes: &[u8], media_type: &str) -> Result<String, SpecialistFault> {
        let url = data_url(bytes, media_type);
        let document = if media_type.starts_with("image/") {
            OcrDocument::ImageUrl { image_url: url }
        } else {
            OcrDocument::DocumentUrl { document_url: url }
        };
        let request = OcrRequest {
            model: &self.model,
            document,
        };

        let response: OcrResponse = self.post("ocr", &request).await?;
        debug!(pages = response.pages.len(), "OCR completed");
        Ok(response
            .pages
            .into_iter()
            .map(|p| p.markdown)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Ask a vision model about an image
    ///
    /// # Errors
    ///
    /// Returns `SpecialistFault::Failed` on transport errors, non-2xx
    /// responses and empty answers.
    #[instrument(skip(self, prompt, bytes), fields(size = bytes.len()))]
    pub async fn vision_chat(
        &self,
        prompt: &str,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<String, SpecialistFault> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(bytes, media_type),
                        },
                    },
                ],
            }],
        };

        let response: ChatResponse = self.post("chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SpecialistFault::Failed(anyhow!("vision model returned no answer")))
    }
}

/// Encode bytes as a `data:` URL
#[must_use]
pub fn data_url(bytes: &[u8], media_type: &str) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

/// Keep API error bodies short and free of credential hints
fn sanitize_error(body: &str) -> String {
    let lower = body.to_lowercase();
    if lower.contains("api key") || lower.contains("unauthorized") || lower.contains("authentication")
    {
        return "authentication error, check the backend API key".to_string();
    }
    if lower.contains("rate limit") || lower.contains("quota") {
        return "rate limit exceeded".to_string();
    }
    let mut end = body.len().min(300);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: OcrDocument,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OcrDocument {
    DocumentUrl { document_url: String },
    ImageUrl { image_url: String },
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Deserialize)]
struct OcrPage {
    #[serde(default)]
    markdown: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
