//! LLM provider backends and the credential pool.
//!
//! The backend for a key is decided once, when the pool is built: keys with the
//! Groq prefix (`gsk_`) talk to Groq's OpenAI-compatible endpoint, everything
//! else is treated as a Google Gemini key.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderSettings;
use crate::contract::{CompletionProvider, ProviderFactory};
use crate::error::{ConfigError, ProviderError};

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GROQ_KEY_PREFIX: &str = "gsk_";
const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

/// Transport failure without the request URL, which may carry credentials.
fn network_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Network(e.without_url().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Groq,
    Gemini,
}

impl ProviderKind {
    pub fn detect(secret: &str) -> Self {
        if secret.starts_with(GROQ_KEY_PREFIX) {
            ProviderKind::Groq
        } else {
            ProviderKind::Gemini
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Groq => f.write_str("groq"),
            ProviderKind::Gemini => f.write_str("gemini"),
        }
    }
}

/// A credential tagged with the backend it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    secret: String,
    kind: ProviderKind,
}

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let kind = ProviderKind::detect(&secret);
        Self { secret, kind }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail: String = self
            .secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        write!(f, "ApiKey({}, ...{})", self.kind, tail)
    }
}

/// Ordered, read-only sequence of credentials. Never empty.
#[derive(Debug, Clone)]
pub struct ApiKeyPool {
    keys: Vec<ApiKey>,
}

impl ApiKeyPool {
    pub fn new<I, S>(secrets: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<ApiKey> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.trim().is_empty())
            .map(|s| ApiKey::new(s.trim()))
            .collect();
        if keys.is_empty() {
            return Err(ConfigError::NoApiKeys);
        }
        Ok(Self { keys })
    }

    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ConfigError> {
        Self::new(settings.all_keys())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key for the `index`-th task, wrapping around the pool.
    pub fn round_robin(&self, index: usize) -> &ApiKey {
        &self.keys[index % self.keys.len()]
    }

    pub fn first(&self) -> &ApiKey {
        &self.keys[0]
    }

    pub fn count_of(&self, kind: ProviderKind) -> usize {
        self.keys.iter().filter(|k| k.kind == kind).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApiKey> {
        self.keys.iter()
    }
}

/// Builds reqwest-backed providers for the kind of each key.
pub struct HttpProviderFactory {
    client: Client,
    groq_model: String,
    gemini_model: String,
    temperature: f32,
}

impl HttpProviderFactory {
    pub fn new(
        settings: &ProviderSettings,
        timeout: Duration,
        temperature: f32,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            groq_model: settings.groq_model.clone(),
            gemini_model: settings.gemini_model.clone(),
            temperature,
        })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn provider_for(&self, key: &ApiKey) -> Box<dyn CompletionProvider> {
        match key.kind() {
            ProviderKind::Groq => Box::new(GroqProvider {
                client: self.client.clone(),
                api_key: key.secret().to_string(),
                model: self.groq_model.clone(),
                temperature: self.temperature,
                url: GROQ_API_URL.to_string(),
            }),
            ProviderKind::Gemini => Box::new(GeminiProvider {
                client: self.client.clone(),
                api_key: key.secret().to_string(),
                model: self.gemini_model.clone(),
                temperature: self.temperature,
                base_url: GEMINI_BASE_URL.to_string(),
            }),
        }
    }
}

/// Groq chat completions (OpenAI-compatible).
pub struct GroqProvider {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    url: String,
}

impl GroqProvider {
    fn build_request<'a>(&'a self, system: &'a str, user: &'a str) -> GroqRequest<'a> {
        GroqRequest {
            model: &self.model,
            messages: vec![
                GroqMessage {
                    role: "system",
                    content: system,
                },
                GroqMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let request = self.build_request(system, user);
        debug!(model = %self.model, "Sending Groq completion request");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status, &body));
        }

        let parsed: GroqResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))
    }
}

/// Google Gemini `generateContent`.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

impl GeminiProvider {
    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn build_request(&self, system: &str, user: &str) -> GeminiRequest {
        GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(system.to_string()),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(user.to_string()),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let request = self.build_request(system, user);
        debug!(model = %self.model, "Sending Gemini completion request");
        let response = self
            .client
            .post(self.generate_url())
            .header(GEMINI_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status, &body));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No candidates in response".to_string()))?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        Ok(text)
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct GroqRequest<'a> {
    model: &'a str,
    messages: Vec<GroqMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GroqMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqResponseMessage,
}

#[derive(Debug, Deserialize)]
struct GroqResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}
