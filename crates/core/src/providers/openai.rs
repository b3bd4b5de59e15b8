//! OpenAI-compatible embedding and chat-completion clients.

use super::{CHAT_SERVICE, EMBEDDING_SERVICE};
use crate::config::ProviderConfig;
use crate::error::ConfigError;
use crate::traits::{Embedder, LanguageModel};
use crate::{ChatMessage, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use url::Url;

fn endpoint(base_url: &str, path: &str) -> Result<Url, ConfigError> {
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&base)
        .and_then(|base| base.join(path))
        .map_err(|error| ConfigError::Invalid(format!("invalid provider base_url {base_url}: {error}")))
}

fn http_client() -> Result<Client, ConfigError> {
    Client::builder()
        .build()
        .map_err(|error| ConfigError::Invalid(format!("failed to build HTTP client: {error}")))
}

fn normalize_key(api_key: Option<String>) -> Option<String> {
    api_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &Url,
    api_key: Option<&str>,
    service: &str,
    body: &T,
) -> Result<Response, ServiceError> {
    let api_key = api_key.ok_or_else(|| ServiceError::MissingCredential {
        service: service.to_string(),
    })?;

    let response = client
        .post(url.clone())
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|source| ServiceError::Http {
            service: service.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(ServiceError::Status {
            service: service.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Embeddings client. A missing key is reported per call, not at construction,
/// so a document can be registered before the key is known.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    url: Url,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &ProviderConfig, api_key: Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client()?,
            url: endpoint(&config.base_url, "embeddings")?,
            api_key: normalize_key(api_key),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
            batch_size: config.embedding_batch_size.max(1),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

fn vectors_from_response(
    mut parsed: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, ServiceError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(ServiceError::InvalidResponse {
            service: EMBEDDING_SERVICE.to_string(),
            details: format!("{} embeddings for {} inputs", parsed.data.len(), expected),
        });
    }

    parsed
        .data
        .into_iter()
        .map(|entry| {
            if entry.embedding.len() == dimensions {
                Ok(entry.embedding)
            } else {
                Err(ServiceError::InvalidResponse {
                    service: EMBEDDING_SERVICE.to_string(),
                    details: format!(
                        "embedding dimension {} != configured {}",
                        entry.embedding.len(),
                        dimensions
                    ),
                })
            }
        })
        .collect()
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = post_json(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            EMBEDDING_SERVICE,
            &request,
        )
        .await?;

        let parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|error| ServiceError::InvalidResponse {
                    service: EMBEDDING_SERVICE.to_string(),
                    details: error.to_string(),
                })?;

        vectors_from_response(parsed, inputs.len(), self.dimensions)
    }
}

#[derive(Clone)]
pub struct OpenAiChatModel {
    client: Client,
    url: Url,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: &ProviderConfig, api_key: Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client()?,
            url: endpoint(&config.base_url, "chat/completions")?,
            api_key: normalize_key(api_key),
            model: config.chat_model.clone(),
            temperature: config.temperature,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

fn answer_from_response(parsed: ChatResponse) -> Result<String, ServiceError> {
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ServiceError::InvalidResponse {
            service: CHAT_SERVICE.to_string(),
            details: "completion contained no answer text".to_string(),
        })
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: messages
                .iter()
                .map(|message| WireMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
        };

        let response = post_json(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            CHAT_SERVICE,
            &request,
        )
        .await?;

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|error| ServiceError::InvalidResponse {
                    service: CHAT_SERVICE.to_string(),
                    details: error.to_string(),
                })?;

        answer_from_response(parsed)
    }
}
