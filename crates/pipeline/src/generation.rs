//! Content generation collaborator
//!
//! Turns a paper's title, authors and abstract into a long-form Markdown blog
//! post through an OpenAI-compatible chat completions endpoint.

use crate::errors::GenerationError;
use async_trait::async_trait;
use scholarlink_common::config::GenerationConfig;
use scholarlink_common::db::models::Paper;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What the generator gets to see about a paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub title: String,
    pub author: String,
    pub abstract_text: String,
}

impl From<&Paper> for GenerationRequest {
    fn from(paper: &Paper) -> Self {
        Self {
            title: paper.title.clone(),
            author: paper.author.clone(),
            abstract_text: paper.abstract_text.clone(),
        }
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}

pub fn build_prompt(request: &GenerationRequest) -> String {
    format!(
        "Write a detailed blog post about the following research paper, formatted as Markdown. \
         The post should cover:\n\
         1. Introduction and background\n\
         2. Main research questions and contributions\n\
         3. Technical approach and what is novel about it\n\
         4. Experimental results and findings\n\
         5. Summary and outlook\n\n\
         Paper details:\n\
         Title: {}\n\
         Authors: {}\n\
         Abstract: {}\n\n\
         Produce a well-structured, informative article in Markdown.",
        request.title, request.author, request.abstract_text
    )
}

/// OpenAI-compatible chat completions client (DeepSeek by default)
pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ChatCompletionGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::NotConfigured("generation.api_key is not set".to_string())
            })?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ContentGenerator for ChatCompletionGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let prompt = build_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            let error = GenerationError::from_status(status.as_u16(), error_detail(&text));
            warn!(status = status.as_u16(), error = %error, "Generation request rejected");
            return Err(error);
        }

        let content = parse_completion(&text)?;
        debug!(chars = content.len(), "Generated content");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// `choices[0].message.content` of a chat completion body
fn parse_completion(body: &str) -> Result<String, GenerationError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| GenerationError::InvalidResponse("no content in first choice".to_string()))
}

/// Provider's `error.message` (or `error.type`), falling back to the raw body
fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message.or(error.kind))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Offline generator producing a fixed-shape Markdown summary
pub struct MockGenerator;

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        Ok(format!(
            "# {}\n\n*{}*\n\n## Summary\n\n{}\n",
            request.title, request.author, request.abstract_text
        ))
    }

    fn model_name(&self) -> &str {
        "mock-generator"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn ContentGenerator>, GenerationError> {
    match config.provider.as_str() {
        "openai" | "deepseek" => Ok(Arc::new(ChatCompletionGenerator::new(config)?)),
        "mock" => Ok(Arc::new(MockGenerator)),
        other => Err(GenerationError::NotConfigured(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}
