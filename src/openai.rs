//! Minimal OpenAI-compatible chat-completions client implementing `Oracle`.
//!
//! One `OpenAiOracle` per purpose: grading runs a JSON-mode client on the grading model,
//! hints run a plain-text client on the hint model. Both share one `reqwest::Client`.
//! Calls are instrumented and log model names, latencies and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::error::OracleError;
use crate::oracle::{ContentPart, Oracle, PromptMessage};

/// Connection settings shared by every model client.
#[derive(Clone)]
pub struct OpenAiEndpoint {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
}

impl OpenAiEndpoint {
  /// Construct the endpoint if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());

    let client = match reqwest::Client::builder().timeout(timeout).build() {
      Ok(c) => c,
      Err(e) => {
        error!(target: "tutor_backend", error = %e, "Failed to build HTTP client for OpenAI");
        return None;
      }
    };

    Some(Self { client, api_key, base_url })
  }
}

#[derive(Clone)]
pub struct OpenAiOracle {
  endpoint: OpenAiEndpoint,
  model: String,
  temperature: f32,
  json_mode: bool,
}

impl OpenAiOracle {
  pub fn new(endpoint: OpenAiEndpoint, model: impl Into<String>, temperature: f32) -> Self {
    Self { endpoint, model: model.into(), temperature, json_mode: false }
  }

  /// Ask the API for a JSON object. The sanitizer still runs on the result.
  pub fn json_mode(mut self) -> Self {
    self.json_mode = true;
    self
  }

  pub fn base_url(&self) -> &str { &self.endpoint.base_url }
}

#[async_trait]
impl Oracle for OpenAiOracle {
  #[instrument(level = "info", skip(self, messages), fields(model = %self.model, json_mode = self.json_mode, messages = messages.len()))]
  async fn complete(&self, messages: &[PromptMessage]) -> Result<String, OracleError> {
    let url = format!("{}/chat/completions", self.endpoint.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: messages.iter().map(to_request_message).collect(),
      temperature: self.temperature,
      response_format: self.json_mode.then(|| ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let start = Instant::now();
    let res = self.endpoint.client.post(&url)
      .header(USER_AGENT, "tutor-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.endpoint.api_key))
      .json(&req).send().await.map_err(|e| OracleError::Transport(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(OracleError::Http { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| OracleError::Decode(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default().trim().to_string();

    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Model response received");
    if text.is_empty() {
      return Err(OracleError::EmptyResponse);
    }
    Ok(text)
  }

  fn label(&self) -> &str { &self.model }
}

fn to_request_message(m: &PromptMessage) -> ChatMessageReq {
  let content = if m.has_image() {
    ChatContentReq::Parts(
      m.parts
        .iter()
        .map(|p| match p {
          ContentPart::Text(text) => ChatPartReq::Text { text: text.clone() },
          ContentPart::ImageUrl(url) => ChatPartReq::ImageUrl { image_url: ImageUrlReq { url: url.clone() } },
        })
        .collect(),
    )
  } else {
    ChatContentReq::Text(m.text())
  };
  ChatMessageReq { role: m.role.as_str().into(), content }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: ChatContentReq }
#[derive(Serialize)]
#[serde(untagged)]
enum ChatContentReq { Text(String), Parts(Vec<ChatPartReq>) }
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatPartReq {
  Text { text: String },
  ImageUrl { image_url: ImageUrlReq },
}
#[derive(Serialize)]
struct ImageUrlReq { url: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
