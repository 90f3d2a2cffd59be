//! The language-model oracle seam: prompt messages in, free-form text out.
//!
//! Implementations: `openai::OpenAiOracle` (chat completions) and `UnavailableOracle`
//! (no API key configured). Callers must treat every `Err` as a degradable failure.

use async_trait::async_trait;

use crate::error::OracleError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptRole {
  System,
  User,
}

impl PromptRole {
  pub fn as_str(self) -> &'static str {
    match self {
      PromptRole::System => "system",
      PromptRole::User => "user",
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContentPart {
  Text(String),
  /// `data:<mime>;base64,<payload>` or a remote URL.
  ImageUrl(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PromptMessage {
  pub role: PromptRole,
  pub parts: Vec<ContentPart>,
}

impl PromptMessage {
  pub fn system(text: impl Into<String>) -> Self {
    Self { role: PromptRole::System, parts: vec![ContentPart::Text(text.into())] }
  }

  pub fn user(text: impl Into<String>) -> Self {
    Self { role: PromptRole::User, parts: vec![ContentPart::Text(text.into())] }
  }

  pub fn with_image(mut self, url: impl Into<String>) -> Self {
    self.parts.push(ContentPart::ImageUrl(url.into()));
    self
  }

  /// Concatenated text parts.
  pub fn text(&self) -> String {
    self
      .parts
      .iter()
      .filter_map(|p| match p {
        ContentPart::Text(t) => Some(t.as_str()),
        ContentPart::ImageUrl(_) => None,
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn has_image(&self) -> bool {
    self.parts.iter().any(|p| matches!(p, ContentPart::ImageUrl(_)))
  }
}

#[async_trait]
pub trait Oracle: Send + Sync {
  async fn complete(&self, messages: &[PromptMessage]) -> Result<String, OracleError>;

  /// Short label for logs (model name or kind).
  fn label(&self) -> &str;
}

/// Used when no model endpoint is configured; every call fails with `Unavailable`.
#[derive(Clone, Debug, Default)]
pub struct UnavailableOracle;

#[async_trait]
impl Oracle for UnavailableOracle {
  async fn complete(&self, _messages: &[PromptMessage]) -> Result<String, OracleError> {
    Err(OracleError::Unavailable)
  }

  fn label(&self) -> &str { "unavailable" }
}
