//! Prompt construction for grading and hints. Pure functions over config and inputs.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::Prompts;
use crate::conversation::ConversationWindow;
use crate::domain::ClassLevel;
use crate::oracle::PromptMessage;
use crate::syllabus::SyllabusTopics;
use crate::util::fill_template;

const NO_SYLLABUS: &str = "(no syllabus available for this class)";
const NO_MESSAGES: &str = "(no messages yet)";

/// An image attached to a student message, already validated as base64.
#[derive(Clone, Debug, PartialEq)]
pub struct HintImage {
  mime: String,
  data: String,
}

impl HintImage {
  /// Accepts raw base64 or a `data:<mime>;base64,` URL. Defaults to `image/png`.
  pub fn from_base64(mime: Option<&str>, payload: &str) -> Result<Self, base64::DecodeError> {
    let payload = payload.trim();
    let (url_mime, data) = match payload.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
      Some((m, d)) => (Some(m), d),
      None => (None, payload),
    };
    STANDARD.decode(data)?;
    let mime = mime.or(url_mime).filter(|m| m.starts_with("image/")).unwrap_or("image/png");
    Ok(Self { mime: mime.to_string(), data: data.to_string() })
  }

  pub fn data_url(&self) -> String {
    format!("data:{};base64,{}", self.mime, self.data)
  }
}

#[derive(Clone, Debug)]
pub struct PromptComposer {
  prompts: Prompts,
  syllabus_budget: usize,
}

impl PromptComposer {
  pub fn new(prompts: Prompts, syllabus_budget: usize) -> Self {
    Self { prompts, syllabus_budget }
  }

  pub fn build_grading_prompt(
    &self,
    conversation: &ConversationWindow,
    class_level: ClassLevel,
    class_topics: Option<&SyllabusTopics>,
  ) -> Vec<PromptMessage> {
    let syllabus = class_topics
      .map(|t| t.excerpt(self.syllabus_budget))
      .filter(|s| !s.is_empty())
      .unwrap_or_else(|| NO_SYLLABUS.to_string());
    let transcript = conversation.transcript();
    let transcript = if transcript.is_empty() { NO_MESSAGES.to_string() } else { transcript };
    let class_label = class_level.key();

    let user = fill_template(
      &self.prompts.grading_user_template,
      &[("class_level", class_label.as_str()), ("syllabus", syllabus.as_str()), ("conversation", transcript.as_str())],
    );
    vec![PromptMessage::system(self.prompts.grading_system.clone()), PromptMessage::user(user)]
  }

  pub fn build_hint_prompt(&self, question: &str, context: &str, image: Option<&HintImage>) -> Vec<PromptMessage> {
    let context = if context.trim().is_empty() { NO_MESSAGES } else { context };
    let user = fill_template(&self.prompts.hint_user_template, &[("question", question), ("context", context)]);
    let mut user = PromptMessage::user(user);
    if let Some(img) = image {
      user = user.with_image(img.data_url());
    }
    vec![PromptMessage::system(self.prompts.hint_system.clone()), user]
  }

  pub fn build_similar_prompt(&self, question: &str) -> Vec<PromptMessage> {
    vec![PromptMessage::user(fill_template(&self.prompts.similar_user_template, &[("question", question)]))]
  }
}
