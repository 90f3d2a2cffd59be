//! One grading round: compose the prompt, ask the oracle once, sanitize the answer.
//!
//! The judge never fails. Oracle errors and unusable output both come back as the
//! sentinel verdict so the hint path is never blocked on grading.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::conversation::ConversationWindow;
use crate::domain::{ClassLevel, GradingVerdict};
use crate::oracle::Oracle;
use crate::prompt::PromptComposer;
use crate::sanitizer::sanitize_with_stage;
use crate::syllabus::SyllabusTopics;

#[derive(Clone)]
pub struct AnswerJudge {
  oracle: Arc<dyn Oracle>,
  composer: PromptComposer,
}

impl AnswerJudge {
  pub fn new(oracle: Arc<dyn Oracle>, composer: PromptComposer) -> Self {
    Self { oracle, composer }
  }

  #[instrument(level = "info", skip(self, window, class_topics), fields(oracle = %self.oracle.label(), turns = window.len(), has_syllabus = class_topics.is_some()))]
  pub async fn judge(
    &self,
    window: &ConversationWindow,
    class_level: ClassLevel,
    class_topics: Option<&SyllabusTopics>,
  ) -> GradingVerdict {
    if window.last_student_text().is_none() {
      return GradingVerdict::InProgress { feedback: String::new() };
    }

    let messages = self.composer.build_grading_prompt(window, class_level, class_topics);
    let raw = match self.oracle.complete(&messages).await {
      Ok(text) => text,
      Err(e) => {
        warn!(target: "grading", error = %e, "Oracle call failed during grading; using sentinel verdict");
        return GradingVerdict::sentinel(String::new());
      }
    };

    let (verdict, stage) = sanitize_with_stage(&raw);
    info!(target: "grading", ?stage, is_final = verdict.is_final(), is_correct = verdict.is_correct(), "Grading round finished");
    verdict
  }
}
