//! Tutor replies: a partial hint from the oracle, or a local fallback when it is unavailable.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::conversation::ConversationWindow;
use crate::oracle::Oracle;
use crate::prompt::{HintImage, PromptComposer};

const MAX_SIMILAR: usize = 3;

#[derive(Clone)]
pub struct HintGenerator {
  oracle: Arc<dyn Oracle>,
  composer: PromptComposer,
}

impl HintGenerator {
  pub fn new(oracle: Arc<dyn Oracle>, composer: PromptComposer) -> Self {
    Self { oracle, composer }
  }

  /// Always returns some text; oracle failures fall back to a canned hint.
  #[instrument(level = "info", skip(self, question, window, image), fields(oracle = %self.oracle.label(), question_len = question.len(), has_image = image.is_some()))]
  pub async fn reply(&self, question: &str, window: &ConversationWindow, image: Option<&HintImage>) -> String {
    let messages = self.composer.build_hint_prompt(question, &window.transcript(), image);
    match self.oracle.complete(&messages).await {
      Ok(text) if !text.trim().is_empty() => {
        debug!(target: "tutor_backend", reply_len = text.len(), "Hint via oracle");
        text.trim().to_string()
      }
      Ok(_) => {
        error!(target: "tutor_backend", "Oracle returned an empty hint; using local hint.");
        hint_local(question, image.is_some())
      }
      Err(e) => {
        error!(target: "tutor_backend", error = %e, "Oracle hint failed; using local hint.");
        hint_local(question, image.is_some())
      }
    }
  }

  /// Practice questions like `question`; empty when the oracle fails.
  #[instrument(level = "info", skip(self, question), fields(oracle = %self.oracle.label(), question_len = question.len()))]
  pub async fn similar(&self, question: &str) -> Vec<String> {
    let messages = self.composer.build_similar_prompt(question);
    match self.oracle.complete(&messages).await {
      Ok(text) => {
        let items = similar_lines(&text);
        debug!(target: "tutor_backend", count = items.len(), "Similar questions via oracle");
        items
      }
      Err(e) => {
        warn!(target: "tutor_backend", error = %e, "Oracle similar-questions call failed; returning none.");
        Vec::new()
      }
    }
  }
}

/// Non-blank lines with list markers (`1.`, `2)`, `-`, `*`) removed, at most `MAX_SIMILAR`.
fn similar_lines(text: &str) -> Vec<String> {
  text
    .lines()
    .map(|line| {
      let line = line.trim();
      let unnumbered = line.trim_start_matches(|c: char| c.is_ascii_digit());
      let line = match unnumbered.strip_prefix(['.', ')']) {
        Some(rest) if unnumbered.len() < line.len() => rest,
        _ => line,
      };
      line.trim_start_matches(['-', '*', '•']).trim().to_string()
    })
    .filter(|l| !l.is_empty())
    .take(MAX_SIMILAR)
    .collect()
}

fn hint_local(question: &str, has_image: bool) -> String {
  if question.trim().is_empty() && has_image {
    "I got your picture! Tell me which part of the problem you are stuck on, and we will work through it step by step.".into()
  } else if question.chars().any(|c| c.is_ascii_digit()) {
    "Let's slow down: write down what the problem gives you and what it asks for, then try the first small step.".into()
  } else {
    "Good question! Try restating the problem in your own words, then tell me the first step you would take.".into()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Prompts;
  use crate::error::OracleError;
  use crate::oracle::testing::ScriptedOracle;

  fn generator(oracle: Arc<dyn Oracle>) -> HintGenerator {
    HintGenerator::new(oracle, PromptComposer::new(Prompts::default(), 1000))
  }

  #[tokio::test]
  async fn oracle_hint_is_trimmed() {
    let oracle = Arc::new(ScriptedOracle::replying("  Try splitting 8 into 4 + 4.\n"));
    let text = generator(oracle.clone()).reply("what is 7 x 8?", &ConversationWindow::default(), None).await;
    assert_eq!(text, "Try splitting 8 into 4 + 4.");
    assert_eq!(oracle.call_count(), 1);
  }

  #[tokio::test]
  async fn failures_fall_back_to_local_hint() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
      Err(OracleError::Transport("timeout".into())),
      Ok("   ".into()),
    ]));
    let g = generator(oracle);
    let first = g.reply("what is 7 x 8?", &ConversationWindow::default(), None).await;
    let second = g.reply("how do fractions work", &ConversationWindow::default(), None).await;
    assert!(first.starts_with("Let's slow down"));
    assert!(second.starts_with("Good question!"));
  }

  #[tokio::test]
  async fn image_only_question_gets_image_fallback() {
    let g = generator(Arc::new(crate::oracle::UnavailableOracle));
    let img = HintImage::from_base64(None, "aGVsbG8=").unwrap();
    let text = g.reply("", &ConversationWindow::default(), Some(&img)).await;
    assert!(text.contains("picture"));
  }

  #[tokio::test]
  async fn similar_questions_are_split_and_capped() {
    let oracle = Arc::new(ScriptedOracle::replying("1. What is 6 x 7?\n\n2) What is 8 x 7?\n- What is 9 x 7?\n* What is 3 x 7?"));
    let items = generator(oracle).similar("What is 7 x 7?").await;
    assert_eq!(items, ["What is 6 x 7?", "What is 8 x 7?", "What is 9 x 7?"]);
  }

  #[tokio::test]
  async fn similar_questions_fall_back_to_none() {
    let items = generator(Arc::new(crate::oracle::UnavailableOracle)).similar("What is 7 x 7?").await;
    assert!(items.is_empty());
  }

  #[test]
  fn numbers_inside_questions_survive_marker_stripping() {
    assert_eq!(similar_lines("12 apples minus 5?"), ["12 apples minus 5?"]);
  }
}
