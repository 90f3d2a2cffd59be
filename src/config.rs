//! Loading tutor configuration (prompts, window size, scoring, syllabus path) from TOML.
//!
//! Every section and field is optional; missing values fall back to the defaults below.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TutorConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub window: WindowCfg,
  #[serde(default)]
  pub scoring: ScoringCfg,
  #[serde(default)]
  pub syllabus: SyllabusCfg,
  #[serde(default)]
  pub oracle: OracleCfg,
}

/// How much history is handed to the judge and the hint generator.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
  pub turns: usize,
}

impl Default for WindowCfg {
  fn default() -> Self { Self { turns: 6 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScoringCfg {
  pub reward: f64,
  pub penalty: f64,
}

impl Default for ScoringCfg {
  fn default() -> Self { Self { reward: 1.0, penalty: 0.25 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyllabusCfg {
  /// JSON file keyed by `class_<n>`.
  pub path: Option<String>,
  /// Character budget for the syllabus excerpt in grading prompts.
  pub char_budget: usize,
}

impl Default for SyllabusCfg {
  fn default() -> Self { Self { path: None, char_budget: 1000 } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OracleCfg {
  pub timeout_secs: u64,
  pub grading_temperature: f32,
  pub hint_temperature: f32,
}

impl Default for OracleCfg {
  fn default() -> Self { Self { timeout_secs: 20, grading_temperature: 0.0, hint_temperature: 0.3 } }
}

impl OracleCfg {
  pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs.max(1)) }
}

/// Prompt templates. `{placeholders}` are filled by `util::fill_template`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub grading_system: String,
  pub grading_user_template: String,
  pub hint_system: String,
  pub hint_user_template: String,
  /// Practice questions similar to `{question}`, one per line.
  pub similar_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      grading_system: "You are an expert grader for school math. Output EXACTLY one JSON object and nothing else: no prose, no markdown, no code fences.".into(),
      grading_user_template: "Syllabus for {class_level}:\n{syllabus}\n\nConversation (oldest first):\n{conversation}\n\nDecide whether the student's LAST message is a final answer to the problem being discussed. If it is, judge whether it is correct.\nReturn JSON: {\"final\": boolean, \"correct\": boolean, \"feedback\": string, \"correct_answer\": string or null}\nUse \"final\": false when the student is asking a question or still working.".into(),
      hint_system: "You are a friendly math tutor for school students. NEVER give the full final answer. Provide one short hint or one small next step.".into(),
      hint_user_template: "Student question: {question}\nPrevious context:\n{context}\nRespond concisely.".into(),
      similar_user_template: "Generate 2 short, simple, similar practice questions (one per line) for: {question}".into(),
    }
  }
}

/// Attempt to load `TutorConfig` from TUTOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_tutor_config_from_env() -> Option<TutorConfig> {
  let path = std::env::var("TUTOR_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<TutorConfig>(&s) {
      Ok(cfg) => {
        info!(target: "tutor_backend", %path, "Loaded tutor config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "tutor_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "tutor_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

/// Config from file (or defaults) with env overrides applied on top.
pub fn resolve_config() -> TutorConfig {
  let mut cfg = load_tutor_config_from_env().unwrap_or_default();
  if let Ok(path) = std::env::var("SYLLABUS_PATH") {
    cfg.syllabus.path = Some(path);
  }
  if let Some(secs) = std::env::var("OPENAI_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
    cfg.oracle.timeout_secs = secs;
  }
  cfg
}
