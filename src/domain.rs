//! Domain models: identifiers, conversation turns, grading verdicts and student counters.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Feedback text carried by the sentinel verdict.
pub const SENTINEL_FEEDBACK: &str = "Error or invalid JSON";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

impl fmt::Display for StudentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for StudentId {
  fn from(s: &str) -> Self { StudentId(s.to_string()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
  pub fn new() -> Self { SessionId(Uuid::new_v4()) }
}

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Who authored a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Student,
  Tutor,
}

impl Role {
  pub fn label(self) -> &'static str {
    match self {
      Role::Student => "Student",
      Role::Tutor => "Tutor",
    }
  }
}

/// One entry of a session's message log. Never mutated after the log hands it out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
  pub role: Role,
  /// Absent for image-only messages.
  #[serde(default)]
  pub text: Option<String>,
  pub sequence: u64,
}

impl ConversationTurn {
  /// Text that contributes to prompt context; `None` for blank turns.
  pub fn context_text(&self) -> Option<&str> {
    self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
  }
}

/// Outcome of one grading round.
#[derive(Clone, Debug, PartialEq)]
pub enum GradingVerdict {
  /// The student has not committed to an answer yet.
  InProgress { feedback: String },
  /// A final answer was judged.
  Final {
    correct: bool,
    feedback: String,
    correct_answer: Option<String>,
  },
  /// Nothing structured could be recovered from the model output.
  Unreadable { raw: String },
}

impl GradingVerdict {
  pub fn sentinel(raw: impl Into<String>) -> Self {
    GradingVerdict::Unreadable { raw: raw.into() }
  }

  pub fn is_final(&self) -> bool {
    matches!(self, GradingVerdict::Final { .. })
  }

  pub fn is_correct(&self) -> bool {
    matches!(self, GradingVerdict::Final { correct: true, .. })
  }

  pub fn is_sentinel(&self) -> bool {
    matches!(self, GradingVerdict::Unreadable { .. })
  }

  pub fn feedback(&self) -> &str {
    match self {
      GradingVerdict::InProgress { feedback } | GradingVerdict::Final { feedback, .. } => feedback,
      GradingVerdict::Unreadable { .. } => SENTINEL_FEEDBACK,
    }
  }

  pub fn correct_answer(&self) -> Option<&str> {
    match self {
      GradingVerdict::Final { correct_answer, .. } => correct_answer.as_deref(),
      _ => None,
    }
  }
}

/// Per-student counters as persisted by the user store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentCounters {
  pub total_attempts: u64,
  pub correct_attempts: u64,
  pub score: f64,
  pub current_streak: u32,
  pub max_streak: u32,
}

/// Broken counter invariant. Reaching this means the ledger or a store is buggy.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
  #[error("correct_attempts ({correct}) exceeds total_attempts ({total})")]
  CorrectExceedsTotal { correct: u64, total: u64 },
  #[error("counter {field} would become negative")]
  NegativeCounter { field: &'static str },
  #[error("current_streak ({current}) exceeds max_streak ({max})")]
  StreakExceedsMax { current: u32, max: u32 },
  #[error("score is not a finite number")]
  NonFiniteScore,
}

impl StudentCounters {
  /// Structural invariants. The score floor is eventually consistent and not checked here.
  pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
    if self.correct_attempts > self.total_attempts {
      return Err(InvariantViolation::CorrectExceedsTotal {
        correct: self.correct_attempts,
        total: self.total_attempts,
      });
    }
    if self.current_streak > self.max_streak {
      return Err(InvariantViolation::StreakExceedsMax { current: self.current_streak, max: self.max_streak });
    }
    if !self.score.is_finite() {
      return Err(InvariantViolation::NonFiniteScore);
    }
    Ok(())
  }

  pub fn accuracy(&self) -> f64 {
    if self.total_attempts == 0 { 0.0 } else { self.correct_attempts as f64 / self.total_attempts as f64 }
  }

  /// Counters with the score raised to `min` if it is below it. Absolute, so applying it twice is harmless.
  pub fn floored(&self, min: f64) -> StudentCounters {
    StudentCounters { score: self.score.max(min), ..self.clone() }
  }

  /// Apply a relative delta. Stores call this inside their own atomic section.
  pub fn with_delta(&self, delta: &CounterDelta) -> Result<StudentCounters, InvariantViolation> {
    let total_attempts = add_signed(self.total_attempts, delta.total_attempts, "total_attempts")?;
    let correct_attempts = add_signed(self.correct_attempts, delta.correct_attempts, "correct_attempts")?;
    let (current_streak, max_streak) = match delta.streak {
      StreakChange::Keep => (self.current_streak, self.max_streak),
      StreakChange::Reset => (0, self.max_streak),
      StreakChange::Extend => {
        let current = self.current_streak.saturating_add(1);
        (current, self.max_streak.max(current))
      }
    };
    let next = StudentCounters {
      total_attempts,
      correct_attempts,
      score: self.score + delta.score,
      current_streak,
      max_streak,
    };
    next.check_invariants()?;
    Ok(next)
  }
}

fn add_signed(base: u64, delta: i64, field: &'static str) -> Result<u64, InvariantViolation> {
  if delta >= 0 {
    Ok(base.saturating_add(delta as u64))
  } else {
    base.checked_sub(delta.unsigned_abs()).ok_or(InvariantViolation::NegativeCounter { field })
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
  #[default]
  Keep,
  Extend,
  Reset,
}

/// A relative change to a student's counters, applied by the store in one atomic step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterDelta {
  pub total_attempts: i64,
  pub correct_attempts: i64,
  pub score: f64,
  pub streak: StreakChange,
}

impl CounterDelta {
  pub fn correct_answer(reward: f64) -> Self {
    CounterDelta { total_attempts: 1, correct_attempts: 1, score: reward, streak: StreakChange::Extend }
  }

  pub fn wrong_answer(penalty: f64) -> Self {
    CounterDelta { total_attempts: 1, correct_attempts: 0, score: -penalty, streak: StreakChange::Reset }
  }
}

/// Class level used to look up the syllabus, e.g. `class_5`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLevel(pub u8);

impl Default for ClassLevel {
  /// Guests are treated as class 5.
  fn default() -> Self { ClassLevel(5) }
}

impl ClassLevel {
  /// Accepts `class_5`, `5`, `Grade 5`, ...; `None` without a positive number.
  pub fn parse(raw: &str) -> Option<Self> {
    let digits: String = raw
      .chars()
      .skip_while(|c| !c.is_ascii_digit())
      .take_while(|c| c.is_ascii_digit())
      .collect();
    digits.parse::<u8>().ok().filter(|n| *n > 0).map(ClassLevel)
  }

  /// Like `parse`, falling back to the default level.
  pub fn parse_lenient(raw: &str) -> Self {
    Self::parse(raw).unwrap_or_default()
  }

  pub fn key(self) -> String { format!("class_{}", self.0) }
}

impl fmt::Display for ClassLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "class_{}", self.0) }
}

/// A chat session owned by one student.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
  pub session_id: SessionId,
  pub student_id: StudentId,
  pub class_level: ClassLevel,
  pub title: Option<String>,
}
