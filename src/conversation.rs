//! Message log (append-only, per session) and the bounded conversation window derived from it.
//!
//! Two messages racing on the same session are appended in whatever order the lock is
//! acquired; callers get no ordering guarantee beyond "sequence numbers never repeat".

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{ConversationTurn, Role, SessionId};
use crate::error::StoreError;

#[async_trait]
pub trait MessageLog: Send + Sync {
  /// Appends a turn and returns it with its assigned sequence number.
  async fn append(&self, session: SessionId, role: Role, text: Option<String>) -> Result<ConversationTurn, StoreError>;

  /// Last `n` turns, oldest first.
  async fn tail(&self, session: SessionId, n: usize) -> Result<Vec<ConversationTurn>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryMessageLog {
  sessions: RwLock<HashMap<SessionId, Vec<ConversationTurn>>>,
}

impl InMemoryMessageLog {
  pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
  async fn append(&self, session: SessionId, role: Role, text: Option<String>) -> Result<ConversationTurn, StoreError> {
    let mut sessions = self.sessions.write().await;
    let turns = sessions.entry(session).or_default();
    let sequence = turns.last().map(|t| t.sequence + 1).unwrap_or(1);
    let turn = ConversationTurn { role, text, sequence };
    turns.push(turn.clone());
    Ok(turn)
  }

  async fn tail(&self, session: SessionId, n: usize) -> Result<Vec<ConversationTurn>, StoreError> {
    let sessions = self.sessions.read().await;
    let turns = sessions.get(&session).map(Vec::as_slice).unwrap_or_default();
    Ok(turns[turns.len().saturating_sub(n)..].to_vec())
  }
}

/// The most recent turns of one session, oldest first. Rebuilt from the log on every request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationWindow {
  capacity: usize,
  turns: Vec<ConversationTurn>,
}

impl ConversationWindow {
  #[instrument(level = "debug", skip(log))]
  pub async fn load(log: &dyn MessageLog, session: SessionId, capacity: usize) -> Result<Self, StoreError> {
    let turns = log.tail(session, capacity).await?;
    debug!(target: "tutor_backend", loaded = turns.len(), "Conversation window loaded");
    Ok(Self { capacity, turns })
  }

  #[cfg(test)]
  pub fn from_turns(capacity: usize, mut turns: Vec<ConversationTurn>) -> Self {
    turns.sort_by_key(|t| t.sequence);
    let excess = turns.len().saturating_sub(capacity);
    turns.drain(..excess);
    Self { capacity, turns }
  }

  /// Writes through to the log, then slides the window.
  pub async fn append(
    &mut self,
    log: &dyn MessageLog,
    session: SessionId,
    role: Role,
    text: Option<String>,
  ) -> Result<ConversationTurn, StoreError> {
    let turn = log.append(session, role, text).await?;
    self.turns.push(turn.clone());
    if self.turns.len() > self.capacity {
      self.turns.remove(0);
    }
    Ok(turn)
  }

  /// Last `n` turns in chronological order; fewer if the history is shorter.
  pub fn recent(&self, n: usize) -> &[ConversationTurn] {
    &self.turns[self.turns.len().saturating_sub(n)..]
  }

  /// Number of log entries in the window, blank ones included.
  pub fn len(&self) -> usize { self.turns.len() }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool { self.turns.is_empty() }

  /// Role-tagged lines for the last `capacity` turns, blank turns skipped.
  pub fn transcript(&self) -> String {
    self
      .recent(self.capacity)
      .iter()
      .filter_map(|t| t.context_text().map(|text| format!("{}: {}", t.role.label(), text)))
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn last_student_text(&self) -> Option<&str> {
    self.recent(self.capacity).iter().rev().filter(|t| t.role == Role::Student).find_map(|t| t.context_text())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn seeded_log(session: SessionId, n: usize) -> InMemoryMessageLog {
    let log = InMemoryMessageLog::new();
    for i in 1..=n {
      let role = if i % 2 == 1 { Role::Student } else { Role::Tutor };
      log.append(session, role, Some(format!("T{i}"))).await.unwrap();
    }
    log
  }

  #[tokio::test]
  async fn recent_six_of_ten_is_t5_to_t10() {
    let session = SessionId::new();
    let log = seeded_log(session, 10).await;
    let window = ConversationWindow::load(&log, session, 10).await.unwrap();

    let texts: Vec<_> = window.recent(6).iter().map(|t| t.text.clone().unwrap()).collect();
    assert_eq!(texts, ["T5", "T6", "T7", "T8", "T9", "T10"]);
  }

  #[tokio::test]
  async fn transcript_covers_only_the_recent_turns() {
    let session = SessionId::new();
    let log = seeded_log(session, 10).await;
    let mut window = ConversationWindow::load(&log, session, 6).await.unwrap();
    assert_eq!(window.transcript(), "Student: T5\nTutor: T6\nStudent: T7\nTutor: T8\nStudent: T9\nTutor: T10");

    window.append(&log, session, Role::Student, Some("T11".into())).await.unwrap();
    assert!(!window.transcript().contains("T5"));
    assert!(window.transcript().ends_with("Student: T11"));
    assert_eq!(window.last_student_text(), Some("T11"));
  }

  #[tokio::test]
  async fn short_history_returns_everything_without_error() {
    let session = SessionId::new();
    let log = seeded_log(session, 3).await;
    let window = ConversationWindow::load(&log, session, 8).await.unwrap();
    assert_eq!(window.recent(8).len(), 3);
    assert_eq!(window.recent(0).len(), 0);

    let empty = ConversationWindow::load(&log, SessionId::new(), 8).await.unwrap();
    assert!(empty.is_empty());
    assert!(empty.recent(5).is_empty());
  }

  #[tokio::test]
  async fn sequence_numbers_are_monotonic_per_session() {
    let a = SessionId::new();
    let b = SessionId::new();
    let log = InMemoryMessageLog::new();
    let a1 = log.append(a, Role::Student, Some("x".into())).await.unwrap();
    let b1 = log.append(b, Role::Student, Some("y".into())).await.unwrap();
    let a2 = log.append(a, Role::Tutor, None).await.unwrap();
    assert_eq!((a1.sequence, a2.sequence, b1.sequence), (1, 2, 1));
  }

  #[tokio::test]
  async fn blank_turns_count_but_are_not_in_transcript() {
    let session = SessionId::new();
    let log = InMemoryMessageLog::new();
    log.append(session, Role::Student, Some("what is 3 x 4?".into())).await.unwrap();
    log.append(session, Role::Student, None).await.unwrap();
    log.append(session, Role::Tutor, Some("   ".into())).await.unwrap();
    log.append(session, Role::Student, Some("12".into())).await.unwrap();

    let window = ConversationWindow::load(&log, session, 6).await.unwrap();
    assert_eq!(window.len(), 4);
    assert_eq!(window.transcript(), "Student: what is 3 x 4?\nStudent: 12");
    assert_eq!(window.last_student_text(), Some("12"));
  }

  #[tokio::test]
  async fn append_slides_the_window() {
    let session = SessionId::new();
    let log = seeded_log(session, 3).await;
    let mut window = ConversationWindow::load(&log, session, 3).await.unwrap();
    let turn = window.append(&log, session, Role::Student, Some("T4".into())).await.unwrap();

    assert_eq!(turn.sequence, 4);
    let seqs: Vec<_> = window.recent(window.len()).iter().map(|t| t.sequence).collect();
    assert_eq!(seqs, [2, 3, 4]);
    assert_eq!(log.tail(session, 100).await.unwrap().len(), 4);
  }

  #[test]
  fn from_turns_orders_and_bounds() {
    let turns = (1..=5)
      .rev()
      .map(|i| ConversationTurn { role: Role::Student, text: Some(format!("T{i}")), sequence: i })
      .collect();
    let window = ConversationWindow::from_turns(2, turns);
    let seqs: Vec<_> = window.recent(window.len()).iter().map(|t| t.sequence).collect();
    assert_eq!(seqs, [4, 5]);
  }
}
