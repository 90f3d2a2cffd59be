//! Score ledger: turns final verdicts into counter deltas against the user store.
//!
//! Deltas are applied by the store inside one atomic step, never read-modify-write here,
//! so concurrent applies for the same student cannot lose updates. The score floor is a
//! follow-up step, re-checked after every apply.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::config::ScoringCfg;
use crate::domain::{CounterDelta, GradingVerdict, StudentCounters, StudentId};
use crate::error::{LedgerError, StoreError};

#[async_trait]
pub trait UserStore: Send + Sync {
  /// Creates zeroed counters for a new student.
  async fn register(&self, student: &StudentId) -> Result<StudentCounters, StoreError>;

  async fn read(&self, student: &StudentId) -> Result<StudentCounters, StoreError>;

  /// Applies `delta` atomically and returns the counters after the update.
  async fn apply_delta(&self, student: &StudentId, delta: &CounterDelta) -> Result<StudentCounters, StoreError>;

  /// Raises the score to `min` if it is below it, as one conditional absolute write.
  ///
  /// Never emulate this with `read` plus a relative delta: two racing clamps would both add
  /// the correction and leave the score above the floor.
  async fn floor_score(&self, student: &StudentId, min: f64) -> Result<StudentCounters, StoreError>;
}

#[derive(Default)]
pub struct InMemoryUserStore {
  students: RwLock<HashMap<StudentId, StudentCounters>>,
}

impl InMemoryUserStore {
  pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
  async fn register(&self, student: &StudentId) -> Result<StudentCounters, StoreError> {
    let mut students = self.students.write().await;
    if students.contains_key(student) {
      return Err(StoreError::AlreadyRegistered(student.clone()));
    }
    let counters = StudentCounters::default();
    students.insert(student.clone(), counters.clone());
    Ok(counters)
  }

  async fn read(&self, student: &StudentId) -> Result<StudentCounters, StoreError> {
    self.students.read().await.get(student).cloned().ok_or_else(|| StoreError::UnknownStudent(student.clone()))
  }

  async fn apply_delta(&self, student: &StudentId, delta: &CounterDelta) -> Result<StudentCounters, StoreError> {
    let mut students = self.students.write().await;
    let entry = students.get_mut(student).ok_or_else(|| StoreError::UnknownStudent(student.clone()))?;
    let next = entry.with_delta(delta)?;
    *entry = next.clone();
    Ok(next)
  }

  async fn floor_score(&self, student: &StudentId, min: f64) -> Result<StudentCounters, StoreError> {
    let mut students = self.students.write().await;
    let entry = students.get_mut(student).ok_or_else(|| StoreError::UnknownStudent(student.clone()))?;
    *entry = entry.floored(min);
    Ok(entry.clone())
  }
}

/// Result of one `apply`.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerOutcome {
  /// Verdict was not final; nothing was written.
  Skipped,
  Applied(StudentCounters),
}

#[derive(Clone)]
pub struct ScoreLedger {
  store: Arc<dyn UserStore>,
  scoring: ScoringCfg,
}

impl ScoreLedger {
  pub const SCORE_FLOOR: f64 = 0.0;

  pub fn new(store: Arc<dyn UserStore>, scoring: ScoringCfg) -> Self {
    Self { store, scoring }
  }

  pub fn store(&self) -> &Arc<dyn UserStore> { &self.store }

  #[instrument(level = "info", skip(self, student, verdict), fields(%student, is_final = verdict.is_final(), is_correct = verdict.is_correct()))]
  pub async fn apply(&self, student: &StudentId, verdict: &GradingVerdict) -> Result<LedgerOutcome, LedgerError> {
    let delta = match verdict {
      GradingVerdict::Final { correct: true, .. } => CounterDelta::correct_answer(self.scoring.reward),
      GradingVerdict::Final { correct: false, .. } => CounterDelta::wrong_answer(self.scoring.penalty),
      GradingVerdict::InProgress { .. } | GradingVerdict::Unreadable { .. } => return Ok(LedgerOutcome::Skipped),
    };

    let after = self.store.apply_delta(student, &delta).await.map_err(|e| self.report(student, e.into()))?;
    let after = if after.score < Self::SCORE_FLOOR {
      self.store.floor_score(student, Self::SCORE_FLOOR).await.map_err(|e| self.report(student, e.into()))?
    } else {
      after
    };

    if let Err(violation) = after.check_invariants() {
      return Err(self.report(student, LedgerError::Invariant(violation)));
    }

    info!(target: "ledger", total = after.total_attempts, correct = after.correct_attempts, score = after.score, streak = after.current_streak, "Counters updated");
    Ok(LedgerOutcome::Applied(after))
  }

  fn report(&self, student: &StudentId, err: LedgerError) -> LedgerError {
    match &err {
      LedgerError::Store(e) => {
        warn!(target: "ledger", %student, error = %e, retryable = true, "Ledger apply failed; progress not recorded");
      }
      LedgerError::Invariant(v) => {
        error!(target: "ledger", %student, violation = %v, "Ledger invariant violated");
        debug_assert!(false, "ledger invariant violated for {student}: {v}");
      }
    }
    err
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn final_verdict(correct: bool) -> GradingVerdict {
    GradingVerdict::Final { correct, feedback: String::new(), correct_answer: None }
  }

  async fn ledger_with_student(id: &str) -> (ScoreLedger, StudentId) {
    let store = Arc::new(InMemoryUserStore::new());
    let student = StudentId::from(id);
    store.register(&student).await.unwrap();
    (ScoreLedger::new(store, ScoringCfg::default()), student)
  }

  #[tokio::test]
  async fn non_final_verdicts_are_no_ops() {
    let (ledger, student) = ledger_with_student("s1").await;
    for v in [GradingVerdict::sentinel("I think the answer might be 5"), GradingVerdict::InProgress { feedback: "hm".into() }] {
      assert_eq!(ledger.apply(&student, &v).await.unwrap(), LedgerOutcome::Skipped);
    }
    assert_eq!(ledger.store().read(&student).await.unwrap(), StudentCounters::default());
  }

  #[tokio::test]
  async fn correct_answer_rewards_and_extends_streak() {
    let (ledger, student) = ledger_with_student("s1").await;
    let LedgerOutcome::Applied(c) = ledger.apply(&student, &final_verdict(true)).await.unwrap() else {
      panic!("expected an applied outcome");
    };
    assert_eq!((c.total_attempts, c.correct_attempts, c.current_streak, c.max_streak), (1, 1, 1, 1));
    assert_eq!(c.score, 1.0);
  }

  #[tokio::test]
  async fn wrong_answer_penalizes_with_floor_at_zero() {
    let (ledger, student) = ledger_with_student("s1").await;
    ledger.apply(&student, &final_verdict(true)).await.unwrap();
    ledger.apply(&student, &final_verdict(false)).await.unwrap();
    let c = ledger.store().read(&student).await.unwrap();
    assert_eq!(c.score, 0.75);
    assert_eq!(c.current_streak, 0);

    for _ in 0..10 {
      ledger.apply(&student, &final_verdict(false)).await.unwrap();
    }
    let c = ledger.store().read(&student).await.unwrap();
    assert_eq!(c.score, 0.0);
    assert_eq!(c.total_attempts, 12);
    assert_eq!(c.correct_attempts, 1);
    assert_eq!(c.max_streak, 1);
  }

  #[tokio::test]
  async fn penalty_on_fresh_student_stays_at_zero() {
    let (ledger, student) = ledger_with_student("s1").await;
    let LedgerOutcome::Applied(c) = ledger.apply(&student, &final_verdict(false)).await.unwrap() else {
      panic!("expected an applied outcome");
    };
    assert_eq!(c.score, 0.0);
    assert_eq!((c.total_attempts, c.correct_attempts), (1, 0));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_final_verdicts_are_all_counted() {
    let (ledger, student) = ledger_with_student("s1").await;
    let n = 64;
    let handles: Vec<_> = (0..n)
      .map(|i| {
        let ledger = ledger.clone();
        let student = student.clone();
        tokio::spawn(async move { ledger.apply(&student, &final_verdict(i % 4 != 0)).await })
      })
      .collect();
    for h in handles {
      h.await.unwrap().unwrap();
    }

    let c = ledger.store().read(&student).await.unwrap();
    assert_eq!(c.total_attempts, n);
    assert_eq!(c.correct_attempts, 48);
    assert!(c.correct_attempts <= c.total_attempts);
    assert!(c.score >= 0.0);
  }

  #[tokio::test]
  async fn mixed_sequences_keep_invariants() {
    let (ledger, student) = ledger_with_student("s1").await;
    let pattern = [false, false, true, false, true, true, false, false, false, true, false];
    for correct in pattern {
      ledger.apply(&student, &final_verdict(correct)).await.unwrap();
      let c = ledger.store().read(&student).await.unwrap();
      assert!(c.score >= 0.0);
      assert!(c.correct_attempts <= c.total_attempts);
      assert!(c.check_invariants().is_ok());
    }
  }

  #[tokio::test]
  async fn unknown_student_is_a_retryable_store_error() {
    let ledger = ScoreLedger::new(Arc::new(InMemoryUserStore::new()), ScoringCfg::default());
    let err = ledger.apply(&StudentId::from("ghost"), &final_verdict(true)).await.unwrap_err();
    assert!(err.is_retryable());
  }

  struct CorruptStore;

  #[async_trait]
  impl UserStore for CorruptStore {
    async fn register(&self, _: &StudentId) -> Result<StudentCounters, StoreError> { Ok(StudentCounters::default()) }
    async fn read(&self, _: &StudentId) -> Result<StudentCounters, StoreError> { Ok(StudentCounters::default()) }
    async fn apply_delta(&self, _: &StudentId, _: &CounterDelta) -> Result<StudentCounters, StoreError> {
      Ok(StudentCounters { total_attempts: 1, correct_attempts: 2, ..Default::default() })
    }
    async fn floor_score(&self, _: &StudentId, _: f64) -> Result<StudentCounters, StoreError> { Ok(StudentCounters::default()) }
  }

  #[tokio::test]
  #[cfg_attr(debug_assertions, should_panic(expected = "ledger invariant violated"))]
  async fn invariant_violation_fails_loudly() {
    let ledger = ScoreLedger::new(Arc::new(CorruptStore), ScoringCfg::default());
    let err = ledger.apply(&StudentId::from("s1"), &final_verdict(true)).await.unwrap_err();
    assert!(!err.is_retryable());
  }

  /// Holds every `apply_delta` until two are in flight, so both penalties land before either clamp.
  struct LockstepStore {
    inner: InMemoryUserStore,
    gate: tokio::sync::Barrier,
  }

  #[async_trait]
  impl UserStore for LockstepStore {
    async fn register(&self, s: &StudentId) -> Result<StudentCounters, StoreError> { self.inner.register(s).await }
    async fn read(&self, s: &StudentId) -> Result<StudentCounters, StoreError> { self.inner.read(s).await }
    async fn apply_delta(&self, s: &StudentId, d: &CounterDelta) -> Result<StudentCounters, StoreError> {
      let after = self.inner.apply_delta(s, d).await;
      self.gate.wait().await;
      after
    }
    async fn floor_score(&self, s: &StudentId, min: f64) -> Result<StudentCounters, StoreError> {
      self.inner.floor_score(s, min).await
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn racing_clamps_never_lift_the_score_above_the_floor() {
    let store = Arc::new(LockstepStore { inner: InMemoryUserStore::new(), gate: tokio::sync::Barrier::new(2) });
    let student = StudentId::from("s1");
    store.register(&student).await.unwrap();
    let ledger = ScoreLedger::new(store.clone(), ScoringCfg::default());

    let handles: Vec<_> = (0..2)
      .map(|_| {
        let ledger = ledger.clone();
        let student = student.clone();
        tokio::spawn(async move { ledger.apply(&student, &final_verdict(false)).await })
      })
      .collect();
    for h in handles {
      h.await.unwrap().unwrap();
    }

    let c = store.read(&student).await.unwrap();
    assert_eq!(c.score, 0.0);
    assert_eq!(c.total_attempts, 2);
  }

  #[test]
  fn floored_is_an_absolute_raise() {
    let c = StudentCounters { score: -0.5, ..Default::default() };
    assert_eq!(c.floored(0.0).score, 0.0);
    assert_eq!(c.floored(0.0).floored(0.0).score, 0.0);
    let rich = StudentCounters { score: 2.0, ..Default::default() };
    assert_eq!(rich.floored(0.0), rich);
  }
}
