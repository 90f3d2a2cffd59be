//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Handling a student message (log, grade + record, hint, log reply)
//!   - Reading session history
//!   - Building progress reports
//!
//! Grading and hint generation are independent oracle calls and run concurrently. A lost
//! grading round or a failed ledger write never prevents the student from getting a reply.

use tracing::{debug, info, instrument, warn};

use crate::conversation::ConversationWindow;
use crate::domain::{ClassLevel, ConversationTurn, GradingVerdict, Role, SessionId, SessionInfo, StudentCounters, StudentId};
use crate::error::ApiError;
use crate::ledger::LedgerOutcome;
use crate::prompt::HintImage;
use crate::state::AppState;
use crate::syllabus::SyllabusTopics;
use crate::util::title_from;

const TITLE_CHARS: usize = 20;
const IMAGE_TITLE: &str = "Image Chat";

/// Grading side of one message.
#[derive(Clone, Debug, PartialEq)]
pub struct GradingReport {
  pub verdict: GradingVerdict,
  /// Counters moved for this verdict.
  pub recorded: bool,
  /// The ledger write failed and may be retried.
  pub retryable: bool,
  pub counters: Option<StudentCounters>,
}

#[derive(Clone, Debug)]
pub struct TutorReply {
  pub session_id: SessionId,
  pub student_turn: ConversationTurn,
  /// Absent if the reply could not be logged.
  pub tutor_turn: Option<ConversationTurn>,
  pub reply: String,
  pub grading: GradingReport,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyllabusListing {
  pub class_level: ClassLevel,
  pub categories: Vec<String>,
  pub topics: SyllabusTopics,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressReport {
  pub student_id: StudentId,
  pub counters: StudentCounters,
  pub accuracy: f64,
}

#[instrument(level = "info", skip(state, text, image), fields(%session_id, text_len = text.as_deref().map(str::len).unwrap_or(0), has_image = image.is_some()))]
pub async fn handle_student_message(
  state: &AppState,
  session_id: SessionId,
  text: Option<String>,
  image: Option<HintImage>,
) -> Result<TutorReply, ApiError> {
  let text = text.filter(|t| !t.trim().is_empty());
  if text.is_none() && image.is_none() {
    return Err(ApiError::BadRequest("message needs text or an image".into()));
  }

  let session = state.get_session(session_id).await?;

  let mut window = ConversationWindow::load(state.messages.as_ref(), session_id, state.window_turns()).await?;
  let student_turn = window.append(state.messages.as_ref(), session_id, Role::Student, text.clone()).await?;

  // Only a logged message may name the session.
  let title = text.as_deref().and_then(|t| title_from(t, TITLE_CHARS)).unwrap_or_else(|| IMAGE_TITLE.into());
  state.ensure_title(session_id, title).await;

  let question = text.as_deref().unwrap_or_default();
  let (grading, reply) = tokio::join!(
    grade_and_record(state, &session, &window),
    state.hints.reply(question, &window, image.as_ref()),
  );

  let tutor_turn = match state.messages.append(session_id, Role::Tutor, Some(reply.clone())).await {
    Ok(turn) => Some(turn),
    Err(e) => {
      warn!(target: "tutor_backend", %session_id, error = %e, "Failed to log tutor reply");
      None
    }
  };

  info!(target: "tutor_backend", %session_id, is_final = grading.verdict.is_final(), recorded = grading.recorded, "Student message handled");
  Ok(TutorReply { session_id, student_turn, tutor_turn, reply, grading })
}

async fn grade_and_record(state: &AppState, session: &SessionInfo, window: &ConversationWindow) -> GradingReport {
  let topics = state.syllabus.topics_for(session.class_level);
  let verdict = state.judge.judge(window, session.class_level, topics.as_ref()).await;

  match state.ledger.apply(&session.student_id, &verdict).await {
    Ok(LedgerOutcome::Skipped) => {
      debug!(target: "ledger", session = %session.session_id, "Verdict not final; counters untouched");
      GradingReport { verdict, recorded: false, retryable: false, counters: None }
    }
    Ok(LedgerOutcome::Applied(counters)) => GradingReport { verdict, recorded: true, retryable: false, counters: Some(counters) },
    // Already logged by the ledger under its own target.
    Err(e) => GradingReport { verdict, recorded: false, retryable: e.is_retryable(), counters: None },
  }
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn session_history(state: &AppState, session_id: SessionId, limit: Option<usize>) -> Result<Vec<ConversationTurn>, ApiError> {
  state.get_session(session_id).await?;
  let limit = limit.unwrap_or(50).clamp(1, 500);
  Ok(state.messages.tail(session_id, limit).await?)
}

/// Practice questions like the student's latest one; empty if they have not asked anything yet.
#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn similar_questions(state: &AppState, session_id: SessionId) -> Result<Vec<String>, ApiError> {
  state.get_session(session_id).await?;
  let window = ConversationWindow::load(state.messages.as_ref(), session_id, state.window_turns()).await?;
  match window.last_student_text() {
    Some(question) => Ok(state.hints.similar(question).await),
    None => {
      debug!(target: "tutor_backend", %session_id, "No student question yet; nothing to vary");
      Ok(Vec::new())
    }
  }
}

#[instrument(level = "info", skip(state))]
pub fn syllabus_listing(state: &AppState, class_level: ClassLevel) -> Result<SyllabusListing, ApiError> {
  let topics = state
    .syllabus
    .topics_for(class_level)
    .ok_or_else(|| ApiError::NotFound(format!("No topics found for {class_level}")))?;
  Ok(SyllabusListing { class_level, categories: topics.categories(), topics })
}

#[instrument(level = "info", skip(state))]
pub async fn progress_report(state: &AppState, student: &StudentId) -> Result<ProgressReport, ApiError> {
  let counters = state.read_counters(student).await?;
  Ok(ProgressReport { student_id: student.clone(), accuracy: counters.accuracy(), counters })
}
