//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, Query, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::domain::{ClassLevel, SessionId, StudentId};
use crate::error::ApiError;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, body), fields(student = %body.student_id))]
pub async fn http_register_student(
  State(state): State<Arc<AppState>>,
  Json(body): Json<RegisterIn>,
) -> Result<impl IntoResponse, ApiError> {
  state.register_student(&body.student_id).await?;
  let report = progress_report(&state, &body.student_id).await?;
  Ok((StatusCode::CREATED, Json(ReportOut::from(report))))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_report(
  State(state): State<Arc<AppState>>,
  Path(student_id): Path<String>,
) -> Result<Json<ReportOut>, ApiError> {
  let report = progress_report(&state, &StudentId(student_id)).await?;
  Ok(Json(report.into()))
}

#[instrument(level = "info", skip(state, body), fields(student = %body.student_id))]
pub async fn http_create_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SessionIn>,
) -> Result<impl IntoResponse, ApiError> {
  let class_level = body.class_level.as_deref().map(ClassLevel::parse_lenient).unwrap_or_default();
  let session = state.create_session(body.student_id, class_level).await?;
  Ok((StatusCode::CREATED, Json(SessionOut::from(session))))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_history(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<SessionId>,
  Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryOut>, ApiError> {
  let turns = session_history(&state, session_id, q.limit).await?;
  Ok(Json(HistoryOut { session_id, turns }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_similar(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<SessionId>,
) -> Result<Json<SimilarOut>, ApiError> {
  let similar = similar_questions(&state, session_id).await?;
  Ok(Json(SimilarOut { session_id, similar }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_syllabus(
  State(state): State<Arc<AppState>>,
  Path(class_level): Path<String>,
) -> Result<Json<SyllabusOut>, ApiError> {
  let class_level = ClassLevel::parse(&class_level)
    .ok_or_else(|| ApiError::BadRequest(format!("Not a class level: {class_level}")))?;
  Ok(Json(syllabus_listing(&state, class_level)?.into()))
}

#[instrument(level = "info", skip(state, body), fields(text_len = body.text.as_deref().map(str::len).unwrap_or(0)))]
pub async fn http_post_message(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<SessionId>,
  Json(body): Json<MessageIn>,
) -> Result<Json<MessageOut>, ApiError> {
  let image = body.image()?;
  let out = handle_student_message(&state, session_id, body.text, image).await?;
  info!(target: "tutor_backend", %session_id, is_final = out.grading.verdict.is_final(), "HTTP student message answered");
  Ok(Json(out.into()))
}
