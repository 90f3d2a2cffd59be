//! Error types, one enum per failure domain.
//!
//! Oracle failures and store failures are kept apart on purpose: the first is an LLM quirk
//! that degrades to a sentinel verdict, the second means the ledger could not record progress.

use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::domain::{InvariantViolation, SessionId, StudentId};

#[derive(Debug, Error)]
pub enum OracleError {
  #[error("oracle not configured")]
  Unavailable,
  #[error("oracle transport error: {0}")]
  Transport(String),
  #[error("oracle HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("oracle returned an empty response")]
  EmptyResponse,
  #[error("oracle response could not be decoded: {0}")]
  Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("unknown student: {0}")]
  UnknownStudent(StudentId),
  #[error("student already registered: {0}")]
  AlreadyRegistered(StudentId),
  #[error("unknown session: {0}")]
  UnknownSession(SessionId),
  #[error(transparent)]
  Invariant(#[from] InvariantViolation),
  /// Raised by stores fronting an external backend; only test doubles do so here.
  #[cfg(test)]
  #[error("store backend failure: {0}")]
  Backend(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
  /// Persistence failed; the caller may retry the apply.
  #[error("ledger store failure: {0}")]
  Store(StoreError),
  /// Counters broke an invariant. Programming error.
  #[error("ledger invariant violated: {0}")]
  Invariant(InvariantViolation),
}

impl LedgerError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, LedgerError::Store(_))
  }
}

impl From<StoreError> for LedgerError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::Invariant(v) => LedgerError::Invariant(v),
      other => LedgerError::Store(other),
    }
  }
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Conflict(String),
  #[error("{0}")]
  BadRequest(String),
  #[error("internal error: {0}")]
  Internal(String),
}

impl From<StoreError> for ApiError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::UnknownStudent(_) | StoreError::UnknownSession(_) => ApiError::NotFound(e.to_string()),
      StoreError::AlreadyRegistered(_) => ApiError::Conflict(e.to_string()),
      other => ApiError::Internal(other.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    let status = match &self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
  }
}
