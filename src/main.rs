//! Tutor Backend · grading and hint pipeline for a tutoring chat
//!
//! - Axum HTTP + WebSocket API
//! - Per-turn answer grading and hint generation via an OpenAI-compatible oracle
//! - Per-student score ledger (attempts, accuracy, streaks)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   OPENAI_API_KEY        : enables the oracle if present
//!   OPENAI_BASE_URL       : default "https://api.openai.com/v1"
//!   OPENAI_GRADING_MODEL  : default "gpt-4o"
//!   OPENAI_HINT_MODEL     : default "gpt-4o-mini"
//!   OPENAI_TIMEOUT_SECS   : per-call oracle timeout (default 20)
//!   SYLLABUS_PATH         : JSON syllabus keyed by "class_N"
//!   TUTOR_CONFIG_PATH     : TOML config (prompts, window, scoring, syllabus)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod oracle;
mod openai;
mod sanitizer;
mod conversation;
mod syllabus;
mod prompt;
mod judge;
mod ledger;
mod hint;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: in-memory stores, oracles, prompts, syllabus.
  let state = Arc::new(AppState::new());
  let app = build_router(state);

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "tutor_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "tutor_backend", "server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "tutor_backend", error = %e, "failed to listen for ctrl-c; running until killed");
    std::future::pending::<()>().await;
  }
  info!(target: "tutor_backend", "shutdown requested");
}
