//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{info, error, instrument, debug};

use crate::domain::ClassLevel;
use crate::error::ApiError;
use crate::logic::*;
use crate::protocol::{ClientWsMessage, HistoryOut, ServerWsMessage, SessionOut, SimilarOut};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "tutor_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "tutor_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "tutor_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "tutor_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "tutor_backend", "WebSocket disconnected");
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match dispatch(msg, state).await {
    Ok(reply) => reply,
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  }
}

async fn dispatch(msg: ClientWsMessage, state: &AppState) -> Result<ServerWsMessage, ApiError> {
  Ok(match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::StartSession { student_id, class_level } => {
      let class_level = class_level.as_deref().map(ClassLevel::parse_lenient).unwrap_or_default();
      let session = state.create_session(student_id, class_level).await?;
      info!(target: "tutor_backend", session = %session.session_id, "WS session started");
      ServerWsMessage::Session { session: SessionOut::from(session) }
    }

    ClientWsMessage::StudentMessage { session_id, message } => {
      let image = message.image()?;
      let out = handle_student_message(state, session_id, message.text, image).await?;
      ServerWsMessage::TutorReply { reply: out.into() }
    }

    ClientWsMessage::History { session_id, limit } => {
      let turns = session_history(state, session_id, limit).await?;
      ServerWsMessage::History { history: HistoryOut { session_id, turns } }
    }

    ClientWsMessage::Similar { session_id } => {
      let similar = similar_questions(state, session_id).await?;
      ServerWsMessage::Similar { similar: SimilarOut { session_id, similar } }
    }
  })
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::domain::StudentId;
  use crate::ledger::InMemoryUserStore;
  use crate::logic::tests::test_state;
  use crate::oracle::testing::ScriptedOracle;

  #[tokio::test]
  async fn ws_messages_drive_a_session() {
    let state = test_state(
      Arc::new(ScriptedOracle::replying(r#"{"final": false, "feedback": "keep going"}"#)),
      Arc::new(ScriptedOracle::replying("What do you get for 3 x 2?")),
      Arc::new(InMemoryUserStore::new()),
    );
    state.register_student(&StudentId::from("amira")).await.unwrap();

    let start: ClientWsMessage = serde_json::from_str(r#"{"type": "start_session", "studentId": "amira", "classLevel": "3"}"#).unwrap();
    let ServerWsMessage::Session { session } = handle_client_ws(start, &state).await else {
      panic!("expected a session");
    };

    let raw = format!(r#"{{"type": "student_message", "sessionId": "{}", "text": "how do I multiply 3 x 4?"}}"#, session.session_id);
    let msg: ClientWsMessage = serde_json::from_str(&raw).unwrap();
    let ServerWsMessage::TutorReply { reply } = handle_client_ws(msg, &state).await else {
      panic!("expected a tutor reply");
    };
    assert_eq!(reply.reply, "What do you get for 3 x 2?");
    assert!(!reply.grading.is_final);
    assert!(!reply.grading.recorded);

    let raw = format!(r#"{{"type": "history", "sessionId": "{}"}}"#, session.session_id);
    let msg: ClientWsMessage = serde_json::from_str(&raw).unwrap();
    let ServerWsMessage::History { history } = handle_client_ws(msg, &state).await else {
      panic!("expected history");
    };
    assert_eq!(history.turns.len(), 2);

    let raw = format!(r#"{{"type": "similar", "sessionId": "{}"}}"#, session.session_id);
    let msg: ClientWsMessage = serde_json::from_str(&raw).unwrap();
    let ServerWsMessage::Similar { similar } = handle_client_ws(msg, &state).await else {
      panic!("expected similar questions");
    };
    // Hint script is spent, so the oracle errors and nothing is suggested.
    assert!(similar.similar.is_empty());
  }

  #[tokio::test]
  async fn errors_become_error_messages() {
    let state = test_state(
      Arc::new(ScriptedOracle::new(vec![])),
      Arc::new(ScriptedOracle::new(vec![])),
      Arc::new(InMemoryUserStore::new()),
    );
    let start: ClientWsMessage = serde_json::from_str(r#"{"type": "start_session", "studentId": "ghost"}"#).unwrap();
    assert!(matches!(handle_client_ws(start, &state).await, ServerWsMessage::Error { .. }));
    assert!(matches!(handle_client_ws(ClientWsMessage::Ping, &state).await, ServerWsMessage::Pong));
  }
}
