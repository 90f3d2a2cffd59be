//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{ConversationTurn, SessionId, SessionInfo, StudentCounters, StudentId};
use crate::error::ApiError;
use crate::logic::{GradingReport, ProgressReport, SyllabusListing, TutorReply};
use crate::prompt::HintImage;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartSession {
        #[serde(rename = "studentId")]
        student_id: StudentId,
        #[serde(default, rename = "classLevel")]
        class_level: Option<String>,
    },
    StudentMessage {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(flatten)]
        message: MessageIn,
    },
    History {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(default)]
        limit: Option<usize>,
    },
    Similar {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        session: SessionOut,
    },
    TutorReply {
        reply: MessageOut,
    },
    History {
        history: HistoryOut,
    },
    Similar {
        similar: SimilarOut,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterIn {
    pub student_id: StudentId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIn {
    pub student_id: StudentId,
    #[serde(default)]
    pub class_level: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub class_level: String,
    pub title: Option<String>,
}

impl From<SessionInfo> for SessionOut {
    fn from(s: SessionInfo) -> Self {
        Self { session_id: s.session_id, student_id: s.student_id, class_level: s.class_level.key(), title: s.title }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageIn {
    #[serde(default)]
    pub text: Option<String>,
    /// Raw base64 or a `data:` URL.
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub image_mime: Option<String>,
}

impl MessageIn {
    pub fn image(&self) -> Result<Option<HintImage>, ApiError> {
        match self.image_base64.as_deref().filter(|s| !s.trim().is_empty()) {
            None => Ok(None),
            Some(b64) => HintImage::from_base64(self.image_mime.as_deref(), b64)
                .map(Some)
                .map_err(|e| ApiError::BadRequest(format!("Invalid image payload: {e}"))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingOut {
    pub is_final: bool,
    pub is_correct: bool,
    pub feedback: String,
    pub correct_answer: Option<String>,
    /// The model output could not be read; nothing was graded.
    pub unreadable: bool,
    pub recorded: bool,
    pub retryable: bool,
    pub counters: Option<CountersOut>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersOut {
    pub total_attempts: u64,
    pub correct_attempts: u64,
    pub score: f64,
    pub current_streak: u32,
    pub max_streak: u32,
}

impl From<&StudentCounters> for CountersOut {
    fn from(c: &StudentCounters) -> Self {
        Self {
            total_attempts: c.total_attempts,
            correct_attempts: c.correct_attempts,
            score: c.score,
            current_streak: c.current_streak,
            max_streak: c.max_streak,
        }
    }
}

impl From<&GradingReport> for GradingOut {
    fn from(g: &GradingReport) -> Self {
        Self {
            is_final: g.verdict.is_final(),
            is_correct: g.verdict.is_correct(),
            feedback: g.verdict.feedback().to_string(),
            correct_answer: g.verdict.correct_answer().map(str::to_string),
            unreadable: g.verdict.is_sentinel(),
            recorded: g.recorded,
            retryable: g.retryable,
            counters: g.counters.as_ref().map(CountersOut::from),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOut {
    pub session_id: SessionId,
    pub reply: String,
    pub student_sequence: u64,
    pub tutor_sequence: Option<u64>,
    pub grading: GradingOut,
}

impl From<TutorReply> for MessageOut {
    fn from(r: TutorReply) -> Self {
        Self {
            session_id: r.session_id,
            student_sequence: r.student_turn.sequence,
            tutor_sequence: r.tutor_turn.map(|t| t.sequence),
            grading: GradingOut::from(&r.grading),
            reply: r.reply,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOut {
    pub session_id: SessionId,
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarOut {
    pub session_id: SessionId,
    pub similar: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusOut {
    pub class_level: String,
    /// Top-level topic names.
    pub categories: Vec<String>,
    /// One rendered line per topic, subtopics inline.
    pub sections: Vec<String>,
    pub topics: serde_json::Value,
}

impl From<SyllabusListing> for SyllabusOut {
    fn from(l: SyllabusListing) -> Self {
        Self {
            class_level: l.class_level.key(),
            categories: l.categories,
            sections: l.topics.sections(),
            topics: l.topics.0,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOut {
    pub student_id: StudentId,
    pub total_attempts: u64,
    pub correct_attempts: u64,
    pub score: f64,
    pub current_streak: u32,
    pub max_streak: u32,
    pub accuracy: f64,
}

impl From<ProgressReport> for ReportOut {
    fn from(r: ProgressReport) -> Self {
        Self {
            student_id: r.student_id,
            total_attempts: r.counters.total_attempts,
            correct_attempts: r.counters.correct_attempts,
            score: r.counters.score,
            current_streak: r.counters.current_streak,
            max_streak: r.counters.max_streak,
            accuracy: r.accuracy,
        }
    }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
