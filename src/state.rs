//! Application state: stores, syllabus, oracles and the grading/hint components.
//!
//! This module owns:
//!   - the message log and user store (in-memory implementations)
//!   - the session registry (session -> student, class level, title)
//!   - the judge and hint generator, each wired to its own oracle
//!
//! Without OPENAI_API_KEY both oracles are `UnavailableOracle`: grading degrades to the
//! sentinel verdict and replies come from the local hint fallback.

use std::{collections::HashMap, path::Path, sync::Arc};

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::{resolve_config, TutorConfig};
use crate::conversation::{InMemoryMessageLog, MessageLog};
use crate::domain::{ClassLevel, SessionId, SessionInfo, StudentCounters, StudentId};
use crate::error::StoreError;
use crate::hint::HintGenerator;
use crate::judge::AnswerJudge;
use crate::ledger::{InMemoryUserStore, ScoreLedger, UserStore};
use crate::openai::{OpenAiEndpoint, OpenAiOracle};
use crate::oracle::{Oracle, UnavailableOracle};
use crate::prompt::PromptComposer;
use crate::syllabus::{JsonSyllabus, SyllabusReference};

#[derive(Clone)]
pub struct AppState {
    pub config: TutorConfig,
    pub messages: Arc<dyn MessageLog>,
    pub ledger: ScoreLedger,
    pub syllabus: Arc<dyn SyllabusReference>,
    pub judge: AnswerJudge,
    pub hints: HintGenerator,
    pub sessions: Arc<RwLock<HashMap<SessionId, SessionInfo>>>,
}

impl AppState {
    /// Build state from env: load config and syllabus, init oracles.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = resolve_config();

        let syllabus = match config.syllabus.path.as_deref() {
            Some(p) => JsonSyllabus::load(Path::new(p)),
            None => {
                warn!(target: "tutor_backend", "No SYLLABUS_PATH configured; grading prompts carry no syllabus excerpt.");
                JsonSyllabus::default()
            }
        };

        let (grading, hinting): (Arc<dyn Oracle>, Arc<dyn Oracle>) =
            match OpenAiEndpoint::from_env(config.oracle.timeout()) {
                Some(endpoint) => {
                    let grading_model = std::env::var("OPENAI_GRADING_MODEL").unwrap_or_else(|_| "gpt-4o".into());
                    let hint_model = std::env::var("OPENAI_HINT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
                    let grading = OpenAiOracle::new(endpoint.clone(), grading_model.clone(), config.oracle.grading_temperature).json_mode();
                    let hinting = OpenAiOracle::new(endpoint, hint_model.clone(), config.oracle.hint_temperature);
                    info!(target: "tutor_backend", base_url = %grading.base_url(), %grading_model, %hint_model, "OpenAI enabled.");
                    (Arc::new(grading), Arc::new(hinting))
                }
                None => {
                    info!(target: "tutor_backend", "OpenAI disabled (no OPENAI_API_KEY). Grading is skipped and hints are local.");
                    (Arc::new(UnavailableOracle), Arc::new(UnavailableOracle))
                }
            };

        Self::with_parts(
            config,
            grading,
            hinting,
            Arc::new(syllabus),
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryMessageLog::new()),
        )
    }

    pub fn with_parts(
        config: TutorConfig,
        grading_oracle: Arc<dyn Oracle>,
        hint_oracle: Arc<dyn Oracle>,
        syllabus: Arc<dyn SyllabusReference>,
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageLog>,
    ) -> Self {
        let composer = PromptComposer::new(config.prompts.clone(), config.syllabus.char_budget);
        Self {
            judge: AnswerJudge::new(grading_oracle, composer.clone()),
            hints: HintGenerator::new(hint_oracle, composer),
            ledger: ScoreLedger::new(users, config.scoring.clone()),
            syllabus,
            messages,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn window_turns(&self) -> usize {
        self.config.window.turns.max(1)
    }

    #[instrument(level = "info", skip(self))]
    pub async fn register_student(&self, student: &StudentId) -> Result<StudentCounters, StoreError> {
        let counters = self.ledger.store().register(student).await?;
        info!(target: "tutor_backend", %student, "Student registered");
        Ok(counters)
    }

    pub async fn read_counters(&self, student: &StudentId) -> Result<StudentCounters, StoreError> {
        self.ledger.store().read(student).await
    }

    /// Opens a session for a registered student.
    #[instrument(level = "info", skip(self))]
    pub async fn create_session(&self, student: StudentId, class_level: ClassLevel) -> Result<SessionInfo, StoreError> {
        self.read_counters(&student).await?;
        let info = SessionInfo { session_id: SessionId::new(), student_id: student, class_level, title: None };
        self.sessions.write().await.insert(info.session_id, info.clone());
        info!(target: "tutor_backend", session = %info.session_id, class = %info.class_level, "Session created");
        Ok(info)
    }

    pub async fn get_session(&self, id: SessionId) -> Result<SessionInfo, StoreError> {
        self.sessions.read().await.get(&id).cloned().ok_or(StoreError::UnknownSession(id))
    }

    /// Sets the title once; later calls keep the first one.
    pub async fn ensure_title(&self, id: SessionId, title: String) {
        if let Some(s) = self.sessions.write().await.get_mut(&id) {
            s.title.get_or_insert(title);
        }
    }
}
