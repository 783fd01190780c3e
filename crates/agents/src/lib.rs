mod learn_later;
mod prompt;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use techai_classifier::{IntentPrediction, IntentRouter};
use techai_core::policy::{self, Decision, TurnRequest};
use techai_core::{
    derive_topic_title, is_closure_confirmation, normalize_text, reply, AssistantReply, ChatTurn,
    Intent, Mode, SupportSession,
};
use techai_gateway::{GenerationRequest, ReplyEngine, SearchHit, SerpApiClient};
use techai_observability::AppMetrics;
use techai_storage::{SessionLocks, SessionRepository};
use thiserror::Error;
use tracing::{error, info, instrument};

pub use learn_later::{is_frustration_signal, DIFFICULTY_LOG_THRESHOLD};
pub use prompt::build_system_prompt;

#[derive(Debug, Error)]
pub enum SupportError {
    #[error("missing required field: {0}")]
    Validation(&'static str),
    #[error("assistant unavailable")]
    UpstreamUnavailable(#[source] anyhow::Error),
    #[error("session state unavailable")]
    Precondition(#[source] anyhow::Error),
}

/// One validated chat (or vision) turn as received from the boundary.
#[derive(Debug, Clone)]
pub struct ChatCommand {
    pub session_id: String,
    pub mode: Mode,
    pub message: String,
    pub new_topic: bool,
    pub mark_solved: bool,
    pub from_voice: bool,
    pub voice_session_ended: bool,
    pub use_web_search: bool,
    pub topic_title: Option<String>,
    pub image_data_url: Option<String>,
}

impl ChatCommand {
    pub fn text(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            mode: Mode::Unerfahren,
            message: message.into(),
            new_topic: false,
            mark_solved: false,
            from_voice: false,
            voice_session_ended: false,
            use_web_search: false,
            topic_title: None,
            image_data_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub reply: AssistantReply,
    pub intent: Intent,
    pub answer_count: u32,
    pub free_limit: u32,
}

#[derive(Debug, Clone)]
pub struct QuotaSnapshot {
    pub answer_count: u32,
    pub free_limit: u32,
    pub solved: bool,
}

/// Reads the seller crib notes; a missing file simply disables the section.
pub fn load_tips(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

#[derive(Clone)]
pub struct SupportAgent<S>
where
    S: SessionRepository,
{
    engine: ReplyEngine,
    classifier: IntentRouter,
    store: Arc<S>,
    locks: SessionLocks,
    metrics: Arc<AppMetrics>,
    search: Option<SerpApiClient>,
    tips: String,
    learn_later_path: PathBuf,
}

impl<S> SupportAgent<S>
where
    S: SessionRepository,
{
    pub fn new(
        engine: ReplyEngine,
        classifier: IntentRouter,
        store: Arc<S>,
        metrics: Arc<AppMetrics>,
        search: Option<SerpApiClient>,
        tips: String,
        learn_later_path: PathBuf,
    ) -> Self {
        Self {
            engine,
            classifier,
            store,
            locks: SessionLocks::new(),
            metrics,
            search,
            tips,
            learn_later_path,
        }
    }

    /// Vision turns share the chat quota semantics; they only additionally
    /// require an image.
    pub async fn handle_vision(&self, command: ChatCommand) -> Result<ChatOutcome, SupportError> {
        let has_image = command
            .image_data_url
            .as_deref()
            .map(str::trim)
            .is_some_and(|value| !value.is_empty());
        if !has_image {
            return Err(SupportError::Validation("imageDataUrl"));
        }
        self.handle_chat(command).await
    }

    #[instrument(skip(self, command))]
    pub async fn handle_chat(&self, command: ChatCommand) -> Result<ChatOutcome, SupportError> {
        let started = Instant::now();
        self.metrics.inc_request();

        if command.session_id.trim().is_empty() {
            return Err(SupportError::Validation("sessionId"));
        }
        let message = normalize_text(&command.message);
        if message.is_empty() {
            return Err(SupportError::Validation("message"));
        }

        // Per-session serialization: the guard is held across the gateway
        // await, so counters of one session never race and a slow call can
        // never be double-counted.
        let lock = self.locks.lock_for(&command.session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .load_session(&command.session_id)
            .await
            .map_err(SupportError::Precondition)?
            .unwrap_or_else(|| {
                SupportSession::new(
                    &command.session_id,
                    &derive_topic_title(command.topic_title.as_deref(), &message),
                )
            });
        if session.topic_title.is_empty() {
            session.topic_title = derive_topic_title(command.topic_title.as_deref(), &message);
        }
        if command.mark_solved {
            session.solved = true;
        }

        let prediction = self
            .classifier
            .classify(&message, Some(session.topic_title.as_str()))
            .await;
        if prediction.is_fallback() {
            self.metrics.inc_classifier_fallback();
        }

        let turn = TurnRequest {
            intent: prediction.intent,
            explicit_new_topic: command.new_topic,
            closure_confirmation: session.solved
                && !session.closed
                && is_closure_confirmation(&message),
            voice_session_ended: command.voice_session_ended,
            has_image: command.image_data_url.is_some(),
        };

        let decision = policy::evaluate(&session, &turn);
        let answered = match &decision {
            Decision::Answer {
                notices,
                fresh_topic,
            } => {
                let web_hits = self.web_context(&command, &message).await;
                let system_prompt =
                    prompt::build_system_prompt(&session, command.mode, &self.tips, &web_hits);

                let generated = self
                    .engine
                    .generate(&GenerationRequest {
                        system_prompt: &system_prompt,
                        history: &session.turns,
                        user_message: &message,
                        image_data_url: command.image_data_url.as_deref(),
                    })
                    .await
                    .map_err(|err| {
                        self.metrics.inc_gateway_failure();
                        SupportError::UpstreamUnavailable(err)
                    })?;

                policy::record_answer(
                    &mut session,
                    notices,
                    *fresh_topic,
                    &derive_topic_title(command.topic_title.as_deref(), &message),
                );
                self.metrics.inc_answer();
                if session.answer_count > session.free_limit {
                    self.metrics.inc_goodwill_answer();
                }

                let composed = reply::compose_answer(generated, notices, session.free_limit);
                session.push_turn(ChatTurn {
                    at: Utc::now(),
                    user_text: message.clone(),
                    assistant_text: composed.reply.clone(),
                    intent: prediction.intent,
                });
                self.track_difficulty(&mut session, &message, &composed.reply)
                    .await;
                composed
            }
            other => {
                policy::apply_decision(&mut session, other);
                match other {
                    Decision::SameTopicCheck { .. } => self.metrics.inc_warning(),
                    Decision::Paywall | Decision::RefuseNewTopic => self.metrics.inc_paywall(),
                    _ => {}
                }
                reply::reply_for_decision(other)
                    .expect("non-answer decisions always have a fixed reply")
            }
        };

        self.store
            .upsert_session(&session)
            .await
            .map_err(SupportError::Precondition)?;

        self.metrics.observe_latency(started.elapsed());
        info!(
            session_id = %session.session_id,
            intent = prediction.intent.as_code(),
            decision = decision_kind(&decision),
            answer_count = session.answer_count,
            from_voice = command.from_voice,
            "chat turn handled"
        );

        Ok(ChatOutcome {
            reply: answered,
            intent: prediction.intent,
            answer_count: session.answer_count,
            free_limit: session.free_limit,
        })
    }

    /// Stateless classification for the intent endpoint; never touches quota.
    pub async fn classify_message(&self, message: &str) -> Result<IntentPrediction, SupportError> {
        let message = normalize_text(message);
        if message.is_empty() {
            return Err(SupportError::Validation("message"));
        }
        let prediction = self.classifier.classify(&message, None).await;
        if prediction.is_fallback() {
            self.metrics.inc_classifier_fallback();
        }
        Ok(prediction)
    }

    pub async fn mark_solved(&self, session_id: &str) -> Result<QuotaSnapshot, SupportError> {
        if session_id.trim().is_empty() {
            return Err(SupportError::Validation("sessionId"));
        }

        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .load_session(session_id)
            .await
            .map_err(SupportError::Precondition)?
            .unwrap_or_else(|| SupportSession::new(session_id, ""));
        session.solved = true;

        self.store
            .upsert_session(&session)
            .await
            .map_err(SupportError::Precondition)?;

        info!(session_id = %session.session_id, "topic marked solved");
        Ok(QuotaSnapshot {
            answer_count: session.answer_count,
            free_limit: session.free_limit,
            solved: session.solved,
        })
    }

    async fn web_context(&self, command: &ChatCommand, message: &str) -> Vec<SearchHit> {
        if !command.use_web_search {
            return Vec::new();
        }
        let Some(search) = self.search.as_ref() else {
            return Vec::new();
        };
        self.metrics.inc_web_search();
        search.search(message).await
    }

    async fn track_difficulty(
        &self,
        session: &mut SupportSession,
        user_message: &str,
        assistant_reply: &str,
    ) {
        if !learn_later::is_frustration_signal(user_message) {
            return;
        }
        session.difficulty_signals += 1;

        if session.difficulty_signals >= learn_later::DIFFICULTY_LOG_THRESHOLD
            && !session.difficulty_logged
        {
            let entry =
                learn_later::format_entry(session, user_message, assistant_reply, Utc::now());
            if let Err(err) = learn_later::append_entry(&self.learn_later_path, &entry).await {
                error!(error = %err, "failed writing learn-later entry");
            }
            session.difficulty_logged = true;
        }
    }
}

fn decision_kind(decision: &Decision) -> &'static str {
    match decision {
        Decision::Answer { .. } => "answer",
        Decision::SameTopicCheck { .. } => "same_topic_check",
        Decision::Paywall => "paywall",
        Decision::RefuseNewTopic => "refuse_new_topic",
        Decision::ConfirmClose => "confirm_close",
        Decision::CloseTopic => "close_topic",
        Decision::SettingsAck => "settings_ack",
        Decision::RequestCapture => "request_capture",
    }
}
