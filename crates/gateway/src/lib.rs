mod openai;
mod scripted;
mod search;

use std::env;

use anyhow::Result;
use techai_core::{AssistantReply, ChatTurn};

pub use openai::{normalize_structured_reply, OpenAiEngine};
pub use scripted::ScriptedEngine;
pub use search::{SearchHit, SerpApiClient};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// One fully assembled generation call to the model backend.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [ChatTurn],
    pub user_message: &'a str,
    pub image_data_url: Option<&'a str>,
}

#[derive(Clone)]
pub enum ReplyEngine {
    OpenAi(OpenAiEngine),
    Scripted(ScriptedEngine),
}

impl ReplyEngine {
    /// Model-backed engine when `TECHAI_OPENAI_API_KEY` is set, deterministic
    /// scripted engine otherwise.
    pub fn load_default(client: reqwest::Client) -> Self {
        match env::var("TECHAI_OPENAI_API_KEY") {
            Ok(api_key) if !api_key.trim().is_empty() => {
                let model =
                    env::var("TECHAI_OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
                Self::OpenAi(OpenAiEngine::new(client, api_key, model))
            }
            _ => Self::Scripted(ScriptedEngine::new()),
        }
    }

    pub fn is_model_backed(&self) -> bool {
        matches!(self, Self::OpenAi(_))
    }

    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Result<AssistantReply> {
        match self {
            Self::OpenAi(engine) => engine.generate(request).await,
            Self::Scripted(engine) => engine.generate(request),
        }
    }

    /// Single-label intent classification. Only meaningful for the
    /// model-backed engine; callers chain a rule-based fallback.
    pub async fn classify_label(&self, message: &str, topic_title: Option<&str>) -> Result<String> {
        match self {
            Self::OpenAi(engine) => engine.classify_label(message, topic_title).await,
            Self::Scripted(_) => anyhow::bail!("scripted engine has no classifier"),
        }
    }
}
