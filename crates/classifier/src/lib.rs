use anyhow::{Context, Result};
use techai_core::{classify_intent_rules, is_same_topic, Intent};
use techai_gateway::ReplyEngine;
use tracing::debug;

const RULES_MODEL: &str = "rules";
const RULES_TOPIC_MODEL: &str = "rules-topic-overlap";
const OPENAI_MODEL: &str = "openai-label";
const FALLBACK_MODEL: &str = "rules-fallback";

#[derive(Debug, Clone)]
pub struct IntentPrediction {
    pub intent: Intent,
    pub confidence: f32,
    pub model: &'static str,
}

impl IntentPrediction {
    /// True when the model-backed path failed and the rule-based fallback
    /// produced this prediction.
    pub fn is_fallback(&self) -> bool {
        self.model == FALLBACK_MODEL
    }
}

/// Keyword rules plus the topic-overlap heuristic: a `Normal` message that
/// shares no significant words with the topic title is treated as a topic
/// change attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleIntentClassifier;

impl RuleIntentClassifier {
    pub fn predict(&self, text: &str, topic_title: Option<&str>) -> IntentPrediction {
        let intent = classify_intent_rules(text);

        if intent == Intent::Normal {
            if let Some(title) = topic_title.filter(|title| !title.trim().is_empty()) {
                if !is_same_topic(title, text) {
                    return IntentPrediction {
                        intent: Intent::NewTopic,
                        confidence: 0.55,
                        model: RULES_TOPIC_MODEL,
                    };
                }
            }
        }

        IntentPrediction {
            intent,
            confidence: 0.62,
            model: RULES_MODEL,
        }
    }
}

#[derive(Clone)]
pub struct ModelIntentClassifier {
    engine: ReplyEngine,
}

impl ModelIntentClassifier {
    pub fn new(engine: ReplyEngine) -> Self {
        Self { engine }
    }

    pub async fn predict(
        &self,
        text: &str,
        topic_title: Option<&str>,
    ) -> Result<IntentPrediction> {
        let label = self.engine.classify_label(text, topic_title).await?;
        let intent = parse_intent_label(&label)
            .with_context(|| format!("unparseable intent label: {label:?}"))?;

        Ok(IntentPrediction {
            intent,
            confidence: 0.85,
            model: OPENAI_MODEL,
        })
    }
}

pub fn parse_intent_label(label: &str) -> Option<Intent> {
    let trimmed = label.trim().trim_matches(&['"', '.', '`'][..]).to_lowercase();
    match trimmed.as_str() {
        "normal" => Some(Intent::Normal),
        "visual_help" | "visual-help" | "visualhelp" => Some(Intent::VisualHelp),
        "new_topic" | "new-topic" | "newtopic" => Some(Intent::NewTopic),
        "settings" => Some(Intent::Settings),
        _ => None,
    }
}

/// Fallback-chained classifier selection: model-backed with rule fallback
/// when the engine is model-backed, rules only otherwise. Classification
/// never surfaces an error and never mutates quota state.
#[derive(Clone)]
pub enum IntentRouter {
    Model {
        model: ModelIntentClassifier,
        fallback: RuleIntentClassifier,
    },
    Rules(RuleIntentClassifier),
}

impl IntentRouter {
    pub fn load_default(engine: &ReplyEngine) -> Self {
        if engine.is_model_backed() {
            Self::Model {
                model: ModelIntentClassifier::new(engine.clone()),
                fallback: RuleIntentClassifier,
            }
        } else {
            Self::Rules(RuleIntentClassifier)
        }
    }

    pub async fn classify(&self, text: &str, topic_title: Option<&str>) -> IntentPrediction {
        match self {
            Self::Rules(rules) => rules.predict(text, topic_title),
            Self::Model { model, fallback } => match model.predict(text, topic_title).await {
                Ok(prediction) => prediction,
                Err(err) => {
                    debug!(error = %err, "model classification failed, using rules");
                    let mut prediction = fallback.predict(text, topic_title);
                    prediction.model = FALLBACK_MODEL;
                    prediction
                }
            },
        }
    }
}
