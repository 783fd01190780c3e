use anyhow::Result;
use techai_core::AssistantReply;

use crate::GenerationRequest;

/// Deterministic offline engine. Selected when no model API key is
/// configured, and used by tests; `unavailable()` simulates a gateway outage.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    unavailable: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self { unavailable: true }
    }

    pub fn generate(&self, request: &GenerationRequest<'_>) -> Result<AssistantReply> {
        if self.unavailable {
            anyhow::bail!("scripted engine is configured as unavailable");
        }

        let reply = if request.image_data_url.is_some() {
            format!(
                "Danke für das Bild. Zu Ihrer Frage \"{}\": Prüfen Sie zuerst, ob alle Stecker \
                 fest sitzen, und starten Sie das Gerät danach einmal neu. Sagen Sie mir \
                 anschließend, was auf dem Bildschirm steht.",
                request.user_message
            )
        } else {
            format!(
                "Gehen wir Ihr Anliegen \"{}\" Schritt für Schritt durch: Prüfen Sie zuerst \
                 Stromversorgung und Verbindung, starten Sie das Gerät dann einmal neu und \
                 beschreiben Sie mir, was sich dadurch ändert.",
                request.user_message
            )
        };

        Ok(AssistantReply {
            reply,
            suggestions: vec![
                "Das hat geholfen".to_string(),
                "Es geht immer noch nicht".to_string(),
            ],
            app_shortcuts: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest<'static> {
        GenerationRequest {
            system_prompt: "Du bist Tech-AI.",
            history: &[],
            user_message: "WLAN bricht ständig ab",
            image_data_url: None,
        }
    }

    #[test]
    fn scripted_replies_are_deterministic() {
        let engine = ScriptedEngine::new();
        let first = engine.generate(&request()).unwrap();
        let second = engine.generate(&request()).unwrap();
        assert_eq!(first, second);
        assert!(first.reply.contains("WLAN bricht ständig ab"));
    }

    #[test]
    fn unavailable_engine_fails() {
        assert!(ScriptedEngine::unavailable().generate(&request()).is_err());
    }
}
