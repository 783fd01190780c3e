use anyhow::{Context, Result};
use techai_core::{AssistantReply, ChatTurn};

use crate::GenerationRequest;

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

const REPLY_FORMAT_INSTRUCTION: &str = "Antworte ausschließlich mit einem JSON-Objekt der Form \
{\"reply\": \"deine Antwort\", \"suggestions\": [\"bis zu 3 kurze Anschlussfragen\"], \
\"appShortcuts\": [{\"label\": \"...\", \"url\": \"...\"}]}. Kein Text außerhalb des JSON.";

const LABEL_INSTRUCTION: &str = "Ordne die Kundennachricht genau einer Kategorie zu und antworte \
nur mit dem Kategorienamen: normal (Technikfrage zum laufenden Thema), visual_help (ein Foto \
oder Screenshot würde helfen), new_topic (klar anderes Problem als das bisherige Thema), \
settings (Bedienung der Oberfläche wie Vorlesen oder Modus).";

#[derive(Clone)]
pub struct OpenAiEngine {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiEngine {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Result<AssistantReply> {
        let system_prompt = format!("{}\n\n{}", request.system_prompt, REPLY_FORMAT_INSTRUCTION);

        let mut input = vec![serde_json::json!({
            "role": "system",
            "content": [ { "type": "input_text", "text": system_prompt } ]
        })];
        input.extend(history_items(request.history));

        let mut user_content = vec![serde_json::json!({
            "type": "input_text",
            "text": request.user_message
        })];
        if let Some(image) = request.image_data_url {
            user_content.push(serde_json::json!({
                "type": "input_image",
                "image_url": image
            }));
        }
        input.push(serde_json::json!({ "role": "user", "content": user_content }));

        let payload = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let response = self
            .client
            .post(RESPONSES_URL)
            .bearer_auth(self.api_key.as_str())
            .json(&payload)
            .send()
            .await
            .context("model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("model returned status {}: {}", status.as_u16(), body);
        }

        let body: serde_json::Value = response.json().await.context("model response unreadable")?;
        let raw = extract_output_text(&body)
            .filter(|value| !value.trim().is_empty())
            .context("model output text missing")?;

        Ok(normalize_structured_reply(&raw))
    }

    pub async fn classify_label(&self, message: &str, topic_title: Option<&str>) -> Result<String> {
        let context_line = topic_title
            .filter(|title| !title.trim().is_empty())
            .map(|title| format!("Bisheriges Thema: \"{title}\"\n"))
            .unwrap_or_default();

        let payload = serde_json::json!({
            "model": self.model,
            "input": [
                {
                    "role": "system",
                    "content": [ { "type": "input_text", "text": LABEL_INSTRUCTION } ]
                },
                {
                    "role": "user",
                    "content": [ { "type": "input_text", "text": format!("{context_line}Nachricht: {message}") } ]
                }
            ],
        });

        let response = self
            .client
            .post(RESPONSES_URL)
            .bearer_auth(self.api_key.as_str())
            .json(&payload)
            .send()
            .await
            .context("classification request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("classification returned status {}", status.as_u16());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("classification response unreadable")?;
        extract_output_text(&body)
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .context("classification output missing")
    }
}

fn history_items(history: &[ChatTurn]) -> Vec<serde_json::Value> {
    let mut items = Vec::with_capacity(history.len() * 2);
    for turn in history {
        items.push(serde_json::json!({
            "role": "user",
            "content": [ { "type": "input_text", "text": turn.user_text } ]
        }));
        items.push(serde_json::json!({
            "role": "assistant",
            "content": [ { "type": "output_text", "text": turn.assistant_text } ]
        }));
    }
    items
}

pub(crate) fn extract_output_text(payload: &serde_json::Value) -> Option<String> {
    if let Some(value) = payload.get("output_text").and_then(|value| value.as_str()) {
        return Some(value.to_string());
    }

    let output = payload.get("output")?.as_array()?;
    let mut chunks = Vec::new();
    for item in output {
        if let Some(content) = item.get("content").and_then(|value| value.as_array()) {
            for content_item in content {
                if content_item
                    .get("type")
                    .and_then(|value| value.as_str())
                    .map(|value| value == "output_text")
                    .unwrap_or(false)
                {
                    if let Some(text) = content_item.get("text").and_then(|value| value.as_str()) {
                        chunks.push(text.to_string());
                    }
                }
            }
        }
    }

    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n\n"))
    }
}

/// Parses the structured reply the model was asked for. Anything that does
/// not match the expected shape is normalized: the raw text becomes `reply`,
/// suggestions and shortcuts stay empty.
pub fn normalize_structured_reply(raw: &str) -> AssistantReply {
    let candidate = strip_code_fence(raw.trim());

    let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) else {
        return AssistantReply::text(raw.trim());
    };
    let Some(reply) = value.get("reply").and_then(|value| value.as_str()) else {
        return AssistantReply::text(raw.trim());
    };

    let suggestions = value
        .get("suggestions")
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(str::to_string)
                .take(3)
                .collect()
        })
        .unwrap_or_default();

    let app_shortcuts = value
        .get("appShortcuts")
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let label = item.get("label")?.as_str()?;
                    let url = item.get("url")?.as_str()?;
                    Some(techai_core::AppShortcut {
                        label: label.to_string(),
                        url: url.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    AssistantReply {
        reply: reply.to_string(),
        suggestions,
        app_shortcuts,
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .map(str::trim_end)
        .unwrap_or(raw)
}
