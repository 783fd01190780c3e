use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use techai_core::SupportSession;
use tokio::io::AsyncWriteExt;

/// Frustration signals after which a session gets logged for later review.
pub const DIFFICULTY_LOG_THRESHOLD: u32 = 3;

const REPLY_HEAD_CHARS: usize = 500;

static FRUSTRATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"versteh\w*\s+(ich|das)\s+nicht",
        r"check\w*\s+(ich|das)\s+nicht",
        r"hilft\s+mir\s+nicht",
        r"bringt\s+mir\s+nichts",
        r"(funktioniert|geht)\s+immer\s*noch\s+nicht",
        r"blick\w*\s+(da\s+)?nicht\s+durch",
        r"komm\w*\s+nicht\s+klar",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("frustration pattern must compile"))
    .collect()
});

pub fn is_frustration_signal(message: &str) -> bool {
    let lower = message.to_lowercase();
    FRUSTRATION_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&lower))
}

pub fn format_entry(
    session: &SupportSession,
    user_message: &str,
    assistant_reply: &str,
    now: DateTime<Utc>,
) -> String {
    let topic = if session.topic_title.trim().is_empty() {
        "Unbekanntes Thema"
    } else {
        session.topic_title.as_str()
    };
    let reply_head: String = assistant_reply.chars().take(REPLY_HEAD_CHARS).collect();

    format!(
        "\n[{}]\nThema: {}\nSession: {}\nKunde war mehrfach unzufrieden / hat es nicht \
         verstanden.\n\nLetzte Kunden-Nachricht:\n- {}\n\nLetzte KI-Antwort:\n- {}\n\n\
         ------------------------------------------------------------\n",
        now.to_rfc3339(),
        topic,
        session.session_id,
        user_message,
        reply_head,
    )
}

pub async fn append_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(entry.as_bytes()).await?;
    file.flush().await
}
