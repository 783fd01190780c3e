use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free model-backed answers per topic before paywall messaging starts.
pub const FREE_LIMIT: u32 = 25;

/// Soft same-problem checks granted for new-topic attempts on a blocked
/// session; further attempts get the paywall reply.
pub const HARD_WARNINGS: u32 = 3;

/// Tolerated off-topic deviations per session before forced closure.
pub const OFF_TOPIC_MAX_STRIKES: u8 = 3;

/// Rolling history entries kept per session.
pub const HISTORY_KEEP: usize = 24;

const TOPIC_TITLE_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Unerfahren,
    Erfahren,
}

impl Mode {
    pub fn from_optional_str(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "erfahren" || v == "experienced" || v == "expert" => Self::Erfahren,
            _ => Self::Unerfahren,
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Unerfahren => "unerfahren",
            Self::Erfahren => "erfahren",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Normal,
    VisualHelp,
    NewTopic,
    Settings,
}

impl Intent {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::VisualHelp => "visual_help",
            Self::NewTopic => "new_topic",
            Self::Settings => "settings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppShortcut {
    pub label: String,
    pub url: String,
}

/// Structured reply delivered to the client, whether composed by the policy
/// engine or returned by the model gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub reply: String,
    pub suggestions: Vec<String>,
    pub app_shortcuts: Vec<AppShortcut>,
}

impl AssistantReply {
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            suggestions: Vec::new(),
            app_shortcuts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub at: DateTime<Utc>,
    pub user_text: String,
    pub assistant_text: String,
    pub intent: Intent,
}

/// Per-conversation quota and goodwill state. Lives in process memory (or an
/// optional swappable backing store) for the lifetime of the process;
/// sessions are never expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportSession {
    pub session_id: String,
    pub topic_id: String,
    pub topic_title: String,
    pub answer_count: u32,
    pub free_limit: u32,
    pub warnings: u32,
    pub blocked_new_topics: bool,
    pub solved: bool,
    pub closed: bool,
    pub off_topic_strikes: u8,
    pub close_confirmations: u8,
    pub limit_notice_sent: bool,
    pub voice_notice_sent: bool,
    pub difficulty_signals: u32,
    pub difficulty_logged: bool,
    pub turns: Vec<ChatTurn>,
}

impl SupportSession {
    pub fn new(session_id: &str, topic_title: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            topic_id: Uuid::new_v4().to_string(),
            topic_title: topic_title.to_string(),
            answer_count: 0,
            free_limit: FREE_LIMIT,
            warnings: 0,
            blocked_new_topics: false,
            solved: false,
            closed: false,
            off_topic_strikes: 0,
            close_confirmations: 0,
            limit_notice_sent: false,
            voice_notice_sent: false,
            difficulty_signals: 0,
            difficulty_logged: false,
            turns: Vec::new(),
        }
    }

    /// Starts a fresh topic on the same session identifier. Only reachable
    /// while `blocked_new_topics` is false; the blocked flag itself is never
    /// reset here.
    pub fn begin_topic(&mut self, topic_title: &str) {
        self.topic_id = Uuid::new_v4().to_string();
        self.topic_title = topic_title.to_string();
        self.answer_count = 0;
        self.solved = false;
        self.closed = false;
        self.close_confirmations = 0;
        self.limit_notice_sent = false;
    }

    pub fn push_turn(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
        if self.turns.len() > HISTORY_KEEP {
            let keep_from = self.turns.len() - HISTORY_KEEP;
            self.turns = self.turns.split_off(keep_from);
        }
    }
}

/// Topic titles are set once, from the explicit field when the client sends
/// one, otherwise from the first user message of the topic.
pub fn derive_topic_title(explicit: Option<&str>, message: &str) -> String {
    let source = explicit
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(message);

    if source.chars().count() <= TOPIC_TITLE_MAX_CHARS {
        return source.to_string();
    }

    let mut title: String = source.chars().take(TOPIC_TITLE_MAX_CHARS).collect();
    title.push('…');
    title
}
