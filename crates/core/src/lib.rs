pub mod intent;
pub mod models;
pub mod policy;
pub mod reply;

pub use intent::{classify_intent_rules, is_closure_confirmation, is_same_topic, normalize_text};
pub use models::*;
pub use policy::{apply_decision, evaluate, record_answer, Decision, Notice, TurnRequest};
pub use reply::{compose_answer, reply_for_decision};
