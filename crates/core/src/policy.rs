use crate::models::{Intent, SupportSession, HARD_WARNINGS, OFF_TOPIC_MAX_STRIKES};

/// Classified view of one incoming chat turn, assembled by the caller before
/// any state is touched.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub intent: Intent,
    pub explicit_new_topic: bool,
    pub closure_confirmation: bool,
    pub voice_session_ended: bool,
    pub has_image: bool,
}

/// Deterministic notices attached to an otherwise normal answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    FreeSessionExhausted,
    OffTopicCourtesy,
    OffTopicLastCourtesy,
    VoiceTimeCapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Serve a model-backed answer. `fresh_topic` means the session restarts
    /// on a new topic before the answer is recorded.
    Answer {
        notices: Vec<Notice>,
        fresh_topic: bool,
    },
    /// Soft check whether the user is still on the original problem.
    /// `attempt` is 1-based; attempts beyond `HARD_WARNINGS` become `Paywall`.
    SameTopicCheck { attempt: u32 },
    Paywall,
    /// Third off-topic strike: minimal pointer only, session gets blocked.
    RefuseNewTopic,
    /// First closure confirmation: ask once more whether the user is certain.
    ConfirmClose,
    /// Second closure confirmation: closing message with subscription pricing.
    CloseTopic,
    /// UI/settings turns are exempt from quota accounting.
    SettingsAck,
    /// Visual help requested without an attached image.
    RequestCapture,
}

/// Pure decision procedure for one turn. All mutations happen afterwards in
/// [`apply_decision`] or [`record_answer`].
pub fn evaluate(session: &SupportSession, turn: &TurnRequest) -> Decision {
    if turn.intent == Intent::Settings {
        return Decision::SettingsAck;
    }
    if turn.intent == Intent::VisualHelp && !turn.has_image {
        return Decision::RequestCapture;
    }

    let wants_new_topic = turn.explicit_new_topic || turn.intent == Intent::NewTopic;

    if session.blocked_new_topics {
        if wants_new_topic {
            let attempt = session.warnings + 1;
            return if attempt <= HARD_WARNINGS {
                Decision::SameTopicCheck { attempt }
            } else {
                Decision::Paywall
            };
        }
        if session.solved && !session.closed && turn.closure_confirmation {
            return closure_step(session);
        }
        return Decision::Answer {
            notices: answer_notices(session, turn),
            fresh_topic: false,
        };
    }

    if session.solved && !session.closed {
        if turn.closure_confirmation {
            return closure_step(session);
        }
        if wants_new_topic {
            return strike(session, turn);
        }
        return Decision::Answer {
            notices: answer_notices(session, turn),
            fresh_topic: false,
        };
    }

    if wants_new_topic {
        if turn.explicit_new_topic {
            // Explicit "new topic" action on an unblocked, unsolved session
            // restarts the session on a fresh topic with a fresh quota.
            let mut notices = Vec::new();
            if turn.voice_session_ended && !session.voice_notice_sent {
                notices.push(Notice::VoiceTimeCapped);
            }
            return Decision::Answer {
                notices,
                fresh_topic: true,
            };
        }
        return strike(session, turn);
    }

    Decision::Answer {
        notices: answer_notices(session, turn),
        fresh_topic: false,
    }
}

fn closure_step(session: &SupportSession) -> Decision {
    if session.close_confirmations == 0 {
        Decision::ConfirmClose
    } else {
        Decision::CloseTopic
    }
}

fn strike(session: &SupportSession, turn: &TurnRequest) -> Decision {
    match session.off_topic_strikes {
        0 => {
            let mut notices = answer_notices(session, turn);
            notices.insert(0, Notice::OffTopicCourtesy);
            Decision::Answer {
                notices,
                fresh_topic: false,
            }
        }
        1 => {
            let mut notices = answer_notices(session, turn);
            notices.insert(0, Notice::OffTopicLastCourtesy);
            Decision::Answer {
                notices,
                fresh_topic: false,
            }
        }
        _ => Decision::RefuseNewTopic,
    }
}

fn answer_notices(session: &SupportSession, turn: &TurnRequest) -> Vec<Notice> {
    let mut notices = Vec::new();

    if !session.limit_notice_sent && session.answer_count + 1 >= session.free_limit {
        notices.push(Notice::FreeSessionExhausted);
    }
    if turn.voice_session_ended && !session.voice_notice_sent {
        notices.push(Notice::VoiceTimeCapped);
    }

    notices
}

/// State transitions for decisions that are answered without a model call.
pub fn apply_decision(session: &mut SupportSession, decision: &Decision) {
    match decision {
        Decision::SameTopicCheck { .. } | Decision::Paywall => {
            session.warnings += 1;
        }
        Decision::RefuseNewTopic => {
            session.off_topic_strikes = OFF_TOPIC_MAX_STRIKES;
            session.blocked_new_topics = true;
        }
        Decision::ConfirmClose => {
            session.close_confirmations = 1;
        }
        Decision::CloseTopic => {
            session.close_confirmations = 2;
            session.closed = true;
            session.blocked_new_topics = true;
        }
        Decision::SettingsAck | Decision::RequestCapture | Decision::Answer { .. } => {}
    }
}

/// Commits one successfully served model-backed answer. Must only be called
/// after the gateway delivered a reply; a failed generation leaves the
/// session untouched.
pub fn record_answer(
    session: &mut SupportSession,
    notices: &[Notice],
    fresh_topic: bool,
    fresh_topic_title: &str,
) {
    if fresh_topic {
        session.begin_topic(fresh_topic_title);
    }

    for notice in notices {
        match notice {
            Notice::FreeSessionExhausted => session.limit_notice_sent = true,
            Notice::VoiceTimeCapped => session.voice_notice_sent = true,
            Notice::OffTopicCourtesy | Notice::OffTopicLastCourtesy => {
                session.off_topic_strikes =
                    (session.off_topic_strikes + 1).min(OFF_TOPIC_MAX_STRIKES);
            }
        }
    }

    session.answer_count += 1;
    if session.answer_count >= session.free_limit {
        session.blocked_new_topics = true;
    }

    // A served same-topic answer after "solved" means the user had more to
    // ask; the closure dialogue starts over.
    if session.solved && !session.closed {
        session.close_confirmations = 0;
    }
}
