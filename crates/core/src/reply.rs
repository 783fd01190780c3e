use crate::models::{AppShortcut, AssistantReply};
use crate::policy::{Decision, Notice};

pub const SUBSCRIPTION_URL: &str = "https://tech-ai.app/abo";
pub const PRICE_COMPARE_URL: &str = "https://tech-ai.app/preisvergleich";

pub fn subscription_shortcuts() -> Vec<AppShortcut> {
    vec![AppShortcut {
        label: "Abo ansehen – 2,99 € alle 2 Monate".to_string(),
        url: SUBSCRIPTION_URL.to_string(),
    }]
}

/// Fixed replies for every decision that is served without a model call.
/// `Answer` decisions are composed via [`compose_answer`] instead.
pub fn reply_for_decision(decision: &Decision) -> Option<AssistantReply> {
    match decision {
        Decision::Answer { .. } => None,
        Decision::SameTopicCheck { .. } => Some(same_topic_check_reply()),
        Decision::Paywall => Some(paywall_reply()),
        Decision::RefuseNewTopic => Some(refusal_reply()),
        Decision::ConfirmClose => Some(confirm_close_reply()),
        Decision::CloseTopic => Some(closing_reply()),
        Decision::SettingsAck => Some(settings_ack_reply()),
        Decision::RequestCapture => Some(capture_request_reply()),
    }
}

pub fn same_topic_check_reply() -> AssistantReply {
    AssistantReply {
        reply: "Nur kurz zur Sicherheit: Geht es hier noch um Ihr ursprüngliches Problem, oder \
                ist das ein neues Thema? Die kostenlose Sitzung gilt nur für das ursprüngliche \
                Thema – dieses betreue ich selbstverständlich weiter zu Ende."
            .to_string(),
        suggestions: vec![
            "Ja, gleiches Problem".to_string(),
            "Nein, neues Thema".to_string(),
            "Ich brauche Preisvergleich".to_string(),
        ],
        app_shortcuts: Vec::new(),
    }
}

pub fn paywall_reply() -> AssistantReply {
    AssistantReply {
        reply: "Die kostenlose Sitzung ist für dieses Thema ausgeschöpft, und weitere neue \
                Themen kann ich ohne Abo leider nicht mehr aufnehmen. Mit dem Abo (2,99 € alle \
                2 Monate, also etwa 0,24 € pro Tag) können Sie unbegrenzt weiterfragen. Bei \
                Ihrem ursprünglichen Problem helfe ich natürlich weiter."
            .to_string(),
        suggestions: vec!["Zurück zu meinem Problem".to_string()],
        app_shortcuts: {
            let mut shortcuts = subscription_shortcuts();
            shortcuts.push(AppShortcut {
                label: "Preisvergleich öffnen".to_string(),
                url: PRICE_COMPARE_URL.to_string(),
            });
            shortcuts
        },
    }
}

pub fn refusal_reply() -> AssistantReply {
    AssistantReply {
        reply: "Das ist jetzt das dritte komplett neue Thema in dieser Sitzung – damit muss ich \
                die kostenlose Sitzung offiziell beenden. Ein kurzer Tipp noch: Prüfen Sie bei \
                neuen Geräteproblemen zuerst Stromversorgung, Kabel und einen Neustart. Für \
                vollständige Schritt-für-Schritt-Hilfe zu neuen Themen gibt es das Abo."
            .to_string(),
        suggestions: vec!["Zurück zu meinem ursprünglichen Problem".to_string()],
        app_shortcuts: subscription_shortcuts(),
    }
}

pub fn confirm_close_reply() -> AssistantReply {
    AssistantReply {
        reply: "Schön, dass alles funktioniert! Sind Sie ganz sicher, dass nichts mehr offen \
                ist? Danach ist die kostenlose Sitzung zu diesem Problem beendet."
            .to_string(),
        suggestions: vec![
            "Ja, ganz sicher".to_string(),
            "Doch, eine Frage habe ich noch".to_string(),
        ],
        app_shortcuts: Vec::new(),
    }
}

pub fn closing_reply() -> AssistantReply {
    AssistantReply {
        reply: "Alles klar – dann ist die kostenlose Sitzung zu diesem Thema jetzt offiziell \
                beendet. Für unbegrenzte Fragen gibt es das Abo: 2,99 € alle 2 Monate, das sind \
                etwa 0,24 € pro Tag. Vielen Dank und weiterhin viel Erfolg mit Ihrer Technik!"
            .to_string(),
        suggestions: Vec::new(),
        app_shortcuts: subscription_shortcuts(),
    }
}

pub fn settings_ack_reply() -> AssistantReply {
    AssistantReply {
        reply: "Das ist eine Einstellung der Oberfläche und zählt nicht zu Ihren kostenlosen \
                Antworten. Nutzen Sie dafür die Schalter oben im Chat – zum Beispiel Vorlesen, \
                Modus oder Sprache."
            .to_string(),
        suggestions: vec!["Weiter mit meinem Problem".to_string()],
        app_shortcuts: Vec::new(),
    }
}

pub fn capture_request_reply() -> AssistantReply {
    AssistantReply {
        reply: "Dafür wäre ein Foto oder Screenshot sehr hilfreich. Nutzen Sie die Kamera- oder \
                Galerie-Taste – danach schaue ich mir das Bild direkt an."
            .to_string(),
        suggestions: vec![
            "📷 Foto aufnehmen".to_string(),
            "🖼 Bild aus der Galerie".to_string(),
            "Ohne Bild weitermachen".to_string(),
        ],
        app_shortcuts: Vec::new(),
    }
}

fn notice_paragraph(notice: Notice, free_limit: u32) -> String {
    match notice {
        Notice::FreeSessionExhausted => format!(
            "Hinweis: Das war die {free_limit}. kostenlose Antwort – Ihre kostenlose Sitzung zu \
             diesem Thema ist damit offiziell voll. Dieses konkrete Problem betreue ich aber \
             selbstverständlich aus Kulanz vollständig zu Ende."
        ),
        Notice::OffTopicCourtesy => "Kurzer Hinweis: Das ist eigentlich ein neues Thema. Ich \
                                     nehme es aus Kulanz noch mit in diese Sitzung auf."
            .to_string(),
        Notice::OffTopicLastCourtesy => "Hinweis: Das ist schon wieder ein neues Thema. Ich \
                                         nehme es ausnahmsweise noch mit auf – beim nächsten \
                                         komplett neuen Thema muss ich die kostenlose Sitzung \
                                         aber beenden."
            .to_string(),
        Notice::VoiceTimeCapped => "Die Sprachhilfe war jetzt etwa 8 Minuten aktiv – ohne Abo \
                                    kann ich nicht länger im Sprachchat bleiben. Im Text-Chat \
                                    helfe ich bei diesem Problem aber weiter, bis es wirklich \
                                    gelöst ist."
            .to_string(),
    }
}

/// Prepends the policy notices to a model-generated reply. The model text is
/// kept verbatim; notices are deterministic and never delegated to the model.
pub fn compose_answer(
    generated: AssistantReply,
    notices: &[Notice],
    free_limit: u32,
) -> AssistantReply {
    if notices.is_empty() {
        return generated;
    }

    let mut paragraphs: Vec<String> = notices
        .iter()
        .map(|notice| notice_paragraph(*notice, free_limit))
        .collect();
    paragraphs.push(generated.reply);

    AssistantReply {
        reply: paragraphs.join("\n\n"),
        suggestions: generated.suggestions,
        app_shortcuts: generated.app_shortcuts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_notice_is_prepended_to_the_model_reply() {
        let composed = compose_answer(
            AssistantReply::text("Versuchen Sie zuerst einen Neustart."),
            &[Notice::FreeSessionExhausted],
            25,
        );
        assert!(composed.reply.starts_with("Hinweis: Das war die 25."));
        assert!(composed.reply.ends_with("Neustart."));
    }

    #[test]
    fn composing_without_notices_is_a_no_op() {
        let generated = AssistantReply::text("Schritt 1: Bluetooth aus- und wieder einschalten.");
        assert_eq!(compose_answer(generated.clone(), &[], 25), generated);
    }

    #[test]
    fn paywall_reply_carries_subscription_shortcuts() {
        let reply = paywall_reply();
        assert!(reply.reply.contains("2,99 €"));
        assert_eq!(reply.app_shortcuts.len(), 2);
        assert_eq!(reply.app_shortcuts[0].url, SUBSCRIPTION_URL);
        assert_eq!(reply.app_shortcuts[1].url, PRICE_COMPARE_URL);
    }

    #[test]
    fn same_topic_check_offers_the_three_choices() {
        let reply = same_topic_check_reply();
        assert_eq!(
            reply.suggestions,
            vec![
                "Ja, gleiches Problem",
                "Nein, neues Thema",
                "Ich brauche Preisvergleich"
            ]
        );
    }
}
