use techai_core::{Mode, SupportSession};
use techai_gateway::SearchHit;

/// Assembles the system context for one generation call. The quota and
/// goodwill rules are enforced in code, so the prompt only carries tone,
/// session facts, and optional knowledge sections.
pub fn build_system_prompt(
    session: &SupportSession,
    mode: Mode,
    tips: &str,
    web_hits: &[SearchHit],
) -> String {
    let mut sections = vec![BASE_PERSONA.to_string(), style_block(mode).to_string()];

    sections.push(format!(
        "SITZUNGSKONTEXT:\n\
         - Thema: \"{}\"\n\
         - Antwort Nummer {} von {} kostenlosen Antworten zu diesem Thema.\n\
         - Thema als gelöst markiert: {}",
        if session.topic_title.is_empty() {
            "unbekannt"
        } else {
            session.topic_title.as_str()
        },
        session.answer_count + 1,
        session.free_limit,
        if session.solved { "ja" } else { "nein" },
    ));

    if !tips.trim().is_empty() {
        sections.push(format!(
            "INTERNES VERKÄUFERWISSEN (NUR FÜR DICH, NICHT WÖRTLICH ZITIEREN):\n\
             Nutze die folgenden Notizen nur für sinnvolle Rückfragen und typische \
             Fehlerquellen, und formuliere alles in eigenen, kundenfreundlichen Sätzen.\n\n{}",
            tips.trim()
        ));
    }

    if !web_hits.is_empty() {
        let joined = web_hits
            .iter()
            .enumerate()
            .map(|(index, hit)| {
                format!(
                    "Quelle [{}]: {}\nLink: {}\nKurzinfo: {}",
                    index + 1,
                    hit.title,
                    hit.link,
                    hit.snippet
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        sections.push(format!(
            "WEBRECHERCHE:\nFasse die folgenden Suchergebnisse vorsichtig in eigenen Worten \
             zusammen und mache keine harten Werbeversprechen.\n\n{joined}"
        ));
    }

    sections.join("\n\n")
}

const BASE_PERSONA: &str = "Du bist \"Tech-AI\", ein ruhiger, geduldiger Technik-Assistent auf \
Deutsch. Du hilfst bei Smartphones, PCs, Konsolen, Fernsehern, Kopfhörern und ähnlicher Technik, \
Schritt für Schritt wie ein freundlicher Verkäufer im Elektronikmarkt. Du bist ehrlich, bleibst \
bei genervten Kunden besonders ruhig und führst keine Zahlungen aus – über Abos und Preise \
sprichst du nur in Textform.";

fn style_block(mode: Mode) -> &'static str {
    match mode {
        Mode::Unerfahren => {
            "KUNDENMODUS: Erkläre ohne Fachwörter, in kurzen, klaren Sätzen, \
             Schritt für Schritt. Fachbegriffe nur, wenn der Kunde ausdrücklich \
             eine genauere Erklärung verlangt."
        }
        Mode::Erfahren => {
            "TECHNIKMODUS: Du darfst Fachbegriffe benutzen, bleibst aber ruhig, \
             präzise und strukturiert, wie ein erfahrener, geduldiger Techniker."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_session_facts() {
        let mut session = SupportSession::new("s1", "TV zeigt kein Signal");
        session.answer_count = 4;

        let prompt = build_system_prompt(&session, Mode::Unerfahren, "", &[]);
        assert!(prompt.contains("TV zeigt kein Signal"));
        assert!(prompt.contains("Antwort Nummer 5 von 25"));
        assert!(prompt.contains("KUNDENMODUS"));
        assert!(!prompt.contains("VERKÄUFERWISSEN"));
    }

    #[test]
    fn tips_and_web_hits_are_injected() {
        let session = SupportSession::new("s1", "WLAN-Probleme");
        let hits = vec![SearchHit {
            title: "Router-Neustart".to_string(),
            link: "https://example.com".to_string(),
            snippet: "Hilft oft".to_string(),
        }];

        let prompt = build_system_prompt(
            &session,
            Mode::Erfahren,
            "Erst Anschluss klären, dann Kompatibilität.",
            &hits,
        );
        assert!(prompt.contains("VERKÄUFERWISSEN"));
        assert!(prompt.contains("Quelle [1]: Router-Neustart"));
        assert!(prompt.contains("TECHNIKMODUS"));
    }
}
