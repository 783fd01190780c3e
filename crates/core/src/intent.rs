use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

use crate::models::Intent;

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn classify_intent_rules(text: &str) -> Intent {
    let lower = text.to_lowercase();

    if contains_any(
        &lower,
        &[
            "neues thema",
            "anderes thema",
            "anderes problem",
            "neue frage",
            "andere frage",
            "was ganz anderes",
            "noch ein problem",
            "nein, neues thema",
        ],
    ) {
        return Intent::NewTopic;
    }

    // Offers to show something, not reports about broken displays: a bare
    // "bild"/"kamera" would misfire on "TV zeigt kein Bild".
    if contains_any(
        &lower,
        &[
            "foto",
            "screenshot",
            "bildschirmfoto",
            "hier ein bild",
            "bild davon",
            "bild geschickt",
            "siehst du",
            "schau mal",
            "zeig ich dir",
            "kann ich dir zeigen",
        ],
    ) {
        return Intent::VisualHelp;
    }

    if contains_any(
        &lower,
        &[
            "vorlesen",
            "sprachausgabe",
            "dunkelmodus",
            "heller stellen",
            "dunkler stellen",
            "lauter",
            "leiser",
            "modus wechseln",
            "einstellungen ändern",
            "sprache ändern",
        ],
    ) {
        return Intent::Settings;
    }

    Intent::Normal
}

/// Word-overlap heuristic for "is this still the same problem". Short
/// follow-ups ("geht nicht", "und jetzt?") are assumed to continue the topic;
/// longer messages must share at least one significant word with the title.
pub fn is_same_topic(topic_title: &str, text: &str) -> bool {
    let title_words = significant_words(topic_title);
    if title_words.is_empty() {
        return true;
    }

    let text_words = significant_words(text);
    if text_words.len() <= 3 {
        return true;
    }

    text_words.iter().any(|word| title_words.contains(word))
}

/// Detects "nothing else needed" confirmations in the closure dialogue after
/// a topic was marked solved.
pub fn is_closure_confirmation(text: &str) -> bool {
    let lower = text.to_lowercase();
    contains_any(
        &lower,
        &[
            "alles gut",
            "alles klar",
            "alles geklärt",
            "alles bestens",
            "passt so",
            "passt, danke",
            "nein danke",
            "nichts mehr",
            "das war's",
            "das wars",
            "ja, sicher",
            "ja sicher",
            "ganz sicher",
            "bin sicher",
            "ja, bin mir sicher",
        ],
    )
}

const STOPWORDS: &[&str] = &[
    "aber", "alle", "also", "auch", "bitte", "dann", "danke", "dass", "dein", "dem", "den", "der",
    "des", "die", "dies", "doch", "ein", "eine", "einen", "einem", "für", "geht", "habe", "haben",
    "hat", "ich", "ihr", "immer", "ist", "jetzt", "kann", "kein", "mein", "meine", "mehr", "mich",
    "mir", "mit", "nicht", "noch", "nur", "ohne", "schon", "sein", "sich", "sie", "sind", "und",
    "uns", "von", "war", "was", "wie", "wird", "zum", "zur",
];

fn significant_words(input: &str) -> HashSet<String> {
    input
        .unicode_words()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() >= 3)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_new_topic_phrases() {
        assert_eq!(
            classify_intent_rules("Übrigens, ich hätte noch ein anderes Problem mit dem Drucker"),
            Intent::NewTopic
        );
    }

    #[test]
    fn classifies_visual_help() {
        assert_eq!(
            classify_intent_rules("Ich kann dir ein Foto von dem Kabel schicken"),
            Intent::VisualHelp
        );
    }

    #[test]
    fn classifies_settings() {
        assert_eq!(
            classify_intent_rules("Kannst du die Antworten bitte vorlesen?"),
            Intent::Settings
        );
    }

    #[test]
    fn everything_else_is_normal() {
        assert_eq!(
            classify_intent_rules("Meine Kopfhörer verbinden sich nicht mit dem Handy"),
            Intent::Normal
        );
    }

    #[test]
    fn broken_display_reports_are_not_visual_help() {
        assert_eq!(
            classify_intent_rules("Mein Fernseher zeigt kein Bild über HDMI"),
            Intent::Normal
        );
    }

    #[test]
    fn short_follow_ups_stay_on_topic() {
        assert!(is_same_topic("Bluetooth-Kopfhörer verbinden sich nicht", "geht immer noch nicht"));
    }

    #[test]
    fn overlapping_words_stay_on_topic() {
        assert!(is_same_topic(
            "Bluetooth-Kopfhörer verbinden sich nicht",
            "Die Kopfhörer tauchen in der Liste einfach nicht mehr auf, was kann ich tun?"
        ));
    }

    #[test]
    fn clearly_different_problem_is_detected() {
        assert!(!is_same_topic(
            "Bluetooth-Kopfhörer verbinden sich nicht",
            "Mein Fernseher zeigt über HDMI überhaupt kein Signal mehr an seit gestern"
        ));
    }

    #[test]
    fn closure_confirmations_are_detected() {
        assert!(is_closure_confirmation("Nein danke, alles gut jetzt"));
        assert!(is_closure_confirmation("Ja, bin mir sicher"));
        assert!(!is_closure_confirmation("Eine Sache hätte ich noch"));
    }
}
