//! Opt-out keyword detection.

use serde::Serialize;

/// Stop keywords accepted in any supported language. Entries are already
/// normalized (lowercase, single spaces).
pub const OPT_OUT_KEYWORDS: &[&str] = &[
    // English
    "stop",
    "stopall",
    "stop all",
    "unsubscribe",
    "cancel",
    "end",
    "quit",
    "opt out",
    "optout",
    "remove me",
    // French
    "arret",
    "arrêt",
    "stop sms",
    "desabonner",
    "désabonner",
    "desinscrire",
    "désinscrire",
    // Spanish / Portuguese / Italian
    "baja",
    "alto",
    "parar",
    "basta",
    // German
    "stopp",
    "abmelden",
];

/// Result of scanning one message for an opt-out request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptOutDetection {
    pub is_opt_out: bool,
    pub matched_keyword: Option<&'static str>,
}

impl OptOutDetection {
    fn none() -> Self {
        Self {
            is_opt_out: false,
            matched_keyword: None,
        }
    }
}

/// Lowercase, trim, collapse whitespace, and drop trailing punctuation.
pub fn normalize(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c == '¡' || c == '¿')
        .trim_end()
        .to_string()
}

/// Detect an opt-out request.
///
/// A keyword matches when it is the whole normalized message or is followed
/// by a space. `"stop"` matches `"STOP"` and `"stop please"` but never
/// `"stopper la voiture"`.
pub fn detect_opt_out(text: &str) -> OptOutDetection {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return OptOutDetection::none();
    }
    for keyword in OPT_OUT_KEYWORDS {
        let matched = match normalized.strip_prefix(keyword) {
            Some("") => true,
            Some(rest) => rest.starts_with(' '),
            None => false,
        };
        if matched {
            return OptOutDetection {
                is_opt_out: true,
                matched_keyword: Some(keyword),
            };
        }
    }
    OptOutDetection::none()
}
