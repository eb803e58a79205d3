//! Risk classifier — deterministic crisis phrase matching.
//!
//! Text is normalized (lowercased, apostrophes dropped, punctuation folded to
//! single spaces) and tested for substring containment against a curated
//! phrase list. The same list screens user input and model output.

/// Built-in crisis phrases: self-harm intent, method references and
/// hopelessness markers. Extensions may add to this list, never remove.
pub const CRISIS_PHRASES: &[&str] = &[
    "kill myself",
    "killing myself",
    "suicide",
    "suicidal",
    "end my life",
    "ending my life",
    "end it all",
    "take my own life",
    "want to die",
    "wanna die",
    "wish i was dead",
    "wish i were dead",
    "better off dead",
    "better off without me",
    "no reason to live",
    "nothing to live for",
    "don't want to live",
    "don't want to be alive",
    "not worth living",
    "can't go on",
    "self harm",
    "self-harm",
    "hurt myself",
    "hurting myself",
    "cut myself",
    "cutting myself",
    "overdose",
    "hang myself",
    "slit my wrists",
    "jump off a bridge",
];

/// Ephemeral result of a classification. `matched_phrase` is diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_crisis: bool,
    pub matched_phrase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RiskClassifier {
    phrases: Vec<String>,
}

impl RiskClassifier {
    pub fn new() -> Self {
        Self::with_extra_phrases(std::iter::empty::<String>())
    }

    /// Built-in list plus `extra` phrases (blank entries ignored).
    pub fn with_extra_phrases<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phrases: Vec<String> = Vec::with_capacity(CRISIS_PHRASES.len());
        let builtin = CRISIS_PHRASES.iter().map(|p| normalize(p));
        for normalized in builtin.chain(extra.into_iter().map(|p| normalize(p.as_ref()))) {
            if !normalized.is_empty() && !phrases.contains(&normalized) {
                phrases.push(normalized);
            }
        }
        Self { phrases }
    }

    pub fn classify(&self, text: &str) -> bool {
        self.assess(text).is_crisis
    }

    pub fn assess(&self, text: &str) -> Classification {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Classification {
                is_crisis: false,
                matched_phrase: None,
            };
        }

        match self.phrases.iter().find(|p| normalized.contains(p.as_str())) {
            Some(phrase) => {
                tracing::warn!(phrase = %phrase, "Crisis phrase detected");
                Classification {
                    is_crisis: true,
                    matched_phrase: Some(phrase.clone()),
                }
            }
            None => Classification {
                is_crisis: false,
                matched_phrase: None,
            },
        }
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, drop apostrophes, fold every other non-alphanumeric run into a
/// single space.
pub(crate) fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if matches!(ch, '\'' | '\u{2019}' | '\u{2018}' | '`') {
            continue;
        }
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_phrase_matches_in_any_casing() {
        let classifier = RiskClassifier::new();
        for phrase in CRISIS_PHRASES {
            assert!(classifier.classify(phrase), "lowercase: {}", phrase);
            assert!(
                classifier.classify(&phrase.to_uppercase()),
                "uppercase: {}",
                phrase
            );
            let embedded = format!("Honestly... {}!!", phrase);
            assert!(classifier.classify(&embedded), "embedded: {}", embedded);
        }
    }

    #[test]
    fn test_punctuation_and_apostrophe_variants() {
        let classifier = RiskClassifier::new();
        assert!(classifier.classify("I want to KILL-myself"));
        assert!(classifier.classify("i dont want to live anymore"));
        assert!(classifier.classify("I don\u{2019}t want to live"));
        assert!(classifier.classify("thinking about self harm"));
        assert!(classifier.classify("SELF-HARM"));
        assert!(classifier.classify("I   want   to   die"));
    }

    #[test]
    fn test_ordinary_messages_are_not_crisis() {
        let classifier = RiskClassifier::new();
        assert!(!classifier.classify("I can't sleep, it's 3am"));
        assert!(!classifier.classify("Work is stressing me out"));
        assert!(!classifier.classify("hello there"));
    }

    #[test]
    fn test_empty_input_is_not_crisis() {
        let classifier = RiskClassifier::new();
        assert!(!classifier.classify(""));
        assert!(!classifier.classify("   \n\t"));
        assert!(!classifier.classify("?!..."));
    }

    #[test]
    fn test_assess_reports_matched_phrase() {
        let classifier = RiskClassifier::new();
        let result = classifier.assess("I want to kill myself");
        assert!(result.is_crisis);
        assert_eq!(result.matched_phrase.as_deref(), Some("kill myself"));

        let calm = classifier.assess("good morning");
        assert!(!calm.is_crisis);
        assert!(calm.matched_phrase.is_none());
    }

    #[test]
    fn test_builtin_spelling_variants_count_once() {
        let classifier = RiskClassifier::new();
        let mut distinct: Vec<String> = CRISIS_PHRASES.iter().map(|p| normalize(p)).collect();
        distinct.sort();
        distinct.dedup();

        assert_eq!(classifier.phrase_count(), distinct.len());
        assert!(classifier.phrase_count() < CRISIS_PHRASES.len());
        assert_eq!(
            classifier.phrases.iter().filter(|p| p.as_str() == "self harm").count(),
            1
        );
    }

    #[test]
    fn test_extra_phrases_extend_builtin_list() {
        let base = RiskClassifier::new();
        let extended = RiskClassifier::with_extra_phrases(["Give Away My Things", "  ", "suicide"]);
        assert_eq!(extended.phrase_count(), base.phrase_count() + 1);
        assert!(extended.classify("I'm going to give away my things"));
        assert!(extended.classify("suicide"));
        assert!(!base.classify("I'm going to give away my things"));
    }

    #[test]
    fn test_normalize_folds_punctuation() {
        assert_eq!(normalize("  Don't   STOP -- now! "), "dont stop now");
        assert_eq!(normalize(""), "");
    }
}
