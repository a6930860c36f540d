use crate::types::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Image,
    Text,
}

/// Returned by a remote classification pass that could not produce a usable
/// answer (transport failure, HTTP error, unparseable reply). Callers fold it
/// back into the heuristic result; it never fails a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifySkip;

/// Decides whether a prompt wants an image or a text answer.
///
/// The phrase lists are data, not logic: the defaults are hand-tuned for the
/// design-review domain and callers may replace them wholesale.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    pub visual_signals: Vec<String>,
    pub question_words: Vec<String>,
    pub advisory_phrases: Vec<String>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        fn owned(words: &[&str]) -> Vec<String> {
            words.iter().map(|w| w.to_string()).collect()
        }
        Self {
            visual_signals: owned(&[
                "generate",
                "render",
                "mockup",
                "mock-up",
                "use attached image",
                "use the attached image",
                "show me",
                "sketch",
                "concept",
                "visualize",
                "draw",
                "redesign",
                "illustration",
            ]),
            question_words: owned(&[
                "what", "why", "how", "when", "where", "which", "who", "should", "would",
                "could", "can", "is", "are", "do", "does",
            ]),
            advisory_phrases: owned(&[
                "pros and cons",
                "recommendation",
                "recommend",
                "best options",
                "compare",
                "trade-off",
                "tradeoff",
                "advice",
                "suggest",
            ]),
        }
    }
}

impl IntentClassifier {
    pub fn classify(&self, prompt: &str, mode: Mode) -> Intent {
        match mode {
            Mode::ForceImage => Intent::Image,
            Mode::Text => Intent::Text,
            Mode::Auto | Mode::Image => self.heuristic(prompt),
        }
    }

    /// Deterministic pass over the lowercased prompt: visual signals win,
    /// then question/advisory shapes, then image by default.
    pub fn heuristic(&self, prompt: &str) -> Intent {
        let lower = prompt.to_lowercase();

        if self.visual_signals.iter().any(|s| lower.contains(s.as_str())) {
            return Intent::Image;
        }

        let first_word = lower
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_alphanumeric());
        let looks_like_question = self.question_words.iter().any(|w| first_word == w)
            || lower.contains('?')
            || self
                .advisory_phrases
                .iter()
                .any(|p| lower.contains(p.as_str()));
        if looks_like_question {
            return Intent::Text;
        }

        Intent::Image
    }
}
