//! Follow-up suggestion engine.
//!
//! Derives a short list of tappable follow-up prompts from the final
//! text of an assistant reply, keyed on the wellness topics it touches.
//! Pure text matching, no model involved.

use std::sync::LazyLock;

use regex::Regex;

/// Wellness topics the engine recognizes in reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Sleep,
    Stress,
    Mood,
    Movement,
    Gratitude,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Sleep => "sleep",
            Topic::Stress => "stress",
            Topic::Mood => "mood",
            Topic::Movement => "movement",
            Topic::Gratitude => "gratitude",
        }
    }
}

struct TopicPattern {
    topic: Topic,
    pattern: Regex,
}

static TOPIC_PATTERNS: LazyLock<Vec<TopicPattern>> = LazyLock::new(|| {
    let mk = |topic, pattern: &str| TopicPattern {
        topic,
        pattern: Regex::new(pattern).expect("Invalid topic regex"),
    };
    vec![
        mk(
            Topic::Sleep,
            r"(?i)\b(sleep|insomnia|tired|rest|bedtime|nap|dream)\w*",
        ),
        mk(
            Topic::Stress,
            r"(?i)\b(stress|anxious|anxiety|overwhelm|worry|worried|tense|pressure)\w*",
        ),
        mk(
            Topic::Mood,
            r"(?i)\b(sad|down|lonely|mood|unhappy|grief|cry|depress)\w*",
        ),
        mk(
            Topic::Movement,
            r"(?i)\b(exercise|walk|run|stretch|yoga|move|movement)\w*",
        ),
        mk(
            Topic::Gratitude,
            r"(?i)\b(grateful|gratitude|thankful|appreciate)\w*",
        ),
    ]
});

/// Derives 2-4 follow-up prompts from assistant reply text.
pub struct SuggestionEngine {
    max_suggestions: usize,
}

impl SuggestionEngine {
    pub fn new() -> Self {
        Self { max_suggestions: 4 }
    }

    /// Topics detected in `text`, in a stable order.
    pub fn detect_topics(&self, text: &str) -> Vec<Topic> {
        TOPIC_PATTERNS
            .iter()
            .filter(|tp| tp.pattern.is_match(text))
            .map(|tp| tp.topic)
            .collect()
    }

    /// Follow-up prompts for `text`. Always between 2 and 4 entries.
    pub fn suggest(&self, text: &str) -> Vec<String> {
        let mut suggestions = Vec::new();
        for topic in self.detect_topics(text) {
            let prompt = match topic {
                Topic::Sleep => "What's a good wind-down routine?",
                Topic::Stress => "Can you walk me through a breathing exercise?",
                Topic::Mood => "What are some small things that lift a low mood?",
                Topic::Movement => "What's an easy way to move more each day?",
                Topic::Gratitude => "Can you give me a gratitude prompt?",
            };
            suggestions.push(prompt.to_string());
        }

        // Leave room for the generic follow-up, then pad to at least two.
        suggestions.truncate(self.max_suggestions - 1);
        suggestions.push("Tell me more about this".to_string());
        if suggestions.len() < 2 {
            suggestions.push("How can I make this a daily habit?".to_string());
        }
        suggestions
    }
}

impl Default for SuggestionEngine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
