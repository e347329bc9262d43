/// Topic inference by keyword scan used to pick reply templates.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Hint,
    Lore,
    Quest,
    Banter,
}

impl Topic {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hint => "hint",
            Self::Lore => "lore",
            Self::Quest => "quest",
            Self::Banter => "banter",
        }
    }

    /// Returns the tag string for this topic (e.g., "topic:hint").
    pub fn tag(&self) -> String {
        format!("topic:{}", self.name())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const HINT_WORDS: &[&str] = &["hint", "help", "stuck", "clue", "how do i", "where do i", "what now"];
const LORE_WORDS: &[&str] = &["history", "legend", "story", "remember", "long ago", "who built", "origin"];
const QUEST_WORDS: &[&str] = &["quest", "mission", "task", "objective", "deliver", "reward", "job"];

/// Map free text to a topic. Checked in hint, lore, quest order;
/// anything else is banter.
pub fn infer_topic(text: &str) -> Topic {
    let lower = text.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if mentions(HINT_WORDS) {
        Topic::Hint
    } else if mentions(LORE_WORDS) {
        Topic::Lore
    } else if mentions(QUEST_WORDS) {
        Topic::Quest
    } else {
        Topic::Banter
    }
}
