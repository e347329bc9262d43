/// Voice system: per-agent speech style applied to generated replies.
use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::schema::agent::AgentId;

/// How an agent talks. Unset fields inherit from `parent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub agent: AgentId,
    #[serde(default)]
    pub parent: Option<AgentId>,
    /// 0.0 = slangy, 1.0 = stiffly formal.
    #[serde(default)]
    pub formality: Option<f32>,
    /// 0.0 = rambling, 1.0 = clipped to a single sentence.
    #[serde(default)]
    pub terseness: Option<f32>,
    #[serde(default)]
    pub interjections: Vec<Interjection>,
    /// Whole-word substitutions, e.g. "friend" to "comrade".
    #[serde(default)]
    pub vocabulary: HashMap<String, String>,
}

/// A characteristic phrase occasionally added to a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interjection {
    pub text: String,
    /// Probability of injecting per line (0.0..1.0).
    pub frequency: f32,
    #[serde(default)]
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Placement {
    #[default]
    Before,
    After,
}

/// A fully resolved voice with inheritance chain merged.
#[derive(Debug, Clone)]
pub struct ResolvedVoice {
    pub agent: AgentId,
    pub formality: f32,
    pub terseness: f32,
    pub interjections: Vec<Interjection>,
    pub vocabulary: HashMap<String, String>,
}

const CONTRACTIONS: &[(&str, &str)] = &[
    ("do not", "don't"),
    ("Do not", "Don't"),
    ("cannot", "can't"),
    ("will not", "won't"),
    ("is not", "isn't"),
    ("I am", "I'm"),
    ("I have", "I've"),
    ("it is", "it's"),
    ("It is", "It's"),
    ("you are", "you're"),
    ("You are", "You're"),
    ("we are", "we're"),
    ("let us", "let's"),
    ("Let us", "Let's"),
];

impl ResolvedVoice {
    /// Restyle `text` in this voice: vocabulary swaps, formality,
    /// terseness, then at most one interjection.
    pub fn apply(&self, text: &str, rng: &mut StdRng) -> String {
        let mut out = text.to_string();

        for (from, to) in &self.vocabulary {
            out = replace_words(&out, from, to);
        }

        if self.formality >= 0.7 {
            for (long, short) in CONTRACTIONS {
                out = replace_words(&out, short, long);
            }
        } else if self.formality <= 0.3 {
            for (long, short) in CONTRACTIONS {
                out = replace_words(&out, long, short);
            }
        }

        if self.terseness >= 0.6 {
            out = first_sentence(&out).to_string();
        }

        for interjection in &self.interjections {
            if rng.gen::<f32>() < interjection.frequency {
                out = match interjection.placement {
                    Placement::Before => format!("{} {}", interjection.text, out),
                    Placement::After => format!("{} {}", out, interjection.text),
                };
                break;
            }
        }

        out
    }
}

/// Replace whole-word occurrences of `from` with `to`.
fn replace_words(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '\'';
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(from) {
        let prev = rest[..pos].chars().next_back().or_else(|| out.chars().next_back());
        let before_ok = prev.map_or(true, |c| !is_word(c));
        let after = &rest[pos + from.len()..];
        let after_ok = after.chars().next().map_or(true, |c| !is_word(c));
        out.push_str(&rest[..pos]);
        if before_ok && after_ok {
            out.push_str(to);
        } else {
            out.push_str(from);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Everything up to and including the first sentence terminator that is
/// followed by more text.
fn first_sentence(text: &str) -> &str {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((_, ' ')) = chars.peek() {
                return &text[..i + c.len_utf8()];
            }
        }
    }
    text
}

/// Registry of all loaded voices with inheritance resolution.
#[derive(Debug, Clone, Default)]
pub struct VoiceRegistry {
    voices: HashMap<AgentId, VoiceProfile>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self {
            voices: HashMap::new(),
        }
    }

    pub fn register(&mut self, voice: VoiceProfile) {
        self.voices.insert(voice.agent.clone(), voice);
    }

    pub fn get(&self, agent: &AgentId) -> Option<&VoiceProfile> {
        self.voices.get(agent)
    }

    /// Resolve a voice by walking its inheritance chain.
    ///
    /// The nearest set formality/terseness wins, vocabularies merge with
    /// child entries overriding, interjections concatenate (child first).
    pub fn resolve(&self, agent: &AgentId) -> Option<ResolvedVoice> {
        let voice = self.voices.get(agent)?;

        let mut chain = vec![voice];
        let mut seen: FxHashSet<&AgentId> = FxHashSet::default();
        seen.insert(&voice.agent);
        let mut current = voice;
        while let Some(parent_id) = &current.parent {
            if !seen.insert(parent_id) {
                tracing::warn!("voice inheritance cycle at {parent_id}");
                break;
            }
            match self.voices.get(parent_id) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent;
                }
                None => break,
            }
        }

        let formality = chain.iter().find_map(|v| v.formality).unwrap_or(0.5);
        let terseness = chain.iter().find_map(|v| v.terseness).unwrap_or(0.3);
        let interjections = chain
            .iter()
            .flat_map(|v| v.interjections.iter().cloned())
            .collect();
        let mut vocabulary = HashMap::new();
        for ancestor in chain.iter().rev() {
            for (k, v) in &ancestor.vocabulary {
                vocabulary.insert(k.clone(), v.clone());
            }
        }

        Some(ResolvedVoice {
            agent: voice.agent.clone(),
            formality: formality.clamp(0.0, 1.0),
            terseness: terseness.clamp(0.0, 1.0),
            interjections,
            vocabulary,
        })
    }

    /// Restyle `text` in `agent`'s voice. Agents without a voice speak plainly.
    pub fn transform(&self, agent: &AgentId, text: &str, rng: &mut StdRng) -> String {
        match self.resolve(agent) {
            Some(voice) => voice.apply(text, rng),
            None => text.to_string(),
        }
    }

    /// Load voices from a RON file containing a list of profiles.
    pub fn load_from_ron(&mut self, path: &std::path::Path) -> Result<(), VoiceError> {
        let contents = std::fs::read_to_string(path)?;
        self.parse_ron(&contents)
    }

    pub fn parse_ron(&mut self, input: &str) -> Result<(), VoiceError> {
        let voices: Vec<VoiceProfile> = ron::from_str(input)?;
        for voice in voices {
            self.register(voice);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}
