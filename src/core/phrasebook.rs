/// Phrasebook: data-driven dialogue lines: templates, slot filling,
/// tag-gated weighted selection, RON loading.
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhraseError {
    #[error("template parse error: {0}")]
    TemplateParse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// A segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// A named value filled at render time: `{speaker}`, `{location}`, ...
    Slot(String),
}

/// A parsed template, a sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    /// Parse a template string.
    ///
    /// Syntax:
    /// - `{name}` → `Slot`
    /// - `{{` / `}}` → literal braces
    /// - Everything else → `Literal`
    pub fn parse(input: &str) -> Result<Template, PhraseError> {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal_buf.push('{');
                }
                '{' => {
                    if !literal_buf.is_empty() {
                        segments.push(TemplateSegment::Literal(std::mem::take(&mut literal_buf)));
                    }
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(PhraseError::TemplateParse(
                                    "nested braces are not allowed".to_string(),
                                ))
                            }
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(PhraseError::TemplateParse("unclosed brace".to_string()));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(PhraseError::TemplateParse("empty braces".to_string()));
                    }
                    segments.push(TemplateSegment::Slot(name.to_string()));
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal_buf.push('}');
                }
                '}' => {
                    return Err(PhraseError::TemplateParse(
                        "unmatched closing brace".to_string(),
                    ))
                }
                other => literal_buf.push(other),
            }
        }

        if !literal_buf.is_empty() {
            segments.push(TemplateSegment::Literal(literal_buf));
        }

        Ok(Template { segments })
    }

    /// A template with no slots.
    pub fn literal(text: &str) -> Template {
        Template {
            segments: vec![TemplateSegment::Literal(text.to_string())],
        }
    }

    /// Fill slots from `values`. Unbound slots are left in braces.
    pub fn render(&self, values: &HashMap<&str, String>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::Slot(name) => match values.get(name.as_str()) {
                    Some(value) => out.push_str(value),
                    None => {
                        tracing::warn!("unbound template slot {{{name}}}");
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                },
            }
        }
        out
    }
}

/// A weighted text alternative, eligible only when all `requires` tags
/// are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub weight: u32,
    pub requires: Vec<String>,
    pub template: Template,
}

/// A named set of alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseRule {
    pub name: String,
    pub alternatives: Vec<Alternative>,
}

/// A library of named phrase rules.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Phrasebook {
    pub rules: HashMap<String, PhraseRule>,
}

#[derive(Debug, Deserialize)]
struct RonAlternative {
    #[serde(default = "default_weight")]
    weight: u32,
    #[serde(default)]
    requires: Vec<String>,
    text: String,
}

fn default_weight() -> u32 {
    1
}

type BuiltinRule = (&'static str, &'static [(u32, &'static [&'static str], &'static str)]);

const BUILTIN: &[BuiltinRule] = &[
    ("first-meeting.open", &[
        (2, &[], "I don't think we've met. I'm {a}."),
        (1, &[], "You're new around {location}, aren't you?"),
    ]),
    ("first-meeting.reply", &[(1, &[], "{b}. Pleased to meet you, I suppose.")]),
    ("first-meeting.close", &[(1, &[], "Well. I expect we'll be seeing more of each other.")]),
    ("reunion.open", &[
        (2, &[], "{b}! It's been a while."),
        (1, &[], "Look who turned up in {location}."),
    ]),
    ("reunion.reply", &[(1, &[], "Good to see a familiar face, {a}.")]),
    ("reunion.close", &[(1, &[], "Let's not leave it so long next time.")]),
    ("confrontation.open", &[
        (2, &[], "You've got some nerve showing your face here, {b}."),
        (1, &[], "We need to talk about what happened."),
    ]),
    ("confrontation.reply", &[(1, &[], "I'm not here to fight, {a}. Not unless you make me.")]),
    ("confrontation.close", &[(1, &[], "Stay out of my way.")]),
    ("trusted-partnership.open", &[
        (1, &[], "{b}, just the person I needed. I could use your help."),
    ]),
    ("trusted-partnership.reply", &[(1, &[], "Whatever you need, {a}. You know that.")]),
    ("trusted-partnership.close", &[(1, &[], "Together, then. Like always.")]),
    ("mutual-recognition.open", &[(1, &[], "You've been pulling your weight lately, {b}.")]),
    ("mutual-recognition.reply", &[(1, &[], "So have you. I noticed.")]),
    ("mutual-recognition.close", &[(1, &[], "Maybe we make a decent team after all.")]),
    ("wary-alliance.open", &[(1, &[], "{b}. I suppose we're working together, for now.")]),
    ("wary-alliance.reply", &[(1, &[], "For now. Don't make me regret it, {a}.")]),
    ("wary-alliance.close", &[(1, &[], "I'll be watching you.")]),
    ("reconciliation.open", &[(1, &[], "{b}... I owe you an apology.")]),
    ("reconciliation.reply", &[(1, &[], "I was hoping you'd say that, {a}.")]),
    ("reconciliation.close", &[(1, &[], "Clean slate, then.")]),
    ("encounter.memory", &[
        (1, &[], "I keep thinking about {memory_location}. {memory}"),
        (1, &["impact:positive"], "Remember {memory_location}? {memory}"),
        (1, &["impact:negative"], "I haven't forgotten {memory_location}. {memory}"),
    ]),
    ("encounter.observer", &[
        (1, &[], "Not here. {observer} is listening."),
        (1, &["kind:trusted-partnership"], "Don't mind {observer}. They're with us."),
    ]),
    ("encounter.system", &[(1, &[], "Keep your voice down. {system} is watching.")]),
    ("reply.hint", &[(1, &[], "If I were you, I'd take a closer look around {location}.")]),
    ("reply.lore", &[(1, &[], "That's an old story. Older than this place, some say.")]),
    ("reply.quest", &[(1, &[], "One thing at a time. Finish what you started first.")]),
    ("reply.banter", &[
        (2, &[], "Mm. If you say so, {listener}."),
        (1, &[], "Is that so?"),
    ]),
];

impl Phrasebook {
    /// The lines shipped with the crate.
    pub fn builtin() -> Phrasebook {
        let mut rules = HashMap::new();
        for (name, alternatives) in BUILTIN {
            let alternatives = alternatives
                .iter()
                .map(|(weight, requires, text)| Alternative {
                    weight: *weight,
                    requires: requires.iter().map(|t| t.to_string()).collect(),
                    template: Template::parse(text).unwrap_or_else(|_| Template::literal(text)),
                })
                .collect();
            rules.insert(
                name.to_string(),
                PhraseRule {
                    name: name.to_string(),
                    alternatives,
                },
            );
        }
        Phrasebook { rules }
    }

    /// Load a phrasebook from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<Phrasebook, PhraseError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a phrasebook from a RON map of rule name to alternatives.
    pub fn parse_ron(input: &str) -> Result<Phrasebook, PhraseError> {
        let raw: HashMap<String, Vec<RonAlternative>> = ron::from_str(input)?;
        let mut rules = HashMap::new();

        for (name, ron_alternatives) in raw {
            let mut alternatives = Vec::new();
            for alt in ron_alternatives {
                alternatives.push(Alternative {
                    weight: alt.weight,
                    requires: alt.requires,
                    template: Template::parse(&alt.text)?,
                });
            }
            rules.insert(name.clone(), PhraseRule { name, alternatives });
        }

        Ok(Phrasebook { rules })
    }

    /// Merge another phrasebook into this one. Rules from `other`
    /// replace rules in `self` with the same name.
    pub fn merge(&mut self, other: Phrasebook) {
        for (name, rule) in other.rules {
            self.rules.insert(name, rule);
        }
    }

    /// Choose a template from `rule` for the given tags.
    ///
    /// Only alternatives whose required tags are all present are eligible;
    /// among those, the most specific (most required tags) win, and the
    /// winner is a weighted random pick.
    pub fn pick(
        &self,
        rule: &str,
        tags: &FxHashSet<String>,
        rng: &mut StdRng,
    ) -> Option<&Template> {
        let rule = self.rules.get(rule)?;
        let eligible: Vec<&Alternative> = rule
            .alternatives
            .iter()
            .filter(|alt| alt.requires.iter().all(|t| tags.contains(t)))
            .collect();
        let specificity = eligible.iter().map(|alt| alt.requires.len()).max()?;
        let best: Vec<&Alternative> = eligible
            .into_iter()
            .filter(|alt| alt.requires.len() == specificity)
            .collect();

        let weights: Vec<u32> = best.iter().map(|alt| alt.weight).collect();
        let chosen: &Alternative = match WeightedIndex::new(&weights) {
            Ok(dist) => best[dist.sample(rng)],
            // All-zero weights: fall back to the first candidate.
            Err(_) => best.first().copied()?,
        };
        Some(&chosen.template)
    }

    /// `pick` and render in one step.
    pub fn line(
        &self,
        rule: &str,
        tags: &FxHashSet<String>,
        values: &HashMap<&str, String>,
        rng: &mut StdRng,
    ) -> Option<String> {
        self.pick(rule, tags, rng).map(|t| t.render(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn tags(list: &[&str]) -> FxHashSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn parse_literal_only() {
        let t = Template::parse("Hello, world.").unwrap();
        assert_eq!(
            t.segments,
            vec![TemplateSegment::Literal("Hello, world.".to_string())]
        );
    }

    #[test]
    fn parse_slots() {
        let t = Template::parse("{speaker} waves at {listener}.").unwrap();
        assert_eq!(t.segments.len(), 4);
        assert_eq!(t.segments[0], TemplateSegment::Slot("speaker".to_string()));
        assert_eq!(t.segments[2], TemplateSegment::Slot("listener".to_string()));
    }

    #[test]
    fn parse_escaped_braces() {
        let t = Template::parse("Use {{braces}} here.").unwrap();
        assert_eq!(
            t.segments,
            vec![TemplateSegment::Literal("Use {braces} here.".to_string())]
        );
    }

    #[test]
    fn parse_errors() {
        assert!(Template::parse("Bad {} here").is_err());
        assert!(Template::parse("Bad {outer{inner}} here").is_err());
        assert!(Template::parse("Bad {unclosed here").is_err());
        assert!(Template::parse("Bad } here").is_err());
    }

    #[test]
    fn render_fills_and_preserves_unbound() {
        let t = Template::parse("{a} meets {b} at {location}.").unwrap();
        let values = HashMap::from([("a", "Al".to_string()), ("b", "Morthos".to_string())]);
        assert_eq!(t.render(&values), "Al meets Morthos at {location}.");
    }

    #[test]
    fn builtin_templates_all_parse() {
        for (name, alternatives) in BUILTIN {
            for (_, _, text) in alternatives.iter() {
                assert!(Template::parse(text).is_ok(), "{name}: {text}");
            }
        }
        let book = Phrasebook::builtin();
        for kind in crate::schema::encounter::EncounterKind::ALL {
            for part in ["open", "reply", "close"] {
                assert!(book.rules.contains_key(&format!("{kind}.{part}")));
            }
        }
    }

    #[test]
    fn most_specific_alternative_wins() {
        let book = Phrasebook::parse_ron(
            r#"{
                "reply.hint": [
                    (weight: 5, text: "generic"),
                    (requires: ["speaker:al"], text: "al-specific"),
                    (requires: ["speaker:al", "listener:morthos"], text: "pair-specific"),
                ],
            }"#,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let empty = HashMap::new();

        for _ in 0..20 {
            assert_eq!(
                book.line("reply.hint", &tags(&["speaker:al", "listener:morthos"]), &empty, &mut rng)
                    .as_deref(),
                Some("pair-specific")
            );
            assert_eq!(
                book.line("reply.hint", &tags(&["speaker:al", "listener:vex"]), &empty, &mut rng)
                    .as_deref(),
                Some("al-specific")
            );
            assert_eq!(
                book.line("reply.hint", &tags(&[]), &empty, &mut rng).as_deref(),
                Some("generic")
            );
        }
    }

    #[test]
    fn missing_rule_or_no_eligible_alternative() {
        let book = Phrasebook::parse_ron(
            r#"{ "gated": [(requires: ["night"], text: "Shh.")] }"#,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(book.pick("absent", &tags(&[]), &mut rng).is_none());
        assert!(book.pick("gated", &tags(&["day"]), &mut rng).is_none());
        assert!(book.pick("gated", &tags(&["night"]), &mut rng).is_some());
    }

    #[test]
    fn weighted_selection_is_seeded() {
        let book = Phrasebook::builtin();
        let t = tags(&[]);
        let a = book.pick("reunion.open", &t, &mut StdRng::seed_from_u64(9)).cloned();
        let b = book.pick("reunion.open", &t, &mut StdRng::seed_from_u64(9)).cloned();
        assert_eq!(a, b);
    }

    #[test]
    fn merge_precedence() {
        let mut base = Phrasebook::builtin();
        let overrides =
            Phrasebook::parse_ron(r#"{ "reunion.open": [(text: "Well, well, {b}.")] }"#).unwrap();
        base.merge(overrides);
        assert_eq!(base.rules["reunion.open"].alternatives.len(), 1);
        assert!(base.rules.contains_key("reunion.close"));
    }

    #[test]
    fn bad_template_in_ron_is_error() {
        let result = Phrasebook::parse_ron(r#"{ "broken": [(text: "oops {")] }"#);
        assert!(matches!(result, Err(PhraseError::TemplateParse(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.ron");
        std::fs::write(&path, r#"{ "reply.lore": [(text: "Ask the archivist.")] }"#).unwrap();
        let book = Phrasebook::load_from_ron(&path).unwrap();
        assert_eq!(book.rules.len(), 1);
    }
}
