/// Encounter orchestration: relationship state and recalled memories in,
/// a short scripted exchange and its pending side effects out.
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashSet;
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::collaborators::FlagStore;
use crate::core::config::EncounterTuning;
use crate::core::ledger::Ledger;
use crate::core::phrasebook::Phrasebook;
use crate::core::recall::{EmotionalImpact, RecallEngine, RecallTrigger, RecalledMemory};
use crate::schema::agent::{AgentId, PairKey, RoomId, Value};
use crate::schema::encounter::{
    DialogueLine, EmotionalTone, Encounter, EncounterKind, EncounterOutcome,
};
use crate::schema::event::{EventContext, EventDraft, InteractionEvent, InteractionKind};
use crate::schema::relationship::{RelationshipRecord, Trajectory};

/// The situation an encounter takes place in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncounterContext {
    pub location: RoomId,
    pub game_phase: String,
    pub others_present: Vec<AgentId>,
    pub recent_player_actions: Vec<String>,
    pub emotional_state: Option<String>,
    /// Monitored subsystems currently active nearby (cameras, alarms...).
    pub active_systems: Vec<String>,
}

impl EncounterContext {
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: RoomId::new(location),
            ..Default::default()
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.game_phase = phase.into();
        self
    }

    pub fn with_present(mut self, agent: impl Into<String>) -> Self {
        self.others_present.push(AgentId::new(agent));
        self
    }

    pub fn with_player_action(mut self, action: impl Into<String>) -> Self {
        self.recent_player_actions.push(action.into());
        self
    }

    pub fn with_emotional_state(mut self, state: impl Into<String>) -> Self {
        self.emotional_state = Some(state.into());
        self
    }

    pub fn with_active_system(mut self, system: impl Into<String>) -> Self {
        self.active_systems.push(system.into());
        self
    }

    /// The part of the situation recall compares events against.
    pub fn event_context(&self) -> EventContext {
        EventContext {
            location: self.location.clone(),
            game_phase: self.game_phase.clone(),
            others_present: self.others_present.clone(),
            recent_player_actions: self.recent_player_actions.clone(),
            emotional_state: self.emotional_state.clone(),
        }
    }

    /// Recall triggers implied by the situation.
    pub fn triggers(&self) -> Vec<RecallTrigger> {
        let mut triggers = vec![RecallTrigger::location(self.location.as_str())];
        triggers.extend(
            self.others_present
                .iter()
                .map(|a| RecallTrigger::npc_present(a.as_str())),
        );
        triggers.extend(
            self.recent_player_actions
                .iter()
                .map(|a| RecallTrigger::player_action(a.as_str())),
        );
        if let Some(state) = &self.emotional_state {
            triggers.push(RecallTrigger::emotional_state(state.as_str()));
        }
        triggers
    }

    /// First bystander who is neither participant.
    fn observer(&self, a: &AgentId, b: &AgentId) -> Option<&AgentId> {
        self.others_present.iter().find(|o| *o != a && *o != b)
    }
}

/// What `apply_outcomes` actually did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub recorded: Vec<InteractionEvent>,
    pub flags_set: Vec<String>,
    pub flags_skipped: Vec<String>,
}

/// Picks an archetype for a pair and scripts the exchange.
pub struct Orchestrator {
    tuning: EncounterTuning,
    phrasebook: Phrasebook,
    history: Vec<Encounter>,
    generation_count: u64,
}

impl Orchestrator {
    pub fn new(tuning: EncounterTuning, phrasebook: Phrasebook) -> Self {
        Self {
            tuning,
            phrasebook,
            history: Vec::new(),
            generation_count: 0,
        }
    }

    pub fn tuning(&self) -> &EncounterTuning {
        &self.tuning
    }

    pub fn phrasebook(&self) -> &Phrasebook {
        &self.phrasebook
    }

    /// Every encounter generated since the last `clear_history`, oldest first.
    pub fn history(&self) -> &[Encounter] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Generate an encounter between `a` and `b`, choosing the archetype
    /// from their relationship and shared memories.
    pub fn generate(
        &mut self,
        ledger: &Ledger,
        recall: &RecallEngine,
        a: &AgentId,
        b: &AgentId,
        context: &EncounterContext,
        now: DateTime<Utc>,
    ) -> Encounter {
        let relationship = ledger.get_relationship(a, b);
        let memories = shared_memories(ledger, recall, a, b, context, now);
        let (kind, conditions) = self.select_kind(relationship, &memories);
        self.compose(kind, conditions, relationship, &memories, a, b, context, now)
    }

    /// Generate an encounter of a fixed archetype, bypassing the cascade.
    /// This is the only way to get a `Reconciliation`.
    pub fn generate_as(
        &mut self,
        kind: EncounterKind,
        ledger: &Ledger,
        recall: &RecallEngine,
        a: &AgentId,
        b: &AgentId,
        context: &EncounterContext,
        now: DateTime<Utc>,
    ) -> Encounter {
        let relationship = ledger.get_relationship(a, b);
        let memories = shared_memories(ledger, recall, a, b, context, now);
        let conditions = vec![format!("forced:{kind}")];
        self.compose(kind, conditions, relationship, &memories, a, b, context, now)
    }

    /// The archetype cascade. Rules are tried in order and the first match
    /// wins; the returned strings say which conditions held.
    pub fn select_kind(
        &self,
        relationship: Option<&RelationshipRecord>,
        memories: &[RecalledMemory],
    ) -> (EncounterKind, Vec<String>) {
        let Some(record) = relationship else {
            return (EncounterKind::FirstMeeting, vec!["no-relationship".to_string()]);
        };
        let trust = record.overall_trust_level;
        let tuning = &self.tuning;
        let trust_tag = format!("trust:{trust:.2}");

        if trust > tuning.partnership_trust {
            return (EncounterKind::TrustedPartnership, vec![trust_tag]);
        }
        if trust > tuning.recognition_trust
            && record.relationship_trajectory == Trajectory::Improving
        {
            return (
                EncounterKind::MutualRecognition,
                vec![trust_tag, "trajectory:improving".to_string()],
            );
        }
        if let Some(recent @ (InteractionKind::Betrayal | InteractionKind::Conflict)) =
            record.recent_interaction_type
        {
            let reconciled = memories
                .iter()
                .any(|m| m.event.kind == InteractionKind::Reconciliation);
            let mut conditions = vec![trust_tag, format!("recent:{recent}")];
            if reconciled {
                conditions.push("memory:reconciliation".to_string());
                return (EncounterKind::WaryAlliance, conditions);
            }
            return (EncounterKind::Confrontation, conditions);
        }
        if trust > tuning.hostile_trust && trust < 0.0 {
            return (EncounterKind::WaryAlliance, vec![trust_tag]);
        }
        if trust <= tuning.hostile_trust {
            return (EncounterKind::Confrontation, vec![trust_tag]);
        }
        if trust > 0.0 && !memories.is_empty() {
            return (
                EncounterKind::Reunion,
                vec![trust_tag, format!("memories:{}", memories.len())],
            );
        }
        (EncounterKind::FirstMeeting, vec![trust_tag])
    }

    #[allow(clippy::too_many_arguments)]
    fn compose(
        &mut self,
        kind: EncounterKind,
        trigger_conditions: Vec<String>,
        relationship: Option<&RelationshipRecord>,
        memories: &[RecalledMemory],
        a: &AgentId,
        b: &AgentId,
        context: &EncounterContext,
        now: DateTime<Utc>,
    ) -> Encounter {
        let mut rng = StdRng::seed_from_u64(self.tuning.seed.wrapping_add(self.generation_count));
        self.generation_count += 1;

        let trust_impact = self.tuning.trust_impact(kind);
        let dialogue = self.script(kind, memories.first(), a, b, context, &mut rng);
        let outcomes = self.outcomes(kind, trust_impact, a, b, context);

        let encounter = Encounter {
            id: Uuid::new_v4(),
            kind,
            agent_a: a.clone(),
            agent_b: b.clone(),
            location: context.location.clone(),
            created_at: now,
            trigger_conditions,
            required_memories: memories.to_vec(),
            participant_relationship: relationship.cloned(),
            dialogue,
            outcomes,
            trust_impact,
        };

        tracing::debug!(
            "generated {} encounter for {} and {} at {} ({} lines, conditions {:?})",
            encounter.kind,
            a,
            b,
            context.location,
            encounter.dialogue.len(),
            encounter.trigger_conditions
        );

        self.history.push(encounter.clone());
        encounter
    }

    /// Build the exchange: open, reply, optional memory line, optional
    /// situational line, close. Speakers alternate starting with `a`.
    fn script(
        &self,
        kind: EncounterKind,
        top_memory: Option<&RecalledMemory>,
        a: &AgentId,
        b: &AgentId,
        context: &EncounterContext,
        rng: &mut StdRng,
    ) -> Vec<DialogueLine> {
        let mut tags: FxHashSet<String> = FxHashSet::default();
        tags.insert(format!("kind:{kind}"));
        if !context.game_phase.is_empty() {
            tags.insert(format!("phase:{}", context.game_phase));
        }

        let mut values: HashMap<&str, String> = HashMap::new();
        values.insert("a", a.to_string());
        values.insert("b", b.to_string());
        values.insert("location", context.location.to_string());

        // (rule, memory ref, tone override)
        let mut plan: Vec<(String, Option<&RecalledMemory>, Option<EmotionalTone>)> = vec![
            (format!("{kind}.open"), None, None),
            (format!("{kind}.reply"), None, None),
        ];

        if let Some(memory) = top_memory {
            let text = if memory.event.description.is_empty() {
                memory.suggested_dialogue.clone().unwrap_or_default()
            } else {
                memory.event.description.clone()
            };
            values.insert("memory", text);
            values.insert("memory_location", memory.event.context.location.to_string());
            match memory.emotional_impact {
                EmotionalImpact::Positive => {
                    tags.insert("impact:positive".to_string());
                }
                EmotionalImpact::Negative => {
                    tags.insert("impact:negative".to_string());
                }
                EmotionalImpact::Mixed | EmotionalImpact::Neutral => {}
            }
            plan.push((
                "encounter.memory".to_string(),
                Some(memory),
                Some(EmotionalTone::Nostalgic),
            ));
        }

        if let Some(observer) = context.observer(a, b) {
            tags.insert("observer".to_string());
            values.insert("observer", observer.to_string());
            plan.push((
                "encounter.observer".to_string(),
                None,
                Some(EmotionalTone::Guarded),
            ));
        } else if let Some(system) = context.active_systems.first() {
            values.insert("system", system.clone());
            plan.push((
                "encounter.system".to_string(),
                None,
                Some(EmotionalTone::Guarded),
            ));
        }

        plan.push((format!("{kind}.close"), None, None));

        let mut lines = Vec::with_capacity(plan.len());
        for (rule, memory, tone) in plan {
            let (speaker, listener) = if lines.len() % 2 == 0 { (a, b) } else { (b, a) };
            let mut line_tags = tags.clone();
            line_tags.insert(format!("speaker:{speaker}"));
            values.insert("speaker", speaker.to_string());
            values.insert("listener", listener.to_string());

            let Some(text) = self.phrasebook.line(&rule, &line_tags, &values, rng) else {
                tracing::warn!("phrasebook has no usable line for {rule}; skipping");
                continue;
            };
            lines.push(DialogueLine {
                speaker: speaker.clone(),
                text,
                emotional_tone: tone.unwrap_or_else(|| tone_for(kind)),
                memory_ref: memory.map(|m| m.event.id),
            });
        }
        lines
    }

    fn outcomes(
        &self,
        kind: EncounterKind,
        trust_impact: f32,
        a: &AgentId,
        b: &AgentId,
        context: &EncounterContext,
    ) -> Vec<EncounterOutcome> {
        let intensity = (self.tuning.new_memory_base + trust_impact.abs())
            .min(self.tuning.new_memory_cap);
        let mut outcomes = vec![EncounterOutcome::NewMemory {
            kind: InteractionKind::SharedSecret,
            intensity,
            description: format!("{kind} between {a} and {b} at {}", context.location),
        }];

        if trust_impact > 0.0 {
            outcomes.push(EncounterOutcome::TrustIncreased(trust_impact));
        } else if trust_impact < 0.0 {
            outcomes.push(EncounterOutcome::TrustDecreased(-trust_impact));
        }

        let pair = PairKey::new(a, b);
        let flag = match kind {
            EncounterKind::TrustedPartnership => Some("alliance_formed"),
            EncounterKind::Confrontation => Some("tension"),
            EncounterKind::Reconciliation => Some("reconciled"),
            EncounterKind::FirstMeeting
            | EncounterKind::Reunion
            | EncounterKind::MutualRecognition
            | EncounterKind::WaryAlliance => None,
        };
        if let Some(name) = flag {
            outcomes.push(EncounterOutcome::SetFlag {
                key: format!("{name}:{pair}"),
                value: Value::Bool(true),
            });
        }
        outcomes
    }

    /// Commit an encounter's outcomes: new memories go into the ledger and
    /// flags go to `flags`.
    ///
    /// Flag failures, or a missing flag store, skip that flag only.
    /// Trust outcomes are informational; the trust change itself comes from
    /// the recorded memory.
    pub fn apply_outcomes(
        &self,
        encounter: &Encounter,
        ledger: &mut Ledger,
        mut flags: Option<&mut dyn FlagStore>,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        for outcome in &encounter.outcomes {
            match outcome {
                EncounterOutcome::NewMemory {
                    kind,
                    intensity,
                    description,
                } => {
                    let draft = EventDraft::new(
                        *kind,
                        encounter.agent_a.as_str(),
                        encounter.agent_b.as_str(),
                        EventContext {
                            location: encounter.location.clone(),
                            ..Default::default()
                        },
                        *intensity,
                    )
                    .described(description.clone())
                    .with_consequence(format!("encounter:{}", encounter.kind));
                    report.recorded.push(ledger.record(draft));
                }
                EncounterOutcome::TrustIncreased(_) | EncounterOutcome::TrustDecreased(_) => {}
                EncounterOutcome::SetFlag { key, value } => match flags.as_deref_mut() {
                    Some(store) => match store.set_flag(key, value.clone()) {
                        Ok(()) => report.flags_set.push(key.clone()),
                        Err(e) => {
                            tracing::warn!("skipping flag {key}: {e}");
                            report.flags_skipped.push(key.clone());
                        }
                    },
                    None => {
                        tracing::warn!("no flag store available; skipping flag {key}");
                        report.flags_skipped.push(key.clone());
                    }
                },
            }
        }
        report
    }
}

/// Memories of events between `a` and `b`, ranked and capped on their own.
fn shared_memories(
    ledger: &Ledger,
    recall: &RecallEngine,
    a: &AgentId,
    b: &AgentId,
    context: &EncounterContext,
    now: DateTime<Utc>,
) -> Vec<RecalledMemory> {
    recall.recall_between(ledger, a, b, &context.event_context(), &context.triggers(), now)
}

fn tone_for(kind: EncounterKind) -> EmotionalTone {
    match kind {
        EncounterKind::FirstMeeting => EmotionalTone::Curious,
        EncounterKind::Reunion
        | EncounterKind::TrustedPartnership
        | EncounterKind::MutualRecognition => EmotionalTone::Warm,
        EncounterKind::Confrontation => EmotionalTone::Hostile,
        EncounterKind::WaryAlliance => EmotionalTone::Guarded,
        EncounterKind::Reconciliation => EmotionalTone::Relieved,
    }
}
