/// Memory recall: relevance-scored search over an agent's past interactions.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::RecallTuning;
use crate::core::ledger::Ledger;
use crate::schema::agent::{AgentId, RoomId};
use crate::schema::event::{EventContext, InteractionEvent, InteractionKind};

/// What a trigger looks for in a past event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerKind {
    /// Exact match against the event's location.
    Location(RoomId),
    /// The event's bystander list contains this agent.
    NpcPresent(AgentId),
    /// Case-insensitive substring of any recent player action.
    PlayerAction(String),
    /// Case-insensitive substring of the event description.
    Keyword(String),
    /// Exact match against the event's emotional-state tag.
    EmotionalState(String),
}

/// A reason to bring a memory to mind, with an optional score weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallTrigger {
    pub kind: TriggerKind,
    #[serde(default)]
    pub weight: Option<f32>,
}

impl RecallTrigger {
    pub fn new(kind: TriggerKind) -> Self {
        Self { kind, weight: None }
    }

    pub fn location(room: impl Into<String>) -> Self {
        Self::new(TriggerKind::Location(RoomId(room.into())))
    }

    pub fn npc_present(agent: impl Into<String>) -> Self {
        Self::new(TriggerKind::NpcPresent(AgentId(agent.into())))
    }

    pub fn player_action(action: impl Into<String>) -> Self {
        Self::new(TriggerKind::PlayerAction(action.into()))
    }

    pub fn keyword(word: impl Into<String>) -> Self {
        Self::new(TriggerKind::Keyword(word.into()))
    }

    pub fn emotional_state(state: impl Into<String>) -> Self {
        Self::new(TriggerKind::EmotionalState(state.into()))
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn matches(&self, event: &InteractionEvent) -> bool {
        match &self.kind {
            TriggerKind::Location(room) => &event.context.location == room,
            TriggerKind::NpcPresent(agent) => event.context.others_present.contains(agent),
            TriggerKind::PlayerAction(action) => {
                let needle = action.to_lowercase();
                event
                    .context
                    .recent_player_actions
                    .iter()
                    .any(|a| a.to_lowercase().contains(&needle))
            }
            TriggerKind::Keyword(word) => event
                .description
                .to_lowercase()
                .contains(&word.to_lowercase()),
            TriggerKind::EmotionalState(state) => {
                event.context.emotional_state.as_deref() == Some(state.as_str())
            }
        }
    }

    fn describe(&self) -> String {
        match &self.kind {
            TriggerKind::Location(room) => format!("location:{room}"),
            TriggerKind::NpcPresent(agent) => format!("npc-present:{agent}"),
            TriggerKind::PlayerAction(action) => format!("player-action:{action}"),
            TriggerKind::Keyword(word) => format!("keyword:{word}"),
            TriggerKind::EmotionalState(state) => format!("emotional-state:{state}"),
        }
    }
}

/// How a memory should colour the agent's mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionalImpact {
    Positive,
    Negative,
    Mixed,
    Neutral,
}

impl EmotionalImpact {
    pub fn of(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Cooperation
            | InteractionKind::Rescue
            | InteractionKind::MutualSupport => Self::Positive,
            InteractionKind::Betrayal | InteractionKind::Conflict => Self::Negative,
            InteractionKind::Sacrifice | InteractionKind::Reconciliation => Self::Mixed,
            InteractionKind::SharedSecret => Self::Neutral,
        }
    }
}

/// A past event surfaced for the current situation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledMemory {
    pub event: InteractionEvent,
    /// Within [0, 1].
    pub relevance_score: f32,
    pub trigger_reason: String,
    pub emotional_impact: EmotionalImpact,
    pub suggested_dialogue: Option<String>,
    pub suggested_behavior_change: Option<String>,
}

fn suggested_dialogue(event: &InteractionEvent) -> Option<String> {
    let place = &event.context.location;
    let line = match event.kind {
        InteractionKind::Cooperation => format!("We made a good team back in {place}."),
        InteractionKind::Betrayal => format!("I haven't forgotten what you did in {place}."),
        InteractionKind::Rescue => format!("If you hadn't been there in {place}..."),
        InteractionKind::Sacrifice => format!("You gave up a lot for me in {place}."),
        InteractionKind::SharedSecret => "What you told me stays between us.".to_string(),
        InteractionKind::MutualSupport => "We got each other through it.".to_string(),
        InteractionKind::Conflict => format!("Are we going to do {place} all over again?"),
        InteractionKind::Reconciliation => "I'm glad we put that behind us.".to_string(),
    };
    Some(line)
}

fn suggested_behavior_change(kind: InteractionKind) -> Option<String> {
    let change = match kind {
        InteractionKind::Cooperation => "more willing to share information",
        InteractionKind::Betrayal => "guarded; withholds help",
        InteractionKind::Rescue => "protective; offers aid unprompted",
        InteractionKind::Sacrifice => "deeply loyal",
        InteractionKind::SharedSecret => "speaks more openly in private",
        InteractionKind::MutualSupport => "checks in more often",
        InteractionKind::Conflict => "curt and defensive",
        InteractionKind::Reconciliation => "cautiously warmer",
    };
    Some(change.to_string())
}

/// Scores and ranks the ledger's events for a given agent and situation.
#[derive(Debug, Clone, Default)]
pub struct RecallEngine {
    tuning: RecallTuning,
}

impl RecallEngine {
    pub fn new(tuning: RecallTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &RecallTuning {
        &self.tuning
    }

    /// Recall up to `max_results` memories of `agent`, most relevant first.
    ///
    /// An event is a candidate if it involves `agent` and either matches a
    /// trigger or happened at the current location. Unknown agents recall
    /// nothing.
    pub fn recall(
        &self,
        ledger: &Ledger,
        agent: &AgentId,
        current: &EventContext,
        triggers: &[RecallTrigger],
        now: DateTime<Utc>,
    ) -> Vec<RecalledMemory> {
        let memories = self.rank(ledger.events_for(agent), current, triggers, now);
        tracing::debug!(
            "{} recalled {} memories at {}",
            agent,
            memories.len(),
            current.location
        );
        memories
    }

    /// Like `recall`, but only over events between `a` and `b`, so the cap
    /// is never spent on anyone else.
    pub fn recall_between(
        &self,
        ledger: &Ledger,
        a: &AgentId,
        b: &AgentId,
        current: &EventContext,
        triggers: &[RecallTrigger],
        now: DateTime<Utc>,
    ) -> Vec<RecalledMemory> {
        let memories = self.rank(ledger.events_between(a, b), current, triggers, now);
        tracing::debug!(
            "{} and {} share {} memories at {}",
            a,
            b,
            memories.len(),
            current.location
        );
        memories
    }

    fn rank<'a>(
        &self,
        events: impl Iterator<Item = &'a InteractionEvent>,
        current: &EventContext,
        triggers: &[RecallTrigger],
        now: DateTime<Utc>,
    ) -> Vec<RecalledMemory> {
        let mut memories: Vec<RecalledMemory> = events
            .filter_map(|event| self.score(event, current, triggers, now))
            .filter(|m| m.relevance_score >= self.tuning.threshold)
            .collect();

        memories.sort_by(|x, y| {
            y.relevance_score
                .total_cmp(&x.relevance_score)
                .then_with(|| y.event.timestamp.cmp(&x.event.timestamp))
        });
        memories.truncate(self.tuning.max_results);
        memories
    }

    fn score(
        &self,
        event: &InteractionEvent,
        current: &EventContext,
        triggers: &[RecallTrigger],
        now: DateTime<Utc>,
    ) -> Option<RecalledMemory> {
        let matched: Vec<&RecallTrigger> = triggers.iter().filter(|t| t.matches(event)).collect();
        let location_matches = event.context.location == current.location;
        if matched.is_empty() && !location_matches {
            return None;
        }

        let tuning = &self.tuning;
        let days_since = (now - event.timestamp).num_seconds().max(0) as f32 / 86_400.0;
        let recency_bonus = (tuning.recency_max - days_since * tuning.recency_decay_per_day).max(0.0);
        let trigger_bonus: f32 = matched
            .iter()
            .map(|t| t.weight.unwrap_or(tuning.default_trigger_weight))
            .sum();
        let location_bonus = if location_matches {
            tuning.location_weight
        } else {
            0.0
        };
        let raw = tuning.intensity_weight * event.intensity
            + location_bonus
            + recency_bonus
            + trigger_bonus;

        let trigger_reason = match matched.first() {
            Some(trigger) => trigger.describe(),
            None => format!("same location:{}", current.location),
        };

        Some(RecalledMemory {
            event: event.clone(),
            relevance_score: raw.clamp(0.0, 1.0),
            trigger_reason,
            emotional_impact: EmotionalImpact::of(event.kind),
            suggested_dialogue: suggested_dialogue(event),
            suggested_behavior_change: suggested_behavior_change(event.kind),
        })
    }
}
