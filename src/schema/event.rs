use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::agent::{AgentId, RoomId};

/// Unique identifier of a recorded interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

/// Identifier of one playthrough/session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of interaction between two agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InteractionKind {
    Cooperation,
    Betrayal,
    Rescue,
    Sacrifice,
    SharedSecret,
    MutualSupport,
    Conflict,
    Reconciliation,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 8] = [
        Self::Cooperation,
        Self::Betrayal,
        Self::Rescue,
        Self::Sacrifice,
        Self::SharedSecret,
        Self::MutualSupport,
        Self::Conflict,
        Self::Reconciliation,
    ];

    /// Kebab-case name, e.g. "mutual-support".
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cooperation => "cooperation",
            Self::Betrayal => "betrayal",
            Self::Rescue => "rescue",
            Self::Sacrifice => "sacrifice",
            Self::SharedSecret => "shared-secret",
            Self::MutualSupport => "mutual-support",
            Self::Conflict => "conflict",
            Self::Reconciliation => "reconciliation",
        }
    }

    /// Parse a kebab-case or snake_case name.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|k| k.name() == normalized)
    }

    /// Counts toward an improving trajectory.
    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            Self::Cooperation
                | Self::Rescue
                | Self::MutualSupport
                | Self::Reconciliation
                | Self::Sacrifice
        )
    }

    /// Counts toward a declining trajectory.
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Betrayal | Self::Conflict)
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of the situation an interaction happened in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub location: RoomId,
    #[serde(default)]
    pub game_phase: String,
    #[serde(default)]
    pub others_present: Vec<AgentId>,
    #[serde(default)]
    pub recent_player_actions: Vec<String>,
    #[serde(default)]
    pub emotional_state: Option<String>,
}

impl EventContext {
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: RoomId(location.into()),
            ..Default::default()
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.game_phase = phase.into();
        self
    }

    pub fn with_present(mut self, agent: impl Into<String>) -> Self {
        self.others_present.push(AgentId(agent.into()));
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
}

/// An immutable record of one interaction between two agents.
/// Only the ledger creates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: EventId,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub kind: InteractionKind,
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    pub context: EventContext,
    /// Significance of the event, always within [0, 1].
    pub intensity: f32,
    pub description: String,
    #[serde(default)]
    pub consequences: Vec<String>,
}

impl InteractionEvent {
    /// Returns true if `agent` took part in this event.
    pub fn involves(&self, agent: &AgentId) -> bool {
        &self.agent_a == agent || &self.agent_b == agent
    }

    /// Returns true if this event was between `a` and `b`, in either order.
    pub fn is_between(&self, a: &AgentId, b: &AgentId) -> bool {
        (&self.agent_a == a && &self.agent_b == b) || (&self.agent_a == b && &self.agent_b == a)
    }
}

/// Input to `Ledger::record`. Intensity is clamped on record, not here.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: InteractionKind,
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    pub context: EventContext,
    pub intensity: f32,
    pub description: String,
    pub consequences: Vec<String>,
}

impl EventDraft {
    pub fn new(
        kind: InteractionKind,
        agent_a: impl Into<String>,
        agent_b: impl Into<String>,
        context: EventContext,
        intensity: f32,
    ) -> Self {
        Self {
            kind,
            agent_a: AgentId(agent_a.into()),
            agent_b: AgentId(agent_b.into()),
            context,
            intensity,
            description: String::new(),
            consequences: Vec::new(),
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_consequence(mut self, consequence: impl Into<String>) -> Self {
        self.consequences.push(consequence.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip_through_parse() {
        for kind in InteractionKind::ALL {
            assert_eq!(InteractionKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(
            InteractionKind::parse("shared_secret"),
            Some(InteractionKind::SharedSecret)
        );
        assert_eq!(InteractionKind::parse("hug"), None);
    }

    #[test]
    fn polarity_is_exclusive() {
        for kind in InteractionKind::ALL {
            assert!(!(kind.is_positive() && kind.is_negative()), "{kind}");
        }
        assert!(!InteractionKind::SharedSecret.is_positive());
        assert!(!InteractionKind::SharedSecret.is_negative());
    }

    #[test]
    fn context_builder() {
        let ctx = EventContext::at("lab")
            .with_phase("act-2")
            .with_present("guard")
            .with_player_action("opened the vault")
            .with_emotional_state("afraid");
        assert_eq!(ctx.location, RoomId::new("lab"));
        assert_eq!(ctx.others_present, vec![AgentId::new("guard")]);
        assert_eq!(ctx.emotional_state.as_deref(), Some("afraid"));
    }

    #[test]
    fn draft_builder() {
        let draft = EventDraft::new(
            InteractionKind::Rescue,
            "morthos",
            "al",
            EventContext::at("lab"),
            0.8,
        )
        .described("Al pulled Morthos out of the fire")
        .with_consequence("morthos owes al");
        assert_eq!(draft.agent_a, AgentId::new("morthos"));
        assert_eq!(draft.consequences.len(), 1);
    }
}
