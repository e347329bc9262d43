use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::agent::{AgentId, RoomId, Value};
use super::event::{EventId, InteractionKind};
use super::relationship::RelationshipRecord;
use crate::core::recall::RecalledMemory;

/// The encounter archetype taxonomy.
///
/// The orchestrator's cascade picks one of these from relationship state;
/// `Reconciliation` is only produced on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EncounterKind {
    FirstMeeting,
    Reunion,
    Confrontation,
    TrustedPartnership,
    MutualRecognition,
    WaryAlliance,
    Reconciliation,
}

impl EncounterKind {
    pub const ALL: [EncounterKind; 7] = [
        Self::FirstMeeting,
        Self::Reunion,
        Self::Confrontation,
        Self::TrustedPartnership,
        Self::MutualRecognition,
        Self::WaryAlliance,
        Self::Reconciliation,
    ];

    /// Kebab-case name used in phrasebook rule names and tags.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FirstMeeting => "first-meeting",
            Self::Reunion => "reunion",
            Self::Confrontation => "confrontation",
            Self::TrustedPartnership => "trusted-partnership",
            Self::MutualRecognition => "mutual-recognition",
            Self::WaryAlliance => "wary-alliance",
            Self::Reconciliation => "reconciliation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|k| k.name() == normalized)
    }

    /// Built-in trust impact of each archetype.
    pub fn default_trust_impact(&self) -> f32 {
        match self {
            Self::FirstMeeting => 0.1,
            Self::Reunion => 0.2,
            Self::Confrontation => -0.1,
            Self::TrustedPartnership => 0.3,
            Self::MutualRecognition => 0.25,
            Self::WaryAlliance => 0.05,
            Self::Reconciliation => 0.4,
        }
    }
}

impl fmt::Display for EncounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Emotional delivery of a single dialogue line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionalTone {
    Neutral,
    Curious,
    Warm,
    Nostalgic,
    Guarded,
    Hostile,
    Relieved,
}

/// One line of an encounter's scripted exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueLine {
    pub speaker: AgentId,
    pub text: String,
    pub emotional_tone: EmotionalTone,
    /// The recalled event this line paraphrases, if any.
    pub memory_ref: Option<EventId>,
}

/// A side effect an encounter asks for. Nothing happens until the
/// orchestrator's `apply_outcomes` is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncounterOutcome {
    /// Record the encounter itself back into the ledger.
    NewMemory {
        kind: InteractionKind,
        intensity: f32,
        description: String,
    },
    TrustIncreased(f32),
    TrustDecreased(f32),
    SetFlag { key: String, value: Value },
}

/// A generated dialogue encounter between two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encounter {
    pub id: Uuid,
    pub kind: EncounterKind,
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    pub location: RoomId,
    pub created_at: DateTime<Utc>,
    pub trigger_conditions: Vec<String>,
    /// The recalled memories the exchange was built from, most relevant first.
    pub required_memories: Vec<RecalledMemory>,
    /// Relationship state the encounter was built from; `None` on a first meeting.
    pub participant_relationship: Option<RelationshipRecord>,
    pub dialogue: Vec<DialogueLine>,
    pub outcomes: Vec<EncounterOutcome>,
    pub trust_impact: f32,
}
