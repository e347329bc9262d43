use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::{AgentId, PairKey};
use super::event::{InteractionEvent, InteractionKind};

/// Direction a relationship has been moving in over the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Trajectory {
    Improving,
    #[default]
    Stable,
    Declining,
}

impl Trajectory {
    /// Majority vote over the positive/negative polarity of `kinds`.
    /// Fewer than two kinds, or a tie, is `Stable`.
    pub fn from_kinds<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = InteractionKind>,
    {
        let mut total = 0;
        let mut positive = 0;
        let mut negative = 0;
        for kind in kinds {
            total += 1;
            if kind.is_positive() {
                positive += 1;
            } else if kind.is_negative() {
                negative += 1;
            }
        }
        if total < 2 || positive == negative {
            Self::Stable
        } else if positive > negative {
            Self::Improving
        } else {
            Self::Declining
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
        }
    }
}

/// Aggregated relationship between an unordered pair of agents.
///
/// Derived from the event stream by the ledger; `overall_trust_level` is the
/// clamped running sum of per-event trust deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub pair: PairKey,
    /// Always within [-1, 1].
    pub overall_trust_level: f32,
    pub cooperation_count: u32,
    pub betrayal_count: u32,
    pub recent_interaction_type: Option<InteractionKind>,
    pub last_interaction_timestamp: Option<DateTime<Utc>>,
    pub relationship_trajectory: Trajectory,
    /// High-intensity events, kept across runs.
    pub significant_events: Vec<InteractionEvent>,
    /// Events since the last run reset.
    pub current_run_events: Vec<InteractionEvent>,
}

impl RelationshipRecord {
    pub fn new(pair: PairKey) -> Self {
        Self {
            pair,
            overall_trust_level: 0.0,
            cooperation_count: 0,
            betrayal_count: 0,
            recent_interaction_type: None,
            last_interaction_timestamp: None,
            relationship_trajectory: Trajectory::Stable,
            significant_events: Vec::new(),
            current_run_events: Vec::new(),
        }
    }

    /// Convenience constructor for a record with a given trust level.
    pub fn with_trust(a: &AgentId, b: &AgentId, trust: f32) -> Self {
        let mut record = Self::new(PairKey::new(a, b));
        record.overall_trust_level = trust.clamp(-1.0, 1.0);
        record
    }

    pub fn involves(&self, agent: &AgentId) -> bool {
        self.pair.contains(agent)
    }
}
