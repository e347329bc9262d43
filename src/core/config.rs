/// Tunable constants for every component, loadable from RON.
///
/// Every struct is `#[serde(default)]`, so a RON file only has to name the
/// values it overrides.
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::schema::agent::AgentId;
use crate::schema::encounter::EncounterKind;
use crate::schema::event::InteractionKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllianceConfig {
    pub ledger: LedgerTuning,
    pub recall: RecallTuning,
    pub encounters: EncounterTuning,
    pub bus: BusConfig,
}

impl AllianceConfig {
    pub fn load_from_ron(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(input)?)
    }
}

/// Trust arithmetic and retention limits for the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerTuning {
    pub base_rate: f32,
    /// Overrides of the built-in per-kind direction multipliers.
    pub direction_multipliers: HashMap<InteractionKind, f32>,
    pub significance_threshold: f32,
    pub max_significant_events: usize,
    /// How many of the most recent run events vote on the trajectory.
    pub trajectory_window: usize,
}

impl Default for LedgerTuning {
    fn default() -> Self {
        Self {
            base_rate: 0.1,
            direction_multipliers: HashMap::new(),
            significance_threshold: 0.7,
            max_significant_events: 10,
            trajectory_window: 3,
        }
    }
}

impl LedgerTuning {
    /// Direction multiplier for `kind`: the override if configured,
    /// else the built-in value. Betrayal hurts twice as much as
    /// cooperation helps.
    pub fn multiplier(&self, kind: InteractionKind) -> f32 {
        if let Some(m) = self.direction_multipliers.get(&kind) {
            return *m;
        }
        match kind {
            InteractionKind::Cooperation
            | InteractionKind::Rescue
            | InteractionKind::MutualSupport => 1.0,
            InteractionKind::Betrayal => -2.0,
            InteractionKind::Conflict => -0.5,
            InteractionKind::Reconciliation => 1.5,
            InteractionKind::Sacrifice => 2.0,
            InteractionKind::SharedSecret => 0.5,
        }
    }
}

/// Relevance scoring weights for recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallTuning {
    /// Memories scoring below this are discarded.
    pub threshold: f32,
    pub max_results: usize,
    pub intensity_weight: f32,
    pub location_weight: f32,
    /// Recency bonus for an event recorded just now.
    pub recency_max: f32,
    pub recency_decay_per_day: f32,
    /// Bonus per matched trigger unless the trigger carries its own.
    pub default_trigger_weight: f32,
}

impl Default for RecallTuning {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            max_results: 5,
            intensity_weight: 0.4,
            location_weight: 0.3,
            recency_max: 0.3,
            recency_decay_per_day: 0.01,
            default_trigger_weight: 0.2,
        }
    }
}

/// Cascade thresholds and archetype constants for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncounterTuning {
    pub trust_impacts: HashMap<EncounterKind, f32>,
    /// Trust strictly above this is a trusted partnership.
    pub partnership_trust: f32,
    /// Trust strictly above this with an improving trajectory is mutual recognition.
    pub recognition_trust: f32,
    /// Trust at or below this is a confrontation.
    pub hostile_trust: f32,
    pub new_memory_base: f32,
    pub new_memory_cap: f32,
    pub seed: u64,
}

impl Default for EncounterTuning {
    fn default() -> Self {
        Self {
            trust_impacts: HashMap::new(),
            partnership_trust: 0.7,
            recognition_trust: 0.3,
            hostile_trust: -0.5,
            new_memory_base: 0.5,
            new_memory_cap: 0.8,
            seed: 0,
        }
    }
}

impl EncounterTuning {
    pub fn trust_impact(&self, kind: EncounterKind) -> f32 {
        self.trust_impacts
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_trust_impact())
    }
}

/// Which replies contend for the reply lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReplyLockScope {
    /// One pending reply system-wide.
    #[default]
    Global,
    /// One pending reply per room and agent pair.
    PerThread,
}

/// Cooldown override for a specific pair of agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCooldown {
    pub a: AgentId,
    pub b: AgentId,
    pub secs: u64,
}

/// Delivery policy for the conversation bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub max_exchanges_per_thread: usize,
    /// Whether exchanges are visible to the player unless overridden.
    pub overhear_by_default: bool,
    /// (min, max) delay before an auto-reply, in milliseconds.
    pub reply_delay_ms: (u64, u64),
    /// Agents that may only reply when both parties are in the same room.
    pub colocation_required: FxHashSet<AgentId>,
    /// Agents exempt from the co-location rule.
    pub cross_room_agents: FxHashSet<AgentId>,
    /// Maximum length of an auto-reply chain.
    pub max_reply_depth: u8,
    pub reply_lock: ReplyLockScope,
    pub generator_timeout_ms: u64,
    /// Utterances remembered per speaker.
    pub utterance_memory: usize,
    pub observation_log_cap: usize,
    pub default_cooldown_secs: u64,
    pub cooldowns: Vec<PairCooldown>,
    pub seed: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_exchanges_per_thread: 20,
            overhear_by_default: true,
            reply_delay_ms: (800, 2500),
            colocation_required: FxHashSet::default(),
            cross_room_agents: FxHashSet::default(),
            max_reply_depth: 2,
            reply_lock: ReplyLockScope::Global,
            generator_timeout_ms: 1500,
            utterance_memory: 8,
            observation_log_cap: 200,
            default_cooldown_secs: 60,
            cooldowns: Vec::new(),
            seed: 0,
        }
    }
}
