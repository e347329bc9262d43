/// Conversation cooldowns, per room and unordered agent pair.
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::core::config::PairCooldown;
use crate::schema::agent::{AgentId, PairKey, RoomId};

/// Remembers when each pair last *started* a conversation in each room.
/// Individual exchanges do not reset the timer.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    default: Duration,
    overrides: HashMap<PairKey, Duration>,
    started: HashMap<(RoomId, PairKey), DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(default_secs: u64, overrides: &[PairCooldown]) -> Self {
        Self {
            default: secs(default_secs),
            overrides: overrides
                .iter()
                .map(|o| (PairKey::new(&o.a, &o.b), secs(o.secs)))
                .collect(),
            started: HashMap::new(),
        }
    }

    pub fn set_cooldown(&mut self, a: &AgentId, b: &AgentId, duration: Duration) {
        self.overrides.insert(PairKey::new(a, b), duration);
    }

    pub fn cooldown_for(&self, a: &AgentId, b: &AgentId) -> Duration {
        self.overrides
            .get(&PairKey::new(a, b))
            .copied()
            .unwrap_or(self.default)
    }

    /// Time left before the pair may start another conversation in `room`.
    pub fn remaining(
        &self,
        room: &RoomId,
        a: &AgentId,
        b: &AgentId,
        now: DateTime<Utc>,
    ) -> Duration {
        let pair = PairKey::new(a, b);
        match self.started.get(&(room.clone(), pair)) {
            Some(last) => {
                let ready_at = *last + self.cooldown_for(a, b);
                (ready_at - now).max(Duration::zero())
            }
            None => Duration::zero(),
        }
    }

    pub fn is_ready(&self, room: &RoomId, a: &AgentId, b: &AgentId, now: DateTime<Utc>) -> bool {
        self.remaining(room, a, b, now).is_zero()
    }

    pub fn mark_started(&mut self, room: &RoomId, a: &AgentId, b: &AgentId, now: DateTime<Utc>) {
        self.started.insert((room.clone(), PairKey::new(a, b)), now);
    }

    /// Check and record in one step. Returns false (and records nothing)
    /// while the pair is cooling down.
    pub fn try_start(
        &mut self,
        room: &RoomId,
        a: &AgentId,
        b: &AgentId,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_ready(room, a, b, now) {
            return false;
        }
        self.mark_started(room, a, b, now);
        true
    }

    pub fn clear(&mut self) {
        self.started.clear();
    }
}

const MAX_COOLDOWN_SECS: u64 = 365 * 24 * 3600;

fn secs(s: u64) -> Duration {
    Duration::seconds(s.min(MAX_COOLDOWN_SECS) as i64)
}
