/// Event ledger: the append-only interaction log and the per-pair
/// relationship aggregates derived from it.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::clock::SharedClock;
use crate::core::config::LedgerTuning;
use crate::schema::agent::{AgentId, PairKey};
use crate::schema::event::{EventDraft, EventId, InteractionEvent, InteractionKind, RunId};
use crate::schema::relationship::{RelationshipRecord, Trajectory};

/// Everything needed to restore a ledger in a later session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub run_id: RunId,
    pub events: Vec<InteractionEvent>,
    pub relationships: Vec<RelationshipRecord>,
}

/// Records interactions and maintains relationship records.
///
/// Never fails: out-of-range intensities are clamped into [0, 1] and trust
/// is clamped into [-1, 1] after every update.
pub struct Ledger {
    tuning: LedgerTuning,
    clock: SharedClock,
    events: Vec<InteractionEvent>,
    relationships: HashMap<PairKey, RelationshipRecord>,
    run_id: RunId,
}

impl Ledger {
    pub fn new(tuning: LedgerTuning, clock: SharedClock) -> Self {
        Self {
            tuning,
            clock,
            events: Vec::new(),
            relationships: HashMap::new(),
            run_id: RunId::new(),
        }
    }

    pub fn tuning(&self) -> &LedgerTuning {
        &self.tuning
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn events(&self) -> &[InteractionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Record an interaction, stamping it with the current time and run,
    /// and fold it into the pair's relationship record.
    pub fn record(&mut self, draft: EventDraft) -> InteractionEvent {
        let event = InteractionEvent {
            id: EventId::new(),
            run_id: self.run_id,
            timestamp: self.clock.now(),
            kind: draft.kind,
            agent_a: draft.agent_a,
            agent_b: draft.agent_b,
            context: draft.context,
            intensity: clamp_unit(draft.intensity),
            description: draft.description,
            consequences: draft.consequences,
        };

        self.events.push(event.clone());

        let pair = PairKey::new(&event.agent_a, &event.agent_b);
        let record = self
            .relationships
            .entry(pair.clone())
            .or_insert_with(|| RelationshipRecord::new(pair));
        let delta = trust_delta(&self.tuning, event.kind, event.intensity);
        fold_event(&self.tuning, record, &event, delta);

        tracing::debug!(
            "recorded {} between {} and {} (intensity {:.2}, trust delta {:+.3}, trust now {:.3})",
            event.kind,
            event.agent_a,
            event.agent_b,
            event.intensity,
            delta,
            record.overall_trust_level
        );

        event
    }

    pub fn get_relationship(&self, a: &AgentId, b: &AgentId) -> Option<&RelationshipRecord> {
        self.relationships.get(&PairKey::new(a, b))
    }

    /// All relationships `agent` is part of, strongest bonds (by absolute
    /// trust) first.
    pub fn agent_relationships(&self, agent: &AgentId) -> Vec<&RelationshipRecord> {
        let mut records: Vec<&RelationshipRecord> = self
            .relationships
            .values()
            .filter(|r| r.involves(agent))
            .collect();
        records.sort_by(|x, y| {
            y.overall_trust_level
                .abs()
                .total_cmp(&x.overall_trust_level.abs())
                .then_with(|| x.pair.cmp(&y.pair))
        });
        records
    }

    pub fn events_for<'a>(
        &'a self,
        agent: &'a AgentId,
    ) -> impl Iterator<Item = &'a InteractionEvent> + 'a {
        self.events.iter().filter(move |e| e.involves(agent))
    }

    pub fn events_between<'a>(
        &'a self,
        a: &'a AgentId,
        b: &'a AgentId,
    ) -> impl Iterator<Item = &'a InteractionEvent> + 'a {
        self.events.iter().filter(move |e| e.is_between(a, b))
    }

    /// Begin a new playthrough: per-run event lists are cleared, significant
    /// events and trust survive, and later events carry a fresh run id.
    pub fn start_new_run(&mut self) -> RunId {
        for record in self.relationships.values_mut() {
            record.current_run_events.clear();
            record.relationship_trajectory = Trajectory::Stable;
        }
        self.run_id = RunId::new();
        tracing::info!(
            "started run {} with {} relationships carried over",
            self.run_id,
            self.relationships.len()
        );
        self.run_id
    }

    pub fn export_snapshot(&self) -> LedgerSnapshot {
        let mut relationships: Vec<RelationshipRecord> =
            self.relationships.values().cloned().collect();
        relationships.sort_by(|x, y| x.pair.cmp(&y.pair));
        LedgerSnapshot {
            run_id: self.run_id,
            events: self.events.clone(),
            relationships,
        }
    }

    /// Replace the ledger's contents with `snapshot`.
    pub fn import_snapshot(&mut self, snapshot: LedgerSnapshot) {
        self.run_id = snapshot.run_id;
        self.events = snapshot.events;
        self.relationships = snapshot
            .relationships
            .into_iter()
            .map(|r| (r.pair.clone(), r))
            .collect();
        tracing::info!(
            "imported {} events and {} relationships",
            self.events.len(),
            self.relationships.len()
        );
    }
}

fn clamp_unit(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn trust_delta(tuning: &LedgerTuning, kind: InteractionKind, intensity: f32) -> f32 {
    let delta = tuning.base_rate * intensity * tuning.multiplier(kind);
    if delta.is_finite() {
        delta
    } else {
        0.0
    }
}

fn fold_event(
    tuning: &LedgerTuning,
    record: &mut RelationshipRecord,
    event: &InteractionEvent,
    delta: f32,
) {
    match event.kind {
        InteractionKind::Cooperation
        | InteractionKind::MutualSupport
        | InteractionKind::Rescue
        | InteractionKind::Sacrifice => record.cooperation_count += 1,
        InteractionKind::Betrayal => record.betrayal_count += 1,
        InteractionKind::SharedSecret
        | InteractionKind::Conflict
        | InteractionKind::Reconciliation => {}
    }

    record.overall_trust_level = (record.overall_trust_level + delta).clamp(-1.0, 1.0);
    record.recent_interaction_type = Some(event.kind);
    record.last_interaction_timestamp = Some(event.timestamp);
    record.current_run_events.push(event.clone());

    if event.intensity >= tuning.significance_threshold {
        record.significant_events.push(event.clone());
        let excess = record
            .significant_events
            .len()
            .saturating_sub(tuning.max_significant_events);
        if excess > 0 {
            record.significant_events.drain(..excess);
        }
    }

    let window = tuning.trajectory_window;
    let start = record.current_run_events.len().saturating_sub(window);
    record.relationship_trajectory =
        Trajectory::from_kinds(record.current_run_events[start..].iter().map(|e| e.kind));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::schema::event::EventContext;
    use chrono::Duration;
    use std::sync::Arc;

    fn ledger() -> (Ledger, ManualClock) {
        let clock = ManualClock::default();
        (
            Ledger::new(LedgerTuning::default(), Arc::new(clock.clone())),
            clock,
        )
    }

    fn draft(kind: InteractionKind, intensity: f32) -> EventDraft {
        EventDraft::new(kind, "morthos", "al", EventContext::at("lab"), intensity)
    }

    fn trust(ledger: &Ledger) -> f32 {
        ledger
            .get_relationship(&AgentId::new("morthos"), &AgentId::new("al"))
            .unwrap()
            .overall_trust_level
    }

    #[test]
    fn intensity_is_clamped() {
        let (mut ledger, _) = ledger();
        assert_eq!(ledger.record(draft(InteractionKind::Rescue, 7.5)).intensity, 1.0);
        assert_eq!(ledger.record(draft(InteractionKind::Rescue, -2.0)).intensity, 0.0);
        assert_eq!(ledger.record(draft(InteractionKind::Rescue, f32::NAN)).intensity, 0.0);
    }

    #[test]
    fn trust_stays_in_range() {
        let (mut ledger, _) = ledger();
        for _ in 0..200 {
            ledger.record(draft(InteractionKind::Sacrifice, 1.0));
            let t = trust(&ledger);
            assert!((-1.0..=1.0).contains(&t));
        }
        assert_eq!(trust(&ledger), 1.0);
        for _ in 0..200 {
            ledger.record(draft(InteractionKind::Betrayal, 5.0));
            let t = trust(&ledger);
            assert!((-1.0..=1.0).contains(&t));
        }
        assert_eq!(trust(&ledger), -1.0);
    }

    #[test]
    fn trust_delta_formula() {
        let (mut ledger, _) = ledger();
        ledger.record(draft(InteractionKind::Cooperation, 0.5));
        assert!((trust(&ledger) - 0.05).abs() < 1e-6);
        ledger.record(draft(InteractionKind::Betrayal, 0.5));
        assert!((trust(&ledger) - (-0.05)).abs() < 1e-6);
    }

    #[test]
    fn reconciliation_repairs_betrayal() {
        let (mut betrayed_only, _) = ledger();
        betrayed_only.record(draft(InteractionKind::Betrayal, 0.9));

        let (mut reconciled, _) = ledger();
        reconciled.record(draft(InteractionKind::Betrayal, 0.9));
        reconciled.record(draft(InteractionKind::Reconciliation, 0.8));

        assert!(trust(&reconciled) > trust(&betrayed_only));
    }

    #[test]
    fn counters_follow_kind() {
        let (mut ledger, _) = ledger();
        ledger.record(draft(InteractionKind::Cooperation, 0.5));
        ledger.record(draft(InteractionKind::Rescue, 0.5));
        ledger.record(draft(InteractionKind::Betrayal, 0.5));
        ledger.record(draft(InteractionKind::Conflict, 0.5));
        let record = ledger
            .get_relationship(&AgentId::new("al"), &AgentId::new("morthos"))
            .unwrap();
        assert_eq!(record.cooperation_count, 2);
        assert_eq!(record.betrayal_count, 1);
        assert_eq!(record.recent_interaction_type, Some(InteractionKind::Conflict));
        assert_eq!(record.current_run_events.len(), 4);
    }

    #[test]
    fn trajectory_uses_last_three_events() {
        let (mut ledger, _) = ledger();
        let pair = (AgentId::new("morthos"), AgentId::new("al"));
        ledger.record(draft(InteractionKind::Betrayal, 0.5));
        ledger.record(draft(InteractionKind::Conflict, 0.5));
        assert_eq!(
            ledger.get_relationship(&pair.0, &pair.1).unwrap().relationship_trajectory,
            Trajectory::Declining
        );
        ledger.record(draft(InteractionKind::Rescue, 0.5));
        ledger.record(draft(InteractionKind::Cooperation, 0.5));
        ledger.record(draft(InteractionKind::Cooperation, 0.5));
        assert_eq!(
            ledger.get_relationship(&pair.0, &pair.1).unwrap().relationship_trajectory,
            Trajectory::Improving
        );
    }

    #[test]
    fn significant_events_pruned_oldest_first() {
        let (mut ledger, clock) = ledger();
        let mut first_ids = Vec::new();
        for _ in 0..12 {
            clock.advance(Duration::minutes(1));
            first_ids.push(ledger.record(draft(InteractionKind::Rescue, 0.9)).id);
        }
        ledger.record(draft(InteractionKind::Rescue, 0.2));
        let record = ledger
            .get_relationship(&AgentId::new("morthos"), &AgentId::new("al"))
            .unwrap();
        assert_eq!(record.significant_events.len(), 10);
        assert_eq!(record.significant_events[0].id, first_ids[2]);
        assert_eq!(record.significant_events[9].id, first_ids[11]);
    }

    #[test]
    fn new_run_clears_run_events_but_keeps_significant() {
        let (mut ledger, _) = ledger();
        let old_run = ledger.run_id();
        ledger.record(draft(InteractionKind::Rescue, 0.9));
        ledger.record(draft(InteractionKind::Cooperation, 0.3));
        ledger.record(
            EventDraft::new(InteractionKind::Conflict, "al", "vex", EventContext::at("hall"), 0.75),
        );

        let new_run = ledger.start_new_run();
        assert_ne!(old_run, new_run);

        for agent in ["morthos", "vex"] {
            let record = ledger
                .get_relationship(&AgentId::new("al"), &AgentId::new(agent))
                .unwrap();
            assert!(record.current_run_events.is_empty());
            assert_eq!(record.significant_events.len(), 1);
            assert_eq!(record.relationship_trajectory, Trajectory::Stable);
        }

        let event = ledger.record(draft(InteractionKind::Cooperation, 0.3));
        assert_eq!(event.run_id, new_run);
        assert_eq!(ledger.len(), 4);
    }

    #[test]
    fn agent_relationships_strongest_first() {
        let (mut ledger, _) = ledger();
        ledger.record(EventDraft::new(
            InteractionKind::Cooperation,
            "al",
            "morthos",
            EventContext::at("lab"),
            0.2,
        ));
        ledger.record(EventDraft::new(
            InteractionKind::Betrayal,
            "al",
            "vex",
            EventContext::at("lab"),
            0.9,
        ));
        ledger.record(EventDraft::new(
            InteractionKind::Rescue,
            "morthos",
            "vex",
            EventContext::at("lab"),
            0.9,
        ));

        let records = ledger.agent_relationships(&AgentId::new("al"));
        assert_eq!(records.len(), 2);
        assert!(records[0].pair.contains(&AgentId::new("vex")));
        assert!(ledger.agent_relationships(&AgentId::new("nobody")).is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let (mut ledger, clock) = ledger();
        for kind in InteractionKind::ALL {
            clock.advance(Duration::seconds(30));
            ledger.record(draft(kind, 0.75));
        }
        ledger.start_new_run();
        ledger.record(draft(InteractionKind::Rescue, 0.4));

        let snapshot = ledger.export_snapshot();
        let encoded = ron::to_string(&snapshot).unwrap();
        let decoded: LedgerSnapshot = ron::from_str(&encoded).unwrap();

        let (mut restored, _) = self::ledger();
        restored.import_snapshot(decoded);

        assert_eq!(restored.len(), ledger.len());
        assert_eq!(restored.run_id(), ledger.run_id());
        assert_eq!(restored.export_snapshot(), snapshot);
    }
}
