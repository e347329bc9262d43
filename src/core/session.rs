/// One game session's worth of alliance state: ledger, recall, orchestrator,
/// bus and cooldowns sharing a clock, plus the optional collaborators.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::core::bus::{ConversationBus, Exchange, SendOptions, SendReceipt};
use crate::core::clock::{SharedClock, SystemClock};
use crate::core::collaborators::{FlagStore, Presence, SharedGenerator, SnapshotError, SnapshotStore};
use crate::core::config::{AllianceConfig, ConfigError};
use crate::core::cooldown::CooldownTracker;
use crate::core::ledger::Ledger;
use crate::core::orchestrator::{ApplyReport, EncounterContext, Orchestrator};
use crate::core::phrasebook::{PhraseError, Phrasebook};
use crate::core::recall::{RecallEngine, RecallTrigger, RecalledMemory};
use crate::core::voice::{VoiceError, VoiceRegistry};
use crate::schema::agent::{AgentId, RoomId};
use crate::schema::encounter::{Encounter, EncounterKind};
use crate::schema::event::{EventContext, EventDraft, InteractionEvent, RunId};
use crate::schema::relationship::RelationshipRecord;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("phrasebook error: {0}")]
    Phrase(#[from] PhraseError),
    #[error("voice error: {0}")]
    Voice(#[from] VoiceError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("no snapshot store configured")]
    NoSnapshotStore,
}

/// The context object every alliance operation goes through.
/// Built via `AllianceSession::builder()`.
pub struct AllianceSession {
    clock: SharedClock,
    ledger: Ledger,
    recall: RecallEngine,
    orchestrator: Orchestrator,
    bus: ConversationBus,
    cooldowns: CooldownTracker,
    flags: Option<Box<dyn FlagStore>>,
    store: Option<Box<dyn SnapshotStore>>,
}

/// Builder for constructing an `AllianceSession`.
pub struct AllianceSessionBuilder {
    config_path: Option<PathBuf>,
    phrasebook_paths: Vec<PathBuf>,
    voices_path: Option<PathBuf>,
    /// Directly provided config (for testing without files).
    config: Option<AllianceConfig>,
    /// Directly provided phrasebook, used instead of the built-in one.
    phrasebook: Option<Phrasebook>,
    /// Directly provided voices (for testing without files).
    voices: Option<VoiceRegistry>,
    clock: Option<SharedClock>,
    flags: Option<Box<dyn FlagStore>>,
    store: Option<Box<dyn SnapshotStore>>,
    generator: Option<SharedGenerator>,
    agents: Vec<String>,
}

impl AllianceSession {
    pub fn builder() -> AllianceSessionBuilder {
        AllianceSessionBuilder {
            config_path: None,
            phrasebook_paths: Vec::new(),
            voices_path: None,
            config: None,
            phrasebook: None,
            voices: None,
            clock: None,
            flags: None,
            store: None,
            generator: None,
            agents: Vec::new(),
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn recall_engine(&self) -> &RecallEngine {
        &self.recall
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn bus(&self) -> &ConversationBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut ConversationBus {
        &mut self.bus
    }

    pub fn cooldowns_mut(&mut self) -> &mut CooldownTracker {
        &mut self.cooldowns
    }

    pub fn set_flag_store(&mut self, flags: Option<Box<dyn FlagStore>>) {
        self.flags = flags;
    }

    pub fn record_event(&mut self, draft: EventDraft) -> InteractionEvent {
        self.ledger.record(draft)
    }

    pub fn relationship(&self, a: &AgentId, b: &AgentId) -> Option<&RelationshipRecord> {
        self.ledger.get_relationship(a, b)
    }

    pub fn agent_relationships(&self, agent: &AgentId) -> Vec<&RelationshipRecord> {
        self.ledger.agent_relationships(agent)
    }

    pub fn recall(
        &self,
        agent: &AgentId,
        context: &EventContext,
        triggers: &[RecallTrigger],
    ) -> Vec<RecalledMemory> {
        self.recall
            .recall(&self.ledger, agent, context, triggers, self.clock.now())
    }

    /// Preview an encounter. Nothing is committed until `apply_outcomes`.
    pub fn generate_encounter(
        &mut self,
        a: &AgentId,
        b: &AgentId,
        context: &EncounterContext,
    ) -> Encounter {
        let now = self.clock.now();
        self.orchestrator
            .generate(&self.ledger, &self.recall, a, b, context, now)
    }

    pub fn generate_encounter_as(
        &mut self,
        kind: EncounterKind,
        a: &AgentId,
        b: &AgentId,
        context: &EncounterContext,
    ) -> Encounter {
        let now = self.clock.now();
        self.orchestrator
            .generate_as(kind, &self.ledger, &self.recall, a, b, context, now)
    }

    pub fn apply_outcomes(&mut self, encounter: &Encounter) -> ApplyReport {
        let flags = self
            .flags
            .as_mut()
            .map(|f| &mut **f as &mut dyn FlagStore);
        self.orchestrator
            .apply_outcomes(encounter, &mut self.ledger, flags)
    }

    pub fn encounter_history(&self) -> &[Encounter] {
        self.orchestrator.history()
    }

    /// Start a new playthrough. Trust and significant events carry over;
    /// encounter history and queued replies do not.
    pub fn start_new_run(&mut self) -> RunId {
        self.orchestrator.clear_history();
        self.bus.clear_pending();
        self.ledger.start_new_run()
    }

    /// Write the ledger to the snapshot store.
    pub fn save(&mut self) -> Result<(), SessionError> {
        let snapshot = self.ledger.export_snapshot();
        let store = self.store.as_mut().ok_or(SessionError::NoSnapshotStore)?;
        store.save(&snapshot)?;
        Ok(())
    }

    /// Replace the ledger with the stored snapshot. Returns false if the
    /// store is empty, leaving the ledger as it was.
    pub fn load(&mut self) -> Result<bool, SessionError> {
        let store = self.store.as_ref().ok_or(SessionError::NoSnapshotStore)?;
        match store.load()? {
            Some(snapshot) => {
                self.ledger.import_snapshot(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn send(
        &mut self,
        from: &AgentId,
        to: &AgentId,
        text: &str,
        room: &RoomId,
        options: SendOptions,
    ) -> SendReceipt {
        let now = self.clock.now();
        self.bus.send(from, to, text, room, options, now)
    }

    /// Deliver replies due by the session clock.
    pub fn pump_replies(&mut self, presence: &dyn Presence) -> Vec<Exchange> {
        let now = self.clock.now();
        self.bus.pump(now, presence)
    }

    /// Open spontaneous banter between `from` and `to` if the pair is not
    /// cooling down in `room`. `None` means the attempt was blocked.
    pub fn try_start_conversation(
        &mut self,
        from: &AgentId,
        to: &AgentId,
        opener: &str,
        room: &RoomId,
    ) -> Option<SendReceipt> {
        let now = self.clock.now();
        if !self.cooldowns.try_start(room, from, to, now) {
            tracing::debug!(
                "{from} and {to} are cooling down in {room} for {}s",
                self.cooldowns.remaining(room, from, to, now).num_seconds()
            );
            return None;
        }
        Some(self.bus.send(from, to, opener, room, SendOptions::default(), now))
    }
}

impl AllianceSessionBuilder {
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Merge a RON phrasebook over the base one. Later files win.
    pub fn phrasebook_file(mut self, path: impl AsRef<Path>) -> Self {
        self.phrasebook_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn voices_file(mut self, path: impl AsRef<Path>) -> Self {
        self.voices_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_config(mut self, config: AllianceConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_phrasebook(mut self, phrasebook: Phrasebook) -> Self {
        self.phrasebook = Some(phrasebook);
        self
    }

    pub fn with_voices(mut self, voices: VoiceRegistry) -> Self {
        self.voices = Some(voices);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn flag_store(mut self, flags: impl FlagStore + 'static) -> Self {
        self.flags = Some(Box::new(flags));
        self
    }

    pub fn snapshot_store(mut self, store: impl SnapshotStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn generator(mut self, generator: SharedGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Register a conversational agent with the bus.
    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agents.push(agent.into());
        self
    }

    pub fn build(self) -> Result<AllianceSession, SessionError> {
        // A config file overrides a directly provided config
        let config = match &self.config_path {
            Some(path) => AllianceConfig::load_from_ron(path)?,
            None => self.config.unwrap_or_default(),
        };

        let mut phrasebook = self.phrasebook.unwrap_or_else(Phrasebook::builtin);
        for path in &self.phrasebook_paths {
            phrasebook.merge(Phrasebook::load_from_ron(path)?);
        }

        let mut voices = self.voices.unwrap_or_default();
        if let Some(path) = &self.voices_path {
            voices.load_from_ron(path)?;
        }

        let clock: SharedClock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let AllianceConfig {
            ledger,
            recall,
            encounters,
            bus,
        } = config;

        let cooldowns = CooldownTracker::new(bus.default_cooldown_secs, &bus.cooldowns);
        let mut bus = ConversationBus::new(bus, phrasebook.clone(), voices);
        bus.set_generator(self.generator);
        let agent_count = self.agents.len();
        for agent in self.agents {
            bus.register_agent(agent);
        }

        tracing::info!(
            "alliance session ready ({} phrase rules, {} conversational agents)",
            phrasebook.rules.len(),
            agent_count
        );

        Ok(AllianceSession {
            ledger: Ledger::new(ledger, clock.clone()),
            recall: RecallEngine::new(recall),
            orchestrator: Orchestrator::new(encounters, phrasebook),
            bus,
            cooldowns,
            clock,
            flags: self.flags,
            store: self.store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::collaborators::MemoryStore;
    use crate::schema::event::InteractionKind;
    use chrono::Duration;

    fn session(clock: &ManualClock) -> AllianceSession {
        AllianceSession::builder()
            .clock(Arc::new(clock.clone()))
            .snapshot_store(MemoryStore::new())
            .agent("al")
            .agent("morthos")
            .build()
            .unwrap()
    }

    #[test]
    fn new_run_clears_history_and_queue() {
        let clock = ManualClock::default();
        let mut session = session(&clock);
        let al = AgentId::new("al");
        let morthos = AgentId::new("morthos");
        session.generate_encounter(&al, &morthos, &EncounterContext::at("bar"));
        session.send(&al, &morthos, "hello", &RoomId::new("bar"), SendOptions::default());
        assert_eq!(session.encounter_history().len(), 1);
        assert_eq!(session.bus().pending_replies(), 1);

        session.start_new_run();
        assert!(session.encounter_history().is_empty());
        assert_eq!(session.bus().pending_replies(), 0);
    }

    #[test]
    fn save_requires_store() {
        let mut session = AllianceSession::builder().build().unwrap();
        assert!(matches!(session.save(), Err(SessionError::NoSnapshotStore)));
    }

    #[test]
    fn save_and_load() {
        let clock = ManualClock::default();
        let mut session = session(&clock);
        assert!(!session.load().unwrap());
        session.record_event(EventDraft::new(
            InteractionKind::Cooperation,
            "al",
            "morthos",
            EventContext::at("bar"),
            0.5,
        ));
        session.save().unwrap();
        session.record_event(EventDraft::new(
            InteractionKind::Betrayal,
            "al",
            "morthos",
            EventContext::at("bar"),
            0.5,
        ));
        assert!(session.load().unwrap());
        assert_eq!(session.ledger().len(), 1);
    }

    #[test]
    fn conversation_cooldown() {
        let clock = ManualClock::default();
        let mut session = session(&clock);
        let al = AgentId::new("al");
        let morthos = AgentId::new("morthos");
        let bar = RoomId::new("bar");

        assert!(session.try_start_conversation(&al, &morthos, "hey", &bar).is_some());
        clock.advance(Duration::seconds(30));
        assert!(session.try_start_conversation(&morthos, &al, "hey", &bar).is_none());
        clock.advance(Duration::seconds(30));
        assert!(session.try_start_conversation(&morthos, &al, "hey", &bar).is_some());
    }
}
