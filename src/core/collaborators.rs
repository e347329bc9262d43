/// Interfaces to the systems around the core: game flags, text
/// generation, presence and persistence, plus small in-crate implementations.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::core::ledger::LedgerSnapshot;
use crate::schema::agent::{AgentId, RoomId, Value};

#[derive(Debug, Error)]
pub enum FlagError {
    #[error("flag store unavailable")]
    Unavailable,
    #[error("flag {key} rejected: {reason}")]
    Rejected { key: String, reason: String },
}

/// Game-flag sink the orchestrator writes encounter results into.
pub trait FlagStore {
    fn set_flag(&mut self, key: &str, value: Value) -> Result<(), FlagError>;
}

impl FlagStore for HashMap<String, Value> {
    fn set_flag(&mut self, key: &str, value: Value) -> Result<(), FlagError> {
        self.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("text generator unavailable")]
    Unavailable,
    #[error("text generation failed: {0}")]
    Failed(String),
    #[error("text generation timed out after {0:?}")]
    TimedOut(Duration),
}

/// What the text generator may know about the world when asked for a line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    pub room: Option<RoomId>,
    pub present: Vec<AgentId>,
    pub recent_topics: Vec<String>,
}

/// Optional external producer of short utterances.
pub trait TextGenerator: Send + Sync {
    /// `Ok(None)` means the generator had nothing to say.
    fn generate(
        &self,
        agent: &AgentId,
        prompt: &str,
        world: &WorldSnapshot,
    ) -> Result<Option<String>, GeneratorError>;

    /// A globally disabled or rate-limited generator reports false and is skipped.
    fn is_available(&self) -> bool {
        true
    }
}

pub type SharedGenerator = Arc<dyn TextGenerator>;

/// Ask `generator` for a line, waiting at most `timeout`.
///
/// The call runs on a worker thread. If it does not answer in time the
/// thread is abandoned and its eventual result discarded.
pub fn generate_with_timeout(
    generator: &SharedGenerator,
    agent: &AgentId,
    prompt: &str,
    world: &WorldSnapshot,
    timeout: Duration,
) -> Result<Option<String>, GeneratorError> {
    if !generator.is_available() {
        return Err(GeneratorError::Unavailable);
    }

    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(generator);
    let agent = agent.clone();
    let prompt = prompt.to_string();
    let world = world.clone();
    thread::spawn(move || {
        let result = worker.generate(&agent, &prompt, &world);
        // The receiver is gone if we already timed out.
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(GeneratorError::TimedOut(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(GeneratorError::Failed("generator thread panicked".to_string()))
        }
    }
}

/// Reports which agents are currently in a room.
pub trait Presence {
    fn agents_in(&self, room: &RoomId) -> Vec<AgentId>;

    fn is_present(&self, agent: &AgentId, room: &RoomId) -> bool {
        self.agents_in(room).contains(agent)
    }
}

/// A fixed agent-to-room map, enough for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPresence {
    locations: HashMap<AgentId, RoomId>,
}

impl StaticPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `agent` into `room`, leaving wherever it was.
    pub fn place(&mut self, agent: impl Into<String>, room: impl Into<String>) {
        self.locations
            .insert(AgentId::new(agent), RoomId::new(room));
    }

    pub fn remove(&mut self, agent: &AgentId) {
        self.locations.remove(agent);
    }

    pub fn room_of(&self, agent: &AgentId) -> Option<&RoomId> {
        self.locations.get(agent)
    }
}

impl Presence for StaticPresence {
    fn agents_in(&self, room: &RoomId) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .locations
            .iter()
            .filter(|(_, r)| *r == room)
            .map(|(a, _)| a.clone())
            .collect();
        agents.sort();
        agents
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    RonEncode(#[from] ron::Error),
}

/// Keeps one ledger snapshot between sessions.
pub trait SnapshotStore {
    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError>;

    /// `Ok(None)` if nothing has been saved yet.
    fn load(&self) -> Result<Option<LedgerSnapshot>, SnapshotError>;
}

/// Snapshot kept as pretty-printed RON in a single file.
#[derive(Debug, Clone)]
pub struct RonFileStore {
    path: PathBuf,
}

impl RonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for RonFileStore {
    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError> {
        let text = ron::ser::to_string_pretty(snapshot, ron::ser::PrettyConfig::default())?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, text)?;
        tracing::info!(
            "saved {} events to {}",
            snapshot.events.len(),
            self.path.display()
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<LedgerSnapshot>, SnapshotError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(ron::from_str(&contents)?))
    }
}

/// Snapshot kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    snapshot: Option<LedgerSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), SnapshotError> {
        self.snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<LedgerSnapshot>, SnapshotError> {
        Ok(self.snapshot.clone())
    }
}
