/// Conversation bus: agent-to-agent message threads with delayed,
/// lock-gated auto-replies.
///
/// Replies are not timers. `send` queues a `PendingReply` with a due time
/// and the host calls `pump` every frame to deliver whatever is due.
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::core::collaborators::{generate_with_timeout, Presence, SharedGenerator, WorldSnapshot};
use crate::core::config::{BusConfig, ReplyLockScope};
use crate::core::phrasebook::Phrasebook;
use crate::core::topic::{infer_topic, Topic};
use crate::core::voice::VoiceRegistry;
use crate::schema::agent::{AgentId, PairKey, RoomId};

/// Identifies a thread: one room, one unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey {
    pub room: RoomId,
    pub pair: PairKey,
}

impl ThreadKey {
    pub fn new(room: &RoomId, a: &AgentId, b: &AgentId) -> Self {
        Self {
            room: room.clone(),
            pair: PairKey::new(a, b),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room, self.pair)
    }
}

/// One message in a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub from: AgentId,
    pub to: AgentId,
    pub text: String,
    pub at: DateTime<Utc>,
    pub visible: bool,
    /// `None` for blank messages.
    pub topic: Option<Topic>,
    /// 0 for a message sent by the host, n for the n-th auto-reply in a chain.
    pub depth: u8,
}

#[derive(Debug, Clone)]
pub struct ConversationThread {
    pub key: ThreadKey,
    pub exchanges: Vec<Exchange>,
    /// Time of the latest exchange, kept even after trimming.
    pub last_timestamp: DateTime<Utc>,
    /// Higher is more urgent. Only changed by senders that set one.
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Overrides `overhear_by_default`.
    pub visible: Option<bool>,
    /// Overrides topic inference.
    pub topic: Option<Topic>,
    /// Replaces the thread's priority.
    pub priority: Option<u8>,
    pub depth: u8,
}

impl SendOptions {
    pub fn visible(visible: bool) -> Self {
        Self {
            visible: Some(visible),
            ..Default::default()
        }
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// What happened about a reply when a message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Scheduled { due: DateTime<Utc> },
    /// The recipient is not a registered conversational agent.
    NotAnAgent,
    /// The chain already reached `max_reply_depth`.
    DepthLimit,
    /// Another reply holds the lock this one needs; the reply is dropped.
    LockBusy,
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub thread: ThreadKey,
    pub reply: ReplyStatus,
}

type LockSet = Arc<Mutex<FxHashSet<String>>>;

const MAX_REPLY_DELAY_MS: u64 = 24 * 3600 * 1000;

/// Held by a pending reply; the lock key is released when this is dropped.
#[derive(Debug)]
struct ReplyPermit {
    key: String,
    locks: LockSet,
}

impl ReplyPermit {
    fn acquire(locks: &LockSet, key: String) -> Option<Self> {
        let mut held = locks.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return None;
        }
        Some(Self {
            key,
            locks: Arc::clone(locks),
        })
    }
}

impl Drop for ReplyPermit {
    fn drop(&mut self) {
        let mut held = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}

/// A reply waiting for its due time.
#[derive(Debug)]
struct PendingReply {
    replier: AgentId,
    recipient: AgentId,
    room: RoomId,
    prompt: String,
    topic: Topic,
    depth: u8,
    due: DateTime<Utc>,
    seq: u64,
    permit: ReplyPermit,
}

/// Routes messages between agents and produces their auto-replies.
pub struct ConversationBus {
    config: BusConfig,
    phrasebook: Phrasebook,
    voices: VoiceRegistry,
    generator: Option<SharedGenerator>,
    agents: FxHashSet<AgentId>,
    threads: HashMap<ThreadKey, ConversationThread>,
    observation_log: VecDeque<String>,
    utterances: HashMap<AgentId, VecDeque<String>>,
    pending: Vec<PendingReply>,
    locks: LockSet,
    rng: StdRng,
    next_seq: u64,
}

impl ConversationBus {
    pub fn new(config: BusConfig, phrasebook: Phrasebook, voices: VoiceRegistry) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            phrasebook,
            voices,
            generator: None,
            agents: FxHashSet::default(),
            threads: HashMap::new(),
            observation_log: VecDeque::new(),
            utterances: HashMap::new(),
            pending: Vec::new(),
            locks: Arc::new(Mutex::new(FxHashSet::default())),
            rng,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn set_generator(&mut self, generator: Option<SharedGenerator>) {
        self.generator = generator;
    }

    pub fn voices_mut(&mut self) -> &mut VoiceRegistry {
        &mut self.voices
    }

    /// Mark `agent` as conversational: messages to it get auto-replies.
    pub fn register_agent(&mut self, agent: impl Into<String>) {
        self.agents.insert(AgentId::new(agent));
    }

    pub fn is_agent(&self, agent: &AgentId) -> bool {
        self.agents.contains(agent)
    }

    pub fn thread(&self, key: &ThreadKey) -> Option<&ConversationThread> {
        self.threads.get(key)
    }

    pub fn threads(&self) -> impl Iterator<Item = &ConversationThread> {
        self.threads.values()
    }

    /// Threads by descending priority, most recently active first within
    /// a priority.
    pub fn threads_by_priority(&self) -> Vec<&ConversationThread> {
        let mut threads: Vec<&ConversationThread> = self.threads.values().collect();
        threads.sort_by(|x, y| {
            y.priority
                .cmp(&x.priority)
                .then_with(|| y.last_timestamp.cmp(&x.last_timestamp))
                .then_with(|| x.key.cmp(&y.key))
        });
        threads
    }

    /// Human-readable lines for visible agent-to-agent exchanges, oldest first.
    pub fn observation_log(&self) -> impl Iterator<Item = &str> {
        self.observation_log.iter().map(String::as_str)
    }

    /// What `agent` said recently, oldest first.
    pub fn recent_utterances(&self, agent: &AgentId) -> Vec<&str> {
        self.utterances
            .get(agent)
            .map(|u| u.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }

    /// Lock keys currently held by pending replies.
    pub fn locks_held(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Append a message to the room's thread for the pair and, if `to` is a
    /// conversational agent, queue its reply.
    pub fn send(
        &mut self,
        from: &AgentId,
        to: &AgentId,
        text: &str,
        room: &RoomId,
        options: SendOptions,
        now: DateTime<Utc>,
    ) -> SendReceipt {
        let key = ThreadKey::new(room, from, to);
        let visible = options.visible.unwrap_or(self.config.overhear_by_default);
        let topic = options
            .topic
            .or_else(|| (!text.trim().is_empty()).then(|| infer_topic(text)));
        let max = self.config.max_exchanges_per_thread;

        let thread = self
            .threads
            .entry(key.clone())
            .or_insert_with(|| ConversationThread {
                key: key.clone(),
                exchanges: Vec::new(),
                last_timestamp: now,
                priority: 0,
            });
        thread.exchanges.push(Exchange {
            from: from.clone(),
            to: to.clone(),
            text: text.to_string(),
            at: now,
            visible,
            topic,
            depth: options.depth,
        });
        thread.last_timestamp = thread.last_timestamp.max(now);
        if let Some(priority) = options.priority {
            thread.priority = priority;
        }
        if thread.exchanges.len() > max {
            let excess = thread.exchanges.len() - max;
            thread.exchanges.drain(..excess);
        }

        if visible && self.is_agent(from) && self.is_agent(to) {
            self.observation_log
                .push_back(format!("[{room}] {from} to {to}: {text}"));
            while self.observation_log.len() > self.config.observation_log_cap {
                self.observation_log.pop_front();
            }
        }

        let memory = self.utterances.entry(from.clone()).or_default();
        memory.push_back(text.to_string());
        while memory.len() > self.config.utterance_memory {
            memory.pop_front();
        }

        let reply = self.schedule_reply(
            &key,
            from,
            to,
            text,
            topic.unwrap_or(Topic::Banter),
            options.depth,
            now,
        );
        SendReceipt { thread: key, reply }
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_reply(
        &mut self,
        key: &ThreadKey,
        from: &AgentId,
        to: &AgentId,
        text: &str,
        topic: Topic,
        depth: u8,
        now: DateTime<Utc>,
    ) -> ReplyStatus {
        if !self.is_agent(to) {
            return ReplyStatus::NotAnAgent;
        }
        if depth >= self.config.max_reply_depth {
            tracing::debug!("{key}: reply chain stopped at depth {depth}");
            return ReplyStatus::DepthLimit;
        }

        let lock_key = match self.config.reply_lock {
            ReplyLockScope::Global => "*".to_string(),
            ReplyLockScope::PerThread => key.to_string(),
        };
        let Some(permit) = ReplyPermit::acquire(&self.locks, lock_key) else {
            tracing::debug!("{key}: reply from {to} dropped, reply lock busy");
            return ReplyStatus::LockBusy;
        };

        let (lo, hi) = self.config.reply_delay_ms;
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let delay_ms = self
            .rng
            .gen_range(lo.min(MAX_REPLY_DELAY_MS)..=hi.min(MAX_REPLY_DELAY_MS));
        let due = now
            .checked_add_signed(Duration::milliseconds(delay_ms as i64))
            .unwrap_or(now);

        self.pending.push(PendingReply {
            replier: to.clone(),
            recipient: from.clone(),
            room: key.room.clone(),
            prompt: text.to_string(),
            topic,
            depth: depth + 1,
            due,
            seq: self.next_seq,
            permit,
        });
        self.next_seq += 1;

        ReplyStatus::Scheduled { due }
    }

    /// Deliver every reply due at `now`, in due order. Returns the
    /// exchanges appended.
    ///
    /// Replies scheduled by these deliveries are never due in the same call.
    pub fn pump(&mut self, now: DateTime<Utc>, presence: &dyn Presence) -> Vec<Exchange> {
        let mut due: Vec<PendingReply> = Vec::new();
        let mut waiting = Vec::with_capacity(self.pending.len());
        for reply in self.pending.drain(..) {
            if reply.due <= now {
                due.push(reply);
            } else {
                waiting.push(reply);
            }
        }
        self.pending = waiting;
        due.sort_by(|x, y| x.due.cmp(&y.due).then(x.seq.cmp(&y.seq)));

        let mut delivered = Vec::new();
        for reply in due {
            if let Some(exchange) = self.deliver(reply, now, presence) {
                delivered.push(exchange);
            }
        }
        delivered
    }

    fn deliver(
        &mut self,
        reply: PendingReply,
        now: DateTime<Utc>,
        presence: &dyn Presence,
    ) -> Option<Exchange> {
        let PendingReply {
            replier,
            recipient,
            room,
            prompt,
            topic,
            depth,
            permit,
            ..
        } = reply;

        if !self.colocated(&replier, &recipient, &room, presence) {
            tracing::debug!("reply from {replier} to {recipient} dropped, not co-located in {room}");
            return None;
        }

        let Some(raw) = self.reply_text(&replier, &recipient, &room, &prompt, topic, presence)
        else {
            tracing::debug!("no reply line for {replier} on {topic}; dropped");
            return None;
        };
        let text = self.voices.transform(&replier, &raw, &mut self.rng);

        // Free the lock so the reply can schedule the next link in the chain.
        drop(permit);
        let receipt = self.send(
            &replier,
            &recipient,
            &text,
            &room,
            SendOptions {
                topic: Some(topic),
                depth,
                ..Default::default()
            },
            now,
        );
        self.threads
            .get(&receipt.thread)
            .and_then(|t| t.exchanges.last())
            .cloned()
    }

    /// Restricted agents may only reply with both parties in the room,
    /// unless either party is allowed across rooms.
    fn colocated(
        &self,
        replier: &AgentId,
        recipient: &AgentId,
        room: &RoomId,
        presence: &dyn Presence,
    ) -> bool {
        let config = &self.config;
        let restricted = config.colocation_required.contains(replier)
            || config.colocation_required.contains(recipient);
        let exempt = config.cross_room_agents.contains(replier)
            || config.cross_room_agents.contains(recipient);
        if !restricted || exempt {
            return true;
        }
        let present = presence.agents_in(room);
        present.contains(replier) && present.contains(recipient)
    }

    /// Ask the generator first; any failure falls back to the phrasebook.
    fn reply_text(
        &mut self,
        replier: &AgentId,
        recipient: &AgentId,
        room: &RoomId,
        prompt: &str,
        topic: Topic,
        presence: &dyn Presence,
    ) -> Option<String> {
        if let Some(generator) = &self.generator {
            let world = WorldSnapshot {
                room: Some(room.clone()),
                present: presence.agents_in(room),
                recent_topics: self
                    .recent_utterances(recipient)
                    .iter()
                    .map(|u| infer_topic(u).to_string())
                    .collect(),
            };
            let timeout = std::time::Duration::from_millis(self.config.generator_timeout_ms);
            match generate_with_timeout(generator, replier, prompt, &world, timeout) {
                Ok(Some(text)) if !text.trim().is_empty() => return Some(text.trim().to_string()),
                Ok(_) => tracing::debug!("generator had nothing for {replier}; using phrasebook"),
                Err(e) => tracing::warn!("generator failed for {replier}: {e}; using phrasebook"),
            }
        }

        let mut tags: FxHashSet<String> = FxHashSet::default();
        tags.insert(topic.tag());
        tags.insert(format!("speaker:{replier}"));
        tags.insert(format!("listener:{recipient}"));

        let mut values: HashMap<&str, String> = HashMap::new();
        values.insert("speaker", replier.to_string());
        values.insert("listener", recipient.to_string());
        values.insert("location", room.to_string());
        values.insert("topic", topic.to_string());
        values.insert("text", prompt.to_string());

        let rule = format!("reply.{topic}");
        self.phrasebook
            .line(&rule, &tags, &values, &mut self.rng)
            .or_else(|| {
                self.phrasebook
                    .line("reply.banter", &tags, &values, &mut self.rng)
            })
    }

    /// Drop every queued reply, releasing their locks.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Forget all threads, logs and queued replies.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.threads.clear();
        self.observation_log.clear();
        self.utterances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collaborators::{GeneratorError, StaticPresence, TextGenerator};
    use crate::core::voice::{Interjection, Placement, VoiceProfile};

    struct Canned(&'static str);

    impl TextGenerator for Canned {
        fn generate(
            &self,
            _agent: &AgentId,
            _prompt: &str,
            _world: &WorldSnapshot,
        ) -> Result<Option<String>, GeneratorError> {
            Ok(Some(self.0.to_string()))
        }
    }

    struct Slow;

    impl TextGenerator for Slow {
        fn generate(
            &self,
            _agent: &AgentId,
            _prompt: &str,
            _world: &WorldSnapshot,
        ) -> Result<Option<String>, GeneratorError> {
            std::thread::sleep(std::time::Duration::from_millis(500));
            Ok(Some("late".to_string()))
        }
    }

    fn bus(config: BusConfig) -> ConversationBus {
        let mut bus = ConversationBus::new(config, Phrasebook::builtin(), VoiceRegistry::new());
        bus.register_agent("al");
        bus.register_agent("morthos");
        bus.register_agent("vex");
        bus
    }

    fn instant() -> BusConfig {
        BusConfig {
            reply_delay_ms: (0, 0),
            ..Default::default()
        }
    }

    fn everyone_in(room: &str) -> StaticPresence {
        let mut presence = StaticPresence::new();
        for agent in ["al", "morthos", "vex", "player"] {
            presence.place(agent, room);
        }
        presence
    }

    fn ids() -> (AgentId, AgentId, RoomId) {
        (AgentId::new("al"), AgentId::new("morthos"), RoomId::new("bar"))
    }

    #[test]
    fn thread_is_trimmed_oldest_first() {
        let mut bus = bus(BusConfig {
            max_exchanges_per_thread: 3,
            ..Default::default()
        });
        let player = AgentId::new("player");
        let other = AgentId::new("guard");
        let room = RoomId::new("bar");
        let now = Utc::now();
        for i in 0..5 {
            bus.send(&player, &other, &i.to_string(), &room, SendOptions::default(), now);
        }
        let thread = bus.thread(&ThreadKey::new(&room, &other, &player)).unwrap();
        let texts: Vec<&str> = thread.exchanges.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["2", "3", "4"]);
    }

    #[test]
    fn visibility_and_observation_log() {
        let mut bus = bus(BusConfig {
            max_reply_depth: 0,
            ..Default::default()
        });
        let (al, morthos, room) = ids();
        let now = Utc::now();
        bus.send(&al, &morthos, "evening", &room, SendOptions::default(), now);
        bus.send(&al, &morthos, "psst", &room, SendOptions::visible(false), now);
        bus.send(&AgentId::new("player"), &al, "hi", &room, SendOptions::default(), now);

        let log: Vec<&str> = bus.observation_log().collect();
        assert_eq!(log, vec!["[bar] al to morthos: evening"]);
        let thread = bus.thread(&ThreadKey::new(&room, &morthos, &al)).unwrap();
        assert!(thread.exchanges[0].visible);
        assert!(!thread.exchanges[1].visible);
    }

    #[test]
    fn utterance_memory_is_capped() {
        let mut bus = bus(BusConfig {
            utterance_memory: 2,
            max_reply_depth: 0,
            ..Default::default()
        });
        let (al, morthos, room) = ids();
        for text in ["one", "two", "three"] {
            bus.send(&al, &morthos, text, &room, SendOptions::default(), Utc::now());
        }
        assert_eq!(bus.recent_utterances(&al), vec!["two", "three"]);
    }

    #[test]
    fn reply_waits_for_due_time() {
        let mut bus = bus(BusConfig {
            reply_delay_ms: (1000, 1000),
            ..Default::default()
        });
        let (al, morthos, room) = ids();
        let presence = everyone_in("bar");
        let now = Utc::now();
        let receipt = bus.send(&al, &morthos, "I'm stuck on this door", &room, SendOptions::default(), now);
        assert_eq!(
            receipt.reply,
            ReplyStatus::Scheduled {
                due: now + Duration::seconds(1)
            }
        );

        assert!(bus.pump(now, &presence).is_empty());
        let delivered = bus.pump(now + Duration::seconds(1), &presence);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].from, morthos);
        assert_eq!(
            delivered[0].text,
            "If I were you, I'd take a closer look around bar."
        );
        assert_eq!(delivered[0].depth, 1);
    }

    #[test]
    fn non_agent_recipient_never_replies() {
        let mut bus = bus(instant());
        let (al, _, room) = ids();
        let receipt = bus.send(&al, &AgentId::new("player"), "hello", &room, SendOptions::default(), Utc::now());
        assert_eq!(receipt.reply, ReplyStatus::NotAnAgent);
        assert_eq!(bus.pending_replies(), 0);
    }

    #[test]
    fn colocation_drop_is_silent() {
        let mut config = instant();
        config.colocation_required.insert(AgentId::new("al"));
        let mut bus = bus(config);
        let (al, morthos, room) = ids();
        let mut presence = StaticPresence::new();
        presence.place("al", "bar");
        presence.place("morthos", "lab");
        let now = Utc::now();

        bus.send(&morthos, &al, "you there?", &room, SendOptions::default(), now);
        assert!(bus.pump(now, &presence).is_empty());
        let thread = bus.thread(&ThreadKey::new(&room, &al, &morthos)).unwrap();
        assert_eq!(thread.exchanges.len(), 1);
        assert_eq!(bus.pending_replies(), 0);
        assert_eq!(bus.locks_held(), 0);
    }

    #[test]
    fn cross_room_agent_is_exempt() {
        let mut config = instant();
        config.colocation_required.insert(AgentId::new("al"));
        config.cross_room_agents.insert(AgentId::new("vex"));
        let mut bus = bus(config);
        let (al, _, room) = ids();
        let mut presence = StaticPresence::new();
        presence.place("al", "bar");
        presence.place("vex", "nowhere");
        let now = Utc::now();

        bus.send(&AgentId::new("vex"), &al, "can you hear me?", &room, SendOptions::default(), now);
        assert_eq!(bus.pump(now, &presence).len(), 1);
    }

    #[test]
    fn global_lock_admits_one_reply() {
        let mut bus = bus(instant());
        let (al, morthos, room) = ids();
        let vex = AgentId::new("vex");
        let lab = RoomId::new("lab");
        let now = Utc::now();

        let first = bus.send(&al, &morthos, "hello", &room, SendOptions::default(), now);
        let second = bus.send(&vex, &al, "hello", &lab, SendOptions::default(), now);
        assert!(matches!(first.reply, ReplyStatus::Scheduled { .. }));
        assert_eq!(second.reply, ReplyStatus::LockBusy);
        assert_eq!(bus.locks_held(), 1);
    }

    #[test]
    fn per_thread_lock_admits_unrelated_pairs() {
        let mut bus = bus(BusConfig {
            reply_lock: ReplyLockScope::PerThread,
            ..instant()
        });
        let (al, morthos, room) = ids();
        let vex = AgentId::new("vex");
        let now = Utc::now();

        let first = bus.send(&al, &morthos, "hello", &room, SendOptions::default(), now);
        let second = bus.send(&vex, &al, "hello", &room, SendOptions::default(), now);
        let third = bus.send(&morthos, &al, "again", &room, SendOptions::default(), now);
        assert!(matches!(first.reply, ReplyStatus::Scheduled { .. }));
        assert!(matches!(second.reply, ReplyStatus::Scheduled { .. }));
        assert_eq!(third.reply, ReplyStatus::LockBusy);
        assert_eq!(bus.locks_held(), 2);
    }

    #[test]
    fn reply_chain_stops_at_max_depth() {
        let mut bus = bus(instant());
        let (al, morthos, room) = ids();
        let presence = everyone_in("bar");
        let now = Utc::now();

        bus.send(&al, &morthos, "nice weather", &room, SendOptions::default(), now);
        assert_eq!(bus.pump(now, &presence).len(), 1);
        assert_eq!(bus.pending_replies(), 1);
        let last = bus.pump(now, &presence);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].depth, 2);
        assert_eq!(bus.pending_replies(), 0);
        assert!(bus.pump(now, &presence).is_empty());

        let thread = bus.thread(&ThreadKey::new(&room, &al, &morthos)).unwrap();
        let speakers: Vec<&str> = thread.exchanges.iter().map(|e| e.from.as_str()).collect();
        assert_eq!(speakers, vec!["al", "morthos", "al"]);
        assert_eq!(bus.locks_held(), 0);
    }

    #[test]
    fn generator_text_is_preferred() {
        let mut bus = bus(instant());
        bus.set_generator(Some(Arc::new(Canned("  Generated.  "))));
        let (al, morthos, room) = ids();
        let now = Utc::now();
        bus.send(&al, &morthos, "hello", &room, SendOptions::default(), now);
        let delivered = bus.pump(now, &everyone_in("bar"));
        assert_eq!(delivered[0].text, "Generated.");
    }

    #[test]
    fn slow_generator_falls_back_to_phrasebook() {
        let mut bus = bus(BusConfig {
            generator_timeout_ms: 20,
            ..instant()
        });
        bus.set_generator(Some(Arc::new(Slow)));
        let (al, morthos, room) = ids();
        let now = Utc::now();
        bus.send(&al, &morthos, "tell me the legend", &room, SendOptions::default(), now);
        let delivered = bus.pump(now, &everyone_in("bar"));
        assert_eq!(
            delivered[0].text,
            "That's an old story. Older than this place, some say."
        );
    }

    #[test]
    fn voice_is_applied_to_replies() {
        let mut bus = bus(instant());
        bus.voices_mut().register(VoiceProfile {
            agent: AgentId::new("morthos"),
            parent: None,
            formality: Some(0.9),
            terseness: None,
            interjections: vec![Interjection {
                text: "Hmph.".to_string(),
                frequency: 1.0,
                placement: Placement::Before,
            }],
            vocabulary: HashMap::new(),
        });
        let (al, morthos, room) = ids();
        let now = Utc::now();
        bus.send(&al, &morthos, "any quest for me?", &room, SendOptions::default(), now);
        let delivered = bus.pump(now, &everyone_in("bar"));
        assert_eq!(
            delivered[0].text,
            "Hmph. One thing at a time. Finish what you started first."
        );
    }

    #[test]
    fn exchanges_record_topic() {
        let mut bus = bus(BusConfig {
            max_reply_depth: 1,
            ..instant()
        });
        let (al, morthos, room) = ids();
        let player = AgentId::new("player");
        let now = Utc::now();
        bus.send(&player, &al, "   ", &room, SendOptions::default(), now);
        bus.send(
            &player,
            &al,
            "so anyway",
            &room,
            SendOptions::default().with_topic(Topic::Lore),
            now,
        );
        let thread = bus.thread(&ThreadKey::new(&room, &al, &player)).unwrap();
        assert_eq!(thread.exchanges[0].topic, None);
        assert_eq!(thread.exchanges[1].topic, Some(Topic::Lore));

        bus.clear();
        bus.send(&al, &morthos, "I'm stuck on this door", &room, SendOptions::default(), now);
        let delivered = bus.pump(now, &everyone_in("bar"));
        assert_eq!(delivered[0].topic, Some(Topic::Hint));
        let thread = bus.thread(&ThreadKey::new(&room, &al, &morthos)).unwrap();
        assert_eq!(thread.exchanges[0].topic, Some(Topic::Hint));
    }

    #[test]
    fn last_timestamp_follows_latest_exchange() {
        let mut bus = bus(BusConfig {
            max_exchanges_per_thread: 1,
            max_reply_depth: 0,
            ..Default::default()
        });
        let (al, morthos, room) = ids();
        let start = Utc::now();
        bus.send(&al, &morthos, "one", &room, SendOptions::default(), start);
        let later = start + Duration::seconds(30);
        bus.send(&morthos, &al, "two", &room, SendOptions::default(), later);

        let thread = bus.thread(&ThreadKey::new(&room, &al, &morthos)).unwrap();
        assert_eq!(thread.exchanges.len(), 1);
        assert_eq!(thread.last_timestamp, later);
    }

    #[test]
    fn priority_is_kept_until_replaced() {
        let mut bus = bus(BusConfig {
            max_reply_depth: 0,
            ..Default::default()
        });
        let (al, morthos, room) = ids();
        let vex = AgentId::new("vex");
        let now = Utc::now();

        bus.send(&al, &morthos, "urgent", &room, SendOptions::default().with_priority(3), now);
        bus.send(&al, &morthos, "still urgent", &room, SendOptions::default(), now);
        bus.send(&vex, &al, "later", &room, SendOptions::default(), now + Duration::seconds(5));

        let urgent = bus.thread(&ThreadKey::new(&room, &al, &morthos)).unwrap();
        assert_eq!(urgent.priority, 3);
        let ordered: Vec<String> = bus
            .threads_by_priority()
            .iter()
            .map(|t| t.key.to_string())
            .collect();
        assert_eq!(ordered, vec!["bar/al:morthos", "bar/al:vex"]);

        bus.send(&al, &morthos, "never mind", &room, SendOptions::default().with_priority(0), now);
        assert_eq!(bus.threads_by_priority()[0].key.to_string(), "bar/al:vex");
    }

    #[test]
    fn huge_reply_delay_is_clamped() {
        let mut bus = bus(BusConfig {
            reply_delay_ms: (u64::MAX, u64::MAX),
            ..Default::default()
        });
        let (al, morthos, room) = ids();
        let now = Utc::now();
        let receipt = bus.send(&al, &morthos, "hello", &room, SendOptions::default(), now);
        assert_eq!(
            receipt.reply,
            ReplyStatus::Scheduled {
                due: now + Duration::days(1)
            }
        );
    }

    #[test]
    fn clear_releases_locks() {
        let mut bus = bus(instant());
        let (al, morthos, room) = ids();
        bus.send(&al, &morthos, "hello", &room, SendOptions::default(), Utc::now());
        assert_eq!(bus.locks_held(), 1);
        bus.clear();
        assert_eq!(bus.locks_held(), 0);
        assert_eq!(bus.threads().count(), 0);
    }
}
