use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{ClientInput, EventKind, GameEvent, Vec2, ARENA_HEIGHT, ARENA_WIDTH};
use tokio::sync::{mpsc, Mutex};

use crate::config::ServerConfig;
use crate::hostile::Hostile;
use crate::pattern::{Pattern, PatternFile};
use crate::player::{Player, PlayerId};
use crate::projectile::Bullet;

/// Pre-serialized outbound line, newline not included.
pub type Outbound = Arc<str>;
pub type ClientTx = mpsc::Sender<Outbound>;

/// Lines a connection may lag behind before it is dropped from the fan-out.
pub const OUTBOUND_QUEUE: usize = 64;
pub type SharedWorld = Arc<Mutex<World>>;

/// Everything the simulation owns. Lives behind one lock for the whole process.
pub struct World {
    pub width: f32,
    pub height: f32,
    /// Keyed by id so every pass over players runs in the same order.
    pub players: BTreeMap<PlayerId, Player>,
    /// Latest control record per player, replaced whole.
    pub inputs: HashMap<PlayerId, ClientInput>,
    /// Fire presses not yet turned into bullets.
    pub fire_intents: Vec<PlayerId>,
    pub bullets: Vec<Bullet>,
    pub npcs: Vec<Hostile>,
    pub boss: Option<Hostile>,
    /// Cleared at the start of every tick.
    pub events: Vec<GameEvent>,
    pub clients: HashMap<PlayerId, ClientTx>,
    pub boss_level: u32,
    /// Score every player falls back to on death.
    pub checkpoint: u32,
    pub tick: u64,
    pub npc_spawn_interval: u32,
    pub max_npcs: usize,
    pub(crate) npc_timer: u32,
    pub(crate) rng: StdRng,
    next_player_id: PlayerId,
    next_entity_id: u64,
    pattern: Option<Arc<Pattern>>,
}

impl World {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &ServerConfig, rng: StdRng) -> Self {
        Self {
            width: ARENA_WIDTH,
            height: ARENA_HEIGHT,
            players: BTreeMap::new(),
            inputs: HashMap::new(),
            fire_intents: Vec::new(),
            bullets: Vec::new(),
            npcs: Vec::new(),
            boss: None,
            events: Vec::new(),
            clients: HashMap::new(),
            boss_level: 1,
            checkpoint: 0,
            tick: 0,
            npc_spawn_interval: config.npc_spawn_interval,
            max_npcs: config.max_npcs,
            npc_timer: 0,
            rng,
            next_player_id: 0,
            next_entity_id: 0,
            pattern: None,
        }
    }

    pub fn into_shared(self) -> SharedWorld {
        Arc::new(Mutex::new(self))
    }

    /// Adds a player under a fresh id. Ids are never handed out twice.
    pub fn join(&mut self) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        self.players
            .insert(id, Player::new(id, Player::spawn_point(id), self.checkpoint));
        self.inputs.insert(id, ClientInput::default());
        id
    }

    pub fn register_client(&mut self, id: PlayerId, tx: ClientTx) {
        self.clients.insert(id, tx);
    }

    /// Drops everything held for `id`.
    pub fn leave(&mut self, id: PlayerId) {
        self.players.remove(&id);
        self.inputs.remove(&id);
        self.clients.remove(&id);
        self.fire_intents.retain(|p| *p != id);
    }

    pub fn set_input(&mut self, id: PlayerId, input: ClientInput) {
        if let Some(slot) = self.inputs.get_mut(&id) {
            *slot = input;
        }
    }

    pub fn queue_fire(&mut self, id: PlayerId) {
        if self.players.contains_key(&id) {
            self.fire_intents.push(id);
        }
    }

    pub fn active_pattern(&self) -> Option<&Arc<Pattern>> {
        self.pattern.as_ref()
    }

    /// Installs the file's expression when it differs from the cached one.
    /// Bullets already in flight keep the pattern they were fired with.
    pub fn offer_pattern(&mut self, file: PatternFile) -> bool {
        if self
            .pattern
            .as_ref()
            .is_some_and(|p| p.source == file.expression)
        {
            return false;
        }
        let pattern = Pattern::new(file.name, file.expression);
        match pattern.parse_error() {
            Some(err) => tracing::warn!(
                pattern = %pattern.name,
                expression = %pattern.source,
                %err,
                "pattern does not parse, bullets will fly straight"
            ),
            None => tracing::info!(
                pattern = %pattern.name,
                expression = %pattern.source,
                "bullet pattern updated"
            ),
        }
        self.pattern = Some(Arc::new(pattern));
        true
    }

    pub fn next_entity_id(&mut self) -> u64 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn total_score(&self) -> u64 {
        self.players.values().map(|p| u64::from(p.score)).sum()
    }

    pub fn boss_threshold(&self) -> u64 {
        10 * u64::from(self.boss_level)
    }

    pub fn player_positions(&self) -> Vec<Vec2> {
        self.players.values().map(|p| p.pos).collect()
    }

    pub fn emit(&mut self, kind: EventKind, at: Vec2, color: &str) {
        self.events.push(GameEvent {
            kind,
            x: at.x,
            y: at.y,
            color: color.to_string(),
        });
    }
}
