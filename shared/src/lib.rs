use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ARENA_WIDTH: f32 = 800.0;
pub const ARENA_HEIGHT: f32 = 600.0;
pub const TICK_HZ: u32 = 60;
pub const DEFAULT_PORT: u16 = 21001;

pub const COLORS: [&str; 8] = [
    "red", "blue", "green", "yellow", "purple", "orange", "cyan", "magenta",
];

/// Palette color for a player id, assigned round-robin.
pub fn color_for(id: u64) -> &'static str {
    COLORS[(id % COLORS.len() as u64) as usize]
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector for a heading in degrees (0° along +x, clockwise on screen).
    pub fn from_degrees(angle: f32) -> Self {
        let rad = angle.to_radians();
        Self::new(rad.cos(), rad.sin())
    }

    pub fn add(self, other: Vec2) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Vec2) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s)
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        self.sub(other).length()
    }

    /// Rotated 90° (left-hand normal of a heading vector).
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }
}

/// Control snapshot sent by a client whenever its keys change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ClientInput {
    pub w: bool,
    pub a: bool,
    pub s: bool,
    pub d: bool,
    pub space: bool,
}

/// Marker serialized as the bare string `"boss"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BossTag {
    #[serde(rename = "boss")]
    Boss,
}

/// Bullet owner on the wire: a player id or `"boss"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OwnerWire {
    Player(u64),
    Boss(BossTag),
}

/// `[x, y, angle, color, hp, max_hp, score]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerWire(pub f32, pub f32, pub f32, pub String, pub i32, pub i32, pub u32);

/// `[x, y, angle, owner]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulletWire(pub f32, pub f32, pub f32, pub OwnerWire);

/// `[x, y, angle, "npc" | "boss", hp, max_hp]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostileWire(pub f32, pub f32, pub f32, pub String, pub i32, pub i32);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Explode,
    ExplodeBig,
    Hit,
    BossAttack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub x: f32,
    pub y: f32,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    Init {
        id: u64,
        color: String,
    },
    State {
        players: BTreeMap<String, PlayerWire>,
        bullets: Vec<BulletWire>,
        npcs: Vec<HostileWire>,
        boss: Option<HostileWire>,
        events: Vec<GameEvent>,
    },
}

/// Wraps a coordinate into `[0, size)`.
pub fn wrap_coord(v: f32, size: f32) -> f32 {
    let r = v.rem_euclid(size);
    // rem_euclid can round up to `size` for tiny negative inputs
    if r >= size {
        0.0
    } else {
        r
    }
}

pub fn wrap_position(p: Vec2) -> Vec2 {
    Vec2::new(wrap_coord(p.x, ARENA_WIDTH), wrap_coord(p.y, ARENA_HEIGHT))
}

/// Heading normalized into `[0, 360)`.
pub fn wrap_angle(angle: f32) -> f32 {
    wrap_coord(angle, 360.0)
}
