//! NPCs and the boss.
//!
//! Both are the same record; the boss carries extra state in its kind tag and
//! looks up slower, larger constants from [`KindParams`].

use rand::Rng;
use shared::{HostileWire, Vec2};

use crate::geometry::{angle_delta, bearing, clamp_inside, EntityKind};
use crate::projectile::{Bullet, Owner};

pub const NPC_HP: i32 = 30;
pub const NPC_SPEED_MIN: f32 = 1.5;
pub const NPC_SPEED_MAX: f32 = 3.0;
pub const BOSS_BASE_HP: i32 = 200;
pub const BOSS_ATTACK_INTERVAL: u32 = 90;
pub const BOSS_VOLLEY: usize = 8;
pub const BOSS_BULLET_SPEED: f32 = 6.0;
pub const BOSS_BULLET_DAMAGE: i32 = 10;

/// Per-kind movement constants.
#[derive(Debug, Clone, Copy)]
pub struct KindParams {
    pub max_speed: f32,
    /// Degrees per tick.
    pub turn_rate: f32,
    pub entity: EntityKind,
    pub label: &'static str,
}

pub const NPC_PARAMS: KindParams = KindParams {
    max_speed: NPC_SPEED_MAX,
    turn_rate: 3.0,
    entity: EntityKind::Npc,
    label: "npc",
};

pub const BOSS_PARAMS: KindParams = KindParams {
    max_speed: 1.0,
    turn_rate: 1.5,
    entity: EntityKind::Boss,
    label: "boss",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BossState {
    pub level: u32,
    pub cooldown: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostileKind {
    Basic,
    Boss(BossState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hostile {
    pub id: u64,
    pub pos: Vec2,
    pub angle: f32,
    pub speed: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub kind: HostileKind,
}

/// `BOSS_BASE_HP * 2^(level - 1)`, saturating for absurd levels.
pub fn boss_max_hp(level: u32) -> i32 {
    let shift = level.saturating_sub(1).min(30);
    BOSS_BASE_HP.saturating_mul(1 << shift)
}

impl Hostile {
    /// A basic NPC entering from a random edge, heading roughly inward.
    pub fn spawn_npc<R: Rng>(id: u64, width: f32, height: f32, rng: &mut R) -> Self {
        let margin = EntityKind::Npc.radius();
        let (pos, inward) = match rng.gen_range(0..4) {
            0 => (Vec2::new(rng.gen_range(margin..width - margin), margin), 90.0),
            1 => (Vec2::new(width - margin, rng.gen_range(margin..height - margin)), 180.0),
            2 => (Vec2::new(rng.gen_range(margin..width - margin), height - margin), 270.0),
            _ => (Vec2::new(margin, rng.gen_range(margin..height - margin)), 0.0),
        };
        let angle = shared::wrap_angle(inward + rng.gen_range(-45.0..45.0));
        Self {
            id,
            pos,
            angle,
            speed: rng.gen_range(NPC_SPEED_MIN..NPC_SPEED_MAX),
            hp: NPC_HP,
            max_hp: NPC_HP,
            kind: HostileKind::Basic,
        }
    }

    pub fn spawn_boss(id: u64, level: u32, pos: Vec2) -> Self {
        let hp = boss_max_hp(level);
        Self {
            id,
            pos,
            angle: 90.0,
            speed: BOSS_PARAMS.max_speed,
            hp,
            max_hp: hp,
            kind: HostileKind::Boss(BossState { level, cooldown: 0 }),
        }
    }

    pub fn params(&self) -> &'static KindParams {
        match self.kind {
            HostileKind::Basic => &NPC_PARAMS,
            HostileKind::Boss(_) => &BOSS_PARAMS,
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.params().entity
    }

    pub fn boss_level(&self) -> Option<u32> {
        match self.kind {
            HostileKind::Boss(state) => Some(state.level),
            HostileKind::Basic => None,
        }
    }

    /// Seek toward the nearest target, then stay inside the arena.
    pub fn advance(&mut self, targets: &[Vec2], width: f32, height: f32) {
        let params = self.params();
        seek(&mut self.pos, &mut self.angle, self.speed.min(params.max_speed), params.turn_rate, targets);
        self.pos = clamp_inside(self.pos, params.entity.radius(), width, height);
    }

    /// Ticks the boss cooldown; returns the volley when it is due.
    pub fn tick_attack(&mut self) -> Option<Vec<Bullet>> {
        let HostileKind::Boss(state) = &mut self.kind else {
            return None;
        };
        state.cooldown += 1;
        if state.cooldown < BOSS_ATTACK_INTERVAL {
            return None;
        }
        state.cooldown = 0;
        let step = 360.0 / BOSS_VOLLEY as f32;
        let volley = (0..BOSS_VOLLEY)
            .map(|i| {
                Bullet::new(
                    self.pos,
                    i as f32 * step,
                    BOSS_BULLET_SPEED,
                    BOSS_BULLET_DAMAGE,
                    Owner::Boss,
                )
            })
            .collect();
        Some(volley)
    }

    pub fn take_damage(&mut self, amount: i32) -> bool {
        self.hp -= amount;
        self.hp <= 0
    }

    pub fn to_wire(&self) -> HostileWire {
        HostileWire(
            self.pos.x,
            self.pos.y,
            self.angle,
            self.params().label.to_string(),
            self.hp,
            self.max_hp,
        )
    }
}

/// Turn toward the nearest target by at most `turn_rate` degrees, then move
/// forward. Without targets the heading is held.
pub fn seek(pos: &mut Vec2, angle: &mut f32, speed: f32, turn_rate: f32, targets: &[Vec2]) {
    let here = *pos;
    let nearest = targets
        .iter()
        .copied()
        .min_by(|a, b| here.distance(*a).total_cmp(&here.distance(*b)));
    if let Some(target) = nearest {
        let delta = angle_delta(*angle, bearing(here, target));
        *angle = shared::wrap_angle(*angle + delta.clamp(-turn_rate, turn_rate));
    }
    *pos = here.add(Vec2::from_degrees(*angle).scale(speed));
}
