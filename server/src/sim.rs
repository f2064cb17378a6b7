//! The fixed-rate tick: spawn, move, collide, broadcast.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use rand::Rng;
use shared::{EventKind, ServerMsg, Vec2};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::geometry::{clamp_inside, collides, EntityKind};
use crate::hostile::Hostile;
use crate::player::PlayerId;
use crate::projectile::{Bullet, Owner, BULLET_DAMAGE, BULLET_SPEED};
use crate::world::{Outbound, SharedWorld, World};

pub const BOSS_SPAWN_Y: f32 = 50.0;
pub const CRASH_DAMAGE: i32 = 20;
pub const BOSS_KNOCKBACK: f32 = 40.0;
pub const NPC_KILL_SCORE: u32 = 1;
pub const BOSS_KILL_SCORE: u32 = 5;
const RESPAWN_MARGIN: f32 = 50.0;

/// Advances the world by one tick. Broadcasting is separate, see [`broadcast`].
pub fn tick(w: &mut World) {
    w.tick += 1;
    w.events.clear();
    spawn_check(w);
    apply_inputs(w);

    let targets = w.player_positions();
    let (width, height) = (w.width, w.height);
    for npc in &mut w.npcs {
        npc.advance(&targets, width, height);
    }
    advance_boss(w, &targets);

    for bullet in &mut w.bullets {
        bullet.advance();
    }
    w.bullets.retain(|b| !b.is_out_of_bounds(width, height));

    resolve_bullet_hits(w);
    resolve_body_hits(w);
}

fn spawn_check(w: &mut World) {
    if w.players.is_empty() {
        return;
    }

    if w.boss.is_none() && w.total_score() >= w.boss_threshold() {
        let id = w.next_entity_id();
        let boss = Hostile::spawn_boss(id, w.boss_level, Vec2::new(w.width / 2.0, BOSS_SPAWN_Y));
        info!(level = w.boss_level, hp = boss.hp, "boss spawned");
        w.boss = Some(boss);
    }
    if w.boss.is_some() {
        return;
    }

    w.npc_timer += 1;
    if w.npc_timer >= w.npc_spawn_interval {
        w.npc_timer = 0;
        if w.npcs.len() < w.max_npcs {
            let id = w.next_entity_id();
            let npc = Hostile::spawn_npc(id, w.width, w.height, &mut w.rng);
            debug!(npc_id = id, x = npc.pos.x, y = npc.pos.y, "npc spawned");
            w.npcs.push(npc);
        }
    }
}

fn apply_inputs(w: &mut World) {
    let pattern = w.active_pattern().cloned();
    for id in std::mem::take(&mut w.fire_intents) {
        let Some(p) = w.players.get(&id) else {
            continue;
        };
        let owner = Owner::Player(id);
        let bullet = match &pattern {
            Some(pattern) => Bullet::patterned(
                p.pos,
                p.angle,
                BULLET_SPEED,
                BULLET_DAMAGE,
                owner,
                Arc::clone(pattern),
            ),
            None => Bullet::new(p.pos, p.angle, BULLET_SPEED, BULLET_DAMAGE, owner),
        };
        w.bullets.push(bullet);
    }

    for (id, player) in w.players.iter_mut() {
        let input = w.inputs.get(id).copied().unwrap_or_default();
        player.advance(&input);
    }
}

fn advance_boss(w: &mut World, targets: &[Vec2]) {
    let (width, height) = (w.width, w.height);
    let Some(boss) = w.boss.as_mut() else {
        return;
    };
    boss.advance(targets, width, height);
    if let Some(volley) = boss.tick_attack() {
        let at = boss.pos;
        w.bullets.extend(volley);
        w.emit(EventKind::BossAttack, at, "boss");
    }
}

fn resolve_bullet_hits(w: &mut World) {
    let bullets = std::mem::take(&mut w.bullets);
    let mut survivors = Vec::with_capacity(bullets.len());
    for bullet in bullets {
        if !strike(w, &bullet) {
            survivors.push(bullet);
        }
    }
    w.bullets = survivors;
}

/// Applies the bullet to the first thing it touches: players, then NPCs,
/// then the boss. Returns whether the bullet was used up.
fn strike(w: &mut World, bullet: &Bullet) -> bool {
    let owner = bullet.owner();

    let victim = w
        .players
        .values()
        .find(|p| {
            Owner::Player(p.id) != owner
                && collides(bullet.pos, EntityKind::Bullet, p.pos, EntityKind::Player)
        })
        .map(|p| p.id);
    if let Some(id) = victim {
        damage_player(w, id, bullet.damage, bullet.pos);
        return true;
    }

    let npc_hit = w
        .npcs
        .iter()
        .position(|n| collides(bullet.pos, EntityKind::Bullet, n.pos, n.entity()));
    if let Some(idx) = npc_hit {
        if w.npcs[idx].take_damage(bullet.damage) {
            let dead = w.npcs.remove(idx);
            w.emit(EventKind::Explode, dead.pos, "npc");
            credit(w, owner, NPC_KILL_SCORE);
        } else {
            w.emit(EventKind::Hit, bullet.pos, "npc");
        }
        return true;
    }

    if owner == Owner::Boss {
        return false;
    }
    let Some(boss) = w.boss.as_mut() else {
        return false;
    };
    if !collides(bullet.pos, EntityKind::Bullet, boss.pos, boss.entity()) {
        return false;
    }
    if boss.take_damage(bullet.damage) {
        defeat_boss(w, owner);
    } else {
        w.emit(EventKind::Hit, bullet.pos, "boss");
    }
    true
}

fn credit(w: &mut World, owner: Owner, points: u32) {
    if let Some(p) = owner.player().and_then(|id| w.players.get_mut(&id)) {
        p.score += points;
    }
}

fn defeat_boss(w: &mut World, owner: Owner) {
    let Some(boss) = w.boss.take() else {
        return;
    };
    let level = boss.boss_level().unwrap_or(w.boss_level);
    w.emit(EventKind::ExplodeBig, boss.pos, "boss");
    credit(w, owner, BOSS_KILL_SCORE);

    let checkpoint = 10 * level;
    w.checkpoint = checkpoint;
    for p in w.players.values_mut() {
        p.checkpoint = checkpoint;
    }
    w.boss_level = level + 1;
    info!(level, checkpoint, killer = ?owner.player(), "boss defeated");
}

/// Damages a player; a lethal hit respawns them within the same tick.
fn damage_player(w: &mut World, id: PlayerId, amount: i32, hit_at: Vec2) {
    let (width, height) = (w.width, w.height);
    let Some(player) = w.players.get_mut(&id) else {
        return;
    };
    let color = player.color;
    if player.take_damage(amount) {
        let died_at = player.pos;
        let spawn = Vec2::new(
            w.rng.gen_range(RESPAWN_MARGIN..width - RESPAWN_MARGIN),
            w.rng.gen_range(RESPAWN_MARGIN..height - RESPAWN_MARGIN),
        );
        player.respawn(spawn);
        debug!(player_id = id, score = player.score, "player died and respawned");
        w.emit(EventKind::Explode, died_at, color);
    } else {
        w.emit(EventKind::Hit, hit_at, color);
    }
}

fn player_pos(w: &World, id: PlayerId) -> Option<Vec2> {
    w.players.get(&id).map(|p| p.pos)
}

fn resolve_body_hits(w: &mut World) {
    let ids: Vec<PlayerId> = w.players.keys().copied().collect();
    for id in ids {
        let mut i = 0;
        while i < w.npcs.len() {
            let Some(pos) = player_pos(w, id) else {
                break;
            };
            let npc = &w.npcs[i];
            if collides(pos, EntityKind::Player, npc.pos, npc.entity()) {
                let npc = w.npcs.remove(i);
                w.emit(EventKind::Explode, npc.pos, "npc");
                damage_player(w, id, CRASH_DAMAGE, pos);
            } else {
                i += 1;
            }
        }

        let (Some(pos), Some(boss)) = (player_pos(w, id), w.boss.as_ref()) else {
            continue;
        };
        if !collides(pos, EntityKind::Player, boss.pos, boss.entity()) {
            continue;
        }
        let away = pos.sub(boss.pos);
        let len = away.length();
        // knock straight down when exactly on top of the boss
        let dir = if len > f32::EPSILON {
            away.scale(1.0 / len)
        } else {
            Vec2::new(0.0, 1.0)
        };
        let pushed = clamp_inside(
            pos.add(dir.scale(BOSS_KNOCKBACK)),
            EntityKind::Player.radius(),
            w.width,
            w.height,
        );
        if let Some(p) = w.players.get_mut(&id) {
            p.pos = pushed;
        }
        damage_player(w, id, CRASH_DAMAGE, pos);
    }
}

/// The wire snapshot for the current tick.
pub fn snapshot(w: &World) -> ServerMsg {
    ServerMsg::State {
        players: w
            .players
            .iter()
            .map(|(id, p)| (id.to_string(), p.to_wire()))
            .collect(),
        bullets: w.bullets.iter().map(Bullet::to_wire).collect(),
        npcs: w.npcs.iter().map(Hostile::to_wire).collect(),
        boss: w.boss.as_ref().map(Hostile::to_wire),
        events: w.events.clone(),
    }
}

/// Serializes the snapshot once and pushes it to every connection. Connections
/// whose writer has gone away, or whose queue is full because the peer stopped
/// reading, are dropped from the fan-out; their players stay until the reader
/// notices.
pub fn broadcast(w: &mut World) -> serde_json::Result<()> {
    let line: Outbound = serde_json::to_string(&snapshot(w))?.into();
    w.clients.retain(|id, tx| match tx.try_send(Arc::clone(&line)) {
        Ok(()) => true,
        Err(TrySendError::Closed(_)) => {
            debug!(player_id = *id, "connection closed, removed from broadcast");
            false
        }
        Err(TrySendError::Full(_)) => {
            debug!(player_id = *id, "connection not keeping up, removed from broadcast");
            false
        }
    });
    Ok(())
}

/// Runs ticks at `tick_hz` until `shutdown` flips. Late ticks run as soon as
/// possible without catching up on the ones missed.
pub async fn run(
    world: SharedWorld,
    tick_hz: u32,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let budget = Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1)));
    let mut ticker = time::interval(budget);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let started = Instant::now();
        {
            let mut w = world.lock().await;
            tick(&mut w);
            broadcast(&mut w).context("serialize state snapshot")?;
        }
        let elapsed = started.elapsed();
        if elapsed > budget {
            warn!(?elapsed, ?budget, "tick overran its budget");
        }
    }
    info!("simulation loop stopped");
    Ok(())
}
