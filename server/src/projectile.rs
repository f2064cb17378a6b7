use std::sync::Arc;

use shared::{BossTag, BulletWire, OwnerWire, Vec2};

use crate::pattern::Pattern;
use crate::player::PlayerId;

pub const BULLET_SPEED: f32 = 12.0;
pub const BULLET_DAMAGE: i32 = 10;

/// Who fired a bullet. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Player(PlayerId),
    Boss,
}

impl Owner {
    pub fn player(self) -> Option<PlayerId> {
        match self {
            Owner::Player(id) => Some(id),
            Owner::Boss => None,
        }
    }

    fn to_wire(self) -> OwnerWire {
        match self {
            Owner::Player(id) => OwnerWire::Player(id),
            Owner::Boss => OwnerWire::Boss(BossTag::Boss),
        }
    }
}

/// Pattern state carried by a pattern bullet.
#[derive(Debug, Clone)]
struct Track {
    pattern: Arc<Pattern>,
    /// Where the bullet would be without the offset.
    base: Vec2,
    tick: u32,
}

#[derive(Debug, Clone)]
pub struct Bullet {
    pub pos: Vec2,
    pub angle: f32,
    pub speed: f32,
    pub damage: i32,
    owner: Owner,
    track: Option<Track>,
}

impl Bullet {
    pub fn new(pos: Vec2, angle: f32, speed: f32, damage: i32, owner: Owner) -> Self {
        Self {
            pos,
            angle,
            speed,
            damage,
            owner,
            track: None,
        }
    }

    /// A bullet that swerves sideways along `pattern`.
    pub fn patterned(
        pos: Vec2,
        angle: f32,
        speed: f32,
        damage: i32,
        owner: Owner,
        pattern: Arc<Pattern>,
    ) -> Self {
        Self {
            track: Some(Track {
                pattern,
                base: pos,
                tick: 0,
            }),
            ..Self::new(pos, angle, speed, damage, owner)
        }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.track.as_ref().map(|t| t.pattern.as_ref())
    }

    pub fn advance(&mut self) {
        let dir = Vec2::from_degrees(self.angle);
        match &mut self.track {
            None => self.pos = self.pos.add(dir.scale(self.speed)),
            Some(track) => {
                track.base = track.base.add(dir.scale(self.speed));
                let offset = track.pattern.offset(track.tick);
                track.tick += 1;
                self.pos = track.base.add(dir.perp().scale(offset));
            }
        }
    }

    /// Outside `[0, width] x [0, height]`; the boundary itself is still inside.
    pub fn is_out_of_bounds(&self, width: f32, height: f32) -> bool {
        self.pos.x < 0.0 || self.pos.x > width || self.pos.y < 0.0 || self.pos.y > height
    }

    pub fn to_wire(&self) -> BulletWire {
        BulletWire(self.pos.x, self.pos.y, self.angle, self.owner.to_wire())
    }
}
