use shared::Vec2;

/// Every collidable kind and its fixed hitbox radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player,
    Bullet,
    Npc,
    Boss,
}

impl EntityKind {
    pub const fn radius(self) -> f32 {
        match self {
            EntityKind::Player => 15.0,
            EntityKind::Bullet => 3.0,
            EntityKind::Npc => 10.0,
            EntityKind::Boss => 25.0,
        }
    }
}

/// Circle-circle overlap test; touching circles do not collide.
pub fn collides(a: Vec2, a_kind: EntityKind, b: Vec2, b_kind: EntityKind) -> bool {
    a.distance(b) < a_kind.radius() + b_kind.radius()
}

/// Bearing from `from` to `to` in degrees, in `(-180, 180]`.
pub fn bearing(from: Vec2, to: Vec2) -> f32 {
    let d = to.sub(from);
    d.y.atan2(d.x).to_degrees()
}

/// Signed shortest rotation from `current` to `target`, normalized to `(-180, 180]`.
pub fn angle_delta(current: f32, target: f32) -> f32 {
    let d = (target - current).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Keeps a position inside the arena, `margin` away from every edge.
pub fn clamp_inside(p: Vec2, margin: f32, width: f32, height: f32) -> Vec2 {
    Vec2::new(
        p.x.clamp(margin, width - margin),
        p.y.clamp(margin, height - margin),
    )
}
