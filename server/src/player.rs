use shared::{color_for, wrap_angle, wrap_position, ClientInput, PlayerWire, Vec2, ARENA_HEIGHT, ARENA_WIDTH};

pub const MAX_HP: i32 = 100;
pub const MAX_SPEED: f32 = 8.0;
const TURN_STEP: f32 = 5.0;
const THROTTLE_STEP: f32 = 0.3;
const FRICTION: f32 = 0.05;

pub type PlayerId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub pos: Vec2,
    pub angle: f32,
    pub speed: f32,
    pub color: &'static str,
    pub hp: i32,
    pub score: u32,
    pub checkpoint: u32,
}

impl Player {
    pub fn new(id: PlayerId, pos: Vec2, checkpoint: u32) -> Self {
        Self {
            id,
            pos,
            angle: 0.0,
            speed: 0.0,
            color: color_for(id),
            hp: MAX_HP,
            score: 0,
            checkpoint,
        }
    }

    /// Spawn point spread out by id so new ships don't stack.
    pub fn spawn_point(id: PlayerId) -> Vec2 {
        let x = 100 + (id * 150) % (ARENA_WIDTH as u64 - 200);
        let y = 100 + (id * 100) % (ARENA_HEIGHT as u64 - 200);
        Vec2::new(x as f32, y as f32)
    }

    /// One tick of steering, throttle, friction and toroidal movement.
    pub fn advance(&mut self, input: &ClientInput) {
        if input.a {
            self.angle -= TURN_STEP;
        }
        if input.d {
            self.angle += TURN_STEP;
        }
        self.angle = wrap_angle(self.angle);

        if input.w {
            self.speed += THROTTLE_STEP;
        }
        if input.s {
            self.speed -= THROTTLE_STEP;
        }
        if !input.w {
            self.speed -= FRICTION;
        }
        self.speed = self.speed.clamp(0.0, MAX_SPEED);

        let step = Vec2::from_degrees(self.angle).scale(self.speed);
        self.pos = wrap_position(self.pos.add(step));
    }

    /// Applies damage and reports whether the ship is now dead.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        self.hp -= amount;
        self.hp <= 0
    }

    /// Back to full health at `pos`, score rolled back to the checkpoint.
    pub fn respawn(&mut self, pos: Vec2) {
        self.pos = pos;
        self.speed = 0.0;
        self.hp = MAX_HP;
        self.score = self.checkpoint;
    }

    pub fn to_wire(&self) -> PlayerWire {
        PlayerWire(
            self.pos.x,
            self.pos.y,
            self.angle,
            self.color.to_string(),
            self.hp,
            MAX_HP,
            self.score,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(w: bool, a: bool, s: bool, d: bool) -> ClientInput {
        ClientInput {
            w,
            a,
            s,
            d,
            space: false,
        }
    }

    #[test]
    fn spawn_points_follow_id() {
        assert_eq!(Player::spawn_point(0), Vec2::new(100.0, 100.0));
        assert_eq!(Player::spawn_point(1), Vec2::new(250.0, 200.0));
        assert_eq!(Player::spawn_point(2), Vec2::new(400.0, 300.0));
        assert_eq!(Player::spawn_point(4), Vec2::new(100.0, 100.0));
    }

    #[test]
    fn speed_and_angle_stay_in_range() {
        let mut p = Player::new(0, Vec2::new(400.0, 300.0), 0);
        let inputs = [
            input(true, false, false, false),
            input(false, true, false, false),
            input(false, false, true, true),
            input(true, true, true, true),
            input(false, false, false, false),
        ];
        for i in 0..500 {
            p.advance(&inputs[i % inputs.len()]);
            assert!((0.0..=MAX_SPEED).contains(&p.speed));
            assert!((0.0..360.0).contains(&p.angle));
            assert!((0.0..ARENA_WIDTH).contains(&p.pos.x));
            assert!((0.0..ARENA_HEIGHT).contains(&p.pos.y));
        }
    }

    #[test]
    fn throttle_is_capped() {
        let mut p = Player::new(0, Vec2::new(400.0, 300.0), 0);
        for _ in 0..100 {
            p.advance(&input(true, false, false, false));
        }
        assert_eq!(p.speed, MAX_SPEED);
    }

    #[test]
    fn friction_decays_to_zero() {
        let mut p = Player::new(0, Vec2::new(400.0, 300.0), 0);
        p.speed = 1.0;
        for _ in 0..30 {
            p.advance(&ClientInput::default());
        }
        assert_eq!(p.speed, 0.0);
    }

    #[test]
    fn turning_left_from_zero_wraps() {
        let mut p = Player::new(0, Vec2::new(400.0, 300.0), 0);
        p.advance(&input(false, true, false, false));
        assert_eq!(p.angle, 355.0);
    }

    #[test]
    fn crossing_the_right_edge_wraps_to_left() {
        let mut p = Player::new(0, Vec2::new(ARENA_WIDTH - 1.0, 300.0), 0);
        p.speed = 5.0;
        p.advance(&input(true, false, false, false));
        assert!(p.pos.x > 0.0 && p.pos.x < 10.0, "x = {}", p.pos.x);
    }

    #[test]
    fn respawn_restores_hp_and_checkpoint() {
        let mut p = Player::new(0, Vec2::new(400.0, 300.0), 20);
        p.score = 37;
        assert!(p.take_damage(MAX_HP + 5));
        p.respawn(Vec2::new(50.0, 60.0));
        assert_eq!(p.hp, MAX_HP);
        assert_eq!(p.score, 20);
        assert_eq!(p.speed, 0.0);
        assert_eq!(p.pos, Vec2::new(50.0, 60.0));
    }
}
