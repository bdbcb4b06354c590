use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grid::{Cell, GridDims};
use crate::persistence::PlayerEnvelope;
use crate::world::World;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    /// Axis-aligned facing for a step. Horizontal wins when both axes move.
    pub fn from_delta(dx: i32, dy: i32) -> Option<Self> {
        match (dx.signum(), dy.signum()) {
            (-1, _) => Some(Direction::Left),
            (1, _) => Some(Direction::Right),
            (0, -1) => Some(Direction::Up),
            (0, 1) => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MoveBlock {
    OutOfBounds,
    NotWalkable,
    NoDirection,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MoveOutcome {
    Moved(Cell),
    Blocked(MoveBlock),
    /// A step was already taken for this press and the repeat delay is still running.
    Throttled,
}

impl MoveOutcome {
    #[allow(dead_code)]
    pub fn moved(self) -> bool {
        matches!(self, MoveOutcome::Moved(_))
    }
}

/// Grid-stepped player. Facing turns toward every attempted step, including
/// ones that are refused, so the player can face a wall to use it.
#[derive(Clone, Debug)]
pub struct PlayerController {
    position: Cell,
    direction: Direction,
    repeat_ms: f64,
    next_step_at: Option<f64>,
}

impl PlayerController {
    pub fn new(position: Cell, repeat_ms: f64) -> Self {
        Self {
            position,
            direction: Direction::default(),
            repeat_ms: repeat_ms.max(0.0),
            next_step_at: None,
        }
    }

    pub fn position(&self) -> Cell {
        self.position
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Unchecked override used by the editor and by map loading.
    pub fn set_position(&mut self, x: i32, y: i32) {
        self.position = Cell::new(x, y);
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// One unthrottled step. Refused if the target is off-grid or its topmost tile
    /// is not walkable; the position is left untouched in that case.
    pub fn step(&mut self, dx: i32, dy: i32, world: &World) -> MoveOutcome {
        let Some(direction) = Direction::from_delta(dx, dy) else {
            return MoveOutcome::Blocked(MoveBlock::NoDirection);
        };
        self.direction = direction;
        let target = self.position.offset(dx, dy);
        if !world.dims().in_bounds(target.x, target.y) {
            return MoveOutcome::Blocked(MoveBlock::OutOfBounds);
        }
        if !world.is_walkable(target.x, target.y) {
            return MoveOutcome::Blocked(MoveBlock::NotWalkable);
        }
        self.position = target;
        MoveOutcome::Moved(target)
    }

    /// Step driven by a held key. The first request after `release` goes through
    /// at once, later ones wait out the repeat delay.
    pub fn request_step(&mut self, dx: i32, dy: i32, world: &World, now_ms: f64) -> MoveOutcome {
        if let Some(next) = self.next_step_at {
            if now_ms < next {
                return MoveOutcome::Throttled;
            }
        }
        self.next_step_at = Some(now_ms + self.repeat_ms);
        self.step(dx, dy, world)
    }

    /// Called when no movement key is held.
    pub fn release(&mut self) {
        self.next_step_at = None;
    }

    pub fn facing_cell(&self, dims: &GridDims) -> Option<Cell> {
        let (dx, dy) = self.direction.delta();
        let cell = self.position.offset(dx, dy);
        dims.in_bounds(cell.x, cell.y).then_some(cell)
    }

    pub fn envelope(&self) -> PlayerEnvelope {
        PlayerEnvelope {
            x: self.position.x,
            y: self.position.y,
            direction: self.direction,
        }
    }

    pub fn apply_envelope(&mut self, envelope: &PlayerEnvelope) {
        self.set_position(envelope.x, envelope.y);
        self.set_direction(envelope.direction);
        self.release();
    }
}
