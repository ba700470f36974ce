//! Eight-way facing directions.

use serde::{Deserialize, Serialize};

/// Facing, clockwise from south. `y` grows southward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Dir {
    S = 0,
    SW = 1,
    W = 2,
    NW = 3,
    N = 4,
    NE = 5,
    E = 6,
    SE = 7,
}

impl Dir {
    pub const ALL: [Dir; 8] = [Dir::S, Dir::SW, Dir::W, Dir::NW, Dir::N, Dir::NE, Dir::E, Dir::SE];

    pub fn from_index(index: u8) -> Dir {
        Self::ALL[(index % 8) as usize]
    }

    /// One-tile step in this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Dir::S => (0, 1),
            Dir::SW => (-1, 1),
            Dir::W => (-1, 0),
            Dir::NW => (-1, -1),
            Dir::N => (0, -1),
            Dir::NE => (1, -1),
            Dir::E => (1, 0),
            Dir::SE => (1, 1),
        }
    }
}

/// Direction to face from `(x0, y0)` toward `(x1, y1)`. Facing yourself is
/// south.
pub fn calc_dir(x0: i32, y0: i32, x1: i32, y1: i32) -> Dir {
    let dx = x1 - x0;
    let dy = y1 - y0;
    if dx == 0 && dy == 0 {
        Dir::S
    } else if dx >= 0 && dy >= 0 {
        if dx > dy * 3 {
            Dir::E
        } else if dx * 3 - 1 < dy {
            Dir::S
        } else {
            Dir::SE
        }
    } else if dx >= 0 && dy <= 0 {
        if dx > -dy * 3 {
            Dir::E
        } else if dx * 3 - 1 < -dy {
            Dir::N
        } else {
            Dir::NE
        }
    } else if dx <= 0 && dy <= 0 {
        if dx < dy * 3 {
            Dir::W
        } else if dx * 3 + 1 > dy {
            Dir::N
        } else {
            Dir::NW
        }
    } else if -dx > dy * 3 {
        Dir::W
    } else if -dx * 3 - 1 < dy {
        Dir::S
    } else {
        Dir::SW
    }
}

/// Whether two facings differ by more than one step.
pub fn check_dir(a: Dir, b: Dir) -> bool {
    let (a, b) = (a as u8, b as u8);
    !(a == b || (a + 1) % 8 == b || a == (b + 1) % 8)
}
