//! Material priorities and neighbour-topology scoring.
//!
//! Smart ranking prefers cells whose surroundings say "finish me now or you may
//! wall yourself in later": dead ends and stubs first, corners next, then
//! perimeter, open interior last, and fully enclosed cells never.

use contracts::{Cell, MaterialKind, TargetLocation};

use crate::host::WorldView;

/// Weight of the topology or distance term relative to the material term.
pub const NEIGHBOUR_WEIGHT: i64 = 10_000;

pub const ENCLOSED_SCORE: i64 = -100;
pub const DEAD_END_SCORE: i64 = 11;
pub const STUB_SCORE: i64 = 12;
pub const CORNER_BASE_SCORE: i64 = 7;
pub const PERIMETER_BASE_SCORE: i64 = 2;
pub const OPEN_SCORE: i64 = 0;

// ---------------------------------------------------------------------------
// Material table
// ---------------------------------------------------------------------------

pub fn material_priority(kind: MaterialKind) -> i64 {
    match kind {
        MaterialKind::PowerConduit => 90,
        MaterialKind::PowerNode => 80,
        MaterialKind::Wall => 70,
        MaterialKind::Door => 60,
        MaterialKind::Column => 50,
        MaterialKind::Floor => 30,
        MaterialKind::Production => 20,
        MaterialKind::Furniture => 10,
        MaterialKind::Decoration => 5,
        MaterialKind::Other => 0,
    }
}

pub fn material_score<W: WorldView>(world: &W, location: TargetLocation) -> i64 {
    world
        .material_kinds(location)
        .into_iter()
        .map(material_priority)
        .max()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Neighbour topology
// ---------------------------------------------------------------------------

/// Blocked flags around a cell. Cardinals run north, east, south, west;
/// diagonal `i` sits between cardinal `i` and cardinal `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Blockage {
    pub cardinal: [bool; 4],
    pub diagonal: [bool; 4],
    /// Cardinal neighbours that are blocked because they are planned targets.
    pub planned: [bool; 4],
}

impl Blockage {
    pub fn around(
        cell: Cell,
        mut is_blocked: impl FnMut(Cell) -> bool,
        mut is_planned: impl FnMut(Cell) -> bool,
    ) -> Self {
        let mut blockage = Blockage::default();
        for (idx, neighbour) in cell.cardinal_neighbours().into_iter().enumerate() {
            let planned = is_planned(neighbour);
            blockage.planned[idx] = planned;
            blockage.cardinal[idx] = planned || is_blocked(neighbour);
        }
        for (idx, neighbour) in cell.diagonal_neighbours().into_iter().enumerate() {
            blockage.diagonal[idx] = is_planned(neighbour) || is_blocked(neighbour);
        }
        blockage
    }

    pub fn blocked_count(&self) -> usize {
        self.cardinal.iter().filter(|blocked| **blocked).count()
    }

    fn open_diagonals(&self) -> i64 {
        self.diagonal.iter().filter(|blocked| !**blocked).count() as i64
    }
}

pub fn neighbour_score(blockage: &Blockage) -> i64 {
    let blocked = blockage.blocked_count();
    match blocked {
        4 => ENCLOSED_SCORE,
        3 => DEAD_END_SCORE,
        0 => OPEN_SCORE,
        1 => {
            let side = blockage
                .cardinal
                .iter()
                .position(|blocked| *blocked)
                .unwrap_or_default();
            let open_diagonals = blockage.open_diagonals();
            if blockage.planned[side] && open_diagonals == 4 {
                STUB_SCORE
            } else {
                PERIMETER_BASE_SCORE + open_diagonals
            }
        }
        _ => {
            // Two blocked sides: a convex corner when they are adjacent and the
            // diagonal between them is solid too.
            let corner = (0..4)
                .find(|idx| blockage.cardinal[*idx] && blockage.cardinal[(idx + 1) % 4]);
            match corner {
                Some(idx) if blockage.diagonal[idx] => {
                    let open_elsewhere = (0..4)
                        .filter(|other| *other != idx && !blockage.diagonal[*other])
                        .count() as i64;
                    CORNER_BASE_SCORE + open_elsewhere
                }
                _ => -(blocked as i64),
            }
        }
    }
}

pub fn smart_score(material_score: i64, blockage: &Blockage) -> i64 {
    material_score + NEIGHBOUR_WEIGHT * neighbour_score(blockage)
}

pub fn nearest_score(material_score: i64, max_range_squared: i64, distance_squared: i64) -> i64 {
    let closeness = (max_range_squared - distance_squared).max(0);
    material_score.saturating_add(NEIGHBOUR_WEIGHT.saturating_mul(closeness))
}
