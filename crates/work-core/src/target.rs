use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use contracts::{Cell, TargetLocation, TargetSnapshot};

use crate::host::WorldView;
use crate::scoring;

/// A location that may yield forced work, with its material score cached at
/// discovery. Identity is the location alone.
#[derive(Debug, Clone, Copy)]
pub struct TargetRecord {
    location: TargetLocation,
    material_score: i64,
}

impl TargetRecord {
    pub fn discover<W: WorldView>(world: &W, location: TargetLocation) -> Self {
        Self {
            location,
            material_score: scoring::material_score(world, location),
        }
    }

    pub fn restored(snapshot: TargetSnapshot) -> Self {
        Self {
            location: snapshot.location,
            material_score: snapshot.material_score,
        }
    }

    pub fn location(&self) -> TargetLocation {
        self.location
    }

    pub fn material_score(&self) -> i64 {
        self.material_score
    }

    pub fn is_valid<W: WorldView>(&self, world: &W) -> bool {
        world.location_valid(self.location)
    }

    pub fn cell<W: WorldView>(&self, world: &W) -> Option<Cell> {
        world.location_cell(self.location)
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            location: self.location,
            material_score: self.material_score,
        }
    }
}

impl PartialEq for TargetRecord {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for TargetRecord {}

impl PartialOrd for TargetRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location.cmp(&other.location)
    }
}

impl Hash for TargetRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_compare_by_location_only() {
        let location = TargetLocation::Cell(Cell::new(2, 3));
        let a = TargetRecord::restored(TargetSnapshot {
            location,
            material_score: 10,
        });
        let b = TargetRecord::restored(TargetSnapshot {
            location,
            material_score: 70,
        });
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }
}
