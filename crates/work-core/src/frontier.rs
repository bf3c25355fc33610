//! Resumable frontier tasks.
//!
//! Expansion and contraction are explicit task objects owning their own queue
//! and cursor. The tick loop advances them one bounded step at a time; nothing
//! here ever walks the whole map in a single call.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;

use contracts::{Adjacency, Cell, FrontierSnapshot, TargetLocation};

use crate::host::WorldView;
use crate::target::TargetRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Finished,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Neighbourhoods
// ---------------------------------------------------------------------------

/// Cells around `center`: plain adjacency when `radius` is zero, otherwise every
/// in-bounds cell within the radius.
pub fn neighbour_cells<W: WorldView>(
    world: &W,
    center: Cell,
    adjacency: Adjacency,
    radius: u32,
) -> Vec<Cell> {
    let mut cells = Vec::new();
    if radius == 0 {
        cells.extend(center.cardinal_neighbours());
        if adjacency == Adjacency::Octile {
            cells.extend(center.diagonal_neighbours());
        }
    } else {
        let r = radius as i32;
        let limit = i64::from(radius) * i64::from(radius);
        for dx in -r..=r {
            for dy in -r..=r {
                if (dx, dy) == (0, 0) {
                    continue;
                }
                let cell = center.offset(dx, dy);
                if center.distance_squared(cell) <= limit {
                    cells.push(cell);
                }
            }
        }
    }
    cells.retain(|cell| world.in_bounds(*cell));
    cells
}

/// Locations adjacent to `location`. Objects neighbour the objects standing on
/// their own cell and on the neighbouring cells.
pub fn neighbourhood<W: WorldView>(
    world: &W,
    location: TargetLocation,
    adjacency: Adjacency,
    radius: u32,
) -> Vec<TargetLocation> {
    let Some(center) = world.location_cell(location) else {
        return Vec::new();
    };
    let cells = neighbour_cells(world, center, adjacency, radius);
    match location {
        TargetLocation::Cell(_) => cells.into_iter().map(TargetLocation::Cell).collect(),
        TargetLocation::Object(own) => std::iter::once(center)
            .chain(cells)
            .flat_map(|cell| world.objects_at(cell))
            .filter(|id| *id != own)
            .map(TargetLocation::Object)
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Breadth-first growth of a target set. Each step processes one node's full
/// neighbour set.
#[derive(Debug, Clone, Default)]
pub struct ExpansionTask {
    frontier: VecDeque<TargetLocation>,
    visited: BTreeSet<TargetLocation>,
    steps: u64,
}

impl ExpansionTask {
    pub fn seeded(seeds: impl IntoIterator<Item = TargetLocation>) -> Self {
        let mut task = Self::default();
        for seed in seeds {
            if task.visited.insert(seed) {
                task.frontier.push_back(seed);
            }
        }
        task
    }

    pub fn from_snapshot(snapshot: FrontierSnapshot) -> Self {
        Self {
            frontier: snapshot.frontier.into_iter().collect(),
            visited: snapshot.visited.into_iter().collect(),
            steps: 0,
        }
    }

    pub fn snapshot(&self) -> FrontierSnapshot {
        FrontierSnapshot {
            frontier: self.frontier.iter().copied().collect(),
            visited: self.visited.iter().copied().collect(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.frontier.is_empty()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    /// Pops one frontier node and offers each unvisited neighbour to `accept`.
    /// Accepted neighbours join the frontier; rejected ones are only marked
    /// visited.
    pub fn step(
        &mut self,
        neighbours: impl FnOnce(TargetLocation) -> Vec<TargetLocation>,
        mut accept: impl FnMut(TargetLocation) -> bool,
    ) -> TaskStatus {
        let Some(node) = self.frontier.pop_front() else {
            return TaskStatus::Finished;
        };
        self.steps += 1;
        for neighbour in neighbours(node) {
            if !self.visited.insert(neighbour) {
                continue;
            }
            if accept(neighbour) {
                self.frontier.push_back(neighbour);
            }
        }
        if self.frontier.is_empty() {
            TaskStatus::Finished
        } else {
            TaskStatus::Pending
        }
    }
}

// ---------------------------------------------------------------------------
// Contraction
// ---------------------------------------------------------------------------

/// Round-robin re-validation of a target set in fixed-size batches.
#[derive(Debug, Clone, Default)]
pub struct ContractionTask {
    cursor: Option<TargetLocation>,
    passes: u64,
}

impl ContractionTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed sweeps over the whole set.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Re-checks up to `batch` targets after the cursor, dropping those for which
    /// `still_valid` fails. Wraps around once the end of the set is reached.
    pub fn step(
        &mut self,
        targets: &mut BTreeMap<TargetLocation, TargetRecord>,
        batch: usize,
        mut still_valid: impl FnMut(&TargetRecord) -> bool,
    ) -> TaskStatus {
        if targets.is_empty() {
            return TaskStatus::Finished;
        }
        let batch = batch.max(1);
        let lower = match self.cursor {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };
        let keys: Vec<TargetLocation> = targets
            .range((lower, Bound::Unbounded))
            .take(batch)
            .map(|(location, _)| *location)
            .collect();

        for key in &keys {
            let keep = targets.get(key).map_or(false, |record| still_valid(record));
            if !keep {
                targets.remove(key);
            }
        }

        self.cursor = if keys.len() == batch {
            keys.last().copied()
        } else {
            self.passes += 1;
            None
        };

        if targets.is_empty() {
            TaskStatus::Finished
        } else {
            TaskStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::TargetSnapshot;

    use crate::grid::{GridWorld, ObjectKind};

    fn record(x: i32, y: i32) -> (TargetLocation, TargetRecord) {
        let location = TargetLocation::Cell(Cell::new(x, y));
        (
            location,
            TargetRecord::restored(TargetSnapshot {
                location,
                material_score: 0,
            }),
        )
    }

    #[test]
    fn radius_neighbourhood_is_a_clipped_disc() {
        let world = GridWorld::new(10, 10);
        let cells = neighbour_cells(&world, Cell::new(5, 5), Adjacency::Cardinal, 2);
        // 13 cells within distance 2 minus the center.
        assert_eq!(cells.len(), 12);
        let corner = neighbour_cells(&world, Cell::new(0, 0), Adjacency::Cardinal, 1);
        assert_eq!(corner.len(), 2);
        let octile = neighbour_cells(&world, Cell::new(5, 5), Adjacency::Octile, 0);
        assert_eq!(octile.len(), 8);
    }

    #[test]
    fn object_neighbourhood_lists_objects_on_nearby_cells() {
        let mut world = GridWorld::new(6, 6);
        let a = world.spawn_object(ObjectKind::Item { haul_designated: true }, Cell::new(2, 2));
        let b = world.spawn_object(ObjectKind::Item { haul_designated: true }, Cell::new(2, 2));
        let c = world.spawn_object(ObjectKind::Item { haul_designated: true }, Cell::new(2, 3));
        let far = world.spawn_object(ObjectKind::Item { haul_designated: true }, Cell::new(5, 5));

        let found = neighbourhood(&world, a.into(), Adjacency::Cardinal, 0);
        assert!(found.contains(&b.into()));
        assert!(found.contains(&c.into()));
        assert!(!found.contains(&a.into()));
        assert!(!found.contains(&far.into()));
    }

    #[test]
    fn expansion_processes_one_node_per_step() {
        let line: BTreeSet<i32> = (0..5).collect();
        let mut task = ExpansionTask::seeded([TargetLocation::Cell(Cell::new(0, 0))]);
        let mut accepted = Vec::new();
        let mut statuses = Vec::new();
        loop {
            let status = task.step(
                |node| {
                    let cell = node.as_cell().expect("cell node");
                    vec![cell.offset(1, 0).into(), cell.offset(-1, 0).into()]
                },
                |candidate| {
                    let keep = candidate
                        .as_cell()
                        .map_or(false, |cell| cell.y == 0 && line.contains(&cell.x));
                    if keep {
                        accepted.push(candidate);
                    }
                    keep
                },
            );
            statuses.push(status);
            if status != TaskStatus::Pending {
                break;
            }
        }
        assert_eq!(accepted.len(), 4);
        assert_eq!(task.steps(), 5);
        assert_eq!(statuses.last(), Some(&TaskStatus::Finished));
        assert!(task.is_finished());
    }

    #[test]
    fn expansion_snapshot_resumes_where_it_stopped() {
        let mut task = ExpansionTask::seeded([TargetLocation::Cell(Cell::new(0, 0))]);
        task.step(
            |_| vec![Cell::new(1, 0).into(), Cell::new(0, 1).into()],
            |_| true,
        );
        let snapshot = task.snapshot();
        assert_eq!(snapshot.frontier.len(), 2);
        assert_eq!(snapshot.visited.len(), 3);

        let resumed = ExpansionTask::from_snapshot(snapshot);
        assert_eq!(resumed.frontier_len(), 2);
        assert!(!resumed.is_finished());
    }

    #[test]
    fn contraction_checks_fixed_batches_and_wraps() {
        let mut targets: BTreeMap<_, _> = (0..10).map(|x| record(x, 0)).collect();
        let mut task = ContractionTask::new();
        let mut checked = 0;

        let status = task.step(&mut targets, 4, |_| {
            checked += 1;
            true
        });
        assert_eq!(status, TaskStatus::Pending);
        assert_eq!(checked, 4);

        task.step(&mut targets, 4, |_| true);
        assert_eq!(task.passes(), 0);
        task.step(&mut targets, 4, |_| true);
        assert_eq!(task.passes(), 1);

        // Next batch starts from the beginning again and prunes.
        task.step(&mut targets, 4, |record| {
            record.location().as_cell().map_or(true, |cell| cell.x % 2 == 0)
        });
        assert_eq!(targets.len(), 8);
    }

    #[test]
    fn contraction_finishes_when_set_empties() {
        let mut targets: BTreeMap<_, _> = (0..3).map(|x| record(x, 0)).collect();
        let mut task = ContractionTask::new();
        assert_eq!(task.step(&mut targets, 8, |_| false), TaskStatus::Finished);
        assert!(targets.is_empty());
        assert_eq!(task.step(&mut targets, 8, |_| true), TaskStatus::Finished);
    }
}
