//! Seams to the host simulation: read-only world queries and the job scheduler.

use contracts::{
    AreaId, Cell, HandlerKind, MaterialKind, ObjectId, TargetLocation, WorkUnit, WorkerId,
};

/// Everything the engine reads from the simulated world.
///
/// Reachability and claims are host primitives; the engine never computes paths
/// or holds reservations of its own.
pub trait WorldView {
    fn tick(&self) -> u64;

    fn in_bounds(&self, cell: Cell) -> bool;

    /// Terrain or structure that a worker cannot stand on.
    fn blocks_movement(&self, cell: Cell) -> bool;

    fn object_exists(&self, id: ObjectId) -> bool;

    /// Position of a spawned object; `None` when carried, stored away, or gone.
    fn object_cell(&self, id: ObjectId) -> Option<Cell>;

    fn objects_at(&self, cell: Cell) -> Vec<ObjectId>;

    /// Structure or item kinds involved at a location.
    fn material_kinds(&self, location: TargetLocation) -> Vec<MaterialKind>;

    fn worker_exists(&self, worker: WorkerId) -> bool;

    fn worker_cell(&self, worker: WorkerId) -> Option<Cell>;

    fn worker_area(&self, worker: WorkerId) -> Option<AreaId>;

    /// Whether the worker's own work assignments include this category.
    fn work_enabled(&self, worker: WorkerId, kind: HandlerKind) -> bool;

    fn can_reach(&self, worker: WorkerId, location: TargetLocation) -> bool;

    /// Exclusively held by someone other than `worker`.
    fn claimed_by_other(&self, worker: WorkerId, location: TargetLocation) -> bool;

    fn is_forbidden(&self, location: TargetLocation) -> bool;

    fn in_allowed_area(&self, worker: WorkerId, cell: Cell) -> bool;

    /// 0 = calm, 100 = breaking.
    fn stress_level(&self, worker: WorkerId) -> u8;

    /// 0 = healthy, 100 = incapacitated.
    fn health_distress(&self, worker: WorkerId) -> u8;

    fn location_cell(&self, location: TargetLocation) -> Option<Cell> {
        match location {
            TargetLocation::Cell(cell) => Some(cell),
            TargetLocation::Object(id) => self.object_cell(id),
        }
    }

    fn location_valid(&self, location: TargetLocation) -> bool {
        match location {
            TargetLocation::Cell(cell) => self.in_bounds(cell),
            TargetLocation::Object(id) => self.object_exists(id),
        }
    }
}

/// The host's job scheduler.
pub trait JobHost {
    /// Begin executing a unit; the host takes whatever claim the unit needs.
    fn start_unit(&mut self, unit: WorkUnit);

    /// End the worker's current unit immediately. The host reports the ending
    /// back through the registry like any other.
    fn force_end_unit(&mut self, worker: WorkerId);
}
