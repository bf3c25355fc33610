//! Reference capability handlers for [`GridWorld`].

use contracts::{HandlerKind, TargetLocation, WorkerId};

use crate::grid::{GridWorld, ObjectKind, Terrain};
use crate::handler::{HandlerCatalog, InterestFilter, WorkHandler};
use crate::host::WorldView;

/// The grid world's handlers in dispatch order.
pub fn grid_catalog() -> HandlerCatalog<GridWorld> {
    HandlerCatalog::new()
        .with(CleanHandler)
        .with(MineHandler)
        .with(ConstructHandler)
        .with(HaulHandler)
}

fn object_kind(world: &GridWorld, location: TargetLocation) -> Option<ObjectKind> {
    let id = location.as_object()?;
    let object = world.object(id)?;
    object.cell.map(|_| object.kind)
}

/// Clears debris from floor cells.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanHandler;

impl WorkHandler<GridWorld> for CleanHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Clean
    }

    fn filter(&self) -> InterestFilter {
        InterestFilter::Cells
    }

    fn matches(&self, world: &GridWorld, location: TargetLocation) -> bool {
        location.as_cell().map_or(false, |cell| world.has_debris(cell))
    }

    fn has_work(&self, world: &GridWorld, _: WorkerId, location: TargetLocation, _: bool) -> bool {
        self.matches(world, location)
    }
}

/// Digs out rock. Forcing extends it to undesignated rock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MineHandler;

impl WorkHandler<GridWorld> for MineHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Mine
    }

    fn filter(&self) -> InterestFilter {
        InterestFilter::Cells
    }

    fn matches(&self, world: &GridWorld, location: TargetLocation) -> bool {
        location.as_cell().map_or(false, |cell| {
            world.terrain(cell) == Terrain::Rock && world.is_mine_designated(cell)
        })
    }

    fn coerced_match(&self, world: &GridWorld, location: TargetLocation) -> bool {
        location
            .as_cell()
            .map_or(false, |cell| world.terrain(cell) == Terrain::Rock)
    }

    fn has_work(
        &self,
        world: &GridWorld,
        _: WorkerId,
        location: TargetLocation,
        forced: bool,
    ) -> bool {
        if forced {
            self.coerced_match(world, location)
        } else {
            self.matches(world, location)
        }
    }
}

/// Builds blueprints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstructHandler;

impl WorkHandler<GridWorld> for ConstructHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Construct
    }

    fn filter(&self) -> InterestFilter {
        InterestFilter::Objects
    }

    fn matches(&self, world: &GridWorld, location: TargetLocation) -> bool {
        matches!(
            object_kind(world, location),
            Some(ObjectKind::Blueprint { .. })
        )
    }

    fn worker_capable(&self, world: &GridWorld, worker: WorkerId) -> bool {
        !world.is_incapable(worker, HandlerKind::Construct)
    }

    fn has_work(
        &self,
        world: &GridWorld,
        worker: WorkerId,
        location: TargetLocation,
        _: bool,
    ) -> bool {
        // A worker never builds a solid structure on the cell it stands on.
        self.matches(world, location)
            && world.location_cell(location) != world.worker_cell(worker)
    }
}

/// Carries loose items off the map.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaulHandler;

impl WorkHandler<GridWorld> for HaulHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Haul
    }

    fn filter(&self) -> InterestFilter {
        InterestFilter::Objects
    }

    fn matches(&self, world: &GridWorld, location: TargetLocation) -> bool {
        matches!(
            object_kind(world, location),
            Some(ObjectKind::Item {
                haul_designated: true
            })
        )
    }

    fn coerced_match(&self, world: &GridWorld, location: TargetLocation) -> bool {
        matches!(object_kind(world, location), Some(ObjectKind::Item { .. }))
    }

    fn has_work(&self, world: &GridWorld, _: WorkerId, location: TargetLocation, _: bool) -> bool {
        self.coerced_match(world, location)
    }
}
