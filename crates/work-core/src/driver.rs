//! Tick loop binding a [`GridWorld`] to a [`ForcedWorkRegistry`].
//!
//! Each tick: the frame callback, then every running unit completes and is
//! reported back, then the tick callback, then host-initiated endings.

use contracts::{EndCondition, EngineConfig, TargetLocation, WorkUnit, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::grid::GridWorld;
use crate::handlers::grid_catalog;
use crate::host::WorldView;
use crate::registry::ForcedWorkRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub tick: u64,
    pub completed: Vec<WorkUnit>,
    pub redispatched: usize,
    pub forced_endings: usize,
}

pub struct GridSimulation {
    world: GridWorld,
    registry: ForcedWorkRegistry<GridWorld>,
}

impl GridSimulation {
    pub fn new(world: GridWorld, config: EngineConfig) -> Self {
        Self {
            world,
            registry: ForcedWorkRegistry::new(config, grid_catalog()),
        }
    }

    pub fn from_parts(world: GridWorld, registry: ForcedWorkRegistry<GridWorld>) -> Self {
        Self { world, registry }
    }

    pub fn world(&self) -> &GridWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut GridWorld {
        &mut self.world
    }

    pub fn registry(&self) -> &ForcedWorkRegistry<GridWorld> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ForcedWorkRegistry<GridWorld> {
        &mut self.registry
    }

    pub fn into_parts(self) -> (GridWorld, ForcedWorkRegistry<GridWorld>) {
        (self.world, self.registry)
    }

    /// The operator flow for one override: resolve handlers at the seed, queue
    /// the order, end whatever the worker was doing and start forced work.
    /// False when nothing at the seed can be worked.
    pub fn issue_override(&mut self, worker: WorkerId, seed: TargetLocation) -> bool {
        self.registry.prepare(worker);
        let handlers = self.registry.applicable_handlers(&self.world, worker, seed);
        if handlers.is_empty() {
            self.registry.unprepare(worker);
            debug!(%worker, %seed, "nothing to force at seed");
            return false;
        }
        let (is_first, _) = self
            .registry
            .add_work_order(&self.world, worker, handlers, seed);
        self.registry.unprepare(worker);
        if !is_first {
            return true;
        }

        if let Some(previous) = self.world.interrupt_current(worker) {
            self.registry.continue_work_order(
                &mut self.world,
                worker,
                Some(&previous),
                EndCondition::InterruptedForced,
            );
        }
        self.registry.request_unit(&mut self.world, worker)
    }

    pub fn step(&mut self) -> StepReport {
        let tick = self.world.advance_tick();
        let mut report = StepReport {
            tick,
            ..StepReport::default()
        };

        self.registry.on_frame(&self.world);

        for worker in self.world.busy_workers() {
            let Some(unit) = self.world.complete_current(worker) else {
                continue;
            };
            if self.registry.continue_work_order(
                &mut self.world,
                worker,
                Some(&unit),
                EndCondition::Succeeded,
            ) {
                report.redispatched += 1;
            }
            report.completed.push(unit);
        }

        self.registry.on_tick(&mut self.world);

        for (unit, condition) in self.world.drain_endings() {
            report.forced_endings += 1;
            self.registry
                .continue_work_order(&mut self.world, unit.worker, Some(&unit), condition);
        }

        // Idle workers that still hold an override ask again, e.g. once a claim is released.
        let waiting: Vec<WorkerId> = self
            .registry
            .workers()
            .filter(|worker| self.world.worker_exists(*worker) && self.world.is_idle(*worker))
            .filter(|worker| !self.registry.is_preparing(*worker))
            .collect();
        for worker in waiting {
            if self.registry.request_unit(&mut self.world, worker) {
                report.redispatched += 1;
            }
        }
        report
    }

    /// Takes the worker out of the world and tears down its overrides in the same call.
    pub fn remove_worker(&mut self, worker: WorkerId) -> bool {
        let removed = self.world.remove_worker(worker).is_some();
        self.registry.remove_worker(worker);
        debug!(%worker, removed, "worker removed from simulation");
        removed
    }

    /// Steps until no override is left and nobody is working, or `max_ticks`
    /// elapse. Returns the ticks stepped.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        let mut stepped = 0;
        while stepped < max_ticks && !self.is_idle() {
            self.step();
            stepped += 1;
        }
        info!(
            ticks = stepped,
            tick = self.world.tick(),
            completed = self.world.completed().len(),
            "simulation idle"
        );
        stepped
    }

    pub fn is_idle(&self) -> bool {
        self.registry.stats().workers == 0 && self.world.busy_workers().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Cell, NoticeKind};

    const ALICE: WorkerId = WorkerId(1);
    const BOB: WorkerId = WorkerId(2);

    #[test]
    fn override_on_empty_cell_is_refused() {
        let mut world = GridWorld::new(5, 5);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        let mut sim = GridSimulation::new(world, EngineConfig::default());
        assert!(!sim.issue_override(ALICE, Cell::new(3, 3).into()));
        assert!(!sim.registry().is_preparing(ALICE));
        assert!(sim.is_idle());
    }

    #[test]
    fn override_replaces_the_running_unit() {
        let mut world = GridWorld::new(6, 6);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        world.add_debris(Cell::new(4, 4));
        world.add_debris(Cell::new(1, 1));
        let mut sim = GridSimulation::new(world, EngineConfig::default());
        crate::host::JobHost::start_unit(
            sim.world_mut(),
            WorkUnit::new(ALICE, contracts::HandlerKind::Clean, Cell::new(1, 1).into()),
        );

        assert!(sim.issue_override(ALICE, Cell::new(4, 4).into()));
        let running = sim.world().current_unit(ALICE).expect("forced unit");
        assert_eq!(running.target, TargetLocation::Cell(Cell::new(4, 4)));
        assert!(sim
            .registry()
            .active_order(ALICE)
            .map_or(false, |order| order.is_initialized()));
        assert!(sim.registry().notices().is_empty());
    }

    #[test]
    fn queued_override_runs_after_the_first_is_done() {
        let mut world = GridWorld::new(12, 6);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 1..4 {
            world.add_debris(Cell::new(x, 1));
        }
        for x in 6..10 {
            world.add_debris(Cell::new(x, 4));
        }
        let mut sim = GridSimulation::new(world, EngineConfig::default());
        assert!(sim.issue_override(ALICE, Cell::new(1, 1).into()));
        assert!(sim.issue_override(ALICE, Cell::new(6, 4).into()));
        let ticks = sim.run_until_idle(200);

        assert!(ticks < 20);
        assert_eq!(sim.world().debris_count(), 0);
        assert_eq!(sim.world().completed().len(), 7);
        assert!(!sim.registry().has_active_override(ALICE));
        assert_eq!(sim.registry().phase(ALICE), crate::registry::WorkerPhase::Idle);
    }

    #[test]
    fn idle_override_resumes_once_the_claim_is_released() {
        let mut world = GridWorld::new(8, 4);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        world.spawn_worker(BOB, Cell::new(7, 3));
        world.add_debris(Cell::new(3, 2));
        world.reserve(Cell::new(3, 2).into(), BOB);
        let mut sim = GridSimulation::new(world, EngineConfig::default());

        assert!(!sim.issue_override(ALICE, Cell::new(3, 2).into()));
        assert!(sim.registry().has_active_override(ALICE));
        sim.step();
        assert!(sim.world().is_idle(ALICE));

        sim.world_mut().release(Cell::new(3, 2).into());
        sim.step();
        assert!(!sim.world().is_idle(ALICE));
        sim.run_until_idle(10);
        assert_eq!(sim.world().debris_count(), 0);
        assert!(!sim.registry().has_active_override(ALICE));
    }

    #[test]
    fn removing_a_worker_tears_down_its_override() {
        let mut world = GridWorld::new(8, 8);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        world.add_debris(Cell::new(3, 3));
        world.add_debris(Cell::new(3, 4));
        let mut sim = GridSimulation::new(world, EngineConfig::default());
        assert!(sim.issue_override(ALICE, Cell::new(3, 3).into()));

        assert!(sim.remove_worker(ALICE));
        assert!(!sim.registry().has_active_override(ALICE));
        assert!(!sim.world().worker_exists(ALICE));
        assert!(sim.registry().notices().is_empty());
        assert!(sim.is_idle());
        assert!(!sim.remove_worker(ALICE));
    }

    #[test]
    fn simulation_drains_a_debris_strip() {
        let mut world = GridWorld::new(10, 3);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 1..9 {
            world.add_debris(Cell::new(x, 1));
        }
        let mut sim = GridSimulation::new(world, EngineConfig::default());
        assert!(sim.issue_override(ALICE, Cell::new(1, 1).into()));
        sim.run_until_idle(100);

        assert_eq!(sim.world().debris_count(), 0);
        assert_eq!(sim.world().completed().len(), 8);
        assert!(sim
            .registry()
            .notices()
            .iter()
            .all(|notice| notice.kind != NoticeKind::NoFurtherWork));
    }
}
