//! Dispatch adapter: turns (target, handler, worker) into a unit of work or a
//! definitive "no", applying the forcing policy.

use contracts::{ForcingPolicy, TargetLocation, WorkUnit, WorkerId};
use tracing::trace;

use crate::handler::{HandlerCatalog, WorkHandler};
use crate::host::WorldView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Feasibility only; claims are neither required nor taken.
    Probe,
    /// The target must not be held by another worker.
    Commit,
    /// Commit semantics without the claim check. Only probing uses this.
    CommitIgnoringClaims,
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    policy: ForcingPolicy,
}

impl Dispatcher {
    pub fn new(policy: ForcingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ForcingPolicy {
        &self.policy
    }

    /// Could this handler ever produce work here for the worker, claims aside.
    pub fn probe<W: WorldView>(
        &self,
        world: &W,
        handler: &dyn WorkHandler<W>,
        worker: WorkerId,
        location: TargetLocation,
    ) -> bool {
        self.dispatch(world, handler, worker, location, DispatchMode::Probe)
            .is_some()
    }

    /// Whether any of `handlers` (looked up in `catalog`) probes positive.
    pub fn probe_any<W: WorldView>(
        &self,
        world: &W,
        catalog: &HandlerCatalog<W>,
        handlers: &[contracts::HandlerKind],
        worker: WorkerId,
        location: TargetLocation,
    ) -> bool {
        handlers
            .iter()
            .filter_map(|kind| catalog.get(*kind))
            .any(|handler| self.probe(world, handler, worker, location))
    }

    pub fn dispatch<W: WorldView>(
        &self,
        world: &W,
        handler: &dyn WorkHandler<W>,
        worker: WorkerId,
        location: TargetLocation,
        mode: DispatchMode,
    ) -> Option<WorkUnit> {
        if !world.location_valid(location) {
            return None;
        }
        if !self.interested(world, handler, location) {
            return None;
        }
        if !self.capable(world, handler, worker) {
            return None;
        }
        if !self.gates_open(world, handler, worker, location) {
            trace!(%worker, %location, handler = %handler.kind(), "gated");
            return None;
        }
        if !world.can_reach(worker, location) {
            return None;
        }

        match mode {
            DispatchMode::Probe => handler
                .has_work(world, worker, location, true)
                .then(|| WorkUnit::new(worker, handler.kind(), location)),
            DispatchMode::Commit => {
                if world.claimed_by_other(worker, location) {
                    trace!(%worker, %location, "claimed elsewhere");
                    return None;
                }
                handler.produce(world, worker, location, true)
            }
            DispatchMode::CommitIgnoringClaims => handler.produce(world, worker, location, true),
        }
    }

    fn interested<W: WorldView>(
        &self,
        world: &W,
        handler: &dyn WorkHandler<W>,
        location: TargetLocation,
    ) -> bool {
        if !handler.filter().admits(location) {
            return false;
        }
        if handler.matches(world, location) {
            return true;
        }
        self.policy.coerce_ignorable_filters
            && handler.kind().is_ignorable()
            && handler.coerced_match(world, location)
    }

    fn capable<W: WorldView>(
        &self,
        world: &W,
        handler: &dyn WorkHandler<W>,
        worker: WorkerId,
    ) -> bool {
        if !handler.worker_capable(world, worker) {
            return false;
        }
        self.policy.ignore_assignment_priority || world.work_enabled(worker, handler.kind())
    }

    fn gates_open<W: WorldView>(
        &self,
        world: &W,
        handler: &dyn WorkHandler<W>,
        worker: WorkerId,
        location: TargetLocation,
    ) -> bool {
        let ignorable = handler.kind().is_ignorable();
        if world.is_forbidden(location) && !(ignorable && self.policy.ignore_forbidden) {
            return false;
        }
        let Some(cell) = world.location_cell(location) else {
            return false;
        };
        world.in_allowed_area(worker, cell) || (ignorable && self.policy.ignore_restricted_area)
    }
}
