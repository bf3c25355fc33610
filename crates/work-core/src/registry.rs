//! The per-world forced-work registry.
//!
//! Owns every worker's queue of work orders, drives their frontier tasks from
//! the host's frame and tick callbacks, and re-engages the active order each
//! time the worker's current unit ends.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;

use contracts::{
    AreaId, Cell, EndCondition, EngineConfig, HandlerKind, Notice, NoticeKind, OrderId,
    RankingMode, RegistrySnapshot, TargetLocation, WorkUnit, WorkerId, WorkerQueueSnapshot,
    SCHEMA_VERSION_V1,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::handler::HandlerCatalog;
use crate::host::{JobHost, WorldView};
use crate::order::{Dispatch, WorkOrder};
use crate::target::TargetRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    /// The operator is setting up an override; unit endings are not acted on.
    Preparing,
    /// An override exists but none of its units is running.
    Active,
    Dispatched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub workers: usize,
    pub orders: usize,
    pub targets: usize,
    pub expanding: usize,
    pub notices: usize,
}

pub struct ForcedWorkRegistry<W> {
    config: EngineConfig,
    catalog: HandlerCatalog<W>,
    queues: BTreeMap<WorkerId, VecDeque<WorkOrder>>,
    preparing: BTreeSet<WorkerId>,
    notices: Vec<Notice>,
    next_order_id: u64,
    sweep_cursor: Option<WorkerId>,
}

impl<W: WorldView> ForcedWorkRegistry<W> {
    pub fn new(config: EngineConfig, catalog: HandlerCatalog<W>) -> Self {
        Self {
            config,
            catalog,
            queues: BTreeMap::new(),
            preparing: BTreeSet::new(),
            notices: Vec::new(),
            next_order_id: 1,
            sweep_cursor: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &HandlerCatalog<W> {
        &self.catalog
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.config.policy)
    }

    // -----------------------------------------------------------------------
    // Preparation flag
    // -----------------------------------------------------------------------

    pub fn prepare(&mut self, worker: WorkerId) {
        self.preparing.insert(worker);
    }

    pub fn unprepare(&mut self, worker: WorkerId) {
        self.preparing.remove(&worker);
    }

    pub fn is_preparing(&self, worker: WorkerId) -> bool {
        self.preparing.contains(&worker)
    }

    // -----------------------------------------------------------------------
    // Queue management
    // -----------------------------------------------------------------------

    /// Handler kinds from the catalogue that could work `seed` for the worker,
    /// in catalogue order.
    pub fn applicable_handlers(
        &self,
        world: &W,
        worker: WorkerId,
        seed: TargetLocation,
    ) -> Vec<HandlerKind> {
        let dispatcher = self.dispatcher();
        self.catalog
            .iter()
            .filter(|handler| dispatcher.probe(world, *handler, worker, seed))
            .map(|handler| handler.kind())
            .collect()
    }

    /// Appends a new order seeded at `seed`. The flag is true when the order is
    /// the worker's only one and therefore active.
    pub fn add_work_order(
        &mut self,
        world: &W,
        worker: WorkerId,
        handlers: Vec<HandlerKind>,
        seed: TargetLocation,
    ) -> (bool, &mut WorkOrder) {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        let area = world.worker_area(worker).unwrap_or(AreaId(0));
        let order = WorkOrder::new(
            id,
            worker,
            area,
            handlers,
            TargetRecord::discover(world, seed),
            &self.config,
        );
        info!(order = %id, %worker, %seed, %area, "work order added");

        let queue = self.queues.entry(worker).or_default();
        let is_first = queue.is_empty();
        queue.push_back(order);
        let index = queue.len() - 1;
        (is_first, &mut queue[index])
    }

    /// Pops the active order, cancelling its tasks.
    pub fn remove_active_work_order(&mut self, worker: WorkerId) -> Option<WorkOrder> {
        let queue = self.queues.get_mut(&worker)?;
        let mut order = queue.pop_front()?;
        order.cancel();
        if queue.is_empty() {
            self.queues.remove(&worker);
        }
        info!(order = %order.id(), %worker, "active work order removed");
        Some(order)
    }

    /// Tears down everything held for a worker that left the world. No notice.
    pub fn remove_worker(&mut self, worker: WorkerId) {
        self.preparing.remove(&worker);
        if let Some(queue) = self.queues.remove(&worker) {
            debug!(%worker, orders = queue.len(), "worker removed");
            for mut order in queue {
                order.cancel();
            }
        }
    }

    fn drop_overrides(&mut self, worker: WorkerId) -> usize {
        self.preparing.remove(&worker);
        match self.queues.remove(&worker) {
            Some(queue) => {
                let dropped = queue.len();
                for mut order in queue {
                    order.cancel();
                }
                dropped
            }
            None => 0,
        }
    }

    /// Removes completed targets from every order on the same area.
    fn remove_completed(&mut self, area: AreaId, completed: &[TargetLocation]) {
        for queue in self.queues.values_mut() {
            for order in queue.iter_mut().filter(|order| order.area() == area) {
                for location in completed {
                    order.remove_target(*location);
                }
            }
        }
    }

    /// Targets other workers are currently executing.
    fn dispatched_elsewhere(&self, worker: WorkerId) -> BTreeSet<TargetLocation> {
        self.queues
            .iter()
            .filter(|(other, _)| **other != worker)
            .filter_map(|(_, queue)| queue.front())
            .filter_map(WorkOrder::last_dispatched)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Re-engagement
    // -----------------------------------------------------------------------

    /// Called by the host whenever one of the worker's units ends. Returns true
    /// when a new forced unit was started.
    pub fn continue_work_order(
        &mut self,
        world: &mut W,
        worker: WorkerId,
        ended: Option<&WorkUnit>,
        condition: EndCondition,
    ) -> bool
    where
        W: JobHost,
    {
        if self.preparing.contains(&worker) {
            return false;
        }
        let Some(order) = self.queues.get_mut(&worker).and_then(VecDeque::front_mut) else {
            return false;
        };
        if !order.is_initialized() {
            // The unit that was running before the override was issued.
            order.mark_initialized();
            debug!(order = %order.id(), %worker, "work order initialized");
            return false;
        }

        let area = order.area();
        let last = order.take_last_dispatched();
        if condition.is_success() {
            let completed: Vec<TargetLocation> =
                ended.map(|unit| unit.target).into_iter().chain(last).collect();
            self.remove_completed(area, &completed);
        } else if let Some(last) = last {
            order.remove_target(last);
        }

        if condition.is_external_interruption() {
            let dropped = self.drop_overrides(worker);
            warn!(%worker, dropped, "forced work interrupted externally");
            self.notices.push(Notice::new(
                world.tick(),
                worker,
                NoticeKind::InterruptedExternally,
            ));
            return false;
        }

        self.dispatch_next(world, worker)
    }

    /// Starts the next forced unit for an idle worker that holds an override.
    pub fn request_unit(&mut self, world: &mut W, worker: WorkerId) -> bool
    where
        W: JobHost,
    {
        let Some(dispatch) = self.next_unit_for(&*world, worker) else {
            return false;
        };
        let Some(order) = self.active_order_mut(worker) else {
            return false;
        };
        order.mark_initialized();
        order.mark_dispatched(dispatch.target);
        info!(order = %order.id(), %worker, unit = %dispatch.unit, "forced unit requested");
        world.start_unit(dispatch.unit);
        true
    }

    /// What the active order would dispatch now. Leaves the queue in place.
    pub fn next_unit_for(&mut self, world: &W, worker: WorkerId) -> Option<Dispatch> {
        let excluded = self.dispatched_elsewhere(worker);
        let order = self.queues.get_mut(&worker)?.front_mut()?;
        order.next_unit(world, &self.catalog, &self.config, &excluded, &mut self.notices)
    }

    fn dispatch_next(&mut self, world: &mut W, worker: WorkerId) -> bool
    where
        W: JobHost,
    {
        let excluded = self.dispatched_elsewhere(worker);
        loop {
            let Some(order) = self.queues.get_mut(&worker).and_then(VecDeque::front_mut) else {
                self.queues.remove(&worker);
                return false;
            };

            let found = order.next_unit(
                &*world,
                &self.catalog,
                &self.config,
                &excluded,
                &mut self.notices,
            );
            if let Some(dispatch) = found {
                // A promoted order starts here without a pre-override unit to skip.
                order.mark_initialized();
                order.mark_dispatched(dispatch.target);
                debug!(
                    order = %order.id(),
                    %worker,
                    unit = %dispatch.unit,
                    "forced unit dispatched"
                );
                world.start_unit(dispatch.unit);
                return true;
            }

            self.remove_active_work_order(worker);
            if !self.queues.contains_key(&worker) {
                info!(%worker, "no forced work left");
                return false;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Host callbacks
    // -----------------------------------------------------------------------

    /// Advances every order's expansion by the configured number of steps.
    pub fn on_frame(&mut self, world: &W) {
        let dispatcher = self.dispatcher();
        let steps = self.config.expansion_steps_per_frame;
        let adjacency = self.config.adjacency;
        for queue in self.queues.values_mut() {
            for order in queue.iter_mut() {
                for _ in 0..steps {
                    if !order.is_expanding() {
                        break;
                    }
                    order.step_expansion(world, &self.catalog, &dispatcher, adjacency);
                }
            }
        }
    }

    /// Steps contraction and, on sweep ticks, prunes empty orders and checks one
    /// worker's stress and health.
    pub fn on_tick(&mut self, world: &mut W)
    where
        W: JobHost,
    {
        let tick = world.tick();
        if tick % self.config.contraction_interval_ticks.max(1) == 0 {
            let dispatcher = self.dispatcher();
            let batch = self.config.contraction_batch;
            for queue in self.queues.values_mut() {
                for order in queue.iter_mut() {
                    order.step_contraction(&*world, &self.catalog, &dispatcher, batch);
                }
            }
        }
        if tick % self.config.sweep_interval_ticks.max(1) == 0 {
            self.sweep(world);
        }
    }

    fn sweep(&mut self, world: &mut W)
    where
        W: JobHost,
    {
        let departed: Vec<WorkerId> = self
            .queues
            .keys()
            .copied()
            .filter(|worker| !world.worker_exists(*worker))
            .collect();
        for worker in departed {
            self.remove_worker(worker);
        }

        for (worker, queue) in self.queues.iter_mut() {
            let before = queue.len();
            queue.retain(|order| !order.is_empty() || order.last_dispatched().is_some());
            if queue.len() != before {
                debug!(%worker, pruned = before - queue.len(), "empty work orders pruned");
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());

        let Some(worker) = self.next_swept_worker() else {
            return;
        };
        self.sweep_cursor = Some(worker);

        let breach = if world.stress_level(worker) > self.config.stress_threshold {
            Some(NoticeKind::StressThreshold)
        } else if world.health_distress(worker) > self.config.health_threshold {
            Some(NoticeKind::HealthThreshold)
        } else {
            None
        };
        if let Some(kind) = breach {
            let dropped = self.drop_overrides(worker);
            warn!(%worker, ?kind, dropped, "threshold breached; forced work cancelled");
            self.notices.push(Notice::new(world.tick(), worker, kind));
            world.force_end_unit(worker);
        }
    }

    fn next_swept_worker(&self) -> Option<WorkerId> {
        let lower = match self.sweep_cursor {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };
        self.queues
            .range((lower, Bound::Unbounded))
            .next()
            .or_else(|| self.queues.iter().next())
            .map(|(worker, _)| *worker)
    }

    // -----------------------------------------------------------------------
    // Operator queries
    // -----------------------------------------------------------------------

    pub fn has_active_override(&self, worker: WorkerId) -> bool {
        self.active_order(worker).is_some()
    }

    pub fn active_order(&self, worker: WorkerId) -> Option<&WorkOrder> {
        self.queues.get(&worker).and_then(VecDeque::front)
    }

    pub fn active_order_mut(&mut self, worker: WorkerId) -> Option<&mut WorkOrder> {
        self.queues.get_mut(&worker).and_then(VecDeque::front_mut)
    }

    pub fn orders(&self, worker: WorkerId) -> impl Iterator<Item = &WorkOrder> {
        self.queues.get(&worker).into_iter().flatten()
    }

    pub fn workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.queues.keys().copied()
    }

    /// Locations of the active order, for highlighting.
    pub fn tracked_locations(&self, worker: WorkerId) -> Vec<TargetLocation> {
        self.active_order(worker)
            .map(|order| order.locations().collect())
            .unwrap_or_default()
    }

    pub fn tracked_cells(&self, world: &W, worker: WorkerId) -> Vec<Cell> {
        let cells: BTreeSet<Cell> = self
            .tracked_locations(worker)
            .into_iter()
            .filter_map(|location| world.location_cell(location))
            .collect();
        cells.into_iter().collect()
    }

    /// Moves the active order's radius by `delta`, clamped to the configured
    /// maximum, and restarts its expansion.
    pub fn adjust_search_radius(&mut self, worker: WorkerId, delta: i32) -> Option<u32> {
        let max = self.config.max_search_radius;
        let order = self.active_order_mut(worker)?;
        let radius = (i64::from(order.search_radius()) + i64::from(delta)).clamp(0, i64::from(max));
        let radius = u32::try_from(radius).unwrap_or(max);
        order.set_search_radius(radius);
        debug!(order = %order.id(), %worker, radius, "search radius adjusted");
        Some(radius)
    }

    pub fn toggle_ranking_mode(&mut self, worker: WorkerId) -> Option<RankingMode> {
        let order = self.active_order_mut(worker)?;
        let mode = order.ranking_mode().toggled();
        order.set_ranking_mode(mode);
        Some(mode)
    }

    pub fn phase(&self, worker: WorkerId) -> WorkerPhase {
        if self.preparing.contains(&worker) {
            return WorkerPhase::Preparing;
        }
        match self.active_order(worker) {
            None => WorkerPhase::Idle,
            Some(order) if order.last_dispatched().is_some() => WorkerPhase::Dispatched,
            Some(_) => WorkerPhase::Active,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let orders = self.queues.values().flatten();
        RegistryStats {
            workers: self.queues.len(),
            orders: orders.clone().count(),
            targets: orders.clone().map(WorkOrder::target_count).sum(),
            expanding: orders.filter(|order| order.is_expanding()).count(),
            notices: self.notices.len(),
        }
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, tick: u64) -> RegistrySnapshot {
        RegistrySnapshot {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tick,
            workers: self
                .queues
                .iter()
                .map(|(worker, queue)| WorkerQueueSnapshot {
                    worker: *worker,
                    orders: queue.iter().map(WorkOrder::snapshot).collect(),
                })
                .collect(),
        }
    }

    /// Rebuilds a registry from a snapshot. Invalid targets, empty orders and
    /// workers no longer in the world are dropped.
    pub fn restore(
        config: EngineConfig,
        catalog: HandlerCatalog<W>,
        snapshot: RegistrySnapshot,
        world: &W,
    ) -> Self {
        let mut registry = Self::new(config, catalog);
        if snapshot.schema_version != SCHEMA_VERSION_V1 {
            warn!(
                schema = %snapshot.schema_version,
                "unsupported registry snapshot; starting empty"
            );
            return registry;
        }

        let mut dropped = 0usize;
        for entry in snapshot.workers {
            if !world.worker_exists(entry.worker) {
                dropped += entry.orders.len();
                continue;
            }
            let mut queue = VecDeque::new();
            for saved in entry.orders {
                let id = OrderId(registry.next_order_id);
                registry.next_order_id += 1;
                match WorkOrder::restore(id, entry.worker, saved, world, &registry.catalog) {
                    Some(order) => queue.push_back(order),
                    None => dropped += 1,
                }
            }
            if !queue.is_empty() {
                registry.queues.insert(entry.worker, queue);
            }
        }
        info!(
            workers = registry.queues.len(),
            dropped, "forced-work registry restored"
        );
        registry
    }
}
