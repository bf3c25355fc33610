//! Work orders: one override's live target set, its frontier tasks, the
//! ranking, and next-unit selection.

use std::collections::{BTreeMap, BTreeSet};

use contracts::{
    Adjacency, AreaId, Cell, EngineConfig, HandlerKind, Notice, NoticeKind, OrderId, RankingMode,
    TargetLocation, WorkOrderSnapshot, WorkUnit, WorkerId,
};
use tracing::{debug, info};

use crate::dispatch::{DispatchMode, Dispatcher};
use crate::frontier::{neighbourhood, ContractionTask, ExpansionTask, TaskStatus};
use crate::handler::HandlerCatalog;
use crate::host::WorldView;
use crate::scoring::{nearest_score, smart_score, Blockage};
use crate::target::TargetRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedTarget {
    pub location: TargetLocation,
    pub cell: Cell,
    pub score: i64,
}

/// A unit of work picked by `WorkOrder::next_unit`, with the target it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub target: TargetLocation,
    pub unit: WorkUnit,
}

#[derive(Debug, Clone)]
pub struct WorkOrder {
    id: OrderId,
    worker: WorkerId,
    area: AreaId,
    handlers: Vec<HandlerKind>,
    targets: BTreeMap<TargetLocation, TargetRecord>,
    is_object_kind: bool,
    search_radius: u32,
    ranking_mode: RankingMode,
    cancelled: bool,
    last_dispatched: Option<TargetLocation>,
    initialized: bool,
    exhaustion_reported: bool,
    expansion: Option<ExpansionTask>,
    contraction: Option<ContractionTask>,
}

impl WorkOrder {
    pub(crate) fn new(
        id: OrderId,
        worker: WorkerId,
        area: AreaId,
        handlers: Vec<HandlerKind>,
        seed: TargetRecord,
        config: &EngineConfig,
    ) -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(seed.location(), seed);
        Self {
            id,
            worker,
            area,
            handlers,
            targets,
            is_object_kind: seed.location().is_object(),
            search_radius: config.default_search_radius,
            ranking_mode: config.policy.default_ranking,
            cancelled: false,
            last_dispatched: None,
            initialized: false,
            exhaustion_reported: false,
            expansion: Some(ExpansionTask::seeded([seed.location()])),
            contraction: Some(ContractionTask::new()),
        }
    }

    /// Rebuilds a persisted order against the current world. Targets whose
    /// location is gone and handler kinds the catalog no longer knows are
    /// dropped; `None` when nothing workable is left.
    pub(crate) fn restore<W: WorldView>(
        id: OrderId,
        worker: WorkerId,
        snapshot: WorkOrderSnapshot,
        world: &W,
        catalog: &HandlerCatalog<W>,
    ) -> Option<Self> {
        let handlers: Vec<HandlerKind> = snapshot
            .handlers
            .into_iter()
            .filter(|kind| catalog.contains(*kind))
            .collect();
        if handlers.is_empty() {
            return None;
        }
        let targets: BTreeMap<TargetLocation, TargetRecord> = snapshot
            .targets
            .into_iter()
            .map(TargetRecord::restored)
            .filter(|record| record.is_valid(world))
            .map(|record| (record.location(), record))
            .collect();
        if targets.is_empty() {
            return None;
        }
        Some(Self {
            id,
            worker,
            area: snapshot.area,
            handlers,
            targets,
            is_object_kind: snapshot.is_object_kind,
            search_radius: snapshot.search_radius,
            ranking_mode: snapshot.ranking_mode,
            cancelled: false,
            last_dispatched: None,
            initialized: snapshot.initialized,
            exhaustion_reported: false,
            expansion: snapshot.expansion.map(ExpansionTask::from_snapshot),
            contraction: Some(ContractionTask::new()),
        })
    }

    pub fn snapshot(&self) -> WorkOrderSnapshot {
        WorkOrderSnapshot {
            area: self.area,
            handlers: self.handlers.clone(),
            targets: self.targets.values().map(TargetRecord::snapshot).collect(),
            is_object_kind: self.is_object_kind,
            search_radius: self.search_radius,
            ranking_mode: self.ranking_mode,
            initialized: self.initialized,
            expansion: self.expansion.as_ref().map(ExpansionTask::snapshot),
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn area(&self) -> AreaId {
        self.area
    }

    pub fn handlers(&self) -> &[HandlerKind] {
        &self.handlers
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetRecord> {
        self.targets.values()
    }

    pub fn locations(&self) -> impl Iterator<Item = TargetLocation> + '_ {
        self.targets.keys().copied()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, location: TargetLocation) -> bool {
        self.targets.contains_key(&location)
    }

    pub fn is_object_kind(&self) -> bool {
        self.is_object_kind
    }

    pub fn search_radius(&self) -> u32 {
        self.search_radius
    }

    pub fn ranking_mode(&self) -> RankingMode {
        self.ranking_mode
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn last_dispatched(&self) -> Option<TargetLocation> {
        self.last_dispatched
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_expanding(&self) -> bool {
        self.expansion.is_some()
    }

    pub fn expansion_steps(&self) -> u64 {
        self.expansion.as_ref().map_or(0, ExpansionTask::steps)
    }

    pub fn contraction_passes(&self) -> u64 {
        self.contraction.as_ref().map_or(0, ContractionTask::passes)
    }

    // --- Mutation ---

    /// Changes the search radius and restarts expansion from every held target.
    pub fn set_search_radius(&mut self, radius: u32) {
        self.search_radius = radius;
        if self.cancelled {
            return;
        }
        self.expansion = Some(ExpansionTask::seeded(self.targets.keys().copied()));
        if self.contraction.is_none() {
            self.contraction = Some(ContractionTask::new());
        }
    }

    pub fn set_ranking_mode(&mut self, mode: RankingMode) {
        self.ranking_mode = mode;
    }

    /// Tasks observe the flag at their next step and stop.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn remove_target(&mut self, location: TargetLocation) -> bool {
        self.targets.remove(&location).is_some()
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub(crate) fn mark_dispatched(&mut self, location: TargetLocation) {
        self.last_dispatched = Some(location);
    }

    pub(crate) fn take_last_dispatched(&mut self) -> Option<TargetLocation> {
        self.last_dispatched.take()
    }

    // --- Frontier tasks ---

    pub fn step_expansion<W: WorldView>(
        &mut self,
        world: &W,
        catalog: &HandlerCatalog<W>,
        dispatcher: &Dispatcher,
        adjacency: Adjacency,
    ) -> TaskStatus {
        if self.cancelled {
            self.expansion = None;
            return TaskStatus::Cancelled;
        }
        let Some(task) = self.expansion.as_mut() else {
            return TaskStatus::Finished;
        };

        let worker = self.worker;
        let radius = self.search_radius;
        let handlers = &self.handlers;
        let targets = &mut self.targets;
        let status = task.step(
            |node| neighbourhood(world, node, adjacency, radius),
            |candidate| {
                if targets.contains_key(&candidate) {
                    return false;
                }
                let workable = dispatcher.probe_any(world, catalog, handlers, worker, candidate);
                if workable {
                    targets.insert(candidate, TargetRecord::discover(world, candidate));
                }
                workable
            },
        );

        if status == TaskStatus::Finished {
            debug!(order = %self.id, %worker, targets = self.targets.len(), "expansion settled");
            self.expansion = None;
        }
        status
    }

    pub fn step_contraction<W: WorldView>(
        &mut self,
        world: &W,
        catalog: &HandlerCatalog<W>,
        dispatcher: &Dispatcher,
        batch: usize,
    ) -> TaskStatus {
        if self.cancelled {
            self.contraction = None;
            return TaskStatus::Cancelled;
        }
        let Some(task) = self.contraction.as_mut() else {
            return TaskStatus::Finished;
        };

        let worker = self.worker;
        let handlers = &self.handlers;
        let before = self.targets.len();
        let status = task.step(&mut self.targets, batch, |record| {
            record.is_valid(world)
                && dispatcher.probe_any(world, catalog, handlers, worker, record.location())
        });
        let pruned = before - self.targets.len();
        if pruned > 0 {
            debug!(order = %self.id, %worker, pruned, "contraction pruned stale targets");
        }

        if status == TaskStatus::Finished {
            self.contraction = None;
        }
        status
    }

    // --- Ranking and selection ---

    /// Held targets in pick order, skipping `excluded`. The order is total: equal
    /// scores fall back to location order.
    pub fn ranked_targets<W: WorldView>(
        &self,
        world: &W,
        config: &EngineConfig,
        excluded: &BTreeSet<TargetLocation>,
    ) -> Vec<RankedTarget> {
        let planned: BTreeSet<Cell> = self
            .targets
            .values()
            .filter_map(|record| record.cell(world))
            .collect();
        let excluded_cells: BTreeSet<Cell> = excluded
            .iter()
            .filter_map(|location| world.location_cell(*location))
            .collect();
        let worker_cell = world.worker_cell(self.worker);
        let max_range_squared = config.nearest_max_range_squared();

        let mut ranked: Vec<RankedTarget> = self
            .targets
            .values()
            .filter(|record| !excluded.contains(&record.location()))
            .filter_map(|record| {
                let cell = record.cell(world)?;
                let score = match self.ranking_mode {
                    RankingMode::Smart => {
                        let blockage = Blockage::around(
                            cell,
                            |near| {
                                !world.in_bounds(near)
                                    || world.blocks_movement(near)
                                    || excluded_cells.contains(&near)
                                    || world.claimed_by_other(self.worker, near.into())
                            },
                            |near| planned.contains(&near),
                        );
                        smart_score(record.material_score(), &blockage)
                    }
                    RankingMode::Nearest => {
                        let distance_squared = worker_cell
                            .map_or(max_range_squared, |from| from.distance_squared(cell));
                        nearest_score(record.material_score(), max_range_squared, distance_squared)
                    }
                };
                Some(RankedTarget {
                    location: record.location(),
                    cell,
                    score,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.location.cmp(&b.location))
        });
        ranked
    }

    /// Walks ranked targets against handlers in configured order and returns the
    /// first committed unit. An exhausted order reports once per exhaustion.
    pub fn next_unit<W: WorldView>(
        &mut self,
        world: &W,
        catalog: &HandlerCatalog<W>,
        config: &EngineConfig,
        excluded: &BTreeSet<TargetLocation>,
        notices: &mut Vec<Notice>,
    ) -> Option<Dispatch> {
        if self.cancelled {
            return None;
        }
        let ranked = self.ranked_targets(world, config, excluded);
        if ranked.is_empty() {
            return None;
        }

        let dispatcher = Dispatcher::new(config.policy);
        for candidate in &ranked {
            for kind in &self.handlers {
                let Some(handler) = catalog.get(*kind) else {
                    continue;
                };
                if let Some(unit) = dispatcher.dispatch(
                    world,
                    handler,
                    self.worker,
                    candidate.location,
                    DispatchMode::Commit,
                ) {
                    self.exhaustion_reported = false;
                    return Some(Dispatch {
                        target: candidate.location,
                        unit,
                    });
                }
            }
        }

        if !self.exhaustion_reported {
            self.exhaustion_reported = true;
            info!(
                order = %self.id,
                worker = %self.worker,
                candidates = ranked.len(),
                "no further forced work"
            );
            notices.push(Notice::new(
                world.tick(),
                self.worker,
                NoticeKind::NoFurtherWork,
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ForcingPolicy, ObjectId};

    use crate::grid::{GridWorld, ObjectKind};
    use crate::handlers::grid_catalog;

    const ALICE: WorkerId = WorkerId(1);
    const BOB: WorkerId = WorkerId(2);

    fn config(mode: RankingMode) -> EngineConfig {
        EngineConfig {
            policy: ForcingPolicy {
                default_ranking: mode,
                ..ForcingPolicy::default()
            },
            ..EngineConfig::default()
        }
    }

    fn order_at<W: WorldView>(
        world: &W,
        handlers: Vec<HandlerKind>,
        seed: TargetLocation,
        config: &EngineConfig,
    ) -> WorkOrder {
        WorkOrder::new(
            OrderId(1),
            ALICE,
            AreaId(0),
            handlers,
            TargetRecord::discover(world, seed),
            config,
        )
    }

    fn settle(order: &mut WorkOrder, world: &GridWorld, catalog: &HandlerCatalog<GridWorld>) {
        let dispatcher = Dispatcher::new(ForcingPolicy::default());
        for _ in 0..10_000 {
            if order.step_expansion(world, catalog, &dispatcher, Adjacency::Cardinal)
                != TaskStatus::Pending
            {
                return;
            }
        }
        panic!("expansion did not settle");
    }

    #[test]
    fn expansion_discovers_connected_debris_only() {
        let mut world = GridWorld::new(12, 4);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 2..6 {
            world.add_debris(Cell::new(x, 1));
        }
        world.add_debris(Cell::new(8, 1));

        let catalog = grid_catalog();
        let config = config(RankingMode::Nearest);
        let mut order = order_at(&world, vec![HandlerKind::Clean], Cell::new(2, 1).into(), &config);
        settle(&mut order, &world, &catalog);

        assert_eq!(order.target_count(), 4);
        assert!(!order.contains(Cell::new(8, 1).into()));
        assert!(!order.is_expanding());
    }

    #[test]
    fn radius_bridges_gaps_and_restarts_expansion() {
        let mut world = GridWorld::new(12, 4);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        world.add_debris(Cell::new(2, 1));
        world.add_debris(Cell::new(4, 1));

        let catalog = grid_catalog();
        let config = config(RankingMode::Nearest);
        let mut order = order_at(&world, vec![HandlerKind::Clean], Cell::new(2, 1).into(), &config);
        settle(&mut order, &world, &catalog);
        assert_eq!(order.target_count(), 1);

        order.set_search_radius(2);
        assert!(order.is_expanding());
        settle(&mut order, &world, &catalog);
        assert_eq!(order.target_count(), 2);
    }

    #[test]
    fn object_orders_expand_across_neighbouring_objects() {
        let mut world = GridWorld::new(8, 8);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        let first = world.spawn_object(
            ObjectKind::Blueprint {
                material: contracts::MaterialKind::Wall,
            },
            Cell::new(3, 3),
        );
        for x in 4..6 {
            world.spawn_object(
                ObjectKind::Blueprint {
                    material: contracts::MaterialKind::Wall,
                },
                Cell::new(x, 3),
            );
        }
        world.spawn_object(ObjectKind::Item { haul_designated: true }, Cell::new(3, 4));

        let catalog = grid_catalog();
        let config = config(RankingMode::Smart);
        let mut order = order_at(&world, vec![HandlerKind::Construct], first.into(), &config);
        assert!(order.is_object_kind());
        settle(&mut order, &world, &catalog);
        assert_eq!(order.target_count(), 3);
        assert!(order.targets().all(|record| record.material_score() == 70));
    }

    #[test]
    fn ranking_is_total_and_repeatable() {
        let mut world = GridWorld::new(10, 10);
        world.spawn_worker(ALICE, Cell::new(5, 5));
        for x in 2..8 {
            for y in 2..8 {
                world.add_debris(Cell::new(x, y));
            }
        }
        let catalog = grid_catalog();
        for mode in [RankingMode::Smart, RankingMode::Nearest] {
            let config = config(mode);
            let mut order =
                order_at(&world, vec![HandlerKind::Clean], Cell::new(2, 2).into(), &config);
            settle(&mut order, &world, &catalog);
            let first = order.ranked_targets(&world, &config, &BTreeSet::new());
            let second = order.ranked_targets(&world, &config, &BTreeSet::new());
            assert_eq!(first.len(), 36);
            assert_eq!(first, second);
            let unique: BTreeSet<_> = first.iter().map(|ranked| ranked.location).collect();
            assert_eq!(unique.len(), first.len());
        }
    }

    #[test]
    fn smart_ranking_starts_at_dead_ends_and_leaves_the_enclosed_center() {
        let mut world = GridWorld::new(7, 7);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 2..5 {
            for y in 2..5 {
                world.add_debris(Cell::new(x, y));
            }
        }
        let catalog = grid_catalog();
        let config = config(RankingMode::Smart);
        let mut order = order_at(&world, vec![HandlerKind::Clean], Cell::new(3, 3).into(), &config);
        settle(&mut order, &world, &catalog);

        let ranked = order.ranked_targets(&world, &config, &BTreeSet::new());
        let center = ranked
            .iter()
            .find(|ranked| ranked.cell == Cell::new(3, 3))
            .expect("center ranked");
        assert_eq!(center.score, -100 * 10_000);
        assert_eq!(ranked.last().map(|ranked| ranked.cell), Some(Cell::new(3, 3)));
        // Edge middles have three planned neighbours, corners two.
        let edges = [Cell::new(2, 3), Cell::new(3, 2), Cell::new(3, 4), Cell::new(4, 3)];
        assert!(ranked[..4].iter().all(|ranked| edges.contains(&ranked.cell)));
        assert_eq!(ranked[0].cell, Cell::new(2, 3));
        assert_eq!(ranked[4].score, 10 * 10_000);
    }

    #[test]
    fn excluded_targets_are_skipped_and_count_as_blocked() {
        let mut world = GridWorld::new(8, 3);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 1..5 {
            world.add_debris(Cell::new(x, 1));
        }
        let catalog = grid_catalog();
        let config = config(RankingMode::Smart);
        let mut order = order_at(&world, vec![HandlerKind::Clean], Cell::new(1, 1).into(), &config);
        settle(&mut order, &world, &catalog);

        let excluded: BTreeSet<TargetLocation> = [TargetLocation::Cell(Cell::new(2, 1))].into();
        let ranked = order.ranked_targets(&world, &config, &excluded);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|ranked| ranked.cell != Cell::new(2, 1)));
    }

    #[test]
    fn next_unit_is_idempotent_without_mutation() {
        let mut world = GridWorld::new(8, 8);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 1..6 {
            world.add_debris(Cell::new(x, 4));
        }
        let catalog = grid_catalog();
        let config = config(RankingMode::Nearest);
        let mut order = order_at(&world, vec![HandlerKind::Clean], Cell::new(3, 4).into(), &config);
        settle(&mut order, &world, &catalog);

        let mut notices = Vec::new();
        let first = order.next_unit(&world, &catalog, &config, &BTreeSet::new(), &mut notices);
        let second = order.next_unit(&world, &catalog, &config, &BTreeSet::new(), &mut notices);
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(
            first.map(|dispatch| dispatch.target),
            Some(TargetLocation::Cell(Cell::new(1, 4)))
        );
        assert!(notices.is_empty());
    }

    #[test]
    fn exhausted_order_reports_once() {
        let mut world = GridWorld::new(8, 8);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        world.spawn_worker(BOB, Cell::new(7, 7));
        for x in 1..5 {
            let cell = Cell::new(x, 2);
            world.add_debris(cell);
            world.reserve(cell.into(), BOB);
        }
        let catalog = grid_catalog();
        let config = config(RankingMode::Nearest);
        let mut order = order_at(&world, vec![HandlerKind::Clean], Cell::new(1, 2).into(), &config);
        settle(&mut order, &world, &catalog);
        assert_eq!(order.target_count(), 4);

        let mut notices = Vec::new();
        for _ in 0..3 {
            assert!(order
                .next_unit(&world, &catalog, &config, &BTreeSet::new(), &mut notices)
                .is_none());
        }
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::NoFurtherWork);

        world.release(Cell::new(3, 2).into());
        assert!(order
            .next_unit(&world, &catalog, &config, &BTreeSet::new(), &mut notices)
            .is_some());
        world.reserve(Cell::new(3, 2).into(), BOB);
        assert!(order
            .next_unit(&world, &catalog, &config, &BTreeSet::new(), &mut notices)
            .is_none());
        assert_eq!(notices.len(), 2);
    }

    #[test]
    fn cancelled_order_stops_its_tasks() {
        let mut world = GridWorld::new(20, 3);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 0..20 {
            world.add_debris(Cell::new(x, 1));
        }
        let catalog = grid_catalog();
        let config = config(RankingMode::Nearest);
        let dispatcher = Dispatcher::new(config.policy);
        let mut order = order_at(&world, vec![HandlerKind::Clean], Cell::new(0, 1).into(), &config);
        order.step_expansion(&world, &catalog, &dispatcher, Adjacency::Cardinal);
        let discovered = order.target_count();

        order.cancel();
        assert_eq!(
            order.step_expansion(&world, &catalog, &dispatcher, Adjacency::Cardinal),
            TaskStatus::Cancelled
        );
        assert_eq!(
            order.step_contraction(&world, &catalog, &dispatcher, 8),
            TaskStatus::Cancelled
        );
        assert_eq!(order.target_count(), discovered);
        assert!(!order.is_expanding());
    }

    #[test]
    fn contraction_prunes_cleaned_and_vanished_targets() {
        let mut world = GridWorld::new(8, 8);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        let mut items = Vec::new();
        for x in 1..4 {
            items.push(world.spawn_object(
                ObjectKind::Item {
                    haul_designated: true,
                },
                Cell::new(x, 1),
            ));
        }
        let catalog = grid_catalog();
        let config = config(RankingMode::Nearest);
        let dispatcher = Dispatcher::new(config.policy);
        let mut order = order_at(&world, vec![HandlerKind::Haul], items[0].into(), &config);
        settle(&mut order, &world, &catalog);
        assert_eq!(order.target_count(), 3);

        world.remove_object(items[1]);
        order.step_contraction(&world, &catalog, &dispatcher, 8);
        assert_eq!(order.target_count(), 2);
        assert!(!order.contains(items[1].into()));
    }

    #[test]
    fn restore_drops_invalid_targets_and_unknown_handlers() {
        let mut world = GridWorld::new(8, 8);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        let kept = world.spawn_object(ObjectKind::Item { haul_designated: true }, Cell::new(2, 2));
        let catalog = grid_catalog();
        let config = config(RankingMode::Nearest);
        let mut order = order_at(
            &world,
            vec![HandlerKind::Haul, HandlerKind::Sow],
            kept.into(),
            &config,
        );
        order.targets.insert(
            ObjectId(999).into(),
            TargetRecord::restored(contracts::TargetSnapshot {
                location: ObjectId(999).into(),
                material_score: 0,
            }),
        );
        let snapshot = order.snapshot();
        assert_eq!(snapshot.targets.len(), 2);

        let restored = WorkOrder::restore(OrderId(5), ALICE, snapshot, &world, &catalog)
            .expect("one target survives");
        assert_eq!(restored.target_count(), 1);
        assert_eq!(restored.handlers(), &[HandlerKind::Haul]);

        world.remove_object(kept);
        let gone = WorkOrder::restore(OrderId(6), ALICE, order.snapshot(), &world, &catalog);
        assert!(gone.is_none());
    }
}
