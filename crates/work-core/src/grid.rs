//! In-memory grid world implementing the host seams.
//!
//! Small enough to reason about in tests and demos: one area, square cells,
//! cardinal movement, and a handful of object kinds. Reachability is a plain
//! breadth-first flood from the worker's cell; impassable targets count as
//! reachable when a worker can stand next to them.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use contracts::{
    AreaId, Cell, EndCondition, HandlerKind, MaterialKind, ObjectId, TargetLocation, WorkUnit,
    WorkerId,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::host::{JobHost, WorldView};

// ---------------------------------------------------------------------------
// World contents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    #[default]
    Open,
    Wall,
    /// Minable natural rock.
    Rock,
}

impl Terrain {
    pub fn blocks_movement(self) -> bool {
        !matches!(self, Terrain::Open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ObjectKind {
    /// A planned structure waiting to be built.
    Blueprint { material: MaterialKind },
    Item { haul_designated: bool },
    Building { material: MaterialKind },
}

impl ObjectKind {
    pub fn material(self) -> Option<MaterialKind> {
        match self {
            ObjectKind::Blueprint { material } | ObjectKind::Building { material } => {
                Some(material)
            }
            ObjectKind::Item { .. } => None,
        }
    }

    pub fn blocks_movement(self) -> bool {
        matches!(
            self,
            ObjectKind::Building {
                material: MaterialKind::Wall | MaterialKind::Column
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridObject {
    pub kind: ObjectKind,
    /// `None` once the object has been carried off the map.
    pub cell: Option<Cell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridWorker {
    pub cell: Cell,
    pub stress: u8,
    pub health_distress: u8,
    /// Categories switched off in the worker's own assignments.
    pub disabled_work: BTreeSet<HandlerKind>,
    /// Categories the worker cannot perform at all.
    pub incapable: BTreeSet<HandlerKind>,
    pub allowed_area: Option<BTreeSet<Cell>>,
    pub current: Option<WorkUnit>,
}

impl GridWorker {
    fn at(cell: Cell) -> Self {
        Self {
            cell,
            stress: 0,
            health_distress: 0,
            disabled_work: BTreeSet::new(),
            incapable: BTreeSet::new(),
            allowed_area: None,
            current: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridWorld {
    width: i32,
    height: i32,
    tick: u64,
    area: AreaId,
    #[serde(with = "contracts::serde_pairs")]
    terrain: BTreeMap<Cell, Terrain>,
    debris: BTreeSet<Cell>,
    mine_designations: BTreeSet<Cell>,
    #[serde(with = "contracts::serde_pairs")]
    objects: BTreeMap<ObjectId, GridObject>,
    next_object_id: u64,
    #[serde(with = "contracts::serde_pairs")]
    workers: BTreeMap<WorkerId, GridWorker>,
    #[serde(with = "contracts::serde_pairs")]
    reservations: BTreeMap<TargetLocation, WorkerId>,
    forbidden: BTreeSet<TargetLocation>,
    completed: Vec<WorkUnit>,
    started: u64,
    /// Endings the host produced on its own; the driver reports them back.
    endings: Vec<(WorkUnit, EndCondition)>,
}

impl GridWorld {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
            area: AreaId(0),
            terrain: BTreeMap::new(),
            debris: BTreeSet::new(),
            mine_designations: BTreeSet::new(),
            objects: BTreeMap::new(),
            next_object_id: 1,
            workers: BTreeMap::new(),
            reservations: BTreeMap::new(),
            forbidden: BTreeSet::new(),
            completed: Vec::new(),
            started: 0,
            endings: Vec::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn area(&self) -> AreaId {
        self.area
    }

    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    // --- Terrain and designations ---

    pub fn terrain(&self, cell: Cell) -> Terrain {
        self.terrain.get(&cell).copied().unwrap_or_default()
    }

    fn set_terrain(&mut self, cell: Cell, terrain: Terrain) {
        if !self.in_bounds(cell) {
            return;
        }
        match terrain {
            Terrain::Open => self.terrain.remove(&cell),
            other => self.terrain.insert(cell, other),
        };
    }

    pub fn set_wall(&mut self, cell: Cell) {
        self.set_terrain(cell, Terrain::Wall);
    }

    pub fn set_rock(&mut self, cell: Cell) {
        self.set_terrain(cell, Terrain::Rock);
    }

    pub fn set_open(&mut self, cell: Cell) {
        self.set_terrain(cell, Terrain::Open);
    }

    pub fn add_debris(&mut self, cell: Cell) {
        if self.in_bounds(cell) {
            self.debris.insert(cell);
        }
    }

    pub fn clear_debris(&mut self, cell: Cell) -> bool {
        self.debris.remove(&cell)
    }

    pub fn has_debris(&self, cell: Cell) -> bool {
        self.debris.contains(&cell)
    }

    pub fn debris_count(&self) -> usize {
        self.debris.len()
    }

    pub fn designate_mine(&mut self, cell: Cell) {
        if self.in_bounds(cell) {
            self.mine_designations.insert(cell);
        }
    }

    pub fn is_mine_designated(&self, cell: Cell) -> bool {
        self.mine_designations.contains(&cell)
    }

    pub fn forbid(&mut self, location: TargetLocation) {
        self.forbidden.insert(location);
    }

    pub fn allow(&mut self, location: TargetLocation) {
        self.forbidden.remove(&location);
    }

    // --- Objects ---

    pub fn spawn_object(&mut self, kind: ObjectKind, cell: Cell) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        self.objects.insert(
            id,
            GridObject {
                kind,
                cell: Some(cell),
            },
        );
        id
    }

    pub fn object(&self, id: ObjectId) -> Option<&GridObject> {
        self.objects.get(&id)
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Option<GridObject> {
        self.reservations.remove(&TargetLocation::Object(id));
        self.objects.remove(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &GridObject)> {
        self.objects.iter().map(|(id, object)| (*id, object))
    }

    // --- Workers ---

    pub fn spawn_worker(&mut self, worker: WorkerId, cell: Cell) {
        self.workers.insert(worker, GridWorker::at(cell));
    }

    pub fn worker(&self, worker: WorkerId) -> Option<&GridWorker> {
        self.workers.get(&worker)
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    /// Workers currently executing a unit.
    pub fn busy_workers(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, state)| state.current.is_some())
            .map(|(worker, _)| *worker)
            .collect()
    }

    pub fn remove_worker(&mut self, worker: WorkerId) -> Option<GridWorker> {
        self.reservations.retain(|_, holder| *holder != worker);
        self.workers.remove(&worker)
    }

    pub fn restrict_worker(&mut self, worker: WorkerId, cells: impl IntoIterator<Item = Cell>) {
        if let Some(state) = self.workers.get_mut(&worker) {
            state.allowed_area = Some(cells.into_iter().collect());
        }
    }

    pub fn disable_work(&mut self, worker: WorkerId, kind: HandlerKind) {
        if let Some(state) = self.workers.get_mut(&worker) {
            state.disabled_work.insert(kind);
        }
    }

    pub fn set_incapable(&mut self, worker: WorkerId, kind: HandlerKind) {
        if let Some(state) = self.workers.get_mut(&worker) {
            state.incapable.insert(kind);
        }
    }

    pub fn is_incapable(&self, worker: WorkerId, kind: HandlerKind) -> bool {
        self.workers
            .get(&worker)
            .map_or(true, |state| state.incapable.contains(&kind))
    }

    pub fn set_stress(&mut self, worker: WorkerId, level: u8) {
        if let Some(state) = self.workers.get_mut(&worker) {
            state.stress = level.min(100);
        }
    }

    pub fn set_health_distress(&mut self, worker: WorkerId, level: u8) {
        if let Some(state) = self.workers.get_mut(&worker) {
            state.health_distress = level.min(100);
        }
    }

    // --- Claims ---

    pub fn reserve(&mut self, location: TargetLocation, worker: WorkerId) {
        self.reservations.insert(location, worker);
    }

    pub fn release(&mut self, location: TargetLocation) {
        self.reservations.remove(&location);
    }

    pub fn holder(&self, location: TargetLocation) -> Option<WorkerId> {
        self.reservations.get(&location).copied()
    }

    // --- Units of work ---

    pub fn current_unit(&self, worker: WorkerId) -> Option<&WorkUnit> {
        self.workers.get(&worker)?.current.as_ref()
    }

    pub fn is_idle(&self, worker: WorkerId) -> bool {
        self.current_unit(worker).is_none()
    }

    pub fn completed(&self) -> &[WorkUnit] {
        &self.completed
    }

    pub fn started_count(&self) -> u64 {
        self.started
    }

    /// Finishes the worker's unit: applies its effect, moves the worker to the
    /// target (or next to it when the result is impassable) and releases the claim.
    pub fn complete_current(&mut self, worker: WorkerId) -> Option<WorkUnit> {
        let unit = self.workers.get_mut(&worker)?.current.take()?;
        self.release_held(worker, unit.target);
        let cell = self.location_cell(unit.target);
        self.apply(&unit);
        if let Some(cell) = cell {
            self.move_worker_to(worker, cell);
        }
        trace!(%worker, unit = %unit, "unit completed");
        self.completed.push(unit.clone());
        Some(unit)
    }

    /// Stops the worker's unit without effect. The caller reports the ending.
    pub fn interrupt_current(&mut self, worker: WorkerId) -> Option<WorkUnit> {
        let unit = self.workers.get_mut(&worker)?.current.take()?;
        self.release_held(worker, unit.target);
        Some(unit)
    }

    pub fn drain_endings(&mut self) -> Vec<(WorkUnit, EndCondition)> {
        std::mem::take(&mut self.endings)
    }

    fn release_held(&mut self, worker: WorkerId, location: TargetLocation) {
        if self.reservations.get(&location) == Some(&worker) {
            self.reservations.remove(&location);
        }
    }

    fn apply(&mut self, unit: &WorkUnit) {
        match (unit.handler, unit.target) {
            (HandlerKind::Clean, TargetLocation::Cell(cell)) => {
                self.debris.remove(&cell);
            }
            (HandlerKind::Mine, TargetLocation::Cell(cell)) => {
                if self.terrain(cell) == Terrain::Rock {
                    self.set_open(cell);
                }
                self.mine_designations.remove(&cell);
            }
            (HandlerKind::Construct, TargetLocation::Object(id)) => {
                if let Some(object) = self.objects.get_mut(&id) {
                    if let ObjectKind::Blueprint { material } = object.kind {
                        object.kind = ObjectKind::Building { material };
                    }
                }
            }
            (HandlerKind::Haul, TargetLocation::Object(id)) => {
                if let Some(object) = self.objects.get_mut(&id) {
                    if matches!(object.kind, ObjectKind::Item { .. }) {
                        object.cell = None;
                    }
                }
            }
            _ => {}
        }
    }

    fn move_worker_to(&mut self, worker: WorkerId, target: Cell) {
        let Some(from) = self.worker_cell(worker) else {
            return;
        };
        let destination = if !self.blocks_movement(target) {
            Some(target)
        } else {
            let reach = self.reachable_from(from);
            target
                .cardinal_neighbours()
                .into_iter()
                .find(|cell| reach.contains(cell))
        };
        if let (Some(cell), Some(state)) = (destination, self.workers.get_mut(&worker)) {
            state.cell = cell;
        }
    }

    // --- Movement ---

    /// Every cell the flood from `start` reaches with cardinal steps.
    pub fn reachable_from(&self, start: Cell) -> BTreeSet<Cell> {
        let mut seen = BTreeSet::new();
        if !self.in_bounds(start) {
            return seen;
        }
        seen.insert(start);
        let mut queue = VecDeque::from([start]);
        while let Some(cell) = queue.pop_front() {
            for next in cell.cardinal_neighbours() {
                if self.in_bounds(next) && !self.blocks_movement(next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// ASCII map, north at the top.
    pub fn render(&self) -> String {
        let workers: BTreeSet<Cell> = self.workers.values().map(|state| state.cell).collect();
        let mut out = String::new();
        for y in (0..self.height).rev() {
            for x in 0..self.width {
                let cell = Cell::new(x, y);
                out.push(self.glyph(cell, workers.contains(&cell)));
            }
            out.push('\n');
        }
        out
    }

    fn glyph(&self, cell: Cell, worker_here: bool) -> char {
        if worker_here {
            return '@';
        }
        match self.terrain(cell) {
            Terrain::Wall => return '#',
            Terrain::Rock if self.is_mine_designated(cell) => return '*',
            Terrain::Rock => return '%',
            Terrain::Open => {}
        }
        let kinds: Vec<ObjectKind> = self
            .objects
            .values()
            .filter(|object| object.cell == Some(cell))
            .map(|object| object.kind)
            .collect();
        if kinds.iter().any(|kind| kind.blocks_movement()) {
            return 'W';
        }
        if kinds.iter().any(|kind| matches!(kind, ObjectKind::Blueprint { .. })) {
            return 'b';
        }
        if kinds.iter().any(|kind| matches!(kind, ObjectKind::Item { .. })) {
            return 'i';
        }
        if kinds.iter().any(|kind| matches!(kind, ObjectKind::Building { .. })) {
            return 'B';
        }
        if self.has_debris(cell) {
            return '~';
        }
        '.'
    }
}

// ---------------------------------------------------------------------------
// Host seams
// ---------------------------------------------------------------------------

impl WorldView for GridWorld {
    fn tick(&self) -> u64 {
        self.tick
    }

    fn in_bounds(&self, cell: Cell) -> bool {
        (0..self.width).contains(&cell.x) && (0..self.height).contains(&cell.y)
    }

    fn blocks_movement(&self, cell: Cell) -> bool {
        self.terrain(cell).blocks_movement()
            || self
                .objects
                .values()
                .any(|object| object.cell == Some(cell) && object.kind.blocks_movement())
    }

    fn object_exists(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    fn object_cell(&self, id: ObjectId) -> Option<Cell> {
        self.objects.get(&id)?.cell
    }

    fn objects_at(&self, cell: Cell) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, object)| object.cell == Some(cell))
            .map(|(id, _)| *id)
            .collect()
    }

    fn material_kinds(&self, location: TargetLocation) -> Vec<MaterialKind> {
        match location {
            TargetLocation::Object(id) => self
                .objects
                .get(&id)
                .and_then(|object| object.kind.material())
                .into_iter()
                .collect(),
            TargetLocation::Cell(cell) => self
                .objects
                .values()
                .filter(|object| object.cell == Some(cell))
                .filter(|object| matches!(object.kind, ObjectKind::Blueprint { .. }))
                .filter_map(|object| object.kind.material())
                .collect(),
        }
    }

    fn worker_exists(&self, worker: WorkerId) -> bool {
        self.workers.contains_key(&worker)
    }

    fn worker_cell(&self, worker: WorkerId) -> Option<Cell> {
        self.workers.get(&worker).map(|state| state.cell)
    }

    fn worker_area(&self, worker: WorkerId) -> Option<AreaId> {
        self.workers.contains_key(&worker).then_some(self.area)
    }

    fn work_enabled(&self, worker: WorkerId, kind: HandlerKind) -> bool {
        self.workers
            .get(&worker)
            .map_or(false, |state| !state.disabled_work.contains(&kind))
    }

    fn can_reach(&self, worker: WorkerId, location: TargetLocation) -> bool {
        let (Some(from), Some(to)) = (self.worker_cell(worker), self.location_cell(location))
        else {
            return false;
        };
        if !self.in_bounds(to) {
            return false;
        }
        let reach = self.reachable_from(from);
        if self.blocks_movement(to) {
            to.cardinal_neighbours()
                .iter()
                .any(|cell| reach.contains(cell))
        } else {
            reach.contains(&to)
        }
    }

    fn claimed_by_other(&self, worker: WorkerId, location: TargetLocation) -> bool {
        self.reservations
            .get(&location)
            .map_or(false, |holder| *holder != worker)
    }

    fn is_forbidden(&self, location: TargetLocation) -> bool {
        self.forbidden.contains(&location)
    }

    fn in_allowed_area(&self, worker: WorkerId, cell: Cell) -> bool {
        match self.workers.get(&worker) {
            Some(state) => state
                .allowed_area
                .as_ref()
                .map_or(true, |area| area.contains(&cell)),
            None => false,
        }
    }

    fn stress_level(&self, worker: WorkerId) -> u8 {
        self.workers.get(&worker).map_or(0, |state| state.stress)
    }

    fn health_distress(&self, worker: WorkerId) -> u8 {
        self.workers
            .get(&worker)
            .map_or(0, |state| state.health_distress)
    }
}

impl JobHost for GridWorld {
    fn start_unit(&mut self, unit: WorkUnit) {
        let worker = unit.worker;
        let Some(previous) = self.workers.get_mut(&worker).map(|state| state.current.take()) else {
            return;
        };
        if let Some(previous) = previous {
            self.release_held(worker, previous.target);
        }
        self.reservations.insert(unit.target, worker);
        self.started += 1;
        trace!(%worker, unit = %unit, "unit started");
        if let Some(state) = self.workers.get_mut(&worker) {
            state.current = Some(unit);
        }
    }

    fn force_end_unit(&mut self, worker: WorkerId) {
        if let Some(unit) = self.interrupt_current(worker) {
            self.endings.push((unit, EndCondition::InterruptedForced));
        }
    }
}
