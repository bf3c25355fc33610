//! v1 cross-boundary contracts for the forced-work engine, its store, and the CLI.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod persist;
pub mod serde_pairs;

pub use config::{Adjacency, ConfigError, EngineConfig, ForcingPolicy, RankingMode};
pub use persist::{
    FrontierSnapshot, RegistrySnapshot, TargetSnapshot, WorkOrderSnapshot, WorkerQueueSnapshot,
};

pub const SCHEMA_VERSION_V1: &str = "1.0";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

/// A map (or other self-contained region) that workers and targets live on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct AreaId(pub u32);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker:{}", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object:{}", self.0)
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "area:{}", self.0)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

/// Cardinal offsets in north, east, south, west order.
pub const CARDINAL_OFFSETS: [(i32, i32); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

/// Diagonal offsets in north-east, south-east, south-west, north-west order.
pub const DIAGONAL_OFFSETS: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, -1), (-1, 1)];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn distance_squared(self, other: Cell) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx * dx + dy * dy
    }

    pub fn cardinal_neighbours(self) -> [Cell; 4] {
        CARDINAL_OFFSETS.map(|(dx, dy)| self.offset(dx, dy))
    }

    pub fn diagonal_neighbours(self) -> [Cell; 4] {
        DIAGONAL_OFFSETS.map(|(dx, dy)| self.offset(dx, dy))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Where a unit of work happens: a bare grid cell or a referenced object.
///
/// Ordering puts every cell before every object, which keeps target sets keyed by
/// location iterating deterministically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetLocation {
    Cell(Cell),
    Object(ObjectId),
}

impl TargetLocation {
    pub fn is_object(&self) -> bool {
        matches!(self, TargetLocation::Object(_))
    }

    pub fn as_cell(&self) -> Option<Cell> {
        match self {
            TargetLocation::Cell(cell) => Some(*cell),
            TargetLocation::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            TargetLocation::Object(id) => Some(*id),
            TargetLocation::Cell(_) => None,
        }
    }
}

impl From<Cell> for TargetLocation {
    fn from(cell: Cell) -> Self {
        TargetLocation::Cell(cell)
    }
}

impl From<ObjectId> for TargetLocation {
    fn from(id: ObjectId) -> Self {
        TargetLocation::Object(id)
    }
}

impl fmt::Display for TargetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetLocation::Cell(cell) => write!(f, "cell{cell}"),
            TargetLocation::Object(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Work categories
// ---------------------------------------------------------------------------

/// Work categories a capability handler can serve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Clean,
    Firefight,
    Sow,
    Harvest,
    Construct,
    DeliverResources,
    Haul,
    Repair,
    BuildRoof,
    RemoveRoof,
    SmoothFloor,
    RemoveFloor,
    Mine,
    Refuel,
    Strip,
    AssignBed,
    Deconstruct,
    Uninstall,
}

/// How forcing treats a handler category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForcingTag {
    /// Normal gates always apply.
    Standard,
    /// Interest filter may be coerced and forbidden/restricted-area gates may be
    /// bypassed when the policy allows it.
    Ignorable,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 18] = [
        HandlerKind::Clean,
        HandlerKind::Firefight,
        HandlerKind::Sow,
        HandlerKind::Harvest,
        HandlerKind::Construct,
        HandlerKind::DeliverResources,
        HandlerKind::Haul,
        HandlerKind::Repair,
        HandlerKind::BuildRoof,
        HandlerKind::RemoveRoof,
        HandlerKind::SmoothFloor,
        HandlerKind::RemoveFloor,
        HandlerKind::Mine,
        HandlerKind::Refuel,
        HandlerKind::Strip,
        HandlerKind::AssignBed,
        HandlerKind::Deconstruct,
        HandlerKind::Uninstall,
    ];

    pub const fn forcing_tag(self) -> ForcingTag {
        match self {
            HandlerKind::Haul
            | HandlerKind::Repair
            | HandlerKind::BuildRoof
            | HandlerKind::RemoveRoof
            | HandlerKind::SmoothFloor
            | HandlerKind::RemoveFloor
            | HandlerKind::Mine
            | HandlerKind::Refuel
            | HandlerKind::Strip
            | HandlerKind::AssignBed
            | HandlerKind::Deconstruct
            | HandlerKind::Uninstall => ForcingTag::Ignorable,
            HandlerKind::Clean
            | HandlerKind::Firefight
            | HandlerKind::Sow
            | HandlerKind::Harvest
            | HandlerKind::Construct
            | HandlerKind::DeliverResources => ForcingTag::Standard,
        }
    }

    pub const fn is_ignorable(self) -> bool {
        matches!(self.forcing_tag(), ForcingTag::Ignorable)
    }

    pub const fn label(self) -> &'static str {
        match self {
            HandlerKind::Clean => "clean",
            HandlerKind::Firefight => "firefight",
            HandlerKind::Sow => "sow",
            HandlerKind::Harvest => "harvest",
            HandlerKind::Construct => "construct",
            HandlerKind::DeliverResources => "deliver_resources",
            HandlerKind::Haul => "haul",
            HandlerKind::Repair => "repair",
            HandlerKind::BuildRoof => "build_roof",
            HandlerKind::RemoveRoof => "remove_roof",
            HandlerKind::SmoothFloor => "smooth_floor",
            HandlerKind::RemoveFloor => "remove_floor",
            HandlerKind::Mine => "mine",
            HandlerKind::Refuel => "refuel",
            HandlerKind::Strip => "strip",
            HandlerKind::AssignBed => "assign_bed",
            HandlerKind::Deconstruct => "deconstruct",
            HandlerKind::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structure or item kinds that feed the construction-order tie-break.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    PowerConduit,
    PowerNode,
    Wall,
    Door,
    Column,
    Floor,
    Production,
    Furniture,
    Decoration,
    Other,
}

// ---------------------------------------------------------------------------
// Units of work and their endings
// ---------------------------------------------------------------------------

/// A concrete unit of work produced by a capability handler for one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkUnit {
    pub worker: WorkerId,
    pub handler: HandlerKind,
    pub target: TargetLocation,
    pub label: String,
}

impl WorkUnit {
    pub fn new(worker: WorkerId, handler: HandlerKind, target: TargetLocation) -> Self {
        Self {
            worker,
            handler,
            target,
            label: format!("{handler} {target}"),
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.worker, self.label)
    }
}

/// Why a unit of work ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndCondition {
    Succeeded,
    /// Something outside the forced-work engine forcibly stopped the unit.
    InterruptedForced,
    InterruptedOptional,
    Incompletable,
    Errored,
}

impl EndCondition {
    pub fn is_success(self) -> bool {
        matches!(self, EndCondition::Succeeded)
    }

    pub fn is_external_interruption(self) -> bool {
        matches!(self, EndCondition::InterruptedForced)
    }
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    NoFurtherWork,
    InterruptedExternally,
    StressThreshold,
    HealthThreshold,
}

/// A user-visible message produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub tick: u64,
    pub worker: WorkerId,
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(tick: u64, worker: WorkerId, kind: NoticeKind) -> Self {
        let message = match kind {
            NoticeKind::NoFurtherWork => format!("{worker} found no further forced work"),
            NoticeKind::InterruptedExternally => {
                format!("{worker} was interrupted; forced work cancelled")
            }
            NoticeKind::StressThreshold => {
                format!("{worker} is under too much stress; forced work cancelled")
            }
            NoticeKind::HealthThreshold => {
                format!("{worker} is in poor health; forced work cancelled")
            }
        };
        Self {
            tick,
            worker,
            kind,
            message,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[tick {}] {}", self.tick, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_locations_order_cells_before_objects() {
        let cell = TargetLocation::Cell(Cell::new(50, 50));
        let object = TargetLocation::Object(ObjectId(0));
        assert!(cell < object);
        assert!(TargetLocation::Cell(Cell::new(0, 1)) < TargetLocation::Cell(Cell::new(1, 0)));
    }

    #[test]
    fn ignorable_tag_table_matches_forcing_categories() {
        let ignorable = HandlerKind::ALL
            .iter()
            .filter(|kind| kind.is_ignorable())
            .count();
        assert_eq!(ignorable, 12);
        assert!(HandlerKind::Haul.is_ignorable());
        assert!(HandlerKind::Mine.is_ignorable());
        assert!(!HandlerKind::Clean.is_ignorable());
        assert!(!HandlerKind::Construct.is_ignorable());
    }

    #[test]
    fn target_location_serializes_with_variant_name() {
        let location = TargetLocation::Cell(Cell::new(3, -2));
        let json = serde_json::to_string(&location).expect("serialize");
        assert_eq!(json, r#"{"cell":{"x":3,"y":-2}}"#);
        let object: TargetLocation =
            serde_json::from_str(r#"{"object":12}"#).expect("deserialize");
        assert_eq!(object, TargetLocation::Object(ObjectId(12)));
    }

    #[test]
    fn only_forced_interruption_counts_as_external() {
        assert!(EndCondition::InterruptedForced.is_external_interruption());
        assert!(!EndCondition::InterruptedOptional.is_external_interruption());
        assert!(!EndCondition::Succeeded.is_external_interruption());
    }

    #[test]
    fn notice_message_names_the_worker() {
        let notice = Notice::new(12, WorkerId(4), NoticeKind::StressThreshold);
        assert!(notice.message.contains("worker:4"));
        assert!(notice.message.contains("stress"));
        assert_eq!(notice.to_string(), format!("[tick 12] {}", notice.message));
    }
}
