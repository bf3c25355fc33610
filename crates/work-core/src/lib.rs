//! Forced-work engine: per-worker overrides that discover connected work around
//! a seed, rank it, and keep feeding the worker until the area is exhausted.

pub mod dispatch;
pub mod driver;
pub mod frontier;
pub mod grid;
pub mod handler;
pub mod handlers;
pub mod host;
pub mod order;
pub mod registry;
pub mod scoring;
pub mod target;

pub use dispatch::{DispatchMode, Dispatcher};
pub use driver::{GridSimulation, StepReport};
pub use frontier::TaskStatus;
pub use grid::{GridObject, GridWorker, GridWorld, ObjectKind, Terrain};
pub use handler::{HandlerCatalog, InterestFilter, WorkHandler};
pub use handlers::grid_catalog;
pub use host::{JobHost, WorldView};
pub use order::{Dispatch, RankedTarget, WorkOrder};
pub use registry::{ForcedWorkRegistry, RegistryStats, WorkerPhase};
pub use target::TargetRecord;
