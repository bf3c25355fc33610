//! Persisted registry state, round-tripped across save/restore.

use serde::{Deserialize, Serialize};

use crate::config::RankingMode;
use crate::{AreaId, HandlerKind, TargetLocation, WorkerId, SCHEMA_VERSION_V1};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub schema_version: String,
    pub tick: u64,
    pub workers: Vec<WorkerQueueSnapshot>,
}

impl RegistrySnapshot {
    pub fn empty(tick: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tick,
            workers: Vec::new(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.workers.iter().map(|queue| queue.orders.len()).sum()
    }
}

/// One worker's queue, active order first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerQueueSnapshot {
    pub worker: WorkerId,
    pub orders: Vec<WorkOrderSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkOrderSnapshot {
    pub area: AreaId,
    pub handlers: Vec<HandlerKind>,
    pub targets: Vec<TargetSnapshot>,
    pub is_object_kind: bool,
    pub search_radius: u32,
    pub ranking_mode: RankingMode,
    pub initialized: bool,
    /// Unfinished expansion progress; `None` once the frontier has stabilised.
    #[serde(default)]
    pub expansion: Option<FrontierSnapshot>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetSnapshot {
    pub location: TargetLocation,
    pub material_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FrontierSnapshot {
    pub frontier: Vec<TargetLocation>,
    pub visited: Vec<TargetLocation>,
}
