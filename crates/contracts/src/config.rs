//! Engine configuration and forcing policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SCHEMA_VERSION_V1;

/// Target ordering used when picking the next unit of work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    /// Neighbour topology first, so construction proceeds from the outside in.
    #[default]
    Smart,
    /// Closest targets first.
    Nearest,
}

impl RankingMode {
    pub fn toggled(self) -> Self {
        match self {
            RankingMode::Smart => RankingMode::Nearest,
            RankingMode::Nearest => RankingMode::Smart,
        }
    }
}

/// Neighbourhood used by expansion when no explicit search radius is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Adjacency {
    #[default]
    Cardinal,
    Octile,
}

/// Policy flags that relax normal dispatch gates while a worker is forced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForcingPolicy {
    /// Ignorable handler kinds may work on forbidden targets.
    pub ignore_forbidden: bool,
    /// Ignorable handler kinds may work outside the worker's allowed area.
    pub ignore_restricted_area: bool,
    /// Forced work does not require the worker to have the category enabled.
    pub ignore_assignment_priority: bool,
    /// Ignorable handler kinds fall back to a manual interest test when their own
    /// filter rejects a target.
    pub coerce_ignorable_filters: bool,
    pub default_ranking: RankingMode,
}

impl Default for ForcingPolicy {
    fn default() -> Self {
        Self {
            ignore_forbidden: true,
            ignore_restricted_area: true,
            ignore_assignment_priority: true,
            coerce_ignorable_filters: true,
            default_ranking: RankingMode::Smart,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub schema_version: String,
    #[serde(default)]
    pub policy: ForcingPolicy,
    #[serde(default)]
    pub adjacency: Adjacency,
    /// Zero means plain adjacency.
    pub default_search_radius: u32,
    pub max_search_radius: u32,
    /// Distance beyond which nearest-mode ranking stops discriminating.
    pub nearest_max_range: u32,
    /// Targets re-validated per contraction step.
    pub contraction_batch: usize,
    /// Expansion steps taken per order per frame.
    pub expansion_steps_per_frame: usize,
    pub contraction_interval_ticks: u64,
    pub sweep_interval_ticks: u64,
    /// Stress level (0-100) above which forced work is cancelled.
    pub stress_threshold: u8,
    /// Health distress level (0-100) above which forced work is cancelled.
    pub health_threshold: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            policy: ForcingPolicy::default(),
            adjacency: Adjacency::Cardinal,
            default_search_radius: 0,
            max_search_radius: 16,
            nearest_max_range: 200,
            contraction_batch: 8,
            expansion_steps_per_frame: 1,
            contraction_interval_ticks: 1,
            sweep_interval_ticks: 60,
            stress_threshold: 80,
            health_threshold: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported schema version {0}")]
    UnsupportedSchema(String),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("default search radius {default} exceeds max search radius {max}")]
    RadiusOutOfRange { default: u32, max: u32 },
    #[error("{field} must be at most 100, got {value}")]
    ThresholdOutOfRange { field: &'static str, value: u8 },
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != SCHEMA_VERSION_V1 {
            return Err(ConfigError::UnsupportedSchema(self.schema_version.clone()));
        }
        if self.contraction_batch == 0 {
            return Err(ConfigError::Zero {
                field: "contraction_batch",
            });
        }
        if self.expansion_steps_per_frame == 0 {
            return Err(ConfigError::Zero {
                field: "expansion_steps_per_frame",
            });
        }
        if self.contraction_interval_ticks == 0 {
            return Err(ConfigError::Zero {
                field: "contraction_interval_ticks",
            });
        }
        if self.sweep_interval_ticks == 0 {
            return Err(ConfigError::Zero {
                field: "sweep_interval_ticks",
            });
        }
        if self.default_search_radius > self.max_search_radius {
            return Err(ConfigError::RadiusOutOfRange {
                default: self.default_search_radius,
                max: self.max_search_radius,
            });
        }
        if self.stress_threshold > 100 {
            return Err(ConfigError::ThresholdOutOfRange {
                field: "stress_threshold",
                value: self.stress_threshold,
            });
        }
        if self.health_threshold > 100 {
            return Err(ConfigError::ThresholdOutOfRange {
                field: "health_threshold",
                value: self.health_threshold,
            });
        }
        Ok(())
    }

    /// Squared nearest-mode range, the ceiling of the distance term.
    pub fn nearest_max_range_squared(&self) -> i64 {
        let range = i64::from(self.nearest_max_range);
        range * range
    }
}
