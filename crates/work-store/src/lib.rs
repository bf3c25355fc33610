//! Save sessions for grid simulations with SQLite persistence of the
//! forced-work registry, the world, and the notice log.

mod persistence;

use std::path::Path;

use contracts::{EngineConfig, Notice};
use tracing::{info, warn};
use work_core::{grid_catalog, ForcedWorkRegistry, GridSimulation, GridWorld, StepReport, WorldView};

use persistence::SqliteSaveStore;
pub use persistence::{SaveSlice, SaveSummary, StoreError};

pub const DEFAULT_SAVE_EVERY_TICKS: u64 = 10;

#[derive(Debug)]
struct PersistenceState {
    store: SqliteSaveStore,
    persisted_notice_count: usize,
    last_saved_tick: Option<u64>,
}

pub struct ForcedWorkSession {
    save_id: String,
    sim: GridSimulation,
    notice_log: Vec<Notice>,
    save_every_ticks: u64,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
}

impl ForcedWorkSession {
    pub fn new(save_id: impl Into<String>, world: GridWorld, config: EngineConfig) -> Self {
        Self::from_simulation(save_id, GridSimulation::new(world, config))
    }

    pub fn from_simulation(save_id: impl Into<String>, sim: GridSimulation) -> Self {
        Self {
            save_id: save_id.into(),
            sim,
            notice_log: Vec::new(),
            save_every_ticks: DEFAULT_SAVE_EVERY_TICKS,
            persistence: None,
            last_persistence_error: None,
        }
    }

    /// Reopens the latest save point of `save_id`. The registry is rebuilt
    /// against the saved world, so stale targets are dropped on the way in.
    pub fn resume_from_sqlite(
        path: impl AsRef<Path>,
        save_id: &str,
    ) -> Result<Option<Self>, StoreError> {
        let store = SqliteSaveStore::open(path)?;
        let Some(slice) = store.load_latest(save_id)? else {
            return Ok(None);
        };
        let notice_log = store.load_notices(save_id)?;

        let registry =
            ForcedWorkRegistry::restore(slice.config, grid_catalog(), slice.registry, &slice.world);
        info!(
            save_id,
            tick = slice.tick,
            workers = registry.stats().workers,
            "session resumed"
        );
        let sim = GridSimulation::from_parts(slice.world, registry);
        let persisted_notice_count = notice_log.len();
        Ok(Some(Self {
            save_id: save_id.to_string(),
            sim,
            notice_log,
            save_every_ticks: DEFAULT_SAVE_EVERY_TICKS,
            persistence: Some(PersistenceState {
                store,
                persisted_notice_count,
                last_saved_tick: Some(slice.tick),
            }),
            last_persistence_error: None,
        }))
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let store = SqliteSaveStore::open(path)?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_notice_count: 0,
            last_saved_tick: None,
        });
        Ok(())
    }

    pub fn set_save_every_ticks(&mut self, ticks: u64) {
        self.save_every_ticks = ticks.max(1);
    }

    pub fn save_id(&self) -> &str {
        &self.save_id
    }

    pub fn simulation(&self) -> &GridSimulation {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut GridSimulation {
        &mut self.sim
    }

    /// Every notice raised in this save, oldest first.
    pub fn notices(&self) -> &[Notice] {
        &self.notice_log
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    pub fn list_saves(&self) -> Result<Vec<SaveSummary>, StoreError> {
        match self.persistence.as_ref() {
            Some(state) => state.store.list_saves(),
            None => Err(StoreError::NotAttached),
        }
    }

    pub fn step(&mut self) -> StepReport {
        let report = self.sim.step();
        self.collect_notices();
        if report.tick % self.save_every_ticks == 0 {
            self.flush_persistence_if_enabled();
        }
        report
    }

    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        let mut stepped = 0;
        while stepped < max_ticks && !self.sim.is_idle() {
            self.step();
            stepped += 1;
        }
        self.collect_notices();
        self.flush_persistence_if_enabled();
        stepped
    }

    /// Writes a save point for the current tick, unless one already exists.
    pub fn flush_persistence_checked(&mut self) -> Result<(), StoreError> {
        self.collect_notices();
        let Some(state) = self.persistence.as_mut() else {
            return Err(StoreError::NotAttached);
        };

        let tick = self.sim.world().tick();
        let new_notices = &self.notice_log[state.persisted_notice_count..];
        if state.last_saved_tick == Some(tick) && new_notices.is_empty() {
            return Ok(());
        }

        let snapshot = self.sim.registry().snapshot(tick);
        state.store.persist_save(
            &self.save_id,
            tick,
            self.sim.registry().config(),
            self.sim.world(),
            &snapshot,
            new_notices,
        )?;
        state.persisted_notice_count = self.notice_log.len();
        state.last_saved_tick = Some(tick);
        self.last_persistence_error = None;
        Ok(())
    }

    fn flush_persistence_if_enabled(&mut self) {
        if self.persistence.is_none() {
            return;
        }
        if let Err(err) = self.flush_persistence_checked() {
            warn!(save_id = %self.save_id, error = %err, "save failed");
            self.last_persistence_error = Some(err.to_string());
        }
    }

    fn collect_notices(&mut self) {
        let drained = self.sim.registry_mut().drain_notices();
        self.notice_log.extend(drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Cell, NoticeKind, RankingMode, WorkerId};

    const ALICE: WorkerId = WorkerId(1);

    fn debris_world() -> GridWorld {
        let mut world = GridWorld::new(12, 6);
        world.spawn_worker(ALICE, Cell::new(0, 0));
        for x in 1..11 {
            world.add_debris(Cell::new(x, 3));
        }
        world
    }

    #[test]
    fn saves_and_resumes_mid_override() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("forced.sqlite");

        let mut session = ForcedWorkSession::new("slot-a", debris_world(), EngineConfig::default());
        session.attach_sqlite_store(&db_path).expect("attach");
        assert!(session
            .simulation_mut()
            .issue_override(ALICE, Cell::new(1, 3).into()));
        for _ in 0..4 {
            session.step();
        }
        session.flush_persistence_checked().expect("flush");
        let remaining = session.simulation().world().debris_count();
        drop(session);

        let mut resumed = ForcedWorkSession::resume_from_sqlite(&db_path, "slot-a")
            .expect("load")
            .expect("slot exists");
        assert_eq!(resumed.simulation().world().tick(), 4);
        assert_eq!(resumed.simulation().world().debris_count(), remaining);
        assert!(resumed.simulation().registry().has_active_override(ALICE));

        resumed.run_until_idle(100);
        assert_eq!(resumed.simulation().world().debris_count(), 0);
        assert!(resumed.last_persistence_error().is_none());
    }

    #[test]
    fn notices_are_appended_across_save_points() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("notices.sqlite");

        let config = EngineConfig {
            sweep_interval_ticks: 2,
            ..EngineConfig::default()
        };
        let mut session = ForcedWorkSession::new("slot-b", debris_world(), config);
        session.attach_sqlite_store(&db_path).expect("attach");
        session.set_save_every_ticks(1);
        session
            .simulation_mut()
            .issue_override(ALICE, Cell::new(1, 3).into());
        session.simulation_mut().world_mut().set_stress(ALICE, 99);
        session.step();
        session.step();
        session.step();

        assert_eq!(session.notices().len(), 1);
        assert_eq!(session.notices()[0].kind, NoticeKind::StressThreshold);

        let summaries = session.list_saves().expect("list");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].notice_count, 1);
        assert_eq!(summaries[0].latest_tick, 3);

        let resumed = ForcedWorkSession::resume_from_sqlite(&db_path, "slot-b")
            .expect("load")
            .expect("slot exists");
        assert_eq!(resumed.notices(), session.notices());
        assert!(!resumed.simulation().registry().has_active_override(ALICE));
    }

    #[test]
    fn missing_slot_resumes_as_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("empty.sqlite");
        let resumed = ForcedWorkSession::resume_from_sqlite(&db_path, "nothing").expect("open");
        assert!(resumed.is_none());
    }

    #[test]
    fn unsupported_schema_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("schema.sqlite");
        let mut store = SqliteSaveStore::open(&db_path).expect("open");
        let world = debris_world();
        let registry: ForcedWorkRegistry<GridWorld> =
            ForcedWorkRegistry::new(EngineConfig::default(), grid_catalog());
        store
            .persist_save(
                "old",
                0,
                &EngineConfig::default(),
                &world,
                &registry.snapshot(0),
                &[],
            )
            .expect("persist");
        store.force_schema("old", "0.9").expect("downgrade");

        let err = store.load_latest("old").expect_err("schema mismatch");
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
    }

    #[test]
    fn ranking_mode_survives_a_save() {
        let mut store = SqliteSaveStore::open_in_memory().expect("open");
        let world = debris_world();
        let mut registry = ForcedWorkRegistry::new(EngineConfig::default(), grid_catalog());
        registry.add_work_order(
            &world,
            ALICE,
            vec![contracts::HandlerKind::Clean],
            Cell::new(4, 3).into(),
        );
        registry.toggle_ranking_mode(ALICE);
        store
            .persist_save(
                "mode",
                7,
                registry.config(),
                &world,
                &registry.snapshot(7),
                &[],
            )
            .expect("persist");

        let slice = store.load_latest("mode").expect("load").expect("slot");
        assert_eq!(slice.tick, 7);
        let restored =
            ForcedWorkRegistry::restore(slice.config, grid_catalog(), slice.registry, &slice.world);
        assert_eq!(
            restored.active_order(ALICE).map(|order| order.ranking_mode()),
            Some(RankingMode::Nearest)
        );
    }
}
