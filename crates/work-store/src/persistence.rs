use std::path::Path;

use contracts::{ConfigError, EngineConfig, Notice, RegistrySnapshot, SCHEMA_VERSION_V1};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use work_core::GridWorld;

/// Everything needed to resume one save slot.
#[derive(Debug, Clone)]
pub struct SaveSlice {
    pub save_id: String,
    pub tick: u64,
    pub config: EngineConfig,
    pub world: GridWorld,
    pub registry: RegistrySnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub save_id: String,
    pub schema_version: String,
    pub latest_tick: u64,
    pub notice_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("stored config is invalid: {0}")]
    Config(#[from] ConfigError),
    #[error("save {save_id} uses unsupported schema {found}")]
    SchemaMismatch { save_id: String, found: String },
    #[error("sqlite store is not attached")]
    NotAttached,
}

#[derive(Debug)]
pub struct SqliteSaveStore {
    conn: Connection,
}

impl SqliteSaveStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Writes one save point: the slot row, world and registry payloads at
    /// `tick`, and the notices raised since the previous save point.
    pub fn persist_save(
        &mut self,
        save_id: &str,
        tick: u64,
        config: &EngineConfig,
        world: &GridWorld,
        registry: &RegistrySnapshot,
        new_notices: &[Notice],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        let config_json = serde_json::to_string(config)?;
        tx.execute(
            "INSERT INTO saves (
                save_id,
                schema_version,
                config_json,
                latest_tick,
                created_at,
                updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(save_id) DO UPDATE SET
                schema_version = excluded.schema_version,
                config_json = excluded.config_json,
                latest_tick = excluded.latest_tick,
                updated_at = excluded.updated_at",
            params![
                save_id,
                SCHEMA_VERSION_V1,
                config_json,
                to_sql_u64(tick),
                tick_stamp(tick),
                tick_stamp(tick),
            ],
        )?;

        let world_json = serde_json::to_string(world)?;
        let registry_json = serde_json::to_string(registry)?;
        tx.execute(
            "INSERT OR REPLACE INTO save_points (
                save_id,
                tick,
                world_json,
                registry_json,
                order_count,
                created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                save_id,
                to_sql_u64(tick),
                world_json,
                registry_json,
                i64::try_from(registry.order_count()).unwrap_or(i64::MAX),
                tick_stamp(tick),
            ],
        )?;

        let next_sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence) + 1, 0) FROM notices WHERE save_id = ?1",
            params![save_id],
            |row| row.get(0),
        )?;
        for (offset, notice) in new_notices.iter().enumerate() {
            let payload_json = serde_json::to_string(notice)?;
            tx.execute(
                "INSERT INTO notices (
                    save_id,
                    sequence,
                    tick,
                    worker_id,
                    kind,
                    payload_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    save_id,
                    next_sequence + i64::try_from(offset).unwrap_or(i64::MAX),
                    to_sql_u64(notice.tick),
                    to_sql_u64(notice.worker.0),
                    format!("{:?}", notice.kind),
                    payload_json,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_latest(&self, save_id: &str) -> Result<Option<SaveSlice>, StoreError> {
        let slot: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT schema_version, config_json FROM saves WHERE save_id = ?1",
                params![save_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((schema_version, config_json)) = slot else {
            return Ok(None);
        };
        if schema_version != SCHEMA_VERSION_V1 {
            return Err(StoreError::SchemaMismatch {
                save_id: save_id.to_string(),
                found: schema_version,
            });
        }
        let config: EngineConfig = serde_json::from_str(&config_json)?;
        config.validate()?;

        let point: Option<(i64, String, String)> = self
            .conn
            .query_row(
                "SELECT tick, world_json, registry_json
                 FROM save_points
                 WHERE save_id = ?1
                 ORDER BY tick DESC
                 LIMIT 1",
                params![save_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((tick, world_json, registry_json)) = point else {
            return Ok(None);
        };

        Ok(Some(SaveSlice {
            save_id: save_id.to_string(),
            tick: from_sql_u64(tick),
            config,
            world: serde_json::from_str(&world_json)?,
            registry: serde_json::from_str(&registry_json)?,
        }))
    }

    pub fn load_notices(&self, save_id: &str) -> Result<Vec<Notice>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json
             FROM notices
             WHERE save_id = ?1
             ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![save_id], |row| row.get::<_, String>(0))?;

        let mut notices = Vec::new();
        for row in rows {
            let payload = row?;
            notices.push(serde_json::from_str::<Notice>(&payload)?);
        }
        Ok(notices)
    }

    pub fn list_saves(&self) -> Result<Vec<SaveSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.save_id,
                    s.schema_version,
                    s.latest_tick,
                    (SELECT COUNT(*) FROM notices n WHERE n.save_id = s.save_id)
             FROM saves s
             ORDER BY s.save_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SaveSummary {
                save_id: row.get(0)?,
                schema_version: row.get(1)?,
                latest_tick: from_sql_u64(row.get(2)?),
                notice_count: from_sql_u64(row.get(3)?),
            })
        })?;

        let mut saves = Vec::new();
        for row in rows {
            saves.push(row?);
        }
        Ok(saves)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS saves (
                save_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                config_json TEXT NOT NULL,
                latest_tick INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS save_points (
                save_id TEXT NOT NULL REFERENCES saves(save_id),
                tick INTEGER NOT NULL,
                world_json TEXT NOT NULL,
                registry_json TEXT NOT NULL,
                order_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (save_id, tick)
            );

            CREATE TABLE IF NOT EXISTS notices (
                save_id TEXT NOT NULL REFERENCES saves(save_id),
                sequence INTEGER NOT NULL,
                tick INTEGER NOT NULL,
                worker_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (save_id, sequence)
            );

            CREATE INDEX IF NOT EXISTS idx_save_points_save_tick ON save_points(save_id, tick);
            CREATE INDEX IF NOT EXISTS idx_notices_save_tick ON notices(save_id, tick);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', 'tick-000000')",
            [],
        )?;

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_schema(&self, save_id: &str, schema: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE saves SET schema_version = ?2 WHERE save_id = ?1",
            params![save_id, schema],
        )?;
        Ok(())
    }
}

fn to_sql_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn tick_stamp(tick: u64) -> String {
    format!("tick-{tick:06}")
}
