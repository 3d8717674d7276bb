//! Durable fallback store
//!
//! A flat key/value store. Positions are written under the shared key scheme in
//! [`shelf_common::keys`], the same keys the host writes through the primary
//! channel, so either path leaves identical recoverable state.

use crate::db::settings;
use crate::error::{Error, Result};
use async_trait::async_trait;
use shelf_common::keys;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Flat key/value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write every entry, atomically where the backend allows
    async fn put_all(&self, entries: &[(String, String)]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// [`KeyValueStore`] over the SQLite `settings` table
#[derive(Debug, Clone)]
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        settings::get_setting::<String>(&self.pool, key).await
    }

    async fn put_all(&self, entries: &[(String, String)]) -> Result<()> {
        settings::set_settings(&self.pool, entries).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        settings::delete_setting(&self.pool, key).await
    }
}

/// A position read back from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedPosition {
    pub track_index: usize,
    pub position_ms: u64,
}

/// Position reads and writes under the shared key scheme
#[derive(Clone)]
pub struct PositionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl PositionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Underlying key/value store
    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Write `group_pos_`, `track_idx_` and `track_pos_` for a group
    pub async fn write_position(&self, group_id: &str, track_index: usize, position_ms: u64) -> Result<()> {
        let entries = keys::position_entries(group_id, track_index, position_ms);
        self.kv.put_all(&entries).await
    }

    /// Last saved position of a group
    ///
    /// The per-track key wins over the group key for the offset.
    pub async fn read_position(&self, group_id: &str) -> Result<Option<SavedPosition>> {
        let Some(index) = self.kv.get(&keys::track_index_key(group_id)).await? else {
            return Ok(None);
        };
        let track_index = parse_number::<usize>(&keys::track_index_key(group_id), &index)?;

        let position = match self
            .kv
            .get(&keys::track_position_key(group_id, track_index))
            .await?
        {
            Some(value) => Some(value),
            None => self.kv.get(&keys::group_position_key(group_id)).await?,
        };
        let position_ms = match position {
            Some(value) => parse_number::<u64>(&keys::group_position_key(group_id), &value)?,
            None => 0,
        };

        Ok(Some(SavedPosition {
            track_index,
            position_ms,
        }))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Store(format!("invalid value '{}' at key '{}'", value, key)))
}
