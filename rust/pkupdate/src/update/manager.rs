// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::sync::Arc;

use moka::sync::Cache;
use pkupdate_core::Result;
use pkupdate_table::format::RowsetMeta;
use tokio::sync::Mutex;

use super::column_update_state::RowsetColumnUpdateState;
use crate::config::UpdateConfig;
use crate::tablet::Tablet;

type SharedState = Arc<Mutex<RowsetColumnUpdateState>>;

/// Cache of column partial update states, one per tablet and rowset.
///
/// Entries are weighed by [`RowsetColumnUpdateState::memory_usage`] when they
/// are inserted. A state that is locked at that moment weighs nothing.
#[derive(Clone)]
pub struct UpdateManager {
    cache: Cache<String, SharedState>,
}

impl std::fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManager")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl UpdateManager {
    pub fn new(config: &UpdateConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.update_state_cache_bytes)
            .weigher(|_, state: &SharedState| -> u32 {
                state
                    .try_lock()
                    .map(|state| state.memory_usage())
                    .unwrap_or(0)
                    .try_into()
                    .unwrap_or(u32::MAX)
            })
            .build();
        Self { cache }
    }

    fn key(tablet: &Tablet, rowset: &RowsetMeta) -> String {
        format!("{}/{}", tablet.base_path(), rowset.rowset_id)
    }

    /// The cached state of `rowset`, created unloaded if absent.
    pub fn get_or_create(&self, tablet: &Tablet, rowset: &RowsetMeta) -> SharedState {
        self.cache.get_with(Self::key(tablet, rowset), || {
            Arc::new(Mutex::new(RowsetColumnUpdateState::new(rowset.rowset_id)))
        })
    }

    pub fn get(&self, tablet: &Tablet, rowset: &RowsetMeta) -> Option<SharedState> {
        self.cache.get(&Self::key(tablet, rowset))
    }

    /// Load the state of `rowset` ahead of its apply.
    ///
    /// The apply reuses the loaded state if it is still cached, and loads
    /// again otherwise.
    pub async fn preload(&self, tablet: &Tablet, rowset: &RowsetMeta) -> Result<()> {
        let key = Self::key(tablet, rowset);
        let state = self.get_or_create(tablet, rowset);
        let loaded = {
            let mut guard = state.lock().await;
            guard
                .load(tablet, rowset, tablet.config().pk_batch_memory_limit)
                .await?;
            guard.is_loaded()
        };
        // reinsert so the entry is weighed with its keys
        if loaded {
            if let Some(cached) = self.cache.get(&key) {
                if Arc::ptr_eq(&cached, &state) {
                    self.cache.insert(key, state);
                }
            }
        }
        log::debug!(
            "preloaded rowset {} of tablet {}",
            rowset.rowset_id,
            tablet.base_path()
        );
        Ok(())
    }

    pub fn remove(&self, tablet: &Tablet, rowset: &RowsetMeta) {
        self.cache.invalidate(&Self::key(tablet, rowset));
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Total weight of the cached states, in bytes.
    pub fn memory_usage(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }
}
