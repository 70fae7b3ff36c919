// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::sync::LazyLock;

use pkupdate_core::utils::parse::{env_flag, env_or};

/// Default key budget of one primary-key batch: 64 MiB.
pub static DEFAULT_PK_BATCH_MEMORY_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_or("PKUPDATE_PK_BATCH_MEMORY_LIMIT", 64 * 1024 * 1024));

/// Default capacity of the update state cache: 1 GiB.
pub static DEFAULT_UPDATE_STATE_CACHE_BYTES: LazyLock<u64> =
    LazyLock::new(|| env_or("PKUPDATE_UPDATE_STATE_CACHE_BYTES", 1024 * 1024 * 1024));

pub static DEFAULT_DELTA_FILE_COMPRESSION: LazyLock<bool> =
    LazyLock::new(|| env_flag("PKUPDATE_DELTA_FILE_COMPRESSION", true));

/// Tuning knobs of the partial update engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Upper bound, in encoded key bytes, of one primary-key batch.
    pub pk_batch_memory_limit: usize,
    /// Capacity of the [`crate::update::UpdateManager`] cache, weighed by the
    /// memory each loaded state holds.
    pub update_state_cache_bytes: u64,
    /// Compress written segment, update and delta column files with zstd.
    pub compress_files: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            pk_batch_memory_limit: *DEFAULT_PK_BATCH_MEMORY_LIMIT,
            update_state_cache_bytes: *DEFAULT_UPDATE_STATE_CACHE_BYTES,
            compress_files: *DEFAULT_DELTA_FILE_COMPRESSION,
        }
    }
}

impl UpdateConfig {
    pub fn with_pk_batch_memory_limit(mut self, bytes: usize) -> Self {
        self.pk_batch_memory_limit = bytes;
        self
    }

    pub fn with_update_state_cache_bytes(mut self, bytes: u64) -> Self {
        self.update_state_cache_bytes = bytes;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress_files = compress;
        self
    }
}
