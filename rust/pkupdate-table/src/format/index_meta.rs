// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use serde::{Deserialize, Serialize};

use super::EditVersion;

/// Metadata of a tablet's primary index as of an edit version.
///
/// It is committed together with the rowset metadata of the apply that
/// produced it, so a reader can tell which version the index reflects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentIndexMeta {
    pub version: EditVersion,
    /// Number of live keys.
    pub key_count: u64,
    /// Approximate memory held by the index, in bytes.
    pub memory_usage: u64,
}
