// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use pkupdate_core::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use snafu::location;

/// Globally unique identifier of a rowset, used to name its files.
///
/// This is different from the tablet-local sequence id (`rssid`) which the
/// primary index stores to save memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowsetId {
    pub hi: u64,
    pub lo: u64,
}

impl RowsetId {
    pub fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self::new(rng.gen(), rng.gen())
    }
}

impl std::fmt::Display for RowsetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

/// One physical column-oriented file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFile {
    /// Path of the file relative to the tablet root.
    pub path: String,
    pub num_rows: u64,
    /// Encoded size of the file in bytes.
    pub data_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowsetKind {
    /// Every segment holds complete rows.
    Full,
    /// Update files hold the key columns plus the listed (non-key) columns.
    /// Existing rows only get those columns replaced.
    ColumnPartialUpdate { column_ids: Vec<u32> },
    /// Update files hold only key columns; every listed key is deleted.
    Delete,
}

/// Summary of the segments written for a rowset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsetSegmentStat {
    pub num_rows_written: u64,
    pub total_row_size: u64,
    pub total_data_size: u64,
    pub num_segment: u32,
}

/// Rowset metadata.
///
/// A rowset is an immutable batch of newly committed rows or changes. Until
/// it is committed to a tablet `rssid` is `None`; committing reserves
/// [`RowsetMeta::rssid_slots`] consecutive slots starting at `rssid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsetMeta {
    pub rowset_id: RowsetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssid: Option<u32>,
    pub kind: RowsetKind,
    /// Data segments; segment `i` is addressed as `rssid + i`.
    pub segments: Vec<SegmentFile>,
    /// Input files of partial-update and delete rowsets.
    pub update_files: Vec<SegmentFile>,
    pub stat: RowsetSegmentStat,
}

impl RowsetMeta {
    pub fn new(rowset_id: RowsetId, kind: RowsetKind) -> Self {
        Self {
            rowset_id,
            rssid: None,
            kind,
            segments: vec![],
            update_files: vec![],
            stat: RowsetSegmentStat::default(),
        }
    }

    /// The first rssid of this rowset, failing if it was never committed.
    pub fn rssid(&self) -> Result<u32> {
        self.rssid.ok_or_else(|| {
            Error::invalid_input(
                format!("rowset {} has not been committed to a tablet", self.rowset_id),
                location!(),
            )
        })
    }

    pub fn num_segments(&self) -> u32 {
        self.segments.len() as u32
    }

    pub fn num_update_files(&self) -> u32 {
        self.update_files.len() as u32
    }

    /// Number of consecutive rssids this rowset needs.
    ///
    /// A partial update may turn every update file into a segment of new rows,
    /// so its update files count as well.
    pub fn rssid_slots(&self) -> u32 {
        self.num_segments().max(self.num_update_files()).max(1)
    }

    pub fn is_column_partial_update(&self) -> bool {
        matches!(self.kind, RowsetKind::ColumnPartialUpdate { .. })
    }

    /// Column unique ids carried by a partial update, excluding keys.
    pub fn partial_update_column_ids(&self) -> &[u32] {
        match &self.kind {
            RowsetKind::ColumnPartialUpdate { column_ids } => column_ids,
            _ => &[],
        }
    }
}
