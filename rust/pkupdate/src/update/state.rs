// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::collections::BTreeMap;
use std::ops::Range;

use arrow_row::Rows;
use pkupdate_core::utils::address::RssRowId;
use pkupdate_core::{Error, Result};
use pkupdate_table::format::{EditVersion, RowsetId};
use roaring::RoaringBitmap;
use snafu::location;

/// Full identity of a segment that the primary index only knows by rssid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsetSegmentId {
    pub unique_rowset_id: RowsetId,
    /// First rssid of the rowset.
    pub sequence_rowset_id: u32,
    pub segment_id: u32,
}

impl RowsetSegmentId {
    pub fn rssid(&self) -> u32 {
        self.sequence_rowset_id + self.segment_id
    }
}

/// The primary keys of update files `[start, end)`, concatenated.
///
/// `offsets[i]..offsets[i + 1]` are the keys of file `start + i`. The keys
/// themselves may be released once resolved; the ranges stay so they can be
/// reloaded.
#[derive(Debug)]
pub struct BatchPks {
    pub start: u32,
    pub end: u32,
    upserts: Option<Rows>,
    /// One per key, [`RssRowId::NOT_FOUND`] for keys absent from the index.
    pub src_rss_rowids: Vec<u64>,
    pub offsets: Vec<usize>,
    /// Memory charged for the keys of the batch, offsets included.
    pub key_bytes: usize,
}

impl BatchPks {
    pub(crate) fn new(start: u32, upserts: Rows) -> Self {
        Self {
            start,
            end: start,
            upserts: Some(upserts),
            src_rss_rowids: vec![],
            offsets: vec![0],
            key_bytes: 0,
        }
    }

    /// Add the keys of update file `self.end`.
    pub(crate) fn push_file(&mut self, keys: &Rows, key_bytes: usize) -> Result<()> {
        let upserts = self.upserts.as_mut().ok_or_else(|| released(self.start))?;
        for key in keys.iter() {
            upserts.push(key);
        }
        self.end += 1;
        self.offsets.push(upserts.num_rows());
        self.key_bytes += key_bytes;
        Ok(())
    }

    pub fn num_files(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn num_keys(&self) -> usize {
        self.offsets.last().copied().unwrap_or_default()
    }

    pub fn files(&self) -> Range<u32> {
        self.start..self.end
    }

    /// Positions of `file`'s keys in the concatenated keys.
    pub fn file_range(&self, file: u32) -> Range<usize> {
        let i = (file - self.start) as usize;
        self.offsets[i]..self.offsets[i + 1]
    }

    pub fn keys(&self) -> Result<&Rows> {
        self.upserts.as_ref().ok_or_else(|| released(self.start))
    }

    pub fn has_keys(&self) -> bool {
        self.upserts.is_some()
    }

    pub fn release_keys(&mut self) {
        self.upserts = None;
    }

    /// Put back keys that were released, which must be the same keys.
    pub(crate) fn restore_keys(&mut self, keys: Rows) -> Result<()> {
        if keys.num_rows() != self.num_keys() {
            return Err(Error::internal(
                format!(
                    "reloaded {} keys for files {:?} but {} were resolved",
                    keys.num_rows(),
                    self.files(),
                    self.num_keys()
                ),
                location!(),
            ));
        }
        self.upserts = Some(keys);
        Ok(())
    }

    pub fn memory_usage(&self) -> usize {
        self.upserts.as_ref().map(|r| r.size()).unwrap_or_default()
            + self.src_rss_rowids.capacity() * std::mem::size_of::<u64>()
            + self.offsets.capacity() * std::mem::size_of::<usize>()
    }
}

fn released(start: u32) -> Error {
    Error::internal(
        format!("keys of the batch starting at file {} were released", start),
        location!(),
    )
}

/// Resolution of one update file against the primary index.
///
/// Every update row is in exactly one of `rss_rowid_to_update_rowid`,
/// `insert_rowids` or `shadowed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnPartialUpdateState {
    /// Per update row, where its key currently lives.
    pub src_rss_rowids: Vec<u64>,
    /// Version the index was at (or past) when `src_rss_rowids` was looked up.
    pub read_version: EditVersion,
    pub rss_rowid_to_update_rowid: BTreeMap<u64, u32>,
    /// Update rows whose key has no live row, ascending.
    pub insert_rowids: Vec<u32>,
    /// Update rows overridden by a later row with the same key.
    pub shadowed: RoaringBitmap,
}

impl ColumnPartialUpdateState {
    pub(crate) fn new(
        src_rss_rowids: Vec<u64>,
        read_version: EditVersion,
        shadowed: RoaringBitmap,
    ) -> Self {
        let mut state = Self {
            src_rss_rowids,
            read_version,
            shadowed,
            ..Default::default()
        };
        state.build_rss_rowid_to_update_rowid();
        state
    }

    pub fn num_rows(&self) -> usize {
        self.src_rss_rowids.len()
    }

    /// Recompute the mapping and the inserts from `src_rss_rowids`.
    pub fn build_rss_rowid_to_update_rowid(&mut self) {
        self.rss_rowid_to_update_rowid.clear();
        self.insert_rowids.clear();
        for (rowid, src) in self.src_rss_rowids.iter().enumerate() {
            let rowid = rowid as u32;
            if self.shadowed.contains(rowid) {
                continue;
            }
            if RssRowId::is_not_found(*src) {
                self.insert_rowids.push(rowid);
            } else {
                self.rss_rowid_to_update_rowid.insert(*src, rowid);
            }
        }
    }

    pub fn memory_usage(&self) -> usize {
        self.src_rss_rowids.capacity() * std::mem::size_of::<u64>()
            + self.rss_rowid_to_update_rowid.len() * (std::mem::size_of::<(u64, u32)>() + 16)
            + self.insert_rowids.capacity() * std::mem::size_of::<u32>()
            + self.shadowed.serialized_size()
    }
}
