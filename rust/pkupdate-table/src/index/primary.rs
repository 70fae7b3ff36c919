// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use arrow_row::Rows;
use deepsize::DeepSizeOf;
use pkupdate_core::utils::address::RssRowId;
use pkupdate_core::{Error, Result, NOT_FOUND_RSS_ROWID};
use snafu::location;

use crate::format::{EditVersion, PersistentIndexMeta};

/// Rows made obsolete by an index mutation, grouped by segment.
pub type DeletesMap = BTreeMap<u32, Vec<u32>>;

/// The primary index of a tablet: encoded key to the row holding it.
///
/// Lookups may run concurrently with each other and with a mutation. Only
/// one apply mutates the index at a time.
pub trait PrimaryIndex: std::fmt::Debug + Send + Sync {
    /// Resolve every key to its packed [`RssRowId`], or
    /// [`NOT_FOUND_RSS_ROWID`] if the key has no live row.
    fn lookup(&self, keys: &Rows) -> Result<Vec<u64>>;

    /// Point `keys[i]` at `(rssid, rowid_start + i)`.
    ///
    /// Whatever row a key pointed at before is appended to `deletes`. A key
    /// repeated inside `keys` ends up at its last position and its earlier
    /// positions are reported as deleted.
    fn upsert(
        &self,
        rssid: u32,
        rowid_start: u32,
        keys: &Rows,
        deletes: &mut DeletesMap,
    ) -> Result<()>;

    /// Remove `keys`, reporting the rows they pointed at in `deletes`.
    fn erase(&self, keys: &Rows, deletes: &mut DeletesMap) -> Result<()>;

    /// Make all mutations so far durable as of `version`.
    fn commit(&self, meta: &mut PersistentIndexMeta, version: EditVersion) -> Result<()>;

    fn key_count(&self) -> u64;
}

/// A [`PrimaryIndex`] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryPrimaryIndex {
    map: RwLock<HashMap<Vec<u8>, u64>>,
}

impl InMemoryPrimaryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::index("primary index lock poisoned", location!())
    }
}

impl PrimaryIndex for InMemoryPrimaryIndex {
    fn lookup(&self, keys: &Rows) -> Result<Vec<u64>> {
        let map = self.map.read().map_err(|_| Self::poisoned())?;
        Ok(keys
            .iter()
            .map(|key| map.get(key.as_ref()).copied().unwrap_or(NOT_FOUND_RSS_ROWID))
            .collect())
    }

    fn upsert(
        &self,
        rssid: u32,
        rowid_start: u32,
        keys: &Rows,
        deletes: &mut DeletesMap,
    ) -> Result<()> {
        let mut map = self.map.write().map_err(|_| Self::poisoned())?;
        for (i, key) in keys.iter().enumerate() {
            let rowid = u32::try_from(i)
                .ok()
                .and_then(|i| rowid_start.checked_add(i))
                .ok_or_else(|| {
                    Error::index(
                        format!("segment {} would exceed u32 rows", rssid),
                        location!(),
                    )
                })?;
            let new = u64::from(RssRowId::new_from_parts(rssid, rowid));
            if let Some(old) = map.insert(key.as_ref().to_vec(), new) {
                let old = RssRowId::new_from_id(old);
                deletes.entry(old.rssid()).or_default().push(old.rowid());
            }
        }
        Ok(())
    }

    fn erase(&self, keys: &Rows, deletes: &mut DeletesMap) -> Result<()> {
        let mut map = self.map.write().map_err(|_| Self::poisoned())?;
        for key in keys.iter() {
            if let Some(old) = map.remove(key.as_ref()) {
                let old = RssRowId::new_from_id(old);
                deletes.entry(old.rssid()).or_default().push(old.rowid());
            }
        }
        Ok(())
    }

    fn commit(&self, meta: &mut PersistentIndexMeta, version: EditVersion) -> Result<()> {
        let map = self.map.read().map_err(|_| Self::poisoned())?;
        meta.version = version;
        meta.key_count = map.len() as u64;
        meta.memory_usage = map.deep_size_of() as u64;
        log::debug!(
            "primary index committed at {} with {} keys",
            version,
            meta.key_count
        );
        Ok(())
    }

    fn key_count(&self) -> u64 {
        self.map.read().map(|m| m.len() as u64).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};

    use super::*;
    use crate::format::{TabletColumn, TabletSchema};
    use crate::index::PrimaryKeyEncoder;

    fn rows(ids: &[i64]) -> Rows {
        let schema = TabletSchema::try_new(1, vec![TabletColumn::key(0, "id", DataType::Int64)])
            .unwrap();
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(ids.to_vec()))],
        )
        .unwrap();
        PrimaryKeyEncoder::try_new(&schema)
            .unwrap()
            .encode(&batch)
            .unwrap()
    }

    #[test]
    fn test_upsert_reports_replaced_rows() {
        let index = InMemoryPrimaryIndex::new();
        let mut deletes = DeletesMap::new();
        index.upsert(0, 0, &rows(&[1, 2, 3]), &mut deletes).unwrap();
        assert!(deletes.is_empty());

        index.upsert(1, 0, &rows(&[2, 4, 4]), &mut deletes).unwrap();
        assert_eq!(deletes.get(&0), Some(&vec![1]));
        // the first 4 is shadowed by the second
        assert_eq!(deletes.get(&1), Some(&vec![1]));

        let found = index.lookup(&rows(&[1, 2, 4, 9])).unwrap();
        assert_eq!(found[0], u64::from(RssRowId::new_from_parts(0, 0)));
        assert_eq!(found[1], u64::from(RssRowId::new_from_parts(1, 0)));
        assert_eq!(found[2], u64::from(RssRowId::new_from_parts(1, 2)));
        assert_eq!(found[3], NOT_FOUND_RSS_ROWID);
        assert_eq!(index.key_count(), 4);
    }

    #[test]
    fn test_erase_and_commit() {
        let index = InMemoryPrimaryIndex::new();
        let mut deletes = DeletesMap::new();
        index.upsert(3, 10, &rows(&[1, 2]), &mut deletes).unwrap();
        index.erase(&rows(&[2, 7]), &mut deletes).unwrap();
        assert_eq!(deletes.get(&3), Some(&vec![11]));

        let mut meta = PersistentIndexMeta::default();
        index.commit(&mut meta, EditVersion::new(5, 0)).unwrap();
        assert_eq!(meta.version, EditVersion::new(5, 0));
        assert_eq!(meta.key_count, 1);
        assert!(meta.memory_usage > 0);
    }
}
