// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_row::Rows;
use pkupdate_core::utils::delvec::DelVector;
use pkupdate_core::{Error, Result};
use pkupdate_table::format::{
    DeltaColumnGroup, EditVersion, PersistentIndexMeta, RowsetKind, RowsetMeta, SegmentFile,
};
use pkupdate_table::index::DeletesMap;
use pkupdate_table::io::read_segment_file;
use snafu::location;
use tokio::sync::MutexGuard;
use tracing::instrument;

use super::Tablet;
use crate::update::{build_del_vecs, UpdateManager};

/// Everything one apply makes visible, installed in a single step.
#[derive(Debug)]
pub struct CommitUnit {
    pub rowset: RowsetMeta,
    pub delta_column_groups: Vec<DeltaColumnGroup>,
    /// New delete vector versions by rssid.
    pub del_vecs: Vec<(u32, DelVector)>,
    pub index_meta: PersistentIndexMeta,
}

/// Exclusive right to apply one rowset to a tablet.
///
/// Only one context per tablet exists at a time, so the version it reports
/// stays the latest until it is committed or dropped.
pub struct ApplyContext<'a> {
    tablet: &'a Tablet,
    _guard: MutexGuard<'a, ()>,
    latest_applied_version: EditVersion,
}

impl<'a> ApplyContext<'a> {
    pub fn tablet(&self) -> &'a Tablet {
        self.tablet
    }

    pub fn latest_applied_version(&self) -> EditVersion {
        self.latest_applied_version
    }

    /// The version this apply will publish.
    pub fn new_version(&self) -> EditVersion {
        self.latest_applied_version.next_major()
    }

    pub fn latest_del_vec(&self, rssid: u32) -> Result<Option<DelVector>> {
        self.tablet.latest_del_vec(rssid)
    }

    pub fn index_meta(&self) -> Result<PersistentIndexMeta> {
        self.tablet.index_meta()
    }

    /// Install `unit` and publish [`ApplyContext::new_version`].
    pub fn commit(self, unit: CommitUnit) -> Result<EditVersion> {
        let rssid = unit.rowset.rssid()?;
        let version = self.new_version();
        let mut state = self.tablet.write_state()?;
        if state.latest_version() != self.latest_applied_version {
            return Err(Error::internal(
                format!(
                    "tablet moved from {} to {} during an apply",
                    self.latest_applied_version,
                    state.latest_version()
                ),
                location!(),
            ));
        }
        if state.pending.remove(&rssid).is_none() {
            return Err(Error::internal(
                format!("rowset at rssid {} is not pending", rssid),
                location!(),
            ));
        }
        state.rowsets.insert(rssid, unit.rowset);
        for dcg in unit.delta_column_groups {
            state.dcgs.entry(dcg.rssid).or_default().push(dcg);
        }
        for (rssid, del_vec) in unit.del_vecs {
            state.del_vecs.entry(rssid).or_default().push(del_vec);
        }
        state.index_meta = unit.index_meta;
        state.versions.push(version);
        Ok(version)
    }
}

impl Tablet {
    /// Wait for the apply lock and open an [`ApplyContext`].
    pub async fn begin_apply(&self) -> Result<ApplyContext<'_>> {
        let guard = self.apply_lock.lock().await;
        let latest_applied_version = self.latest_applied_version()?;
        Ok(ApplyContext {
            tablet: self,
            _guard: guard,
            latest_applied_version,
        })
    }

    /// Make a committed rowset visible, returning the version it created.
    ///
    /// Nothing becomes visible unless the whole apply succeeds. Column
    /// partial updates reuse the state `update_manager` preloaded, if any,
    /// and evict it afterwards.
    #[instrument(level = "debug", skip_all, fields(rowset = %rowset.rowset_id))]
    pub async fn apply_rowset(
        &self,
        rowset: &RowsetMeta,
        update_manager: &UpdateManager,
    ) -> Result<EditVersion> {
        let rssid = rowset.rssid()?;
        let ctx = self.begin_apply().await?;
        {
            let state = self.read_state()?;
            match state.pending.get(&rssid) {
                Some(pending) if pending.rowset_id == rowset.rowset_id => {}
                _ => {
                    return Err(Error::invalid_input(
                        format!(
                            "rowset {} is not waiting to be applied at rssid {}",
                            rowset.rowset_id, rssid
                        ),
                        location!(),
                    ))
                }
            }
        }

        let unit = match &rowset.kind {
            RowsetKind::Full => self.apply_full_rowset(&ctx, rowset).await?,
            RowsetKind::Delete => self.apply_delete_rowset(&ctx, rowset).await?,
            RowsetKind::ColumnPartialUpdate { .. } => {
                let result = self
                    .apply_column_partial_update(&ctx, rowset, update_manager)
                    .await;
                update_manager.remove(self, rowset);
                result?
            }
        };
        let version = ctx.commit(unit)?;
        log::info!(
            "applied rowset {} at rssid {}, tablet is now at {}",
            rowset.rowset_id,
            rssid,
            version
        );
        Ok(version)
    }

    async fn apply_full_rowset(
        &self,
        ctx: &ApplyContext<'_>,
        rowset: &RowsetMeta,
    ) -> Result<CommitUnit> {
        let rssid = rowset.rssid()?;
        let keys = self.read_keys(&rowset.segments).await?;

        let mut deletes = DeletesMap::new();
        for (segment_id, keys) in keys.iter().enumerate() {
            self.index
                .upsert(rssid + segment_id as u32, 0, keys, &mut deletes)?;
        }
        let del_vecs = build_del_vecs(ctx, rssid..rssid + rowset.num_segments(), deletes)?;

        let mut index_meta = ctx.index_meta()?;
        self.index.commit(&mut index_meta, ctx.new_version())?;
        Ok(CommitUnit {
            rowset: rowset.clone(),
            delta_column_groups: vec![],
            del_vecs,
            index_meta,
        })
    }

    async fn apply_delete_rowset(
        &self,
        ctx: &ApplyContext<'_>,
        rowset: &RowsetMeta,
    ) -> Result<CommitUnit> {
        let keys = self.read_keys(&rowset.update_files).await?;

        let mut deletes = DeletesMap::new();
        for keys in &keys {
            self.index.erase(keys, &mut deletes)?;
        }
        let rssid = rowset.rssid()?;
        let del_vecs = build_del_vecs(ctx, rssid..rssid, deletes)?;

        let mut index_meta = ctx.index_meta()?;
        self.index.commit(&mut index_meta, ctx.new_version())?;
        Ok(CommitUnit {
            rowset: rowset.clone(),
            delta_column_groups: vec![],
            del_vecs,
            index_meta,
        })
    }

    async fn apply_column_partial_update(
        &self,
        ctx: &ApplyContext<'_>,
        rowset: &RowsetMeta,
        update_manager: &UpdateManager,
    ) -> Result<CommitUnit> {
        let state = update_manager.get_or_create(self, rowset);
        let mut state = state.lock().await;
        state
            .load(self, rowset, self.config.pk_batch_memory_limit)
            .await?;

        let mut index_meta = ctx.index_meta()?;
        let mut del_vecs = vec![];
        state.finalize(ctx, &mut index_meta, &mut del_vecs).await?;

        Ok(CommitUnit {
            rowset: state.finalized_rowset()?.clone(),
            delta_column_groups: state.delta_column_groups().to_vec(),
            del_vecs,
            index_meta,
        })
    }

    /// Encoded keys of each file, read before the index is touched.
    async fn read_keys(&self, files: &[SegmentFile]) -> Result<Vec<Rows>> {
        let key_names = self.schema.key_column_names();
        let mut keys = Vec::with_capacity(files.len());
        for file in files {
            let batch = read_segment_file(
                self.store.as_ref(),
                &self.base_path,
                &file.path,
                Some(key_names.as_slice()),
            )
            .await?;
            keys.push(self.key_encoder.encode(&batch)?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;

    use super::*;
    use crate::config::UpdateConfig;
    use crate::tablet::tests::{new_tablet, rows};

    #[tokio::test]
    async fn test_delete_rowset() {
        let tablet = new_tablet(UpdateConfig::default());
        let manager = UpdateManager::new(tablet.config());

        let rowset = tablet.write_rowset(&[rows(&tablet, &[1, 2, 3])]).await.unwrap();
        let rowset = tablet.commit_rowset(rowset).unwrap();
        tablet.apply_rowset(&rowset, &manager).await.unwrap();

        let keys = rows(&tablet, &[2, 5]).project(&[0]).unwrap();
        let delete = tablet.write_delete_rowset(&[keys]).await.unwrap();
        let delete = tablet.commit_rowset(delete).unwrap();
        // a delete rowset still takes a slot
        assert_eq!(delete.rssid, Some(1));
        let version = tablet.apply_rowset(&delete, &manager).await.unwrap();
        assert_eq!(version, EditVersion::new(3, 0));

        let scanned = tablet.scan(&["id"]).await.unwrap();
        assert_eq!(scanned.column(0).as_primitive::<Int64Type>().values(), &[1, 3]);
        assert_eq!(tablet.latest_del_vec(0).unwrap().unwrap().cardinality(), 1);
        assert_eq!(tablet.index().key_count(), 2);
        assert_eq!(tablet.versions().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dropped_context_publishes_nothing() {
        let tablet = new_tablet(UpdateConfig::default());
        {
            let ctx = tablet.begin_apply().await.unwrap();
            assert_eq!(ctx.latest_applied_version(), EditVersion::new(1, 0));
            assert_eq!(ctx.new_version(), EditVersion::new(2, 0));
        }
        assert_eq!(tablet.latest_applied_version().unwrap(), EditVersion::new(1, 0));
        // the lock was released with the context
        let _ctx = tablet.begin_apply().await.unwrap();
    }
}
