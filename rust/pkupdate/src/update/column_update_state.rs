// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::collections::BTreeMap;

use pkupdate_core::error::CloneableError;
use pkupdate_core::utils::delvec::DelVector;
use pkupdate_core::{Error, Result};
use pkupdate_table::format::{
    DeltaColumnGroup, PersistentIndexMeta, RowsetId, RowsetMeta, TabletColumn,
};
use snafu::location;
use tracing::instrument;

use super::conflict::resolve_conflicts;
use super::delta_writer::{
    build_segment_updates, insert_new_rows, write_delta_columns, UpdateFileCache,
};
use super::index_updater::{build_del_vecs, upsert_new_rows};
use super::loader::PkBatchLoader;
use super::resolver::resolve_batch;
use super::state::{BatchPks, ColumnPartialUpdateState, RowsetSegmentId};
use crate::tablet::{ApplyContext, Tablet};

#[derive(Debug)]
struct LoadedState {
    rowset: RowsetMeta,
    update_columns: Vec<TabletColumn>,
    rssid_to_segment: BTreeMap<u32, RowsetSegmentId>,
    batches: Vec<BatchPks>,
    /// One per update file.
    states: Vec<ColumnPartialUpdateState>,
}

impl LoadedState {
    fn memory_usage(&self) -> usize {
        self.batches.iter().map(BatchPks::memory_usage).sum::<usize>()
            + self
                .states
                .iter()
                .map(ColumnPartialUpdateState::memory_usage)
                .sum::<usize>()
            + self.rssid_to_segment.len() * std::mem::size_of::<(u32, RowsetSegmentId)>()
    }
}

#[derive(Debug)]
struct FinalizedState {
    rowset: RowsetMeta,
    delta_column_groups: Vec<DeltaColumnGroup>,
    conflicts: usize,
}

#[derive(Debug)]
enum Lifecycle {
    Unloaded,
    Loaded(Box<LoadedState>),
    LoadFailed(CloneableError),
    /// `None` if finalize failed.
    Finalized(Option<Box<FinalizedState>>),
}

/// Applies one column-mode partial update rowset to a tablet.
///
/// [`RowsetColumnUpdateState::load`] resolves every update row against the
/// primary index and may run ahead of the apply. [`RowsetColumnUpdateState::finalize`]
/// runs inside the apply: it re-checks the resolution against the latest
/// version, writes delta column files and new segments, and updates the
/// index. Each state is finalized at most once.
#[derive(Debug)]
pub struct RowsetColumnUpdateState {
    rowset_id: RowsetId,
    lifecycle: Lifecycle,
}

impl RowsetColumnUpdateState {
    pub fn new(rowset_id: RowsetId) -> Self {
        Self {
            rowset_id,
            lifecycle: Lifecycle::Unloaded,
        }
    }

    pub fn rowset_id(&self) -> RowsetId {
        self.rowset_id
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Loaded(_))
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Finalized(_))
    }

    /// Read the keys of `rowset` and resolve them against the index.
    ///
    /// Only the first call does any work. Later calls return its outcome;
    /// a failure is replayed as an [`Error::Cloned`].
    #[instrument(level = "debug", skip_all, fields(rowset = %rowset.rowset_id))]
    pub async fn load(
        &mut self,
        tablet: &Tablet,
        rowset: &RowsetMeta,
        memory_budget: usize,
    ) -> Result<()> {
        match &self.lifecycle {
            Lifecycle::Unloaded => {}
            Lifecycle::LoadFailed(err) => return Err(err.clone().0),
            Lifecycle::Loaded(_) | Lifecycle::Finalized(_) => return Ok(()),
        }

        match self.do_load(tablet, rowset, memory_budget).await {
            Ok(loaded) => {
                self.lifecycle = Lifecycle::Loaded(Box::new(loaded));
                Ok(())
            }
            Err(err) => {
                log::warn!("failed to load rowset {}: {}", rowset.rowset_id, err);
                let err = CloneableError(err);
                self.lifecycle = Lifecycle::LoadFailed(err.clone());
                Err(err.0)
            }
        }
    }

    async fn do_load(
        &self,
        tablet: &Tablet,
        rowset: &RowsetMeta,
        memory_budget: usize,
    ) -> Result<LoadedState> {
        if rowset.rowset_id != self.rowset_id {
            return Err(Error::invalid_input(
                format!(
                    "state of rowset {} cannot load rowset {}",
                    self.rowset_id, rowset.rowset_id
                ),
                location!(),
            ));
        }
        if !rowset.is_column_partial_update() {
            return Err(Error::invalid_input(
                format!("rowset {} is not a column partial update", rowset.rowset_id),
                location!(),
            ));
        }
        rowset.rssid()?;

        let update_columns = tablet
            .schema()
            .columns_by_ids(rowset.partial_update_column_ids())?
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        if let Some(key) = update_columns.iter().find(|c| c.is_key) {
            return Err(Error::schema_violation(
                format!("key column {} cannot be partially updated", key.name),
                location!(),
            ));
        }

        let rssid_to_segment = tablet.rowset_segment_ids()?;
        let mut loader = PkBatchLoader::new(tablet, rowset, memory_budget);
        let mut batches = vec![];
        let mut states = Vec::with_capacity(rowset.update_files.len());
        while let Some(mut batch) = loader.next_batch().await? {
            resolve_batch(tablet, &mut batch, &mut states)?;
            batch.release_keys();
            batches.push(batch);
        }

        Ok(LoadedState {
            rowset: rowset.clone(),
            update_columns,
            rssid_to_segment,
            batches,
            states,
        })
    }

    fn loaded(&self) -> Option<&LoadedState> {
        match &self.lifecycle {
            Lifecycle::Loaded(loaded) => Some(loaded),
            _ => None,
        }
    }

    /// Key batches of a loaded state, empty otherwise.
    pub fn batches(&self) -> &[BatchPks] {
        self.loaded()
            .map(|l| l.batches.as_slice())
            .unwrap_or_default()
    }

    /// Per update file resolution of a loaded state, empty otherwise.
    pub fn states(&self) -> &[ColumnPartialUpdateState] {
        self.loaded()
            .map(|l| l.states.as_slice())
            .unwrap_or_default()
    }

    /// Segments known at load time, by rssid.
    pub fn rssid_to_segment(&self) -> Option<&BTreeMap<u32, RowsetSegmentId>> {
        self.loaded().map(|l| &l.rssid_to_segment)
    }

    /// Re-resolve stale batches against `ctx`'s version without finalizing.
    pub async fn resolve_conflicts(&mut self, ctx: &ApplyContext<'_>) -> Result<usize> {
        match &mut self.lifecycle {
            Lifecycle::Loaded(loaded) => {
                resolve_conflicts(
                    ctx.tablet(),
                    &loaded.rowset,
                    &mut loaded.batches,
                    &mut loaded.states,
                    ctx.latest_applied_version(),
                )
                .await
            }
            _ => Err(Error::prerequisite_failed(
                format!("rowset {} is not loaded", self.rowset_id),
                location!(),
            )),
        }
    }

    /// Write delta columns and new rows and update the index, as part of the
    /// apply `ctx` belongs to.
    ///
    /// New delete vectors go to `del_vecs` and the committed index state to
    /// `index_meta`; the caller publishes them with the results of
    /// [`RowsetColumnUpdateState::delta_column_groups`] and
    /// [`RowsetColumnUpdateState::finalized_rowset`]. Files are all written
    /// before the index changes, so a failure leaves the tablet as it was.
    #[instrument(level = "debug", skip_all, fields(rowset = %self.rowset_id))]
    pub async fn finalize(
        &mut self,
        ctx: &ApplyContext<'_>,
        index_meta: &mut PersistentIndexMeta,
        del_vecs: &mut Vec<(u32, DelVector)>,
    ) -> Result<()> {
        let mut loaded = match std::mem::replace(&mut self.lifecycle, Lifecycle::Finalized(None)) {
            Lifecycle::Loaded(loaded) => loaded,
            other => {
                let message = match &other {
                    Lifecycle::Unloaded => format!("rowset {} was never loaded", self.rowset_id),
                    Lifecycle::LoadFailed(err) => {
                        format!("loading rowset {} failed: {}", self.rowset_id, err.0)
                    }
                    _ => format!("rowset {} was already finalized", self.rowset_id),
                };
                self.lifecycle = other;
                return Err(Error::prerequisite_failed(message, location!()));
            }
        };

        let finalized = Self::do_finalize(&mut loaded, ctx, index_meta, del_vecs).await?;
        log::info!(
            "finalized rowset {}: {} segments updated, {} rows inserted, {} conflicts",
            self.rowset_id,
            finalized.delta_column_groups.len(),
            finalized.rowset.stat.num_rows_written,
            finalized.conflicts
        );
        self.lifecycle = Lifecycle::Finalized(Some(Box::new(finalized)));
        Ok(())
    }

    async fn do_finalize(
        loaded: &mut LoadedState,
        ctx: &ApplyContext<'_>,
        index_meta: &mut PersistentIndexMeta,
        del_vecs: &mut Vec<(u32, DelVector)>,
    ) -> Result<FinalizedState> {
        let tablet = ctx.tablet();
        let version = ctx.new_version();
        let rssid = loaded.rowset.rssid()?;

        let conflicts = resolve_conflicts(
            tablet,
            &loaded.rowset,
            &mut loaded.batches,
            &mut loaded.states,
            ctx.latest_applied_version(),
        )
        .await?;

        let updates = build_segment_updates(&loaded.states);
        let mut cache = UpdateFileCache::new(tablet, &loaded.rowset, &loaded.update_columns);
        let delta_column_groups = write_delta_columns(
            tablet,
            &loaded.rssid_to_segment,
            &updates,
            &mut cache,
            version,
        )
        .await?;
        let inserted = insert_new_rows(tablet, &loaded.rowset, &loaded.states, &mut cache).await?;
        drop(cache);

        let deletes = upsert_new_rows(tablet, rssid, &inserted.keys)?;
        let num_new_segments = inserted.segments.len() as u32;
        del_vecs.extend(build_del_vecs(ctx, rssid..rssid + num_new_segments, deletes)?);
        tablet.index().commit(index_meta, version)?;

        let mut rowset = loaded.rowset.clone();
        rowset.segments = inserted.segments;
        rowset.stat = inserted.stat;
        Ok(FinalizedState {
            rowset,
            delta_column_groups,
            conflicts,
        })
    }

    /// Delta column groups written by a successful finalize.
    pub fn delta_column_groups(&self) -> &[DeltaColumnGroup] {
        match &self.lifecycle {
            Lifecycle::Finalized(Some(finalized)) => &finalized.delta_column_groups,
            _ => &[],
        }
    }

    /// The rowset with the segments of its inserted rows.
    pub fn finalized_rowset(&self) -> Result<&RowsetMeta> {
        match &self.lifecycle {
            Lifecycle::Finalized(Some(finalized)) => Ok(&finalized.rowset),
            _ => Err(Error::prerequisite_failed(
                format!("rowset {} was not finalized", self.rowset_id),
                location!(),
            )),
        }
    }

    /// Number of rows whose resolution changed during finalize.
    pub fn num_conflicts(&self) -> Option<usize> {
        match &self.lifecycle {
            Lifecycle::Finalized(Some(finalized)) => Some(finalized.conflicts),
            _ => None,
        }
    }

    /// Approximate bytes held, used to weigh cache entries.
    pub fn memory_usage(&self) -> usize {
        self.loaded().map_or(0, LoadedState::memory_usage)
    }
}
