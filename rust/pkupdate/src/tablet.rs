// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! A primary-key tablet: its rowsets, delete vectors, delta column groups and
//! primary index, plus the read path over them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arrow_array::RecordBatch;
use arrow_schema::{Field, Schema as ArrowSchema, SchemaRef};
use arrow_select::concat::concat_batches;
use arrow_select::filter::filter_record_batch;
use object_store::path::Path;
use object_store::ObjectStore;
use pkupdate_core::utils::address::RssRowId;
use pkupdate_core::utils::delvec::DelVector;
use pkupdate_core::{Error, Result};
use pkupdate_table::format::{
    DeltaColumnGroup, EditVersion, PersistentIndexMeta, RowsetMeta, SegmentFile, TabletSchema,
};
use pkupdate_table::index::{PrimaryIndex, PrimaryKeyEncoder};
use pkupdate_table::io::read_segment_file;
use snafu::location;

use crate::config::UpdateConfig;
use crate::update::RowsetSegmentId;

mod apply;
mod write;

pub use apply::{ApplyContext, CommitUnit};

/// Catalog state of a tablet. Only [`ApplyContext::commit`] and
/// [`Tablet::commit_rowset`] modify it.
#[derive(Debug)]
pub(crate) struct TabletState {
    /// Every applied edit version, oldest first.
    versions: Vec<EditVersion>,
    /// Applied rowsets by first rssid.
    rowsets: BTreeMap<u32, RowsetMeta>,
    /// Committed rowsets waiting to be applied, by first rssid.
    pending: BTreeMap<u32, RowsetMeta>,
    /// Delete vector history per segment, oldest first.
    del_vecs: HashMap<u32, Vec<DelVector>>,
    /// Delta column groups per segment, oldest first.
    dcgs: HashMap<u32, Vec<DeltaColumnGroup>>,
    index_meta: PersistentIndexMeta,
    next_rssid: u32,
}

impl TabletState {
    fn new() -> Self {
        let initial = EditVersion::new(1, 0);
        Self {
            versions: vec![initial],
            rowsets: BTreeMap::new(),
            pending: BTreeMap::new(),
            del_vecs: HashMap::new(),
            dcgs: HashMap::new(),
            index_meta: PersistentIndexMeta {
                version: initial,
                ..Default::default()
            },
            next_rssid: 0,
        }
    }

    fn latest_version(&self) -> EditVersion {
        self.versions.last().copied().unwrap_or_default()
    }

    /// The applied rowset holding segment `rssid`, and the segment's index in it.
    fn segment(&self, rssid: u32) -> Option<(&RowsetMeta, u32, u32)> {
        let (first, meta) = self.rowsets.range(..=rssid).next_back()?;
        let segment_id = rssid - first;
        (segment_id < meta.num_segments()).then_some((meta, *first, segment_id))
    }

    fn segment_snapshot(&self, rssid: u32) -> Result<SegmentSnapshot> {
        let (meta, _, segment_id) = self.segment(rssid).ok_or_else(|| {
            Error::index(format!("segment {} is not part of the tablet", rssid), location!())
        })?;
        Ok(SegmentSnapshot {
            rssid,
            file: meta.segments[segment_id as usize].clone(),
            dcgs: self.dcgs.get(&rssid).cloned().unwrap_or_default(),
            del_vec: self.latest_del_vec(rssid),
        })
    }

    fn latest_del_vec(&self, rssid: u32) -> Option<DelVector> {
        self.del_vecs.get(&rssid).and_then(|h| h.last()).cloned()
    }
}

/// What a reader needs to see one segment as of a single version.
struct SegmentSnapshot {
    rssid: u32,
    file: SegmentFile,
    dcgs: Vec<DeltaColumnGroup>,
    del_vec: Option<DelVector>,
}

/// A primary-key tablet.
///
/// Writers produce rowsets with `write_*`, register them with
/// [`Tablet::commit_rowset`] and make them visible with
/// [`Tablet::apply_rowset`]. Applies are serialized; everything else may run
/// concurrently.
pub struct Tablet {
    schema: TabletSchema,
    store: Arc<dyn ObjectStore>,
    base_path: Path,
    index: Arc<dyn PrimaryIndex>,
    key_encoder: PrimaryKeyEncoder,
    config: UpdateConfig,
    state: RwLock<TabletState>,
    apply_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Tablet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablet")
            .field("base_path", &self.base_path)
            .field("schema_version", &self.schema.schema_version)
            .finish()
    }
}

impl Tablet {
    pub fn try_new(
        schema: TabletSchema,
        store: Arc<dyn ObjectStore>,
        base_path: Path,
        index: Arc<dyn PrimaryIndex>,
        config: UpdateConfig,
    ) -> Result<Self> {
        schema.validate()?;
        let key_encoder = PrimaryKeyEncoder::try_new(&schema)?;
        Ok(Self {
            schema,
            store,
            base_path,
            index,
            key_encoder,
            config,
            state: RwLock::new(TabletState::new()),
            apply_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn schema(&self) -> &TabletSchema {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn index(&self) -> &Arc<dyn PrimaryIndex> {
        &self.index
    }

    pub fn key_encoder(&self) -> &PrimaryKeyEncoder {
        &self.key_encoder
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, TabletState>> {
        self.state
            .read()
            .map_err(|_| Error::internal("tablet state lock poisoned", location!()))
    }

    pub(crate) fn write_state(&self) -> Result<RwLockWriteGuard<'_, TabletState>> {
        self.state
            .write()
            .map_err(|_| Error::internal("tablet state lock poisoned", location!()))
    }

    pub fn latest_applied_version(&self) -> Result<EditVersion> {
        Ok(self.read_state()?.latest_version())
    }

    pub fn versions(&self) -> Result<Vec<EditVersion>> {
        Ok(self.read_state()?.versions.clone())
    }

    /// Applied rowsets in rssid order.
    pub fn rowsets(&self) -> Result<Vec<RowsetMeta>> {
        Ok(self.read_state()?.rowsets.values().cloned().collect())
    }

    pub fn index_meta(&self) -> Result<PersistentIndexMeta> {
        Ok(self.read_state()?.index_meta.clone())
    }

    /// Identity of every segment of every applied rowset, by rssid.
    pub fn rowset_segment_ids(&self) -> Result<BTreeMap<u32, RowsetSegmentId>> {
        let state = self.read_state()?;
        Ok(state
            .rowsets
            .iter()
            .flat_map(|(first, meta)| {
                (0..meta.num_segments()).map(move |segment_id| {
                    (
                        first + segment_id,
                        RowsetSegmentId {
                            unique_rowset_id: meta.rowset_id,
                            sequence_rowset_id: *first,
                            segment_id,
                        },
                    )
                })
            })
            .collect())
    }

    pub fn rowset_segment_id(&self, rssid: u32) -> Result<Option<RowsetSegmentId>> {
        let state = self.read_state()?;
        Ok(state
            .segment(rssid)
            .map(|(meta, first, segment_id)| RowsetSegmentId {
                unique_rowset_id: meta.rowset_id,
                sequence_rowset_id: first,
                segment_id,
            }))
    }

    pub fn latest_del_vec(&self, rssid: u32) -> Result<Option<DelVector>> {
        Ok(self.read_state()?.latest_del_vec(rssid))
    }

    /// Delta column groups of a segment, oldest first.
    pub fn delta_column_groups(&self, rssid: u32) -> Result<Vec<DeltaColumnGroup>> {
        Ok(self
            .read_state()?
            .dcgs
            .get(&rssid)
            .cloned()
            .unwrap_or_default())
    }

    /// Read `columns` of a segment, with delta columns overlaid on the base.
    ///
    /// Deleted rows are included; row `i` of the result is row id `i`.
    pub async fn read_segment(&self, rssid: u32, columns: &[&str]) -> Result<RecordBatch> {
        let snapshot = self.read_state()?.segment_snapshot(rssid)?;
        self.read_snapshot(&snapshot, columns).await
    }

    async fn read_snapshot(
        &self,
        snapshot: &SegmentSnapshot,
        columns: &[&str],
    ) -> Result<RecordBatch> {
        // (file, columns read from it); the base segment is always slot 0
        let mut sources: Vec<(&str, Vec<&str>)> = vec![(snapshot.file.path.as_str(), vec![])];
        let mut placement = Vec::with_capacity(columns.len());
        for name in columns.iter().copied() {
            let delta = self.schema.column_by_name(name).and_then(|column| {
                snapshot
                    .dcgs
                    .iter()
                    .rev()
                    .find_map(|dcg| dcg.file_for_column(column.unique_id))
            });
            let path = delta.map_or(snapshot.file.path.as_str(), |f| f.path.as_str());
            let slot = match sources.iter().position(|(p, _)| *p == path) {
                Some(slot) => slot,
                None => {
                    sources.push((path, vec![]));
                    sources.len() - 1
                }
            };
            sources[slot].1.push(name);
            placement.push((slot, sources[slot].1.len() - 1));
        }

        let mut batches = Vec::with_capacity(sources.len());
        for (path, names) in &sources {
            if names.is_empty() {
                batches.push(None);
                continue;
            }
            let batch =
                read_segment_file(self.store.as_ref(), &self.base_path, path, Some(names.as_slice()))
                    .await?;
            if batch.num_rows() as u64 != snapshot.file.num_rows {
                return Err(Error::corrupt_file(
                    self.base_path.child(*path),
                    format!(
                        "expected {} rows for segment {}, found {}",
                        snapshot.file.num_rows,
                        snapshot.rssid,
                        batch.num_rows()
                    ),
                    location!(),
                ));
            }
            batches.push(Some(batch));
        }

        let mut fields = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());
        for (slot, pos) in placement {
            let batch = batches[slot]
                .as_ref()
                .ok_or_else(|| Error::internal("column source was not read", location!()))?;
            fields.push(batch.schema().field(pos).clone());
            arrays.push(batch.column(pos).clone());
        }
        Ok(RecordBatch::try_new(
            Arc::new(ArrowSchema::new(fields)),
            arrays,
        )?)
    }

    /// Where each key currently lives, if anywhere.
    ///
    /// An apply moves keys in the index before it commits their segments.
    /// Only locations in applied segments are returned, so a key that an
    /// in-flight apply inserted reads as absent until that apply commits,
    /// and every location returned can be read with [`Tablet::read_segment`].
    pub fn lookup(&self, keys: &RecordBatch) -> Result<Vec<Option<RssRowId>>> {
        let rows = self.key_encoder.encode(keys)?;
        let ids = self.index.lookup(&rows)?;
        let state = self.read_state()?;
        Ok(ids
            .into_iter()
            .map(|id| {
                if RssRowId::is_not_found(id) {
                    return None;
                }
                let id = RssRowId::new_from_id(id);
                state.segment(id.rssid()).map(|_| id)
            })
            .collect())
    }

    /// All live rows of the tablet as of the latest applied version.
    pub async fn scan(&self, columns: &[&str]) -> Result<RecordBatch> {
        let schema = self.projected_schema(columns)?;
        let snapshots = {
            let state = self.read_state()?;
            let rssids = state
                .rowsets
                .iter()
                .flat_map(|(first, meta)| (0..meta.num_segments()).map(move |k| first + k))
                .collect::<Vec<_>>();
            rssids
                .into_iter()
                .map(|rssid| state.segment_snapshot(rssid))
                .collect::<Result<Vec<_>>>()?
        };

        let mut batches = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            let batch = self.read_snapshot(snapshot, columns).await?;
            let predicate = snapshot
                .del_vec
                .as_ref()
                .and_then(|dv| dv.build_predicate(0..batch.num_rows() as u32));
            match predicate {
                Some(predicate) => batches.push(filter_record_batch(&batch, &predicate)?),
                None => batches.push(batch),
            }
        }
        Ok(concat_batches(&schema, &batches)?)
    }

    fn projected_schema(&self, columns: &[&str]) -> Result<SchemaRef> {
        let fields = columns
            .iter()
            .map(|name| {
                self.schema
                    .column_by_name(name)
                    .map(|c| c.arrow_field())
                    .ok_or_else(|| {
                        Error::schema_violation(
                            format!("column {} is not part of the tablet", name),
                            location!(),
                        )
                    })
            })
            .collect::<Result<Vec<Field>>>()?;
        Ok(Arc::new(ArrowSchema::new(fields)))
    }

    /// Register a written rowset, reserving its rssids. It stays invisible
    /// until applied.
    pub fn commit_rowset(&self, mut rowset: RowsetMeta) -> Result<RowsetMeta> {
        if rowset.rssid.is_some() {
            return Err(Error::invalid_input(
                format!("rowset {} is already committed", rowset.rowset_id),
                location!(),
            ));
        }
        let mut state = self.write_state()?;
        let rssid = state.next_rssid;
        state.next_rssid = rssid.checked_add(rowset.rssid_slots()).ok_or_else(|| {
            Error::ResourceExhausted {
                message: "tablet ran out of rssids".to_string(),
                location: location!(),
            }
        })?;
        rowset.rssid = Some(rssid);
        state.pending.insert(rssid, rowset.clone());
        log::debug!(
            "committed rowset {} at rssid {} ({} slots)",
            rowset.rowset_id,
            rssid,
            rowset.rssid_slots()
        );
        Ok(rowset)
    }
}
