// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Turns resolved update rows into delta column files and new segments.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use arrow_array::{ArrayRef, RecordBatch, UInt32Array};
use arrow_row::Rows;
use arrow_select::interleave::interleave;
use arrow_select::take::take_record_batch;
use pkupdate_core::utils::address::RssRowId;
use pkupdate_core::{Error, Result};
use pkupdate_table::format::{
    delta_column_file_name, DeltaColumnFile, DeltaColumnGroup, EditVersion, RowsetMeta,
    RowsetSegmentStat, SegmentFile, TabletColumn,
};
use pkupdate_table::io::{read_segment_file, segment_file_name};
use snafu::location;

use super::state::{ColumnPartialUpdateState, RowsetSegmentId};
use crate::tablet::Tablet;

/// Rows of one segment to replace: rowid to (update file, update rowid).
pub(crate) type SegmentUpdates = BTreeMap<u32, (u32, u32)>;

/// Group the resolved rows of all files by target segment.
///
/// Files are visited in order, so when two files update the same row the
/// later file wins.
pub(crate) fn build_segment_updates(
    states: &[ColumnPartialUpdateState],
) -> BTreeMap<u32, SegmentUpdates> {
    let mut updates: BTreeMap<u32, SegmentUpdates> = BTreeMap::new();
    for (file, state) in states.iter().enumerate() {
        for (src, update_rowid) in &state.rss_rowid_to_update_rowid {
            let src = RssRowId::new_from_id(*src);
            updates
                .entry(src.rssid())
                .or_default()
                .insert(src.rowid(), (file as u32, *update_rowid));
        }
    }
    updates
}

/// Decoded update files, read at most once per finalize.
pub(crate) struct UpdateFileCache<'a> {
    tablet: &'a Tablet,
    rowset: &'a RowsetMeta,
    update_columns: &'a [TabletColumn],
    chunks: HashMap<u32, RecordBatch>,
}

impl<'a> UpdateFileCache<'a> {
    pub(crate) fn new(
        tablet: &'a Tablet,
        rowset: &'a RowsetMeta,
        update_columns: &'a [TabletColumn],
    ) -> Self {
        Self {
            tablet,
            rowset,
            update_columns,
            chunks: HashMap::new(),
        }
    }

    /// Make sure `files` are decoded.
    pub(crate) async fn ensure(&mut self, files: impl IntoIterator<Item = u32>) -> Result<()> {
        for file in files {
            if self.chunks.contains_key(&file) {
                continue;
            }
            let chunk = self.read(file).await?;
            self.chunks.insert(file, chunk);
        }
        Ok(())
    }

    async fn read(&self, file: u32) -> Result<RecordBatch> {
        let update_file = self.rowset.update_files.get(file as usize).ok_or_else(|| {
            Error::internal(
                format!("rowset {} has no update file {}", self.rowset.rowset_id, file),
                location!(),
            )
        })?;
        let names = self
            .tablet
            .schema()
            .key_columns()
            .iter()
            .chain(self.update_columns)
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>();
        let chunk = read_segment_file(
            self.tablet.store().as_ref(),
            self.tablet.base_path(),
            &update_file.path,
            Some(names.as_slice()),
        )
        .await?;
        for column in self.update_columns {
            let data_type = chunk.schema().field_with_name(&column.name)?.data_type().clone();
            if data_type != column.data_type {
                return Err(Error::schema_violation(
                    format!(
                        "column {} of {} has type {} but the tablet expects {}",
                        column.name, update_file.path, data_type, column.data_type
                    ),
                    location!(),
                ));
            }
        }
        Ok(chunk)
    }

    pub(crate) fn get(&self, file: u32) -> Result<&RecordBatch> {
        self.chunks.get(&file).ok_or_else(|| {
            Error::internal(format!("update file {} was not decoded", file), location!())
        })
    }

    fn column(&self, file: u32, name: &str) -> Result<&ArrayRef> {
        self.get(file)?.column_by_name(name).ok_or_else(|| {
            Error::internal(
                format!("column {} missing from update file {}", name, file),
                location!(),
            )
        })
    }
}

/// Write one delta column file per segment in `updates`, in rssid order.
///
/// Each file holds the full updated columns of its segment: the current
/// values (base overlaid with earlier delta columns) with the updated rows
/// replaced.
pub(crate) async fn write_delta_columns(
    tablet: &Tablet,
    rssid_to_segment: &BTreeMap<u32, RowsetSegmentId>,
    updates: &BTreeMap<u32, SegmentUpdates>,
    cache: &mut UpdateFileCache<'_>,
    version: EditVersion,
) -> Result<Vec<DeltaColumnGroup>> {
    let update_columns = cache.update_columns;
    let names = update_columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>();
    let column_ids = update_columns
        .iter()
        .map(|c| c.unique_id)
        .collect::<Vec<_>>();

    let mut dcgs = Vec::with_capacity(updates.len());
    for (rssid, rows) in updates {
        let segment = match rssid_to_segment.get(rssid) {
            Some(segment) => *segment,
            // created by an apply that landed after load
            None => tablet.rowset_segment_id(*rssid)?.ok_or_else(|| {
                Error::index(
                    format!("index points at unknown segment {}", rssid),
                    location!(),
                )
            })?,
        };

        let base = tablet.read_segment(*rssid, &names).await?;
        let num_rows = base.num_rows();
        if let Some((rowid, _)) = rows.last_key_value() {
            if *rowid as usize >= num_rows {
                return Err(Error::index(
                    format!(
                        "index points at row {} of segment {} which has {} rows",
                        rowid, rssid, num_rows
                    ),
                    location!(),
                ));
            }
        }

        let files = rows.values().map(|(file, _)| *file).collect::<BTreeSet<_>>();
        cache.ensure(files.iter().copied()).await?;
        // source 0 is the current segment, source i + 1 is the i-th file
        let source_of = files
            .iter()
            .enumerate()
            .map(|(i, file)| (*file, i + 1))
            .collect::<HashMap<_, _>>();
        let indices = (0..num_rows)
            .map(|rowid| match rows.get(&(rowid as u32)) {
                Some((file, update_rowid)) => (source_of[file], *update_rowid as usize),
                None => (0, rowid),
            })
            .collect::<Vec<_>>();

        let mut columns = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let mut sources = vec![base.column(i).as_ref()];
            for file in &files {
                sources.push(cache.column(*file, name)?.as_ref());
            }
            columns.push(interleave(&sources, &indices)?);
        }
        let batch = RecordBatch::try_new(base.schema(), columns)?;

        let path = delta_column_file_name(
            &segment.unique_rowset_id,
            segment.segment_id,
            version.major,
        );
        let file = tablet.write_file(path, &base.schema(), &batch).await?;
        log::debug!(
            "segment {}: replaced {} of {} rows in {}",
            rssid,
            rows.len(),
            num_rows,
            file.path
        );

        let mut dcg = DeltaColumnGroup::new(*rssid, version.major, tablet.schema().schema_version);
        dcg.add_file(DeltaColumnFile {
            path: file.path,
            column_ids: column_ids.clone(),
            num_rows: file.num_rows,
        });
        dcgs.push(dcg);
    }
    Ok(dcgs)
}

/// New segments built from the insert rows, and their encoded keys.
pub(crate) struct InsertedSegments {
    pub segments: Vec<SegmentFile>,
    /// Keys of `segments[k]`, in row order.
    pub keys: Vec<Rows>,
    pub stat: RowsetSegmentStat,
}

/// Write the insert rows of every update file as complete rows.
///
/// Columns the update files do not carry get their default, or null. Files
/// without inserts produce no segment, so segment `k` is the `k`-th file
/// that has inserts.
pub(crate) async fn insert_new_rows(
    tablet: &Tablet,
    rowset: &RowsetMeta,
    states: &[ColumnPartialUpdateState],
    cache: &mut UpdateFileCache<'_>,
) -> Result<InsertedSegments> {
    let schema = tablet.schema().arrow_schema();
    let mut inserted = InsertedSegments {
        segments: vec![],
        keys: vec![],
        stat: RowsetSegmentStat::default(),
    };

    for (file, state) in states.iter().enumerate() {
        if state.insert_rowids.is_empty() {
            continue;
        }
        let file = file as u32;
        cache.ensure([file]).await?;
        let indices = UInt32Array::from(state.insert_rowids.clone());
        let supplied = take_record_batch(cache.get(file)?, &indices)?;

        let columns = tablet
            .schema()
            .columns
            .iter()
            .map(|column| match supplied.column_by_name(&column.name) {
                Some(array) => Ok(array.clone()),
                None => column.default_array(supplied.num_rows()),
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new(schema.clone(), columns)?;

        let segment_id = inserted.segments.len() as u32;
        let segment = tablet
            .write_file(segment_file_name(&rowset.rowset_id, segment_id), &schema, &batch)
            .await?;
        inserted.stat.num_rows_written += batch.num_rows() as u64;
        inserted.stat.total_row_size += batch.get_array_memory_size() as u64;
        inserted.stat.total_data_size += segment.data_size;
        inserted.stat.num_segment += 1;
        inserted.keys.push(tablet.key_encoder().encode(&batch)?);
        inserted.segments.push(segment);
    }
    Ok(inserted)
}
