// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::{Schema as ArrowSchema, SchemaRef};
use pkupdate_core::{Error, Result};
use pkupdate_table::format::{RowsetId, RowsetKind, RowsetMeta, SegmentFile, TabletColumn};
use pkupdate_table::io::{segment_file_name, update_file_name, SegmentWriter};
use snafu::location;

use super::Tablet;

impl Tablet {
    /// Write a rowset of complete rows, one segment per batch.
    pub async fn write_rowset(&self, batches: &[RecordBatch]) -> Result<RowsetMeta> {
        let schema = self.schema.arrow_schema();
        let mut rowset = RowsetMeta::new(RowsetId::random(), RowsetKind::Full);
        for (i, batch) in batches.iter().enumerate() {
            let batch = conform(batch, &schema)?;
            let file = self
                .write_file(segment_file_name(&rowset.rowset_id, i as u32), &schema, &batch)
                .await?;
            record_stat(&mut rowset, &batch, &file);
            rowset.segments.push(file);
        }
        Ok(rowset)
    }

    /// Write a rowset that replaces `columns` of existing rows, one update
    /// file per batch.
    ///
    /// Each batch must carry every key column and every named column. Keys
    /// with no live row at apply time become new rows, with the remaining
    /// columns filled from their defaults.
    pub async fn write_column_update_rowset(
        &self,
        batches: &[RecordBatch],
        columns: &[&str],
    ) -> Result<RowsetMeta> {
        if columns.is_empty() {
            return Err(Error::invalid_input(
                "a column update must name at least one column",
                location!(),
            ));
        }
        let mut update_columns = Vec::with_capacity(columns.len());
        for name in columns {
            let column = self.schema.column_by_name(name).ok_or_else(|| {
                Error::schema_violation(
                    format!("column {} is not part of the tablet", name),
                    location!(),
                )
            })?;
            if column.is_key {
                return Err(Error::invalid_input(
                    format!("key column {} cannot be updated in place", name),
                    location!(),
                ));
            }
            if update_columns.contains(&column) {
                return Err(Error::invalid_input(
                    format!("column {} is named twice", name),
                    location!(),
                ));
            }
            update_columns.push(column);
        }

        let schema = Arc::new(ArrowSchema::new(
            self.schema
                .key_columns()
                .iter()
                .chain(update_columns.iter().copied())
                .map(TabletColumn::arrow_field)
                .collect::<Vec<_>>(),
        ));
        let column_ids = update_columns.iter().map(|c| c.unique_id).collect();
        let mut rowset = RowsetMeta::new(
            RowsetId::random(),
            RowsetKind::ColumnPartialUpdate { column_ids },
        );
        self.write_update_files(&mut rowset, batches, &schema).await?;
        Ok(rowset)
    }

    /// Write a rowset deleting every key in `batches`.
    pub async fn write_delete_rowset(&self, batches: &[RecordBatch]) -> Result<RowsetMeta> {
        let schema = self.schema.key_schema();
        let mut rowset = RowsetMeta::new(RowsetId::random(), RowsetKind::Delete);
        self.write_update_files(&mut rowset, batches, &schema).await?;
        Ok(rowset)
    }

    async fn write_update_files(
        &self,
        rowset: &mut RowsetMeta,
        batches: &[RecordBatch],
        schema: &SchemaRef,
    ) -> Result<()> {
        for (i, batch) in batches.iter().enumerate() {
            let batch = conform(batch, schema)?;
            let file = self
                .write_file(update_file_name(&rowset.rowset_id, i as u32), schema, &batch)
                .await?;
            record_stat(rowset, &batch, &file);
            rowset.update_files.push(file);
        }
        Ok(())
    }

    pub(crate) async fn write_file(
        &self,
        relative_path: String,
        schema: &SchemaRef,
        batch: &RecordBatch,
    ) -> Result<SegmentFile> {
        let mut writer = SegmentWriter::new(
            self.store.clone(),
            self.base_path.clone(),
            relative_path,
            schema.clone(),
            self.config.compress_files,
        );
        writer.append(batch.clone())?;
        writer.finish().await
    }
}

pub(crate) fn record_stat(rowset: &mut RowsetMeta, batch: &RecordBatch, file: &SegmentFile) {
    rowset.stat.num_rows_written += batch.num_rows() as u64;
    rowset.stat.total_row_size += batch.get_array_memory_size() as u64;
    rowset.stat.total_data_size += file.data_size;
    rowset.stat.num_segment += 1;
}

/// Reorder the columns of `batch` to `schema`, checking names and types.
fn conform(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let column = batch.column_by_name(field.name()).ok_or_else(|| {
                Error::schema_violation(format!("column {} is missing", field.name()), location!())
            })?;
            if column.data_type() != field.data_type() {
                return Err(Error::schema_violation(
                    format!(
                        "column {} has type {} but {} is expected",
                        field.name(),
                        column.data_type(),
                        field.data_type()
                    ),
                    location!(),
                ));
            }
            if !field.is_nullable() && column.null_count() > 0 {
                return Err(Error::schema_violation(
                    format!("column {} must not contain nulls", field.name()),
                    location!(),
                ));
            }
            Ok(column.clone())
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}
