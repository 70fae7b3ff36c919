// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Segment, update and delta column files.
//!
//! All three are Arrow IPC files. Readers may project columns by name; the
//! IPC reader then skips decoding the buffers of every other column.

use std::io::Cursor;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_ipc::reader::FileReader as ArrowFileReader;
use arrow_ipc::writer::{FileWriter as ArrowFileWriter, IpcWriteOptions};
use arrow_ipc::CompressionType;
use arrow_schema::{ArrowError, Schema, SchemaRef};
use arrow_select::concat::concat_batches;
use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use pkupdate_core::error::{box_error, CorruptFileSnafu};
use pkupdate_core::{Error, Result};
use snafu::{location, ResultExt};

use crate::format::{RowsetId, SegmentFile};

/// File name of data segment `segment_id` of a rowset.
pub fn segment_file_name(rowset_id: &RowsetId, segment_id: u32) -> String {
    format!("{rowset_id}_{segment_id}.dat")
}

/// File name of update file `file_id` of a partial-update or delete rowset.
pub fn update_file_name(rowset_id: &RowsetId, file_id: u32) -> String {
    format!("{rowset_id}_{file_id}.upt")
}

/// Encode `batches` as one IPC file and upload it to `base/relative_path`.
///
/// Nothing is visible at the path unless the whole upload succeeds.
pub async fn write_segment_file(
    store: &dyn ObjectStore,
    base: &Path,
    relative_path: &str,
    schema: &Schema,
    batches: &[RecordBatch],
    compress: bool,
) -> Result<SegmentFile> {
    let write_options = if compress {
        IpcWriteOptions::default().try_with_compression(Some(CompressionType::ZSTD))?
    } else {
        IpcWriteOptions::default()
    };

    let mut out: Vec<u8> = Vec::new();
    let mut num_rows = 0;
    {
        let mut writer = ArrowFileWriter::try_new_with_options(&mut out, schema, write_options)?;
        for batch in batches {
            num_rows += batch.num_rows() as u64;
            writer.write(batch)?;
        }
        writer.finish()?;
    }

    let data_size = out.len() as u64;
    let path = base.child(relative_path);
    store.put(&path, out.into()).await?;
    log::debug!("wrote {} rows ({} bytes) to {}", num_rows, data_size, path);

    Ok(SegmentFile {
        path: relative_path.to_string(),
        num_rows,
        data_size,
    })
}

/// Buffers record batches for one file and uploads them on [`SegmentWriter::finish`].
pub struct SegmentWriter {
    store: Arc<dyn ObjectStore>,
    base: Path,
    relative_path: String,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    compress: bool,
}

impl SegmentWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        base: Path,
        relative_path: impl Into<String>,
        schema: SchemaRef,
        compress: bool,
    ) -> Self {
        Self {
            store,
            base,
            relative_path: relative_path.into(),
            schema,
            batches: vec![],
            compress,
        }
    }

    /// Queue `batch`, which must carry exactly the writer's columns.
    pub fn append(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.schema().fields() != self.schema.fields() {
            return Err(Error::schema_violation(
                format!(
                    "batch for {} does not match the file schema: {:?} vs {:?}",
                    self.relative_path,
                    batch.schema(),
                    self.schema
                ),
                location!(),
            ));
        }
        self.batches.push(batch);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub async fn finish(self) -> Result<SegmentFile> {
        write_segment_file(
            self.store.as_ref(),
            &self.base,
            &self.relative_path,
            &self.schema,
            &self.batches,
            self.compress,
        )
        .await
    }
}

/// Read a whole file, optionally keeping only the named columns.
///
/// Columns come back in the order of `columns`. A requested column that the
/// file does not hold is a schema violation, not a corrupt file.
pub async fn read_segment_file(
    store: &dyn ObjectStore,
    base: &Path,
    relative_path: &str,
    columns: Option<&[&str]>,
) -> Result<RecordBatch> {
    let path = base.child(relative_path);
    let data = store.get(&path).await?.bytes().await?;
    decode_segment(&path, data, columns)
}

fn decode_segment(path: &Path, data: Bytes, columns: Option<&[&str]>) -> Result<RecordBatch> {
    let file_schema = ArrowFileReader::try_new(Cursor::new(data.clone()), None)
        .map_err(box_error)
        .context(CorruptFileSnafu { path: path.clone() })?
        .schema();

    let projection = columns
        .map(|names| {
            names
                .iter()
                .map(|name| {
                    file_schema.index_of(name).map_err(|_| {
                        Error::schema_violation(
                            format!("column {} is not present in {}", name, path),
                            location!(),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;

    let output_schema = match &projection {
        Some(indices) => Arc::new(file_schema.project(indices)?),
        None => file_schema,
    };

    let reader = ArrowFileReader::try_new(Cursor::new(data), projection)
        .map_err(box_error)
        .context(CorruptFileSnafu { path: path.clone() })?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, ArrowError>>()
        .map_err(box_error)
        .context(CorruptFileSnafu { path: path.clone() })?;

    Ok(concat_batches(&output_schema, &batches)?)
}
