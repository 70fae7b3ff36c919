// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_row::Rows;
use pkupdate_core::{Error, Result};
use pkupdate_table::format::RowsetMeta;
use pkupdate_table::index::key_bytes;
use pkupdate_table::io::read_segment_file;
use snafu::location;

use super::state::BatchPks;
use crate::tablet::Tablet;

/// Reads the keys of a rowset's update files in batches of bounded size.
///
/// Files are never split: a batch holds whole files, and one file may be
/// read ahead of the batch it ends up in.
pub(crate) struct PkBatchLoader<'a> {
    tablet: &'a Tablet,
    rowset: &'a RowsetMeta,
    memory_budget: usize,
    next_file: u32,
    lookahead: Option<(u32, Rows, usize)>,
}

impl<'a> PkBatchLoader<'a> {
    pub(crate) fn new(tablet: &'a Tablet, rowset: &'a RowsetMeta, memory_budget: usize) -> Self {
        Self {
            tablet,
            rowset,
            memory_budget,
            next_file: 0,
            lookahead: None,
        }
    }

    /// The next batch, or `None` once every file was consumed.
    pub(crate) async fn next_batch(&mut self) -> Result<Option<BatchPks>> {
        let mut batch: Option<BatchPks> = None;
        loop {
            let (file, keys, bytes) = match self.lookahead.take() {
                Some(pending) => pending,
                None => {
                    if self.next_file >= self.rowset.num_update_files() {
                        break;
                    }
                    let file = self.next_file;
                    self.next_file += 1;
                    let keys = read_file_keys(self.tablet, self.rowset, file).await?;
                    let bytes = key_bytes(&keys);
                    (file, keys, bytes)
                }
            };

            if bytes > self.memory_budget {
                return Err(Error::ResourceExhausted {
                    message: format!(
                        "keys of update file {} of rowset {} take {} bytes, over the {} byte batch budget",
                        file, self.rowset.rowset_id, bytes, self.memory_budget
                    ),
                    location: location!(),
                });
            }

            match batch.as_mut() {
                Some(current) if current.key_bytes + bytes > self.memory_budget => {
                    self.lookahead = Some((file, keys, bytes));
                    break;
                }
                Some(current) => current.push_file(&keys, bytes)?,
                None => {
                    let mut current = BatchPks::new(file, self.tablet.key_encoder().empty_rows());
                    current.push_file(&keys, bytes)?;
                    batch = Some(current);
                }
            }
        }

        if let Some(batch) = &batch {
            log::debug!(
                "loaded keys of update files {:?} of rowset {}: {} keys, {} bytes",
                batch.files(),
                self.rowset.rowset_id,
                batch.num_keys(),
                batch.key_bytes
            );
        }
        Ok(batch)
    }
}

/// Encoded keys of one update file.
pub(crate) async fn read_file_keys(
    tablet: &Tablet,
    rowset: &RowsetMeta,
    file: u32,
) -> Result<Rows> {
    let key_names = tablet.schema().key_column_names();
    let batch = read_segment_file(
        tablet.store().as_ref(),
        tablet.base_path(),
        &rowset.update_files[file as usize].path,
        Some(key_names.as_slice()),
    )
    .await?;
    tablet.key_encoder().encode(&batch)
}

/// Re-read the keys of every file of `batch`, e.g. after they were released.
pub(crate) async fn reload_batch_keys(
    tablet: &Tablet,
    rowset: &RowsetMeta,
    batch: &mut BatchPks,
) -> Result<()> {
    let mut keys = tablet.key_encoder().empty_rows();
    for file in batch.files() {
        let file_keys = read_file_keys(tablet, rowset, file).await?;
        for key in file_keys.iter() {
            keys.push(key);
        }
    }
    batch.restore_keys(keys)
}
