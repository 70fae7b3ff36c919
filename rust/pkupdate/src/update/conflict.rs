// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use pkupdate_core::utils::address::RssRowId;
use pkupdate_core::{Error, Result};
use pkupdate_table::format::{EditVersion, RowsetMeta};
use snafu::location;

use super::loader::reload_batch_keys;
use super::state::{BatchPks, ColumnPartialUpdateState};
use crate::tablet::Tablet;

/// Re-resolve every batch that was resolved before `latest` against the
/// index as of `latest`.
///
/// Must run while no other apply can move the tablet past `latest`. A key
/// that moved is retargeted, a key that vanished becomes an insert and a key
/// that appeared turns an insert into an update. Returns the number of rows
/// whose resolution changed.
pub(crate) async fn resolve_conflicts(
    tablet: &Tablet,
    rowset: &RowsetMeta,
    batches: &mut [BatchPks],
    states: &mut [ColumnPartialUpdateState],
    latest: EditVersion,
) -> Result<usize> {
    let mut total = 0;
    for batch in batches.iter_mut() {
        if batch.files().all(|file| states[file as usize].read_version >= latest) {
            continue;
        }

        let released = !batch.has_keys();
        if released {
            reload_batch_keys(tablet, rowset, batch).await?;
        }
        let current = tablet.index().lookup(batch.keys()?)?;
        if current.len() != batch.num_keys() {
            return Err(Error::index(
                format!(
                    "lookup of {} keys returned {} locations",
                    batch.num_keys(),
                    current.len()
                ),
                location!(),
            ));
        }

        let mut conflicts = 0;
        for file in batch.files() {
            let range = batch.file_range(file);
            let state = &mut states[file as usize];
            for (rowid, pos) in range.enumerate() {
                if state.src_rss_rowids[rowid] == current[pos] {
                    continue;
                }
                if !state.shadowed.contains(rowid as u32) {
                    log::debug!(
                        "row {} of update file {} moved from {} to {}",
                        rowid,
                        file,
                        RssRowId::new_from_id(state.src_rss_rowids[rowid]),
                        RssRowId::new_from_id(current[pos])
                    );
                    conflicts += 1;
                }
                state.src_rss_rowids[rowid] = current[pos];
            }
            state.read_version = latest;
            state.build_rss_rowid_to_update_rowid();
        }
        batch.src_rss_rowids = current;
        if released {
            batch.release_keys();
        }

        if conflicts > 0 {
            log::info!(
                "resolved {} conflicts in update files {:?} of rowset {} against {}",
                conflicts,
                batch.files(),
                rowset.rowset_id,
                latest
            );
        }
        total += conflicts;
    }
    Ok(total)
}
