// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::collections::HashSet;

use arrow_row::Rows;
use pkupdate_core::{Error, Result};
use roaring::RoaringBitmap;
use snafu::location;

use super::state::{BatchPks, ColumnPartialUpdateState};
use crate::tablet::Tablet;

/// Positions whose key occurs again at a later position.
pub(crate) fn shadowed_positions(keys: &Rows) -> RoaringBitmap {
    let mut seen = HashSet::with_capacity(keys.num_rows());
    let mut shadowed = RoaringBitmap::new();
    for pos in (0..keys.num_rows()).rev() {
        if !seen.insert(keys.row(pos)) {
            shadowed.insert(pos as u32);
        }
    }
    shadowed
}

/// Resolve every key of `batch` with one index lookup and append one state
/// per file of the batch to `states`.
pub(crate) fn resolve_batch(
    tablet: &Tablet,
    batch: &mut BatchPks,
    states: &mut Vec<ColumnPartialUpdateState>,
) -> Result<()> {
    // read before the lookup so the recorded version can only be too old
    let read_version = tablet.latest_applied_version()?;
    let keys = batch.keys()?;
    let src_rss_rowids = tablet.index().lookup(keys)?;
    if src_rss_rowids.len() != keys.num_rows() {
        return Err(Error::index(
            format!(
                "lookup of {} keys returned {} locations",
                keys.num_rows(),
                src_rss_rowids.len()
            ),
            location!(),
        ));
    }
    let shadowed = shadowed_positions(keys);

    for file in batch.files() {
        if states.len() != file as usize {
            return Err(Error::internal(
                format!(
                    "update file {} resolved out of order, {} states exist",
                    file,
                    states.len()
                ),
                location!(),
            ));
        }
        let range = batch.file_range(file);
        let local_shadowed = shadowed
            .range(range.start as u32..range.end as u32)
            .map(|pos| pos - range.start as u32)
            .collect::<RoaringBitmap>();
        let state = ColumnPartialUpdateState::new(
            src_rss_rowids[range].to_vec(),
            read_version,
            local_shadowed,
        );
        log::debug!(
            "update file {}: {} updates, {} inserts, {} shadowed at {}",
            file,
            state.rss_rowid_to_update_rowid.len(),
            state.insert_rowids.len(),
            state.shadowed.len(),
            read_version
        );
        states.push(state);
    }
    batch.src_rss_rowids = src_rss_rowids;
    Ok(())
}
