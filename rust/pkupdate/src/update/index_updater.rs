// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::ops::Range;

use arrow_row::Rows;
use pkupdate_core::utils::delvec::DelVector;
use pkupdate_core::Result;
use pkupdate_table::index::DeletesMap;

use crate::tablet::{ApplyContext, Tablet};

/// Point the keys of new segment `rssid + k` at that segment.
pub(crate) fn upsert_new_rows(tablet: &Tablet, rssid: u32, keys: &[Rows]) -> Result<DeletesMap> {
    let mut deletes = DeletesMap::new();
    for (k, keys) in keys.iter().enumerate() {
        tablet
            .index()
            .upsert(rssid + k as u32, 0, keys, &mut deletes)?;
    }
    Ok(deletes)
}

/// Delete vectors recording `deletes` at the apply's new version.
///
/// Segments in `own` are created by the apply itself and start from an
/// empty vector; every other segment derives a new version from its latest.
pub(crate) fn build_del_vecs(
    ctx: &ApplyContext<'_>,
    own: Range<u32>,
    deletes: DeletesMap,
) -> Result<Vec<(u32, DelVector)>> {
    let version = ctx.new_version().major;
    let mut del_vecs = Vec::with_capacity(deletes.len());
    for (rssid, dels) in deletes {
        let del_vec = if own.contains(&rssid) {
            DelVector::init(version, &dels)
        } else {
            match ctx.latest_del_vec(rssid)? {
                Some(latest) => latest.add_dels_as_new_version(&dels, version)?,
                None => DelVector::init(version, &dels),
            }
        };
        log::debug!("segment {}: {} deleted rows", rssid, del_vec.cardinality());
        del_vecs.push((rssid, del_vec));
    }
    Ok(del_vecs)
}
