// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::ops::Range;

/// A packed physical row location: the rowset+segment slot (`rssid`) in the
/// upper 32 bits and the row offset within that segment in the lower 32 bits.
///
/// This is the value stored in the primary index for every live key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RssRowId(u64);

impl RssRowId {
    pub const SEGMENT_SIZE: u64 = 1 << 32;
    /// Sentinel for a key that does not resolve to any live row.
    pub const NOT_FOUND: u64 = u64::MAX;

    pub fn new_from_id(rss_rowid: u64) -> Self {
        Self(rss_rowid)
    }

    pub fn new_from_parts(rssid: u32, rowid: u32) -> Self {
        Self(((rssid as u64) << 32) | rowid as u64)
    }

    pub fn first_row(rssid: u32) -> Self {
        Self::new_from_parts(rssid, 0)
    }

    /// The half-open range of packed ids that belong to `rssid`.
    pub fn segment_range(rssid: u32) -> Range<u64> {
        let start = u64::from(Self::first_row(rssid));
        start..start.saturating_add(Self::SEGMENT_SIZE)
    }

    pub fn is_not_found(value: u64) -> bool {
        value == Self::NOT_FOUND
    }

    pub fn rssid(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn rowid(&self) -> u32 {
        self.0 as u32
    }
}

impl From<RssRowId> for u64 {
    fn from(addr: RssRowId) -> Self {
        addr.0
    }
}

impl std::fmt::Debug for RssRowId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self) // use Display
    }
}

impl std::fmt::Display for RssRowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == Self::NOT_FOUND {
            write!(f, "(not found)")
        } else {
            write!(f, "({}, {})", self.rssid(), self.rowid())
        }
    }
}
