// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_array::BooleanArray;
use roaring::RoaringBitmap;
use snafu::location;

use crate::{Error, Result};

/// A versioned set of deleted row offsets in a single segment.
///
/// A delete vector is never mutated once it has been published to a tablet.
/// New deletions produce a new version through [`DelVector::add_dels_as_new_version`],
/// which leaves the previous version intact for readers still holding it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelVector {
    version: u64,
    bitmap: RoaringBitmap,
}

impl DelVector {
    /// An empty delete vector at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            bitmap: RoaringBitmap::new(),
        }
    }

    /// Build a delete vector at `version` holding exactly `dels`.
    pub fn init(version: u64, dels: &[u32]) -> Self {
        Self {
            version,
            bitmap: dels.iter().copied().collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cardinality(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn contains(&self, rowid: u32) -> bool {
        self.bitmap.contains(rowid)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitmap.iter()
    }

    /// Copy this vector, add `dels`, and stamp the copy with `version`.
    ///
    /// `version` must not go backwards; a delete vector produced at an older
    /// edit version than its predecessor would let a stale apply resurrect rows.
    pub fn add_dels_as_new_version(&self, dels: &[u32], version: u64) -> Result<Self> {
        if version < self.version {
            return Err(Error::internal(
                format!(
                    "delete vector version regressed: {} -> {}",
                    self.version, version
                ),
                location!(),
            ));
        }
        let mut bitmap = self.bitmap.clone();
        bitmap.extend(dels.iter().copied());
        Ok(Self { version, bitmap })
    }

    /// Selection vector for `rowids`: `true` keeps the row, `false` drops it.
    ///
    /// Returns `None` when nothing is deleted so callers can skip filtering.
    pub fn build_predicate(&self, rowids: impl Iterator<Item = u32>) -> Option<BooleanArray> {
        if self.bitmap.is_empty() {
            return None;
        }
        Some(
            rowids
                .map(|id| !self.bitmap.contains(id))
                .collect::<Vec<_>>()
                .into(),
        )
    }
}

impl From<&DelVector> for RoaringBitmap {
    fn from(value: &DelVector) -> Self {
        value.bitmap.clone()
    }
}

impl std::fmt::Display for DelVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DelVector(version={}, cardinality={})",
            self.version,
            self.bitmap.len()
        )
    }
}
