// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use deepsize::DeepSizeOf;
use serde::{Deserialize, Serialize};

/// A point in a tablet's commit history.
///
/// `major` advances once per applied rowset. `minor` is bumped by
/// maintenance operations that rewrite files without changing visible data,
/// so it never affects conflict detection on its own.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    DeepSizeOf,
)]
pub struct EditVersion {
    pub major: u64,
    pub minor: u64,
}

impl EditVersion {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// The version produced by applying one more rowset on top of `self`.
    pub fn next_major(&self) -> Self {
        Self::new(self.major + 1, 0)
    }
}

impl std::fmt::Display for EditVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
