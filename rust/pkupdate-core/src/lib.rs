// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

pub mod error;
pub mod utils;

pub use error::{Error, Result};

/// Sentinel stored in a resolved row mapping for a key with no live row.
pub const NOT_FOUND_RSS_ROWID: u64 = utils::address::RssRowId::NOT_FOUND;
