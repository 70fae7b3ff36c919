// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! On-disk and catalog metadata of a primary-key tablet.

mod delta_column_group;
mod index_meta;
mod rowset;
mod schema;
mod version;

pub use delta_column_group::{delta_column_file_name, DeltaColumnFile, DeltaColumnGroup};
pub use index_meta::PersistentIndexMeta;
pub use rowset::{RowsetId, RowsetKind, RowsetMeta, RowsetSegmentStat, SegmentFile};
pub use schema::{TabletColumn, TabletSchema};
pub use version::EditVersion;
