// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use object_store::path::Path;
use pkupdate_core::{Error, Result};
use serde::{Deserialize, Serialize};
use snafu::location;

/// A file holding replacement values for some columns of one segment.
///
/// The file covers every row of the segment, in row-offset order, so a
/// reader can substitute the whole column without merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaColumnFile {
    /// Relative path of the file to the tablet root.
    pub path: String,
    /// Unique ids of the columns in this file.
    pub column_ids: Vec<u32>,
    pub num_rows: u64,
}

/// Delta column files produced for one existing segment by one apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaColumnGroup {
    pub rssid: u32,
    /// Major edit version of the apply that produced this group.
    pub version: u64,
    /// Schema version the column ids refer to.
    pub schema_version: u32,
    pub files: Vec<DeltaColumnFile>,
}

impl DeltaColumnGroup {
    pub fn new(rssid: u32, version: u64, schema_version: u32) -> Self {
        Self {
            rssid,
            version,
            schema_version,
            files: vec![],
        }
    }

    pub fn add_file(&mut self, file: DeltaColumnFile) {
        self.files.push(file);
    }

    pub fn column_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.files.iter().flat_map(|f| f.column_ids.iter().copied())
    }

    /// The file holding `column_id`, if this group covers it.
    pub fn file_for_column(&self, column_id: u32) -> Option<&DeltaColumnFile> {
        self.files.iter().find(|f| f.column_ids.contains(&column_id))
    }

    pub fn validate(&self, base_path: &Path, segment_rows: u64) -> Result<()> {
        for file in &self.files {
            if file.num_rows != segment_rows {
                return Err(Error::corrupt_file(
                    base_path.child(file.path.as_str()),
                    format!(
                        "delta column file has {} rows but segment {} has {}",
                        file.num_rows, self.rssid, segment_rows
                    ),
                    location!(),
                ));
            }
        }
        let mut ids = self.column_ids().collect::<Vec<_>>();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != total {
            return Err(Error::internal(
                format!("delta column group for {} repeats a column", self.rssid),
                location!(),
            ));
        }
        Ok(())
    }
}

/// Relative path of a delta column file.
///
/// `{rowset}_{segment}_{version}.cols`, where rowset/segment identify the
/// segment being patched, not the rowset that carried the update.
pub fn delta_column_file_name(
    rowset_id: &super::RowsetId,
    segment_id: u32,
    version: u64,
) -> String {
    format!("{rowset_id}_{segment_id}_{version}.cols")
}
