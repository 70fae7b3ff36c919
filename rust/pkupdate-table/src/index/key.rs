// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_array::{ArrayRef, RecordBatch};
use arrow_row::{RowConverter, Rows, SortField};
use arrow_schema::DataType;
use pkupdate_core::{Error, Result};
use snafu::location;

use crate::format::TabletSchema;

/// Encodes primary-key columns into comparable byte strings.
///
/// Two rows have the same encoded key iff all their key columns are equal,
/// so the encoded bytes can be used directly as hash map keys.
#[derive(Debug)]
pub struct PrimaryKeyEncoder {
    converter: RowConverter,
    key_columns: Vec<(String, DataType)>,
}

impl PrimaryKeyEncoder {
    pub fn try_new(schema: &TabletSchema) -> Result<Self> {
        let key_columns = schema
            .key_columns()
            .iter()
            .map(|c| (c.name.clone(), c.data_type.clone()))
            .collect::<Vec<_>>();
        let converter = RowConverter::new(
            key_columns
                .iter()
                .map(|(_, data_type)| SortField::new(data_type.clone()))
                .collect(),
        )?;
        Ok(Self {
            converter,
            key_columns,
        })
    }

    pub fn empty_rows(&self) -> Rows {
        self.converter.empty_rows(0, 0)
    }

    /// The key columns of `batch`, in key order.
    pub fn key_arrays(&self, batch: &RecordBatch) -> Result<Vec<ArrayRef>> {
        self.key_columns
            .iter()
            .map(|(name, data_type)| {
                let column = batch.column_by_name(name).ok_or_else(|| {
                    Error::schema_violation(
                        format!("key column {} is missing", name),
                        location!(),
                    )
                })?;
                if column.data_type() != data_type {
                    return Err(Error::schema_violation(
                        format!(
                            "key column {} has type {} but the tablet expects {}",
                            name,
                            column.data_type(),
                            data_type
                        ),
                        location!(),
                    ));
                }
                if column.null_count() > 0 {
                    return Err(Error::schema_violation(
                        format!("key column {} contains nulls", name),
                        location!(),
                    ));
                }
                Ok(column.clone())
            })
            .collect()
    }

    pub fn encode(&self, batch: &RecordBatch) -> Result<Rows> {
        let mut rows = self.empty_rows();
        self.append(&mut rows, batch)?;
        Ok(rows)
    }

    /// Append the keys of `batch` to `rows`.
    pub fn append(&self, rows: &mut Rows, batch: &RecordBatch) -> Result<()> {
        let arrays = self.key_arrays(batch)?;
        self.converter.append(rows, &arrays)?;
        Ok(())
    }

    /// Re-encode the key columns of a subset of `rows`.
    pub fn select(&self, rows: &Rows, indices: impl IntoIterator<Item = usize>) -> Result<Rows> {
        let selected = indices.into_iter().map(|i| rows.row(i)).collect::<Vec<_>>();
        let arrays = self.converter.convert_rows(selected)?;
        Ok(self.converter.convert_columns(&arrays)?)
    }
}

/// Memory held by the keys in `rows`, in bytes.
///
/// Each key is charged its encoded bytes plus the offset `Rows` keeps for it.
pub fn key_bytes(rows: &Rows) -> usize {
    rows.iter()
        .map(|row| row.as_ref().len() + std::mem::size_of::<usize>())
        .sum()
}
