// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::collections::HashSet;
use std::sync::Arc;

use arrow_array::{new_null_array, ArrayRef, StringArray};
use arrow_cast::cast;
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use pkupdate_core::{Error, Result};
use serde::{Deserialize, Serialize};
use snafu::location;

/// A column of a tablet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletColumn {
    /// Stable id of the column; survives renames and is what delta column
    /// groups record.
    pub unique_id: u32,
    pub name: String,
    pub data_type: DataType,
    pub is_key: bool,
    pub nullable: bool,
    /// Default value in its textual form, cast to `data_type` when used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl TabletColumn {
    pub fn new(unique_id: u32, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            unique_id,
            name: name.into(),
            data_type,
            is_key: false,
            nullable: true,
            default_value: None,
        }
    }

    pub fn key(unique_id: u32, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            is_key: true,
            nullable: false,
            ..Self::new(unique_id, name, data_type)
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn arrow_field(&self) -> Field {
        Field::new(&self.name, self.data_type.clone(), self.nullable)
    }

    /// An array of `num_rows` default values for this column.
    ///
    /// Columns without a default are filled with nulls, which is only legal
    /// for nullable columns.
    pub fn default_array(&self, num_rows: usize) -> Result<ArrayRef> {
        match &self.default_value {
            Some(value) => {
                let text = StringArray::from_iter_values(std::iter::repeat(value).take(num_rows));
                let array = cast(&text, &self.data_type)?;
                if array.null_count() > 0 {
                    return Err(Error::schema_violation(
                        format!(
                            "default value {:?} of column {} is not a valid {}",
                            value, self.name, self.data_type
                        ),
                        location!(),
                    ));
                }
                Ok(array)
            }
            None if self.nullable => Ok(new_null_array(&self.data_type, num_rows)),
            None => Err(Error::schema_violation(
                format!(
                    "column {} is not nullable, has no default and was not supplied",
                    self.name
                ),
                location!(),
            )),
        }
    }
}

/// The schema of a primary-key tablet.
///
/// Key columns come first, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletSchema {
    pub schema_version: u32,
    pub columns: Vec<TabletColumn>,
}

impl TabletSchema {
    pub fn try_new(schema_version: u32, columns: Vec<TabletColumn>) -> Result<Self> {
        let schema = Self {
            schema_version,
            columns,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        let num_keys = self.num_key_columns();
        if num_keys == 0 {
            return Err(Error::schema_violation(
                "a primary-key tablet needs at least one key column",
                location!(),
            ));
        }
        if self.columns[..num_keys].iter().any(|c| !c.is_key)
            || self.columns[num_keys..].iter().any(|c| c.is_key)
        {
            return Err(Error::schema_violation(
                "key columns must be a prefix of the schema",
                location!(),
            ));
        }
        if let Some(c) = self.columns[..num_keys].iter().find(|c| c.nullable) {
            return Err(Error::schema_violation(
                format!("key column {} must not be nullable", c.name),
                location!(),
            ));
        }
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for column in &self.columns {
            if !ids.insert(column.unique_id) || !names.insert(column.name.as_str()) {
                return Err(Error::schema_violation(
                    format!("duplicate column {} ({})", column.name, column.unique_id),
                    location!(),
                ));
            }
        }
        Ok(())
    }

    pub fn num_key_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.is_key).count()
    }

    pub fn key_columns(&self) -> &[TabletColumn] {
        &self.columns[..self.num_key_columns()]
    }

    pub fn key_column_names(&self) -> Vec<&str> {
        self.key_columns().iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_by_id(&self, unique_id: u32) -> Option<&TabletColumn> {
        self.columns.iter().find(|c| c.unique_id == unique_id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&TabletColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Resolve column ids, failing on any id the schema does not know.
    pub fn columns_by_ids(&self, ids: &[u32]) -> Result<Vec<&TabletColumn>> {
        ids.iter()
            .map(|id| {
                self.column_by_id(*id).ok_or_else(|| {
                    Error::schema_violation(
                        format!("column id {} is not part of schema version {}", id, self.schema_version),
                        location!(),
                    )
                })
            })
            .collect()
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(ArrowSchema::new(
            self.columns
                .iter()
                .map(TabletColumn::arrow_field)
                .collect::<Vec<_>>(),
        ))
    }

    /// Arrow schema of the given columns, in the given order.
    pub fn project_by_ids(&self, ids: &[u32]) -> Result<SchemaRef> {
        let fields = self
            .columns_by_ids(ids)?
            .into_iter()
            .map(TabletColumn::arrow_field)
            .collect::<Vec<_>>();
        Ok(Arc::new(ArrowSchema::new(fields)))
    }

    pub fn key_schema(&self) -> SchemaRef {
        Arc::new(ArrowSchema::new(
            self.key_columns()
                .iter()
                .map(TabletColumn::arrow_field)
                .collect::<Vec<_>>(),
        ))
    }
}
