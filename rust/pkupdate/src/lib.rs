// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Primary-key tablets with column-mode partial updates.
//!
//! A [`Tablet`] holds committed rowsets, their delete vectors and delta
//! column groups, and a primary index. Rowsets are written, committed to a
//! sequence of segment ids, and then applied one at a time. Column partial
//! update rowsets are applied by a [`RowsetColumnUpdateState`], which the
//! [`UpdateManager`] can load ahead of the apply.

pub mod config;
pub mod tablet;
pub mod update;

pub use config::UpdateConfig;
pub use pkupdate_core::{Error, Result};
pub use tablet::{ApplyContext, CommitUnit, Tablet};
pub use update::{RowsetColumnUpdateState, UpdateManager};
