// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Column-mode partial updates.
//!
//! A partial update rowset carries only the key columns and the updated
//! columns of each row. Applying it resolves every key to the row it
//! replaces, writes the updated columns of each touched segment as a delta
//! column file, and inserts the rows whose key is not in the tablet yet.

mod column_update_state;
mod conflict;
mod delta_writer;
mod index_updater;
mod loader;
mod manager;
mod resolver;
mod state;

pub use column_update_state::RowsetColumnUpdateState;
pub(crate) use index_updater::build_del_vecs;
pub use manager::UpdateManager;
pub use state::{BatchPks, ColumnPartialUpdateState, RowsetSegmentId};
