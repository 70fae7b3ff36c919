// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

mod key;
mod primary;

pub use key::{key_bytes, PrimaryKeyEncoder};
pub use primary::{DeletesMap, InMemoryPrimaryIndex, PrimaryIndex};
