// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

pub mod address;
pub mod delvec;
pub mod parse;
pub mod testing;
