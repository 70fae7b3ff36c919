// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

mod segment;

pub use segment::{
    read_segment_file, segment_file_name, update_file_name, write_segment_file, SegmentWriter,
};
