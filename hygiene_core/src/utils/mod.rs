//! Shared helpers

pub mod ranges;

pub use ranges::{list_to_range_string, range_string_to_list, ranges, RangeError, MAX_RANGE_VALUES};
