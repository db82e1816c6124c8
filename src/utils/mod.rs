//! Shared utility functions.

pub mod json_extraction;

pub use json_extraction::{extract_first_json_object, find_matching_brace};
