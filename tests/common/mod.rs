#![allow(dead_code)]

pub use simplequeue_test_utils::builders;
pub use simplequeue_test_utils::fake_engine;
pub use simplequeue_test_utils::harness;
pub use simplequeue_test_utils::{init_tracing, with_timeout};

use std::path::Path;

/// Tab-separated `.STATUS` row for the task at `index`, if any.
pub fn status_row(rows: &[Vec<String>], index: u64) -> Option<&Vec<String>> {
    rows.iter().find(|row| row.first().map(String::as_str) == Some(index.to_string().as_str()))
}

pub fn read_to_string(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}
