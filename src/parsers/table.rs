//! Whitespace-aligned tables such as `vxdisk listtag`
//!
//! ```text
//! DEVICE              NAME       VALUE
//! emc_clariion0_110   vxfs_pool  pool1
//! ```
//!
//! The header is lower-cased; each following line is zipped against it.

use super::non_blank_lines;
use indexmap::IndexMap;

/// Rows keyed by the value of their unique column
pub type Table = IndexMap<String, IndexMap<String, String>>;

/// Parse a table keyed by `unique_key` (a lower-case header name)
///
/// Rows without a value for the unique column are skipped.
pub fn parse_table(text: &str, unique_key: &str) -> Table {
    let mut lines = non_blank_lines(text);
    let header: Vec<String> = match lines.next() {
        Some(line) => line.split_whitespace().map(str::to_lowercase).collect(),
        None => return Table::new(),
    };

    let mut table = Table::new();
    for line in lines {
        let row: IndexMap<String, String> = header
            .iter()
            .cloned()
            .zip(line.split_whitespace().map(str::to_string))
            .collect();
        if let Some(key) = row.get(unique_key).cloned() {
            table.insert(key, row);
        }
    }
    table
}
