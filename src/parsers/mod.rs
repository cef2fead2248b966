//! Parsers for appliance command output
//!
//! The CLI family prints loosely structured text. Each parser here turns one
//! output shape into ordered maps:
//!
//! - [`keyvalue`]: `Key : value` lines
//! - [`properties`]: the YAML-like dumps of `vxdisk list`, `vxdg -q list`
//!   and `storage fs list <name>`
//! - [`table`]: whitespace-aligned tables with a header row
//! - [`vxprint`]: the block-structured `vxprint` topology dump

pub mod keyvalue;
pub mod properties;
pub mod table;
pub mod vxprint;

pub use keyvalue::parse_key_values;
pub use properties::{parse_simple, parse_typed, Properties, PropertyValue};
pub use table::{parse_table, Table};
pub use vxprint::{parse_vxprint, VxBlock, VxRecord, VxTopology};

use crate::error::{Error, Result};
use regex::{Captures, Regex};

/// Non-blank lines of an output
pub fn non_blank_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|l| !l.trim().is_empty())
}

/// Match a listing line against display patterns, first match wins
pub fn match_display_line<'l>(
    patterns: &[Regex],
    line: &'l str,
    nas: &str,
) -> Result<Captures<'l>> {
    patterns
        .iter()
        .find_map(|p| p.captures(line))
        .ok_or_else(|| {
            Error::UnexpectedOutput(format!(
                "It's not possible to parse the output received from {}, as it may be corrupted. Line output: \"{}\".",
                nas, line
            ))
        })
}

/// Named group of a display match, `None` when absent or empty
pub fn group<'l>(caps: &Captures<'l>, name: &str) -> Option<&'l str> {
    caps.name(name).map(|m| m.as_str()).filter(|s| !s.is_empty())
}
