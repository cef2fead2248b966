//! YAML-like property dumps of the `vx*` tools and `storage fs list <name>`
//!
//! ```text
//! Block Size:      1024 Bytes
//! alignment: 8192 (bytes)
//! config:    seqno=0.530510 permlen=51360 free=50174 templen=267
//! Rollsync Status:
//!     Rollback snap1, Tier 1: 83.59%  Start_time: Jul/15/2015/11:33:19 ...
//! ```
//!
//! A line splits on its first `:`, or its first space when there is no colon.
//! A key with an empty value opens a nested block made of the following
//! indented lines; the block closes on the next line starting at column 0.
//! `Tier Info:` takes its value from the line two rows below.

use super::non_blank_lines;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

const TIER_INFO: &str = "Tier Info:";

/// Parsed property map, in output order
pub type Properties = IndexMap<String, PropertyValue>;

/// A property value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    List(Vec<PropertyValue>),
    /// `key=value` pairs found in one value
    Map(IndexMap<String, PropertyValue>),
    /// Indented block under a key with no inline value
    Nested(Properties),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Entries of a `key=value` map or of a nested block
    pub fn as_map(&self) -> Option<&IndexMap<String, PropertyValue>> {
        match self {
            PropertyValue::Map(m) | PropertyValue::Nested(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Scalars and lists joined with spaces, maps as `k=v`
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    fn text(value: &str) -> Self {
        PropertyValue::Text(value.trim().to_string())
    }

    fn scalar(value: &str) -> Self {
        let value = value.trim();
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = value.parse() {
                return PropertyValue::Int(n);
            }
        }
        PropertyValue::Text(value.to_string())
    }

    /// Decompose a raw value into a map, list or scalar
    ///
    /// `key=value` pairs win over plain items when both occur, so
    /// `min=512 (bytes)` yields only `{min: 512}`.
    fn typed(value: &str) -> Self {
        let mut items: Vec<&str> = value.split(',').collect();
        if items.len() == 1 {
            items = value.split_whitespace().collect();
        }

        let mut map = IndexMap::new();
        let mut list = Vec::new();
        for item in items {
            match item.split_once('=') {
                Some((k, v)) => {
                    map.insert(k.trim().to_string(), Self::scalar(v));
                }
                None => list.push(Self::scalar(item)),
            }
        }

        if !map.is_empty() {
            PropertyValue::Map(map)
        } else if list.len() == 1 {
            list.remove(0)
        } else {
            PropertyValue::List(list)
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Text(s) => write!(f, "{}", s),
            PropertyValue::Int(n) => write!(f, "{}", n),
            PropertyValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join(" "))
            }
            PropertyValue::Map(m) | PropertyValue::Nested(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}", parts.join(" "))
            }
        }
    }
}

/// Parse keeping every value as trimmed text
pub fn parse_simple(text: &str) -> Properties {
    parse_with(text, PropertyValue::text)
}

/// Parse decomposing values into maps, lists and integers
pub fn parse_typed(text: &str) -> Properties {
    parse_with(text, PropertyValue::typed)
}

fn parse_with(text: &str, value_of: fn(&str) -> PropertyValue) -> Properties {
    let lines: Vec<&str> = non_blank_lines(text).collect();
    let mut data = Properties::new();
    let mut nested: Option<(String, Properties)> = None;

    for (idx, line) in lines.iter().enumerate() {
        let (key, value) = if line.contains(TIER_INFO) {
            let value = lines.get(idx + 2).copied().unwrap_or_default();
            (TIER_INFO.trim_end_matches(':'), value)
        } else if let Some(split) = line.split_once(':') {
            split
        } else if let Some(split) = line.split_once(' ') {
            split
        } else {
            continue;
        };

        let indented = key.starts_with(|c: char| c.is_whitespace());
        if indented {
            if let Some((_, block)) = nested.as_mut() {
                block.insert(key.trim().to_string(), value_of(value));
                continue;
            }
        }

        flush(&mut data, nested.take());
        if value.trim().is_empty() {
            nested = Some((key.trim().to_string(), Properties::new()));
            continue;
        }
        data.insert(key.trim().to_string(), value_of(value));
    }

    flush(&mut data, nested);
    data
}

fn flush(data: &mut Properties, nested: Option<(String, Properties)>) {
    if let Some((key, block)) = nested {
        if !block.is_empty() {
            data.insert(key, PropertyValue::Nested(block));
        }
    }
}
