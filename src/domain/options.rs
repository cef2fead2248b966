//! Comma separated option lists compared as sets

use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Share export options such as `rw,no_root_squash`
///
/// Order and duplicates do not matter for equality: `rw,sync` equals
/// `sync,rw`. Display keeps the original order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct StringOptions {
    items: Vec<String>,
}

impl StringOptions {
    pub fn parse(text: &str) -> Self {
        let mut options = StringOptions::default();
        for item in text.split(',') {
            options.insert(item);
        }
        options
    }

    /// Add an option unless it is already present
    pub fn insert(&mut self, option: &str) {
        let option = option.trim();
        if !option.is_empty() && !self.contains(option) {
            self.items.push(option.to_string());
        }
    }

    pub fn contains(&self, option: &str) -> bool {
        self.items.iter().any(|o| o == option)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    fn as_set(&self) -> BTreeSet<&str> {
        self.iter().collect()
    }
}

impl PartialEq for StringOptions {
    fn eq(&self, other: &Self) -> bool {
        self.as_set() == other.as_set()
    }
}

impl Eq for StringOptions {}

impl From<&str> for StringOptions {
    fn from(text: &str) -> Self {
        StringOptions::parse(text)
    }
}

impl fmt::Display for StringOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.items.join(","))
    }
}

impl Serialize for StringOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_equality() {
        assert_eq!(StringOptions::parse("rw,sync"), StringOptions::parse("sync, rw"));
        assert_eq!(StringOptions::parse("rw,rw,sync"), StringOptions::parse("sync,rw"));
        assert_ne!(StringOptions::parse("rw"), StringOptions::parse("ro"));
    }

    #[test]
    fn test_display_and_insert() {
        let mut options = StringOptions::parse("rw,,no_root_squash");
        assert_eq!(options.to_string(), "rw,no_root_squash");
        options.insert("nordirplus");
        options.insert("rw");
        assert_eq!(options.to_string(), "rw,no_root_squash,nordirplus");
        assert_eq!(options.len(), 3);
    }
}
