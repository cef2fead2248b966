//! `Key : value` output such as `admin show <user>`
//!
//! ```text
//! Username      : user_test
//! Privileges    : Storage Administrator
//! ```
//!
//! Lines without a `:` are dropped silently.

use super::non_blank_lines;
use indexmap::IndexMap;

pub fn parse_key_values(text: &str) -> IndexMap<String, String> {
    non_blank_lines(text)
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_show() {
        let data = parse_key_values(
            "Username      : user_test\nPrivileges    : Storage Administrator\n",
        );
        assert_eq!(data["Username"], "user_test");
        assert_eq!(data["Privileges"], "Storage Administrator");
    }

    #[test]
    fn test_malformed_lines_dropped() {
        let data = parse_key_values("garbage\n\nTime: 10:20:30\n");
        assert_eq!(data.len(), 1);
        assert_eq!(data["Time"], "10:20:30");
    }
}
