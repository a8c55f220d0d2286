//! Unsigned-integer and id-list parsing.
//!
//! Shared by the CLI (`--groups 1,2,3`) and the process-status reader
//! (`"Gid:\t1000\t1000\t1000\t1000"`). Parsing is strict: partial, negative,
//! empty and overflowing input are all rejected, and a single malformed
//! token fails the whole list.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty field")]
    Empty,

    #[error("malformed unsigned integer {0:?}")]
    Malformed(String),
}

/// Parses a decimal u32.
pub fn parse_u32(text: &str) -> Result<u32, ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    text.parse::<u32>()
        .map_err(|_| ParseError::Malformed(text.to_string()))
}

/// Parses a decimal u64.
pub fn parse_u64(text: &str) -> Result<u64, ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    text.parse::<u64>()
        .map_err(|_| ParseError::Malformed(text.to_string()))
}

/// Splits `line` on any of `separators`, discards the first `skip`
/// non-empty tokens and parses the rest as u32s.
///
/// Consecutive separators are collapsed, so `"1,,2"` reads as two tokens.
pub fn split_ids_skip(line: &str, separators: &[char], skip: usize) -> Result<Vec<u32>, ParseError> {
    line.split(|c: char| separators.contains(&c))
        .filter(|token| !token.is_empty())
        .skip(skip)
        .map(parse_u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u32_accepts_plain_decimals() {
        assert_eq!(parse_u32("0").unwrap(), 0);
        assert_eq!(parse_u32("10123").unwrap(), 10123);
        assert_eq!(parse_u32("4294967295").unwrap(), u32::MAX);
    }

    #[test]
    fn parse_u32_rejects_bad_input() {
        assert_eq!(parse_u32(""), Err(ParseError::Empty));
        assert!(parse_u32("-1").is_err());
        assert!(parse_u32("12abc").is_err());
        assert!(parse_u32("4294967296").is_err());
        assert!(parse_u32(" 1").is_err());
    }

    #[test]
    fn parse_u64_widths() {
        assert_eq!(parse_u64("4294967296").unwrap(), 1 << 32);
        assert!(parse_u64("18446744073709551616").is_err());
    }

    #[test]
    fn split_comma_list() {
        assert_eq!(split_ids_skip("1,2,3", &[','], 0).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn split_status_line_skips_label() {
        let line = "Gid:\t1000\t1000\t1000\t1000";
        assert_eq!(
            split_ids_skip(line, &[' ', '\t'], 1).unwrap(),
            vec![1000, 1000, 1000, 1000]
        );
    }

    #[test]
    fn split_collapses_consecutive_separators() {
        assert_eq!(split_ids_skip("1,,2", &[','], 0).unwrap(), vec![1, 2]);
    }

    #[test]
    fn split_fails_whole_call_on_one_bad_token() {
        assert!(split_ids_skip("1,x,3", &[','], 0).is_err());
    }

    #[test]
    fn split_empty_line_is_empty_list() {
        assert_eq!(split_ids_skip("", &[','], 0).unwrap(), Vec::<u32>::new());
        assert_eq!(
            split_ids_skip("Groups:", &[' ', '\t'], 1).unwrap(),
            Vec::<u32>::new()
        );
    }
}
