use anyhow::Result;
use async_trait::async_trait;

use crate::memory::chatlog::LogRef;

/// More newlines than this sends the content to the text store
pub const MAX_NEWLINES: usize = 5;
/// Content of at least this many UTF-8 bytes sends it to the text store
pub const MAX_BYTES: usize = 400;

/// Everything a text store may record about an overflowed message
#[derive(Debug, Clone, Copy)]
pub struct PasteRequest<'a> {
    pub content: &'a str,
    pub sender: &'a str,
    pub room: &'a str,
    pub date: Option<&'a str>,
    pub time: Option<&'a str>,
    /// Chat log entry of the original message
    pub log_ref: &'a LogRef,
}

/// External storage for long text. Returns a URL to the stored copy.
#[async_trait]
pub trait TextStore: Send + Sync {
    async fn store(&self, req: &PasteRequest<'_>) -> Result<String>;
}

pub fn should_overflow(content: &str) -> bool {
    content.matches('\n').count() > MAX_NEWLINES || content.len() >= MAX_BYTES
}

/// Split inline content into relayable lines, dropping blank ones.
/// CRLF line endings are accepted.
pub fn split_lines(content: &str) -> Vec<&str> {
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// The single line relayed in place of overflowed content
pub fn overflow_line(url: &str) -> String {
    format!("{} (long text)", url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newline_threshold() {
        assert!(!should_overflow("a\nb\nc\nd\ne\nf"));
        assert!(should_overflow("a\nb\nc\nd\ne\nf\ng"));
        assert!(should_overflow("\n\n\n\n\n\n"));
    }

    #[test]
    fn test_byte_threshold() {
        assert!(!should_overflow(&"x".repeat(399)));
        assert!(should_overflow(&"x".repeat(400)));
        // 134 three-byte characters: 402 bytes but only 134 chars
        assert!(should_overflow(&"中".repeat(134)));
        assert!(!should_overflow(&"中".repeat(133)));
    }

    #[test]
    fn test_split_drops_blank_lines() {
        let lines = split_lines("first\n\n   \n\tsecond \r\n\nthird");
        assert_eq!(lines, vec!["first", "\tsecond ", "third"]);
    }

    #[test]
    fn test_split_crlf_content() {
        let lines = split_lines("one\r\ntwo\r\n\r\nthree\r\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_lines("").is_empty());
        assert!(split_lines(" \n \n").is_empty());
    }

    #[test]
    fn test_overflow_line() {
        assert_eq!(overflow_line("http://p/1"), "http://p/1 (long text)");
    }
}
