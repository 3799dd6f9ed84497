//! Fixed-size sliding-window chunking
//!
//! Windows are measured in characters, not bytes, so multi-byte text
//! (filings are often bilingual) never splits inside a code point.

use crate::error::AnalysisError;
use crate::Result;
use sha2::{Digest, Sha256};

/// Chunking parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Target window size in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive windows
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AnalysisError::ConfigError(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AnalysisError::ConfigError(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }
}

/// A window of the source text, borrowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan<'a> {
    /// Character offset into the source text
    pub offset: usize,
    pub text: &'a str,
}

/// Split `text` into overlapping windows.
///
/// The trailing window may be shorter than `chunk_size` and is kept.
/// Whitespace-only windows are skipped.
pub fn split_text<'a>(text: &'a str, config: &ChunkingConfig) -> Vec<TextSpan<'a>> {
    let size = config.chunk_size.max(1);
    let step = config.step();

    // byte index of every char start, plus the end of the string
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + size).min(char_count);
        let slice = &text[boundaries[start]..boundaries[end]];

        if !slice.trim().is_empty() {
            spans.push(TextSpan {
                offset: start,
                text: slice,
            });
        }

        if end == char_count {
            break;
        }
        start += step;
    }

    spans
}

/// Hex SHA-256 of a chunk's text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Stable chunk id derived from where the chunk lives and what it holds
pub fn chunk_id(ticker: &str, source: &str, offset: usize, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ticker.as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.as_bytes());
    hasher.update([0x1f]);
    hasher.update(offset.to_le_bytes());
    hasher.update([0x1f]);
    hasher.update(content_hash.as_bytes());

    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn test_sliding_window_with_overlap() {
        let text = "abcdefghij";
        let spans = split_text(text, &config(4, 2));

        let texts: Vec<&str> = spans.iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["abcd", "cdef", "efgh", "ghij"]);

        let offsets: Vec<usize> = spans.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_short_boundary_chunk_is_retained() {
        let spans = split_text("abcdefg", &config(5, 1));
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].text, "efg");
        assert_eq!(spans[1].offset, 4);
    }

    #[test]
    fn test_text_shorter_than_window() {
        let spans = split_text("short", &config(1000, 200));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "short");
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        assert!(split_text("", &config(10, 2)).is_empty());
        assert!(split_text("     \n  ", &config(3, 1)).is_empty());
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "净利润同比增长百分之二十";
        let spans = split_text(text, &config(5, 1));
        assert!(spans.iter().all(|s| s.text.chars().count() <= 5));
        assert_eq!(spans[0].text, "净利润同比");
        assert_eq!(spans[1].offset, 4);
    }

    #[test]
    fn test_config_validation() {
        assert!(config(100, 20).validate().is_ok());
        assert!(config(0, 0).validate().is_err());
        assert!(config(100, 100).validate().is_err());
    }

    #[test]
    fn test_chunk_id_is_stable_and_position_sensitive() {
        let hash = content_hash("net income grew");
        let a = chunk_id("AAPL", "AAPL_10K.txt", 0, &hash);
        let b = chunk_id("AAPL", "AAPL_10K.txt", 0, &hash);
        let c = chunk_id("AAPL", "AAPL_10K.txt", 800, &hash);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
