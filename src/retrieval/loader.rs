//! Document directory loader
//!
//! Reads `.txt` and `.md` files recursively. The ticker is the file stem
//! prefix before the first `_`, so `AAPL_10K_2024.txt` belongs to AAPL.

use crate::error::AnalysisError;
use crate::models::{normalize_ticker, SourceDocument};
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Ticker encoded in a document file name, if any
pub fn ticker_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let prefix = stem.split('_').next()?.trim();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return None;
    }
    Some(normalize_ticker(prefix))
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

async fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && is_document(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Load every document under `dir`.
///
/// A missing directory yields an empty list. Files without a ticker prefix
/// or with non-UTF-8 content are skipped.
pub async fn load_directory(dir: &Path) -> Result<Vec<SourceDocument>> {
    if !tokio::fs::try_exists(dir).await? {
        warn!(dir = %dir.display(), "Document directory does not exist");
        return Ok(Vec::new());
    }

    let metadata = tokio::fs::metadata(dir).await?;
    if !metadata.is_dir() {
        return Err(AnalysisError::IngestionError(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut documents = Vec::new();
    for path in collect_files(dir).await? {
        let Some(ticker) = ticker_from_path(&path) else {
            warn!(path = %path.display(), "No ticker prefix in file name, skipping");
            continue;
        };

        let bytes = tokio::fs::read(&path).await?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                warn!(path = %path.display(), "Document is not valid UTF-8, skipping");
                continue;
            }
        };

        let source = path
            .strip_prefix(dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");

        debug!(ticker = %ticker, source = %source, "Loaded document");
        documents.push(SourceDocument { ticker, source, text });
    }

    info!(dir = %dir.display(), documents = documents.len(), "Document directory loaded");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_from_file_name() {
        assert_eq!(ticker_from_path(Path::new("AAPL_10K_2024.txt")), Some("AAPL".to_string()));
        assert_eq!(ticker_from_path(Path::new("reports/msft_annual.md")), Some("MSFT".to_string()));
        assert_eq!(ticker_from_path(Path::new("BRK.B.txt")), Some("BRK.B".to_string()));
        assert_eq!(ticker_from_path(Path::new("_notes.txt")), None);
        assert_eq!(ticker_from_path(Path::new("年报_2024.txt")), None);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
        let docs = load_directory(&dir).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_loads_supported_files_recursively() {
        let dir = std::env::temp_dir().join(format!("docs-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(dir.join("2024")).await.unwrap();
        tokio::fs::write(dir.join("AAPL_10K.txt"), "Net income grew 20% YoY.").await.unwrap();
        tokio::fs::write(dir.join("2024/MSFT_q4.md"), "Cloud revenue grew.").await.unwrap();
        tokio::fs::write(dir.join("AAPL_chart.png"), [0x89, 0x50]).await.unwrap();
        tokio::fs::write(dir.join("TSLA_bad.txt"), [0xff, 0xfe, 0xfd]).await.unwrap();

        let docs = load_directory(&dir).await.unwrap();
        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["2024/MSFT_q4.md", "AAPL_10K.txt"]);
        assert_eq!(docs[1].ticker, "AAPL");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
