//! Retrieval subsystem: chunking, embedding, the vector index and the
//! document loader that feeds it.

pub mod chunker;
pub mod embedding;
pub mod index;
pub mod loader;

pub use chunker::ChunkingConfig;
pub use embedding::{Embedder, HashingEmbedder, HttpEmbedder};
pub use index::{IngestionReport, RetrievalIndex};

use crate::config::Settings;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Pick the embedder the settings describe: the HTTP endpoint when one is
/// configured, local feature hashing otherwise.
pub fn build_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    match &settings.embedding_api_base {
        Some(base) => {
            info!(base = %base, model = %settings.embedding_model, "Using HTTP embedder");
            Ok(Arc::new(HttpEmbedder::new(
                base,
                settings.embedding_api_key.clone(),
                &settings.embedding_model,
                settings.embedding_dimensions,
            )?))
        }
        None => {
            info!(dimensions = settings.embedding_dimensions, "Using local hashing embedder");
            Ok(Arc::new(HashingEmbedder::new(settings.embedding_dimensions)))
        }
    }
}

/// Build an index from settings, restoring the snapshot when one exists.
pub async fn open_index(settings: &Settings) -> Result<Arc<RetrievalIndex>> {
    let index = Arc::new(RetrievalIndex::new(build_embedder(settings)?, settings.chunking()));

    if tokio::fs::try_exists(&settings.vector_store_path).await? {
        index.load_snapshot(&settings.vector_store_path).await?;
    }

    Ok(index)
}

/// Ingest the configured document directory and persist the snapshot.
///
/// The directory is the full document set: sources deleted from it are
/// dropped from the index. A missing directory only adds nothing.
pub async fn ingest_directory(settings: &Settings, index: &RetrievalIndex) -> Result<IngestionReport> {
    let dir = &settings.document_directory;
    let documents = loader::load_directory(dir).await?;
    let report = if tokio::fs::try_exists(dir).await? {
        index.sync_all(&documents).await?
    } else {
        index.ingest_all(&documents).await?
    };

    if report.documents_changed > 0 || report.documents_removed > 0 {
        index.save_snapshot(&settings.vector_store_path).await?;
    }

    info!(
        documents = report.documents,
        changed = report.documents_changed,
        removed = report.documents_removed,
        chunks_written = report.chunks_written,
        "Ingestion finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deleted_files_leave_the_index_and_snapshot() {
        let root = std::env::temp_dir().join(format!("ingest-{}", uuid::Uuid::new_v4()));
        let docs = root.join("docs");
        tokio::fs::create_dir_all(&docs).await.unwrap();
        tokio::fs::write(docs.join("AAPL_10K.txt"), "Net income grew 20% YoY.").await.unwrap();
        tokio::fs::write(docs.join("MSFT_10K.txt"), "Cloud revenue grew 30%.").await.unwrap();

        let settings = Settings {
            document_directory: docs.clone(),
            vector_store_path: root.join("store/index.json"),
            embedding_dimensions: 64,
            ..Settings::default()
        };

        let index = open_index(&settings).await.unwrap();
        let report = ingest_directory(&settings, &index).await.unwrap();
        assert_eq!(report.documents_changed, 2);
        assert!(index.has_ticker("MSFT").await);

        tokio::fs::remove_file(docs.join("MSFT_10K.txt")).await.unwrap();
        let report = ingest_directory(&settings, &index).await.unwrap();
        assert_eq!(report.documents_removed, 1);
        assert_eq!(report.documents_unchanged, 1);
        assert!(!index.has_ticker("MSFT").await);

        let reopened = open_index(&settings).await.unwrap();
        assert_eq!(reopened.tickers().await, vec!["AAPL".to_string()]);

        // a vanished directory must not wipe what is already indexed
        tokio::fs::remove_dir_all(&docs).await.unwrap();
        let report = ingest_directory(&settings, &index).await.unwrap();
        assert_eq!(report.documents_removed, 0);
        assert!(index.has_ticker("AAPL").await);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
