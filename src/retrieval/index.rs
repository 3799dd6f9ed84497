//! In-memory vector index over ingested filing chunks
//!
//! Chunks are sharded per ticker. Each shard sits behind its own `RwLock`:
//! queries hold the read side while scoring, ingestion swaps a source's
//! chunk set under the write side, so a reader sees either the old set or
//! the new one, never a mix.

use crate::error::AnalysisError;
use crate::models::{normalize_ticker, DocumentChunk, RetrievalResult, ScoredChunk, SourceDocument};
use crate::retrieval::chunker::{self, ChunkingConfig};
use crate::retrieval::embedding::{cosine_similarity, Embedder};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
struct TickerShard {
    /// Kept sorted by (source_document, offset)
    chunks: Vec<DocumentChunk>,
}

impl TickerShard {
    fn fingerprint(&self, source: &str) -> Vec<(usize, &str)> {
        self.chunks
            .iter()
            .filter(|c| c.source_document == source)
            .map(|c| (c.offset, c.content_hash.as_str()))
            .collect()
    }

    fn chunks_for(&self, source: &str) -> Vec<DocumentChunk> {
        self.chunks
            .iter()
            .filter(|c| c.source_document == source)
            .cloned()
            .collect()
    }

    fn replace_source(&mut self, source: &str, chunks: Vec<DocumentChunk>) {
        self.chunks.retain(|c| c.source_document != source);
        self.chunks.extend(chunks);
        self.chunks.sort_by(|a, b| {
            a.source_document
                .cmp(&b.source_document)
                .then(a.offset.cmp(&b.offset))
        });
    }
}

/// Summary of a batch ingestion
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionReport {
    pub documents: usize,
    pub documents_changed: usize,
    pub documents_unchanged: usize,
    /// Sources dropped because they are no longer in the batch
    pub documents_removed: usize,
    pub chunks_written: usize,
    /// Total chunks held per ticker after the batch
    pub chunks_by_ticker: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    dimensions: usize,
    chunks: Vec<DocumentChunk>,
}

/// Owned retrieval index, shared by reference with every specialist
pub struct RetrievalIndex {
    shards: RwLock<HashMap<String, Arc<RwLock<TickerShard>>>>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
}

impl RetrievalIndex {
    pub fn new(embedder: Arc<dyn Embedder>, chunking: ChunkingConfig) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            embedder,
            chunking,
        }
    }

    async fn shard(&self, ticker: &str) -> Option<Arc<RwLock<TickerShard>>> {
        self.shards.read().await.get(ticker).cloned()
    }

    async fn shard_or_create(&self, ticker: &str) -> Arc<RwLock<TickerShard>> {
        if let Some(shard) = self.shard(ticker).await {
            return shard;
        }

        let mut shards = self.shards.write().await;
        shards
            .entry(ticker.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(TickerShard::default())))
            .clone()
    }

    /// Split, embed and store a document.
    ///
    /// Returns the document's chunk set. Re-ingesting an unchanged document
    /// returns the stored chunks without touching the index; a changed
    /// document replaces its previous chunks.
    pub async fn ingest(&self, document: &SourceDocument) -> Result<Vec<DocumentChunk>> {
        self.ingest_inner(document).await.map(|(chunks, _)| chunks)
    }

    async fn ingest_inner(&self, document: &SourceDocument) -> Result<(Vec<DocumentChunk>, bool)> {
        let ticker = normalize_ticker(&document.ticker);
        if ticker.is_empty() {
            return Err(AnalysisError::IngestionError(format!(
                "document {} has no ticker",
                document.source
            )));
        }

        let spans = chunker::split_text(&document.text, &self.chunking);
        if spans.is_empty() {
            warn!(source = %document.source, "Document has no text to index");
            let Some(shard) = self.shard(&ticker).await else {
                return Ok((Vec::new(), false));
            };
            let mut guard = shard.write().await;
            if guard.fingerprint(&document.source).is_empty() {
                return Ok((Vec::new(), false));
            }
            guard.replace_source(&document.source, Vec::new());
            info!(ticker = %ticker, source = %document.source, "Emptied document removed from index");
            return Ok((Vec::new(), true));
        }

        let hashes: Vec<String> = spans.iter().map(|s| chunker::content_hash(s.text)).collect();
        let incoming: Vec<(usize, &str)> = spans
            .iter()
            .zip(hashes.iter())
            .map(|(s, h)| (s.offset, h.as_str()))
            .collect();

        let shard = self.shard_or_create(&ticker).await;

        {
            let guard = shard.read().await;
            if guard.fingerprint(&document.source) == incoming {
                debug!(source = %document.source, "Document unchanged, skipping");
                return Ok((guard.chunks_for(&document.source), false));
            }
        }

        // Embed outside the lock; readers keep working on the old set meanwhile.
        let texts: Vec<String> = spans.iter().map(|s| s.text.to_string()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(AnalysisError::IngestionError(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                texts.len()
            )));
        }

        let chunks: Vec<DocumentChunk> = spans
            .iter()
            .zip(hashes.iter().cloned())
            .zip(embeddings)
            .map(|((span, hash), embedding)| DocumentChunk {
                id: chunker::chunk_id(&ticker, &document.source, span.offset, &hash),
                ticker: ticker.clone(),
                source_document: document.source.clone(),
                text: span.text.to_string(),
                content_hash: hash,
                embedding,
                offset: span.offset,
            })
            .collect();

        let mut guard = shard.write().await;
        if guard.fingerprint(&document.source) == incoming {
            // another writer stored the same content while we were embedding
            return Ok((guard.chunks_for(&document.source), false));
        }
        guard.replace_source(&document.source, chunks.clone());

        info!(
            ticker = %ticker,
            source = %document.source,
            chunks = chunks.len(),
            "Document ingested"
        );

        Ok((chunks, true))
    }

    /// Ingest a batch of documents and summarize what changed
    pub async fn ingest_all(&self, documents: &[SourceDocument]) -> Result<IngestionReport> {
        let mut report = IngestionReport {
            documents: documents.len(),
            ..IngestionReport::default()
        };

        for document in documents {
            let (chunks, changed) = self.ingest_inner(document).await?;
            if changed {
                report.documents_changed += 1;
                report.chunks_written += chunks.len();
            } else {
                report.documents_unchanged += 1;
            }
        }

        for ticker in self.tickers().await {
            let count = self.chunk_count(&ticker).await;
            report.chunks_by_ticker.insert(ticker, count);
        }

        Ok(report)
    }

    /// Ingest a complete document set: as `ingest_all`, then drop every
    /// stored source the set no longer contains.
    pub async fn sync_all(&self, documents: &[SourceDocument]) -> Result<IngestionReport> {
        let mut report = self.ingest_all(documents).await?;

        let mut keep: HashMap<String, BTreeSet<&str>> = HashMap::new();
        for document in documents {
            keep.entry(normalize_ticker(&document.ticker))
                .or_default()
                .insert(document.source.as_str());
        }

        let shards: Vec<(String, Arc<RwLock<TickerShard>>)> = self
            .shards
            .read()
            .await
            .iter()
            .map(|(ticker, shard)| (ticker.clone(), shard.clone()))
            .collect();

        for (ticker, shard) in shards {
            let kept = keep.get(&ticker);
            let mut guard = shard.write().await;
            let stale: BTreeSet<String> = guard
                .chunks
                .iter()
                .filter(|c| !kept.map_or(false, |sources| sources.contains(c.source_document.as_str())))
                .map(|c| c.source_document.clone())
                .collect();

            for source in &stale {
                guard.replace_source(source, Vec::new());
                info!(ticker = %ticker, source = %source, "Removed source no longer present");
            }
            report.documents_removed += stale.len();
        }

        if report.documents_removed > 0 {
            self.shards.write().await.retain(|_, shard| {
                shard.try_read().map_or(true, |guard| !guard.chunks.is_empty())
            });
            report.chunks_by_ticker.clear();
            for ticker in self.tickers().await {
                let count = self.chunk_count(&ticker).await;
                report.chunks_by_ticker.insert(ticker, count);
            }
        }

        Ok(report)
    }

    /// Top-k chunks for `ticker` by cosine similarity to `text`.
    ///
    /// Fails with `RetrievalUnavailable` when the ticker has no chunks.
    pub async fn query(&self, ticker: &str, text: &str, k: usize) -> Result<RetrievalResult> {
        let ticker = normalize_ticker(ticker);

        let shard = self
            .shard(&ticker)
            .await
            .ok_or_else(|| AnalysisError::RetrievalUnavailable(ticker.clone()))?;

        if shard.read().await.chunks.is_empty() {
            return Err(AnalysisError::RetrievalUnavailable(ticker));
        }

        let query_vector = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::IngestionError("embedder returned no vector".to_string()))?;

        let guard = shard.read().await;
        if guard.chunks.is_empty() {
            return Err(AnalysisError::RetrievalUnavailable(ticker));
        }

        let mut scored: Vec<(f32, &DocumentChunk)> = guard
            .chunks
            .iter()
            .map(|chunk| {
                let similarity = cosine_similarity(&query_vector, &chunk.embedding).unwrap_or(0.0);
                (similarity, chunk)
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then(a.offset.cmp(&b.offset))
                .then(a.source_document.cmp(&b.source_document))
        });

        let hits: RetrievalResult = scored
            .into_iter()
            .take(k)
            .map(|(similarity, chunk)| ScoredChunk {
                chunk: chunk.clone(),
                similarity,
            })
            .collect();

        debug!(ticker = %ticker, k, hits = hits.len(), "Retrieval query served");

        Ok(hits)
    }

    pub async fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.shards.read().await.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub async fn chunk_count(&self, ticker: &str) -> usize {
        match self.shard(&normalize_ticker(ticker)).await {
            Some(shard) => shard.read().await.chunks.len(),
            None => 0,
        }
    }

    pub async fn has_ticker(&self, ticker: &str) -> bool {
        self.chunk_count(ticker).await > 0
    }

    /// Persist every chunk as a JSON snapshot
    pub async fn save_snapshot(&self, path: &Path) -> Result<usize> {
        let mut chunks = Vec::new();
        for ticker in self.tickers().await {
            if let Some(shard) = self.shard(&ticker).await {
                chunks.extend(shard.read().await.chunks.iter().cloned());
            }
        }

        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            dimensions: self.embedder.dimensions(),
            chunks,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(path, bytes).await?;

        info!(path = %path.display(), chunks = snapshot.chunks.len(), "Index snapshot saved");
        Ok(snapshot.chunks.len())
    }

    /// Load chunks from a snapshot written by `save_snapshot`.
    ///
    /// Sources present in the snapshot replace whatever the index holds for them.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AnalysisError::IngestionError(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if snapshot.dimensions != self.embedder.dimensions() {
            return Err(AnalysisError::ConfigError(format!(
                "snapshot was built with {}-dimensional embeddings, embedder produces {}",
                snapshot.dimensions,
                self.embedder.dimensions()
            )));
        }

        let mut grouped: BTreeMap<(String, String), Vec<DocumentChunk>> = BTreeMap::new();
        for chunk in snapshot.chunks {
            grouped
                .entry((chunk.ticker.clone(), chunk.source_document.clone()))
                .or_default()
                .push(chunk);
        }

        let mut loaded = 0;
        for ((ticker, source), chunks) in grouped {
            loaded += chunks.len();
            let shard = self.shard_or_create(&ticker).await;
            shard.write().await.replace_source(&source, chunks);
        }

        info!(path = %path.display(), chunks = loaded, "Index snapshot loaded");
        Ok(loaded)
    }
}
