//! Financial statements specialist
//!
//! Evidence: filing excerpts from the retrieval index (required) plus trend
//! observations pulled out of those excerpts.

use crate::agents::{fail, EvidenceBundle, Importance, Reasoner, SpecialistAgent};
use crate::models::{AgentJudgment, Query, ScoredChunk, SpecialistKind};
use crate::retrieval::RetrievalIndex;
use crate::Result;
use async_trait::async_trait;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::info;

const TREND_PATTERNS: [&str; 2] = [
    r"(?i)\b(revenue|sales|net income|net profit|earnings per share|eps|operating income|gross margin|operating margin|net margin|free cash flow|operating cash flow|total debt)\b([^.%\d]{0,40}?)\b(grew|increased|rose|climbed|jumped|expanded|improved|declined|decreased|fell|dropped|shrank|contracted)\b([^.%\d]{0,20}?)(\d+(?:\.\d+)?)\s?%",
    r"(营业收入|营收|净利润|归母净利润|毛利率|净利率|经营现金流)([^。%\d]{0,10}?)(增长|上升|提高|增加|下降|减少|下滑)([^。%\d]{0,6}?)(\d+(?:\.\d+)?)\s?%",
];

fn trend_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        TREND_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn is_decline(verb: &str) -> bool {
    matches!(
        verb.to_lowercase().as_str(),
        "declined" | "decreased" | "fell" | "dropped" | "shrank" | "contracted" | "下降" | "减少" | "下滑"
    )
}

/// Percent changes of headline metrics mentioned in filing text, e.g.
/// "Net income grew 20% YoY" becomes `net income: +20.0%`.
///
/// "expanded to 30%" states a level, not a change, and is reported as one.
pub fn extract_trends(text: &str) -> Vec<String> {
    let mut observations = Vec::new();

    for re in trend_patterns() {
        for caps in re.captures_iter(text) {
            let metric = caps[1].to_lowercase();
            let verb = &caps[3];
            let gap = caps[4].trim().to_lowercase();
            let Ok(value) = caps[5].parse::<f64>() else {
                continue;
            };

            let observation = if gap == "to" || gap.ends_with(" to") || gap.ends_with("至") {
                format!("{}: {:.1}% (level)", metric, value)
            } else {
                let signed = if is_decline(verb) { -value } else { value };
                format!("{}: {:+.1}%", metric, signed)
            };

            if !observations.contains(&observation) {
                observations.push(observation);
            }
        }
    }

    observations
}

/// Union of two hit lists keeping each chunk's best similarity
pub(crate) fn merge_hits(lists: Vec<Vec<ScoredChunk>>, k: usize) -> Vec<ScoredChunk> {
    let mut best: HashMap<String, ScoredChunk> = HashMap::new();
    for hit in lists.into_iter().flatten() {
        match best.get(&hit.chunk.id) {
            Some(existing) if existing.similarity >= hit.similarity => {}
            _ => {
                best.insert(hit.chunk.id.clone(), hit);
            }
        }
    }

    let mut merged: Vec<ScoredChunk> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then(a.chunk.offset.cmp(&b.chunk.offset))
            .then(a.chunk.source_document.cmp(&b.chunk.source_document))
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    merged.truncate(k);
    merged
}

pub struct FinancialAnalyst {
    index: Arc<RetrievalIndex>,
    reasoner: Arc<Reasoner>,
}

impl FinancialAnalyst {
    pub fn new(index: Arc<RetrievalIndex>, reasoner: Arc<Reasoner>) -> Self {
        Self { index, reasoner }
    }

    async fn gather(&self, query: &Query) -> Result<EvidenceBundle> {
        let k = self.reasoner.config().retrieval_k;
        let mut bundle = EvidenceBundle::new();

        let primary = bundle.absorb(
            "filings",
            Importance::Required,
            self.index.query(&query.ticker, &query.question, k).await,
        )?;

        let hits = match primary {
            Some(primary) => {
                let highlights_query = format!(
                    "{} revenue net income earnings growth margin cash flow",
                    query.ticker
                );
                let highlights = bundle
                    .absorb(
                        "financial highlights",
                        Importance::Supplemental,
                        self.index.query(&query.ticker, &highlights_query, k).await,
                    )?
                    .unwrap_or_default();
                merge_hits(vec![primary, highlights], k)
            }
            None => Vec::new(),
        };

        if hits.is_empty() && bundle.missing_required.is_empty() {
            bundle.mark_missing("filings (no excerpts retrieved)", Importance::Required);
        }

        for hit in &hits {
            for observation in extract_trends(&hit.chunk.text) {
                if !bundle.observations.contains(&observation) {
                    bundle.observations.push(observation);
                }
            }
        }
        bundle.push_chunks(&hits);

        info!(
            ticker = %query.ticker,
            excerpts = hits.len(),
            trends = bundle.observations.len(),
            "Financial evidence gathered"
        );

        Ok(bundle)
    }
}

#[async_trait]
impl SpecialistAgent for FinancialAnalyst {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Financial
    }

    async fn analyze(&self, query: &Query) -> Result<AgentJudgment> {
        let run = async {
            let bundle = self.gather(query).await?;
            self.reasoner.judge(self.kind(), query, bundle).await
        };
        run.await.map_err(|e| fail(self.kind(), e))
    }
}
