//! Specialist agents
//!
//! Each specialist gathers evidence (retrieval and/or tools), then makes one
//! reasoning call that turns the evidence into an `AgentJudgment`.

pub mod financial;
pub mod judgment;
pub mod market;
pub mod reasoning;
pub mod valuation;

pub use financial::FinancialAnalyst;
pub use market::MarketAnalyst;
pub use reasoning::Reasoner;
pub use valuation::ValuationExpert;

use crate::error::AnalysisError;
use crate::models::{AgentJudgment, DcfAssumptions, Evidence, Query, ScoredChunk, SpecialistKind};
use crate::Result;
use async_trait::async_trait;
use tracing::warn;

const EXCERPT_CHARS: usize = 400;

/// Trait implemented by every specialist
#[async_trait]
pub trait SpecialistAgent: Send + Sync {
    fn kind(&self) -> SpecialistKind;

    /// Produce one judgment, or `AgentFailed`
    async fn analyze(&self, query: &Query) -> Result<AgentJudgment>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistConfig {
    /// Chunks requested per retrieval query
    pub retrieval_k: usize,
    /// Confidence ceiling when required evidence is missing
    pub evidence_free_confidence_ceiling: f64,
    /// Confidence ceiling when only supplemental evidence is missing
    pub partial_evidence_confidence_ceiling: f64,
    pub dcf: DcfAssumptions,
}

impl Default for SpecialistConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 5,
            evidence_free_confidence_ceiling: 0.3,
            partial_evidence_confidence_ceiling: 0.7,
            dcf: DcfAssumptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Required,
    Supplemental,
}

/// How much of the evidence a specialist wanted it actually got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Full,
    Partial,
    EvidenceFree,
}

impl Coverage {
    pub fn ceiling(&self, config: &SpecialistConfig) -> Option<f64> {
        match self {
            Coverage::Full => None,
            Coverage::Partial => Some(config.partial_evidence_confidence_ceiling),
            Coverage::EvidenceFree => Some(config.evidence_free_confidence_ceiling),
        }
    }
}

/// Evidence gathered ahead of the reasoning step
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    pub evidence: Vec<Evidence>,
    /// Facts derived from the evidence, e.g. growth rates found in filings
    pub observations: Vec<String>,
    pub missing_required: Vec<String>,
    pub missing_supplemental: Vec<String>,
}

impl EvidenceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coverage(&self) -> Coverage {
        if !self.missing_required.is_empty() {
            Coverage::EvidenceFree
        } else if !self.missing_supplemental.is_empty() {
            Coverage::Partial
        } else {
            Coverage::Full
        }
    }

    pub fn mark_missing(&mut self, label: impl Into<String>, importance: Importance) {
        let label = label.into();
        match importance {
            Importance::Required => self.missing_required.push(label),
            Importance::Supplemental => self.missing_supplemental.push(label),
        }
    }

    /// Keep a gather result, or record a recoverable failure as a gap.
    ///
    /// Non-recoverable errors are returned to the caller.
    pub fn absorb<T>(&mut self, label: &str, importance: Importance, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_recoverable() => {
                warn!(evidence = label, error = %e, "Evidence unavailable, degrading");
                self.mark_missing(format!("{} ({})", label, e), importance);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn push_chunks(&mut self, hits: &[ScoredChunk]) {
        self.evidence.extend(hits.iter().map(chunk_evidence));
    }
}

pub fn chunk_evidence(hit: &ScoredChunk) -> Evidence {
    let text = hit.chunk.text.trim();
    let excerpt = match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    };

    Evidence::Chunk {
        chunk_id: hit.chunk.id.clone(),
        source_document: hit.chunk.source_document.clone(),
        excerpt,
        similarity: hit.similarity,
    }
}

/// Turn any error from the gather or reasoning step into `AgentFailed`
pub(crate) fn fail(kind: SpecialistKind, err: AnalysisError) -> AnalysisError {
    match err {
        already @ AnalysisError::AgentFailed { .. } => already,
        other => AnalysisError::agent_failed(kind, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_levels() {
        let mut bundle = EvidenceBundle::new();
        assert_eq!(bundle.coverage(), Coverage::Full);

        bundle.mark_missing("sentiment", Importance::Supplemental);
        assert_eq!(bundle.coverage(), Coverage::Partial);

        bundle.mark_missing("price", Importance::Required);
        assert_eq!(bundle.coverage(), Coverage::EvidenceFree);

        let config = SpecialistConfig::default();
        assert_eq!(Coverage::EvidenceFree.ceiling(&config), Some(0.3));
        assert_eq!(Coverage::Partial.ceiling(&config), Some(0.7));
        assert_eq!(Coverage::Full.ceiling(&config), None);
    }

    #[test]
    fn test_absorb_degrades_only_recoverable_errors() {
        let mut bundle = EvidenceBundle::new();

        let kept = bundle.absorb("price", Importance::Required, Ok(150.5)).unwrap();
        assert_eq!(kept, Some(150.5));

        let gap: Option<f64> = bundle
            .absorb(
                "price",
                Importance::Required,
                Err(AnalysisError::ToolUnavailable("quote source unreachable".into())),
            )
            .unwrap();
        assert_eq!(gap, None);
        assert_eq!(bundle.missing_required.len(), 1);

        let fatal: Result<Option<f64>> =
            bundle.absorb("price", Importance::Required, Err(AnalysisError::ConfigError("bad".into())));
        assert!(fatal.is_err());
    }

    #[test]
    fn test_fail_wraps_once() {
        let err = fail(SpecialistKind::Market, AnalysisError::LlmError("down".into()));
        let again = fail(SpecialistKind::Market, err);
        match again {
            AnalysisError::AgentFailed { agent, reason, .. } => {
                assert_eq!(agent, "market");
                assert_eq!(reason, "LLM error: down");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
