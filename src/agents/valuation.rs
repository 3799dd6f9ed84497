//! Valuation specialist
//!
//! Evidence: valuation ratios (required), a DCF estimate and supporting
//! filing text (both supplemental). The only specialist that carries a
//! target price.

use crate::agents::{fail, EvidenceBundle, Importance, Reasoner, SpecialistAgent};
use crate::error::AnalysisError;
use crate::models::{AgentJudgment, Evidence, Query, SpecialistKind, ToolCall, ToolValue};
use crate::retrieval::RetrievalIndex;
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ValuationExpert {
    tools: ToolRegistry,
    index: Arc<RetrievalIndex>,
    reasoner: Arc<Reasoner>,
}

impl ValuationExpert {
    pub fn new(tools: ToolRegistry, index: Arc<RetrievalIndex>, reasoner: Arc<Reasoner>) -> Self {
        Self { tools, index, reasoner }
    }

    /// Returns the bundle and the DCF intrinsic value, if one was computed
    async fn gather(&self, query: &Query) -> Result<(EvidenceBundle, Option<f64>)> {
        let config = self.reasoner.config();
        let mut bundle = EvidenceBundle::new();
        let ticker = query.ticker.clone();
        let filings_query = format!("{} valuation free cash flow guidance outlook", ticker);

        let (ratios, dcf, filings) = tokio::join!(
            self.tools.dispatch(ToolCall::ValuationRatios { ticker: ticker.clone() }),
            self.tools.dispatch(ToolCall::DcfEstimate {
                ticker: ticker.clone(),
                assumptions: config.dcf,
            }),
            self.index.query(&ticker, &filings_query, config.retrieval_k),
        );

        if let Some(result) = bundle.absorb("valuation ratios", Importance::Required, ratios)? {
            bundle.evidence.push(Evidence::Tool(result));
        }

        let mut intrinsic = None;
        if let Some(result) = bundle.absorb("DCF estimate", Importance::Supplemental, dcf)? {
            if let ToolValue::IntrinsicValue { intrinsic_value } = result.value {
                intrinsic = Some(intrinsic_value);
            }
            bundle.evidence.push(Evidence::Tool(result));
        }

        match bundle.absorb("filings", Importance::Supplemental, filings)? {
            Some(hits) if !hits.is_empty() => bundle.push_chunks(&hits),
            Some(_) => bundle.mark_missing("filings (no excerpts retrieved)", Importance::Supplemental),
            None => {}
        }

        info!(
            ticker = %query.ticker,
            evidence = bundle.evidence.len(),
            coverage = ?bundle.coverage(),
            "Valuation evidence gathered"
        );

        Ok((bundle, intrinsic))
    }
}

#[async_trait]
impl SpecialistAgent for ValuationExpert {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Valuation
    }

    async fn analyze(&self, query: &Query) -> Result<AgentJudgment> {
        let run = async {
            let (bundle, intrinsic) = self.gather(query).await?;
            let mut judgment = self.reasoner.judge(self.kind(), query, bundle).await?;

            if judgment.target_price.is_none() {
                if let Some(value) = intrinsic.filter(|v| v.is_finite() && *v > 0.0) {
                    debug!(ticker = %query.ticker, value, "Using DCF value as target price");
                    judgment.target_price = Some(value);
                }
            }
            Ok::<_, AnalysisError>(judgment)
        };
        run.await.map_err(|e| fail(self.kind(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SpecialistConfig;
    use crate::llm::ScriptedModel;
    use crate::models::SourceDocument;
    use crate::retrieval::{ChunkingConfig, HashingEmbedder};
    use crate::tools::{DataCapability, StaticMarketData};

    async fn expert(source: StaticMarketData, reply: &str) -> ValuationExpert {
        let index = Arc::new(RetrievalIndex::new(
            Arc::new(HashingEmbedder::default()),
            ChunkingConfig::default(),
        ));
        index
            .ingest(&SourceDocument {
                ticker: "AAPL".to_string(),
                source: "AAPL_10K.txt".to_string(),
                text: "Free cash flow reached $100 billion. Guidance calls for steady growth.".to_string(),
            })
            .await
            .unwrap();

        ValuationExpert::new(
            ToolRegistry::new(Arc::new(source)),
            index,
            Arc::new(Reasoner::new(
                Arc::new(ScriptedModel::constant(reply)),
                SpecialistConfig::default(),
            )),
        )
    }

    fn query() -> Query {
        Query::new("AAPL", "Is the stock fairly valued?").unwrap()
    }

    #[tokio::test]
    async fn test_model_target_price_wins() {
        let expert = expert(
            StaticMarketData::demo(),
            r#"{"score": 6, "rationale": "Fair value.", "confidence": 0.7, "target_price": 160}"#,
        )
        .await;

        let judgment = expert.analyze(&query()).await.unwrap();
        assert_eq!(judgment.target_price, Some(160.0));
        assert_eq!(judgment.evidence.len(), 3);
        assert!(!judgment.degraded);
    }

    #[tokio::test]
    async fn test_falls_back_to_dcf_value() {
        let expert = expert(
            StaticMarketData::demo(),
            r#"{"score": 6, "rationale": "Fair value.", "confidence": 0.7}"#,
        )
        .await;

        let judgment = expert.analyze(&query()).await.unwrap();
        let expected = 6.45 * 1.03 / (0.09 - 0.03);
        let target = judgment.target_price.unwrap();
        assert!((target - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_fundamentals_is_evidence_free() {
        let expert = expert(
            StaticMarketData::demo().with_outage(DataCapability::Fundamentals),
            r#"{"score": 6, "rationale": "Little to go on.", "confidence": 0.9}"#,
        )
        .await;

        let judgment = expert.analyze(&query()).await.unwrap();
        assert!(judgment.degraded);
        assert!(judgment.confidence <= 0.3);
        assert_eq!(judgment.target_price, None);
    }
}
