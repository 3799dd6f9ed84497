//! Market specialist: current price (required) and sentiment (supplemental)

use crate::agents::{fail, EvidenceBundle, Importance, Reasoner, SpecialistAgent};
use crate::models::{AgentJudgment, Evidence, Query, SpecialistKind, ToolCall};
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct MarketAnalyst {
    tools: ToolRegistry,
    reasoner: Arc<Reasoner>,
}

impl MarketAnalyst {
    pub fn new(tools: ToolRegistry, reasoner: Arc<Reasoner>) -> Self {
        Self { tools, reasoner }
    }

    async fn gather(&self, query: &Query) -> Result<EvidenceBundle> {
        let mut bundle = EvidenceBundle::new();
        let ticker = query.ticker.clone();

        let (price, sentiment) = tokio::join!(
            self.tools.dispatch(ToolCall::Price { ticker: ticker.clone() }),
            self.tools.dispatch(ToolCall::Sentiment { ticker }),
        );

        if let Some(result) = bundle.absorb("price", Importance::Required, price)? {
            bundle.evidence.push(Evidence::Tool(result));
        }
        if let Some(result) = bundle.absorb("sentiment", Importance::Supplemental, sentiment)? {
            bundle.evidence.push(Evidence::Tool(result));
        }

        info!(
            ticker = %query.ticker,
            tools = bundle.evidence.len(),
            coverage = ?bundle.coverage(),
            "Market evidence gathered"
        );

        Ok(bundle)
    }
}

#[async_trait]
impl SpecialistAgent for MarketAnalyst {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Market
    }

    async fn analyze(&self, query: &Query) -> Result<AgentJudgment> {
        let run = async {
            let bundle = self.gather(query).await?;
            self.reasoner.judge(self.kind(), query, bundle).await
        };
        run.await.map_err(|e| fail(self.kind(), e))
    }
}
