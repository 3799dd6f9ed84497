//! Stock Analyst Orchestrator
//!
//! A multi-agent stock analysis service that:
//! - Retrieves evidence from ingested financial documents (ticker-scoped)
//! - Pulls market data through a typed tool registry
//! - Runs financial, market and valuation specialists concurrently
//! - Synthesizes one buy/hold/sell recommendation with a written analysis
//! - Degrades instead of failing when evidence or a specialist is missing
//!
//! REQUEST LOOP:
//! RECEIVED → ROUTING → AWAITING_AGENTS → SYNTHESIZING → DONE | FAILED

pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod supervisor;
pub mod tools;

pub use error::{AnalysisError, Result};

// Re-export common types
pub use models::*;

use agents::{FinancialAnalyst, MarketAnalyst, Reasoner, ValuationExpert};
use config::Settings;
use llm::LanguageModel;
use retrieval::RetrievalIndex;
use std::sync::Arc;
use supervisor::Supervisor;
use tools::ToolRegistry;

/// Wire the three specialists around one shared index, tool registry and
/// language model.
pub fn build_supervisor(
    settings: &Settings,
    index: Arc<RetrievalIndex>,
    tools: ToolRegistry,
    model: Arc<dyn LanguageModel>,
) -> Supervisor {
    let reasoner = Arc::new(Reasoner::new(model, settings.specialist_config()));

    Supervisor::new(settings.supervisor_config(), settings.synthesis_config())
        .with_specialist(Arc::new(FinancialAnalyst::new(index.clone(), reasoner.clone())))
        .with_specialist(Arc::new(MarketAnalyst::new(tools.clone(), reasoner.clone())))
        .with_specialist(Arc::new(ValuationExpert::new(tools, index, reasoner)))
}
