//! Core data models for the stock analyst

use crate::error::AnalysisError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Specialists =================
//

/// The three specialist procedures. Declaration order is the canonical
/// order used when composing the analysis text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SpecialistKind {
    Financial,
    Market,
    Valuation,
}

impl SpecialistKind {
    pub const ALL: [SpecialistKind; 3] = [
        SpecialistKind::Financial,
        SpecialistKind::Market,
        SpecialistKind::Valuation,
    ];

    /// Heading used for this specialist's section of the analysis
    pub fn heading(&self) -> &'static str {
        match self {
            SpecialistKind::Financial => "Financial Analysis",
            SpecialistKind::Market => "Market Analysis",
            SpecialistKind::Valuation => "Valuation Analysis",
        }
    }
}

impl fmt::Display for SpecialistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpecialistKind::Financial => "financial",
            SpecialistKind::Market => "market",
            SpecialistKind::Valuation => "valuation",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Query =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    pub ticker: String,
    pub question: String,
}

impl Query {
    /// Build a query, normalizing the ticker to upper case.
    pub fn new(ticker: &str, question: &str) -> Result<Self> {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(AnalysisError::InvalidQuery("ticker must not be empty".to_string()));
        }

        let question = question.trim();
        if question.is_empty() {
            return Err(AnalysisError::InvalidQuery("question must not be empty".to_string()));
        }

        Ok(Self {
            ticker,
            question: question.to_string(),
        })
    }
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

//
// ================= Retrieval =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub ticker: String,
    pub source_document: String,
    pub text: String,
    /// Hex SHA-256 of `text`
    pub content_hash: String,
    pub embedding: Vec<f32>,
    /// Character offset of the chunk in its source document
    pub offset: usize,
}

/// A raw document handed to the index for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub ticker: String,
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub similarity: f32,
}

/// Hits ordered by similarity, highest first
pub type RetrievalResult = Vec<ScoredChunk>;

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DcfAssumptions {
    pub growth_rate: f64,
    pub discount_rate: f64,
    /// Overrides the free cash flow per share reported by the data source
    #[serde(default)]
    pub free_cash_flow_per_share: Option<f64>,
}

impl Default for DcfAssumptions {
    fn default() -> Self {
        Self {
            growth_rate: 0.03,
            discount_rate: 0.09,
            free_cash_flow_per_share: None,
        }
    }
}

/// Closed set of callable capabilities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    Price { ticker: String },
    Sentiment { ticker: String },
    ValuationRatios { ticker: String },
    DcfEstimate {
        ticker: String,
        #[serde(default)]
        assumptions: DcfAssumptions,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Price { .. } => "price",
            ToolCall::Sentiment { .. } => "sentiment",
            ToolCall::ValuationRatios { .. } => "valuation_ratios",
            ToolCall::DcfEstimate { .. } => "dcf_estimate",
        }
    }

    pub fn ticker(&self) -> &str {
        match self {
            ToolCall::Price { ticker }
            | ToolCall::Sentiment { ticker }
            | ToolCall::ValuationRatios { ticker }
            | ToolCall::DcfEstimate { ticker, .. } => ticker,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValuationRatios {
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub ps: Option<f64>,
    pub ev_ebitda: Option<f64>,
    pub dividend_yield: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolValue {
    Price { price: f64 },
    Sentiment { score: f64 },
    Ratios(ValuationRatios),
    IntrinsicValue { intrinsic_value: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool: String,
    pub ticker: String,
    pub value: ToolValue,
    pub unit: String,
    pub as_of: DateTime<Utc>,
}

impl ToolResult {
    /// One-line rendering used inside specialist prompts
    pub fn describe(&self) -> String {
        let as_of = self.as_of.format("%Y-%m-%d");
        match &self.value {
            ToolValue::Price { price } => {
                format!("{} price: {:.2} {} (as of {})", self.ticker, price, self.unit, as_of)
            }
            ToolValue::Sentiment { score } => format!(
                "{} market sentiment: {:+.2} on a -1..1 scale (as of {})",
                self.ticker, score, as_of
            ),
            ToolValue::Ratios(r) => {
                let fmt = |v: Option<f64>| v.map_or("n/a".to_string(), |x| format!("{:.2}", x));
                format!(
                    "{} valuation ratios: P/E {}, P/B {}, P/S {}, EV/EBITDA {}, dividend yield {} (as of {})",
                    self.ticker,
                    fmt(r.pe),
                    fmt(r.pb),
                    fmt(r.ps),
                    fmt(r.ev_ebitda),
                    fmt(r.dividend_yield),
                    as_of
                )
            }
            ToolValue::IntrinsicValue { intrinsic_value } => format!(
                "{} DCF intrinsic value: {:.2} {} per share (as of {})",
                self.ticker, intrinsic_value, self.unit, as_of
            ),
        }
    }
}

//
// ================= Judgments =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    Chunk {
        chunk_id: String,
        source_document: String,
        excerpt: String,
        similarity: f32,
    },
    Tool(ToolResult),
}

impl Evidence {
    pub fn chunk_id(&self) -> Option<&str> {
        match self {
            Evidence::Chunk { chunk_id, .. } => Some(chunk_id),
            Evidence::Tool(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentJudgment {
    pub agent: SpecialistKind,
    /// 1..=10
    pub score: f64,
    pub rationale: String,
    /// 0..=1
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub target_price: Option<f64>,
    /// Confidence was capped because evidence was missing
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Upstream,
    Parse,
    Internal,
}

impl FailureKind {
    fn of(err: &AnalysisError) -> Self {
        match err {
            AnalysisError::JudgmentParseError(_) => FailureKind::Parse,
            AnalysisError::LlmError(_)
            | AnalysisError::HttpError(_)
            | AnalysisError::ToolUnavailable(_) => FailureKind::Upstream,
            AnalysisError::AgentFailed { cause: Some(cause), .. } => FailureKind::of(cause),
            _ => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentFailure {
    pub agent: SpecialistKind,
    pub kind: FailureKind,
    pub reason: String,
}

impl AgentFailure {
    pub fn from_error(agent: SpecialistKind, err: &AnalysisError) -> Self {
        let reason = match err {
            AnalysisError::AgentFailed { reason, .. } => reason.clone(),
            other => other.to_string(),
        };

        Self {
            agent,
            kind: FailureKind::of(err),
            reason,
        }
    }

    pub fn timeout(agent: SpecialistKind, after_ms: u128) -> Self {
        Self {
            agent,
            kind: FailureKind::Timeout,
            reason: format!("timeout after {} ms", after_ms),
        }
    }
}

//
// ================= Recommendation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Buy,
    Hold,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationLocale {
    #[default]
    Zh,
    En,
}

impl RecommendationKind {
    pub fn label(&self, locale: RecommendationLocale) -> &'static str {
        match (locale, self) {
            (RecommendationLocale::Zh, RecommendationKind::Buy) => "买入",
            (RecommendationLocale::Zh, RecommendationKind::Hold) => "持有",
            (RecommendationLocale::Zh, RecommendationKind::Sell) => "卖出",
            (RecommendationLocale::En, RecommendationKind::Buy) => "buy",
            (RecommendationLocale::En, RecommendationKind::Hold) => "hold",
            (RecommendationLocale::En, RecommendationKind::Sell) => "sell",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub ticker: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub analysis: String,
    pub recommendation: RecommendationKind,
    pub target_price: Option<f64>,
    pub aggregate_score: f64,
    pub specialists_succeeded: Vec<SpecialistKind>,
    pub specialists_failed: Vec<AgentFailure>,
}
