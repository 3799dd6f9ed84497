//! Tool registry
//!
//! Tools are deterministic, side-effect-free computations over market data.
//! Every call goes through the closed `ToolCall` enum; there is no dispatch
//! by free-form name.

pub mod market_data;

pub use market_data::{
    DataCapability, Fundamentals, HttpMarketData, MarketDataSource, Quote, SentimentReading,
    StaticMarketData,
};

use crate::config::Settings;
use crate::error::AnalysisError;
use crate::models::{normalize_ticker, DcfAssumptions, ToolCall, ToolResult, ToolValue, ValuationRatios};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CURRENCY: &str = "USD";

/// Name and one-line description of each tool, for prompts and listings
pub const TOOL_DESCRIPTIONS: [(&str, &str); 4] = [
    ("price", "Current share price for a ticker"),
    ("sentiment", "Market sentiment score from -1 (bearish) to 1 (bullish)"),
    ("valuation_ratios", "P/E, P/B, P/S, EV/EBITDA and dividend yield"),
    ("dcf_estimate", "Gordon-growth DCF intrinsic value per share"),
];

impl ToolCall {
    /// Parse a model-proposed call and validate its arguments.
    ///
    /// Accepts `{"name": ..., "arguments": {...}}`.
    pub fn from_model_output(value: &Value) -> Result<Self> {
        let call: ToolCall = serde_json::from_value(value.clone())
            .map_err(|e| AnalysisError::InvalidToolInput(format!("unrecognized tool call: {}", e)))?;
        call.validated()
    }

    /// Normalize the ticker and check argument ranges
    pub fn validated(self) -> Result<Self> {
        let ticker = normalize_ticker(self.ticker());
        if ticker.is_empty() {
            return Err(AnalysisError::InvalidToolInput(format!(
                "{} requires a ticker",
                self.name()
            )));
        }

        Ok(match self {
            ToolCall::Price { .. } => ToolCall::Price { ticker },
            ToolCall::Sentiment { .. } => ToolCall::Sentiment { ticker },
            ToolCall::ValuationRatios { .. } => ToolCall::ValuationRatios { ticker },
            ToolCall::DcfEstimate { assumptions, .. } => {
                validate_assumptions(&assumptions)?;
                ToolCall::DcfEstimate { ticker, assumptions }
            }
        })
    }
}

fn validate_assumptions(assumptions: &DcfAssumptions) -> Result<()> {
    let DcfAssumptions {
        growth_rate,
        discount_rate,
        free_cash_flow_per_share,
    } = *assumptions;

    if !growth_rate.is_finite() || !discount_rate.is_finite() {
        return Err(AnalysisError::InvalidToolInput(
            "growth and discount rates must be finite".to_string(),
        ));
    }
    if growth_rate <= -1.0 {
        return Err(AnalysisError::InvalidToolInput(format!(
            "growth rate {} is below -100%",
            growth_rate
        )));
    }
    if discount_rate <= growth_rate {
        return Err(AnalysisError::InvalidToolInput(format!(
            "discount rate ({}) must exceed growth rate ({})",
            discount_rate, growth_rate
        )));
    }
    if let Some(fcf) = free_cash_flow_per_share {
        if !fcf.is_finite() {
            return Err(AnalysisError::InvalidToolInput(
                "free cash flow per share must be finite".to_string(),
            ));
        }
    }
    Ok(())
}

/// `price / eps`; absent when eps is not positive
pub fn pe_ratio(price: f64, eps: f64) -> Option<f64> {
    if eps <= 0.0 {
        return None;
    }
    Some(price / eps)
}

/// Gordon growth: `fcf * (1 + g) / (r - g)`
pub fn intrinsic_value(free_cash_flow: f64, growth_rate: f64, discount_rate: f64) -> Result<f64> {
    if discount_rate <= growth_rate {
        return Err(AnalysisError::InvalidToolInput(format!(
            "discount rate ({}) must exceed growth rate ({})",
            discount_rate, growth_rate
        )));
    }
    Ok(free_cash_flow * (1.0 + growth_rate) / (discount_rate - growth_rate))
}

fn positive_ratio(numerator: f64, denominator: Option<f64>) -> Option<f64> {
    denominator.filter(|d| *d > 0.0).map(|d| numerator / d)
}

/// Typed tool dispatch over a market data source
#[derive(Clone)]
pub struct ToolRegistry {
    source: Arc<dyn MarketDataSource>,
}

impl ToolRegistry {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Name and description of every tool the registry dispatches
    pub fn list(&self) -> &'static [(&'static str, &'static str)] {
        &TOOL_DESCRIPTIONS
    }

    /// Run one validated call
    pub async fn dispatch(&self, call: ToolCall) -> Result<ToolResult> {
        let call = call.validated()?;
        debug!(tool = call.name(), ticker = call.ticker(), "Dispatching tool");

        let result = match &call {
            ToolCall::Price { ticker } => self.price(ticker).await,
            ToolCall::Sentiment { ticker } => self.sentiment(ticker).await,
            ToolCall::ValuationRatios { ticker } => self.valuation_ratios(ticker).await,
            ToolCall::DcfEstimate { ticker, assumptions } => self.dcf_estimate(ticker, assumptions).await,
        };

        if let Err(e) = &result {
            warn!(tool = call.name(), ticker = call.ticker(), error = %e, "Tool call failed");
        }
        result
    }

    pub async fn price(&self, ticker: &str) -> Result<ToolResult> {
        let ticker = normalize_ticker(ticker);
        let quote = self.source.quote(&ticker).await?;

        Ok(ToolResult {
            tool: "price".to_string(),
            ticker,
            value: ToolValue::Price { price: quote.price },
            unit: CURRENCY.to_string(),
            as_of: quote.as_of,
        })
    }

    pub async fn sentiment(&self, ticker: &str) -> Result<ToolResult> {
        let ticker = normalize_ticker(ticker);
        let reading = self.source.sentiment(&ticker).await?;

        Ok(ToolResult {
            tool: "sentiment".to_string(),
            ticker,
            value: ToolValue::Sentiment {
                score: reading.score.clamp(-1.0, 1.0),
            },
            unit: "score".to_string(),
            as_of: reading.as_of,
        })
    }

    pub async fn valuation_ratios(&self, ticker: &str) -> Result<ToolResult> {
        let ticker = normalize_ticker(ticker);
        let quote = self.source.quote(&ticker).await?;
        let fundamentals = self.source.fundamentals(&ticker).await?;
        let price = quote.price;

        let ratios = ValuationRatios {
            pe: fundamentals.eps.and_then(|eps| pe_ratio(price, eps)),
            pb: positive_ratio(price, fundamentals.book_value_per_share),
            ps: positive_ratio(price, fundamentals.revenue_per_share),
            ev_ebitda: fundamentals.ev_to_ebitda,
            dividend_yield: fundamentals
                .dividend_per_share
                .and_then(|dps| positive_ratio(dps, Some(price))),
        };

        Ok(ToolResult {
            tool: "valuation_ratios".to_string(),
            ticker,
            value: ToolValue::Ratios(ratios),
            unit: "ratio".to_string(),
            as_of: quote.as_of,
        })
    }

    pub async fn dcf_estimate(&self, ticker: &str, assumptions: &DcfAssumptions) -> Result<ToolResult> {
        validate_assumptions(assumptions)?;
        let ticker = normalize_ticker(ticker);

        let free_cash_flow = match assumptions.free_cash_flow_per_share {
            Some(fcf) => fcf,
            None => self
                .source
                .fundamentals(&ticker)
                .await?
                .free_cash_flow_per_share
                .ok_or_else(|| {
                    AnalysisError::ToolDataMissing(format!("{} free cash flow", ticker))
                })?,
        };

        let value = intrinsic_value(free_cash_flow, assumptions.growth_rate, assumptions.discount_rate)?;

        info!(
            ticker = %ticker,
            fcf = free_cash_flow,
            growth = assumptions.growth_rate,
            discount = assumptions.discount_rate,
            intrinsic_value = value,
            "DCF estimate computed"
        );

        Ok(ToolResult {
            tool: "dcf_estimate".to_string(),
            ticker,
            value: ToolValue::IntrinsicValue {
                intrinsic_value: value,
            },
            unit: CURRENCY.to_string(),
            as_of: chrono::Utc::now(),
        })
    }
}

/// Market data source the settings describe: the HTTP service when
/// `FINANCIAL_API_BASE_URL` is set, the static demo table otherwise.
pub fn build_market_data(settings: &Settings) -> Result<Arc<dyn MarketDataSource>> {
    match &settings.financial_api_base_url {
        Some(base) => {
            info!(base = %base, "Using financial API for market data");
            Ok(Arc::new(HttpMarketData::new(base)?))
        }
        None => {
            warn!("FINANCIAL_API_BASE_URL not set, using static demo market data");
            Ok(Arc::new(StaticMarketData::demo()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(StaticMarketData::demo()))
    }

    #[test]
    fn test_pe_ratio() {
        assert_eq!(pe_ratio(150.0, 6.0), Some(25.0));
        assert_eq!(pe_ratio(150.0, 0.0), None);
        assert_eq!(pe_ratio(150.0, -2.0), None);
    }

    #[test]
    fn test_intrinsic_value() {
        let value = intrinsic_value(5.0, 0.03, 0.08).unwrap();
        assert!((value - 103.0).abs() < 1e-9);
        assert_err!(intrinsic_value(5.0, 0.08, 0.08));
        assert_err!(intrinsic_value(5.0, 0.10, 0.08));
    }

    #[test]
    fn test_from_model_output_validates() {
        let call = assert_ok!(ToolCall::from_model_output(&json!({
            "name": "price",
            "arguments": { "ticker": " msft " }
        })));
        assert_eq!(call, ToolCall::Price { ticker: "MSFT".to_string() });

        let unknown = ToolCall::from_model_output(&json!({ "name": "web_search", "arguments": {} }));
        assert!(matches!(unknown, Err(AnalysisError::InvalidToolInput(_))));

        let bad_rates = ToolCall::from_model_output(&json!({
            "name": "dcf_estimate",
            "arguments": { "ticker": "AAPL", "assumptions": { "growth_rate": 0.1, "discount_rate": 0.05 } }
        }));
        assert!(matches!(bad_rates, Err(AnalysisError::InvalidToolInput(_))));

        let empty = ToolCall::from_model_output(&json!({ "name": "sentiment", "arguments": { "ticker": "" } }));
        assert_err!(empty);
    }

    #[tokio::test]
    async fn test_dispatch_price() {
        let result = registry()
            .dispatch(ToolCall::Price { ticker: "aapl".to_string() })
            .await
            .unwrap();

        assert_eq!(result.ticker, "AAPL");
        assert_eq!(result.unit, "USD");
        assert_eq!(result.value, ToolValue::Price { price: 150.50 });
    }

    #[tokio::test]
    async fn test_valuation_ratios_derive_from_fundamentals() {
        let source = StaticMarketData::new().with_ticker(
            "LOSS",
            20.0,
            0.0,
            Fundamentals {
                eps: Some(-1.0),
                book_value_per_share: Some(10.0),
                ..Fundamentals::default()
            },
        );
        let result = ToolRegistry::new(Arc::new(source))
            .valuation_ratios("LOSS")
            .await
            .unwrap();

        match result.value {
            ToolValue::Ratios(r) => {
                assert_eq!(r.pe, None);
                assert_eq!(r.pb, Some(2.0));
                assert_eq!(r.ps, None);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dcf_uses_reported_free_cash_flow() {
        let result = registry()
            .dcf_estimate("AAPL", &DcfAssumptions::default())
            .await
            .unwrap();

        match result.value {
            ToolValue::IntrinsicValue { intrinsic_value } => {
                let expected = 6.45 * 1.03 / (0.09 - 0.03);
                assert!((intrinsic_value - expected).abs() < 1e-9);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failures_are_recoverable() {
        let registry = ToolRegistry::new(Arc::new(
            StaticMarketData::demo().with_outage(DataCapability::Sentiment),
        ));

        let outage = registry.sentiment("AAPL").await.unwrap_err();
        assert!(matches!(outage, AnalysisError::ToolUnavailable(_)));
        assert!(outage.is_recoverable());

        let missing = registry.price("ZZZZ").await.unwrap_err();
        assert!(matches!(missing, AnalysisError::ToolDataMissing(_)));
        assert!(missing.is_recoverable());
    }
}
