//! Raw market data sources behind the tool registry
//!
//! `StaticMarketData` is an in-memory table for offline runs and tests.
//! `HttpMarketData` calls a JSON service at `FINANCIAL_API_BASE_URL`.

use crate::error::AnalysisError;
use crate::models::normalize_ticker;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SentimentReading {
    /// -1 (bearish) ..= 1 (bullish)
    pub score: f64,
    pub as_of: DateTime<Utc>,
}

/// Per-share fundamentals used to derive ratios and DCF inputs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Fundamentals {
    pub eps: Option<f64>,
    pub book_value_per_share: Option<f64>,
    pub revenue_per_share: Option<f64>,
    pub ev_to_ebitda: Option<f64>,
    pub dividend_per_share: Option<f64>,
    pub free_cash_flow_per_share: Option<f64>,
}

/// What a data source can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataCapability {
    Quote,
    Sentiment,
    Fundamentals,
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn quote(&self, ticker: &str) -> Result<Quote>;

    async fn sentiment(&self, ticker: &str) -> Result<SentimentReading>;

    async fn fundamentals(&self, ticker: &str) -> Result<Fundamentals>;
}

//
// ================= Static table =================
//

#[derive(Debug, Clone, Copy)]
struct TickerData {
    price: f64,
    sentiment: f64,
    fundamentals: Fundamentals,
}

/// In-memory market data with a per-capability outage switch
#[derive(Debug, Clone)]
pub struct StaticMarketData {
    tickers: HashMap<String, TickerData>,
    outages: HashSet<DataCapability>,
    as_of: DateTime<Utc>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self {
            tickers: HashMap::new(),
            outages: HashSet::new(),
            as_of: Utc::now(),
        }
    }

    /// A handful of large caps with plausible figures
    pub fn demo() -> Self {
        Self::new()
            .with_ticker(
                "AAPL",
                150.50,
                0.4,
                Fundamentals {
                    eps: Some(6.10),
                    book_value_per_share: Some(4.25),
                    revenue_per_share: Some(24.30),
                    ev_to_ebitda: Some(22.1),
                    dividend_per_share: Some(0.96),
                    free_cash_flow_per_share: Some(6.45),
                },
            )
            .with_ticker(
                "MSFT",
                410.20,
                0.5,
                Fundamentals {
                    eps: Some(11.80),
                    book_value_per_share: Some(34.10),
                    revenue_per_share: Some(32.90),
                    ev_to_ebitda: Some(24.6),
                    dividend_per_share: Some(3.00),
                    free_cash_flow_per_share: Some(9.90),
                },
            )
            .with_ticker(
                "GOOGL",
                165.75,
                0.2,
                Fundamentals {
                    eps: Some(7.50),
                    book_value_per_share: Some(23.60),
                    revenue_per_share: Some(28.40),
                    ev_to_ebitda: Some(15.3),
                    dividend_per_share: Some(0.80),
                    free_cash_flow_per_share: Some(5.90),
                },
            )
            .with_ticker(
                "TSLA",
                245.00,
                -0.1,
                Fundamentals {
                    eps: Some(3.10),
                    book_value_per_share: Some(21.80),
                    revenue_per_share: Some(30.10),
                    ev_to_ebitda: Some(58.0),
                    dividend_per_share: None,
                    free_cash_flow_per_share: Some(1.40),
                },
            )
    }

    pub fn with_ticker(mut self, ticker: &str, price: f64, sentiment: f64, fundamentals: Fundamentals) -> Self {
        self.tickers.insert(
            normalize_ticker(ticker),
            TickerData {
                price,
                sentiment: sentiment.clamp(-1.0, 1.0),
                fundamentals,
            },
        );
        self
    }

    /// Make every request for `capability` fail as unreachable
    pub fn with_outage(mut self, capability: DataCapability) -> Self {
        self.outages.insert(capability);
        self
    }

    fn lookup(&self, ticker: &str, capability: DataCapability) -> Result<&TickerData> {
        if self.outages.contains(&capability) {
            return Err(AnalysisError::ToolUnavailable(format!(
                "{:?} source unreachable",
                capability
            )));
        }
        self.tickers
            .get(&normalize_ticker(ticker))
            .ok_or_else(|| AnalysisError::ToolDataMissing(normalize_ticker(ticker)))
    }
}

impl Default for StaticMarketData {
    fn default() -> Self {
        Self::demo()
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn quote(&self, ticker: &str) -> Result<Quote> {
        let data = self.lookup(ticker, DataCapability::Quote)?;
        Ok(Quote {
            price: data.price,
            as_of: self.as_of,
        })
    }

    async fn sentiment(&self, ticker: &str) -> Result<SentimentReading> {
        let data = self.lookup(ticker, DataCapability::Sentiment)?;
        Ok(SentimentReading {
            score: data.sentiment,
            as_of: self.as_of,
        })
    }

    async fn fundamentals(&self, ticker: &str) -> Result<Fundamentals> {
        Ok(self.lookup(ticker, DataCapability::Fundamentals)?.fundamentals)
    }
}

//
// ================= HTTP service =================
//

/// Client for the financial data service.
///
/// Endpoints: `GET {base}/api/v1/market/{ticker}/quote`, `.../sentiment`,
/// `.../fundamentals`. A 404 means the service does not know the ticker.
#[derive(Clone)]
pub struct HttpMarketData {
    client: Client,
    base_url: String,
}

impl HttpMarketData {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, ticker: &str, resource: &str) -> Result<T> {
        let ticker = normalize_ticker(ticker);
        let url = format!("{}/api/v1/market/{}/{}", self.base_url, ticker, resource);
        debug!(url = %url, "Requesting market data");

        let response = self.client.get(&url).send().await.map_err(|e| {
            error!("Financial API request failed for {}: {}", url, e);
            AnalysisError::ToolUnavailable(format!("financial API request failed: {}", e))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AnalysisError::ToolDataMissing(ticker));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Financial API error for {}: {}", url, body);
            return Err(AnalysisError::ToolUnavailable(format!(
                "financial API returned {} for {}",
                status, resource
            )));
        }

        response.json::<T>().await.map_err(|e| {
            AnalysisError::ToolUnavailable(format!("invalid JSON from financial API: {}", e))
        })
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn quote(&self, ticker: &str) -> Result<Quote> {
        self.get_json(ticker, "quote").await
    }

    async fn sentiment(&self, ticker: &str) -> Result<SentimentReading> {
        let mut reading: SentimentReading = self.get_json(ticker, "sentiment").await?;
        reading.score = reading.score.clamp(-1.0, 1.0);
        Ok(reading)
    }

    async fn fundamentals(&self, ticker: &str) -> Result<Fundamentals> {
        self.get_json(ticker, "fundamentals").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup_is_case_insensitive() {
        let data = StaticMarketData::demo();
        let quote = data.quote(" aapl").await.unwrap();
        assert!((quote.price - 150.50).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_data_missing() {
        let data = StaticMarketData::demo();
        assert!(matches!(
            data.sentiment("ZZZZ").await,
            Err(AnalysisError::ToolDataMissing(t)) if t == "ZZZZ"
        ));
    }

    #[tokio::test]
    async fn test_outage_only_affects_its_capability() {
        let data = StaticMarketData::demo().with_outage(DataCapability::Quote);
        assert!(matches!(data.quote("AAPL").await, Err(AnalysisError::ToolUnavailable(_))));
        assert!(data.sentiment("AAPL").await.is_ok());
        assert!(data.fundamentals("AAPL").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_http_source_is_tool_unavailable() {
        let source = HttpMarketData::new("http://127.0.0.1:9").unwrap();
        let err = source.quote("AAPL").await.unwrap_err();
        assert!(err.is_recoverable());
    }
}
