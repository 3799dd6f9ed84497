//! Query routing
//!
//! Decides which specialists a question needs. The default policy sends
//! every question to all three; the intent policy narrows by keywords but
//! never routes to nobody.

use crate::models::SpecialistKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingPolicy {
    #[default]
    All,
    Intent,
}

/// Static keyword lists, English and Chinese
const MARKET_KEYWORDS: &[&str] = &[
    "price", "quote", "trading", "trades", "sentiment", "momentum", "market", "rally", "selloff",
    "价格", "股价", "现价", "行情", "情绪", "走势",
];

const FINANCIAL_KEYWORDS: &[&str] = &[
    "revenue", "sales", "earnings", "income", "profit", "margin", "margins", "cash flow", "debt",
    "balance sheet", "filing", "filings", "10-k", "10-q", "annual report", "financials", "growth",
    "财务", "营收", "收入", "利润", "净利润", "现金流", "负债", "年报", "财报",
];

const VALUATION_KEYWORDS: &[&str] = &[
    "valuation", "valued", "value", "p/e", "pe ratio", "dcf", "intrinsic", "target price",
    "overvalued", "undervalued", "fair value", "multiple", "multiples", "expensive", "cheap",
    "估值", "市盈率", "内在价值", "目标价", "高估", "低估",
];

/// Questions that ask for an overall verdict need every specialist
const INVESTMENT_KEYWORDS: &[&str] = &[
    "buy", "sell", "hold", "invest", "investment", "worth", "recommend", "recommendation",
    "should i", "overall", "comprehensive",
    "投资", "买入", "卖出", "持有", "值得", "建议", "综合",
];

/// Whole-word match for ASCII keywords, substring match otherwise
fn contains_keyword(text: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return text.contains(keyword);
    }

    let is_word = |c: Option<char>| c.map_or(false, |c| c.is_alphanumeric());
    text.match_indices(keyword).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + keyword.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

fn matches_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| contains_keyword(text, kw))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Router {
    policy: RoutingPolicy,
}

impl Router {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// Specialists for this question, in canonical order, never empty
    pub fn route(&self, question: &str) -> Vec<SpecialistKind> {
        match self.policy {
            RoutingPolicy::All => SpecialistKind::ALL.to_vec(),
            RoutingPolicy::Intent => route_by_intent(question),
        }
    }
}

fn route_by_intent(question: &str) -> Vec<SpecialistKind> {
    let text = question.to_lowercase();

    if matches_any(&text, INVESTMENT_KEYWORDS) {
        return SpecialistKind::ALL.to_vec();
    }

    let mut kinds = BTreeSet::new();
    if matches_any(&text, MARKET_KEYWORDS) {
        kinds.insert(SpecialistKind::Market);
    }
    if matches_any(&text, FINANCIAL_KEYWORDS) {
        kinds.insert(SpecialistKind::Financial);
    }
    if matches_any(&text, VALUATION_KEYWORDS) {
        kinds.insert(SpecialistKind::Valuation);
    }

    if kinds.is_empty() {
        return SpecialistKind::ALL.to_vec();
    }
    kinds.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use SpecialistKind::*;

    fn intent(question: &str) -> Vec<SpecialistKind> {
        Router::new(RoutingPolicy::Intent).route(question)
    }

    #[test]
    fn test_default_policy_routes_to_all() {
        let router = Router::default();
        assert_eq!(router.route("What is the current price?"), vec![Financial, Market, Valuation]);
    }

    #[test]
    fn test_price_question_routes_to_market_only() {
        assert_eq!(intent("What is the current price?"), vec![Market]);
        assert_eq!(intent("AAPL现在的股价是多少？"), vec![Market]);
    }

    #[test]
    fn test_narrow_intents() {
        assert_eq!(intent("How did revenue and margins develop?"), vec![Financial]);
        assert_eq!(intent("Is the P/E too high versus its DCF?"), vec![Valuation]);
        assert_eq!(intent("Is the stock undervalued given market sentiment?"), vec![Market, Valuation]);
    }

    #[test]
    fn test_investment_questions_route_to_all() {
        assert_eq!(intent("Should I buy AAPL?"), SpecialistKind::ALL.to_vec());
        assert_eq!(intent("苹果公司是否值得投资？"), SpecialistKind::ALL.to_vec());
    }

    #[test]
    fn test_never_routes_to_zero_specialists() {
        for question in ["hello", "", "tell me a story", "???"] {
            assert_eq!(intent(question).len(), 3, "{:?}", question);
        }
    }

    #[test]
    fn test_keywords_match_whole_words() {
        assert!(contains_keyword("current price?", "price"));
        assert!(!contains_keyword("priceless art", "price"));
        assert!(!contains_keyword("subscribers", "buy"));
        assert!(contains_keyword("股价多少", "股价"));
    }
}
