//! The single reasoning step shared by every specialist:
//! structured evidence in, `AgentJudgment` out.

use crate::agents::judgment::{parse_judgment, RawJudgment};
use crate::agents::{Coverage, EvidenceBundle, SpecialistConfig};
use crate::error::AnalysisError;
use crate::llm::LanguageModel;
use crate::models::{AgentJudgment, Evidence, Query, SpecialistKind};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

const RESPONSE_FORMAT: &str = r#"Reply with one JSON object and nothing else:
{"score": <number from 1 (very negative) to 10 (very positive)>, "rationale": "<2-5 sentences citing the evidence>", "confidence": <number from 0 to 1>, "target_price": <number or null>}"#;

fn focus(kind: SpecialistKind) -> &'static str {
    match kind {
        SpecialistKind::Financial => {
            "You are the financial statements analyst. Judge the company's financial health: \
             revenue and earnings trends, margins, cash flow and balance sheet strength. \
             Leave target_price null."
        }
        SpecialistKind::Market => {
            "You are the market analyst. Judge the stock's current market position from its \
             price and market sentiment. Leave target_price null."
        }
        SpecialistKind::Valuation => {
            "You are the valuation expert. Judge whether the current price is justified by \
             valuation ratios, the DCF estimate and the company's outlook. Give a per-share \
             target_price when the evidence supports one."
        }
    }
}

pub struct Reasoner {
    model: Arc<dyn LanguageModel>,
    config: SpecialistConfig,
}

impl Reasoner {
    pub fn new(model: Arc<dyn LanguageModel>, config: SpecialistConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &SpecialistConfig {
        &self.config
    }

    pub fn build_prompt(kind: SpecialistKind, query: &Query, bundle: &EvidenceBundle) -> String {
        let mut lines = vec![
            focus(kind).to_string(),
            String::new(),
            format!("Ticker: {}", query.ticker),
            format!("Question: {}", query.question),
            String::new(),
            "### Evidence".to_string(),
        ];

        if bundle.evidence.is_empty() && bundle.observations.is_empty() {
            lines.push("(none)".to_string());
        }

        for (i, item) in bundle.evidence.iter().enumerate() {
            lines.push(match item {
                Evidence::Chunk {
                    source_document,
                    excerpt,
                    similarity,
                    ..
                } => format!("[{}] {} (relevance {:.2}):\n{}", i + 1, source_document, similarity, excerpt),
                Evidence::Tool(result) => format!("[{}] {}", i + 1, result.describe()),
            });
        }

        if !bundle.observations.is_empty() {
            lines.push("Observed trends:".to_string());
            lines.extend(bundle.observations.iter().map(|o| format!("* {}", o)));
        }

        if !bundle.missing_required.is_empty() || !bundle.missing_supplemental.is_empty() {
            lines.push(String::new());
            lines.push("### Gaps".to_string());
            lines.extend(bundle.missing_required.iter().map(|g| format!("* unavailable (primary): {}", g)));
            lines.extend(
                bundle
                    .missing_supplemental
                    .iter()
                    .map(|g| format!("* unavailable (supporting): {}", g)),
            );
            lines.push("Lower your confidence to reflect these gaps.".to_string());
        }

        lines.push(String::new());
        lines.push("### Response format".to_string());
        lines.push(RESPONSE_FORMAT.to_string());
        lines.join("\n")
    }

    async fn ask(&self, prompt: &str) -> Result<RawJudgment> {
        let reply = self.model.complete(prompt).await?;
        debug!(reply_len = reply.len(), "Model replied");
        parse_judgment(&reply)
    }

    /// Ask the model, retrying once with a corrective note if the reply
    /// does not parse. Applies the coverage ceiling to the confidence.
    pub async fn judge(&self, kind: SpecialistKind, query: &Query, bundle: EvidenceBundle) -> Result<AgentJudgment> {
        let prompt = Self::build_prompt(kind, query, &bundle);

        let raw = match self.ask(&prompt).await {
            Ok(raw) => raw,
            Err(AnalysisError::JudgmentParseError(reason)) => {
                warn!(agent = %kind, reason = %reason, "Unusable judgment, retrying once");
                let corrective = format!(
                    "{}\n\nYour previous reply could not be used ({}). Reply again with only the JSON object described above.",
                    prompt, reason
                );
                self.ask(&corrective).await?
            }
            Err(e) => return Err(e),
        };

        let coverage = bundle.coverage();
        let confidence = match coverage.ceiling(&self.config) {
            Some(ceiling) => raw.confidence.min(ceiling),
            None => raw.confidence,
        };
        let degraded = coverage != Coverage::Full;

        info!(
            agent = %kind,
            score = raw.score,
            confidence,
            coverage = ?coverage,
            "Judgment formed"
        );

        Ok(AgentJudgment {
            agent: kind,
            score: raw.score,
            rationale: raw.rationale,
            confidence,
            evidence: bundle.evidence,
            target_price: match kind {
                SpecialistKind::Valuation => raw.target_price,
                _ => None,
            },
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Importance;
    use crate::llm::ScriptedModel;

    fn query() -> Query {
        Query::new("AAPL", "Is it a good investment?").unwrap()
    }

    const GOOD: &str = r#"{"score": 7.5, "rationale": "Solid growth.", "confidence": 0.9, "target_price": 170}"#;

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let model = Arc::new(ScriptedModel::sequence(vec!["not json".into(), GOOD.into()]));
        let reasoner = Reasoner::new(model.clone(), SpecialistConfig::default());

        let judgment = reasoner
            .judge(SpecialistKind::Financial, &query(), EvidenceBundle::new())
            .await
            .unwrap();

        assert_eq!(judgment.score, 7.5);
        let prompts = model.prompts().await;
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("could not be used"));
    }

    #[tokio::test]
    async fn test_second_parse_failure_is_an_error() {
        let model = Arc::new(ScriptedModel::constant(r#"{"score": 42, "rationale": "x", "confidence": 0.5}"#));
        let reasoner = Reasoner::new(model.clone(), SpecialistConfig::default());

        let err = reasoner
            .judge(SpecialistKind::Market, &query(), EvidenceBundle::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::JudgmentParseError(_)));
        assert_eq!(model.prompts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_llm_errors_are_not_retried() {
        let model = Arc::new(ScriptedModel::failing("rate limited"));
        let reasoner = Reasoner::new(model.clone(), SpecialistConfig::default());

        let err = reasoner
            .judge(SpecialistKind::Market, &query(), EvidenceBundle::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::LlmError(_)));
        assert_eq!(model.prompts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_evidence_caps_confidence() {
        let reasoner = Reasoner::new(Arc::new(ScriptedModel::constant(GOOD)), SpecialistConfig::default());

        let mut partial = EvidenceBundle::new();
        partial.mark_missing("sentiment", Importance::Supplemental);
        let judgment = reasoner.judge(SpecialistKind::Market, &query(), partial).await.unwrap();
        assert_eq!(judgment.confidence, 0.7);
        assert!(judgment.degraded);

        let mut empty = EvidenceBundle::new();
        empty.mark_missing("price", Importance::Required);
        let judgment = reasoner.judge(SpecialistKind::Market, &query(), empty).await.unwrap();
        assert_eq!(judgment.confidence, 0.3);

        let full = reasoner
            .judge(SpecialistKind::Market, &query(), EvidenceBundle::new())
            .await
            .unwrap();
        assert_eq!(full.confidence, 0.9);
        assert!(!full.degraded);
    }

    #[tokio::test]
    async fn test_target_price_only_kept_for_valuation() {
        let reasoner = Reasoner::new(Arc::new(ScriptedModel::constant(GOOD)), SpecialistConfig::default());

        let market = reasoner
            .judge(SpecialistKind::Market, &query(), EvidenceBundle::new())
            .await
            .unwrap();
        assert_eq!(market.target_price, None);

        let valuation = reasoner
            .judge(SpecialistKind::Valuation, &query(), EvidenceBundle::new())
            .await
            .unwrap();
        assert_eq!(valuation.target_price, Some(170.0));
    }

    #[test]
    fn test_prompt_lists_gaps_and_format() {
        let mut bundle = EvidenceBundle::new();
        bundle.observations.push("net income: +20.0%".to_string());
        bundle.mark_missing("price", Importance::Required);

        let prompt = Reasoner::build_prompt(SpecialistKind::Market, &query(), &bundle);
        assert!(prompt.contains("Ticker: AAPL"));
        assert!(prompt.contains("* net income: +20.0%"));
        assert!(prompt.contains("unavailable (primary): price"));
        assert!(prompt.ends_with("\"target_price\": <number or null>}"));

        let evidence_at = prompt.find("### Evidence\nObserved trends:\n").unwrap();
        let gaps_at = prompt.find("\n\n### Gaps\n").unwrap();
        let format_at = prompt.find("\n\n### Response format\n").unwrap();
        assert!(evidence_at < gaps_at && gaps_at < format_at);
        assert!(!prompt.contains("\n\n\n"));
    }
}
