//! Synthesis: merge specialist judgments into one recommendation
//!
//! Pure function of its inputs. Judgments and failures are put in canonical
//! specialist order first, so arrival order never changes the output.

use crate::error::AnalysisError;
use crate::models::{
    AgentFailure, AgentJudgment, Query, Recommendation, RecommendationKind, RecommendationLocale,
    SpecialistKind,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreWeighting {
    /// Mean weighted by each judgment's confidence
    #[default]
    Confidence,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisConfig {
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub weighting: ScoreWeighting,
    pub locale: RecommendationLocale,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 7.0,
            sell_threshold: 4.0,
            weighting: ScoreWeighting::Confidence,
            locale: RecommendationLocale::Zh,
        }
    }
}

impl SynthesisConfig {
    pub fn validate(&self) -> Result<()> {
        let in_range = |t: f64| t.is_finite() && (1.0..=10.0).contains(&t);
        if !in_range(self.buy_threshold) || !in_range(self.sell_threshold) {
            return Err(AnalysisError::ConfigError(format!(
                "thresholds must lie within 1-10 (buy {}, sell {})",
                self.buy_threshold, self.sell_threshold
            )));
        }
        if self.sell_threshold >= self.buy_threshold {
            return Err(AnalysisError::ConfigError(format!(
                "sell threshold ({}) must be below buy threshold ({})",
                self.sell_threshold, self.buy_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisEngine {
    config: SynthesisConfig,
}

impl SynthesisEngine {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Weighted mean of the judgment scores; `None` when there are none
    pub fn aggregate_score(&self, judgments: &[AgentJudgment]) -> Option<f64> {
        if judgments.is_empty() {
            return None;
        }

        let plain_mean = || judgments.iter().map(|j| j.score).sum::<f64>() / judgments.len() as f64;

        let score = match self.config.weighting {
            ScoreWeighting::Equal => plain_mean(),
            ScoreWeighting::Confidence => {
                let total_weight: f64 = judgments.iter().map(|j| j.confidence).sum();
                if total_weight <= f64::EPSILON {
                    plain_mean()
                } else {
                    judgments.iter().map(|j| j.score * j.confidence).sum::<f64>() / total_weight
                }
            }
        };

        Some(score.clamp(1.0, 10.0))
    }

    pub fn classify(&self, score: f64) -> RecommendationKind {
        if score >= self.config.buy_threshold {
            RecommendationKind::Buy
        } else if score <= self.config.sell_threshold {
            RecommendationKind::Sell
        } else {
            RecommendationKind::Hold
        }
    }

    /// Build the recommendation. Fails with `SupervisorFailed` when no
    /// judgment succeeded.
    pub fn synthesize(
        &self,
        query: &Query,
        mut judgments: Vec<AgentJudgment>,
        mut failures: Vec<AgentFailure>,
        timestamp: DateTime<Utc>,
    ) -> Result<Recommendation> {
        judgments.sort_by_key(|j| j.agent);
        failures.sort_by(|a, b| a.agent.cmp(&b.agent).then_with(|| a.reason.cmp(&b.reason)));

        let aggregate = self.aggregate_score(&judgments).ok_or_else(|| {
            let reasons: Vec<String> = failures
                .iter()
                .map(|f| format!("{}: {}", f.agent, f.reason))
                .collect();
            AnalysisError::SupervisorFailed(if reasons.is_empty() {
                "no specialist produced a judgment".to_string()
            } else {
                format!("every specialist failed ({})", reasons.join("; "))
            })
        })?;

        let recommendation = self.classify(aggregate);

        let target_price = judgments
            .iter()
            .find(|j| j.agent == SpecialistKind::Valuation)
            .and_then(|j| j.target_price);

        let analysis = self.compose_analysis(query, &judgments, &failures, aggregate, recommendation, target_price);

        Ok(Recommendation {
            ticker: query.ticker.clone(),
            query: query.question.clone(),
            timestamp,
            analysis,
            recommendation,
            target_price,
            aggregate_score: aggregate,
            specialists_succeeded: judgments.iter().map(|j| j.agent).collect(),
            specialists_failed: failures,
        })
    }

    fn compose_analysis(
        &self,
        query: &Query,
        judgments: &[AgentJudgment],
        failures: &[AgentFailure],
        aggregate: f64,
        recommendation: RecommendationKind,
        target_price: Option<f64>,
    ) -> String {
        let mut lines = vec![
            format!("# {} Investment Analysis", query.ticker),
            String::new(),
            format!("**Question:** {}", query.question),
            format!(
                "**Aggregate score:** {:.2} / 10 ({})",
                aggregate,
                recommendation.label(self.config.locale)
            ),
        ];
        if let Some(price) = target_price {
            lines.push(format!("**Target price:** {:.2}", price));
        }

        for judgment in judgments {
            lines.push(String::new());
            lines.push(format!(
                "## {} (score {:.1}, confidence {:.2})",
                judgment.agent.heading(),
                judgment.score,
                judgment.confidence
            ));
            lines.push(String::new());
            lines.push(judgment.rationale.clone());
            if judgment.degraded {
                lines.push(String::new());
                lines.push("_Some evidence was unavailable; confidence was capped._".to_string());
            }
        }

        if !failures.is_empty() {
            lines.push(String::new());
            lines.push("## Specialists Unavailable".to_string());
            lines.push(String::new());
            lines.extend(
                failures
                    .iter()
                    .map(|f| format!("- {}: {}", f.agent.heading(), f.reason)),
            );
        }

        lines.join("\n").trim_end().to_string()
    }
}
