//! Parsing model output into a judgment
//!
//! Models wrap JSON in prose or markdown fences often enough that we
//! extract the object before deserializing, then range-check it.

use crate::error::AnalysisError;
use crate::Result;
use serde::Deserialize;

/// Judgment fields as the model returns them
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawJudgment {
    pub score: f64,
    pub rationale: String,
    pub confidence: f64,
    #[serde(default)]
    pub target_price: Option<f64>,
}

impl RawJudgment {
    fn validate(self) -> Result<Self> {
        if !self.score.is_finite() || !(1.0..=10.0).contains(&self.score) {
            return Err(AnalysisError::JudgmentParseError(format!(
                "score {} is outside 1-10",
                self.score
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AnalysisError::JudgmentParseError(format!(
                "confidence {} is outside 0-1",
                self.confidence
            )));
        }
        if self.rationale.trim().is_empty() {
            return Err(AnalysisError::JudgmentParseError("rationale is empty".to_string()));
        }

        let target_price = self.target_price.filter(|p| p.is_finite() && *p > 0.0);

        Ok(Self {
            rationale: self.rationale.trim().to_string(),
            target_price,
            ..self
        })
    }
}

/// Pull a JSON object out of model text: a fenced block, or the span from
/// the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(fence) = trimmed.find("```") {
        let after = &trimmed[fence + 3..];
        // skip the language tag line
        let body = after.split_once('\n').map_or(after, |(_, rest)| rest);
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&trimmed[start..=end])
}

pub fn parse_judgment(text: &str) -> Result<RawJudgment> {
    let json = extract_json(text)
        .ok_or_else(|| AnalysisError::JudgmentParseError("no JSON object in reply".to_string()))?;

    let raw: RawJudgment = serde_json::from_str(json)
        .map_err(|e| AnalysisError::JudgmentParseError(format!("reply does not match the judgment shape: {}", e)))?;

    raw.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_handles_fenced_blocks() {
        let body = r#"{"score": 7}"#;
        let fenced = format!("Here you go:\n```json\n{}\n```\n", body);
        assert_eq!(extract_json(&fenced), Some(body));
    }

    #[test]
    fn test_extract_json_falls_back_to_braces() {
        assert_eq!(extract_json(r#"prefix {"a":1} suffix"#), Some(r#"{"a":1}"#));
        assert_eq!(extract_json("no json at all"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_valid_judgment() {
        let raw = parse_judgment(
            r#"{"score": 8, "rationale": "  Earnings momentum.  ", "confidence": 0.75, "target_price": 180.0}"#,
        )
        .unwrap();
        assert_eq!(raw.score, 8.0);
        assert_eq!(raw.rationale, "Earnings momentum.");
        assert_eq!(raw.target_price, Some(180.0));
    }

    #[test]
    fn test_out_of_range_values_are_parse_errors() {
        for reply in [
            r#"{"score": 11, "rationale": "x", "confidence": 0.5}"#,
            r#"{"score": 0.5, "rationale": "x", "confidence": 0.5}"#,
            r#"{"score": 5, "rationale": "x", "confidence": 1.5}"#,
            r#"{"score": 5, "rationale": "   ", "confidence": 0.5}"#,
            r#"{"score": "high", "rationale": "x", "confidence": 0.5}"#,
            "I think it is a buy.",
        ] {
            assert!(
                matches!(parse_judgment(reply), Err(AnalysisError::JudgmentParseError(_))),
                "{} should not parse",
                reply
            );
        }
    }

    #[test]
    fn test_non_positive_target_price_is_dropped() {
        let raw = parse_judgment(r#"{"score": 5, "rationale": "x", "confidence": 0.5, "target_price": -3}"#).unwrap();
        assert_eq!(raw.target_price, None);

        let raw = parse_judgment(r#"{"score": 5, "rationale": "x", "confidence": 0.5, "target_price": null}"#).unwrap();
        assert_eq!(raw.target_price, None);
    }
}
