//! Language model collaborators
//!
//! Specialists only see the `LanguageModel` trait. Providers are picked
//! from settings by `build_language_model`.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiCompatibleClient;

use crate::config::{LlmProvider, Settings};
use crate::error::AnalysisError;
use crate::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// System instruction shared by the HTTP providers
pub const ANALYST_SYSTEM_PROMPT: &str = "You are a professional equity research analyst. \
Ground every statement in the evidence you are given, state uncertainty plainly, \
and answer in exactly the JSON shape requested.";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// One completion for one prompt
    async fn complete(&self, prompt: &str) -> Result<String>;
}

type Responder = dyn Fn(&str, usize) -> Result<String> + Send + Sync;

/// Deterministic model for tests and offline runs.
///
/// The responder gets each prompt and its zero-based call number.
pub struct ScriptedModel {
    responder: Box<Responder>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&str, usize) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `response`
    pub fn constant(response: impl Into<String>) -> Self {
        let response = response.into();
        Self::from_fn(move |_, _| Ok(response.clone()))
    }

    /// Answers with each response in turn, repeating the last one
    pub fn sequence(responses: Vec<String>) -> Self {
        Self::from_fn(move |_, call| {
            responses
                .get(call)
                .or_else(|| responses.last())
                .cloned()
                .ok_or_else(|| AnalysisError::LlmError("scripted model has no responses".to_string()))
        })
    }

    /// Always fails as an upstream error
    pub fn failing(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::from_fn(move |_, _| Err(AnalysisError::LlmError(reason.clone())))
    }

    /// Scores the evidence section by counting directional words.
    ///
    /// Good enough for demos without an API key; not an analyst.
    pub fn heuristic() -> Self {
        Self::from_fn(|prompt, _| Ok(heuristic_judgment(prompt)))
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every prompt received so far
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let call = {
            let mut prompts = self.prompts.lock().await;
            prompts.push(prompt.to_string());
            prompts.len() - 1
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(prompt, call)
    }
}

const POSITIVE_WORDS: [&str; 9] = [
    "grew", "growth", "increased", "increase", "expanded", "strong", "record", "beat", "+",
];

const NEGATIVE_WORDS: [&str; 9] = [
    "declined", "decline", "decreased", "fell", "weak", "loss", "miss", "impairment", "-",
];

fn heuristic_judgment(prompt: &str) -> String {
    let evidence = prompt
        .split("### Evidence")
        .nth(1)
        .and_then(|rest| rest.split("### Response format").next())
        .unwrap_or("")
        .to_lowercase();

    let count = |words: &[&str]| -> i32 {
        evidence
            .split_whitespace()
            .filter(|token| token.len() > 1 && words.iter().any(|w| token.starts_with(w)))
            .count() as i32
    };

    let balance = count(&POSITIVE_WORDS[..]) - count(&NEGATIVE_WORDS[..]);
    let score = (5.5 + f64::from(balance) * 0.5).clamp(1.0, 10.0);
    let confidence = if evidence.trim().is_empty() { 0.2 } else { 0.6 };

    json!({
        "score": score,
        "confidence": confidence,
        "rationale": format!(
            "Offline heuristic reading of the evidence: net directional signal {:+}.",
            balance
        ),
    })
    .to_string()
}

/// Model client the settings describe
pub fn build_language_model(settings: &Settings) -> Result<Arc<dyn LanguageModel>> {
    match settings.llm_provider {
        LlmProvider::DeepSeek => {
            let key = settings.deepseek_api_key.clone().ok_or_else(|| {
                AnalysisError::ConfigError("DEEPSEEK_API_KEY not configured".to_string())
            })?;
            info!(model = %settings.model_name, base = %settings.deepseek_api_base, "Using DeepSeek model");
            Ok(Arc::new(OpenAiCompatibleClient::new(
                &settings.deepseek_api_base,
                key,
                &settings.model_name,
                settings.temperature,
            )?))
        }
        LlmProvider::Gemini => {
            let key = settings.gemini_api_key.clone().ok_or_else(|| {
                AnalysisError::ConfigError("GEMINI_API_KEY not configured".to_string())
            })?;
            info!("Using Gemini model");
            Ok(Arc::new(GeminiClient::new(key, settings.temperature)?))
        }
        LlmProvider::Mock => {
            info!("Using offline heuristic model");
            Ok(Arc::new(ScriptedModel::heuristic()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_response() {
        let model = ScriptedModel::sequence(vec!["first".into(), "second".into()]);
        assert_eq!(model.complete("a").await.unwrap(), "first");
        assert_eq!(model.complete("b").await.unwrap(), "second");
        assert_eq!(model.complete("c").await.unwrap(), "second");
        assert_eq!(model.prompts().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failing_model_is_llm_error() {
        let model = ScriptedModel::failing("quota exceeded");
        assert!(matches!(model.complete("x").await, Err(AnalysisError::LlmError(_))));
    }

    #[test]
    fn test_heuristic_reads_only_evidence_section() {
        let bullish = heuristic_judgment(
            "Instructions mention decline.\n### Evidence\nRevenue grew. Net income increased.\n### Response format\n{}",
        );
        let value: serde_json::Value = serde_json::from_str(&bullish).unwrap();
        assert!(value["score"].as_f64().unwrap() > 5.5);

        let empty = heuristic_judgment("no evidence here");
        let value: serde_json::Value = serde_json::from_str(&empty).unwrap();
        assert_eq!(value["score"].as_f64(), Some(5.5));
    }
}
