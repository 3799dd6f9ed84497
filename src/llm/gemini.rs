//! Gemini generateContent client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::AnalysisError;
use crate::llm::{LanguageModel, ANALYST_SYSTEM_PROMPT};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const GEMINI_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(api_key: String, temperature: f32) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_URL.to_string(),
            temperature,
        })
    }

    fn request(&self, prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
                response_mime_type: "application/json",
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: ANALYST_SYSTEM_PROMPT.to_string(),
                }],
            },
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &str {
        "gemini-2.0-flash"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AnalysisError::LlmError("GEMINI_API_KEY not configured".to_string()));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&self.request(prompt))
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AnalysisError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(AnalysisError::LlmError(format!("Gemini API error: {}", error_text)));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AnalysisError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::LlmError("No response from Gemini API".to_string()))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            warn!("Gemini stopped for safety");
        }

        let answer = candidate
            .content
            .parts
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::LlmError("Empty response from Gemini".to_string()))?
            .text;

        if let Some(usage) = gemini_response.usage_metadata {
            info!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini response received"
            );
        }

        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: i32,
    candidates_token_count: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let client = GeminiClient::new("key".to_string(), 0.0).unwrap();
        let json = serde_json::to_string(&client.request("Score AAPL")).unwrap();

        assert!(json.contains("Score AAPL"));
        assert!(json.contains("generationConfig"));
        assert!(json.contains("application/json"));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "{\"score\": 6}"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 5}
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text, "{\"score\": 6}");
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_missing_key_is_llm_error() {
        let client = GeminiClient::new(String::new(), 0.0).unwrap();
        assert!(matches!(client.complete("x").await, Err(AnalysisError::LlmError(_))));
    }
}
