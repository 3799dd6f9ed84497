//! Settings loaded from the environment (and `.env` via dotenv)
//!
//! Core components never read the environment themselves; they receive the
//! plain config structs derived here.

use crate::agents::SpecialistConfig;
use crate::error::AnalysisError;
use crate::models::{DcfAssumptions, RecommendationLocale};
use crate::retrieval::ChunkingConfig;
use crate::supervisor::routing::RoutingPolicy;
use crate::supervisor::synthesis::{ScoreWeighting, SynthesisConfig};
use crate::supervisor::SupervisorConfig;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    DeepSeek,
    Gemini,
    /// Offline heuristic model, no network
    Mock,
}

impl FromStr for LlmProvider {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" | "openai" => Ok(LlmProvider::DeepSeek),
            "gemini" => Ok(LlmProvider::Gemini),
            "mock" | "offline" => Ok(LlmProvider::Mock),
            other => Err(AnalysisError::ConfigError(format!("unknown LLM_PROVIDER '{}'", other))),
        }
    }
}

impl FromStr for ScoreWeighting {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "confidence" => Ok(ScoreWeighting::Confidence),
            "equal" => Ok(ScoreWeighting::Equal),
            other => Err(AnalysisError::ConfigError(format!("unknown SCORE_WEIGHTING '{}'", other))),
        }
    }
}

impl FromStr for RoutingPolicy {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(RoutingPolicy::All),
            "intent" => Ok(RoutingPolicy::Intent),
            other => Err(AnalysisError::ConfigError(format!("unknown ROUTING_POLICY '{}'", other))),
        }
    }
}

impl FromStr for RecommendationLocale {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "zh" | "zh-cn" => Ok(RecommendationLocale::Zh),
            "en" | "en-us" => Ok(RecommendationLocale::En),
            other => Err(AnalysisError::ConfigError(format!(
                "unknown RECOMMENDATION_LOCALE '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    // LLM
    pub llm_provider: LlmProvider,
    pub deepseek_api_key: Option<String>,
    pub deepseek_api_base: String,
    pub model_name: String,
    pub temperature: f32,
    pub gemini_api_key: Option<String>,

    // Embeddings
    pub embedding_api_base: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,

    // Data
    pub financial_api_base_url: Option<String>,
    pub document_directory: PathBuf,
    pub vector_store_path: PathBuf,

    // Retrieval
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,

    // Orchestration
    pub specialist_timeout_secs: u64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub score_weighting: ScoreWeighting,
    pub evidence_free_confidence_ceiling: f64,
    pub partial_evidence_confidence_ceiling: f64,
    pub routing_policy: RoutingPolicy,
    pub recommendation_locale: RecommendationLocale,

    // Server
    pub host: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::DeepSeek,
            deepseek_api_key: None,
            deepseek_api_base: "https://api.deepseek.com".to_string(),
            model_name: "deepseek-chat".to_string(),
            temperature: 0.0,
            gemini_api_key: None,
            embedding_api_base: None,
            embedding_api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 256,
            financial_api_base_url: None,
            document_directory: PathBuf::from("data/financial_reports"),
            vector_store_path: PathBuf::from("data/vector_store/index.json"),
            chunk_size: 1000,
            chunk_overlap: 200,
            retrieval_k: 5,
            specialist_timeout_secs: 60,
            buy_threshold: 7.0,
            sell_threshold: 4.0,
            score_weighting: ScoreWeighting::Confidence,
            evidence_free_confidence_ceiling: 0.3,
            partial_evidence_confidence_ceiling: 0.7,
            routing_policy: RoutingPolicy::All,
            recommendation_locale: RecommendationLocale::Zh,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AnalysisError::ConfigError(format!("{}: {}", key, e))),
        _ => Ok(default),
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Settings {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Settings::default();

        let gemini_api_key = optional(&lookup, "GEMINI_API_KEY");
        let deepseek_api_key = optional(&lookup, "DEEPSEEK_API_KEY");

        // without an explicit provider, use whichever key is present
        let llm_provider = match optional(&lookup, "LLM_PROVIDER") {
            Some(p) => p.parse()?,
            None if deepseek_api_key.is_some() => LlmProvider::DeepSeek,
            None if gemini_api_key.is_some() => LlmProvider::Gemini,
            None => LlmProvider::Mock,
        };

        let document_directory = optional(&lookup, "DOCUMENT_DIRECTORY")
            .or_else(|| optional(&lookup, "PDF_DIRECTORY"))
            .map(PathBuf::from)
            .unwrap_or(d.document_directory);

        let settings = Self {
            llm_provider,
            deepseek_api_key,
            deepseek_api_base: optional(&lookup, "DEEPSEEK_API_BASE").unwrap_or(d.deepseek_api_base),
            model_name: optional(&lookup, "MODEL_NAME").unwrap_or(d.model_name),
            temperature: parse(&lookup, "TEMPERATURE", d.temperature)?,
            gemini_api_key,
            embedding_api_base: optional(&lookup, "EMBEDDING_API_BASE"),
            embedding_api_key: optional(&lookup, "EMBEDDING_API_KEY"),
            embedding_model: optional(&lookup, "EMBEDDING_MODEL").unwrap_or(d.embedding_model),
            embedding_dimensions: parse(&lookup, "EMBEDDING_DIMENSIONS", d.embedding_dimensions)?,
            financial_api_base_url: optional(&lookup, "FINANCIAL_API_BASE_URL"),
            document_directory,
            vector_store_path: optional(&lookup, "VECTOR_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.vector_store_path),
            chunk_size: parse(&lookup, "CHUNK_SIZE", d.chunk_size)?,
            chunk_overlap: parse(&lookup, "CHUNK_OVERLAP", d.chunk_overlap)?,
            retrieval_k: parse(&lookup, "RETRIEVAL_K", d.retrieval_k)?,
            specialist_timeout_secs: parse(&lookup, "SPECIALIST_TIMEOUT_SECS", d.specialist_timeout_secs)?,
            buy_threshold: parse(&lookup, "BUY_THRESHOLD", d.buy_threshold)?,
            sell_threshold: parse(&lookup, "SELL_THRESHOLD", d.sell_threshold)?,
            score_weighting: parse(&lookup, "SCORE_WEIGHTING", d.score_weighting)?,
            evidence_free_confidence_ceiling: parse(
                &lookup,
                "EVIDENCE_FREE_CONFIDENCE_CEILING",
                d.evidence_free_confidence_ceiling,
            )?,
            partial_evidence_confidence_ceiling: parse(
                &lookup,
                "PARTIAL_EVIDENCE_CONFIDENCE_CEILING",
                d.partial_evidence_confidence_ceiling,
            )?,
            routing_policy: parse(&lookup, "ROUTING_POLICY", d.routing_policy)?,
            recommendation_locale: parse(&lookup, "RECOMMENDATION_LOCALE", d.recommendation_locale)?,
            host: optional(&lookup, "HOST").unwrap_or(d.host),
            port: parse(&lookup, "PORT", d.port)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking().validate()?;

        if self.retrieval_k == 0 {
            return Err(AnalysisError::ConfigError("RETRIEVAL_K must be at least 1".to_string()));
        }
        if self.embedding_dimensions == 0 {
            return Err(AnalysisError::ConfigError(
                "EMBEDDING_DIMENSIONS must be at least 1".to_string(),
            ));
        }
        if self.specialist_timeout_secs == 0 {
            return Err(AnalysisError::ConfigError(
                "SPECIALIST_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        self.synthesis_config().validate()?;

        for (name, value) in [
            ("EVIDENCE_FREE_CONFIDENCE_CEILING", self.evidence_free_confidence_ceiling),
            ("PARTIAL_EVIDENCE_CONFIDENCE_CEILING", self.partial_evidence_confidence_ceiling),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AnalysisError::ConfigError(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    pub fn specialist_config(&self) -> SpecialistConfig {
        SpecialistConfig {
            retrieval_k: self.retrieval_k,
            evidence_free_confidence_ceiling: self.evidence_free_confidence_ceiling,
            partial_evidence_confidence_ceiling: self.partial_evidence_confidence_ceiling,
            dcf: DcfAssumptions::default(),
        }
    }

    pub fn synthesis_config(&self) -> SynthesisConfig {
        SynthesisConfig {
            buy_threshold: self.buy_threshold,
            sell_threshold: self.sell_threshold,
            weighting: self.score_weighting,
            locale: self.recommendation_locale,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            specialist_timeout: Duration::from_secs(self.specialist_timeout_secs),
            routing: self.routing_policy,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
