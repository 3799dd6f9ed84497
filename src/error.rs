//! Error types for the stock analyst orchestrator

use thiserror::Error;

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {

    // =============================
    // Evidence Errors (recoverable)
    // =============================

    #[error("Retrieval unavailable: no ingested chunks for {0}")]
    RetrievalUnavailable(String),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Tool data missing: {0}")]
    ToolDataMissing(String),

    // =============================
    // Agent / Supervisor Errors
    // =============================

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Judgment parse error: {0}")]
    JudgmentParseError(String),

    #[error("Agent {agent} failed: {reason}")]
    AgentFailed {
        agent: String,
        reason: String,
        #[source]
        cause: Option<Box<AnalysisError>>,
    },

    #[error("Supervisor failed: {0}")]
    SupervisorFailed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ingestion error: {0}")]
    IngestionError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AnalysisError {
    /// Wrap the error that made a specialist give up
    pub fn agent_failed(agent: impl std::fmt::Display, cause: AnalysisError) -> Self {
        AnalysisError::AgentFailed {
            agent: agent.to_string(),
            reason: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Errors a specialist absorbs by lowering its confidence instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::RetrievalUnavailable(_)
                | AnalysisError::ToolUnavailable(_)
                | AnalysisError::ToolDataMissing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(AnalysisError::RetrievalUnavailable("AAPL".into()).is_recoverable());
        assert!(AnalysisError::ToolUnavailable("price".into()).is_recoverable());
        assert!(AnalysisError::ToolDataMissing("ZZZZ".into()).is_recoverable());
        assert!(!AnalysisError::LlmError("boom".into()).is_recoverable());
        assert!(!AnalysisError::JudgmentParseError("bad".into()).is_recoverable());
    }

    #[test]
    fn test_agent_failed_display() {
        let err = AnalysisError::AgentFailed {
            agent: "market".into(),
            reason: "timeout".into(),
            cause: None,
        };
        assert_eq!(err.to_string(), "Agent market failed: timeout");
    }

    #[test]
    fn test_agent_failed_keeps_cause() {
        let err = AnalysisError::agent_failed("valuation", AnalysisError::LlmError("quota".into()));
        assert_eq!(err.to_string(), "Agent valuation failed: LLM error: quota");
        assert!(std::error::Error::source(&err).is_some());
    }
}
