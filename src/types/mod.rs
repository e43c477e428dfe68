//! Core types for the orchestrator: queries, results, run lifecycle, errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============= Agent Types =============

/// Scheduling capability of an agent backend.
///
/// Session-based agents consume a slot from the shared external session
/// ceiling for the duration of every submission. API-based agents have no
/// session concept and are bounded only by their own concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    SessionBased,
    ApiBased,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::SessionBased => write!(f, "session-based"),
            AgentKind::ApiBased => write!(f, "api-based"),
        }
    }
}

// ============= Query Result Types =============

/// Terminal status of one query submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    Timeout,
    Error,
    FailedMaxRetries,
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryStatus::Success => "success",
            QueryStatus::Timeout => "timeout",
            QueryStatus::Error => "error",
            QueryStatus::FailedMaxRetries => "failed_max_retries",
        };
        write!(f, "{}", s)
    }
}

/// One terminal result per (agent, query) submission.
///
/// Invariant: `status == Success` implies `response` is `Some` and non-empty;
/// every other status implies `error` carries detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Identifier of the originating agent.
    pub agent: String,
    /// Exact query text as submitted.
    pub query: String,
    /// Extracted response text, if any.
    pub response: Option<String>,
    /// Terminal status for this submission.
    pub status: QueryStatus,
    /// Error detail for non-success statuses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent on this submission.
    pub response_time_seconds: f64,
    /// Response length in characters, when a response was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_count: Option<usize>,
    /// Response length in whitespace-separated words.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    /// Agent-specific fields (model name, token usage, session reference).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
    /// When the submission completed.
    pub timestamp: DateTime<Utc>,
}

impl QueryResult {
    /// Build a success result, deriving content metrics from the response.
    pub fn success(agent: &str, query: &str, response: String, elapsed_secs: f64) -> Self {
        let char_count = response.chars().count();
        let word_count = response.split_whitespace().count();
        Self {
            agent: agent.to_string(),
            query: query.to_string(),
            response: Some(response),
            status: QueryStatus::Success,
            error: None,
            response_time_seconds: elapsed_secs,
            char_count: Some(char_count),
            word_count: Some(word_count),
            extra: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Build a degraded result with no response text.
    pub fn failed(
        agent: &str,
        query: &str,
        status: QueryStatus,
        error: impl Into<String>,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            agent: agent.to_string(),
            query: query.to_string(),
            response: None,
            status,
            error: Some(error.into()),
            response_time_seconds: elapsed_secs,
            char_count: None,
            word_count: None,
            extra: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attach agent-specific metadata fields.
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    /// Everything except agent/query/response, serialized for the metadata
    /// column of the persistence sink.
    pub fn metrics_json(&self) -> serde_json::Value {
        let mut metrics = serde_json::Map::new();
        metrics.insert("status".into(), serde_json::json!(self.status));
        metrics.insert(
            "response_time_seconds".into(),
            serde_json::json!(self.response_time_seconds),
        );
        if let Some(n) = self.char_count {
            metrics.insert("response_char_count".into(), serde_json::json!(n));
        }
        if let Some(n) = self.word_count {
            metrics.insert("response_word_count".into(), serde_json::json!(n));
        }
        if let Some(ref e) = self.error {
            metrics.insert("error".into(), serde_json::json!(e));
        }
        if let serde_json::Value::Object(ref map) = self.extra {
            for (k, v) in map {
                metrics.insert(k.clone(), v.clone());
            }
        }
        metrics.insert("timestamp".into(), serde_json::json!(self.timestamp));
        serde_json::json!({ "metrics": metrics })
    }
}

// ============= Run Types =============

/// Lifecycle status of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl RunStatus {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of one agent's branch of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Every scheduled unit completed without a chunk-level error.
    Success,
    /// Some units failed but the agent produced data.
    PartialError,
    /// The agent produced nothing.
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Success => "success",
            AgentStatus::PartialError => "partial_error",
            AgentStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// ============= Error Types =============

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_result_derives_content_metrics() {
        let r = QueryResult::success("alpha", "Q1", "two   words".to_string(), 1.5);
        assert_eq!(r.status, QueryStatus::Success);
        assert_eq!(r.char_count, Some(11));
        assert_eq!(r.word_count, Some(2));
        assert!(r.error.is_none());
    }

    #[test]
    fn failed_result_carries_error_detail() {
        let r = QueryResult::failed("alpha", "Q1", QueryStatus::Timeout, "no stable output", 60.0);
        assert!(r.response.is_none());
        assert_eq!(r.error.as_deref(), Some("no stable output"));
        assert_eq!(r.char_count, None);
    }

    #[test]
    fn metrics_json_flattens_extra_fields() {
        let r = QueryResult::success("api", "Q1", "hi there".to_string(), 0.2)
            .with_extra(serde_json::json!({ "total_tokens": 42 }));
        let meta = r.metrics_json();
        assert_eq!(meta["metrics"]["total_tokens"], 42);
        assert_eq!(meta["metrics"]["response_word_count"], 2);
        assert!(meta["metrics"].get("response").is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&QueryStatus::FailedMaxRetries).unwrap();
        assert_eq!(s, "\"failed_max_retries\"");
        assert_eq!(RunStatus::Terminated.as_str(), "terminated");
    }
}
