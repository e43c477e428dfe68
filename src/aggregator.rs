//! Run aggregation.
//!
//! After every agent's scheduling completes, the per-agent outcomes are
//! merged into one report for the run. Failures are isolated per agent: one
//! agent losing its credentials must not suppress another agent's results.

use crate::types::{AgentStatus, QueryResult};
use serde::Serialize;

/// Terminal outcome of one agent's branch of a run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub agent: String,
    pub status: AgentStatus,
    /// Wall-clock time spent scheduling this agent.
    pub duration_seconds: f64,
    /// Joined chunk-level or agent-level error detail, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every terminal result this agent produced, in completion order.
    pub results: Vec<QueryResult>,
}

impl AgentReport {
    /// Derive the terminal status from merged chunk results and errors.
    ///
    /// No chunk errors: `success`. Errors alongside data: `partial_error`.
    /// Errors and nothing produced: `error`.
    pub fn from_chunks(
        agent: impl Into<String>,
        results: Vec<QueryResult>,
        chunk_errors: Vec<String>,
        duration_seconds: f64,
    ) -> Self {
        let status = if chunk_errors.is_empty() {
            AgentStatus::Success
        } else if results.is_empty() {
            AgentStatus::Error
        } else {
            AgentStatus::PartialError
        };
        let error = if chunk_errors.is_empty() {
            None
        } else {
            Some(chunk_errors.join("; "))
        };
        Self {
            agent: agent.into(),
            status,
            duration_seconds,
            error,
            results,
        }
    }

    /// Agent-level fatal outcome (setup failure, missing credentials).
    pub fn failed(agent: impl Into<String>, error: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            agent: agent.into(),
            status: AgentStatus::Error,
            duration_seconds,
            error: Some(error.into()),
            results: Vec::new(),
        }
    }
}

/// Merged report for one complete execution of the query list.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub agents: Vec<AgentReport>,
    pub total_seconds: f64,
}

impl RunReport {
    pub fn new(agents: Vec<AgentReport>, total_seconds: f64) -> Self {
        Self {
            agents,
            total_seconds,
        }
    }

    /// Look up one agent's branch by identifier.
    pub fn agent(&self, id: &str) -> Option<&AgentReport> {
        self.agents.iter().find(|a| a.agent == id)
    }

    /// Total results across every agent.
    pub fn result_count(&self) -> usize {
        self.agents.iter().map(|a| a.results.len()).sum()
    }

    /// True when any agent ended in a non-success status.
    pub fn has_failures(&self) -> bool {
        self.agents.iter().any(|a| a.status != AgentStatus::Success)
    }
}
