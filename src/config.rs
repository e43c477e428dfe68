//! TOML-based configuration for Canvass
//!
//! Declarative configuration for the query list, scheduling limits, retry
//! behavior, agents, and the database via a TOML file (`canvass.toml`).
//! Secrets (API keys, chatbot logins) never live in the file; agent sections
//! name the environment variables to read them from.

use crate::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;
use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Root configuration structure loaded from canvass.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvassConfig {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Named agent configurations
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

// ============= Run Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Display name recorded on the run row.
    #[serde(default = "default_run_name")]
    pub name: String,

    /// The canonical query list, submitted to every agent in this order.
    #[serde(default)]
    pub queries: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_run_name(),
            queries: Vec::new(),
        }
    }
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the local libsql database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

// ============= Agent Configuration =============

/// Per-agent configuration, tagged by scheduling capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AgentConfig {
    /// A session-based browser agent driven through the remote session service.
    #[serde(rename = "session-based")]
    Browser(BrowserAgentConfig),

    /// An API-based agent: one request/response cycle per query.
    #[serde(rename = "api-based")]
    Api(ApiAgentConfig),
}

impl AgentConfig {
    pub fn enabled(&self) -> bool {
        match self {
            AgentConfig::Browser(c) => c.enabled,
            AgentConfig::Api(c) => c.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserAgentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Page the chatbot lives on.
    pub url: String,

    /// Base URL of the remote browser-session service.
    #[serde(default = "default_session_service_url")]
    pub service_url: String,

    /// Environment variable holding the session-service API key.
    #[serde(default = "default_session_key_env")]
    pub session_key_env: String,

    /// Optional login credentials, read from the environment.
    #[serde(default)]
    pub login: Option<LoginConfig>,

    /// Reset the conversation before each query (chatbots with sticky memory).
    #[serde(default)]
    pub reset_between_queries: bool,

    /// Completion-detection polling knobs.
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    pub username_env: String,
    pub password_env: String,
}

/// Knobs for the poll-until-stable completion loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Grace period before the first poll tick.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Hard ceiling on the whole wait; exceeding it yields a timeout result.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// How long the text must stay unchanged to count as complete.
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,

    /// Interval between poll ticks.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_wait_secs: default_max_wait_secs(),
            stability_window_ms: default_stability_window_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiAgentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the OpenAI-style chat completions endpoint.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Pause between consecutive requests inside one worker.
    #[serde(default = "default_request_gap_ms")]
    pub request_gap_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// ============= Loading and Validation =============

impl CanvassConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: CanvassConfig = toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde can express.
    pub fn validate(&self) -> Result<()> {
        if self.run.queries.is_empty() {
            return Err(AppError::Config(
                "run.queries must contain at least one query".to_string(),
            ));
        }
        if self.scheduler.session_ceiling == 0 {
            return Err(AppError::Config(
                "scheduler.session_ceiling must be at least 1".to_string(),
            ));
        }
        if self.scheduler.api_concurrency == 0 {
            return Err(AppError::Config(
                "scheduler.api_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.jitter_min_ms > self.retry.jitter_max_ms {
            return Err(AppError::Config(
                "retry.jitter_min_ms must not exceed retry.jitter_max_ms".to_string(),
            ));
        }
        for (name, agent) in &self.agents {
            if let AgentConfig::Browser(browser) = agent {
                if browser.enabled && browser.url.is_empty() {
                    return Err(AppError::Config(format!(
                        "agents.{}.url must not be empty",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Enabled agents of each capability, in stable name order.
    pub fn enabled_agents(&self) -> (Vec<(&str, &BrowserAgentConfig)>, Vec<(&str, &ApiAgentConfig)>) {
        let mut browser = Vec::new();
        let mut api = Vec::new();
        let mut names: Vec<&String> = self.agents.keys().collect();
        names.sort();
        for name in names {
            match &self.agents[name] {
                AgentConfig::Browser(c) if c.enabled => browser.push((name.as_str(), c)),
                AgentConfig::Api(c) if c.enabled => api.push((name.as_str(), c)),
                _ => {}
            }
        }
        (browser, api)
    }
}

// ============= Default Value Functions =============

fn default_run_name() -> String {
    "Batch Execution".to_string()
}

fn default_database_path() -> String {
    "canvass.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_service_url() -> String {
    "https://sessions.dirmacs.dev".to_string()
}

fn default_session_key_env() -> String {
    "SESSION_SERVICE_API_KEY".to_string()
}

fn default_initial_delay_ms() -> u64 {
    10_000
}

fn default_max_wait_secs() -> u64 {
    60
}

fn default_stability_window_ms() -> u64 {
    3_000
}

fn default_check_interval_ms() -> u64 {
    1_500
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_request_gap_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: CanvassConfig = toml::from_str(
            r#"
            [run]
            queries = ["What are the best SUVs?"]
            "#,
        )
        .unwrap();

        assert_eq!(config.run.name, "Batch Execution");
        assert_eq!(config.run.queries.len(), 1);
        assert_eq!(config.database.path, "canvass.db");
        assert!(config.agents.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn agent_sections_are_tagged_by_kind() {
        let config: CanvassConfig = toml::from_str(
            r#"
            [run]
            queries = ["Q1"]

            [agents.dealer]
            kind = "session-based"
            url = "https://dealer.example.com"

            [agents.advisor]
            kind = "session-based"
            url = "https://advisor.example.com"
            reset_between_queries = true
            login = { username_env = "ADVISOR_USER", password_env = "ADVISOR_PASS" }

            [agents.api]
            kind = "api-based"
            model = "gpt-3.5-turbo"
            "#,
        )
        .unwrap();

        let (browser, api) = config.enabled_agents();
        assert_eq!(browser.len(), 2);
        assert_eq!(api.len(), 1);
        // stable name order
        assert_eq!(browser[0].0, "advisor");
        assert!(browser[0].1.login.is_some());
        assert_eq!(api[0].1.max_tokens, 500);
    }

    #[test]
    fn empty_query_list_is_rejected() {
        let config: CanvassConfig = toml::from_str("[run]\nqueries = []").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let config: CanvassConfig = toml::from_str(
            r#"
            [run]
            queries = ["Q1"]
            [scheduler]
            session_ceiling = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
