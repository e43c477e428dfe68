//! Session-based browser agents.
//!
//! Each chunk acquires one slot from the shared [`SessionPool`], creates one
//! remote browser session, pushes its queries through the page, and tears
//! the session down unconditionally. Completion detection is a
//! poll-until-stable loop: the response area is re-read until its text has
//! not changed for a configured window, bounded by a hard maximum wait that
//! yields a `timeout` result instead of hanging.
//!
//! The actual page interaction lives behind [`SessionTransport`] so the
//! orchestrator never depends on a concrete automation vendor and tests can
//! substitute a scripted transport.

use crate::config::{BrowserAgentConfig, PollConfig};
use crate::session::SessionPool;
use crate::stream::ResultStream;
use crate::types::{AgentKind, AppError, QueryResult, QueryStatus, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::Agent;

// ============= Transport Seam =============

/// Reference to one live remote browser session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
}

/// Login credentials resolved from the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Everything the transport needs to know about one chatbot page.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Page the chatbot lives on.
    pub url: String,
    /// Login performed right after navigation, when the site requires one.
    pub login: Option<Credentials>,
}

/// Remote browser-session operations, vendor-agnostic.
///
/// Implementations own the DOM heuristics; the orchestrator treats
/// `send_query`/`read_response` as opaque.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Create a session, navigate to the profile URL, and log in if needed.
    async fn open_session(&self, profile: &SiteProfile) -> Result<SessionHandle>;

    /// Clear the conversation state (chatbots with sticky memory).
    async fn reset_conversation(&self, session: &SessionHandle) -> Result<()>;

    /// Type and submit one query.
    async fn send_query(&self, session: &SessionHandle, query: &str) -> Result<()>;

    /// Read the current text of the latest response area.
    async fn read_response(&self, session: &SessionHandle) -> Result<String>;

    /// Stop the remote session.
    async fn close_session(&self, session: &SessionHandle) -> Result<()>;
}

// ============= HTTP Transport =============

/// [`SessionTransport`] over the session service's REST API.
pub struct HttpSessionTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(default)]
    text: String,
}

impl HttpSessionTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Map non-success statuses to classifiable backend errors.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Backend(format!(
            "session service returned {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )))
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn open_session(&self, profile: &SiteProfile) -> Result<SessionHandle> {
        let mut payload = serde_json::json!({
            "url": profile.url,
            "stealth": true,
        });
        if let Some(ref login) = profile.login {
            payload["login"] = serde_json::json!({
                "username": login.username,
                "password": login.password,
            });
        }
        let response = self
            .client
            .post(format!("{}/v1/sessions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Backend(format!("session create failed: {}", e)))?;
        let created: SessionCreated = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Backend(format!("session create returned bad JSON: {}", e)))?;
        debug!(session = %created.id, "remote session created");
        Ok(SessionHandle { id: created.id })
    }

    async fn reset_conversation(&self, session: &SessionHandle) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/sessions/{}/reset", self.base_url, session.id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::Backend(format!("reset failed: {}", e)))?;
        Self::check(response).await.map(|_| ())
    }

    async fn send_query(&self, session: &SessionHandle, query: &str) -> Result<()> {
        let response = self
            .client
            .post(format!(
                "{}/v1/sessions/{}/messages",
                self.base_url, session.id
            ))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": query }))
            .send()
            .await
            .map_err(|e| AppError::Backend(format!("send failed: {}", e)))?;
        Self::check(response).await.map(|_| ())
    }

    async fn read_response(&self, session: &SessionHandle) -> Result<String> {
        let response = self
            .client
            .get(format!(
                "{}/v1/sessions/{}/response",
                self.base_url, session.id
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::Backend(format!("read failed: {}", e)))?;
        let body: ResponseBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Backend(format!("read returned bad JSON: {}", e)))?;
        Ok(body.text.trim().to_string())
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/v1/sessions/{}", self.base_url, session.id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::Backend(format!("close failed: {}", e)))?;
        Self::check(response).await.map(|_| ())
    }
}

// ============= Browser Agent =============

/// One session-based chatbot backend.
pub struct BrowserAgent {
    id: String,
    profile: SiteProfile,
    poll: PollConfig,
    reset_between_queries: bool,
    transport: Arc<dyn SessionTransport>,
    pool: SessionPool,
}

impl BrowserAgent {
    /// Build from configuration, resolving secrets from the environment.
    ///
    /// A missing session key or login variable is an agent-level fatal
    /// error: the runner records the agent as failed and the siblings run
    /// unaffected.
    pub fn from_config(id: &str, config: &BrowserAgentConfig, pool: SessionPool) -> Result<Self> {
        let api_key = std::env::var(&config.session_key_env).map_err(|_| {
            AppError::Config(format!("{} not set", config.session_key_env))
        })?;
        let login = match &config.login {
            Some(login) => Some(Credentials {
                username: std::env::var(&login.username_env).map_err(|_| {
                    AppError::Config(format!("{} not set", login.username_env))
                })?,
                password: std::env::var(&login.password_env).map_err(|_| {
                    AppError::Config(format!("{} not set", login.password_env))
                })?,
            }),
            None => None,
        };
        let transport = Arc::new(HttpSessionTransport::new(&config.service_url, api_key));
        Ok(Self::new(id, config, login, transport, pool))
    }

    /// Build with an explicit transport (tests, alternative vendors).
    pub fn new(
        id: &str,
        config: &BrowserAgentConfig,
        login: Option<Credentials>,
        transport: Arc<dyn SessionTransport>,
        pool: SessionPool,
    ) -> Self {
        Self {
            id: id.to_string(),
            profile: SiteProfile {
                url: config.url.clone(),
                login,
            },
            poll: config.poll.clone(),
            reset_between_queries: config.reset_between_queries,
            transport,
            pool,
        }
    }

    /// Run one query inside an open session. Never raises: per-query
    /// problems become degraded results so siblings in the chunk proceed.
    async fn submit_one(&self, session: &SessionHandle, query: &str) -> QueryResult {
        let started = Instant::now();

        if self.reset_between_queries {
            if let Err(err) = self.transport.reset_conversation(session).await {
                warn!(agent = %self.id, error = %err, "conversation reset failed, continuing");
            }
        }

        if let Err(err) = self.transport.send_query(session, query).await {
            return QueryResult::failed(
                &self.id,
                query,
                QueryStatus::Error,
                err.to_string(),
                started.elapsed().as_secs_f64(),
            );
        }

        tokio::time::sleep(Duration::from_millis(self.poll.initial_delay_ms)).await;

        match self.wait_for_stable_response(session).await {
            Ok(Some(text)) => {
                let result = QueryResult::success(
                    &self.id,
                    query,
                    text,
                    started.elapsed().as_secs_f64(),
                )
                .with_extra(serde_json::json!({ "session_id": session.id }));
                debug!(agent = %self.id, query = %query, "query completed");
                result
            }
            Ok(None) => QueryResult::failed(
                &self.id,
                query,
                QueryStatus::Timeout,
                format!("no stable response within {}s", self.poll.max_wait_secs),
                started.elapsed().as_secs_f64(),
            ),
            Err(err) => QueryResult::failed(
                &self.id,
                query,
                QueryStatus::Error,
                err.to_string(),
                started.elapsed().as_secs_f64(),
            ),
        }
    }

    /// Poll the response area until its text stops changing.
    ///
    /// Returns `Ok(None)` when the maximum wait elapses without a stable,
    /// non-empty response.
    async fn wait_for_stable_response(&self, session: &SessionHandle) -> Result<Option<String>> {
        let deadline = Instant::now() + Duration::from_secs(self.poll.max_wait_secs);
        let stability = Duration::from_millis(self.poll.stability_window_ms);
        let interval = Duration::from_millis(self.poll.check_interval_ms);

        let mut last_text = String::new();
        let mut last_change = Instant::now();

        while Instant::now() < deadline {
            let text = self.transport.read_response(session).await?;
            if text != last_text {
                last_text = text;
                last_change = Instant::now();
            } else if !last_text.is_empty() && last_change.elapsed() >= stability {
                return Ok(Some(last_text));
            }
            tokio::time::sleep(interval).await;
        }
        Ok(None)
    }
}

#[async_trait]
impl Agent for BrowserAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::SessionBased
    }

    async fn submit_chunk(
        &self,
        chunk: &[String],
        stream: &ResultStream,
    ) -> Result<Vec<QueryResult>> {
        // The permit spans the whole external session; dropping it (normal
        // return, error, or cancellation) releases the slot.
        let _permit = self.pool.acquire().await?;
        let session = self.transport.open_session(&self.profile).await?;
        info!(agent = %self.id, session = %session.id, queries = chunk.len(), "chunk started");

        let mut results = Vec::with_capacity(chunk.len());
        for query in chunk {
            let result = self.submit_one(&session, query).await;
            stream.emit(result.clone()).await;
            results.push(result);
        }

        if let Err(err) = self.transport.close_session(&session).await {
            warn!(agent = %self.id, session = %session.id, error = %err, "session close failed");
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrowserAgentConfig;
    use std::sync::Mutex;

    /// Transport whose response text follows a script of poll reads.
    struct ScriptedTransport {
        reads: Mutex<Vec<&'static str>>,
        closed: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<&'static str>) -> Self {
            Self {
                reads: Mutex::new(reads),
                closed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SessionTransport for ScriptedTransport {
        async fn open_session(&self, _profile: &SiteProfile) -> Result<SessionHandle> {
            Ok(SessionHandle { id: "s-1".to_string() })
        }

        async fn reset_conversation(&self, _session: &SessionHandle) -> Result<()> {
            Ok(())
        }

        async fn send_query(&self, _session: &SessionHandle, _query: &str) -> Result<()> {
            Ok(())
        }

        async fn read_response(&self, _session: &SessionHandle) -> Result<String> {
            let mut reads = self.reads.lock().unwrap();
            if reads.len() > 1 {
                Ok(reads.remove(0).to_string())
            } else {
                Ok(reads.first().copied().unwrap_or_default().to_string())
            }
        }

        async fn close_session(&self, session: &SessionHandle) -> Result<()> {
            self.closed.lock().unwrap().push(session.id.clone());
            Ok(())
        }
    }

    fn fast_config() -> BrowserAgentConfig {
        let mut config: BrowserAgentConfig = toml::from_str(
            r#"
            url = "https://chat.example.com"
            "#,
        )
        .unwrap();
        config.poll.initial_delay_ms = 0;
        config.poll.max_wait_secs = 1;
        config.poll.stability_window_ms = 10;
        config.poll.check_interval_ms = 5;
        config
    }

    fn agent_with(transport: Arc<ScriptedTransport>) -> BrowserAgent {
        BrowserAgent::new(
            "alpha",
            &fast_config(),
            None,
            transport,
            SessionPool::new(2, Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn stable_text_becomes_success_and_session_closes() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            "", "Typing…", "Here are the best SUVs",
        ]));
        let agent = agent_with(Arc::clone(&transport));
        let stream = ResultStream::disabled();

        let results = agent
            .submit_chunk(&["What are the best SUVs?".to_string()], &stream)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, QueryStatus::Success);
        assert_eq!(results[0].response.as_deref(), Some("Here are the best SUVs"));
        assert_eq!(results[0].extra["session_id"], "s-1");
        assert_eq!(transport.closed.lock().unwrap().len(), 1);
        assert_eq!(stream.delivered(), 1);
    }

    #[tokio::test]
    async fn never_stable_text_becomes_timeout() {
        // Empty text never satisfies the stability check.
        let transport = Arc::new(ScriptedTransport::new(vec![""]));
        let agent = agent_with(Arc::clone(&transport));
        let stream = ResultStream::disabled();

        let results = agent
            .submit_chunk(&["Q1".to_string()], &stream)
            .await
            .unwrap();

        assert_eq!(results[0].status, QueryStatus::Timeout);
        assert!(results[0].error.as_deref().unwrap_or_default().contains("no stable response"));
        // Teardown still ran.
        assert_eq!(transport.closed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_query_in_chunk_is_represented() {
        let transport = Arc::new(ScriptedTransport::new(vec!["answer text"]));
        let agent = agent_with(transport);
        let stream = ResultStream::disabled();

        let chunk: Vec<String> = (1..=3).map(|i| format!("Q{}", i)).collect();
        let results = agent.submit_chunk(&chunk, &stream).await.unwrap();

        assert_eq!(results.len(), 3);
        let queries: std::collections::HashSet<_> =
            results.iter().map(|r| r.query.clone()).collect();
        assert_eq!(queries.len(), 3);
        assert_eq!(stream.delivered(), 3);
    }
}
