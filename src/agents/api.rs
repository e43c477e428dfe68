//! API-based agent.
//!
//! One network request-response cycle per query against an OpenAI-style
//! chat-completions endpoint; no session semantics. The underlying client
//! is `reqwest::blocking`, so chunks run on `spawn_blocking` threads and
//! post each completed result back through the stream's mpsc bridge; the
//! consumer callback is never invoked from the blocking context.

use crate::config::ApiAgentConfig;
use crate::stream::{BlockingEmitter, ResultStream};
use crate::types::{AgentKind, AppError, QueryResult, QueryStatus, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::Agent;

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletion {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// The LLM API backend.
pub struct ApiAgent {
    id: String,
    config: ApiAgentConfig,
    api_key: String,
    /// Rate-limit bound, separate from and smaller than the session ceiling.
    limiter: Arc<Semaphore>,
}

impl ApiAgent {
    /// Build from configuration, resolving the API key from the environment.
    pub fn from_config(id: &str, config: &ApiAgentConfig, concurrency: usize) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| AppError::Config(format!("{} not set", config.api_key_env)))?;
        Ok(Self::new(id, config, api_key, concurrency))
    }

    pub fn new(id: &str, config: &ApiAgentConfig, api_key: String, concurrency: usize) -> Self {
        Self {
            id: id.to_string(),
            config: config.clone(),
            api_key,
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// One blocking request-response cycle.
    ///
    /// Rate-limit and unavailability statuses raise, so the chunk-level
    /// retry policy can back off; other failures raise too and are turned
    /// into per-query degraded results by the chunk loop.
    fn submit_blocking(
        client: &reqwest::blocking::Client,
        id: &str,
        config: &ApiAgentConfig,
        api_key: &str,
        query: &str,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let response = client
            .post(format!("{}/chat/completions", config.api_base))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": config.model,
                "messages": [{ "role": "user", "content": query }],
                "max_tokens": config.max_tokens,
            }))
            .send()
            .map_err(|e| AppError::Backend(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AppError::Backend(format!(
                "api returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .map_err(|e| AppError::Backend(format!("bad completion JSON: {}", e)))?;
        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(AppError::Backend("completion had no content".to_string()));
        }

        let mut extra = serde_json::Map::new();
        if let Some(model) = completion.model {
            extra.insert("model".into(), serde_json::json!(model));
        }
        if let Some(usage) = completion.usage {
            extra.insert("prompt_tokens".into(), serde_json::json!(usage.prompt_tokens));
            extra.insert(
                "completion_tokens".into(),
                serde_json::json!(usage.completion_tokens),
            );
            extra.insert("total_tokens".into(), serde_json::json!(usage.total_tokens));
        }

        Ok(
            QueryResult::success(id, query, content, started.elapsed().as_secs_f64())
                .with_extra(serde_json::Value::Object(extra)),
        )
    }

    /// Blocking chunk loop: runs on a `spawn_blocking` thread.
    ///
    /// Rate-limit/unavailability errors abort the chunk (the retry policy
    /// re-runs it; the upsert sink absorbs re-emission). Other per-query
    /// errors become degraded results and the loop continues.
    fn run_chunk_blocking(
        id: String,
        config: ApiAgentConfig,
        api_key: String,
        chunk: Vec<String>,
        emitter: BlockingEmitter,
    ) -> Result<Vec<QueryResult>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("http client build failed: {}", e)))?;

        let gap = Duration::from_millis(config.request_gap_ms);
        let mut results = Vec::with_capacity(chunk.len());

        for (index, query) in chunk.iter().enumerate() {
            let result = match Self::submit_blocking(&client, &id, &config, &api_key, query) {
                Ok(result) => result,
                Err(err) => {
                    let text = err.to_string();
                    if crate::retry::classify(&text).is_retryable() {
                        return Err(err);
                    }
                    QueryResult::failed(&id, query, QueryStatus::Error, text, 0.0)
                }
            };
            emitter.post(result.clone());
            results.push(result);

            if index + 1 < chunk.len() {
                std::thread::sleep(gap);
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl Agent for ApiAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::ApiBased
    }

    async fn submit_chunk(
        &self,
        chunk: &[String],
        stream: &ResultStream,
    ) -> Result<Vec<QueryResult>> {
        let _permit = Arc::clone(&self.limiter)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("api limiter closed".to_string()))?;

        info!(agent = %self.id, queries = chunk.len(), "api chunk started");
        let (emitter, forwarder) = stream.bridge(chunk.len().max(1));

        let id = self.id.clone();
        let config = self.config.clone();
        let api_key = self.api_key.clone();
        let queries = chunk.to_vec();
        let worker = tokio::task::spawn_blocking(move || {
            Self::run_chunk_blocking(id, config, api_key, queries, emitter)
        });

        let outcome = worker
            .await
            .map_err(|e| AppError::Internal(format!("api worker panicked: {}", e)))?;

        // The emitter was dropped inside the worker; drain the bridge before
        // handing the chunk back so streamed delivery stays ahead of
        // aggregation.
        if let Err(err) = forwarder.await {
            debug!(agent = %self.id, error = %err, "bridge forwarder ended abnormally");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base: &str) -> ApiAgentConfig {
        let mut config: ApiAgentConfig = toml::from_str("").unwrap();
        config.api_base = base.to_string();
        config.request_gap_ms = 0;
        config
    }

    #[tokio::test]
    async fn chunk_streams_and_returns_results() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{ "message": { "role": "assistant", "content": "An SUV answer" } }],
                "usage": { "prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21 }
            })))
            .mount(&server)
            .await;

        let agent = ApiAgent::new("api", &test_config(&server.uri()), "sk-test".to_string(), 2);
        let stream = ResultStream::disabled();

        let results = agent
            .submit_chunk(&["Q1".to_string(), "Q2".to_string()], &stream)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.status, QueryStatus::Success);
            assert_eq!(result.extra["total_tokens"], 21);
            assert_eq!(result.extra["model"], "gpt-4o-mini");
        }
        assert_eq!(stream.delivered(), 2);
    }

    #[tokio::test]
    async fn rate_limit_status_raises_for_the_retry_policy() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let agent = ApiAgent::new("api", &test_config(&server.uri()), "sk-test".to_string(), 2);
        let stream = ResultStream::disabled();

        let err = agent
            .submit_chunk(&["Q1".to_string()], &stream)
            .await
            .unwrap_err();
        assert!(crate::retry::classify(&err.to_string()).is_retryable());
    }

    #[tokio::test]
    async fn non_retryable_failure_degrades_the_query_and_continues() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let agent = ApiAgent::new("api", &test_config(&server.uri()), "sk-test".to_string(), 2);
        let stream = ResultStream::disabled();

        let results = agent
            .submit_chunk(&["Q1".to_string(), "Q2".to_string()], &stream)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.status, QueryStatus::Error);
            assert!(result.error.is_some());
        }
    }
}
