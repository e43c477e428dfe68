//! Retry policy for chunk submissions.
//!
//! Wraps one adapter invocation (one chunk of queries) with bounded
//! exponential backoff plus uniform jitter. Errors are classified once,
//! here, by [`classify`]; call sites never do their own substring checks.
//!
//! Exhaustion never raises: after the final retryable failure the policy
//! produces a degraded `failed_max_retries` result for every query in the
//! chunk, so an exhausted chunk cannot abort its siblings. Fatal errors
//! propagate immediately to the scheduler.

use crate::types::{AppError, QueryResult, QueryStatus, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

// ============= Error Classification =============

/// Closed set of retryability classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Backend asked us to slow down (429 and friends).
    RateLimited,
    /// Backend is temporarily unable to serve (503 and friends).
    Unavailable,
    /// Everything else; retrying will not help.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

/// Map raw error text to a retryability class.
///
/// The signatures come from the backends we talk to: rate limiting surfaces
/// as a 429 status or "Too Many Requests", transient outage as a 503 or
/// "Service Unavailable".
pub fn classify(error_text: &str) -> ErrorClass {
    let lower = error_text.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit")
    {
        ErrorClass::RateLimited
    } else if lower.contains("503") || lower.contains("service unavailable") {
        ErrorClass::Unavailable
    } else {
        ErrorClass::Fatal
    }
}

// ============= Retry Configuration =============

/// Backoff and attempt limits, tunable from `canvass.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per chunk (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay, doubled on every retryable failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling on the exponential term.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Uniform jitter added on top, lower bound.
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,

    /// Uniform jitter added on top, upper bound.
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl RetryConfig {
    /// Fast retries for tests.
    #[doc(hidden)]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
        }
    }
}

/// Exponential backoff with uniform jitter for the given zero-based attempt.
///
/// The jitter term stops concurrently scheduled chunks from retrying in
/// lock-step after a shared rate-limit response.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(20))
        .min(config.max_delay_ms);
    let jitter = if config.jitter_max_ms > config.jitter_min_ms {
        rand::rng().random_range(config.jitter_min_ms..=config.jitter_max_ms)
    } else {
        config.jitter_min_ms
    };
    Duration::from_millis(exp + jitter)
}

// ============= Retry Wrapper =============

/// Run one chunk submission with retries.
///
/// `op` is invoked once per attempt and must raise on chunk-level failure;
/// per-query problems stay inside the returned results. Behavior by class:
///
/// - retryable error: backoff sleep, then retry, up to `max_retries` attempts
/// - fatal error: propagated immediately as `Err`
/// - exhaustion: `Ok` with one `FailedMaxRetries` result per query
///
/// Successful results obtained after at least one retry carry the retry
/// count in their `extra` metadata.
pub async fn submit_chunk_with_retry<F, Fut>(
    agent_id: &str,
    chunk: &[String],
    config: &RetryConfig,
    op: F,
) -> Result<Vec<QueryResult>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Vec<QueryResult>>>,
{
    let start = Instant::now();
    let mut last_error = String::new();

    for attempt in 0..config.max_retries {
        match op().await {
            Ok(mut results) => {
                if attempt > 0 {
                    for result in &mut results {
                        annotate_retries(result, attempt);
                    }
                }
                return Ok(results);
            }
            Err(err) => {
                let text = err.to_string();
                let class = classify(&text);
                if !class.is_retryable() {
                    return Err(err);
                }
                last_error = text;
                // Not the last attempt: wait, then go again.
                if attempt + 1 < config.max_retries {
                    let delay = backoff_delay(attempt, config);
                    warn!(
                        agent = agent_id,
                        attempt = attempt + 1,
                        max = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    warn!(
        agent = agent_id,
        attempts = config.max_retries,
        error = %last_error,
        "chunk exhausted retries, emitting degraded results"
    );
    let elapsed = start.elapsed().as_secs_f64();
    Ok(chunk
        .iter()
        .map(|query| {
            QueryResult::failed(
                agent_id,
                query,
                QueryStatus::FailedMaxRetries,
                last_error.clone(),
                elapsed,
            )
        })
        .collect())
}

fn annotate_retries(result: &mut QueryResult, retries: u32) {
    match result.extra {
        serde_json::Value::Object(ref mut map) => {
            map.insert("retries".into(), serde_json::json!(retries));
        }
        _ => {
            result.extra = serde_json::json!({ "retries": retries });
        }
    }
}

// ============= Default Value Functions =============

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_min_ms() -> u64 {
    1_000
}

fn default_jitter_max_ms() -> u64 {
    4_000
}
