//! Concurrency scheduling.
//!
//! The scheduler turns one query list and a set of agents into bounded
//! concurrent work. Session-based agents share the external session ceiling
//! and fall back to strictly sequential passes when their combined chunk
//! demand exceeds it; the API lane has its own limiter and runs concurrently
//! with the session lane. Each chunk worker holds the chunk-level retry
//! policy.

use crate::agents::Agent;
use crate::aggregator::{AgentReport, RunReport};
use crate::retry::{submit_chunk_with_retry, RetryConfig};
use crate::session::SessionPool;
use crate::stream::ResultStream;
use crate::types::{AgentKind, QueryResult, QueryStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

// ============= Configuration =============

/// Concurrency knobs, tunable from `canvass.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hard cap on concurrently open browser sessions, shared by every
    /// session-based agent. This mirrors the session service's own limit.
    #[serde(default = "default_session_ceiling")]
    pub session_ceiling: usize,

    /// Concurrent request workers for the API lane.
    #[serde(default = "default_api_concurrency")]
    pub api_concurrency: usize,

    /// Launch offset between chunk workers of one agent.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    /// Sleep between sequential session passes, covering remote session
    /// teardown latency.
    #[serde(default = "default_pass_cooldown_ms")]
    pub pass_cooldown_ms: u64,

    /// How long a worker may wait for a session slot before giving up.
    #[serde(default = "default_session_acquire_timeout_secs")]
    pub session_acquire_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            session_ceiling: default_session_ceiling(),
            api_concurrency: default_api_concurrency(),
            stagger_ms: default_stagger_ms(),
            pass_cooldown_ms: default_pass_cooldown_ms(),
            session_acquire_timeout_secs: default_session_acquire_timeout_secs(),
        }
    }
}

fn default_session_ceiling() -> usize {
    25
}

fn default_api_concurrency() -> usize {
    4
}

fn default_stagger_ms() -> u64 {
    100
}

fn default_pass_cooldown_ms() -> u64 {
    5_000
}

fn default_session_acquire_timeout_secs() -> u64 {
    300
}

// ============= Chunk Planning =============

/// Partition the query list into contiguous chunks, at most `cap` of them.
///
/// The chunk count is `min(len, cap)`, so there are never more concurrent
/// units than the cap and no chunk is empty. Concatenating the chunks in
/// order reproduces the input exactly.
pub fn plan_chunks(queries: &[String], cap: usize) -> Vec<Vec<String>> {
    if queries.is_empty() || cap == 0 {
        return Vec::new();
    }
    let count = queries.len().min(cap);
    let base = queries.len() / count;
    let remainder = queries.len() % count;

    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0;
    for index in 0..count {
        let size = base + usize::from(index < remainder);
        chunks.push(queries[offset..offset + size].to_vec());
        offset += size;
    }
    chunks
}

// ============= Scheduler =============

/// Drives one full execution of the query list across every agent.
pub struct Scheduler {
    config: SchedulerConfig,
    retry: RetryConfig,
    pool: SessionPool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, retry: RetryConfig) -> Self {
        let pool = SessionPool::new(
            config.session_ceiling,
            Duration::from_secs(config.session_acquire_timeout_secs),
        );
        Self {
            config,
            retry,
            pool,
        }
    }

    /// Shared session pool, handed to browser agents at construction.
    pub fn pool(&self) -> SessionPool {
        self.pool.clone()
    }

    /// Run the full query list against every agent and merge the reports.
    ///
    /// Session-based agents share the ceiling, spilling into sequential
    /// passes when their combined chunk demand exceeds it; API-based agents
    /// run concurrently with them. Report order follows the input agent
    /// order.
    pub async fn run(
        &self,
        agents: &[Arc<dyn Agent>],
        queries: &[String],
        stream: &ResultStream,
    ) -> RunReport {
        let start = Instant::now();

        let session_agents: Vec<_> = agents
            .iter()
            .filter(|a| a.kind() == AgentKind::SessionBased)
            .cloned()
            .collect();
        let api_agents: Vec<_> = agents
            .iter()
            .filter(|a| a.kind() == AgentKind::ApiBased)
            .cloned()
            .collect();

        let (session_reports, api_reports) = tokio::join!(
            self.run_session_lane(&session_agents, queries, stream),
            self.run_api_lane(&api_agents, queries, stream),
        );

        let mut by_id: std::collections::HashMap<String, AgentReport> = session_reports
            .into_iter()
            .chain(api_reports)
            .map(|r| (r.agent.clone(), r))
            .collect();
        let ordered = agents
            .iter()
            .filter_map(|a| by_id.remove(a.id()))
            .collect();

        RunReport::new(ordered, start.elapsed().as_secs_f64())
    }

    /// Session lane: ceiling-bounded chunking plus sequential passes.
    ///
    /// Each agent covers the full query list with at most `session_ceiling`
    /// chunks, so one open session serves several queries when the list is
    /// longer than the ceiling. When every agent's chunks fit under the
    /// ceiling at once (always true for a lone agent) the lane runs as a
    /// single pass with no cooldown. Otherwise each pass launches
    /// `ceiling / agent_count` chunks per agent (at least one), strictly
    /// sequentially, with a cooldown sleep between passes covering remote
    /// session teardown. The pool's semaphore enforces the hard limit
    /// regardless.
    async fn run_session_lane(
        &self,
        agents: &[Arc<dyn Agent>],
        queries: &[String],
        stream: &ResultStream,
    ) -> Vec<AgentReport> {
        if agents.is_empty() || queries.is_empty() {
            return Vec::new();
        }

        let ceiling = self.config.session_ceiling;
        let mut queues: Vec<VecDeque<Vec<String>>> = agents
            .iter()
            .map(|_| plan_chunks(queries, ceiling).into_iter().collect())
            .collect();
        let total_units: usize = queues.iter().map(|q| q.len()).sum();
        let single_pass = total_units <= ceiling;
        let allotment = (ceiling / agents.len()).max(1);
        info!(
            agents = agents.len(),
            units = total_units,
            single_pass,
            "session lane planned"
        );

        let mut merged: Vec<(Vec<QueryResult>, Vec<String>)> =
            agents.iter().map(|_| (Vec::new(), Vec::new())).collect();
        let mut started: Vec<Option<Instant>> = vec![None; agents.len()];
        let mut durations = vec![0.0f64; agents.len()];

        let mut first_pass = true;
        while queues.iter().any(|q| !q.is_empty()) {
            if !first_pass && self.config.pass_cooldown_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.pass_cooldown_ms)).await;
            }
            first_pass = false;

            let mut pass: Vec<(usize, Instant, Vec<Vec<String>>)> = Vec::new();
            for (index, queue) in queues.iter_mut().enumerate() {
                if queue.is_empty() {
                    continue;
                }
                let take = if single_pass {
                    queue.len()
                } else {
                    allotment.min(queue.len())
                };
                let start = *started[index].get_or_insert_with(Instant::now);
                pass.push((index, start, queue.drain(..take).collect()));
            }

            let pass_futures = pass.into_iter().map(|(index, start, chunks)| async move {
                let (results, errors) = self.run_chunks(&agents[index], chunks, stream).await;
                (index, results, errors, start.elapsed().as_secs_f64())
            });
            for (index, results, errors, elapsed) in futures::future::join_all(pass_futures).await {
                merged[index].0.extend(results);
                merged[index].1.extend(errors);
                durations[index] = elapsed;
            }
        }

        agents
            .iter()
            .zip(merged.into_iter().zip(durations))
            .map(|(agent, ((results, errors), duration))| {
                AgentReport::from_chunks(agent.id(), results, errors, duration)
            })
            .collect()
    }

    /// API lane: every API agent runs its full query list concurrently,
    /// bounded only by its own limiter.
    async fn run_api_lane(
        &self,
        agents: &[Arc<dyn Agent>],
        queries: &[String],
        stream: &ResultStream,
    ) -> Vec<AgentReport> {
        let futures = agents.iter().map(|agent| async move {
            let agent_start = Instant::now();
            let chunks = plan_chunks(queries, self.config.api_concurrency);
            let (results, errors) = self.run_chunks(agent, chunks, stream).await;
            AgentReport::from_chunks(agent.id(), results, errors, agent_start.elapsed().as_secs_f64())
        });
        futures::future::join_all(futures).await
    }

    /// Launch one `JoinSet` of staggered chunk workers for a single agent
    /// and merge their outcomes.
    ///
    /// Exhausted chunks come back from the retry policy as
    /// `failed_max_retries` results; the adapter never produced those, so
    /// they are emitted to the stream here. Results from a retried chunk
    /// were emitted by the adapter before the policy stamped the `retries`
    /// annotation on them, so they are emitted again and the consumer's
    /// upsert overwrites the row with the annotated copy. Chunk-level fatal
    /// errors become entries in the agent's error list.
    async fn run_chunks(
        &self,
        agent: &Arc<dyn Agent>,
        chunks: Vec<Vec<String>>,
        stream: &ResultStream,
    ) -> (Vec<QueryResult>, Vec<String>) {
        let mut set = JoinSet::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let agent = Arc::clone(agent);
            let stream = stream.clone();
            let retry = self.retry.clone();
            let stagger = Duration::from_millis(index as u64 * self.config.stagger_ms);
            set.spawn(async move {
                if !stagger.is_zero() {
                    tokio::time::sleep(stagger).await;
                }
                let outcome = submit_chunk_with_retry(agent.id(), &chunk, &retry, || {
                    agent.submit_chunk(&chunk, &stream)
                })
                .await;
                match outcome {
                    Ok(results) => {
                        for result in &results {
                            let policy_touched = result.status == QueryStatus::FailedMaxRetries
                                || result.extra.get("retries").is_some();
                            if policy_touched {
                                stream.emit(result.clone()).await;
                            }
                        }
                        Ok(results)
                    }
                    Err(err) => Err(err.to_string()),
                }
            });
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(chunk_results)) => results.extend(chunk_results),
                Ok(Err(error)) => {
                    warn!(agent = %agent.id(), error = %error, "chunk failed fatally");
                    errors.push(error);
                }
                Err(join_error) => {
                    warn!(agent = %agent.id(), error = %join_error, "chunk worker panicked");
                    errors.push(format!("chunk worker panicked: {}", join_error));
                }
            }
        }
        (results, errors)
    }
}
