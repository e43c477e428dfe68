//! Mock implementations for testing.
//!
//! Provides a configurable mock agent usable across test files without
//! duplication: scripted success or failure, an observable concurrency
//! gauge, and optional participation in the shared session pool.

use async_trait::async_trait;
use canvass::agents::Agent;
use canvass::session::SessionPool;
use canvass::stream::ResultStream;
use canvass::types::{AgentKind, AppError, QueryResult, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Watches how many chunk submissions are in flight at once.
#[derive(Clone, Default)]
pub struct ConcurrencyGauge {
    current: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of simultaneous in-flight submissions observed.
    pub fn max_seen(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }
}

/// Configurable mock agent.
pub struct MockAgent {
    id: String,
    kind: AgentKind,
    pool: Option<SessionPool>,
    work_time: Duration,
    fail_with: Option<String>,
    gauge: ConcurrencyGauge,
    submitted: Arc<Mutex<Vec<String>>>,
    chunks_handled: Arc<AtomicUsize>,
}

impl MockAgent {
    /// Session-based mock that takes a slot from the shared pool for the
    /// duration of every chunk, like the real browser agent does.
    pub fn session_based(id: &str, pool: SessionPool) -> Self {
        Self {
            id: id.to_string(),
            kind: AgentKind::SessionBased,
            pool: Some(pool),
            work_time: Duration::from_millis(20),
            fail_with: None,
            gauge: ConcurrencyGauge::new(),
            submitted: Arc::new(Mutex::new(Vec::new())),
            chunks_handled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// API-based mock with no session participation.
    pub fn api_based(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: AgentKind::ApiBased,
            pool: None,
            work_time: Duration::from_millis(20),
            fail_with: None,
            gauge: ConcurrencyGauge::new(),
            submitted: Arc::new(Mutex::new(Vec::new())),
            chunks_handled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every chunk submission raises this error.
    pub fn failing(mut self, error: &str) -> Self {
        self.fail_with = Some(error.to_string());
        self
    }

    pub fn with_work_time(mut self, work_time: Duration) -> Self {
        self.work_time = work_time;
        self
    }

    /// Share one gauge across several agents to observe their combined
    /// in-flight demand.
    pub fn with_gauge(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn gauge(&self) -> ConcurrencyGauge {
        self.gauge.clone()
    }

    /// Every query ever handed to `submit_chunk`, in arrival order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    /// Number of `submit_chunk` calls so far. For a session-based agent
    /// this equals the number of sessions opened.
    pub fn chunks_handled(&self) -> usize {
        self.chunks_handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn submit_chunk(
        &self,
        chunk: &[String],
        stream: &ResultStream,
    ) -> Result<Vec<QueryResult>> {
        let _permit = match &self.pool {
            Some(pool) => Some(pool.acquire().await?),
            None => None,
        };
        self.chunks_handled.fetch_add(1, Ordering::SeqCst);

        self.gauge.enter();
        tokio::time::sleep(self.work_time).await;
        self.submitted.lock().unwrap().extend_from_slice(chunk);

        let outcome = if let Some(error) = &self.fail_with {
            Err(AppError::Backend(error.clone()))
        } else {
            let mut results = Vec::with_capacity(chunk.len());
            for query in chunk {
                let result =
                    QueryResult::success(&self.id, query, format!("reply to {}", query), 0.01);
                stream.emit(result.clone()).await;
                results.push(result);
            }
            Ok(results)
        };

        self.gauge.exit();
        outcome
    }
}
