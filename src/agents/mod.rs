//! Agent adapters.
//!
//! Three interaction styles hide behind one contract: two session-based
//! browser agents driven through a remote session service, and one
//! API-based agent speaking a chat-completions wire format. The scheduler
//! only ever sees [`Agent`].

pub mod api;
pub mod browser;

pub use api::ApiAgent;
pub use browser::{BrowserAgent, HttpSessionTransport, SessionHandle, SessionTransport, SiteProfile};

use crate::stream::ResultStream;
use crate::types::{AgentKind, QueryResult, Result};
use async_trait::async_trait;

/// Uniform contract every backend adapter exposes to the scheduler.
///
/// `submit_chunk` is one unit of work: it processes its queries, emits each
/// terminal result to the stream as soon as it is produced, and returns the
/// full set for aggregation. Per-query problems (timeout, extraction
/// failure) become degraded results; chunk-level problems (session
/// creation, rate limiting) must raise so the retry policy can classify
/// them. An adapter never silently drops a query.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier, also used as the persistence key.
    fn id(&self) -> &str;

    /// Scheduling capability.
    fn kind(&self) -> AgentKind;

    /// Process one chunk of queries against the backend.
    async fn submit_chunk(&self, chunk: &[String], stream: &ResultStream)
        -> Result<Vec<QueryResult>>;
}
