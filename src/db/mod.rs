//! Result persistence.
//!
//! One stored row per (run, query, agent) triple, enforced by a unique key
//! and an upsert, so redelivered results overwrite instead of duplicating.
//! Query text is deduplicated through the `queries` table.

pub mod local;

pub use local::LocalStore;

use crate::types::{QueryResult, Result, RunStatus};
use async_trait::async_trait;
use std::collections::HashMap;

/// Persistence seam between the runner and a concrete database.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create a run record in `running` state and return its id. The stored
    /// name carries the planned repetition count.
    async fn create_run(&self, name: &str, planned_runs: u32) -> Result<String>;

    /// Move a run to a new lifecycle status. Terminal statuses also stamp
    /// `completed_at`.
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()>;

    /// Ensure a row per agent name, returning name to id.
    async fn register_agents(&self, names: &[String]) -> Result<HashMap<String, String>>;

    /// Insert or overwrite the stored result for this run/query/agent key.
    async fn upsert_result(&self, run_id: &str, result: &QueryResult) -> Result<()>;

    /// Stored response rows for one run.
    async fn response_count(&self, run_id: &str) -> Result<u64>;
}
