//! # Canvass - Multi-Agent Query Orchestrator
//!
//! Polls several conversational web agents (browser-session chatbots and an
//! LLM API) with a fixed list of natural-language queries, captures each
//! response with timing and quality metrics, and persists them for
//! comparison.
//!
//! ## Overview
//!
//! Canvass can be used in two ways:
//!
//! 1. **As a batch runner** - Run the `canvass` binary against a `canvass.toml`
//! 2. **As a library** - Drive the scheduler from your own Rust project
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use canvass::config::CanvassConfig;
//! use canvass::db::LocalStore;
//! use canvass::runner::Runner;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CanvassConfig::load("canvass.toml")?;
//!     let store = Arc::new(LocalStore::new(&config.database.path).await?);
//!     let outcome = Runner::new(config, store).execute(1).await?;
//!     println!("stored {} results", outcome.stored_results);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`agents`] - the `Agent` trait plus the browser-session and API adapters
//! - [`scheduler`] - chunk planning, session passes, staggered launch
//! - [`session`] - counting admission control for the shared session ceiling
//! - [`retry`] - error classification and bounded exponential backoff
//! - [`stream`] - as-they-complete result delivery to one consumer callback
//! - [`aggregator`] - per-agent and per-run report merging
//! - [`db`] - idempotent result persistence (one row per run/query/agent)
//! - [`runner`] - run lifecycle from config to terminal status

pub mod agents;
pub mod aggregator;
pub mod cli;
pub mod config;
pub mod db;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod stream;
pub mod types;

pub use agents::{Agent, ApiAgent, BrowserAgent};
pub use aggregator::{AgentReport, RunReport};
pub use config::CanvassConfig;
pub use db::{LocalStore, ResultStore};
pub use runner::{RunOutcome, Runner};
pub use scheduler::{plan_chunks, Scheduler, SchedulerConfig};
pub use session::{SessionPermit, SessionPool};
pub use stream::{ResultCallback, ResultStream};
pub use types::{AppError, QueryResult, QueryStatus, Result, RunStatus};
