//! Run lifecycle.
//!
//! Builds the agent set from configuration, creates the run record, wires
//! the result stream into the store, executes the scheduler the requested
//! number of times, and settles the run's terminal status. An agent that
//! cannot even be constructed (missing credentials) is reported as a failed
//! agent without touching its siblings.

use crate::agents::{Agent, ApiAgent, BrowserAgent};
use crate::aggregator::{AgentReport, RunReport};
use crate::config::CanvassConfig;
use crate::db::ResultStore;
use crate::scheduler::Scheduler;
use crate::stream::{ResultStream, ResultCallback};
use crate::types::{AppError, QueryResult, Result, RunStatus};
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

/// Everything the CLI needs after a run finishes.
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// One report per completed repetition. On a terminated run these are
    /// the repetitions that finished before the interrupt.
    pub reports: Vec<RunReport>,
    pub stored_results: u64,
}

pub struct Runner {
    config: CanvassConfig,
    store: Arc<dyn ResultStore>,
}

impl Runner {
    pub fn new(config: CanvassConfig, store: Arc<dyn ResultStore>) -> Self {
        Self { config, store }
    }

    /// Execute the configured query list `runs` times against every enabled
    /// agent, streaming each result into the store as it completes.
    ///
    /// Interruption (ctrl-c) marks the run `terminated`.
    pub async fn execute(&self, runs: u32) -> Result<RunOutcome> {
        self.execute_until(runs, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Like [`Runner::execute`], with an explicit shutdown trigger in place
    /// of ctrl-c.
    ///
    /// When `shutdown` resolves first the run is marked `terminated` and the
    /// outcome still carries every repetition that completed before the
    /// interrupt, plus the count of results already persisted. An error
    /// escaping the run's bookkeeping marks it `failed` and propagates as
    /// `Err` so the binary exits nonzero.
    pub async fn execute_until<F>(&self, runs: u32, shutdown: F) -> Result<RunOutcome>
    where
        F: std::future::Future<Output = ()>,
    {
        let scheduler = Scheduler::new(
            self.config.scheduler.clone(),
            self.config.retry.clone(),
        );
        let (agents, construction_failures) = self.build_agents(&scheduler);
        if agents.is_empty() && construction_failures.is_empty() {
            return Err(AppError::Config("no agents enabled".to_string()));
        }

        let run_id = self
            .store
            .create_run(&self.config.run.name, runs)
            .await?;
        let names: Vec<String> = agents
            .iter()
            .map(|a| a.id().to_string())
            .chain(construction_failures.iter().map(|(id, _)| id.clone()))
            .collect();
        self.store.register_agents(&names).await?;

        let stream = ResultStream::new(self.persisting_callback(run_id.clone()));
        info!(
            run_id = %run_id,
            agents = agents.len(),
            queries = self.config.run.queries.len(),
            runs,
            "run started"
        );

        let finished = Mutex::new(Vec::with_capacity(runs as usize));
        let interrupted = tokio::select! {
            _ = self.execute_repetitions(&scheduler, &agents, &construction_failures, &stream, runs, &finished) => false,
            _ = shutdown => true,
        };
        let reports = finished
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        if interrupted {
            // Dropping the orchestration future released every session
            // permit; only the run row is left to settle.
            warn!(run_id = %run_id, completed_repetitions = reports.len(), "run interrupted, terminating");
            self.mark(&run_id, RunStatus::Terminated).await;
            let stored_results = match self.store.response_count(&run_id).await {
                Ok(count) => count,
                Err(err) => {
                    error!(run_id = %run_id, error = %err, "failed to count stored results");
                    0
                }
            };
            return Ok(RunOutcome {
                run_id,
                status: RunStatus::Terminated,
                reports,
                stored_results,
            });
        }

        match self.settle_completed(&run_id).await {
            Ok(stored_results) => {
                info!(run_id = %run_id, stored_results, "run completed");
                Ok(RunOutcome {
                    run_id,
                    status: RunStatus::Completed,
                    reports,
                    stored_results,
                })
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "run bookkeeping failed");
                self.mark(&run_id, RunStatus::Failed).await;
                Err(err)
            }
        }
    }

    async fn settle_completed(&self, run_id: &str) -> Result<u64> {
        self.store
            .update_run_status(run_id, RunStatus::Completed)
            .await?;
        self.store.response_count(run_id).await
    }

    /// Best-effort terminal status write.
    async fn mark(&self, run_id: &str, status: RunStatus) {
        if let Err(db_err) = self.store.update_run_status(run_id, status).await {
            error!(run_id = %run_id, error = %db_err, "failed to settle run status");
        }
    }

    /// Each repetition's report lands in `finished` as soon as it is
    /// complete, so an interrupt that drops this future loses only the
    /// repetition in flight.
    async fn execute_repetitions(
        &self,
        scheduler: &Scheduler,
        agents: &[Arc<dyn Agent>],
        construction_failures: &[(String, String)],
        stream: &ResultStream,
        runs: u32,
        finished: &Mutex<Vec<RunReport>>,
    ) {
        for iteration in 1..=runs {
            info!(iteration, total = runs, "repetition started");
            let mut report = scheduler
                .run(agents, &self.config.run.queries, stream)
                .await;
            for (id, cause) in construction_failures {
                report
                    .agents
                    .push(AgentReport::failed(id.clone(), cause.clone(), 0.0));
            }
            finished
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(report);
        }
    }

    /// Construct every enabled agent; failures become (id, cause) pairs
    /// instead of aborting the run.
    fn build_agents(&self, scheduler: &Scheduler) -> (Vec<Arc<dyn Agent>>, Vec<(String, String)>) {
        let mut agents: Vec<Arc<dyn Agent>> = Vec::new();
        let mut failures = Vec::new();
        let (browser_configs, api_configs) = self.config.enabled_agents();

        for (id, browser_config) in browser_configs {
            match BrowserAgent::from_config(id, browser_config, scheduler.pool()) {
                Ok(agent) => agents.push(Arc::new(agent)),
                Err(err) => {
                    warn!(agent = id, error = %err, "agent construction failed");
                    failures.push((id.to_string(), err.to_string()));
                }
            }
        }
        for (id, api_config) in api_configs {
            match ApiAgent::from_config(id, api_config, self.config.scheduler.api_concurrency) {
                Ok(agent) => agents.push(Arc::new(agent)),
                Err(err) => {
                    warn!(agent = id, error = %err, "agent construction failed");
                    failures.push((id.to_string(), err.to_string()));
                }
            }
        }
        (agents, failures)
    }

    /// Stream consumer that upserts every result under this run's id.
    /// Store errors are logged by the stream and never abort a worker.
    fn persisting_callback(&self, run_id: String) -> ResultCallback {
        let store = Arc::clone(&self.store);
        Arc::new(move |result: QueryResult| {
            let store = Arc::clone(&store);
            let run_id = run_id.clone();
            async move { store.upsert_result(&run_id, &result).await }.boxed()
        })
    }
}
