//! Result streaming.
//!
//! Every terminal [`QueryResult`] is handed to one registered consumer
//! callback as soon as it is produced, long before the run completes. The
//! callback is invoked concurrently from many workers; failures inside it
//! are logged and isolated, never propagated back into scheduling.
//!
//! The blocking API lane cannot call the async consumer directly, so it
//! posts results onto an mpsc channel through a [`BlockingEmitter`]; a
//! forwarder task on the runtime drains the channel and calls `emit`.

use crate::types::{QueryResult, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Consumer callback: may suspend, may fail; failures stay inside the stream.
pub type ResultCallback = Arc<dyn Fn(QueryResult) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Fan-in point for completed results.
#[derive(Clone)]
pub struct ResultStream {
    callback: Option<ResultCallback>,
    delivered: Arc<AtomicU64>,
}

impl ResultStream {
    /// Stream with a registered consumer.
    pub fn new(callback: ResultCallback) -> Self {
        Self {
            callback: Some(callback),
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stream with no consumer; results are only counted.
    pub fn disabled() -> Self {
        Self {
            callback: None,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deliver one terminal result to the consumer.
    ///
    /// Callback errors and panics are logged and swallowed so that a
    /// misbehaving consumer cannot abort the worker that produced the
    /// result.
    pub async fn emit(&self, result: QueryResult) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let Some(callback) = &self.callback else {
            return;
        };
        let agent = result.agent.clone();
        let query = result.query.clone();
        match std::panic::AssertUnwindSafe(callback(result))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                debug!(agent = %agent, query = %query, "result delivered to consumer");
            }
            Ok(Err(err)) => {
                warn!(agent = %agent, query = %query, error = %err, "result consumer failed");
            }
            Err(_) => {
                warn!(agent = %agent, query = %query, "result consumer panicked");
            }
        }
    }

    /// Total results emitted so far (terminal results only).
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Open a bridge for workers running outside the async runtime.
    ///
    /// Returns the blocking-side emitter and the forwarder task handle. The
    /// forwarder finishes once every emitter clone has been dropped and the
    /// channel has drained, so await the handle before merging reports.
    pub fn bridge(&self, capacity: usize) -> (BlockingEmitter, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<QueryResult>(capacity);
        let stream = self.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                stream.emit(result).await;
            }
        });
        (BlockingEmitter { tx }, forwarder)
    }
}

/// Handle used by off-runtime (blocking) workers to post results.
#[derive(Clone)]
pub struct BlockingEmitter {
    tx: mpsc::Sender<QueryResult>,
}

impl BlockingEmitter {
    /// Post one result from a blocking context.
    ///
    /// Dropped silently if the forwarder is gone, which only happens while
    /// the run is being torn down.
    pub fn post(&self, result: QueryResult) {
        if self.tx.blocking_send(result).is_err() {
            warn!("result bridge closed, dropping result");
        }
    }
}
