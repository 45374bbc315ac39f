//! Fire-and-forget run dispatcher
//!
//! `submit` queues a run and returns a ticket at once, or refuses it when
//! `capacity` runs are already pending. A worker task drains the queue and
//! spawns every run as its own task. Runs of the same kind
//! wait for each other; different kinds may overlap. Completion is visible in
//! the logs, in metrics and to `subscribe`rs.

use crate::summary::{IngestionSummary, RecommendationSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scholarlink_common::errors::{AppError, Result};
use scholarlink_common::metrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunKind {
    Ingestion,
    Recommendations,
    RefreshInterest { user_id: i32 },
}

impl RunKind {
    pub fn label(&self) -> &'static str {
        match self {
            RunKind::Ingestion => "ingestion",
            RunKind::Recommendations => "recommendations",
            RunKind::RefreshInterest { .. } => "refresh_interest",
        }
    }

    /// Runs sharing a key never execute at the same time
    fn lock_key(&self) -> String {
        match self {
            RunKind::RefreshInterest { user_id } => format!("refresh_interest:{}", user_id),
            other => other.label().to_string(),
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::RefreshInterest { user_id } => write!(f, "refresh_interest(user {})", user_id),
            other => f.write_str(other.label()),
        }
    }
}

/// Acknowledgement that a run was accepted, not that it finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTicket {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub kind: RunKind,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Ingested(IngestionSummary),
    Recommended(RecommendationSummary),
    InterestRefreshed { user_id: i32, refreshed: bool },
    Failed { error: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Failed { .. } => "failed",
            _ => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub outcome: RunOutcome,
}

/// Executes one run to completion
#[async_trait]
pub trait RunHandler: Send + Sync + 'static {
    async fn handle(&self, kind: RunKind) -> RunOutcome;
}

/// Accepted run waiting for the worker, with the slot it occupies
struct QueuedRun {
    ticket: RunTicket,
    slot: OwnedSemaphorePermit,
}

pub struct RunDispatcher {
    sender: mpsc::Sender<QueuedRun>,
    slots: Arc<Semaphore>,
    reports: broadcast::Sender<RunReport>,
    worker: JoinHandle<()>,
}

impl RunDispatcher {
    /// Start the worker. `capacity` bounds the runs accepted but not yet
    /// finished, whether queued, waiting for their kind's lock or running.
    pub fn start(handler: Arc<dyn RunHandler>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let (reports, _) = broadcast::channel(64);

        let worker = tokio::spawn(worker_loop(receiver, handler, reports.clone()));

        Self {
            sender,
            slots: Arc::new(Semaphore::new(capacity)),
            reports,
            worker,
        }
    }

    pub fn submit(&self, kind: RunKind) -> Result<RunTicket> {
        let slot = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => AppError::ServiceUnavailable {
                    message: format!("too many runs pending, {} not accepted", kind),
                },
                TryAcquireError::Closed => AppError::ServiceUnavailable {
                    message: "run dispatcher has stopped".to_string(),
                },
            })?;

        let ticket = RunTicket {
            run_id: Uuid::new_v4(),
            kind,
            submitted_at: Utc::now(),
        };

        self.sender
            .try_send(QueuedRun {
                ticket: ticket.clone(),
                slot,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AppError::ServiceUnavailable {
                    message: format!("run queue is full, {} not accepted", kind),
                },
                mpsc::error::TrySendError::Closed(_) => AppError::ServiceUnavailable {
                    message: "run dispatcher has stopped".to_string(),
                },
            })?;

        info!(run_id = %ticket.run_id, kind = %kind, "Run accepted");
        Ok(ticket)
    }

    /// Reports for runs finishing after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RunReport> {
        self.reports.subscribe()
    }

    /// Stop accepting runs and wait for queued and running ones to finish
    pub async fn shutdown(self) {
        self.slots.close();
        drop(self.sender);
        if let Err(e) = self.worker.await {
            error!(error = %e, "Run worker ended abnormally");
        }
    }
}

/// Per-key locks serializing runs of the same kind. An entry lives only while
/// some run holds a handle to it.
#[derive(Default)]
struct RunLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl RunLocks {
    fn handle(&mut self, key: String) -> Arc<Mutex<()>> {
        self.prune();
        self.locks.entry(key).or_default().clone()
    }

    /// Forget locks no run refers to any more
    fn prune(&mut self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

async fn worker_loop(
    mut receiver: mpsc::Receiver<QueuedRun>,
    handler: Arc<dyn RunHandler>,
    reports: broadcast::Sender<RunReport>,
) {
    let mut locks = RunLocks::default();
    let mut running = JoinSet::new();

    while let Some(QueuedRun { ticket, slot }) = receiver.recv().await {
        let lock = locks.handle(ticket.kind.lock_key());
        let handler = handler.clone();
        let reports = reports.clone();
        let span = info_span!("run", run_id = %ticket.run_id, kind = %ticket.kind);

        running.spawn(
            async move {
                let guard = lock.lock().await;
                let started = Instant::now();
                info!("Run started");

                let outcome = handler.handle(ticket.kind).await;
                metrics::record_run(ticket.kind.label(), outcome.label());

                match &outcome {
                    RunOutcome::Failed { error } => {
                        error!(error = %error, elapsed_ms = started.elapsed().as_millis() as u64, "Run failed")
                    }
                    _ => info!(elapsed_ms = started.elapsed().as_millis() as u64, "Run finished"),
                }

                drop(guard);
                drop(lock);
                drop(slot);

                // No subscribers is not an error
                let _ = reports.send(RunReport {
                    run_id: ticket.run_id,
                    kind: ticket.kind,
                    outcome,
                });
            }
            .instrument(span),
        );

        while let Some(finished) = running.try_join_next() {
            if let Err(e) = finished {
                warn!(error = %e, "Run task panicked");
            }
        }
        debug!(locks = locks.len(), "Run lock table");
    }

    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            warn!(error = %e, "Run task panicked");
        }
    }

    info!("Run worker stopped");
}
