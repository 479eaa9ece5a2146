/// Background anchoring queue.
///
/// Report intake enqueues an [`AnchorJob`] and returns immediately; a
/// single worker task drains the queue and anchors one report at a time.
/// Each job runs in its own task so a panic is logged and the worker keeps
/// going. Jobs lost to a full queue or a process exit leave the report
/// unanchored; `IntegrityService::backfill` picks those up.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{IntegrityError, Result};
use crate::service::IntegrityService;
use crate::state::models::Actor;

/// Default number of jobs the queue holds before rejecting new ones.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct AnchorJob {
    pub report_id: String,
    pub actor: Actor,
}

/// Sending half of the anchoring queue.
#[derive(Clone)]
pub struct AnchorQueue {
    tx: mpsc::Sender<AnchorJob>,
}

impl AnchorQueue {
    /// Start the worker. The worker stops once every queue handle is dropped.
    pub fn spawn(service: Arc<IntegrityService>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(service, rx));
        (Self { tx }, handle)
    }

    /// Queue a report for anchoring without waiting.
    pub fn enqueue(&self, job: AnchorJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| {
            let reason = match &e {
                mpsc::error::TrySendError::Full(_) => "anchor queue full",
                mpsc::error::TrySendError::Closed(_) => "anchor worker stopped",
            };
            let job = e.into_inner();
            warn!(report_id = %job.report_id, reason, "Anchor job rejected");
            IntegrityError::AnchorServiceUnavailable(reason.to_string())
        })
    }
}

async fn run_worker(service: Arc<IntegrityService>, mut rx: mpsc::Receiver<AnchorJob>) {
    info!("Anchor worker started");

    while let Some(job) = rx.recv().await {
        let service = service.clone();
        let report_id = job.report_id.clone();
        let task =
            tokio::spawn(async move { service.anchor_report(&job.actor, &job.report_id).await });

        match task.await {
            Ok(Ok(outcome)) => info!(
                report_id = %report_id,
                tx_id = ?outcome.transaction_id,
                already_anchored = outcome.already_anchored,
                "Anchor job complete"
            ),
            Ok(Err(e)) => error!(report_id = %report_id, error = %e, "Anchor job failed"),
            Err(e) => error!(report_id = %report_id, error = %e, "Anchor job panicked"),
        }
    }

    info!("Anchor worker stopped");
}
