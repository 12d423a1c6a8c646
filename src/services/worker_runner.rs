//! Worker runner: polls the thumbnail queue and executes jobs.

use crate::{
    config::WorkerConfig,
    models::job::QueuedJob,
    services::thumbnail_worker::{JobOutcome, ThumbnailWorker},
    stores::{SqliteJobQueue, StoreResult},
};
use std::sync::Arc;
use tokio::{
    sync::{Semaphore, watch},
    time,
};
use tracing::{debug, error, info, trace, warn};

/// What happened to a job after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Retrying,
    DeadLettered,
}

pub struct WorkerRunner {
    queue: SqliteJobQueue,
    worker: ThumbnailWorker,
    config: WorkerConfig,
}

impl WorkerRunner {
    pub fn new(queue: SqliteJobQueue, worker: ThumbnailWorker, config: WorkerConfig) -> Self {
        Self {
            queue,
            worker,
            config,
        }
    }

    /// Run until `cancel` flips to `true`, then wait for in-flight jobs.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        info!(
            "thumbnail worker started with concurrency={}, poll_interval={:?}",
            self.config.concurrency, self.config.poll_interval
        );

        match self.queue.requeue_stalled().await {
            Ok(0) => {}
            Ok(n) => warn!("requeued {} jobs left running by a previous process", n),
            Err(err) => error!("failed to requeue stalled jobs: {}", err),
        }

        let permits = u32::try_from(self.config.concurrency.clamp(1, Semaphore::MAX_PERMITS))
            .unwrap_or(u32::MAX);
        let semaphore = Arc::new(Semaphore::new(permits as usize));

        loop {
            if *cancel.borrow() {
                break;
            }

            let claimed = self.poll_and_spawn(&semaphore).await;
            if claimed {
                continue;
            }

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("thumbnail worker waiting for in-flight jobs to complete...");
        let _ = semaphore.acquire_many(permits).await;
        info!("thumbnail worker shut down");
    }

    /// Claim one job if a slot is free and run it in the background.
    /// Returns whether a job was claimed.
    async fn poll_and_spawn(&self, semaphore: &Arc<Semaphore>) -> bool {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        match self.queue.claim_next().await {
            Ok(Some(job)) => {
                let queue = self.queue.clone();
                let worker = self.worker.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = execute(&queue, &worker, &job).await {
                        error!("failed to record outcome of job {}: {}", job.id, err);
                    }
                });
                true
            }
            Ok(None) => {
                trace!("no thumbnail jobs available");
                false
            }
            Err(err) => {
                error!("failed to claim thumbnail job: {}", err);
                false
            }
        }
    }
}

/// Process a claimed job and acknowledge, retry or dead-letter it.
pub async fn execute(
    queue: &SqliteJobQueue,
    worker: &ThumbnailWorker,
    job: &QueuedJob,
) -> StoreResult<Disposition> {
    info!(
        "processing thumbnail job {} ({}) queued at {} (attempt {}/{})",
        job.id, job.status, job.created_at, job.attempts, job.max_attempts
    );
    if let Some(previous) = &job.last_error {
        debug!("job {} previous attempt failed: {}", job.id, previous);
    }

    match worker.process_payload(&job.payload).await {
        Ok(outcome) => {
            match outcome {
                JobOutcome::Derived(paths) => {
                    info!("job {} derived {} thumbnails", job.id, paths.len())
                }
                JobOutcome::Skipped => info!("job {} skipped: not an image", job.id),
            }
            queue.complete(job.id).await?;
            Ok(Disposition::Completed)
        }
        Err(err) if err.is_permanent() => {
            error!("job {} failed permanently: {}", job.id, err);
            queue.fail(job.id, &err.to_string()).await?;
            Ok(Disposition::DeadLettered)
        }
        Err(err) if job.attempts < job.max_attempts => {
            warn!("job {} failed, will retry: {}", job.id, err);
            queue.retry(job.id, &err.to_string()).await?;
            Ok(Disposition::Retrying)
        }
        Err(err) => {
            error!(
                "job {} failed after {} attempts: {}",
                job.id, job.attempts, err
            );
            queue.fail(job.id, &err.to_string()).await?;
            Ok(Disposition::DeadLettered)
        }
    }
}
