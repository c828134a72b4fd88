use crate::registry::SubscriptionRegistry;
use crate::session::FossilKey;
use events::{FossilStatusPayload, WsMessage};
use fossil_client::{FossilApi, FossilError, JobStatus};
use models::FossilStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job for this key already exists with duration {existing}, not {requested}")]
    DurationMismatch { existing: u64, requested: u64 },

    #[error("oracle request failed: {0}")]
    Oracle(#[from] FossilError),

    #[error("oracle reported a job failure: {0}")]
    JobFailed(String),
}

/// One tracked pricing job. Records are mutated only by their owning poller
/// (and created by `ensure_job`); they live for the rest of the process, so
/// key cardinality bounds the memory held.
#[derive(Debug, Clone)]
struct JobRecord {
    duration: u64,
    status: FossilStatus,
    poller_active: bool,
}

/// Tracks outstanding Fossil pricing jobs, deduplicating concurrent
/// requests for the same key and running at most one polling task per job
/// until it completes.
///
/// The map's async mutex is held across the oracle round trip inside
/// `ensure_job`; that serialization is exactly what guarantees at most one
/// outstanding external request per key.
pub struct JobTracker {
    jobs: Mutex<HashMap<FossilKey, JobRecord>>,
    oracle: Arc<dyn FossilApi>,
    registry: Arc<SubscriptionRegistry>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl JobTracker {
    pub fn new(
        oracle: Arc<dyn FossilApi>,
        registry: Arc<SubscriptionRegistry>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            oracle,
            registry,
            poll_interval,
            shutdown,
        }
    }

    /// Looks up or creates the job for `key`, returning its current status.
    ///
    /// - An existing record with a different duration is a hard error; the
    ///   record is left untouched.
    /// - A new key first asks the oracle whether the job already exists;
    ///   only a "not found" answer triggers a fresh job request.
    /// - At most one poller runs per key; later subscribers attach to the
    ///   existing record.
    pub async fn ensure_job(
        self: &Arc<Self>,
        key: FossilKey,
        duration: u64,
        client_address: &str,
    ) -> Result<FossilStatus, JobError> {
        let mut jobs = self.jobs.lock().await;

        if let Some(record) = jobs.get_mut(&key) {
            if record.duration != duration {
                return Err(JobError::DurationMismatch {
                    existing: record.duration,
                    requested: duration,
                });
            }
            let status = record.status;
            if status != FossilStatus::Completed && !record.poller_active {
                record.poller_active = true;
                self.spawn_poller(key, duration);
            }
            return Ok(status);
        }

        let status = match self.oracle.get_job_status(key.target_time, duration).await? {
            JobStatus::Known(status) => status,
            JobStatus::Failed(reason) => return Err(JobError::JobFailed(reason)),
            JobStatus::NotFound => {
                tracing::info!(vault = %key.vault_address, target_time = key.target_time,
                    "requesting new fossil job");
                self.oracle
                    .request_job(key.target_time, duration, client_address, &key.vault_address)
                    .await?
            }
        };

        let needs_poller = status != FossilStatus::Completed;
        jobs.insert(
            key.clone(),
            JobRecord {
                duration,
                status,
                poller_active: needs_poller,
            },
        );
        if needs_poller {
            self.spawn_poller(key, duration);
        }
        Ok(status)
    }

    /// Current status of a tracked job, if any.
    pub async fn status(&self, key: &FossilKey) -> Option<FossilStatus> {
        self.jobs.lock().await.get(key).map(|r| r.status)
    }

    fn spawn_poller(self: &Arc<Self>, key: FossilKey, duration: u64) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.poll_job(key, duration).await;
        });
    }

    /// The polling task for one job key. Terminates on completion, terminal
    /// oracle error, or shutdown; transient errors retry on the next tick.
    async fn poll_job(self: Arc<Self>, key: FossilKey, duration: u64) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        // The first tick fires immediately; the status was just fetched by
        // ensure_job, so skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.oracle.get_job_status(key.target_time, duration).await {
                Err(e) => {
                    tracing::warn!(vault = %key.vault_address, target_time = key.target_time,
                        error = %e, "fossil status poll failed, will retry");
                }
                Ok(JobStatus::Known(status)) => {
                    if self.advance(&key, status).await {
                        self.publish(&key, FossilStatusPayload {
                            status: Some(status),
                            error: None,
                        });
                    }
                    if status == FossilStatus::Completed {
                        break;
                    }
                }
                Ok(JobStatus::NotFound) => {
                    self.publish(&key, FossilStatusPayload {
                        status: None,
                        error: Some("fossil job no longer known to the oracle".into()),
                    });
                    break;
                }
                Ok(JobStatus::Failed(reason)) => {
                    tracing::error!(vault = %key.vault_address, target_time = key.target_time,
                        %reason, "fossil job failed");
                    self.publish(&key, FossilStatusPayload {
                        status: None,
                        error: Some(reason),
                    });
                    break;
                }
            }
        }

        let mut jobs = self.jobs.lock().await;
        if let Some(record) = jobs.get_mut(&key) {
            record.poller_active = false;
        }
    }

    /// Applies a monotonic status update. Returns whether the record moved
    /// forward; regressions reported by the oracle are ignored.
    async fn advance(&self, key: &FossilKey, status: FossilStatus) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(key) {
            Some(record) if status > record.status => {
                record.status = status;
                true
            }
            _ => false,
        }
    }

    fn publish(&self, key: &FossilKey, payload: FossilStatusPayload) {
        match WsMessage::FossilStatus(payload).to_json() {
            Ok(json) => self.registry.publish_fossil(key, &json),
            Err(e) => tracing::error!(error = %e, "failed to serialize fossil status"),
        }
    }
}
