//! Single-worker scheduling of sync runs.
//!
//! At most one run is in flight. Triggers arriving meanwhile collapse into
//! a single follow-up run. Retryable failures are retried with exponential
//! backoff before the run is reported as failed.

use crate::backoff::RetryPolicy;
use crate::error::{Result, SyncError};
use crate::event::SyncTrigger;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The work a scheduler runs.
#[async_trait]
pub trait SyncJob: Send + Sync + 'static {
    async fn run(&self, trigger: SyncTrigger) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerStatus {
    Idle,
    /// A run was requested and has not started yet.
    Scheduled,
    Running,
    /// The last run failed after exhausting its retries.
    Failed { error: String },
}

impl SchedulerStatus {
    /// Nothing in flight and nothing requested.
    pub fn is_settled(&self) -> bool {
        matches!(self, SchedulerStatus::Idle | SchedulerStatus::Failed { .. })
    }
}

#[derive(Default)]
struct Requests {
    next: Option<SyncTrigger>,
    stopping: bool,
}

struct Shared {
    requests: Mutex<Requests>,
    notify: Notify,
    status: watch::Sender<SchedulerStatus>,
}

pub struct SyncScheduler {
    shared: Arc<Shared>,
    status: watch::Receiver<SchedulerStatus>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(job: Arc<dyn SyncJob>, policy: RetryPolicy) -> Self {
        let (status_tx, status) = watch::channel(SchedulerStatus::Idle);
        let shared = Arc::new(Shared {
            requests: Mutex::new(Requests::default()),
            notify: Notify::new(),
            status: status_tx,
        });
        let worker = tokio::spawn(run_worker(shared.clone(), job, policy));
        Self {
            shared,
            status,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Request a run. Returns false when it was folded into one already
    /// requested.
    pub fn trigger(&self, trigger: SyncTrigger) -> Result<bool> {
        let mut requests = self.shared.requests.lock();
        if requests.stopping {
            return Err(SyncError::SchedulerStopped);
        }
        let coalesced = requests.next.is_some();
        if !coalesced {
            requests.next = Some(trigger);
        }
        self.shared.status.send_modify(|status| {
            if *status != SchedulerStatus::Running {
                *status = SchedulerStatus::Scheduled;
            }
        });
        drop(requests);

        debug!(?trigger, coalesced, "sync run requested");
        self.shared.notify.notify_one();
        Ok(!coalesced)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Resolve once nothing is running or requested.
    pub async fn wait_idle(&self) -> SchedulerStatus {
        wait_settled(self.status.clone()).await
    }

    /// Let the in-flight run finish, drop any requested one and stop.
    pub async fn shutdown(&self) {
        {
            let mut requests = self.shared.requests.lock();
            requests.stopping = true;
            requests.next = None;
        }
        self.shared.notify.notify_one();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "sync worker ended abnormally");
            }
        }
    }
}

pub(crate) async fn wait_settled(mut status: watch::Receiver<SchedulerStatus>) -> SchedulerStatus {
    let settled = status.wait_for(|s| s.is_settled()).await.map(|s| s.clone());
    match settled {
        Ok(status) => status,
        // worker gone; report the last state it left
        Err(_) => status.borrow().clone(),
    }
}

async fn run_worker(shared: Arc<Shared>, job: Arc<dyn SyncJob>, policy: RetryPolicy) {
    loop {
        let notified = shared.notify.notified();
        let next = {
            let mut requests = shared.requests.lock();
            if requests.stopping {
                break;
            }
            let next = requests.next.take();
            if next.is_some() {
                shared.status.send_replace(SchedulerStatus::Running);
            }
            next
        };

        let Some(trigger) = next else {
            notified.await;
            continue;
        };

        let result = run_with_retry(job.as_ref(), trigger, &policy).await;

        {
            let requests = shared.requests.lock();
            let status = if requests.next.is_some() {
                SchedulerStatus::Scheduled
            } else {
                match result {
                    Ok(()) => SchedulerStatus::Idle,
                    Err(e) => SchedulerStatus::Failed {
                        error: e.to_string(),
                    },
                }
            };
            shared.status.send_replace(status);
        }
    }

    shared.status.send_modify(|status| {
        if !status.is_settled() {
            *status = SchedulerStatus::Idle;
        }
    });
    debug!("sync worker stopped");
}

async fn run_with_retry(job: &dyn SyncJob, trigger: SyncTrigger, policy: &RetryPolicy) -> Result<()> {
    let mut retry = 0;
    loop {
        match job.run(trigger).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                let delay = policy.backoff(retry);
                warn!(error = %e, retry, ?delay, "sync run failed, retrying");
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
