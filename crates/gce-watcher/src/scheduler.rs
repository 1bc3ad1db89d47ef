//! Debounced, cancellable delayed jobs keyed by container.
//!
//! At most one job is pending per [`JobId`]. Adding under a key that
//! already has a pending job replaces it, so a container flapping between
//! `start` and `die` inside the delay window only triggers the last action.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error};

use gce_common::Result;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

struct Entry {
    // Generation token; the timer only fires if the table still holds it.
    token: u64,
    job: Job,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    jobs: Mutex<HashMap<JobId, Entry>>,
    next_token: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `action` to run after `delay`, replacing any job pending
    /// under `id`.
    pub async fn add<F, Fut>(&self, id: JobId, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let job: Job = Box::new(move || Box::pin(action()));
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);

        let mut jobs = self.inner.jobs.lock().await;
        if let Some(previous) = jobs.remove(&id) {
            previous.timer.abort();
            debug!(job = %id, "pending job superseded");
        }

        let timer = tokio::spawn(self.clone().fire(id.clone(), token, delay));
        jobs.insert(id, Entry { token, job, timer });
    }

    /// Cancels the job pending under `id`. Returns whether one was pending.
    pub async fn delete(&self, id: &JobId) -> bool {
        match self.inner.jobs.lock().await.remove(id) {
            Some(entry) => {
                entry.timer.abort();
                debug!(job = %id, "pending job cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn pending(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    async fn fire(self, id: JobId, token: u64, delay: Duration) {
        sleep(delay).await;

        let job = {
            let mut jobs = self.inner.jobs.lock().await;
            match jobs.get(&id) {
                Some(entry) if entry.token == token => jobs.remove(&id).map(|e| e.job),
                _ => None,
            }
        };

        let Some(job) = job else {
            return;
        };

        debug!(job = %id, "running job");
        if let Err(e) = job().await {
            error!(job = %id, error = %e, "job failed");
        }
    }
}
