use std::collections::HashMap;
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;

use super::job::{CommandJob, JobError, JobId, JobLogEntry, JobStatus, LogLevel};

/// Called with every job that reaches a terminal state, before waiters wake.
pub type SettledHook = Arc<dyn Fn(&CommandJob) + Send + Sync>;

#[derive(Debug, Default)]
struct Jobs {
    ordered: Vec<CommandJob>,
    index: HashMap<JobId, usize>,
}

#[derive(Default)]
struct Shared {
    jobs: Mutex<Jobs>,
    settled: Notify,
    on_settled: Option<SettledHook>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("jobs", &self.jobs)
            .field("on_settled", &self.on_settled.is_some())
            .finish_non_exhaustive()
    }
}

/// In-memory job table. Jobs are never removed.
///
/// Every terminal transition goes through [`JobStore::finish`], which refuses
/// to touch a job that is already terminal; whichever of the body, the
/// timeout, or a cancel gets there first decides the outcome.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    shared: Arc<Shared>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that runs `hook` on each terminal transition. The hook runs
    /// outside the table lock and before [`JobStore::wait_for`] resolves.
    pub fn with_hook(hook: SettledHook) -> Self {
        Self {
            shared: Arc::new(Shared {
                on_settled: Some(hook),
                ..Shared::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.shared.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_job<R>(&self, id: JobId, f: impl FnOnce(&mut CommandJob) -> R) -> Option<R> {
        let mut jobs = self.lock();
        let pos = *jobs.index.get(&id)?;
        jobs.ordered.get_mut(pos).map(f)
    }

    pub fn insert(&self, job: CommandJob) {
        let mut jobs = self.lock();
        let pos = jobs.ordered.len();
        jobs.index.insert(job.id, pos);
        jobs.ordered.push(job);
    }

    pub fn get(&self, id: JobId) -> Option<CommandJob> {
        self.with_job(id, |job| job.clone())
    }

    /// Snapshot in creation order.
    pub fn list(&self) -> Vec<CommandJob> {
        self.lock().ordered.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `queued -> running`. False if the job is unknown or no longer queued.
    pub fn mark_running(&self, id: JobId) -> bool {
        self.with_job(id, |job| {
            if job.status != JobStatus::Queued {
                return false;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            let msg = format!("started {}", job.command_id);
            job.logs.push(JobLogEntry::new(LogLevel::Info, msg));
            true
        })
        .unwrap_or(false)
    }

    /// Appends to a live job's log. Writes to terminal jobs are dropped.
    pub fn append_log(&self, id: JobId, level: LogLevel, message: impl Into<String>) -> bool {
        self.with_job(id, |job| {
            if job.is_terminal() {
                return false;
            }
            job.logs.push(JobLogEntry::new(level, message));
            true
        })
        .unwrap_or(false)
    }

    /// Records the body's outcome. Returns the settled job, or `None` when the
    /// job was already terminal and the outcome was discarded.
    pub fn settle(&self, id: JobId, outcome: Result<Value, JobError>) -> Option<CommandJob> {
        match outcome {
            Ok(value) => self.finish(id, JobStatus::Success, LogLevel::Info, |job| {
                job.result = Some(value);
                "completed".to_string()
            }),
            Err(err) => self.finish(id, JobStatus::Failed, LogLevel::Error, |job| {
                let msg = format!("{}: {}", err.code, err.message);
                job.error = Some(err);
                msg
            }),
        }
    }

    /// Advisory: marks the job cancelled without interrupting its body.
    pub fn cancel(&self, id: JobId) -> Option<CommandJob> {
        self.finish(id, JobStatus::Cancelled, LogLevel::Warn, |_| {
            "cancelled".to_string()
        })
    }

    fn finish(
        &self,
        id: JobId,
        status: JobStatus,
        level: LogLevel,
        apply: impl FnOnce(&mut CommandJob) -> String,
    ) -> Option<CommandJob> {
        let settled = self
            .with_job(id, |job| {
                if job.is_terminal() {
                    return None;
                }
                let message = apply(job);
                job.status = status;
                job.finished_at = Some(Utc::now());
                job.logs.push(JobLogEntry::new(level, message));
                Some(job.clone())
            })
            .flatten();
        if let Some(job) = &settled {
            if let Some(hook) = &self.shared.on_settled {
                hook(job);
            }
            self.shared.settled.notify_waiters();
        }
        settled
    }

    /// Resolves once the job is terminal; `None` for unknown ids.
    pub async fn wait_for(&self, id: JobId) -> Option<CommandJob> {
        loop {
            let mut notified = pin!(self.shared.settled.notified());
            notified.as_mut().enable();
            let job = self.get(id)?;
            if job.is_terminal() {
                return Some(job);
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running(store: &JobStore) -> JobId {
        let job = CommandJob::queued("demo");
        let id = job.id;
        store.insert(job);
        assert!(store.mark_running(id));
        id
    }

    #[test]
    fn first_terminal_write_wins() {
        let store = JobStore::new();
        let id = running(&store);
        store
            .settle(id, Err(JobError::timeout("demo", 10)))
            .expect("first settle");
        let before = store.get(id).expect("job");

        assert!(store.settle(id, Ok(json!("late"))).is_none());
        assert!(store.cancel(id).is_none());
        assert!(!store.append_log(id, LogLevel::Info, "late log"));
        assert_eq!(store.get(id).expect("job"), before);
    }

    #[test]
    fn success_populates_result_only() {
        let store = JobStore::new();
        let id = running(&store);
        let job = store.settle(id, Ok(json!({"ok": true}))).expect("settle");
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert!(job.error.is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn cancel_from_queued_prevents_start() {
        let store = JobStore::new();
        let job = CommandJob::queued("demo");
        let id = job.id;
        store.insert(job);
        let cancelled = store.cancel(id).expect("cancel");
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.logs.last().map(|l| l.level), Some(LogLevel::Warn));
        assert!(!store.mark_running(id));
    }

    #[test]
    fn list_keeps_creation_order() {
        let store = JobStore::new();
        let ids: Vec<_> = (0..5).map(|_| running(&store)).collect();
        let listed: Vec<_> = store.list().into_iter().map(|j| j.id).collect();
        assert_eq!(listed, ids);
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn wait_for_wakes_on_settle() {
        let store = JobStore::new();
        let id = running(&store);
        let waiter = tokio::spawn({
            let store = store.clone();
            async move { store.wait_for(id).await }
        });
        tokio::task::yield_now().await;
        store.settle(id, Ok(json!(1)));
        let job = waiter.await.expect("join").expect("known job");
        assert_eq!(job.status, JobStatus::Success);
        assert!(store.wait_for(JobId::generate()).await.is_none());
    }

    #[tokio::test]
    async fn hook_runs_before_waiters_resume() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let store = JobStore::with_hook(Arc::new(move |job: &CommandJob| {
            sink.lock().expect("hook lock").push(job.status);
        }));
        let id = running(&store);
        let waiter = tokio::spawn({
            let store = store.clone();
            async move { store.wait_for(id).await }
        });
        tokio::task::yield_now().await;
        store.settle(id, Err(JobError::runtime("nope")));
        waiter.await.expect("join").expect("known job");
        assert_eq!(*seen.lock().expect("hook lock"), vec![JobStatus::Failed]);
        assert!(store.cancel(id).is_none());
        assert_eq!(seen.lock().expect("hook lock").len(), 1);
    }
}
