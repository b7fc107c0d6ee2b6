use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::context::CommandContext;
use super::job::{CommandJob, JobError, JobId, JobStatus};
use super::spec::{CommandInfo, CommandSpec};
use super::store::{JobStore, SettledHook};
use crate::error::{CommanderError, CommanderResult};

/// Command table plus the runner that executes submitted jobs.
///
/// Registration takes `&mut self` and happens at start-up; everything after
/// that works through `&self`.
pub struct CommandRegistry<S> {
    specs: HashMap<String, Arc<CommandSpec<S>>>,
    jobs: JobStore,
    services: Arc<S>,
}

impl<S: Send + Sync + 'static> CommandRegistry<S> {
    pub fn new(services: Arc<S>) -> Self {
        Self {
            specs: HashMap::new(),
            jobs: JobStore::new(),
            services,
        }
    }

    /// Replaces the job table with one that reports terminal jobs to `hook`.
    /// Call before the first submit.
    pub fn on_settled(mut self, hook: SettledHook) -> Self {
        self.jobs = JobStore::with_hook(hook);
        self
    }

    pub fn services(&self) -> &Arc<S> {
        &self.services
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Fails on a duplicate id; the command registered first stays in effect.
    pub fn register(&mut self, spec: CommandSpec<S>) -> CommanderResult<()> {
        if self.specs.contains_key(spec.id()) {
            return Err(CommanderError::DuplicateCommand(spec.id().to_string()));
        }
        debug!(command = spec.id(), "registered command");
        self.specs.insert(spec.id().to_string(), Arc::new(spec));
        Ok(())
    }

    /// Registered commands sorted by id.
    pub fn commands(&self) -> Vec<CommandInfo> {
        let mut out: Vec<_> = self.specs.values().map(|s| s.info()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Validates `payload` synchronously, then schedules the job on the
    /// current Tokio runtime and returns its id without waiting.
    ///
    /// Unknown ids and invalid payloads are returned as errors and never
    /// create a job. Must be called from within a Tokio runtime.
    pub fn submit(&self, command_id: &str, payload: Value) -> CommanderResult<JobId> {
        let spec = self
            .specs
            .get(command_id)
            .cloned()
            .ok_or_else(|| CommanderError::UnknownCommand(command_id.to_string()))?;
        spec.validate(&payload)?;

        let job = CommandJob::queued(spec.id());
        let id = job.id;
        self.jobs.insert(job);
        info!(job_id = %id, command = spec.id(), "job queued");

        let ctx = CommandContext::new(id, spec.id(), Arc::clone(&self.services), self.jobs.clone());
        tokio::spawn(execute(spec, ctx, payload, self.jobs.clone()));
        Ok(id)
    }

    /// Advisory cancel. False for unknown or already-terminal jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.jobs.cancel(id) {
            Some(job) => {
                info!(job_id = %id, command = %job.command_id, "job cancelled");
                true
            }
            None => false,
        }
    }

    pub fn get_job(&self, id: JobId) -> Option<CommandJob> {
        self.jobs.get(id)
    }

    pub fn list_jobs(&self) -> Vec<CommandJob> {
        self.jobs.list()
    }

    pub async fn wait_for(&self, id: JobId) -> Option<CommandJob> {
        self.jobs.wait_for(id).await
    }
}

impl<S> fmt::Debug for CommandRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.specs.keys().collect();
        ids.sort();
        f.debug_struct("CommandRegistry")
            .field("commands", &ids)
            .field("jobs", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

async fn execute<S: Send + Sync + 'static>(
    spec: Arc<CommandSpec<S>>,
    ctx: CommandContext<S>,
    input: Value,
    jobs: JobStore,
) {
    let id = ctx.job_id();
    if !jobs.mark_running(id) {
        debug!(job_id = %id, "job left the queue before it started");
        return;
    }

    // The body runs as its own task so a timeout only stops us observing it.
    let body = tokio::spawn(spec.start(ctx, input));
    let outcome = match tokio::time::timeout(spec.timeout(), body).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(JobError::runtime(format!("{err:#}"))),
        Ok(Err(join)) => Err(JobError::runtime(join_failure(join))),
        Err(_) => Err(JobError::timeout(spec.id(), spec.timeout().as_millis())),
    };

    let Some(job) = jobs.settle(id, outcome) else {
        debug!(job_id = %id, "dropped outcome of an already-settled job");
        return;
    };
    match job.status {
        JobStatus::Success => info!(job_id = %id, command = spec.id(), "job succeeded"),
        _ => warn!(
            job_id = %id,
            command = spec.id(),
            error = job.error.as_ref().map(|e| e.message.as_str()).unwrap_or_default(),
            "job failed"
        ),
    }
}

fn join_failure(err: JoinError) -> String {
    if err.is_cancelled() {
        return "run body was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => format!("run body panicked: {}", panic_message(payload.as_ref())),
        Err(err) => err.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
