use std::fmt;
use std::sync::Arc;

use super::job::{JobId, LogLevel};
use super::store::JobStore;

/// Handed to every run body: which job it is, the shared services, and a
/// log that stops accepting entries once the job is terminal.
pub struct CommandContext<S> {
    job_id: JobId,
    command_id: Arc<str>,
    services: Arc<S>,
    jobs: JobStore,
}

impl<S> CommandContext<S> {
    pub(crate) fn new(job_id: JobId, command_id: &str, services: Arc<S>, jobs: JobStore) -> Self {
        Self {
            job_id,
            command_id: Arc::from(command_id),
            services,
            jobs,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    /// False when the entry was dropped because the job already settled.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> bool {
        self.jobs.append_log(self.job_id, level, message)
    }

    pub fn info(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Warn, message)
    }
}

impl<S> Clone for CommandContext<S> {
    fn clone(&self) -> Self {
        Self {
            job_id: self.job_id,
            command_id: Arc::clone(&self.command_id),
            services: Arc::clone(&self.services),
            jobs: self.jobs.clone(),
        }
    }
}

impl<S> fmt::Debug for CommandContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("job_id", &self.job_id)
            .field("command_id", &self.command_id)
            .finish_non_exhaustive()
    }
}
