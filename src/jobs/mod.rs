//! Command registry and background job runner.
//!
//! Jobs follow `queued -> running -> {success | failed | cancelled}` (and
//! `queued -> cancelled`). The terminal state is written once; later
//! outcomes from a timed-out or cancelled body are discarded.

mod context;
mod job;
mod registry;
mod spec;
mod store;

pub use context::CommandContext;
pub use job::{CommandJob, JobError, JobErrorCode, JobId, JobLogEntry, JobStatus, LogLevel};
pub use registry::CommandRegistry;
pub use spec::{CommandInfo, CommandSpec, DEFAULT_COMMAND_TIMEOUT, RunFuture};
pub use store::{JobStore, SettledHook};
