//! Local control plane for AI tool configuration: asynchronous command jobs,
//! an atomic JSON config store with backups, and a per-helper invocation
//! barrier for external programs.

pub mod app;
pub mod barrier;
pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod jobs;
pub mod logging;
pub mod paths;
pub mod service;
pub mod store;
pub mod util;

pub use barrier::{HelperBarrier, HelperRequest};
pub use config::AppConfig;
pub use error::{CommanderError, ConfigError, HelperError, ValidationError};
pub use jobs::{CommandContext, CommandJob, CommandSpec, JobId, JobStatus};
pub use service::{Commander, Services};
pub use store::{ConfigSource, ConfigStore};
