use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::barrier::HelperBarrier;
use crate::commands::register_builtins;
use crate::config::AppConfig;
use crate::error::{CommanderResult, ConfigResult};
use crate::history::JobHistory;
use crate::jobs::{CommandInfo, CommandJob, CommandRegistry, CommandSpec, JobId};
use crate::paths::ConfigPaths;
use crate::store::ConfigStore;

/// Long-lived collaborators handed to every run body.
#[derive(Debug)]
pub struct Services {
    pub store: ConfigStore,
    pub helpers: HelperBarrier,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            store: ConfigStore::from_config(config),
            helpers: HelperBarrier::from_config(config),
        }
    }
}

/// The service object: built once at start-up, then shared by reference.
#[derive(Debug)]
pub struct Commander {
    registry: CommandRegistry<Services>,
    history: Option<JobHistory>,
}

impl Commander {
    /// An empty registry over `services`. Commands are added with
    /// [`Commander::register`].
    pub fn from_parts(services: Services, history: Option<JobHistory>) -> Self {
        let mut registry = CommandRegistry::new(Arc::new(services));
        if let Some(h) = &history {
            let sink = h.clone();
            registry = registry.on_settled(Arc::new(move |job: &CommandJob| sink.record(job)));
        }
        Self { registry, history }
    }

    /// Services built from `config`, without built-in commands.
    pub fn new(config: &AppConfig) -> Self {
        let history = config
            .history_enabled
            .then(|| JobHistory::new(ConfigPaths::from_config(config).history_file()));
        Self::from_parts(Services::from_config(config), history)
    }

    /// [`Commander::new`] plus every built-in command.
    pub fn with_builtins(config: &AppConfig) -> CommanderResult<Self> {
        let mut commander = Self::new(config);
        commander.register_builtins()?;
        Ok(commander)
    }

    /// Adds every built-in command. Fails if one of their ids is taken.
    pub fn register_builtins(&mut self) -> CommanderResult<()> {
        register_builtins(&mut self.registry)?;
        debug!(commands = self.registry.commands().len(), "commander ready");
        Ok(())
    }

    pub fn register(&mut self, spec: CommandSpec<Services>) -> CommanderResult<()> {
        self.registry.register(spec)
    }

    pub fn services(&self) -> &Services {
        self.registry.services()
    }

    pub fn store(&self) -> &ConfigStore {
        &self.services().store
    }

    pub fn helpers(&self) -> &HelperBarrier {
        &self.services().helpers
    }

    pub fn history(&self) -> Option<&JobHistory> {
        self.history.as_ref()
    }

    /// The most recent settled jobs from the history file, oldest first.
    /// Reads the file even when recording is disabled for this process.
    pub fn read_history(&self, limit: usize) -> ConfigResult<Vec<CommandJob>> {
        match &self.history {
            Some(h) => h.read_recent(limit),
            None => JobHistory::new(self.store().paths().history_file()).read_recent(limit),
        }
    }

    pub fn commands(&self) -> Vec<CommandInfo> {
        self.registry.commands()
    }

    pub fn submit(&self, command_id: &str, payload: Value) -> CommanderResult<JobId> {
        self.registry.submit(command_id, payload)
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.registry.cancel(id)
    }

    pub fn get_job(&self, id: JobId) -> Option<CommandJob> {
        self.registry.get_job(id)
    }

    pub fn list_jobs(&self) -> Vec<CommandJob> {
        self.registry.list_jobs()
    }

    pub async fn wait_for(&self, id: JobId) -> Option<CommandJob> {
        self.registry.wait_for(id).await
    }
}
