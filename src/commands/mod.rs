//! Built-in commands. Each one touches files only through the
//! [`crate::store::ConfigStore`] and processes only through the
//! [`crate::barrier::HelperBarrier`].

mod account;
mod config;
mod echo;
mod usage;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CommanderResult, ConfigError};
use crate::jobs::CommandRegistry;
use crate::service::Services;
use crate::store::{CommanderConfig, ConfigDocument, ConfigSource, ConfigStore};

pub use account::{ACCOUNT_ADD, ACCOUNT_SWITCH};
pub use config::{CONFIG_ROLLBACK, CONFIG_SET};
pub use echo::ECHO;
pub use usage::USAGE_FETCH;

pub fn register_builtins(registry: &mut CommandRegistry<Services>) -> CommanderResult<()> {
    registry.register(echo::spec()?)?;
    registry.register(config::set_spec()?)?;
    registry.register(config::rollback_spec()?)?;
    registry.register(account::add_spec()?)?;
    registry.register(account::switch_spec()?)?;
    let helper_timeout = registry.services().helpers.timeout();
    registry.register(usage::spec(helper_timeout)?)?;
    Ok(())
}

/// Decodes an already schema-checked payload into its typed form.
fn decode<T: DeserializeOwned>(command: &str, input: Value) -> anyhow::Result<T> {
    serde_json::from_value(input).with_context(|| format!("{command}: malformed payload"))
}

fn source_keys() -> Value {
    Value::from(ConfigSource::keys())
}

/// `commander.json`, or an empty registry when it does not exist yet.
fn load_commander(store: &ConfigStore) -> anyhow::Result<CommanderConfig> {
    match store.read_document(ConfigSource::Commander) {
        Ok(ConfigDocument::Commander(cfg)) => Ok(cfg),
        Ok(other) => anyhow::bail!("unexpected document for commander: {:?}", other.source()),
        Err(ConfigError::NotFound { .. }) => Ok(CommanderConfig::default()),
        Err(e) => Err(e).context("cannot load account registry"),
    }
}
