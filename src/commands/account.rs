use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, json};

use super::{decode, load_commander};
use crate::error::CommanderResult;
use crate::jobs::CommandSpec;
use crate::service::Services;
use crate::store::{Account, ConfigDocument};

pub const ACCOUNT_ADD: &str = "account.add";
pub const ACCOUNT_SWITCH: &str = "account.switch";

const TIMEOUT: Duration = Duration::from_secs(10);
const NAME_PATTERN: &str = "^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$";
const ACCOUNTS_DIR: &str = "accounts";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddInput {
    name: String,
    #[serde(default)]
    config_dir: Option<PathBuf>,
    #[serde(default)]
    activate: bool,
}

#[derive(Debug, Deserialize)]
struct SwitchInput {
    name: String,
}

pub(super) fn add_spec() -> CommanderResult<CommandSpec<Services>> {
    CommandSpec::<Services>::new(ACCOUNT_ADD, |ctx, input| async move {
        let input: AddInput = decode(ACCOUNT_ADD, input)?;
        let store = &ctx.services().store;
        let mut registry = load_commander(store)?;
        if registry.account(&input.name).is_some() {
            anyhow::bail!("account '{}' already exists", input.name);
        }
        let config_dir = input.config_dir.unwrap_or_else(|| {
            store
                .paths()
                .config_dir()
                .join(ACCOUNTS_DIR)
                .join(&input.name)
        });
        registry.accounts.push(Account {
            name: input.name.clone(),
            config_dir: Some(config_dir.clone()),
            created_at: Some(Utc::now()),
            extra: Map::new(),
        });
        if input.activate || registry.active_account.is_none() {
            registry.active_account = Some(input.name.clone());
        }
        let active = registry.active_account.clone();
        let backup = store.write_document(&ConfigDocument::Commander(registry))?;
        ctx.info(format!("added account {}", input.name));
        Ok(json!({
            "account": input.name,
            "configDir": config_dir.display().to_string(),
            "active": active,
            "backup": backup.display().to_string(),
        }))
    })
    .describe("Register an account and its per-account config directory")
    .with_timeout(TIMEOUT)
    .with_schema(json!({
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": { "type": "string", "pattern": NAME_PATTERN },
            "configDir": { "type": "string", "minLength": 1 },
            "activate": { "type": "boolean" }
        }
    }))
}

pub(super) fn switch_spec() -> CommanderResult<CommandSpec<Services>> {
    CommandSpec::<Services>::new(ACCOUNT_SWITCH, |ctx, input| async move {
        let input: SwitchInput = decode(ACCOUNT_SWITCH, input)?;
        let store = &ctx.services().store;
        let mut registry = load_commander(store)?;
        if registry.account(&input.name).is_none() {
            anyhow::bail!("unknown account '{}'", input.name);
        }
        let previous = registry.active_account.replace(input.name.clone());
        if previous.as_deref() == Some(input.name.as_str()) {
            ctx.info(format!("{} is already active", input.name));
            return Ok(json!({ "active": input.name, "previous": previous, "changed": false }));
        }
        let backup = store.write_document(&ConfigDocument::Commander(registry))?;
        ctx.info(format!(
            "switched from {} to {}",
            previous.as_deref().unwrap_or("<none>"),
            input.name
        ));
        Ok(json!({
            "active": input.name,
            "previous": previous,
            "changed": true,
            "backup": backup.display().to_string(),
        }))
    })
    .describe("Make a registered account the active one")
    .with_timeout(TIMEOUT)
    .with_schema(json!({
        "type": "object",
        "required": ["name"],
        "properties": { "name": { "type": "string", "pattern": NAME_PATTERN } }
    }))
}
