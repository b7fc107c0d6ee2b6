use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{decode, source_keys};
use crate::error::{CommanderResult, ConfigError};
use crate::jobs::CommandSpec;
use crate::service::Services;
use crate::store::{ConfigDocument, ConfigSource};
use crate::util::set_value_at_path;

pub const CONFIG_SET: &str = "config.set";
pub const CONFIG_ROLLBACK: &str = "config.rollback";

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SetInput {
    source: ConfigSource,
    key: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RollbackInput {
    source: ConfigSource,
}

pub(super) fn set_spec() -> CommanderResult<CommandSpec<Services>> {
    CommandSpec::<Services>::new(CONFIG_SET, |ctx, input| async move {
        let input: SetInput = decode(CONFIG_SET, input)?;
        let store = &ctx.services().store;
        let mut doc = match store.read(input.source) {
            Ok(v) => v,
            Err(ConfigError::NotFound { .. }) => {
                ctx.info(format!("{} does not exist yet; creating it", input.source));
                json!({})
            }
            Err(e) => return Err(e).context(format!("cannot read {}", input.source)),
        };
        set_value_at_path(&mut doc, &input.key, input.value)?;
        // Refuse edits that would leave a typed file unreadable for its owner.
        ConfigDocument::from_value(input.source, doc.clone())
            .with_context(|| format!("{} would no longer match its schema", input.source))?;
        let backup = store.write(input.source, &doc)?;
        ctx.info(format!("backup written to {}", backup.display()));
        Ok(json!({
            "source": input.source,
            "path": store.path_of(input.source).display().to_string(),
            "key": input.key,
            "backup": backup.display().to_string(),
        }))
    })
    .describe("Set a dotted key in a config source (backs the file up first)")
    .with_timeout(TIMEOUT)
    .ui_safe()
    .with_schema(json!({
        "type": "object",
        "required": ["source", "key", "value"],
        "properties": {
            "source": { "enum": source_keys() },
            "key": { "type": "string", "minLength": 1 },
            "value": {}
        }
    }))
}

pub(super) fn rollback_spec() -> CommanderResult<CommandSpec<Services>> {
    CommandSpec::<Services>::new(CONFIG_ROLLBACK, |ctx, input| async move {
        let input: RollbackInput = decode(CONFIG_ROLLBACK, input)?;
        let store = &ctx.services().store;
        let restored = store.rollback(input.source)?;
        ctx.info(format!("restored {}", restored.display()));
        Ok(json!({
            "source": input.source,
            "path": store.path_of(input.source).display().to_string(),
            "restoredFrom": restored.display().to_string(),
        }))
    })
    .describe("Restore the most recent backup of a config source")
    .with_timeout(TIMEOUT)
    .ui_safe()
    .with_schema(json!({
        "type": "object",
        "required": ["source"],
        "properties": { "source": { "enum": source_keys() } }
    }))
}
