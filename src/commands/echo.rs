use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::decode;
use crate::error::CommanderResult;
use crate::jobs::CommandSpec;
use crate::service::Services;

pub const ECHO: &str = "echo";

#[derive(Debug, Deserialize)]
struct EchoInput {
    msg: String,
}

pub(super) fn spec() -> CommanderResult<CommandSpec<Services>> {
    CommandSpec::<Services>::new(ECHO, |_ctx, input| async move {
        let input: EchoInput = decode(ECHO, input)?;
        Ok(json!({ "echo": input.msg }))
    })
    .describe("Return the given message; smoke test for the job runner")
    .with_timeout(Duration::from_secs(5))
    .ui_safe()
    .with_schema(json!({
        "type": "object",
        "required": ["msg"],
        "properties": { "msg": { "type": "string" } }
    }))
}
