use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{decode, load_commander};
use crate::barrier::HelperRequest;
use crate::error::CommanderResult;
use crate::jobs::CommandSpec;
use crate::service::Services;

pub const USAGE_FETCH: &str = "usage.fetch";

/// Helper that reads Claude transcripts and prints daily usage as JSON.
pub const USAGE_HELPER: &str = "ccusage";
const CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";
const DEFAULT_ACCOUNT: &str = "default";
const JOB_MARGIN: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
struct UsageInput {
    #[serde(default)]
    accounts: Vec<String>,
    #[serde(default)]
    since: Option<String>,
}

pub(super) fn spec(helper_timeout: Duration) -> CommanderResult<CommandSpec<Services>> {
    CommandSpec::<Services>::new(USAGE_FETCH, |ctx, input| async move {
        let input: UsageInput = decode(USAGE_FETCH, input)?;
        let services = ctx.services();
        let registry = load_commander(&services.store)?;

        let mut targets = Vec::new();
        if registry.accounts.is_empty() && input.accounts.is_empty() {
            targets.push((DEFAULT_ACCOUNT.to_string(), None));
        } else if input.accounts.is_empty() {
            for account in &registry.accounts {
                targets.push((account.name.clone(), account.config_dir.clone()));
            }
        } else {
            for name in &input.accounts {
                let Some(account) = registry.account(name) else {
                    anyhow::bail!("unknown account '{name}'");
                };
                targets.push((account.name.clone(), account.config_dir.clone()));
            }
        }

        let calls = targets.iter().map(|(name, config_dir)| {
            let mut request = HelperRequest::new(USAGE_HELPER).args(["daily", "--json"]);
            if let Some(since) = &input.since {
                request = request.args(["--since", since.as_str()]);
            }
            if let Some(dir) = config_dir {
                request = request.env(CONFIG_DIR_ENV, dir.display().to_string());
            }
            ctx.info(format!("fetching usage for {name}"));
            services.helpers.invoke(request)
        });
        let outcomes = join_all(calls).await;

        let mut by_account = Map::new();
        let mut failures = 0usize;
        for ((name, _), outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(value) => {
                    by_account.insert(name.clone(), value);
                }
                Err(e) => {
                    failures += 1;
                    ctx.warn(format!("{name}: {e}"));
                    by_account.insert(name.clone(), json!({ "error": e.to_string() }));
                }
            }
        }
        if failures == targets.len() {
            anyhow::bail!("usage fetch failed for every account");
        }
        Ok(json!({ "accounts": Value::Object(by_account), "failed": failures }))
    })
    .describe("Fetch daily usage per account through the usage helper")
    .with_timeout(job_timeout(helper_timeout))
    .ui_safe()
    .with_schema(json!({
        "type": "object",
        "properties": {
            "accounts": { "type": "array", "items": { "type": "string" } },
            "since": { "type": "string", "pattern": "^[0-9]{8}$" }
        }
    }))
}

/// Accounts with different config dirs queue behind the first helper run and
/// then launch together, so a healthy fetch takes at most two helper
/// timeouts. The margin keeps the helper's own timeout firing first.
fn job_timeout(helper_timeout: Duration) -> Duration {
    helper_timeout * 2 + JOB_MARGIN
}
