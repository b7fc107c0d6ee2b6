use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;

use super::context::CommandContext;
use crate::error::{CommanderError, CommanderResult, ValidationError};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub type RunFuture = BoxFuture<'static, anyhow::Result<Value>>;
type RunFn<S> = Arc<dyn Fn(CommandContext<S>, Value) -> RunFuture + Send + Sync>;
type ValidateFn = Arc<dyn Fn(&Value) -> Result<(), ValidationError> + Send + Sync>;

/// Static description of a command: how to validate its payload, how to run
/// it, and how long it may take.
pub struct CommandSpec<S> {
    id: String,
    description: String,
    timeout: Duration,
    ui_safe: bool,
    validate: ValidateFn,
    run: RunFn<S>,
}

impl<S: Send + Sync + 'static> CommandSpec<S> {
    /// A spec that accepts any payload and runs `run` with the default timeout.
    pub fn new<F, Fut>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn(CommandContext<S>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: String::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            ui_safe: false,
            validate: Arc::new(|_: &Value| Ok(())),
            run: Arc::new(move |ctx: CommandContext<S>, input: Value| -> RunFuture {
                run(ctx, input).boxed()
            }),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks the command as invocable from the browser UI.
    pub fn ui_safe(mut self) -> Self {
        self.ui_safe = true;
        self
    }

    pub fn validate_with<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Value) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.validate = Arc::new(validate);
        self
    }

    /// Validates payloads against a JSON Schema document. Reports at most
    /// three violations per payload.
    pub fn with_schema(self, schema: Value) -> CommanderResult<Self> {
        let compiled = JSONSchema::compile(&schema).map_err(|e| CommanderError::InvalidSchema {
            command: self.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.validate_with(move |payload| {
            compiled.validate(payload).map_err(|errors| {
                ValidationError::from_reasons(errors.take(3).map(|e| e.to_string()).collect())
            })
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_ui_safe(&self) -> bool {
        self.ui_safe
    }

    pub fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        (self.validate)(payload)
    }

    pub(crate) fn start(&self, ctx: CommandContext<S>, input: Value) -> RunFuture {
        (self.run)(ctx, input)
    }

    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            id: self.id.clone(),
            description: self.description.clone(),
            timeout_ms: self.timeout.as_millis(),
            ui_safe: self.ui_safe,
        }
    }
}

impl<S> fmt::Debug for CommandSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("ui_safe", &self.ui_safe)
            .finish_non_exhaustive()
    }
}

/// Listing entry for a registered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfo {
    pub id: String,
    pub description: String,
    pub timeout_ms: u128,
    pub ui_safe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> CommandSpec<()> {
        CommandSpec::new("noop", |_ctx, input| async move { Ok(input) })
    }

    #[test]
    fn defaults_accept_anything() {
        let spec = noop();
        assert_eq!(spec.timeout(), DEFAULT_COMMAND_TIMEOUT);
        assert!(!spec.is_ui_safe());
        assert!(spec.validate(&json!(null)).is_ok());
    }

    #[test]
    fn schema_validator_reports_at_most_three_reasons() {
        let spec = noop()
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "a": {"type": "string"},
                    "b": {"type": "string"},
                    "c": {"type": "string"},
                    "d": {"type": "string"}
                }
            }))
            .expect("schema compiles");
        assert!(spec.validate(&json!({"a": "x"})).is_ok());
        let err = spec
            .validate(&json!({"a": 1, "b": 2, "c": 3, "d": 4}))
            .unwrap_err();
        assert_eq!(err.reasons.len(), 3);
    }

    #[test]
    fn broken_schema_is_rejected_at_build_time() {
        let err = noop()
            .with_schema(json!({"type": "no-such-type"}))
            .unwrap_err();
        assert!(matches!(err, CommanderError::InvalidSchema { .. }));
    }

    #[test]
    fn info_reflects_builder() {
        let info = noop()
            .describe("does nothing")
            .with_timeout(Duration::from_millis(250))
            .ui_safe()
            .info();
        assert_eq!(info.timeout_ms, 250);
        assert!(info.ui_safe);
        assert_eq!(info.description, "does nothing");
    }
}
