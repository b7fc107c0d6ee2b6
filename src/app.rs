use std::ffi::OsString;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};

use crate::commands::{CONFIG_ROLLBACK, CONFIG_SET};
use crate::config::{APP_DESC, APP_NAME, APP_VERSION, AppConfig};
use crate::error::ConfigError;
use crate::jobs::JobStatus;
use crate::service::Commander;
use crate::store::ConfigSource;
use crate::util::{parse_cli_value, value_at_path};

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version = APP_VERSION, about = APP_DESC)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered commands
    Commands,
    /// Submit a command, wait for its job, and print the job
    Run {
        /// Command id, e.g. `echo` or `account.add`
        id: String,
        /// JSON payload [default: {}]
        #[arg(long, short)]
        payload: Option<String>,
    },
    /// Inspect and edit configuration sources
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show recently settled jobs
    History {
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Path, size, checksum and parse status of every source
    Sources,
    /// Print a source (or one dotted key of it)
    Show {
        source: ConfigSource,
        #[arg(long)]
        key: Option<String>,
    },
    /// Set a dotted key; the value is parsed as JSON when possible
    Set {
        source: ConfigSource,
        key: String,
        value: String,
    },
    /// Restore the most recent backup
    Rollback { source: ConfigSource },
    /// List backups, newest first
    Backups { source: ConfigSource },
    /// Delete all but the newest backups
    Prune {
        source: ConfigSource,
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
}

pub async fn run() -> i32 {
    run_with(std::env::args_os()).await
}

pub async fn run_with<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { EXIT_USAGE } else { EXIT_OK };
        }
    };
    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{APP_NAME}: {e}");
            return EXIT_USAGE;
        }
    };
    let commander = match Commander::with_builtins(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{APP_NAME}: {e}");
            return EXIT_FAILED;
        }
    };

    match cli.command {
        Command::Commands => print_json("commands", &commander.commands()),
        Command::Run { id, payload } => cmd_run(&commander, &id, payload.as_deref()).await,
        Command::Config { action } => cmd_config(&commander, action).await,
        Command::History { limit } => cmd_history(&commander, limit),
    }
}

async fn cmd_run(commander: &Commander, id: &str, payload: Option<&str>) -> i32 {
    let payload = match payload {
        None => json!({}),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("{APP_NAME} run: --payload is not valid JSON: {e}");
                return EXIT_USAGE;
            }
        },
    };
    submit_and_wait(commander, "run", id, payload).await
}

async fn submit_and_wait(commander: &Commander, label: &str, id: &str, payload: Value) -> i32 {
    let job_id = match commander.submit(id, payload) {
        Ok(job_id) => job_id,
        Err(e) => {
            eprintln!("{APP_NAME} {label}: {e}");
            return if e.is_bad_request() {
                EXIT_USAGE
            } else {
                EXIT_FAILED
            };
        }
    };
    let Some(job) = commander.wait_for(job_id).await else {
        eprintln!("{APP_NAME} {label}: job {job_id} disappeared");
        return EXIT_FAILED;
    };
    let code = print_json(label, &job);
    if let Some(err) = &job.error {
        eprintln!("{APP_NAME} {label}: {}: {}", err.code, err.message);
    }
    match job.status {
        JobStatus::Success => code,
        _ => EXIT_FAILED,
    }
}

async fn cmd_config(commander: &Commander, action: ConfigAction) -> i32 {
    let store = commander.store();
    match action {
        ConfigAction::Sources => print_json("config sources", &store.describe_sources()),
        ConfigAction::Show { source, key } => {
            let value = match store.read(source) {
                Ok(v) => v,
                Err(e) => return config_failure("config show", &e),
            };
            let Some(key) = key else {
                return print_json("config show", &value);
            };
            match value_at_path(&value, &key) {
                Some(v) => print_json("config show", v),
                None => {
                    eprintln!("{APP_NAME} config show: key not found: {key}");
                    EXIT_FAILED
                }
            }
        }
        ConfigAction::Set { source, key, value } => {
            let payload = json!({
                "source": source,
                "key": key,
                "value": parse_cli_value(&value),
            });
            submit_and_wait(commander, "config set", CONFIG_SET, payload).await
        }
        ConfigAction::Rollback { source } => {
            let payload = json!({ "source": source });
            submit_and_wait(commander, "config rollback", CONFIG_ROLLBACK, payload).await
        }
        ConfigAction::Backups { source } => match store.list_backups(source) {
            Ok(entries) => print_json("config backups", &entries),
            Err(e) => config_failure("config backups", &e),
        },
        ConfigAction::Prune { source, keep } => match store.prune_backups(source, keep) {
            Ok(removed) => print_json("config prune", &json!({ "removed": removed, "kept": keep })),
            Err(e) => config_failure("config prune", &e),
        },
    }
}

fn cmd_history(commander: &Commander, limit: usize) -> i32 {
    match commander.read_history(limit) {
        Ok(jobs) => print_json("history", &jobs),
        Err(e) => config_failure("history", &e),
    }
}

fn config_failure(label: &str, err: &ConfigError) -> i32 {
    eprintln!("{APP_NAME} {label}: {err} (status {})", err.status());
    EXIT_FAILED
}

fn print_json(label: &str, value: &impl Serialize) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{s}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{APP_NAME} {label}: failed to render JSON: {e}");
            EXIT_FAILED
        }
    }
}
