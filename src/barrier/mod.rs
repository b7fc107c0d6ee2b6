//! Per-helper invocation barrier for external programs fetched through a
//! package runner (`npx -y` by default).
//!
//! Concurrent first-time fetches of the same package race on the runner's
//! shared cache. The first caller for a helper name becomes the warmup; any
//! caller arriving while it is in flight waits for it to settle before
//! launching. Callers with a request identical to the warmup's take its
//! outcome instead of launching again. Once the warmup settles (either way)
//! the helper is marked warm and later callers run concurrently.

mod output;
mod process;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::HelperError;

pub use output::last_json_line;
use process::{Invocation, Launcher};

pub type HelperOutcome = Result<Value, HelperError>;
type SharedOutcome = Shared<BoxFuture<'static, HelperOutcome>>;

/// One helper call: the package/binary name, its arguments, and extra
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HelperRequest {
    pub helper: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl HelperRequest {
    pub fn new(helper: impl Into<String>) -> Self {
        Self {
            helper: helper.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

struct Warmup {
    generation: u64,
    request: HelperRequest,
    outcome: SharedOutcome,
}

#[derive(Default)]
struct BarrierState {
    inflight: HashMap<String, Warmup>,
    warm: HashSet<String>,
}

enum Role {
    /// The helper already finished a warmup: launch without gating.
    Warm,
    Leader(SharedOutcome),
    /// Same request as the warmup in flight: reuse its outcome.
    Duplicate(SharedOutcome),
    /// Different request for the same helper: wait, then launch.
    Waiter(SharedOutcome),
}

pub struct HelperBarrier {
    runner: Vec<String>,
    launcher: Launcher,
    prefer_local: bool,
    state: Arc<Mutex<BarrierState>>,
    generation: AtomicU64,
}

impl HelperBarrier {
    /// `runner` is the package-runner argv the helper name is appended to,
    /// e.g. `["npx", "-y"]`. An empty runner executes the helper directly.
    pub fn new(runner: Vec<String>, timeout: Duration) -> Self {
        Self {
            runner,
            launcher: Launcher::new(timeout),
            prefer_local: true,
            state: Arc::new(Mutex::new(BarrierState::default())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.helper_runner.clone(), config.helper_timeout)
    }

    /// When set (the default), a helper found on `PATH` runs directly and
    /// skips the barrier.
    pub fn prefer_local(mut self, prefer: bool) -> Self {
        self.prefer_local = prefer;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.launcher.timeout()
    }

    /// Number of processes launched so far.
    pub fn launches(&self) -> usize {
        self.launcher.launches()
    }

    /// Helper names with a warmup currently in flight.
    pub fn warming(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().inflight.keys().cloned().collect();
        names.sort();
        names
    }

    /// Helper names whose warmup has settled.
    pub fn warmed(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().warm.iter().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn invoke(&self, request: HelperRequest) -> HelperOutcome {
        if self.prefer_local
            && let Some(path) = local_helper(&request.helper).await
        {
            debug!(helper = %request.helper, path = %path.display(), "using local helper");
            let inv = Invocation {
                helper: request.helper,
                program: path.into_os_string(),
                args: request.args.into_iter().map(OsString::from).collect(),
                env: request.env,
            };
            return self.launcher.run(inv).await;
        }

        match self.join_or_lead(&request) {
            Role::Warm => self.launcher.run(self.via_runner(&request)).await,
            Role::Leader(outcome) => {
                info!(helper = %request.helper, "warming helper");
                outcome.await
            }
            Role::Duplicate(outcome) => {
                debug!(helper = %request.helper, "sharing in-flight warmup");
                outcome.await
            }
            Role::Waiter(outcome) => {
                debug!(helper = %request.helper, "waiting for warmup");
                let _ = outcome.await;
                self.launcher.run(self.via_runner(&request)).await
            }
        }
    }

    fn join_or_lead(&self, request: &HelperRequest) -> Role {
        let mut state = self.lock();
        if state.warm.contains(&request.helper) {
            return Role::Warm;
        }
        if let Some(warmup) = state.inflight.get(&request.helper) {
            let outcome = warmup.outcome.clone();
            return if warmup.request == *request {
                Role::Duplicate(outcome)
            } else {
                Role::Waiter(outcome)
            };
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let launcher = self.launcher.clone();
        let inv = self.via_runner(request);
        let shared_state = Arc::clone(&self.state);
        let helper = request.helper.clone();
        let outcome = async move {
            let result = launcher.run(inv).await;
            let mut state = shared_state.lock().unwrap_or_else(PoisonError::into_inner);
            if state
                .inflight
                .get(&helper)
                .is_some_and(|w| w.generation == generation)
            {
                state.inflight.remove(&helper);
            }
            state.warm.insert(helper);
            result
        }
        .boxed()
        .shared();

        state.inflight.insert(
            request.helper.clone(),
            Warmup {
                generation,
                request: request.clone(),
                outcome: outcome.clone(),
            },
        );
        Role::Leader(outcome)
    }

    fn via_runner(&self, request: &HelperRequest) -> Invocation {
        let mut args: Vec<OsString> = Vec::new();
        let program = match self.runner.split_first() {
            Some((program, prefix)) => {
                args.extend(prefix.iter().map(OsString::from));
                args.push(OsString::from(&request.helper));
                OsString::from(program)
            }
            None => OsString::from(&request.helper),
        };
        args.extend(request.args.iter().map(OsString::from));
        Invocation {
            helper: request.helper.clone(),
            program,
            args,
            env: request.env.clone(),
        }
    }
}

/// `PATH` lookup walks the filesystem, so it runs on the blocking pool.
async fn local_helper(helper: &str) -> Option<PathBuf> {
    let name = helper.to_string();
    tokio::task::spawn_blocking(move || which::which(name).ok())
        .await
        .ok()
        .flatten()
}

impl fmt::Debug for HelperBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperBarrier")
            .field("runner", &self.runner)
            .field("timeout", &self.launcher.timeout())
            .field("prefer_local", &self.prefer_local)
            .field("warming", &self.warming())
            .field("warmed", &self.warmed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barrier(runner: &[&str]) -> HelperBarrier {
        HelperBarrier::new(
            runner.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        )
        .prefer_local(false)
    }

    #[test]
    fn runner_prefix_precedes_helper_and_args() {
        let req = HelperRequest::new("ccusage").args(["daily", "--json"]);
        let inv = barrier(&["npx", "-y"]).via_runner(&req);
        assert_eq!(inv.program, OsString::from("npx"));
        assert_eq!(
            inv.args,
            ["-y", "ccusage", "daily", "--json"]
                .iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_runner_runs_helper_directly() {
        let req = HelperRequest::new("ccusage").arg("--json");
        let inv = barrier(&[]).via_runner(&req);
        assert_eq!(inv.program, OsString::from("ccusage"));
        assert_eq!(inv.args, vec![OsString::from("--json")]);
    }

    #[test]
    fn second_caller_joins_instead_of_leading() {
        let b = barrier(&["true"]);
        let req = HelperRequest::new("tool").arg("a");
        assert!(matches!(b.join_or_lead(&req), Role::Leader(_)));
        assert!(matches!(b.join_or_lead(&req), Role::Duplicate(_)));
        assert!(matches!(
            b.join_or_lead(&HelperRequest::new("tool").arg("b")),
            Role::Waiter(_)
        ));
        assert!(matches!(
            b.join_or_lead(&HelperRequest::new("other")),
            Role::Leader(_)
        ));
        assert_eq!(b.warming(), vec!["other".to_string(), "tool".to_string()]);
        assert_eq!(b.launches(), 0);
    }

    #[tokio::test]
    async fn settled_warmup_marks_helper_warm() {
        let b = barrier(&["true"]);
        let req = HelperRequest::new("tool");
        let Role::Leader(outcome) = b.join_or_lead(&req) else {
            panic!("first caller must lead");
        };
        assert!(matches!(
            outcome.await,
            Err(HelperError::NoJsonOutput { .. })
        ));
        assert!(b.warming().is_empty());
        assert_eq!(b.warmed(), vec!["tool".to_string()]);
        assert!(matches!(b.join_or_lead(&req), Role::Warm));
        assert_eq!(b.launches(), 1);
    }

    #[test]
    fn requests_differ_by_env() {
        let a = HelperRequest::new("ccusage").env("CLAUDE_CONFIG_DIR", "/a");
        let b = HelperRequest::new("ccusage").env("CLAUDE_CONFIG_DIR", "/b");
        assert_ne!(a, b);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_local_helper_falls_back_to_runner() {
        assert!(local_helper("commander-no-such-helper-xyz").await.is_none());
        assert!(local_helper("sh").await.is_some());
    }
}
