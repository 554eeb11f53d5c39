use crate::command::{command_line, CommandRunner};
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Canned result for one scripted invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    /// Exit zero with this output
    Success(String),
    /// Exit non-zero with this output
    Failure { exit_code: i32, output: String },
    /// The tool could not be spawned
    NotStarted(String),
}

impl ScriptedResponse {
    pub fn ok(output: impl Into<String>) -> Self {
        Self::Success(output.into())
    }

    pub fn fail(exit_code: i32, output: impl Into<String>) -> Self {
        Self::Failure {
            exit_code,
            output: output.into(),
        }
    }

    pub fn not_started(message: impl Into<String>) -> Self {
        Self::NotStarted(message.into())
    }
}

/// One recorded call against a `ScriptedRunner`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Whether the streamed-stdout variant was used
    pub piped: bool,
}

impl Invocation {
    /// First argument, e.g. `create` in `zpool create ...`
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<ScriptedResponse>>,
    sticky: HashMap<String, ScriptedResponse>,
    calls: Vec<Invocation>,
}

/// Command runner that answers from a script instead of spawning processes
///
/// Responses are keyed by subcommand (the first argument). One-shot
/// responses queued with `push` are consumed in order; once a queue is
/// empty the sticky response from `set_default` applies, and without one
/// the call succeeds with empty output. Every invocation is recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a one-shot response for the next call of `subcommand`
    pub fn push(&self, subcommand: &str, response: ScriptedResponse) -> &Self {
        self.lock()
            .queued
            .entry(subcommand.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Answer every otherwise unscripted call of `subcommand` with `response`
    pub fn set_default(&self, subcommand: &str, response: ScriptedResponse) -> &Self {
        self.lock()
            .sticky
            .insert(subcommand.to_string(), response);
        self
    }

    /// All invocations so far, in call order
    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    /// Invocations of one subcommand, in call order
    pub fn calls_for(&self, subcommand: &str) -> Vec<Invocation> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.subcommand() == Some(subcommand))
            .cloned()
            .collect()
    }

    /// Subcommands invoked so far, in call order
    pub fn subcommands(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| c.subcommand().map(str::to_string))
            .collect()
    }

    fn answer(&self, program: &str, args: &[&str], piped: bool) -> Result<Vec<u8>> {
        let cmd = command_line(program, args);
        let subcommand = args.first().copied().unwrap_or_default();

        let response = {
            let mut script = self.lock();
            script.calls.push(Invocation {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                piped,
            });
            script
                .queued
                .get_mut(subcommand)
                .and_then(VecDeque::pop_front)
                .or_else(|| script.sticky.get(subcommand).cloned())
                .unwrap_or(ScriptedResponse::Success(String::new()))
        };

        debug!("Scripted: {} -> {:?}", cmd, response);

        match response {
            ScriptedResponse::Success(output) => Ok(output.into_bytes()),
            ScriptedResponse::Failure { exit_code, output } => {
                Err(RuntimeError::command_failed(cmd, exit_code, output))
            }
            ScriptedResponse::NotStarted(message) => {
                Err(RuntimeError::command_start_failed(cmd, message))
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run_combined_output(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
        self.answer(program, args, false)
    }

    async fn run_stdout_pipe(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
        self.answer(program, args, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_call_succeeds_empty() {
        let runner = ScriptedRunner::new();
        let out = runner
            .run_combined_output("zpool", &["status"])
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(runner.subcommands(), vec!["status"]);
    }

    #[tokio::test]
    async fn test_queued_then_sticky_responses() {
        let runner = ScriptedRunner::new();
        runner
            .push("status", ScriptedResponse::fail(1, "zrepl not running"))
            .set_default("status", ScriptedResponse::ok("all pools are healthy"));

        assert!(runner.run_combined_output("zpool", &["status"]).await.is_err());
        let out = runner
            .run_combined_output("zpool", &["status"])
            .await
            .unwrap();
        assert_eq!(out, b"all pools are healthy");
    }

    #[tokio::test]
    async fn test_records_piped_flag_and_args() {
        let runner = ScriptedRunner::new();
        runner.push("list", ScriptedResponse::ok("cstor-123abc\n"));

        let out = runner
            .run_stdout_pipe("zpool", &["list", "-H", "-o", "name"])
            .await
            .unwrap();
        assert_eq!(out, b"cstor-123abc\n");

        let calls = runner.calls_for("list");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].piped);
        assert_eq!(calls[0].args, vec!["list", "-H", "-o", "name"]);
    }

    #[tokio::test]
    async fn test_not_started_maps_to_start_failure() {
        let runner = ScriptedRunner::new();
        runner.push("create", ScriptedResponse::not_started("No such file or directory"));
        let err = runner
            .run_combined_output("zpool", &["create"])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandStartFailed { .. }));
    }
}
