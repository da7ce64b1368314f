use std::sync::Arc;
use std::time::Duration;

use crate::cluster::Node;
use crate::config::RemoteConfig;
use crate::error::{Result, SchedulerError};
use crate::remote::{ConnectionPool, ExecOutput};
use crate::scheduler::job::{Job, JobResult};
use crate::scheduler::policy::FailureKind;

/// Exit code recorded when the remote call itself failed
pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = -1;

/// Exit code recorded when a zero-exit run produced no parseable result
pub const PARSE_FAILURE_EXIT_CODE: i32 = 1;

/// What one dispatch attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(JobResult),
    Failed {
        kind: FailureKind,
        result: Option<JobResult>,
    },
}

/// Wrap `s` in single quotes so a POSIX shell passes it through as one word
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Remote command line that runs `job` through the worker entry point
pub fn build_command(entry_point: &str, job: &Job) -> Result<String> {
    let payload = serde_json::to_string(&job.to_wire())?;
    Ok(format!("{} {}", entry_point, shell_quote(&payload)))
}

/// Decode the result object from the last non-empty line of worker stdout
pub fn parse_result(stdout: &str) -> Result<JobResult> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| SchedulerError::ResultParse("no output from worker".to_string()))?;
    serde_json::from_str(line).map_err(|e| SchedulerError::ResultParse(e.to_string()))
}

/// Classify the output of a remote call that did run
pub fn interpret(output: ExecOutput) -> DispatchOutcome {
    if output.exit_code != 0 {
        return DispatchOutcome::Failed {
            kind: FailureKind::NonZeroExit,
            result: Some(JobResult::new(output.exit_code, output.stdout, output.stderr)),
        };
    }

    match parse_result(&output.stdout) {
        Ok(result) => DispatchOutcome::Completed(result),
        Err(e) => DispatchOutcome::Failed {
            kind: FailureKind::ResultParse,
            result: Some(JobResult::new(
                PARSE_FAILURE_EXIT_CODE,
                output.stdout,
                format!("{}\n{}", e, output.stderr),
            )),
        },
    }
}

/// Runs jobs on their assigned node through the connection pool
pub struct Dispatcher {
    pool: Arc<ConnectionPool>,
    entry_point: String,
    grace: Duration,
}

impl Dispatcher {
    pub fn new(pool: Arc<ConnectionPool>, remote: &RemoteConfig, grace: Duration) -> Self {
        Self {
            pool,
            entry_point: remote.worker_entry_point.clone(),
            grace,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run one attempt of `job` on `node`. Never fails: transport problems
    /// come back as [`FailureKind::Transport`] outcomes.
    pub async fn dispatch(&self, node: &Node, job: &Job) -> DispatchOutcome {
        tracing::info!(job_id = %job.id, node_id = %node.id, address = %node.address, "Dispatching job");

        match self.run_remote(node, job).await {
            Ok(output) => interpret(output),
            Err(e) => {
                tracing::warn!(job_id = %job.id, node_id = %node.id, error = %e, "Dispatch failed");
                DispatchOutcome::Failed {
                    kind: FailureKind::Transport,
                    result: Some(JobResult::new(TRANSPORT_FAILURE_EXIT_CODE, "", e.to_string())),
                }
            }
        }
    }

    async fn run_remote(&self, node: &Node, job: &Job) -> Result<ExecOutput> {
        let handle = self.pool.get_connection(node).await?;
        let command = build_command(&self.entry_point, job)?;
        let timeout = Duration::from_secs(job.resource_requirements.timeout) + self.grace;
        handle.exec(&command, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::WireJob;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> ExecOutput {
        ExecOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn unquote(arg: &str) -> String {
        arg.strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .unwrap()
            .replace("'\\''", "'")
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn command_carries_job_as_one_argument() {
        let job = Job::new("quote test", "echo 'hi there' && printf \"%s\" $HOME");
        let command = build_command("bin/worker run", &job).unwrap();

        let arg = command.strip_prefix("bin/worker run ").unwrap();
        let wire: WireJob = serde_json::from_str(&unquote(arg)).unwrap();
        assert_eq!(wire, job.to_wire());
    }

    #[test]
    fn result_is_read_from_last_line() {
        let stdout = "pulling image\nhello\n{\"exit_code\":0,\"stdout\":\"hello\\n\",\"stderr\":\"\",\"execution_time_ms\":1234}\n\n";
        let result = parse_result(stdout).unwrap();
        assert_eq!(
            result,
            JobResult {
                exit_code: 0,
                stdout: "hello\n".to_string(),
                stderr: String::new(),
                execution_time_ms: 1234,
            }
        );
    }

    #[test]
    fn empty_output_is_a_parse_error() {
        assert!(matches!(parse_result(""), Err(SchedulerError::ResultParse(_))));
        assert!(matches!(parse_result("not json"), Err(SchedulerError::ResultParse(_))));
    }

    #[test]
    fn zero_exit_with_result_completes() {
        let line = r#"{"exit_code":0,"stdout":"ok","stderr":"","execution_time_ms":5}"#;
        match interpret(output(0, line, "")) {
            DispatchOutcome::Completed(result) => assert_eq!(result.execution_time_ms, 5),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn zero_exit_without_result_is_parse_failure() {
        match interpret(output(0, "garbage", "warning")) {
            DispatchOutcome::Failed { kind, result } => {
                assert_eq!(kind, FailureKind::ResultParse);
                let result = result.unwrap();
                assert_eq!(result.exit_code, PARSE_FAILURE_EXIT_CODE);
                assert_eq!(result.stdout, "garbage");
                assert!(result.stderr.starts_with("Failed to parse result"));
                assert!(result.stderr.ends_with("warning"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn non_zero_exit_keeps_raw_output() {
        match interpret(output(3, "partial", "boom")) {
            DispatchOutcome::Failed { kind, result } => {
                assert_eq!(kind, FailureKind::NonZeroExit);
                assert_eq!(result, Some(JobResult::new(3, "partial", "boom")));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
