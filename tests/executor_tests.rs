use std::time::Duration;

use uuid::Uuid;

use fleetsched::config::SandboxConfig;
use fleetsched::scheduler::dispatch::{build_command, interpret, parse_result, DispatchOutcome};
use fleetsched::scheduler::{Job, ResourceRequirements};
use fleetsched::remote::ExecOutput;
use fleetsched::worker::executor::{LAUNCH_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE};
use fleetsched::worker::{execute_job, EntryOutcome, JobExecutor, PAYLOAD_ERROR_EXIT_CODE};

/// Create a test executor with default sandbox config
fn test_executor() -> JobExecutor {
    JobExecutor::new(SandboxConfig::default())
}

fn wire_job() -> fleetsched::scheduler::WireJob {
    Job::new("render", "echo 'hello world'")
        .with_requirements(ResourceRequirements::new(0.5, 128).with_image("busybox:1.36"))
        .to_wire()
}

#[test]
fn test_docker_args_apply_sandbox_and_limits() {
    let job = wire_job();
    let args = test_executor().docker_args(&job);

    assert_eq!(&args[..2], &["run", "--rm"]);
    assert!(args.contains(&format!("--name=fleetsched-{}", job.id)));
    assert!(args.contains(&"--network=none".to_string()));
    assert!(args.contains(&"--cpus=0.5".to_string()));
    assert!(args.contains(&"--memory=128m".to_string()));
    assert!(args.contains(&"--cap-drop=ALL".to_string()));
    assert!(args.contains(&"--read-only".to_string()));

    // Image, then the command handed to a shell unchanged
    let tail = &args[args.len() - 4..];
    assert_eq!(tail, &["busybox:1.36", "sh", "-c", "echo 'hello world'"]);
}

#[test]
fn test_docker_args_relaxed_sandbox() {
    let executor = JobExecutor::new(SandboxConfig {
        network_disabled: false,
        drop_capabilities: false,
        read_only_rootfs: false,
    });
    let args = executor.docker_args(&wire_job());

    assert!(!args.iter().any(|a| a.starts_with("--network")));
    assert!(!args.contains(&"--cap-drop=ALL".to_string()));
    assert!(!args.contains(&"--read-only".to_string()));
}

#[test]
fn test_process_output_timeout() {
    let result = JobExecutor::process_output(Uuid::new_v4(), None, Duration::from_millis(1500));

    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert_eq!(result.execution_time_ms, 1500);
    assert!(result.stderr.contains("timed out"));
}

#[test]
fn test_process_output_launch_failure() {
    let err = std::io::Error::new(std::io::ErrorKind::NotFound, "docker: not found");
    let result =
        JobExecutor::process_output(Uuid::new_v4(), Some(Err(err)), Duration::from_millis(3));

    assert_eq!(result.exit_code, LAUNCH_FAILURE_EXIT_CODE);
    assert!(result.stderr.contains("docker: not found"));
}

#[cfg(unix)]
#[test]
fn test_process_output_keeps_exit_code_and_streams() {
    use std::os::unix::process::ExitStatusExt;

    let output = std::process::Output {
        status: std::process::ExitStatus::from_raw(3 << 8),
        stdout: b"partial\n".to_vec(),
        stderr: b"bad input\n".to_vec(),
    };
    let result =
        JobExecutor::process_output(Uuid::new_v4(), Some(Ok(output)), Duration::from_millis(42));

    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stdout, "partial\n");
    assert_eq!(result.stderr, "bad input\n");
    assert_eq!(result.execution_time_ms, 42);
}

#[tokio::test]
async fn test_missing_payload() {
    let outcome = execute_job(None, &test_executor()).await;

    assert_eq!(outcome.exit_code(), PAYLOAD_ERROR_EXIT_CODE);
    assert!(outcome.stdout_line().is_none());
    assert!(outcome.stderr_line().unwrap().contains("\"error\""));
}

#[tokio::test]
async fn test_malformed_payload() {
    let outcome = execute_job(Some("{not json"), &test_executor()).await;

    assert!(matches!(outcome, EntryOutcome::InvalidPayload(_)));
    assert_eq!(outcome.exit_code(), PAYLOAD_ERROR_EXIT_CODE);

    let err: serde_json::Value = serde_json::from_str(&outcome.stderr_line().unwrap()).unwrap();
    assert!(err["error"].is_string());
}

#[test]
fn test_worker_result_line_is_what_master_parses() {
    let result = fleetsched::scheduler::JobResult {
        exit_code: 0,
        stdout: "line one\nline two\n".to_string(),
        stderr: "warning: slow\n".to_string(),
        execution_time_ms: 812,
    };
    let line = EntryOutcome::Executed(result.clone()).stdout_line().unwrap();

    // Whatever else the worker printed before the result object is ignored
    let stdout = format!("pulling image...\n{}\n", line);
    assert_eq!(parse_result(&stdout).unwrap(), result);

    match interpret(ExecOutput {
        exit_code: 0,
        stdout,
        stderr: String::new(),
    }) {
        DispatchOutcome::Completed(parsed) => assert_eq!(parsed, result),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_command_payload_survives_shell_quoting() {
    let job = Job::new("quotes", "echo 'it''s' \"fine\"");
    let command = build_command("fleetsched execute-job", &job).unwrap();

    let quoted = command.strip_prefix("fleetsched execute-job ").unwrap();
    let payload = quoted
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap()
        .replace("'\\''", "'");
    let decoded: fleetsched::scheduler::WireJob = serde_json::from_str(&payload).unwrap();
    assert_eq!(decoded, job.to_wire());
}
