use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::scheduler::job::{JobResult, WireJob};

/// Exit code reported when a job exceeds its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when docker itself could not be started
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 125;

/// Executes jobs in Docker containers with security isolation.
///
/// Each job runs in its own `docker run --rm` container using the job's
/// image, with cpu and memory limits taken from its resource requirements and:
/// - Network isolation (disabled by default)
/// - Dropped capabilities
/// - Read-only root filesystem
#[derive(Debug, Clone, Default)]
pub struct JobExecutor {
    config: SandboxConfig,
}

impl JobExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn container_name(job_id: &Uuid) -> String {
        format!("fleetsched-{}", job_id)
    }

    /// Arguments passed to `docker` for `job`
    pub fn docker_args(&self, job: &WireJob) -> Vec<String> {
        let req = &job.resource_requirements;
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            format!("--name={}", Self::container_name(&job.id)),
        ];

        if self.config.network_disabled {
            args.push("--network=none".to_string());
        }

        if req.cpu_cores > 0.0 {
            args.push(format!("--cpus={}", req.cpu_cores));
        }
        if req.memory_mb > 0 {
            args.push(format!("--memory={}m", req.memory_mb));
        }

        if self.config.drop_capabilities {
            args.push("--cap-drop=ALL".to_string());
            args.push("--security-opt=no-new-privileges".to_string());
        }

        if self.config.read_only_rootfs {
            args.push("--read-only".to_string());
        }

        args.push(req.docker_image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(job.command.clone());
        args
    }

    /// Run `job` to completion or until its timeout expires
    pub async fn execute(&self, job: &WireJob) -> JobResult {
        tracing::info!(
            job_id = %job.id,
            command = %job.command,
            image = %job.resource_requirements.docker_image,
            "Executing job"
        );

        let started = Instant::now();
        let timeout = Duration::from_secs(job.resource_requirements.timeout);
        let run = Command::new("docker")
            .args(self.docker_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, run).await {
            Ok(result) => Some(result),
            Err(_) => {
                Self::kill_container(&job.id).await;
                None
            }
        };

        Self::process_output(job.id, output, started.elapsed())
    }

    async fn kill_container(job_id: &Uuid) {
        let name = Self::container_name(job_id);
        if let Err(e) = Command::new("docker")
            .args(["kill", name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to kill timed out container");
        }
    }

    /// Turn the docker invocation result into a [`JobResult`]; `None` means the
    /// job timed out
    pub fn process_output(
        job_id: Uuid,
        output: Option<Result<std::process::Output, std::io::Error>>,
        elapsed: Duration,
    ) -> JobResult {
        let execution_time_ms = elapsed.as_millis() as u64;

        let result = match output {
            Some(Ok(output)) => JobResult {
                // killed by a signal: report it like a shell would
                exit_code: output.status.code().unwrap_or(128),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                execution_time_ms,
            },
            Some(Err(e)) => {
                tracing::error!(job_id = %job_id, error = %e, "Job execution failed");
                JobResult {
                    exit_code: LAUNCH_FAILURE_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("failed to start docker: {}", e),
                    execution_time_ms,
                }
            }
            None => {
                tracing::warn!(job_id = %job_id, "Job timed out");
                JobResult {
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("job timed out after {} ms", execution_time_ms),
                    execution_time_ms,
                }
            }
        };

        tracing::info!(job_id = %job_id, exit_code = result.exit_code, execution_time_ms, "Job finished");
        result
    }
}
