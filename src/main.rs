use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use fleetsched::cluster::{BestFitSelector, Node, NodeRegistry};
use fleetsched::config::{RemoteConfig, SandboxConfig, SchedulerConfig};
use fleetsched::error::SchedulerError;
use fleetsched::metrics::JobCounters;
use fleetsched::remote::SshHandleFactory;
use fleetsched::scheduler::job::DEFAULT_MAX_RETRIES;
use fleetsched::scheduler::policy::DependencyFailurePolicy;
use fleetsched::scheduler::{Job, ResourceRequirements, Scheduler};
use fleetsched::shutdown::install_shutdown_handler;
use fleetsched::worker::{self, JobExecutor};

#[derive(Parser, Debug)]
#[command(name = "fleetsched")]
#[command(version)]
#[command(about = "Priority and dependency aware job scheduler for a small compute cluster")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Schedule a batch of jobs onto a static list of worker nodes
    Master(MasterArgs),

    /// Worker entry point: run one job given as a JSON argument
    ExecuteJob {
        /// The job, JSON encoded
        payload: Option<String>,

        /// Give the job container network access
        #[arg(long)]
        allow_network: bool,
    },
}

// =============================================================================
// Master Arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct MasterArgs {
    /// JSON file with the worker nodes (array of nodes)
    #[arg(long)]
    nodes: PathBuf,

    /// JSON file with the jobs to run (array of submissions)
    #[arg(long)]
    jobs: PathBuf,

    /// Maximum concurrently running dispatches
    #[arg(long, default_value = "64")]
    max_in_flight: usize,

    /// Directory with per-node private keys (<node_id>_id_rsa)
    #[arg(long, default_value = "keys")]
    key_dir: PathBuf,

    /// Command that runs a job on the worker
    #[arg(long, default_value = "fleetsched execute-job")]
    entry_point: String,

    /// Cancel jobs whose dependencies failed or were cancelled
    #[arg(long)]
    cancel_dependents: bool,

    /// Scheduler back-off interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Output format for the final job report
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Input Types
// =============================================================================

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// One job in the jobs file. Dependencies name other jobs in the same file
/// or give a job id.
#[derive(Debug, Deserialize)]
struct JobSubmission {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    command: String,
    #[serde(default)]
    resource_requirements: ResourceRequirements,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
}

fn build_jobs(submissions: Vec<JobSubmission>) -> Result<Vec<Job>, SchedulerError> {
    let mut ids: HashMap<String, Uuid> = HashMap::with_capacity(submissions.len());
    let mut seen = HashSet::with_capacity(submissions.len());
    for s in &submissions {
        let id = s.id.unwrap_or_else(Uuid::new_v4);
        if !seen.insert(id) {
            return Err(SchedulerError::Internal(format!(
                "duplicate job id in jobs file: {}",
                id
            )));
        }
        if ids.insert(s.name.clone(), id).is_some() {
            return Err(SchedulerError::Internal(format!(
                "duplicate job name in jobs file: {}",
                s.name
            )));
        }
    }

    let mut jobs = Vec::with_capacity(submissions.len());
    for s in submissions {
        let dependencies = s
            .dependencies
            .iter()
            .map(|dep| {
                ids.get(dep)
                    .copied()
                    .or_else(|| Uuid::parse_str(dep).ok())
                    .ok_or_else(|| SchedulerError::JobNotFound(dep.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let id = ids
            .get(&s.name)
            .copied()
            .ok_or_else(|| SchedulerError::JobNotFound(s.name.clone()))?;
        jobs.push(
            Job::with_id(id, s.name, s.command)
                .with_requirements(s.resource_requirements)
                .with_priority(s.priority)
                .with_dependencies(dependencies)
                .with_max_retries(s.max_retries),
        );
    }
    Ok(jobs)
}

// =============================================================================
// Master Implementation
// =============================================================================

async fn run_master(args: MasterArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let nodes: Vec<Node> = serde_json::from_str(&tokio::fs::read_to_string(&args.nodes).await?)?;
    let submissions: Vec<JobSubmission> =
        serde_json::from_str(&tokio::fs::read_to_string(&args.jobs).await?)?;
    let jobs = build_jobs(submissions)?;

    let membership = Arc::new(NodeRegistry::new());
    for node in nodes {
        membership.register(node);
    }
    if membership.is_empty() {
        tracing::warn!("No worker nodes configured, jobs will stay queued");
    }

    let remote = RemoteConfig {
        worker_entry_point: args.entry_point,
        key_dir: args.key_dir,
        ..Default::default()
    };
    let dependency_failure = if args.cancel_dependents {
        DependencyFailurePolicy::CancelDependents
    } else {
        DependencyFailurePolicy::Park
    };
    let config = SchedulerConfig::default()
        .with_poll_interval_ms(args.poll_interval_ms)
        .with_max_in_flight(args.max_in_flight)
        .with_dependency_failure(dependency_failure)
        .with_remote(remote.clone());

    let counters = Arc::new(JobCounters::new());
    let scheduler = Scheduler::new(
        config,
        membership,
        Arc::new(BestFitSelector::new()),
        Arc::new(SshHandleFactory::new(remote)),
        counters.clone(),
    );

    for job in jobs {
        scheduler.submit(job).await;
    }

    let shutdown = install_shutdown_handler();
    scheduler.start();

    let mut progress = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = progress.tick() => {
                if scheduler.all_terminal().await {
                    break;
                }
            }
        }
    }
    scheduler.stop().await;

    let jobs = scheduler.list().await;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => {
            println!(
                "{:<36}  {:<20}  {:<10}  {:<12}  {:<7}  EXIT",
                "JOB ID", "NAME", "STATUS", "NODE", "RETRIES"
            );
            for job in &jobs {
                let node = job
                    .assigned_node
                    .as_deref()
                    .or(job.executed_on.as_deref())
                    .unwrap_or("-");
                let exit = job
                    .result
                    .as_ref()
                    .map(|r| r.exit_code.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<36}  {:<20}  {:<10}  {:<12}  {:<7}  {}",
                    job.id,
                    truncate(&job.name, 20),
                    job.status,
                    truncate(node, 12),
                    format!("{}/{}", job.retry_count, job.max_retries),
                    exit
                );
            }
            println!(
                "\n{} completed, {} failed, {} total",
                counters.completed(),
                counters.failed(),
                jobs.len()
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

// =============================================================================
// Worker Implementation
// =============================================================================

async fn run_execute_job(payload: Option<String>, allow_network: bool) -> i32 {
    // stdout carries the result object; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let executor = JobExecutor::new(SandboxConfig {
        network_disabled: !allow_network,
        ..Default::default()
    });
    let outcome = worker::execute_job(payload.as_deref(), &executor).await;

    if let Some(line) = outcome.stdout_line() {
        println!("{}", line);
    }
    if let Some(line) = outcome.stderr_line() {
        eprintln!("{}", line);
    }
    outcome.exit_code()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Master(master) => run_master(master).await,
        Commands::ExecuteJob {
            payload,
            allow_network,
        } => {
            let code = run_execute_job(payload, allow_network).await;
            std::process::exit(code);
        }
    }
}
