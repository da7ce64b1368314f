//! Worker-side entry point.
//!
//! The master runs `fleetsched execute-job '<json>'` on the worker over SSH.
//! This module turns that invocation into a container run:
//!
//! 1. [`parse_payload`] decodes the single JSON argument into a [`WireJob`]
//! 2. [`JobExecutor::execute`] runs it with `docker run`
//! 3. The caller prints [`EntryOutcome::stdout_line`] as the last line of
//!    stdout and exits with [`EntryOutcome::exit_code`]
//!
//! A payload that cannot be parsed produces a JSON error object on stderr and
//! exit code [`PAYLOAD_ERROR_EXIT_CODE`] without running anything.

pub mod executor;

use serde_json::json;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{JobResult, WireJob};

pub use executor::JobExecutor;

/// Exit code for a missing or malformed job argument
pub const PAYLOAD_ERROR_EXIT_CODE: i32 = 2;

pub fn parse_payload(payload: &str) -> Result<WireJob> {
    serde_json::from_str(payload).map_err(SchedulerError::from)
}

/// What the entry point reports back to the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Executed(JobResult),
    InvalidPayload(String),
}

impl EntryOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            EntryOutcome::Executed(result) => result.exit_code,
            EntryOutcome::InvalidPayload(_) => PAYLOAD_ERROR_EXIT_CODE,
        }
    }

    /// Result object to print as the final stdout line
    pub fn stdout_line(&self) -> Option<String> {
        match self {
            EntryOutcome::Executed(result) => serde_json::to_string(result).ok(),
            EntryOutcome::InvalidPayload(_) => None,
        }
    }

    /// Error object to print on stderr
    pub fn stderr_line(&self) -> Option<String> {
        match self {
            EntryOutcome::Executed(_) => None,
            EntryOutcome::InvalidPayload(message) => Some(json!({ "error": message }).to_string()),
        }
    }
}

/// Parse `payload` and, if valid, execute the job
pub async fn execute_job(payload: Option<&str>, executor: &JobExecutor) -> EntryOutcome {
    let Some(payload) = payload else {
        return EntryOutcome::InvalidPayload("missing job payload argument".to_string());
    };

    match parse_payload(payload) {
        Ok(job) => EntryOutcome::Executed(executor.execute(&job).await),
        Err(e) => EntryOutcome::InvalidPayload(e.to_string()),
    }
}
