// src/sched/backend.rs

//! Pluggable scheduler backend abstraction.
//!
//! The controller talks to a [`SchedulerBackend`] instead of shelling out
//! directly. Production uses [`SbatchBackend`], which wraps the cluster's
//! `sbatch`/`sacct` CLI; tests use the fake backend from
//! `retrio-test-utils`, which records requests and hands out scripted ids.

use std::process::Command;

use regex::Regex;
use tracing::{debug, warn};

use crate::errors::{Result, RetrioError};
use crate::sched::request::JobRequest;
use crate::types::{JobId, JobStatus};

/// Trait abstracting the external batch scheduler.
pub trait SchedulerBackend {
    /// Submit one job and return the scheduler-assigned id.
    ///
    /// A rejection (bad resource spec) is fatal for the calling branch and
    /// is surfaced immediately, never retried.
    fn submit(&mut self, request: &JobRequest) -> Result<JobId>;

    /// Observe a job's current state, `None` when the scheduler no longer
    /// knows the id.
    fn poll(&mut self, job: JobId) -> Result<Option<JobStatus>>;
}

/// Production backend wrapping the `sbatch` / `sacct` CLI.
pub struct SbatchBackend {
    submit_bin: String,
    poll_bin: String,
    id_pattern: Regex,
}

impl SbatchBackend {
    pub fn new() -> Self {
        Self {
            submit_bin: "sbatch".to_string(),
            poll_bin: "sacct".to_string(),
            // sbatch prints "Submitted batch job <id>" on success.
            id_pattern: Regex::new(r"Submitted batch job (\d+)")
                .expect("static regex is valid"),
        }
    }
}

impl Default for SbatchBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBackend for SbatchBackend {
    fn submit(&mut self, request: &JobRequest) -> Result<JobId> {
        let mut cmd = Command::new(&self.submit_bin);
        if !request.dependencies.is_empty() {
            let deps = request
                .dependencies
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(":");
            cmd.arg(format!("--dependency=afterok:{deps}"));
        }
        cmd.arg(&request.script_path);

        let output = cmd.output().map_err(|e| {
            RetrioError::Submission(format!("failed to invoke {}: {e}", self.submit_bin))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RetrioError::Submission(format!(
                "{} rejected {}: {}",
                self.submit_bin,
                request.job_name,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = self
            .id_pattern
            .captures(&stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .ok_or_else(|| {
                RetrioError::Submission(format!(
                    "could not parse job id from scheduler output: {stdout:?}"
                ))
            })?;

        debug!(job = %request.job_name, id, "submitted batch job");
        Ok(JobId(id))
    }

    fn poll(&mut self, job: JobId) -> Result<Option<JobStatus>> {
        let output = Command::new(&self.poll_bin)
            .args(["-j", &job.to_string(), "-n", "-X", "-o", "State"])
            .output()
            .map_err(|e| {
                RetrioError::Submission(format!("failed to invoke {}: {e}", self.poll_bin))
            })?;

        if !output.status.success() {
            warn!(job = %job, "scheduler poll failed");
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_scheduler_state(&stdout))
    }
}

/// Map a scheduler state word onto the ledger's job status.
///
/// States like `CANCELLED by 1234` carry a suffix; only the first word
/// counts.
pub fn parse_scheduler_state(raw: &str) -> Option<JobStatus> {
    let word = raw.split_whitespace().next()?;
    // Slurm suffixes requeued/cancelled states with '+'.
    let word = word.trim_end_matches('+');
    match word {
        "PENDING" | "REQUEUED" | "RESIZING" => Some(JobStatus::Submitted),
        "RUNNING" | "COMPLETING" | "SUSPENDED" => Some(JobStatus::Running),
        "COMPLETED" => Some(JobStatus::Succeeded),
        "FAILED" | "CANCELLED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "PREEMPTED"
        | "BOOT_FAIL" | "DEADLINE" => Some(JobStatus::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_states_map_onto_job_statuses() {
        assert_eq!(parse_scheduler_state("PENDING"), Some(JobStatus::Submitted));
        assert_eq!(parse_scheduler_state("RUNNING"), Some(JobStatus::Running));
        assert_eq!(
            parse_scheduler_state("COMPLETED"),
            Some(JobStatus::Succeeded)
        );
        assert_eq!(
            parse_scheduler_state("OUT_OF_MEMORY"),
            Some(JobStatus::Failed)
        );
        assert_eq!(
            parse_scheduler_state("CANCELLED+ by 1234"),
            Some(JobStatus::Failed)
        );
        assert_eq!(parse_scheduler_state(""), None);
        assert_eq!(parse_scheduler_state("MYSTERY"), None);
    }
}
