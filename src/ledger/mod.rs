// src/ledger/mod.rs

//! The job ledger: a durable, append-only record of every submitted job.
//!
//! In memory the ledger maps `(parent, node key)` to the job history for
//! that key, most recent last. On disk it is an append-only CSV event log
//! (`jobs.csv` under the trio's output directory) replayed on every
//! invocation, so the orchestrator can be re-run for hours-long pipelines
//! without losing track of what was already submitted.
//!
//! Jobs are never deleted. A resubmission appends a new record with a higher
//! attempt count; superseded records stay in the history. Every write is
//! keyed uniquely by `(parent, phase, genome, index)`, so independent
//! branches never contend on a key.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use tracing::{debug, warn};

use crate::dag::NodeKey;
use crate::errors::{Result, RetrioError};
use crate::types::{GenomeRole, JobId, JobStatus, Parent, Phase};

const LOG_HEADER: &str = "RunName,Parent,Phase,Genome,Index,JobID,Status,Attempt,Event";
const SUMMARY_HEADER: &str = "AnalysisName,RunName,Parent,Phase,JobList";

/// One job as tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    /// 1-based attempt count for this ledger key.
    pub attempt: u32,
}

/// Ledger key within one trio: the iteration (by parent) plus node identity.
pub type LedgerKey = (Parent, NodeKey);

/// Append-only job store for one trio.
#[derive(Debug)]
pub struct JobLedger {
    run_name: String,
    log_path: PathBuf,
    records: BTreeMap<LedgerKey, Vec<JobRecord>>,
}

impl JobLedger {
    /// Load the ledger for a trio, replaying the on-disk event log if it
    /// exists. A missing log means a fresh ledger.
    pub fn load(log_path: impl Into<PathBuf>, run_name: impl Into<String>) -> Result<Self> {
        let log_path = log_path.into();
        let run_name = run_name.into();
        let mut ledger = Self {
            run_name,
            log_path,
            records: BTreeMap::new(),
        };

        if ledger.log_path.exists() {
            ledger.replay()?;
        }
        Ok(ledger)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Most recent job for a key, if any.
    pub fn latest(&self, parent: Parent, key: &NodeKey) -> Option<&JobRecord> {
        self.records.get(&(parent, *key)).and_then(|v| v.last())
    }

    /// Full (append-only) history for a key.
    pub fn history(&self, parent: Parent, key: &NodeKey) -> &[JobRecord] {
        self.records
            .get(&(parent, *key))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Does a live job (anything but `Failed`) already exist for this key?
    ///
    /// Used to avoid duplicate submission on re-invocation.
    pub fn has_live_job(&self, parent: Parent, key: &NodeKey) -> bool {
        self.latest(parent, key)
            .is_some_and(|rec| rec.status.is_live())
    }

    /// Iterate all keys with their most recent record.
    pub fn iter_latest(&self) -> impl Iterator<Item = (&LedgerKey, &JobRecord)> {
        self.records
            .iter()
            .filter_map(|(k, v)| v.last().map(|rec| (k, rec)))
    }

    /// Record a newly submitted job for a key. Appends to the event log and
    /// returns the stored record.
    pub fn record(&mut self, parent: Parent, key: NodeKey, job_id: JobId) -> Result<JobRecord> {
        self.record_with_status(parent, key, job_id, JobStatus::Submitted)
    }

    /// Record a job the user declared as already running on the scheduler
    /// (restart-spec external job ids). Never resubmitted; downstream
    /// dependency checks treat it like any other tracked job.
    pub fn record_running(
        &mut self,
        parent: Parent,
        key: NodeKey,
        job_id: JobId,
    ) -> Result<JobRecord> {
        self.record_with_status(parent, key, job_id, JobStatus::Running)
    }

    fn record_with_status(
        &mut self,
        parent: Parent,
        key: NodeKey,
        job_id: JobId,
        status: JobStatus,
    ) -> Result<JobRecord> {
        let attempt = self.history(parent, &key).len() as u32 + 1;
        let record = JobRecord {
            job_id,
            status,
            attempt,
        };

        self.append_event(parent, &key, &record, "record")?;
        self.records.entry((parent, key)).or_default().push(record);
        debug!(
            run = %self.run_name, parent = %parent, node = %key,
            job_id = %job_id, attempt, "ledger: recorded job"
        );
        Ok(record)
    }

    /// Update the status of the most recent job for a key (from an external
    /// poll or log signal).
    pub fn update_status(
        &mut self,
        parent: Parent,
        key: &NodeKey,
        status: JobStatus,
    ) -> Result<()> {
        let Some(history) = self.records.get_mut(&(parent, *key)) else {
            return Err(RetrioError::Ledger(format!(
                "no job recorded for {parent}/{key}"
            )));
        };
        let record = history.last_mut().expect("history entries are never empty");
        if record.status == status {
            return Ok(());
        }
        record.status = status;

        let snapshot = *record;
        self.append_event(parent, key, &snapshot, "status")?;
        debug!(
            run = %self.run_name, parent = %parent, node = %key,
            status = %status, "ledger: status updated"
        );
        Ok(())
    }

    /// Refresh every non-terminal job through a poll function
    /// (`job id → observed status`). Unknown jobs are left untouched.
    pub fn refresh_with<F>(&mut self, mut poll: F) -> Result<u32>
    where
        F: FnMut(JobId) -> Option<JobStatus>,
    {
        let stale: Vec<(LedgerKey, JobId)> = self
            .iter_latest()
            .filter(|(_, rec)| !rec.status.is_terminal())
            .map(|(k, rec)| (*k, rec.job_id))
            .collect();

        let mut updated = 0;
        for ((parent, key), job_id) in stale {
            match poll(job_id) {
                Some(status) => {
                    let prior = self.latest(parent, &key).map(|r| r.status);
                    if prior != Some(status) {
                        self.update_status(parent, &key, status)?;
                        updated += 1;
                    }
                }
                None => {
                    warn!(job_id = %job_id, node = %key, "poll returned no state for job");
                }
            }
        }
        Ok(updated)
    }

    /// Append the per-iteration summary artifact: one row per phase with the
    /// ordered job list of the latest attempts.
    pub fn write_summary(
        &self,
        summary_path: &Path,
        analysis_name: &str,
        parent: Parent,
    ) -> Result<()> {
        let mut rows: BTreeMap<Phase, Vec<JobId>> = BTreeMap::new();
        for ((p, key), rec) in self.iter_latest() {
            if *p == parent {
                rows.entry(key.phase).or_default().push(rec.job_id);
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut file = open_append(summary_path, SUMMARY_HEADER)?;
        for (phase, jobs) in rows {
            let job_list = jobs
                .iter()
                .map(|j| j.to_string())
                .collect::<Vec<_>>()
                .join(";");
            writeln!(
                file,
                "{analysis_name},{run},{parent},{phase},{job_list}",
                run = self.run_name
            )
            .map_err(RetrioError::Io)?;
        }
        Ok(())
    }

    fn append_event(&self, parent: Parent, key: &NodeKey, rec: &JobRecord, event: &str) -> Result<()> {
        let mut file = open_append(&self.log_path, LOG_HEADER)?;
        writeln!(
            file,
            "{run},{parent},{phase},{genome},{index},{job},{status},{attempt},{event}",
            run = self.run_name,
            phase = key.phase,
            genome = key.role.map(|r| r.to_string()).unwrap_or_default(),
            index = key.index.map(|i| i.to_string()).unwrap_or_default(),
            job = rec.job_id,
            status = rec.status,
            attempt = rec.attempt,
        )
        .map_err(RetrioError::Io)?;
        Ok(())
    }

    /// Replay the on-disk event log into memory.
    fn replay(&mut self) -> Result<()> {
        let contents = fs::read_to_string(&self.log_path)
            .with_context(|| format!("reading ledger log at {:?}", self.log_path))?;

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line == LOG_HEADER {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != 9 {
                return Err(RetrioError::Ledger(format!(
                    "malformed ledger line {} in {:?}",
                    line_no + 1,
                    self.log_path
                )));
            }

            let parent = Parent::from_str(fields[1]).map_err(RetrioError::Ledger)?;
            let phase = Phase::from_str(fields[2]).map_err(RetrioError::Ledger)?;
            let role = if fields[3].is_empty() {
                None
            } else {
                Some(GenomeRole::from_str(fields[3]).map_err(RetrioError::Ledger)?)
            };
            let index = if fields[4].is_empty() {
                None
            } else {
                Some(fields[4].parse::<u32>().map_err(|_| {
                    RetrioError::Ledger(format!("bad index in ledger line {}", line_no + 1))
                })?)
            };
            let job_id = JobId::from_str(fields[5]).map_err(RetrioError::Ledger)?;
            let status = JobStatus::from_str(fields[6]).map_err(RetrioError::Ledger)?;
            let attempt = fields[7].parse::<u32>().map_err(|_| {
                RetrioError::Ledger(format!("bad attempt in ledger line {}", line_no + 1))
            })?;

            let key = NodeKey { phase, role, index };
            let history = self.records.entry((parent, key)).or_default();
            match fields[8] {
                "record" => history.push(JobRecord {
                    job_id,
                    status,
                    attempt,
                }),
                "status" => match history.last_mut() {
                    Some(rec) if rec.job_id == job_id => rec.status = status,
                    _ => {
                        return Err(RetrioError::Ledger(format!(
                            "status event for unknown job {} at ledger line {}",
                            job_id,
                            line_no + 1
                        )));
                    }
                },
                other => {
                    return Err(RetrioError::Ledger(format!(
                        "unknown ledger event {other:?} at line {}",
                        line_no + 1
                    )));
                }
            }
        }

        debug!(path = ?self.log_path, keys = self.records.len(), "ledger replayed");
        Ok(())
    }
}

fn open_append(path: &Path, header: &str) -> Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating ledger directory {dir:?}"))?;
    }
    let fresh = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening ledger file {path:?}"))?;
    if fresh {
        writeln!(file, "{header}").map_err(RetrioError::Io)?;
    }
    Ok(file)
}
