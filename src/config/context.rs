// src/config/context.rs

//! The immutable per-invocation context.
//!
//! One `RunContext` is built from the CLI at startup and threaded explicitly
//! through every component; its lifecycle is exactly one orchestrator
//! invocation. Nothing in the crate keeps process-wide mutable state.

use std::path::PathBuf;

use crate::config::metadata::{Trio, count_bed_intervals};
use crate::errors::Result;
use crate::types::Parent;

#[derive(Debug, Clone)]
pub struct RunContext {
    /// Root directory for all run outputs.
    pub output_root: PathBuf,
    /// Parent genome trained in the first iteration.
    pub starting_parent: Parent,
    /// First iteration to process (1-based).
    pub start_itr: u32,
    /// Last iteration to process (inclusive).
    pub stop_itr: u32,
    /// Warm-start checkpoint for the first iteration, when re-training from
    /// an existing model rather than the training binary's default weights.
    pub warm_start: Option<PathBuf>,
    /// Region fan-out override from the CLI.
    pub num_regions: Option<u32>,
    /// Regenerate job scripts and replace prior result files on restart.
    pub overwrite: bool,
    /// Plan and print, but never submit or touch the ledger.
    pub dry_run: bool,
}

impl RunContext {
    /// Per-trio output directory.
    pub fn run_dir(&self, trio: &Trio) -> PathBuf {
        self.output_root.join(&trio.name)
    }

    /// Per-iteration output directory, named by the parent being trained.
    pub fn itr_dir(&self, trio: &Trio, parent: Parent) -> PathBuf {
        self.run_dir(trio).join(parent.to_string())
    }

    /// Where generated batch scripts for one iteration live.
    pub fn jobs_dir(&self, trio: &Trio, parent: Parent) -> PathBuf {
        self.itr_dir(trio, parent).join("jobs")
    }

    /// Where per-job scheduler logs for one iteration live.
    pub fn logs_dir(&self, trio: &Trio, parent: Parent) -> PathBuf {
        self.itr_dir(trio, parent).join("logs")
    }

    /// Training output directory (checkpoints, eval metrics).
    pub fn train_dir(&self, trio: &Trio, parent: Parent) -> PathBuf {
        self.itr_dir(trio, parent).join("train")
    }

    /// Eval metrics CSV written by the train+eval phase.
    pub fn eval_metrics_path(&self, trio: &Trio, parent: Parent) -> PathBuf {
        self.train_dir(trio, parent).join("eval_metrics.csv")
    }

    /// File the select-ckpt phase writes the winning checkpoint path to.
    ///
    /// Downstream jobs (next-iteration training, call_variants) read this at
    /// runtime, so the orchestrator never needs to know the path itself.
    pub fn selected_ckpt_path(&self, trio: &Trio, parent: Parent) -> PathBuf {
        self.train_dir(trio, parent).join("selected_ckpt.txt")
    }

    /// Append-only job event log for one trio (the durable ledger).
    pub fn ledger_log_path(&self, trio: &Trio) -> PathBuf {
        self.run_dir(trio).join("jobs.csv")
    }

    /// User-facing per-phase summary artifact for one trio.
    pub fn ledger_summary_path(&self, trio: &Trio) -> PathBuf {
        self.run_dir(trio).join("job_ledger.csv")
    }

    /// Parent trained in the given 1-based iteration.
    pub fn parent_for_itr(&self, itr: u32) -> Parent {
        if itr % 2 == 1 {
            self.starting_parent
        } else {
            self.starting_parent.other()
        }
    }

    /// Region fan-out for a trio: CLI override, else the trio's region file
    /// interval count, else one region per available CPU.
    pub fn regions_for(&self, trio: &Trio) -> Result<u32> {
        if let Some(n) = self.num_regions {
            return Ok(n);
        }
        if let Some(ref bed) = trio.regions_file {
            return count_bed_intervals(bed);
        }
        Ok(default_region_count())
    }
}

fn default_region_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_alternates_by_iteration() {
        let ctx = RunContext {
            output_root: PathBuf::from("/out"),
            starting_parent: Parent::Mother,
            start_itr: 1,
            stop_itr: 2,
            warm_start: None,
            num_regions: None,
            overwrite: false,
            dry_run: false,
        };
        assert_eq!(ctx.parent_for_itr(1), Parent::Mother);
        assert_eq!(ctx.parent_for_itr(2), Parent::Father);
    }
}
