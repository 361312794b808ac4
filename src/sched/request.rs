// src/sched/request.rs

//! Batch-job requests.
//!
//! A [`JobRequest`] is the concrete submission for one phase node: the job
//! name, the scheduler resource parameters for that phase, the dependency
//! list, and a rendered batch script wrapping the external training binary's
//! CLI contract. Scripts are written under `<itr_dir>/jobs/` so that a
//! restart without `--overwrite` can resubmit the previously generated file
//! without touching existing outputs.
//!
//! Dependencies are deliberately *not* baked into the script; they are
//! passed at submission time, so a resubmitted script picks up fresh
//! upstream job ids.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::config::RunContext;
use crate::config::metadata::{GenomeInputs, Trio};
use crate::dag::NodeKey;
use crate::engine::Iteration;
use crate::errors::{Result, RetrioError};
use crate::types::{GenomeRole, JobId, Phase};

/// A concrete batch-job request for one phase node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub node: NodeKey,
    pub job_name: String,
    /// Scheduler parameters for this phase, rendered as `#SBATCH` directives.
    pub resources: BTreeMap<String, String>,
    /// Upstream jobs this one must wait for (`afterok`).
    pub dependencies: Vec<JobId>,
    pub script_path: PathBuf,
    pub log_path: PathBuf,
    pub command: Vec<String>,
}

impl JobRequest {
    /// Render the batch script for this request.
    pub fn render_script(&self) -> String {
        let mut script = String::from("#!/bin/bash\n");
        script.push_str(&format!("#SBATCH --job-name={}\n", self.job_name));
        script.push_str(&format!("#SBATCH --output={}\n", self.log_path.display()));
        for (key, value) in &self.resources {
            script.push_str(&format!("#SBATCH --{key}={value}\n"));
        }
        script.push_str("\nset -euo pipefail\n\n");
        script.push_str("exec");
        for arg in &self.command {
            script.push(' ');
            script.push_str(&shell_quote(arg));
        }
        script.push('\n');
        script
    }

    /// Write the script to its path, creating parent directories.
    pub fn write_script(&self) -> Result<()> {
        if let Some(dir) = self.script_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating job script directory {dir:?}"))?;
        }
        fs::write(&self.script_path, self.render_script())
            .with_context(|| format!("writing job script {:?}", self.script_path))?;
        Ok(())
    }

    /// One-block human-readable description for `--dry-run` output.
    pub fn describe(&self) -> String {
        let mut out = format!("  - {}\n", self.node);
        out.push_str(&format!("      job-name: {}\n", self.job_name));
        if !self.dependencies.is_empty() {
            let deps = self
                .dependencies
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&format!("      afterok: {deps}\n"));
        }
        for (key, value) in &self.resources {
            out.push_str(&format!("      {key}: {value}\n"));
        }
        out.push_str(&format!("      script: {}\n", self.script_path.display()));
        out.push_str(&format!("      cmd: {}\n", self.command.join(" ")));
        out
    }
}

/// Build the request for one phase node of an iteration.
///
/// `resources` is the validated parameter map for the node's phase;
/// `dependencies` are the unsatisfied upstream job ids at submission time.
pub fn build_request(
    ctx: &RunContext,
    trainer: &str,
    itr: &Iteration<'_>,
    node: &NodeKey,
    resources: &BTreeMap<String, String>,
    dependencies: Vec<JobId>,
) -> Result<JobRequest> {
    let trio = itr.trio;
    let slug = node.slug();
    let job_name = format!("{}-{}-{}", trio.name, itr.parent, slug);
    let script_path = ctx.jobs_dir(trio, itr.parent).join(format!("{slug}.sbatch"));
    let log_path = ctx.logs_dir(trio, itr.parent).join(format!("{slug}.out"));
    let command = phase_command(ctx, trainer, itr, node)?;

    Ok(JobRequest {
        node: *node,
        job_name,
        resources: resources.clone(),
        dependencies,
        script_path,
        log_path,
        command,
    })
}

/// The external binary's CLI contract, one subcommand per phase.
///
/// The binary itself is an opaque collaborator; the orchestrator only
/// guarantees the argument shapes below stay in sync with it.
fn phase_command(
    ctx: &RunContext,
    trainer: &str,
    itr: &Iteration<'_>,
    node: &NodeKey,
) -> Result<Vec<String>> {
    let trio = itr.trio;
    let parent = itr.parent;
    let itr_dir = ctx.itr_dir(trio, parent);
    let train_dir = ctx.train_dir(trio, parent);
    let parent_genome = parent_inputs(trio, parent.role());

    let arg = |p: PathBuf| p.display().to_string();

    let mut cmd = match node.phase {
        Phase::MakeExamples => {
            let region = expect_index(node)?;
            let mut cmd = vec![
                trainer.to_string(),
                "make-examples".to_string(),
                "--reads".into(),
                arg(parent_genome.reads.clone()),
                "--ref".into(),
                arg(trio.reference.clone()),
                "--truth".into(),
                arg(parent_genome.truth_vcf.clone()),
                "--callable".into(),
                arg(parent_genome.callable_bed.clone()),
                "--region-shard".into(),
                region.to_string(),
                "--out".into(),
                arg(itr_dir.join("examples").join(format!("region{region}"))),
            ];
            if let Some(ref pop) = trio.pop_vcf {
                cmd.push("--pop-vcf".into());
                cmd.push(arg(pop.clone()));
            }
            if let Some(ref regions) = trio.regions_file {
                cmd.push("--regions".into());
                cmd.push(arg(regions.clone()));
            }
            cmd
        }
        Phase::Shuffle => {
            // Per-region in-memory shuffle: each shard fits one node's memory.
            let region = expect_index(node)?;
            vec![
                trainer.to_string(),
                "shuffle-examples".to_string(),
                "--input".into(),
                arg(itr_dir.join("examples").join(format!("region{region}"))),
                "--out".into(),
                arg(itr_dir.join("shuffled").join(format!("region{region}"))),
            ]
        }
        Phase::ReShuffle => vec![
            trainer.to_string(),
            "merge-examples".to_string(),
            "--input".into(),
            arg(itr_dir.join("shuffled")),
            "--out".into(),
            arg(itr_dir.join("merged")),
        ],
        Phase::TrainEval => {
            let mut cmd = vec![
                trainer.to_string(),
                "train".to_string(),
                "--examples".into(),
                arg(itr_dir.join("merged")),
            ];
            if let Some(prior) = itr.prior_parent() {
                // Merged examples of the other parent, from the prior iteration.
                cmd.push("--examples".into());
                cmd.push(arg(ctx.itr_dir(trio, prior).join("merged")));
                cmd.push("--warm-start-file".into());
                cmd.push(arg(ctx.selected_ckpt_path(trio, prior)));
            } else if let Some(ref ckpt) = ctx.warm_start {
                cmd.push("--warm-start".into());
                cmd.push(arg(ckpt.clone()));
            }
            cmd.extend([
                "--eval-reads".into(),
                arg(trio.child.reads.clone()),
                "--eval-truth".into(),
                arg(trio.child.truth_vcf.clone()),
                "--out".into(),
                arg(train_dir.clone()),
                "--metrics".into(),
                arg(ctx.eval_metrics_path(trio, parent)),
            ]);
            cmd
        }
        // Checkpoint selection is this orchestrator's own subcommand, run on
        // a compute node once eval metrics exist.
        Phase::SelectCkpt => vec![
            "retrio".to_string(),
            "select-ckpt".to_string(),
            "--metrics".into(),
            arg(ctx.eval_metrics_path(trio, parent)),
            "--out".into(),
            arg(ctx.selected_ckpt_path(trio, parent)),
        ],
        Phase::CallVariants => {
            let t = expect_index(node)?;
            let test = test_inputs(trio, t)?;
            vec![
                trainer.to_string(),
                "call".to_string(),
                "--ckpt-file".into(),
                arg(ctx.selected_ckpt_path(trio, parent)),
                "--reads".into(),
                arg(test.reads.clone()),
                "--ref".into(),
                arg(trio.reference.clone()),
                "--out".into(),
                arg(itr_dir.join(format!("test{t}")).join("calls.vcf.gz")),
            ]
        }
        Phase::Compare => {
            let t = expect_index(node)?;
            let test = test_inputs(trio, t)?;
            vec![
                trainer.to_string(),
                "compare".to_string(),
                "--calls".into(),
                arg(itr_dir.join(format!("test{t}")).join("calls.vcf.gz")),
                "--truth".into(),
                arg(test.truth_vcf.clone()),
                "--callable".into(),
                arg(test.callable_bed.clone()),
                "--out".into(),
                arg(itr_dir.join(format!("test{t}")).join("compare")),
            ]
        }
        Phase::Convert => {
            let t = expect_index(node)?;
            vec![
                trainer.to_string(),
                "convert".to_string(),
                "--input".into(),
                arg(itr_dir.join(format!("test{t}")).join("compare")),
                "--out".into(),
                arg(itr_dir.join(format!("test{t}")).join("metrics.csv")),
            ]
        }
        Phase::ShowExamples => {
            let region = expect_index(node)?;
            vec![
                trainer.to_string(),
                "show-examples".to_string(),
                "--input".into(),
                arg(itr_dir.join("examples").join(format!("region{region}"))),
                "--out".into(),
                arg(itr_dir.join("show").join(format!("region{region}"))),
            ]
        }
        Phase::EvalSummary => vec![
            trainer.to_string(),
            "eval-summary".to_string(),
            "--metrics".into(),
            arg(ctx.eval_metrics_path(trio, parent)),
            "--out".into(),
            arg(train_dir.join("eval_summary.txt")),
        ],
        Phase::BenchmarkSummary => vec![
            trainer.to_string(),
            "benchmark-summary".to_string(),
            "--input".into(),
            arg(itr_dir.clone()),
            "--out".into(),
            arg(ctx.run_dir(trio).join("benchmark_summary.csv")),
        ],
    };

    // Regenerated requests replace prior result files; the trainer honours
    // the same flag across its subcommands.
    if ctx.overwrite && cmd[0] != "retrio" {
        cmd.push("--overwrite".into());
    }

    Ok(cmd)
}

fn parent_inputs(trio: &Trio, role: GenomeRole) -> &GenomeInputs {
    match role {
        GenomeRole::Father => &trio.father,
        GenomeRole::Mother => &trio.mother,
        // The builder only scopes region phases to parents.
        GenomeRole::Child | GenomeRole::Test(_) => &trio.child,
    }
}

fn test_inputs(trio: &Trio, test: u32) -> Result<&GenomeInputs> {
    trio.tests.get((test - 1) as usize).ok_or_else(|| {
        RetrioError::Config(format!(
            "node references test genome {test} but trio {:?} declares {}",
            trio.name,
            trio.tests.len()
        ))
    })
}

fn expect_index(node: &NodeKey) -> Result<u32> {
    node.index.ok_or_else(|| {
        RetrioError::Config(format!("phase node {} is missing its fan-out index", node))
    })
}

fn shell_quote(arg: &str) -> String {
    if arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Parent;
    use retrio_test_utils::builders::{TrioBuilder, test_context};

    #[test]
    fn script_carries_resources_and_command() {
        let trio = TrioBuilder::new("run-a").tests(1).build();
        let ctx = test_context("/out");
        let itr = Iteration::first(&trio, Parent::Father);
        let node = NodeKey::region(Phase::MakeExamples, GenomeRole::Father, 2);

        let mut resources = BTreeMap::new();
        resources.insert("mem".to_string(), "200G".to_string());
        resources.insert("partition".to_string(), "compute".to_string());

        let req = build_request(&ctx, "deeptrainer", &itr, &node, &resources, vec![JobId(5)])
            .unwrap();
        let script = req.render_script();

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=run-a-Father-make_examples-Father-2"));
        assert!(script.contains("#SBATCH --mem=200G"));
        assert!(script.contains("#SBATCH --partition=compute"));
        assert!(script.contains("exec deeptrainer make-examples"));
        assert!(script.contains("--region-shard 2"));
        // Dependencies are submit-time flags, never baked into the script.
        assert!(!script.contains("afterok"));
    }

    #[test]
    fn second_iteration_training_warm_starts_from_selected_ckpt() {
        let trio = TrioBuilder::new("run-a").tests(1).build();
        let ctx = test_context("/out");
        let second = Iteration::first(&trio, Parent::Father).next().unwrap();
        let node = NodeKey::single(Phase::TrainEval, Some(GenomeRole::Mother));

        let req =
            build_request(&ctx, "deeptrainer", &second, &node, &BTreeMap::new(), vec![])
                .unwrap();
        let cmd = req.command.join(" ");
        assert!(cmd.contains("/out/run-a/Father/train/selected_ckpt.txt"));
        assert!(cmd.contains("/out/run-a/Father/merged"));
        assert!(cmd.contains("/out/run-a/Mother/merged"));
    }

    #[test]
    fn select_ckpt_runs_the_orchestrator_itself() {
        let trio = TrioBuilder::new("run-a").tests(1).build();
        let ctx = test_context("/out");
        let itr = Iteration::first(&trio, Parent::Mother);
        let node = NodeKey::single(Phase::SelectCkpt, Some(GenomeRole::Child));

        let req =
            build_request(&ctx, "deeptrainer", &itr, &node, &BTreeMap::new(), vec![]).unwrap();
        assert_eq!(req.command[0], "retrio");
        assert_eq!(req.command[1], "select-ckpt");
    }
}
