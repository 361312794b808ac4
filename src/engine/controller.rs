// src/engine/controller.rs

//! The per-trio control loop.
//!
//! Each invocation walks trios in metadata order and, for every iteration in
//! the requested bound, builds the phase plan and submits whatever the
//! ledger does not already cover. In-iteration ordering rides on
//! scheduler-level `afterok` dependencies; cross-iteration and
//! cross-invocation ordering is gated on ledger statuses. The controller
//! then exits; re-invocation advances the pipeline.
//!
//! Submission rules per node, in plan (topological) order:
//! - a live job in the ledger is reused, never duplicated;
//! - a node named by the restart resolution is resubmitted (regenerating
//!   its script only with `--overwrite`);
//! - a node whose upstream is failed or unsubmitted is blocked and skipped,
//!   halting that branch in place without touching its siblings;
//! - a scheduler rejection aborts the iteration's remaining branch the same
//!   way, surfaced as `Aborted`.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::config::metadata::Trio;
use crate::config::{ResourceConfig, RunContext};
use crate::dag::{IterationPlan, NodeKey, build_iteration_plan};
use crate::engine::{Iteration, IterationState};
use crate::errors::{Result, RetrioError};
use crate::ledger::JobLedger;
use crate::restart::{Resolution, RestartSpec, resolve};
use crate::sched::{SchedulerBackend, build_request};
use crate::types::{JobId, JobStatus, Parent, Phase};

/// Outcome of one iteration within one invocation.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub run_name: String,
    pub itr_index: u32,
    pub parent: Parent,
    pub state: IterationState,
    pub submitted: u32,
    pub reused: u32,
    pub blocked: Vec<NodeKey>,
}

/// Everything one `run` invocation did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub iterations: Vec<IterationReport>,
}

impl RunReport {
    pub fn total_submitted(&self) -> u32 {
        self.iterations.iter().map(|i| i.submitted).sum()
    }
}

pub struct Controller<'a, B: SchedulerBackend> {
    ctx: &'a RunContext,
    resources: &'a ResourceConfig,
    /// Path or name of the external training binary.
    trainer: String,
    backend: B,
}

impl<'a, B: SchedulerBackend> Controller<'a, B> {
    pub fn new(
        ctx: &'a RunContext,
        resources: &'a ResourceConfig,
        trainer: impl Into<String>,
        backend: B,
    ) -> Self {
        Self {
            ctx,
            resources,
            trainer: trainer.into(),
            backend,
        }
    }

    /// Drive every trio through the requested iteration bound.
    pub fn run(&mut self, trios: &[Trio], restart: Option<&RestartSpec>) -> Result<RunReport> {
        if self.ctx.start_itr < 1 || self.ctx.stop_itr > 2 || self.ctx.start_itr > self.ctx.stop_itr
        {
            return Err(RetrioError::Config(format!(
                "iteration bound {}..={} is outside the two-iteration trio cycle",
                self.ctx.start_itr, self.ctx.stop_itr
            )));
        }

        let mut report = RunReport::default();
        for trio in trios {
            info!(run = %trio.name, order = trio.order, "processing trio");
            let mut ledger =
                JobLedger::load(self.ctx.ledger_log_path(trio), trio.name.clone())?;

            let mut itr = Iteration::first(trio, self.ctx.starting_parent);
            loop {
                if itr.index >= self.ctx.start_itr && itr.index <= self.ctx.stop_itr {
                    let entry = self.run_iteration(&itr, &mut ledger, restart)?;
                    report.iterations.push(entry);
                }
                match itr.next() {
                    Some(next) if next.index <= self.ctx.stop_itr => itr = next,
                    _ => break,
                }
            }
        }
        Ok(report)
    }

    fn run_iteration(
        &mut self,
        itr: &Iteration<'_>,
        ledger: &mut JobLedger,
        restart: Option<&RestartSpec>,
    ) -> Result<IterationReport> {
        let trio = itr.trio;
        let regions = self.ctx.regions_for(trio)?;
        let tests = trio.num_tests();
        let optional = self.resources.enabled_optional_phases();
        let plan = build_iteration_plan(itr, regions, tests, &optional)?;

        let resolution = match restart {
            Some(spec) => resolve(&plan, spec)?,
            None => Resolution::default(),
        };

        if self.ctx.dry_run {
            return self.dry_run_iteration(itr, &plan, &resolution);
        }

        for (node, job_id) in &resolution.adopt {
            info!(node = %node, job = %job_id, "adopting externally running job");
            ledger.record_running(itr.parent, *node, *job_id)?;
        }

        let outcome = self.submit_iteration(itr, &plan, ledger, &resolution)?;

        if outcome.submitted > 0 {
            ledger.write_summary(
                &self.ctx.ledger_summary_path(trio),
                &analysis_name(self.ctx),
                itr.parent,
            )?;
        }

        let state = if outcome.aborted {
            IterationState::Aborted
        } else {
            derive_state(&plan, ledger, itr.parent)
        };

        info!(
            run = %trio.name, itr = itr.index, parent = %itr.parent,
            submitted = outcome.submitted, reused = outcome.reused,
            blocked = outcome.blocked.len(), state = %state,
            "iteration processed"
        );

        Ok(IterationReport {
            run_name: trio.name.clone(),
            itr_index: itr.index,
            parent: itr.parent,
            state,
            submitted: outcome.submitted,
            reused: outcome.reused,
            blocked: outcome.blocked,
        })
    }

    fn submit_iteration(
        &mut self,
        itr: &Iteration<'_>,
        plan: &IterationPlan,
        ledger: &mut JobLedger,
        resolution: &Resolution,
    ) -> Result<SubmitOutcome> {
        let mut live: BTreeMap<NodeKey, JobId> = BTreeMap::new();
        let mut outcome = SubmitOutcome::default();

        for node in plan.nodes() {
            let key = node.key;
            let force = resolution.resubmit.contains(&key);

            if !force {
                if ledger.has_live_job(itr.parent, &key) {
                    let record = ledger
                        .latest(itr.parent, &key)
                        .expect("live job implies a record");
                    live.insert(key, record.job_id);
                    outcome.reused += 1;
                    continue;
                }
                if ledger.latest(itr.parent, &key).is_some() {
                    // Latest attempt failed: execution errors are never
                    // auto-retried, only an explicit restart resubmits.
                    warn!(node = %key, "latest job failed; waiting for a restart spec");
                    outcome.blocked.push(key);
                    continue;
                }
            }

            // Gather afterok dependencies; a gap means this branch is halted.
            let mut deps: Vec<JobId> = Vec::new();
            let mut ready = true;

            for dep in &node.deps {
                match dep_job(ledger, itr.parent, dep, &live) {
                    DepState::Satisfied => {}
                    DepState::Waiting(id) => deps.push(id),
                    DepState::Blocked => {
                        ready = false;
                        break;
                    }
                }
            }
            for ext in &node.external_deps {
                match dep_job(ledger, ext.parent, &ext.key, &BTreeMap::new()) {
                    DepState::Satisfied => {}
                    DepState::Waiting(id) => deps.push(id),
                    DepState::Blocked => {
                        ready = false;
                        break;
                    }
                }
            }

            if !ready {
                debug!(node = %key, "upstream unavailable; leaving branch halted");
                outcome.blocked.push(key);
                continue;
            }

            let resources = self.resources.for_phase(key.phase)?;
            let request =
                build_request(self.ctx, &self.trainer, itr, &key, resources, deps)?;

            // Regenerate the script when asked to overwrite, or when it was
            // never generated; a plain restart reuses the existing file.
            if !force || self.ctx.overwrite || !request.script_path.exists() {
                request.write_script()?;
            }

            match self.backend.submit(&request) {
                Ok(job_id) => {
                    ledger.record(itr.parent, key, job_id)?;
                    live.insert(key, job_id);
                    outcome.submitted += 1;
                }
                Err(e) => {
                    // Fatal for this branch only; siblings keep going and
                    // downstream nodes fall out via the dependency gap.
                    error!(node = %key, error = %e, "submission rejected");
                    outcome.blocked.push(key);
                    outcome.aborted = true;
                }
            }
        }

        Ok(outcome)
    }

    fn dry_run_iteration(
        &mut self,
        itr: &Iteration<'_>,
        plan: &IterationPlan,
        resolution: &Resolution,
    ) -> Result<IterationReport> {
        let trio = itr.trio;
        println!(
            "dry-run: {run} iteration {itr_no} ({parent}), {n} phase nodes",
            run = trio.name,
            itr_no = itr.index,
            parent = itr.parent,
            n = plan.nodes().len()
        );
        if !resolution.is_empty() {
            println!(
                "  restart: {} nodes to resubmit, {} external jobs adopted",
                resolution.resubmit.len(),
                resolution.adopt.len()
            );
        }

        for node in plan.nodes() {
            let resources = self.resources.for_phase(node.key.phase)?;
            let request =
                build_request(self.ctx, &self.trainer, itr, &node.key, resources, vec![])?;
            print!("{}", request.describe());
            if !node.deps.is_empty() {
                let deps: Vec<String> = node.deps.iter().map(|d| d.slug()).collect();
                println!("      after: {}", deps.join(", "));
            }
            for ext in &node.external_deps {
                println!("      after (itr {}): {}", ext.parent, ext.key.slug());
            }
        }

        debug!("dry-run complete (nothing submitted, ledger untouched)");
        Ok(IterationReport {
            run_name: trio.name.clone(),
            itr_index: itr.index,
            parent: itr.parent,
            state: IterationState::NotStarted,
            submitted: 0,
            reused: 0,
            blocked: Vec::new(),
        })
    }

    /// Refresh ledger statuses from the scheduler and report derived state
    /// (the `status` subcommand).
    pub fn status(&mut self, trios: &[Trio], poll: bool) -> Result<RunReport> {
        let mut report = RunReport::default();
        for trio in trios {
            let mut ledger =
                JobLedger::load(self.ctx.ledger_log_path(trio), trio.name.clone())?;

            if poll {
                let backend = &mut self.backend;
                let updated = ledger.refresh_with(|id| match backend.poll(id) {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(job = %id, error = %e, "poll failed");
                        None
                    }
                })?;
                debug!(run = %trio.name, updated, "ledger refreshed from scheduler");
            }

            let regions = self.ctx.regions_for(trio)?;
            let optional = self.resources.enabled_optional_phases();
            let mut itr = Iteration::first(trio, self.ctx.starting_parent);
            loop {
                let plan = build_iteration_plan(&itr, regions, trio.num_tests(), &optional)?;
                let state = derive_state(&plan, &ledger, itr.parent);
                report.iterations.push(IterationReport {
                    run_name: trio.name.clone(),
                    itr_index: itr.index,
                    parent: itr.parent,
                    state,
                    submitted: 0,
                    reused: 0,
                    blocked: failed_nodes(&plan, &ledger, itr.parent),
                });
                match itr.next() {
                    Some(next) => itr = next,
                    None => break,
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Default)]
struct SubmitOutcome {
    submitted: u32,
    reused: u32,
    blocked: Vec<NodeKey>,
    aborted: bool,
}

enum DepState {
    /// Upstream already succeeded; no scheduler dependency needed.
    Satisfied,
    /// Upstream is queued or running under this job id.
    Waiting(JobId),
    /// Upstream failed or was never submitted.
    Blocked,
}

fn dep_job(
    ledger: &JobLedger,
    parent: Parent,
    key: &NodeKey,
    live: &BTreeMap<NodeKey, JobId>,
) -> DepState {
    if let Some(id) = live.get(key) {
        return DepState::Waiting(*id);
    }
    match ledger.latest(parent, key) {
        Some(rec) if rec.status == JobStatus::Succeeded => DepState::Satisfied,
        Some(rec) if rec.status.is_live() => DepState::Waiting(rec.job_id),
        _ => DepState::Blocked,
    }
}

/// Derive the pipeline state of one iteration from ledger job statuses.
pub fn derive_state(plan: &IterationPlan, ledger: &JobLedger, parent: Parent) -> IterationState {
    let status_of = |key: &NodeKey| ledger.latest(parent, key).map(|r| r.status);
    let all_succeeded = |phase: Phase| {
        let nodes = plan.nodes_of_phase(phase);
        !nodes.is_empty()
            && nodes
                .iter()
                .all(|n| status_of(&n.key) == Some(JobStatus::Succeeded))
    };

    let any_job = plan
        .nodes()
        .iter()
        .any(|n| status_of(&n.key).is_some());
    if !any_job {
        return IterationState::NotStarted;
    }

    if !(all_succeeded(Phase::MakeExamples)
        && all_succeeded(Phase::Shuffle)
        && all_succeeded(Phase::ReShuffle))
    {
        return IterationState::GeneratingExamples;
    }
    if !all_succeeded(Phase::TrainEval) {
        return IterationState::Training;
    }
    if !all_succeeded(Phase::SelectCkpt) {
        return IterationState::Evaluating;
    }
    // Checkpoint selected; test branches may not have started yet.
    let any_test_job = plan
        .nodes_of_phase(Phase::CallVariants)
        .iter()
        .any(|n| status_of(&n.key).is_some());
    if !any_test_job {
        return IterationState::CheckpointSelected;
    }
    if !all_succeeded(Phase::CallVariants) {
        return IterationState::Testing;
    }
    if !(all_succeeded(Phase::Compare) && all_succeeded(Phase::Convert)) {
        return IterationState::Comparing;
    }
    IterationState::Complete
}

/// Nodes whose latest job failed (for status output).
fn failed_nodes(plan: &IterationPlan, ledger: &JobLedger, parent: Parent) -> Vec<NodeKey> {
    plan.nodes()
        .iter()
        .map(|n| n.key)
        .filter(|k| {
            ledger
                .latest(parent, k)
                .is_some_and(|r| r.status == JobStatus::Failed)
        })
        .collect()
}

fn analysis_name(ctx: &RunContext) -> String {
    ctx.output_root
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "analysis".to_string())
}
