// src/restart/mod.rs

//! Restart specification parsing and resolution.
//!
//! A restart spec is a JSON map from `"phase_name"` or
//! `"phase_name:genome_role"` to an ordered list of integers. Each integer
//! is either a 1-based region/test index naming a job to regenerate, or an
//! existing external scheduler id to adopt as already running. The two are
//! told apart by an explicit, documented boundary
//! ([`EXTERNAL_JOB_ID_BOUNDARY`]) rather than ad-hoc magnitude guessing at
//! each use site.
//!
//! Resolving a spec against an iteration plan yields the full downstream
//! closure of every named node. Resubmission always cascades to 100% of the
//! closure; partial cascades are unsupported because the correctness of
//! downstream artifacts cannot be guaranteed otherwise.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::dag::{IterationPlan, NodeKey};
use crate::errors::{Result, RetrioError};
use crate::types::{FanOut, GenomeRole, JobId, Phase};

/// Values at or above this are external scheduler job ids; below it they are
/// 1-based fan-out indices. Cluster job ids are monotonically increasing and
/// far beyond any realistic region or test count.
pub const EXTERNAL_JOB_ID_BOUNDARY: u64 = 100_000;

/// One entry of a restart list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartEntry {
    /// Regenerate the job at this 1-based fan-out index.
    Index(u32),
    /// A job already on the scheduler; adopt it, never resubmit it.
    ExternalJob(JobId),
}

/// Key of one restart map entry: a phase, optionally scoped to a genome role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RestartKey {
    pub phase: Phase,
    pub role: Option<GenomeRole>,
}

impl RestartKey {
    fn matches(&self, node: &NodeKey) -> bool {
        node.phase == self.phase && self.role.is_none_or(|r| node.role == Some(r))
    }
}

/// Parsed restart specification. Transient: consumed once per invocation.
#[derive(Debug, Clone, Default)]
pub struct RestartSpec {
    entries: Vec<(RestartKey, Vec<RestartEntry>)>,
}

impl RestartSpec {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(RestartKey, Vec<RestartEntry>)] {
        &self.entries
    }

    /// Parse the `--restart-jobs` JSON string.
    pub fn parse(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<Value>> =
            serde_json::from_str(json).map_err(RetrioError::Json)?;

        let mut entries = Vec::new();
        for (key, values) in raw {
            let key = parse_key(&key)?;
            let mut list = Vec::new();
            for value in values {
                let n = value.as_u64().ok_or_else(|| {
                    RetrioError::Config(format!(
                        "restart entry for {} must be a non-negative integer, got {value}",
                        key.phase
                    ))
                })?;
                list.push(classify(n)?);
            }
            entries.push((key, list));
        }
        Ok(Self { entries })
    }
}

fn parse_key(raw: &str) -> Result<RestartKey> {
    let (phase_str, role) = match raw.split_once(':') {
        Some((p, r)) => {
            let role = GenomeRole::from_str(r).map_err(RetrioError::Config)?;
            (p, Some(role))
        }
        None => (raw, None),
    };
    let phase = Phase::from_str(phase_str).map_err(RetrioError::UnknownPhase)?;
    Ok(RestartKey { phase, role })
}

fn classify(n: u64) -> Result<RestartEntry> {
    if n >= EXTERNAL_JOB_ID_BOUNDARY {
        return Ok(RestartEntry::ExternalJob(JobId(n)));
    }
    // Fan-out indices are 1-based; an index of 0 is normalized to 1.
    let index = if n == 0 { 1 } else { n as u32 };
    Ok(RestartEntry::Index(index))
}

/// Outcome of resolving a spec against one iteration plan.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Nodes to resubmit, in plan order: the union of the downstream
    /// closures of every index entry that matched this plan.
    pub resubmit: Vec<NodeKey>,
    /// External jobs to insert into the ledger as `Running`.
    pub adopt: Vec<(NodeKey, JobId)>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.resubmit.is_empty() && self.adopt.is_empty()
    }
}

/// Resolve a restart spec against one iteration's plan.
///
/// Index entries name the fan-out slot to regenerate; for an external job
/// id the slot is the entry's 1-based position in its list. Keys that match
/// no node of this plan are skipped (they may belong to the other
/// iteration); an index that matches the key's phase but no slot is an
/// error.
pub fn resolve(plan: &IterationPlan, spec: &RestartSpec) -> Result<Resolution> {
    let mut roots: Vec<NodeKey> = Vec::new();
    let mut adopt: Vec<(NodeKey, JobId)> = Vec::new();

    for (key, list) in spec.entries() {
        let matching: Vec<&NodeKey> = plan
            .nodes()
            .iter()
            .map(|n| &n.key)
            .filter(|k| key.matches(k))
            .collect();
        if matching.is_empty() {
            continue;
        }

        for (pos, entry) in list.iter().enumerate() {
            match entry {
                RestartEntry::Index(i) => {
                    let node = select_slot(&matching, key, *i)?;
                    roots.push(*node);
                }
                RestartEntry::ExternalJob(id) => {
                    let slot = pos as u32 + 1;
                    let node = select_slot(&matching, key, slot)?;
                    adopt.push((*node, *id));
                }
            }
        }
    }

    let closure = plan.graph().downstream_closure(&roots);
    let adopted: Vec<NodeKey> = adopt.iter().map(|(k, _)| *k).collect();

    // Adopted jobs are already running: keep them out of the resubmit set.
    let resubmit: Vec<NodeKey> = plan
        .nodes()
        .iter()
        .map(|n| n.key)
        .filter(|k| closure.contains(k) && !adopted.contains(k))
        .collect();

    debug!(
        roots = roots.len(),
        resubmit = resubmit.len(),
        adopted = adopt.len(),
        "restart spec resolved"
    );
    Ok(Resolution { resubmit, adopt })
}

fn select_slot<'a>(
    matching: &[&'a NodeKey],
    key: &RestartKey,
    slot: u32,
) -> Result<&'a NodeKey> {
    // Singleton phases have one matching node and no meaningful index.
    if key.phase.fan_out() == FanOut::Single {
        if slot != 1 {
            return Err(RetrioError::Config(format!(
                "phase {} does not fan out; restart index {slot} is out of range",
                key.phase
            )));
        }
        return Ok(matching[0]);
    }

    matching
        .iter()
        .find(|k| k.index == Some(slot))
        .copied()
        .ok_or_else(|| {
            RetrioError::Config(format!(
                "restart index {slot} matches no {} node in this iteration",
                key.phase
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::build_iteration_plan;
    use crate::engine::Iteration;
    use crate::types::Parent;
    use retrio_test_utils::builders::TrioBuilder;

    fn plan(regions: u32, tests: u32) -> IterationPlan {
        let trio = TrioBuilder::new("run-a").tests(tests as usize).build();
        let itr = Iteration::first(&trio, Parent::Father);
        build_iteration_plan(&itr, regions, tests, &[]).unwrap()
    }

    #[test]
    fn index_zero_resolves_like_index_one() {
        let plan = plan(3, 1);
        let zero = RestartSpec::parse(r#"{"make_examples:Father": [0]}"#).unwrap();
        let one = RestartSpec::parse(r#"{"make_examples:Father": [1]}"#).unwrap();

        let a = resolve(&plan, &zero).unwrap();
        let b = resolve(&plan, &one).unwrap();
        assert_eq!(a.resubmit, b.resubmit);
        assert!(!a.resubmit.is_empty());
    }

    #[test]
    fn closure_cascades_to_all_downstream_nodes() {
        let plan = plan(3, 2);
        let spec = RestartSpec::parse(r#"{"make_examples": [2]}"#).unwrap();
        let res = resolve(&plan, &spec).unwrap();

        let resubmitted: Vec<String> = res.resubmit.iter().map(|k| k.slug()).collect();
        // Region 2's own chain plus everything past the fan-in.
        assert!(resubmitted.contains(&"make_examples-Father-2".to_string()));
        assert!(resubmitted.contains(&"shuffle-Father-2".to_string()));
        assert!(resubmitted.contains(&"re_shuffle-Father".to_string()));
        assert!(resubmitted.contains(&"train_eval-Father".to_string()));
        assert!(resubmitted.contains(&"select_ckpt-Child".to_string()));
        assert!(resubmitted.contains(&"convert-Test2-2".to_string()));
        // Sibling regions are untouched.
        assert!(!resubmitted.contains(&"make_examples-Father-1".to_string()));
        assert!(!resubmitted.contains(&"shuffle-Father-3".to_string()));
    }

    #[test]
    fn closure_from_downstream_is_a_strict_subset() {
        let plan = plan(2, 1);
        let upstream = RestartSpec::parse(r#"{"shuffle": [1]}"#).unwrap();
        let downstream = RestartSpec::parse(r#"{"re_shuffle": [1]}"#).unwrap();

        let up = resolve(&plan, &upstream).unwrap().resubmit;
        let down = resolve(&plan, &downstream).unwrap().resubmit;

        assert!(down.iter().all(|k| up.contains(k)));
        assert!(up.len() > down.len());
    }

    #[test]
    fn external_job_ids_are_adopted_not_resubmitted() {
        let plan = plan(2, 1);
        let spec =
            RestartSpec::parse(r#"{"shuffle:Father": [123456789, 2]}"#).unwrap();
        let res = resolve(&plan, &spec).unwrap();

        // First list position adopts shuffle slot 1.
        assert_eq!(res.adopt.len(), 1);
        let (node, id) = res.adopt[0];
        assert_eq!(id, JobId(123_456_789));
        assert_eq!(node.index, Some(1));

        let slugs: Vec<String> = res.resubmit.iter().map(|k| k.slug()).collect();
        assert!(!slugs.contains(&"shuffle-Father-1".to_string()));
        assert!(slugs.contains(&"shuffle-Father-2".to_string()));
        assert!(slugs.contains(&"re_shuffle-Father".to_string()));
    }

    #[test]
    fn keys_matching_no_node_are_skipped() {
        let plan = plan(2, 1);
        // This plan trains Father; a Mother-scoped key belongs to the other
        // iteration and is ignored here.
        let spec = RestartSpec::parse(r#"{"make_examples:Mother": [1]}"#).unwrap();
        let res = resolve(&plan, &spec).unwrap();
        assert!(res.is_empty());
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let plan = plan(2, 1);
        let spec = RestartSpec::parse(r#"{"make_examples": [5]}"#).unwrap();
        assert!(resolve(&plan, &spec).is_err());
    }

    #[test]
    fn malformed_entries_are_config_errors() {
        assert!(RestartSpec::parse(r#"{"make_examples": ["one"]}"#).is_err());
        assert!(RestartSpec::parse(r#"{"not_a_phase": [1]}"#).is_err());
        assert!(RestartSpec::parse(r#"{"make_examples:Sibling": [1]}"#).is_err());
    }
}
