// src/dag/builder.rs

//! Construct the ordered phase plan for one iteration.
//!
//! Building is pure and deterministic given identical inputs: the same
//! iteration, fan-out counts and optional-phase set always produce the same
//! node list in the same order. No side effects, no job submission.

use crate::dag::graph::PhaseGraph;
use crate::dag::node::{ExternalDep, NodeKey, PhaseNode};
use crate::engine::Iteration;
use crate::errors::{Result, RetrioError};
use crate::types::{GenomeRole, Phase};

/// The ordered node list of one iteration plus its adjacency view.
///
/// Nodes are listed in a valid topological order by construction.
#[derive(Debug, Clone)]
pub struct IterationPlan {
    nodes: Vec<PhaseNode>,
    graph: PhaseGraph,
}

impl IterationPlan {
    pub fn nodes(&self) -> &[PhaseNode] {
        &self.nodes
    }

    pub fn graph(&self) -> &PhaseGraph {
        &self.graph
    }

    pub fn node(&self, key: &NodeKey) -> Option<&PhaseNode> {
        self.nodes.iter().find(|n| n.key == *key)
    }

    /// All nodes of the given phase, in plan order.
    pub fn nodes_of_phase(&self, phase: Phase) -> Vec<&PhaseNode> {
        self.nodes.iter().filter(|n| n.key.phase == phase).collect()
    }
}

/// Build the phase plan for one iteration.
///
/// Topology per training genome:
/// `make_examples(r) → shuffle(r) → re_shuffle → train_eval → select_ckpt →
/// call_variants(t) → compare(t) → convert(t)`, with region fan-out on the
/// first two phases and independent per-test branches after checkpoint
/// selection. Optional analysis phases attach to this spine but are never
/// depended on by required phases.
pub fn build_iteration_plan(
    itr: &Iteration<'_>,
    num_regions: u32,
    num_tests: u32,
    optional_phases: &[Phase],
) -> Result<IterationPlan> {
    if num_regions == 0 {
        return Err(RetrioError::Config(
            "iteration plan needs at least one region".to_string(),
        ));
    }
    if num_tests == 0 {
        return Err(RetrioError::Config(
            "iteration plan needs at least one test genome".to_string(),
        ));
    }

    let parent_role = itr.parent.role();
    let enabled = |p: Phase| optional_phases.contains(&p);
    let mut nodes = Vec::new();

    // Region fan-out: example generation and per-region in-memory shuffle.
    for r in 1..=num_regions {
        let me = NodeKey::region(Phase::MakeExamples, parent_role, r);
        nodes.push(PhaseNode::new(me, vec![]));
        nodes.push(PhaseNode::new(
            NodeKey::region(Phase::Shuffle, parent_role, r),
            vec![me],
        ));
        if enabled(Phase::ShowExamples) {
            nodes.push(PhaseNode::new(
                NodeKey::region(Phase::ShowExamples, parent_role, r),
                vec![me],
            ));
        }
    }

    // Fan-in: concatenate the per-region shuffles.
    let re_shuffle = NodeKey::single(Phase::ReShuffle, Some(parent_role));
    let shuffles: Vec<NodeKey> = (1..=num_regions)
        .map(|r| NodeKey::region(Phase::Shuffle, parent_role, r))
        .collect();
    nodes.push(PhaseNode::new(re_shuffle, shuffles));

    // Training consumes the merged examples of both parents; the other
    // parent's re_shuffle and the warm-start checkpoint live in the prior
    // iteration and are resolved through the ledger.
    let train = NodeKey::single(Phase::TrainEval, Some(parent_role));
    let mut train_node = PhaseNode::new(train, vec![re_shuffle]);
    if let Some(prior) = itr.prior_parent() {
        train_node = train_node.with_external(vec![
            ExternalDep {
                parent: prior,
                key: NodeKey::single(Phase::ReShuffle, Some(prior.role())),
            },
            ExternalDep {
                parent: prior,
                key: NodeKey::single(Phase::SelectCkpt, Some(GenomeRole::Child)),
            },
        ]);
    }
    nodes.push(train_node);

    // Checkpoint selection evaluates on the child genome.
    let select = NodeKey::single(Phase::SelectCkpt, Some(GenomeRole::Child));
    nodes.push(PhaseNode::new(select, vec![train]));

    if enabled(Phase::EvalSummary) {
        nodes.push(PhaseNode::new(
            NodeKey::single(Phase::EvalSummary, Some(GenomeRole::Child)),
            vec![select],
        ));
    }

    // Held-out test branches: mutually independent chains.
    let mut converts = Vec::new();
    for t in 1..=num_tests {
        let call = NodeKey::test(Phase::CallVariants, t);
        let compare = NodeKey::test(Phase::Compare, t);
        let convert = NodeKey::test(Phase::Convert, t);
        nodes.push(PhaseNode::new(call, vec![select]));
        nodes.push(PhaseNode::new(compare, vec![call]));
        nodes.push(PhaseNode::new(convert, vec![compare]));
        converts.push(convert);
    }

    if enabled(Phase::BenchmarkSummary) {
        nodes.push(PhaseNode::new(
            NodeKey::single(Phase::BenchmarkSummary, None),
            converts,
        ));
    }

    let graph = PhaseGraph::from_nodes(&nodes)?;
    Ok(IterationPlan { nodes, graph })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Parent;
    use retrio_test_utils::builders::TrioBuilder;

    #[test]
    fn scenario_counts_match_the_topology() {
        let trio = TrioBuilder::new("run-a").tests(2).build();
        let itr = Iteration::first(&trio, Parent::Father);
        let plan = build_iteration_plan(&itr, 3, 2, &[]).unwrap();

        assert_eq!(plan.nodes_of_phase(Phase::MakeExamples).len(), 3);
        assert_eq!(plan.nodes_of_phase(Phase::Shuffle).len(), 3);
        assert_eq!(plan.nodes_of_phase(Phase::ReShuffle).len(), 1);
        assert_eq!(plan.nodes_of_phase(Phase::TrainEval).len(), 1);
        assert_eq!(plan.nodes_of_phase(Phase::SelectCkpt).len(), 1);
        assert_eq!(plan.nodes_of_phase(Phase::CallVariants).len(), 2);
        assert_eq!(plan.nodes_of_phase(Phase::Compare).len(), 2);
        assert_eq!(plan.nodes_of_phase(Phase::Convert).len(), 2);
        assert_eq!(plan.nodes().len(), 15);
    }

    #[test]
    fn test_branches_share_no_dependency_edges() {
        let trio = TrioBuilder::new("run-a").tests(3).build();
        let itr = Iteration::first(&trio, Parent::Father);
        let plan = build_iteration_plan(&itr, 2, 3, &[]).unwrap();

        for t in 1..=3 {
            let call = NodeKey::test(Phase::CallVariants, t);
            let closure = plan.graph().downstream_closure(&[call]);
            // Each branch's closure is exactly its own three nodes.
            assert_eq!(closure.len(), 3);
            for key in closure {
                assert_eq!(key.index, Some(t));
            }
        }
    }

    #[test]
    fn building_is_deterministic() {
        let trio = TrioBuilder::new("run-a").tests(2).build();
        let itr = Iteration::first(&trio, Parent::Mother);
        let a = build_iteration_plan(&itr, 4, 2, &[Phase::ShowExamples]).unwrap();
        let b = build_iteration_plan(&itr, 4, 2, &[Phase::ShowExamples]).unwrap();
        assert_eq!(a.nodes(), b.nodes());
    }

    #[test]
    fn second_iteration_carries_external_deps() {
        let trio = TrioBuilder::new("run-a").tests(1).build();
        let first = Iteration::first(&trio, Parent::Father);
        let second = first.next().unwrap();
        let plan = build_iteration_plan(&second, 2, 1, &[]).unwrap();

        let train = plan.nodes_of_phase(Phase::TrainEval)[0];
        assert_eq!(train.external_deps.len(), 2);
        for dep in &train.external_deps {
            assert_eq!(dep.parent, Parent::Father);
        }
    }

    #[test]
    fn optional_phases_never_gate_required_ones() {
        let trio = TrioBuilder::new("run-a").tests(1).build();
        let itr = Iteration::first(&trio, Parent::Father);
        let plan =
            build_iteration_plan(&itr, 2, 1, &Phase::OPTIONAL).unwrap();

        for node in plan.nodes() {
            if !node.key.phase.is_optional() {
                for dep in &node.deps {
                    assert!(!dep.phase.is_optional());
                }
            }
        }
    }
}
