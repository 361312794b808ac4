// src/dag/node.rs

//! Phase node identity and structure.

use std::fmt;

use crate::types::{GenomeRole, Parent, Phase};

/// Identity of one phase node within an iteration.
///
/// `role` scopes the node to a genome where that matters (example generation
/// runs for the iteration's training parent, test branches for a held-out
/// genome); `index` is the 1-based region or test index for fanned-out
/// phases and `None` for singleton phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub phase: Phase,
    pub role: Option<GenomeRole>,
    pub index: Option<u32>,
}

impl NodeKey {
    pub fn single(phase: Phase, role: Option<GenomeRole>) -> Self {
        Self { phase, role, index: None }
    }

    pub fn region(phase: Phase, role: GenomeRole, region: u32) -> Self {
        Self {
            phase,
            role: Some(role),
            index: Some(region),
        }
    }

    pub fn test(phase: Phase, test: u32) -> Self {
        Self {
            phase,
            role: Some(GenomeRole::Test(test)),
            index: Some(test),
        }
    }

    /// Stable name used for job scripts, job names and logs,
    /// e.g. `make_examples-Father-3` or `re_shuffle-Mother`.
    pub fn slug(&self) -> String {
        let mut s = self.phase.key().to_string();
        if let Some(role) = self.role {
            s.push('-');
            s.push_str(&role.to_string());
        }
        if let Some(idx) = self.index {
            s.push('-');
            s.push_str(&idx.to_string());
        }
        s
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug())
    }
}

/// A dependency on a node owned by a *previous* iteration.
///
/// These are not edges of the current plan's graph; they are satisfied by
/// looking up the prior iteration's jobs in the ledger (succeeded → nothing
/// to do; still queued/running → carried as a scheduler-level dependency).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalDep {
    /// Parent identifying the prior iteration that owns the node.
    pub parent: Parent,
    pub key: NodeKey,
}

/// One node of an iteration plan: identity plus its explicit upstream set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseNode {
    pub key: NodeKey,
    /// Upstream nodes within the same iteration.
    pub deps: Vec<NodeKey>,
    /// Upstream nodes in prior iterations, resolved through the ledger.
    pub external_deps: Vec<ExternalDep>,
}

impl PhaseNode {
    pub fn new(key: NodeKey, deps: Vec<NodeKey>) -> Self {
        Self {
            key,
            deps,
            external_deps: Vec::new(),
        }
    }

    pub fn with_external(mut self, deps: Vec<ExternalDep>) -> Self {
        self.external_deps = deps;
        self
    }
}
