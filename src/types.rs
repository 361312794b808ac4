// src/types.rs

//! Core vocabulary shared across the orchestrator: pipeline phases, genome
//! roles, job identifiers and job statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One named stage of the per-genome processing pipeline.
///
/// The first eight variants are required in every run; the last three are
/// optional analysis stages that participate only when their key appears in
/// the resource configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    MakeExamples,
    Shuffle,
    ReShuffle,
    TrainEval,
    SelectCkpt,
    CallVariants,
    Compare,
    Convert,
    // Optional analysis stages.
    ShowExamples,
    EvalSummary,
    BenchmarkSummary,
}

/// How a phase fans out within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// One node per genomic region (1-based region index).
    Region,
    /// One node per held-out test genome (1-based test index).
    Test,
    /// A single node per iteration.
    Single,
}

impl Phase {
    /// The eight phases every run must configure, in pipeline order.
    pub const REQUIRED: [Phase; 8] = [
        Phase::MakeExamples,
        Phase::Shuffle,
        Phase::ReShuffle,
        Phase::TrainEval,
        Phase::SelectCkpt,
        Phase::CallVariants,
        Phase::Compare,
        Phase::Convert,
    ];

    /// Optional analysis phases, enabled by presence in the resource config.
    pub const OPTIONAL: [Phase; 3] = [
        Phase::ShowExamples,
        Phase::EvalSummary,
        Phase::BenchmarkSummary,
    ];

    /// Key used for this phase in the resource configuration and the
    /// restart specification.
    pub fn key(&self) -> &'static str {
        match self {
            Phase::MakeExamples => "make_examples",
            Phase::Shuffle => "shuffle",
            Phase::ReShuffle => "re_shuffle",
            Phase::TrainEval => "train_eval",
            Phase::SelectCkpt => "select_ckpt",
            Phase::CallVariants => "call_variants",
            Phase::Compare => "compare",
            Phase::Convert => "convert",
            Phase::ShowExamples => "show_examples",
            Phase::EvalSummary => "eval_summary",
            Phase::BenchmarkSummary => "benchmark_summary",
        }
    }

    pub fn is_optional(&self) -> bool {
        Phase::OPTIONAL.contains(self)
    }

    /// Fan-out kind of this phase within one iteration.
    pub fn fan_out(&self) -> FanOut {
        match self {
            Phase::MakeExamples | Phase::Shuffle | Phase::ShowExamples => FanOut::Region,
            Phase::CallVariants | Phase::Compare | Phase::Convert => FanOut::Test,
            Phase::ReShuffle
            | Phase::TrainEval
            | Phase::SelectCkpt
            | Phase::EvalSummary
            | Phase::BenchmarkSummary => FanOut::Single,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "make_examples" => Ok(Phase::MakeExamples),
            "shuffle" => Ok(Phase::Shuffle),
            "re_shuffle" => Ok(Phase::ReShuffle),
            "train_eval" => Ok(Phase::TrainEval),
            "select_ckpt" => Ok(Phase::SelectCkpt),
            "call_variants" => Ok(Phase::CallVariants),
            "compare" => Ok(Phase::Compare),
            "convert" => Ok(Phase::Convert),
            "show_examples" => Ok(Phase::ShowExamples),
            "eval_summary" => Ok(Phase::EvalSummary),
            "benchmark_summary" => Ok(Phase::BenchmarkSummary),
            other => Err(format!("unknown phase name: {other:?}")),
        }
    }
}

/// Role a genome plays within a trio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GenomeRole {
    Father,
    Mother,
    Child,
    /// Held-out test genome, 1-based.
    Test(u32),
}

impl fmt::Display for GenomeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeRole::Father => f.write_str("Father"),
            GenomeRole::Mother => f.write_str("Mother"),
            GenomeRole::Child => f.write_str("Child"),
            GenomeRole::Test(k) => write!(f, "Test{k}"),
        }
    }
}

impl FromStr for GenomeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "Father" => Ok(GenomeRole::Father),
            "Mother" => Ok(GenomeRole::Mother),
            "Child" => Ok(GenomeRole::Child),
            _ => {
                if let Some(rest) = s.strip_prefix("Test") {
                    let k: u32 = rest
                        .parse()
                        .map_err(|_| format!("invalid test genome role: {s:?}"))?;
                    Ok(GenomeRole::Test(k))
                } else {
                    Err(format!("unknown genome role: {s:?}"))
                }
            }
        }
    }
}

/// The parent genome an iteration trains on. Two iterations per trio, one
/// per parent; the starting parent comes from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Parent {
    Father,
    Mother,
}

impl Parent {
    pub fn role(&self) -> GenomeRole {
        match self {
            Parent::Father => GenomeRole::Father,
            Parent::Mother => GenomeRole::Mother,
        }
    }

    /// The other parent (trained in the second iteration).
    pub fn other(&self) -> Parent {
        match self {
            Parent::Father => Parent::Mother,
            Parent::Mother => Parent::Father,
        }
    }
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parent::Father => f.write_str("Father"),
            Parent::Mother => f.write_str("Mother"),
        }
    }
}

impl FromStr for Parent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Father" | "father" => Ok(Parent::Father),
            "Mother" | "mother" => Ok(Parent::Mother),
            other => Err(format!(
                "invalid parent: {other:?} (expected father or mother)"
            )),
        }
    }
}

/// Identifier assigned by the external batch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(JobId)
            .map_err(|_| format!("invalid job id: {s:?}"))
    }
}

/// Lifecycle of one submitted job, as tracked in the ledger.
///
/// Jobs are never deleted; a resubmission records a new job with a higher
/// attempt count and the old record is retained as superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// A live job occupies its ledger key: it must not be resubmitted.
    pub fn is_live(&self) -> bool {
        !matches!(self, JobStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "submitted" => Ok(JobStatus::Submitted),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("invalid job status: {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_keys_round_trip() {
        for phase in Phase::REQUIRED.iter().chain(Phase::OPTIONAL.iter()) {
            assert_eq!(phase.key().parse::<Phase>().unwrap(), *phase);
        }
    }

    #[test]
    fn genome_role_round_trips() {
        for role in [
            GenomeRole::Father,
            GenomeRole::Mother,
            GenomeRole::Child,
            GenomeRole::Test(7),
        ] {
            assert_eq!(role.to_string().parse::<GenomeRole>().unwrap(), role);
        }
    }

    #[test]
    fn failed_is_the_only_dead_status() {
        assert!(!JobStatus::Failed.is_live());
        for st in [
            JobStatus::Pending,
            JobStatus::Submitted,
            JobStatus::Running,
            JobStatus::Succeeded,
        ] {
            assert!(st.is_live());
        }
    }
}
