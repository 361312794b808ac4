// src/selection/mod.rs

//! Checkpoint selection.
//!
//! The train+eval phase writes one metrics row per save interval for the
//! child genome: class-level scores for HomRef, Het and HomVar plus SNP and
//! Indel given either as F1 or as precision/recall. The selector computes
//! missing F1 values, ranks checkpoints by aggregate F1 (mean of the five
//! class scores unless the file carries an aggregate column) and picks the
//! winner, breaking ties in favour of the latest step.
//!
//! The winning checkpoint path is written to `selected_ckpt.txt`, which the
//! next iteration's training and every call_variants job read at runtime.
//! Exactly one checkpoint is selected per completed iteration.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{Result, RetrioError};

/// Per-class F1 scores of one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassF1 {
    pub homref: f64,
    pub het: f64,
    pub homvar: f64,
    pub snp: f64,
    pub indel: f64,
}

/// One evaluated checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub path: String,
    pub step: u64,
    pub class_f1: ClassF1,
    pub aggregate: f64,
}

/// Harmonic mean of precision and recall; 0 when both are 0 (never NaN).
pub fn f1(precision: f64, recall: f64) -> f64 {
    let denom = precision + recall;
    if denom == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / denom
    }
}

/// Raw metrics row as written by the training binary.
#[derive(Debug, Deserialize)]
struct RawEvalRow {
    checkpoint: String,
    step: u64,
    homref_f1: f64,
    het_f1: f64,
    homvar_f1: f64,
    #[serde(default)]
    snp_precision: Option<f64>,
    #[serde(default)]
    snp_recall: Option<f64>,
    #[serde(default)]
    snp_f1: Option<f64>,
    #[serde(default)]
    indel_precision: Option<f64>,
    #[serde(default)]
    indel_recall: Option<f64>,
    #[serde(default)]
    indel_f1: Option<f64>,
    #[serde(default)]
    aggregate_f1: Option<f64>,
}

impl RawEvalRow {
    fn into_checkpoint(self) -> Result<Checkpoint> {
        let snp = resolve_f1("SNP", self.snp_f1, self.snp_precision, self.snp_recall)?;
        let indel = resolve_f1(
            "Indel",
            self.indel_f1,
            self.indel_precision,
            self.indel_recall,
        )?;
        let class_f1 = ClassF1 {
            homref: self.homref_f1,
            het: self.het_f1,
            homvar: self.homvar_f1,
            snp,
            indel,
        };
        let aggregate = self.aggregate_f1.unwrap_or_else(|| {
            (class_f1.homref + class_f1.het + class_f1.homvar + class_f1.snp + class_f1.indel)
                / 5.0
        });
        Ok(Checkpoint {
            path: self.checkpoint,
            step: self.step,
            class_f1,
            aggregate,
        })
    }
}

fn resolve_f1(
    class: &str,
    direct: Option<f64>,
    precision: Option<f64>,
    recall: Option<f64>,
) -> Result<f64> {
    if let Some(v) = direct {
        return Ok(v);
    }
    match (precision, recall) {
        (Some(p), Some(r)) => Ok(f1(p, r)),
        _ => Err(RetrioError::Config(format!(
            "eval metrics carry neither {class} F1 nor precision/recall"
        ))),
    }
}

/// Load the eval-metrics CSV into evaluated checkpoints, file order.
pub fn load_eval_metrics(path: impl AsRef<Path>) -> Result<Vec<Checkpoint>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading eval metrics at {path:?}"))?;

    let mut reader = csv::Reader::from_reader(contents.as_bytes());
    let mut checkpoints = Vec::new();
    for row in reader.deserialize::<RawEvalRow>() {
        let row = row.map_err(RetrioError::Csv)?;
        checkpoints.push(row.into_checkpoint()?);
    }

    debug!(path = ?path, checkpoints = checkpoints.len(), "loaded eval metrics");
    Ok(checkpoints)
}

/// Pick the winning checkpoint: maximum aggregate F1, ties to highest step.
pub fn select_best(checkpoints: &[Checkpoint]) -> Option<&Checkpoint> {
    let mut best: Option<&Checkpoint> = None;
    for ckpt in checkpoints {
        best = match best {
            None => Some(ckpt),
            Some(cur)
                if ckpt.aggregate > cur.aggregate
                    || (ckpt.aggregate == cur.aggregate && ckpt.step > cur.step) =>
            {
                Some(ckpt)
            }
            Some(cur) => Some(cur),
        };
    }
    best
}

/// The `select-ckpt` subcommand: load metrics, pick the winner, write its
/// path to `out` for downstream jobs.
pub fn run_select_ckpt(metrics: &Path, out: &Path) -> Result<()> {
    let checkpoints = load_eval_metrics(metrics)?;
    let best = select_best(&checkpoints).ok_or_else(|| {
        RetrioError::Config(format!("eval metrics at {metrics:?} contain no checkpoints"))
    })?;

    if let Some(dir) = out.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
    }
    fs::write(out, format!("{}\n", best.path))
        .with_context(|| format!("writing selected checkpoint to {out:?}"))?;

    info!(
        checkpoint = %best.path,
        step = best.step,
        aggregate_f1 = best.aggregate,
        "selected checkpoint"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn ckpt(path: &str, step: u64, snp: f64) -> Checkpoint {
        let class_f1 = ClassF1 {
            homref: 0.99,
            het: 0.97,
            homvar: 0.96,
            snp,
            indel: 0.90,
        };
        let aggregate =
            (class_f1.homref + class_f1.het + class_f1.homvar + class_f1.snp + class_f1.indel)
                / 5.0;
        Checkpoint {
            path: path.to_string(),
            step,
            class_f1,
            aggregate,
        }
    }

    #[test]
    fn f1_is_zero_when_precision_and_recall_are_zero() {
        assert_eq!(f1(0.0, 0.0), 0.0);
        assert!((f1(0.95, 0.90) - 0.924324).abs() < 1e-6);
    }

    #[test]
    fn balanced_precision_recall_beats_skewed() {
        // (P=0.95, R=0.90) vs (P=0.80, R=0.99), all other classes equal.
        let a = ckpt("ckpt-1000", 1000, f1(0.95, 0.90));
        let b = ckpt("ckpt-2000", 2000, f1(0.80, 0.99));
        let best = select_best(&[a.clone(), b]).unwrap();
        assert_eq!(best.path, a.path);
    }

    #[test]
    fn ties_break_to_the_latest_step() {
        let a = ckpt("ckpt-1000", 1000, 0.95);
        let b = ckpt("ckpt-3000", 3000, 0.95);
        let best = select_best(&[a, b.clone()]).unwrap();
        assert_eq!(best.path, b.path);
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn metrics_csv_round_trips_and_computes_missing_f1() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "checkpoint,step,homref_f1,het_f1,homvar_f1,snp_precision,snp_recall,indel_f1"
        )
        .unwrap();
        writeln!(f, "/train/ckpt-500,500,0.99,0.97,0.96,0.95,0.90,0.91").unwrap();
        writeln!(f, "/train/ckpt-1000,1000,0.99,0.97,0.96,0.80,0.99,0.91").unwrap();

        let checkpoints = load_eval_metrics(f.path()).unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert!((checkpoints[0].class_f1.snp - 0.924324).abs() < 1e-6);

        let best = select_best(&checkpoints).unwrap();
        assert_eq!(best.path, "/train/ckpt-500");
    }

    #[test]
    fn select_ckpt_writes_the_winning_path() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = dir.path().join("eval_metrics.csv");
        let out = dir.path().join("train").join("selected_ckpt.txt");
        fs::write(
            &metrics,
            "checkpoint,step,homref_f1,het_f1,homvar_f1,snp_f1,indel_f1\n\
             /train/ckpt-1,1,0.9,0.9,0.9,0.9,0.9\n\
             /train/ckpt-2,2,0.99,0.99,0.99,0.99,0.99\n",
        )
        .unwrap();

        run_select_ckpt(&metrics, &out).unwrap();
        let selected = fs::read_to_string(&out).unwrap();
        assert_eq!(selected.trim(), "/train/ckpt-2");
    }
}
