// src/config/resources.rs

//! Per-phase scheduler resource configuration.
//!
//! A nested JSON map from phase name to a flat map of scheduler parameter →
//! value, e.g.:
//!
//! ```json
//! {
//!   "make_examples": { "partition": "compute", "ntasks": 40, "mem": "200G" },
//!   "train_eval":    { "partition": "gpu", "gres": "gpu:2", "time": "72:00:00" }
//! }
//! ```
//!
//! All eight required phases must be present; the three optional analysis
//! phases participate in a run exactly when their key appears here.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, RetrioError};
use crate::types::Phase;

/// Validated resource configuration for one run.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    phases: BTreeMap<Phase, BTreeMap<String, String>>,
}

impl ResourceConfig {
    /// Scheduler parameters for a phase. Required phases are guaranteed
    /// present after validation; optional phases return an error when not
    /// configured.
    pub fn for_phase(&self, phase: Phase) -> Result<&BTreeMap<String, String>> {
        self.phases
            .get(&phase)
            .ok_or_else(|| RetrioError::UnknownPhase(phase.key().to_string()))
    }

    /// Optional analysis phases enabled by this configuration, in
    /// declaration order of [`Phase::OPTIONAL`].
    pub fn enabled_optional_phases(&self) -> Vec<Phase> {
        Phase::OPTIONAL
            .iter()
            .copied()
            .filter(|p| self.phases.contains_key(p))
            .collect()
    }

    /// Build directly from an already-typed map (used by test builders).
    pub fn from_map(phases: BTreeMap<Phase, BTreeMap<String, String>>) -> Result<Self> {
        validate(&phases)?;
        Ok(Self { phases })
    }
}

/// Load and validate the resource configuration JSON.
pub fn load_resources(path: impl AsRef<Path>) -> Result<ResourceConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading resource config at {path:?}"))?;

    let raw: BTreeMap<String, BTreeMap<String, Value>> =
        serde_json::from_str(&contents).map_err(RetrioError::Json)?;

    let mut phases = BTreeMap::new();
    for (name, params) in raw {
        let phase = Phase::from_str(&name).map_err(RetrioError::UnknownPhase)?;
        let params = params
            .into_iter()
            .map(|(k, v)| scalar_to_string(&name, k, v))
            .collect::<Result<BTreeMap<_, _>>>()?;
        phases.insert(phase, params);
    }

    validate(&phases)?;
    debug!(path = ?path, phases = phases.len(), "loaded resource config");
    Ok(ResourceConfig { phases })
}

/// Scheduler parameters are rendered into batch scripts as strings; accept
/// JSON strings and numbers, reject structured values.
fn scalar_to_string(phase: &str, key: String, value: Value) -> Result<(String, String)> {
    let rendered = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return Err(RetrioError::Config(format!(
                "resource {phase}.{key} must be a scalar, got {other}"
            )));
        }
    };
    Ok((key, rendered))
}

fn validate(phases: &BTreeMap<Phase, BTreeMap<String, String>>) -> Result<()> {
    for phase in Phase::REQUIRED {
        if !phases.contains_key(&phase) {
            return Err(RetrioError::Config(format!(
                "resource config is missing required phase {:?}",
                phase.key()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_json() -> String {
        let entries: Vec<String> = Phase::REQUIRED
            .iter()
            .map(|p| format!(r#""{}": {{"partition": "compute", "ntasks": 4}}"#, p.key()))
            .collect();
        format!("{{{}}}", entries.join(","))
    }

    #[test]
    fn loads_required_phases_and_renders_numbers() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(minimal_json().as_bytes()).unwrap();

        let cfg = load_resources(f.path()).unwrap();
        let params = cfg.for_phase(Phase::MakeExamples).unwrap();
        assert_eq!(params["partition"], "compute");
        assert_eq!(params["ntasks"], "4");
        assert!(cfg.enabled_optional_phases().is_empty());
    }

    #[test]
    fn missing_required_phase_is_fatal() {
        let json = minimal_json().replacen(r#""convert""#, r#""benchmark_summary""#, 1);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();

        let err = load_resources(f.path()).unwrap_err();
        assert!(err.to_string().contains("convert"), "got: {err}");
    }

    #[test]
    fn unknown_phase_name_is_rejected() {
        let json = minimal_json().replacen("make_examples", "make_exmaples", 1);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();

        assert!(matches!(
            load_resources(f.path()),
            Err(RetrioError::UnknownPhase(_))
        ));
    }

    #[test]
    fn optional_phases_are_detected() {
        let json = minimal_json().replacen(
            "{",
            r#"{"show_examples": {"mem": "16G"},"#,
            1,
        );
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();

        let cfg = load_resources(f.path()).unwrap();
        assert_eq!(cfg.enabled_optional_phases(), vec![Phase::ShowExamples]);
    }
}
