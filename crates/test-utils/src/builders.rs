#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use retrio::config::metadata::{GenomeInputs, SampleIds, Sex, Trio};
use retrio::config::{ResourceConfig, RunContext};
use retrio::types::{Parent, Phase};

/// Builder for [`Trio`] to simplify test setup.
pub struct TrioBuilder {
    order: u32,
    name: String,
    tests: usize,
    regions_file: Option<PathBuf>,
    pop_vcf: Option<PathBuf>,
}

impl TrioBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            order: 1,
            name: name.to_string(),
            tests: 1,
            regions_file: None,
            pop_vcf: None,
        }
    }

    pub fn order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn tests(mut self, tests: usize) -> Self {
        self.tests = tests;
        self
    }

    pub fn regions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.regions_file = Some(path.into());
        self
    }

    pub fn pop_vcf(mut self, path: impl Into<PathBuf>) -> Self {
        self.pop_vcf = Some(path.into());
        self
    }

    pub fn build(self) -> Trio {
        let genome = |member: &str| GenomeInputs {
            reads: PathBuf::from(format!("/data/{member}.bam")),
            truth_vcf: PathBuf::from(format!("/data/{member}.vcf.gz")),
            callable_bed: PathBuf::from(format!("/data/{member}.bed")),
        };
        let ids = |member: &str| SampleIds {
            sample_id: format!("{member}-sample"),
            lab_id: format!("{member}-lab"),
        };

        Trio {
            order: self.order,
            name: self.name,
            child_ids: ids("child"),
            father_ids: ids("father"),
            mother_ids: ids("mother"),
            child_sex: Sex::Female,
            reference: PathBuf::from("/ref/grch38.fa"),
            pop_vcf: self.pop_vcf,
            regions_file: self.regions_file,
            child: genome("child"),
            father: genome("father"),
            mother: genome("mother"),
            tests: (1..=self.tests).map(|k| genome(&format!("test{k}"))).collect(),
        }
    }
}

/// A `RunContext` with test-friendly defaults: father-first, both
/// iterations, two regions, no overwrite, no dry-run.
pub fn test_context(output_root: impl Into<PathBuf>) -> RunContext {
    RunContext {
        output_root: output_root.into(),
        starting_parent: Parent::Father,
        start_itr: 1,
        stop_itr: 2,
        warm_start: None,
        num_regions: Some(2),
        overwrite: false,
        dry_run: false,
    }
}

/// A resource config covering the eight required phases.
pub fn minimal_resources() -> ResourceConfig {
    resources_with_optional(&[])
}

/// A resource config covering the required phases plus the given optional
/// analysis phases.
pub fn resources_with_optional(optional: &[Phase]) -> ResourceConfig {
    let mut map = BTreeMap::new();
    for phase in Phase::REQUIRED.iter().chain(optional.iter()) {
        let mut params = BTreeMap::new();
        params.insert("partition".to_string(), "compute".to_string());
        params.insert("ntasks".to_string(), "4".to_string());
        map.insert(*phase, params);
    }
    ResourceConfig::from_map(map).expect("builder resources are valid")
}
