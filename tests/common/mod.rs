#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub use retrio_test_utils::init_tracing;

/// Write a minimal metadata CSV with one trio and the given number of test
/// genomes, returning its path.
pub fn write_metadata(dir: &Path, run_name: &str, num_tests: usize) -> PathBuf {
    let fixed = [
        "RunOrder",
        "RunName",
        "ChildSampleID",
        "ChildLabID",
        "FatherSampleID",
        "FatherLabID",
        "MotherSampleID",
        "MotherLabID",
        "ChildSex",
        "RefFASTA",
        "PopVCF",
        "RegionsFile",
        "ChildReadsBAM",
        "ChildTruthVCF",
        "ChildCallableBED",
        "FatherReadsBAM",
        "FatherTruthVCF",
        "FatherCallableBED",
        "MotherReadsBAM",
        "MotherTruthVCF",
        "MotherCallableBED",
    ];
    let mut header: Vec<String> = fixed.iter().map(|s| s.to_string()).collect();
    for k in 1..=num_tests {
        header.push(format!("Test{k}ReadsBAM"));
        header.push(format!("Test{k}TruthVCF"));
        header.push(format!("Test{k}CallableBED"));
    }

    let mut row = vec![
        "1".to_string(),
        run_name.to_string(),
        "child-sample".into(),
        "child-lab".into(),
        "father-sample".into(),
        "father-lab".into(),
        "mother-sample".into(),
        "mother-lab".into(),
        "F".into(),
        "/ref/grch38.fa".into(),
        String::new(),
        String::new(),
    ];
    for member in ["child", "father", "mother"] {
        row.push(format!("/data/{member}.bam"));
        row.push(format!("/data/{member}.vcf.gz"));
        row.push(format!("/data/{member}.bed"));
    }
    for k in 1..=num_tests {
        row.push(format!("/data/test{k}.bam"));
        row.push(format!("/data/test{k}.vcf.gz"));
        row.push(format!("/data/test{k}.bed"));
    }

    let path = dir.join("metadata.csv");
    fs::write(&path, format!("{}\n{}\n", header.join(","), row.join(","))).unwrap();
    path
}
