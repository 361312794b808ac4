// src/config/metadata.rs

//! Trio metadata loading.
//!
//! The metadata file is a CSV with one row per trio: 21 fixed columns
//! (run order/name, sample id pairs, child sex, reference, optional
//! population VCF and region file, then a reads/truth/callable triple per
//! family genome), followed by one reads/truth/callable triple per held-out
//! test genome. Row order after sorting by `RunOrder` defines the processing
//! sequence; trios are immutable once loaded.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use tracing::debug;

use crate::errors::{Result, RetrioError};

/// The fixed column headers, in file order. Test-genome triples follow.
const FIXED_COLUMNS: [&str; 21] = [
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

/// Sex of the trio's child, as declared in metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "M" | "m" => Ok(Sex::Male),
            "F" | "f" => Ok(Sex::Female),
            "U" | "u" | "" => Ok(Sex::Unknown),
            other => Err(format!("invalid ChildSex: {other:?} (expected M, F or U)")),
        }
    }
}

/// External sample identifiers for one family member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIds {
    pub sample_id: String,
    pub lab_id: String,
}

/// Input files for one genome (family member or held-out test).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeInputs {
    pub reads: PathBuf,
    pub truth_vcf: PathBuf,
    pub callable_bed: PathBuf,
}

/// One family trio: the unit of a full re-training iteration pair.
#[derive(Debug, Clone)]
pub struct Trio {
    pub order: u32,
    pub name: String,
    pub child_ids: SampleIds,
    pub father_ids: SampleIds,
    pub mother_ids: SampleIds,
    pub child_sex: Sex,
    pub reference: PathBuf,
    pub pop_vcf: Option<PathBuf>,
    pub regions_file: Option<PathBuf>,
    pub child: GenomeInputs,
    pub father: GenomeInputs,
    pub mother: GenomeInputs,
    /// Held-out test genomes, in column order (1-based when indexed).
    pub tests: Vec<GenomeInputs>,
}

impl Trio {
    pub fn num_tests(&self) -> u32 {
        self.tests.len() as u32
    }
}

/// Load and validate the trio metadata CSV.
///
/// Returns trios sorted by `RunOrder`. `num_tests`, if given, limits how many
/// trailing test-genome triples are used per trio.
pub fn load_metadata(path: impl AsRef<Path>, num_tests: Option<u32>) -> Result<Vec<Trio>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading metadata file at {path:?}"))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(contents.as_bytes());

    let headers = reader
        .headers()
        .map_err(RetrioError::Csv)?
        .clone();

    let index = header_index(&headers)?;

    let mut trios = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record.map_err(RetrioError::Csv)?;
        let trio = parse_row(&record, &index, headers.len(), num_tests)
            .map_err(|e| match e {
                RetrioError::Config(msg) => {
                    RetrioError::Config(format!("metadata row {}: {msg}", row_no + 2))
                }
                other => other,
            })?;
        trios.push(trio);
    }

    if trios.is_empty() {
        return Err(RetrioError::Config(
            "metadata file contains no trio rows".to_string(),
        ));
    }

    trios.sort_by_key(|t| t.order);
    for pair in trios.windows(2) {
        if pair[0].order == pair[1].order {
            return Err(RetrioError::Config(format!(
                "duplicate RunOrder {} (runs {:?} and {:?})",
                pair[0].order, pair[0].name, pair[1].name
            )));
        }
    }

    debug!(path = ?path, trios = trios.len(), "loaded trio metadata");
    Ok(trios)
}

/// Map fixed column names to their positions, requiring all of them.
fn header_index(headers: &csv::StringRecord) -> Result<HashMap<&'static str, usize>> {
    let mut index = HashMap::new();
    for name in FIXED_COLUMNS {
        let pos = headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| {
                RetrioError::Config(format!("metadata is missing required column {name:?}"))
            })?;
        index.insert(name, pos);
    }
    Ok(index)
}

fn parse_row(
    record: &csv::StringRecord,
    index: &HashMap<&'static str, usize>,
    header_len: usize,
    num_tests: Option<u32>,
) -> Result<Trio> {
    let field = |name: &'static str| -> &str {
        record.get(index[name]).unwrap_or("").trim()
    };

    let required = |name: &'static str| -> Result<String> {
        let v = field(name);
        if v.is_empty() {
            Err(RetrioError::Config(format!("column {name:?} is empty")))
        } else {
            Ok(v.to_string())
        }
    };

    let optional_path = |name: &'static str| -> Option<PathBuf> {
        let v = field(name);
        if v.is_empty() { None } else { Some(PathBuf::from(v)) }
    };

    let order: u32 = required("RunOrder")?
        .parse()
        .map_err(|_| RetrioError::Config(format!("RunOrder {:?} is not a number", field("RunOrder"))))?;

    let child_sex: Sex = field("ChildSex").parse().map_err(RetrioError::Config)?;

    let ids = |sample: &'static str, lab: &'static str| -> Result<SampleIds> {
        Ok(SampleIds {
            sample_id: required(sample)?,
            lab_id: required(lab)?,
        })
    };

    let genome = |reads: &'static str, truth: &'static str, bed: &'static str| -> Result<GenomeInputs> {
        Ok(GenomeInputs {
            reads: PathBuf::from(required(reads)?),
            truth_vcf: PathBuf::from(required(truth)?),
            callable_bed: PathBuf::from(required(bed)?),
        })
    };

    // Trailing columns: one (reads, truth, callable) triple per test genome.
    let trailing: Vec<&str> = (FIXED_COLUMNS.len()..header_len.max(record.len()))
        .map(|i| record.get(i).unwrap_or("").trim())
        .collect();

    let mut tests = Vec::new();
    for chunk in trailing.chunks(3) {
        if chunk.iter().all(|f| f.is_empty()) {
            continue;
        }
        if chunk.len() < 3 || chunk.iter().any(|f| f.is_empty()) {
            return Err(RetrioError::Config(format!(
                "incomplete test-genome column triple after test {}",
                tests.len()
            )));
        }
        tests.push(GenomeInputs {
            reads: PathBuf::from(chunk[0]),
            truth_vcf: PathBuf::from(chunk[1]),
            callable_bed: PathBuf::from(chunk[2]),
        });
    }

    if let Some(n) = num_tests {
        if (tests.len() as u32) < n {
            return Err(RetrioError::Config(format!(
                "--num-tests {n} requested but metadata declares only {} test genomes",
                tests.len()
            )));
        }
        tests.truncate(n as usize);
    }

    if tests.is_empty() {
        return Err(RetrioError::Config(
            "trio declares no test genomes (columns 22+ must hold at least one reads/truth/callable triple)"
                .to_string(),
        ));
    }

    Ok(Trio {
        order,
        name: required("RunName")?,
        child_ids: ids("ChildSampleID", "ChildLabID")?,
        father_ids: ids("FatherSampleID", "FatherLabID")?,
        mother_ids: ids("MotherSampleID", "MotherLabID")?,
        child_sex,
        reference: PathBuf::from(required("RefFASTA")?),
        pop_vcf: optional_path("PopVCF"),
        regions_file: optional_path("RegionsFile"),
        child: genome("ChildReadsBAM", "ChildTruthVCF", "ChildCallableBED")?,
        father: genome("FatherReadsBAM", "FatherTruthVCF", "FatherCallableBED")?,
        mother: genome("MotherReadsBAM", "MotherTruthVCF", "MotherCallableBED")?,
        tests,
    })
}

/// Count the intervals in a BED region file (non-empty, non-comment lines).
///
/// Used to size the per-region fan-out when a trio declares a region file.
pub fn count_bed_intervals(path: impl AsRef<Path>) -> Result<u32> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading region file at {path:?}"))?;

    let count = contents
        .lines()
        .filter(|l| {
            let l = l.trim();
            !l.is_empty() && !l.starts_with('#') && !l.starts_with("track")
        })
        .count();

    if count == 0 {
        return Err(RetrioError::Config(format!(
            "region file {path:?} declares no intervals"
        )));
    }
    Ok(count as u32)
}
