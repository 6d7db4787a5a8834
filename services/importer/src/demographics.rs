//! Demographic Transformer.
//!
//! Reshapes the wide census aggregates (one column per sex and age band)
//! into [`DemographicRecord`] rows. The census publishes 10-year bands
//! starting at 0; they are stored under the 0-10, 11-20 and 21-30 buckets,
//! and everything not covered by them lands in the derived 40+ bucket.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::EtlError;
use crate::model::{DemographicRecord, DropReason, DropTally};
use crate::normalize::normalize_municipality_code;
use crate::reader::{ColumnContract, ColumnKind, Record, RecordSource};

pub const MUNICIPALITY_CODE: &str = "municipality_code";
pub const MUNICIPALITY_NAME: &str = "municipality_name";
pub const POPULATION_TOTAL: &str = "population_total";
pub const POPULATION_MALE: &str = "population_male";
pub const POPULATION_FEMALE: &str = "population_female";
pub const MALE_0_9: &str = "male_0_9";
pub const MALE_10_19: &str = "male_10_19";
pub const MALE_20_29: &str = "male_20_29";
pub const FEMALE_0_9: &str = "female_0_9";
pub const FEMALE_10_19: &str = "female_10_19";
pub const FEMALE_20_29: &str = "female_20_29";

pub fn contract() -> ColumnContract {
    ColumnContract::new()
        .column(MUNICIPALITY_CODE, "CD_MUN", ColumnKind::Code)
        .column(MUNICIPALITY_NAME, "NM_MUN", ColumnKind::Text)
        .column(POPULATION_TOTAL, "V01006", ColumnKind::Integer)
        .column(POPULATION_MALE, "V01007", ColumnKind::Integer)
        .column(POPULATION_FEMALE, "V01008", ColumnKind::Integer)
        .column(MALE_0_9, "V01018", ColumnKind::Integer)
        .column(MALE_10_19, "V01019", ColumnKind::Integer)
        .column(MALE_20_29, "V01020", ColumnKind::Integer)
        .column(FEMALE_0_9, "V01032", ColumnKind::Integer)
        .column(FEMALE_10_19, "V01033", ColumnKind::Integer)
        .column(FEMALE_20_29, "V01034", ColumnKind::Integer)
}

/// A census row as read; `None` marks a suppressed or missing value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCensusRecord {
    pub municipality_code: Option<String>,
    pub municipality_name: Option<String>,
    pub population_total: Option<i64>,
    pub population_male: Option<i64>,
    pub population_female: Option<i64>,
    pub male_0_9: Option<i64>,
    pub male_10_19: Option<i64>,
    pub male_20_29: Option<i64>,
    pub female_0_9: Option<i64>,
    pub female_10_19: Option<i64>,
    pub female_20_29: Option<i64>,
}

impl RawCensusRecord {
    pub fn from_record(record: &Record) -> Self {
        Self {
            municipality_code: record.text(MUNICIPALITY_CODE).map(str::to_string),
            municipality_name: record.text(MUNICIPALITY_NAME).map(str::to_string),
            population_total: record.integer(POPULATION_TOTAL),
            population_male: record.integer(POPULATION_MALE),
            population_female: record.integer(POPULATION_FEMALE),
            male_0_9: record.integer(MALE_0_9),
            male_10_19: record.integer(MALE_10_19),
            male_20_29: record.integer(MALE_20_29),
            female_0_9: record.integer(FEMALE_0_9),
            female_10_19: record.integer(FEMALE_10_19),
            female_20_29: record.integer(FEMALE_20_29),
        }
    }

    fn to_demographic(&self, municipality_code_width: usize) -> Option<DemographicRecord> {
        let municipality_code =
            normalize_municipality_code(self.municipality_code.as_deref()?, municipality_code_width);
        if municipality_code.is_empty() {
            return None;
        }

        // overflowing sums are treated like missing values
        let population_total = self.population_total?;
        let age_0_10 = self.male_0_9?.checked_add(self.female_0_9?)?;
        let age_11_20 = self.male_10_19?.checked_add(self.female_10_19?)?;
        let age_21_30 = self.male_20_29?.checked_add(self.female_20_29?)?;
        let sourced = age_0_10.checked_add(age_11_20)?.checked_add(age_21_30)?;

        Some(DemographicRecord {
            municipality_code,
            municipality_name: self.municipality_name.clone()?,
            population_total,
            population_male: self.population_male?,
            population_female: self.population_female?,
            age_0_10,
            age_11_20,
            age_21_30,
            age_40_plus: population_total.checked_sub(sourced)?,
        })
    }
}

pub fn read_census(
    source: &dyn RecordSource,
    header_overrides: &BTreeMap<String, String>,
) -> Result<Vec<RawCensusRecord>, EtlError> {
    let contract = contract().with_header_overrides(header_overrides);
    source
        .read(&contract)?
        .map(|record| record.map(|r| RawCensusRecord::from_record(&r)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformedDemographics {
    pub records: Vec<DemographicRecord>,
    pub drops: DropTally,
}

/// Rows with any null field are dropped; after code truncation the first
/// row per municipality wins.
pub fn transform(
    raw_records: impl IntoIterator<Item = RawCensusRecord>,
    municipality_code_width: usize,
) -> TransformedDemographics {
    let mut out = TransformedDemographics::default();
    let mut seen = HashSet::new();

    for raw in raw_records {
        let Some(record) = raw.to_demographic(municipality_code_width) else {
            out.drops.record(DropReason::IncompleteCensusRow);
            continue;
        };
        if !seen.insert(record.municipality_code.clone()) {
            debug!(municipality = %record.municipality_code, "duplicate census row discarded");
            out.drops.record(DropReason::DuplicateMunicipality);
            continue;
        }
        out.records.push(record);
    }

    out
}
