//! Entities produced by one import run.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A consolidated health facility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facility {
    pub facility_code: String,
    pub municipality_code: String,
    pub name: String,
    pub street_address: String,
    pub district: String,
    /// 0.0 when the source has no geolocation.
    pub latitude: f64,
    pub longitude: f64,
    pub postal_code: String,
}

impl Facility {
    /// Both coordinates must be present; either one at 0.0 is the sentinel.
    pub fn is_geolocated(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }
}

/// One professional-to-facility row. Consumed during aggregation, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfessionalAssignment {
    pub raw_unit_code: String,
    pub professional_id: String,
    pub occupation_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MunicipalAggregate {
    pub municipality_code: String,
    pub total_facilities: i64,
    pub total_physicians: i64,
    pub total_nurses: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemographicRecord {
    pub municipality_code: String,
    pub municipality_name: String,
    pub population_total: i64,
    pub population_male: i64,
    pub population_female: i64,
    pub age_0_10: i64,
    pub age_11_20: i64,
    pub age_21_30: i64,
    /// Remainder of the total after the three sourced bands; negative when
    /// the source is inconsistent.
    pub age_40_plus: i64,
}

impl DemographicRecord {
    pub fn bucket_sum(&self) -> i64 {
        self.age_0_10 + self.age_11_20 + self.age_21_30 + self.age_40_plus
    }
}

// =============================================================================
// DROP ACCOUNTING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingKey,
    DuplicateFacility,
    UnmatchedFacility,
    UnclassifiedOccupation,
    IncompleteCensusRow,
    DuplicateMunicipality,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::MissingKey => "missing_key",
            DropReason::DuplicateFacility => "duplicate_facility",
            DropReason::UnmatchedFacility => "unmatched_facility",
            DropReason::UnclassifiedOccupation => "unclassified_occupation",
            DropReason::IncompleteCensusRow => "incomplete_census_row",
            DropReason::DuplicateMunicipality => "duplicate_municipality",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows excluded from output, counted per reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DropTally {
    counts: BTreeMap<DropReason, u64>,
}

impl DropTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reason: DropReason) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn count(&self, reason: DropReason) -> u64 {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn absorb(&mut self, other: &DropTally) {
        for (reason, n) in &other.counts {
            *self.counts.entry(*reason).or_insert(0) += n;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DropReason, u64)> + '_ {
        self.counts.iter().map(|(r, n)| (*r, *n))
    }
}

impl fmt::Display for DropTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let parts: Vec<String> = self.iter().map(|(r, n)| format!("{r}={n}")).collect();
        f.write_str(&parts.join(", "))
    }
}
