//! Aggregate Merger.

use std::collections::BTreeMap;

use crate::model::{Facility, MunicipalAggregate};

/// Consolidated facilities per municipality.
pub fn count_facilities(facilities: &[Facility]) -> BTreeMap<String, i64> {
    let mut counts = BTreeMap::new();
    for facility in facilities {
        *counts.entry(facility.municipality_code.clone()).or_insert(0) += 1;
    }
    counts
}

/// Left join anchored on `facility_counts`: one row per municipality with at
/// least one facility, missing professional counts as 0. Rows come out
/// ordered by municipality code.
pub fn merge(
    facility_counts: &BTreeMap<String, i64>,
    physician_counts: &BTreeMap<String, i64>,
    nurse_counts: &BTreeMap<String, i64>,
) -> Vec<MunicipalAggregate> {
    facility_counts
        .iter()
        .filter(|(_, total)| **total > 0)
        .map(|(municipality, total)| MunicipalAggregate {
            municipality_code: municipality.clone(),
            total_facilities: *total,
            total_physicians: physician_counts.get(municipality).copied().unwrap_or(0),
            total_nurses: nurse_counts.get(municipality).copied().unwrap_or(0),
        })
        .collect()
}
