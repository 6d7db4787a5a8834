//! Municipal overview: the joined output handed to report rendering.

use std::collections::HashMap;

use serde::Serialize;

use crate::facilities::FacilityKind;
use crate::model::{DemographicRecord, Facility, MunicipalAggregate};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MunicipalOverview {
    pub municipality_code: String,
    pub totals: MunicipalAggregate,
    /// Absent when the census has no usable row for the municipality.
    pub demographics: Option<DemographicRecord>,
    pub geolocated_facilities: i64,
    pub basic_units: i64,
    pub facilities_per_10k: f64,
    pub physicians_per_1k: f64,
    pub nurses_per_1k: f64,
    pub professionals_per_facility: f64,
}

fn ratio(numerator: i64, denominator: i64, scale: f64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    numerator as f64 * scale / denominator as f64
}

/// One overview per aggregate row, in the aggregates' order.
pub fn overview(
    aggregates: &[MunicipalAggregate],
    demographics: &[DemographicRecord],
    facilities: &[Facility],
) -> Vec<MunicipalOverview> {
    let census: HashMap<&str, &DemographicRecord> = demographics
        .iter()
        .map(|d| (d.municipality_code.as_str(), d))
        .collect();

    let mut geolocated: HashMap<&str, i64> = HashMap::new();
    let mut basic_units: HashMap<&str, i64> = HashMap::new();
    for facility in facilities {
        let code = facility.municipality_code.as_str();
        if facility.is_geolocated() {
            *geolocated.entry(code).or_insert(0) += 1;
        }
        if facility.kind() == FacilityKind::BasicUnit {
            *basic_units.entry(code).or_insert(0) += 1;
        }
    }

    aggregates
        .iter()
        .map(|totals| {
            let code = totals.municipality_code.as_str();
            let demographics = census.get(code).map(|d| (*d).clone());
            let population = demographics.as_ref().map_or(0, |d| d.population_total);

            MunicipalOverview {
                municipality_code: totals.municipality_code.clone(),
                geolocated_facilities: geolocated.get(code).copied().unwrap_or(0),
                basic_units: basic_units.get(code).copied().unwrap_or(0),
                facilities_per_10k: ratio(totals.total_facilities, population, 10_000.0),
                physicians_per_1k: ratio(totals.total_physicians, population, 1_000.0),
                nurses_per_1k: ratio(totals.total_nurses, population, 1_000.0),
                professionals_per_facility: ratio(
                    totals.total_physicians + totals.total_nurses,
                    totals.total_facilities,
                    1.0,
                ),
                totals: totals.clone(),
                demographics,
            }
        })
        .collect()
}
