//! Facility Consolidator.
//!
//! Validates and deduplicates the facility extract and derives the
//! facility -> municipality lookup used to attribute professionals.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::error::EtlError;
use crate::model::{DropReason, DropTally, Facility};
use crate::normalize::{normalize_municipality_code, strip_float_suffix};
use crate::reader::{ColumnContract, ColumnKind, Record, RecordSource};

pub const FACILITY_CODE: &str = "facility_code";
pub const MUNICIPALITY_CODE: &str = "municipality_code";
pub const NAME: &str = "name";
pub const STREET_ADDRESS: &str = "street_address";
pub const DISTRICT: &str = "district";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const POSTAL_CODE: &str = "postal_code";

pub fn contract() -> ColumnContract {
    ColumnContract::new()
        .column(FACILITY_CODE, "CNES", ColumnKind::Code)
        .column(MUNICIPALITY_CODE, "IBGE", ColumnKind::Code)
        .column(NAME, "NOME", ColumnKind::Text)
        .column(STREET_ADDRESS, "LOGRADOURO", ColumnKind::Text)
        .column(DISTRICT, "BAIRRO", ColumnKind::Text)
        .column(LATITUDE, "LATITUDE", ColumnKind::Float)
        .column(LONGITUDE, "LONGITUDE", ColumnKind::Float)
        .column(POSTAL_CODE, "CEP", ColumnKind::Code)
}

/// A facility row as read, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFacility {
    pub facility_code: Option<String>,
    pub municipality_code: Option<String>,
    pub name: Option<String>,
    pub street_address: Option<String>,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub postal_code: Option<String>,
}

impl RawFacility {
    pub fn from_record(record: &Record) -> Self {
        let text = |name: &str| record.text(name).map(str::to_string);
        Self {
            facility_code: text(FACILITY_CODE),
            municipality_code: text(MUNICIPALITY_CODE),
            name: text(NAME),
            street_address: text(STREET_ADDRESS),
            district: text(DISTRICT),
            latitude: record.float(LATITUDE),
            longitude: record.float(LONGITUDE),
            postal_code: text(POSTAL_CODE),
        }
    }
}

pub fn read_facilities(
    source: &dyn RecordSource,
    header_overrides: &BTreeMap<String, String>,
) -> Result<Vec<RawFacility>, EtlError> {
    let contract = contract().with_header_overrides(header_overrides);
    source
        .read(&contract)?
        .map(|record| record.map(|r| RawFacility::from_record(&r)))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidatedFacilities {
    /// In source order, one per facility code.
    pub facilities: Vec<Facility>,
    pub municipality_by_facility: HashMap<String, String>,
    pub drops: DropTally,
}

pub fn consolidate(
    raw_facilities: impl IntoIterator<Item = RawFacility>,
    municipality_code_width: usize,
) -> ConsolidatedFacilities {
    let mut out = ConsolidatedFacilities::default();
    let mut seen = HashSet::new();

    for raw in raw_facilities {
        let facility_code = raw.facility_code.as_deref().map(str::trim).unwrap_or("");
        let municipality_code = raw
            .municipality_code
            .as_deref()
            .map(|code| normalize_municipality_code(code, municipality_code_width))
            .unwrap_or_default();

        if facility_code.is_empty() || municipality_code.is_empty() {
            out.drops.record(DropReason::MissingKey);
            continue;
        }
        if !seen.insert(facility_code.to_string()) {
            debug!(facility_code, "duplicate facility discarded");
            out.drops.record(DropReason::DuplicateFacility);
            continue;
        }

        let facility = Facility {
            facility_code: facility_code.to_string(),
            municipality_code,
            name: raw.name.unwrap_or_default(),
            street_address: raw.street_address.unwrap_or_default(),
            district: raw.district.unwrap_or_default(),
            latitude: raw.latitude.unwrap_or(0.0),
            longitude: raw.longitude.unwrap_or(0.0),
            postal_code: raw
                .postal_code
                .as_deref()
                .map(|cep| strip_float_suffix(cep.trim()).to_string())
                .unwrap_or_default(),
        };
        out.municipality_by_facility
            .insert(facility.facility_code.clone(), facility.municipality_code.clone());
        out.facilities.push(facility);
    }

    out
}

// =============================================================================
// FACILITY KIND
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilityKind {
    /// Primary care unit ("UBS" / "Unidade Básica de Saúde").
    BasicUnit,
    Other,
}

pub fn classify_facility(name: &str) -> FacilityKind {
    let upper = name.to_uppercase();
    if upper.contains("UBS") || upper.contains("UNIDADE BASICA") || upper.contains("UNIDADE BÁSICA") {
        FacilityKind::BasicUnit
    } else {
        FacilityKind::Other
    }
}

impl Facility {
    pub fn kind(&self) -> FacilityKind {
        classify_facility(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemorySource;

    fn raw(code: &str, municipality: &str) -> RawFacility {
        RawFacility {
            facility_code: Some(code.to_string()),
            municipality_code: Some(municipality.to_string()),
            ..Default::default()
        }
    }

    // -------------------------------------------------------------------------
    // CONSOLIDATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_keys_are_dropped_and_counted() {
        let rows = vec![
            raw("2369958", "110001"),
            RawFacility {
                facility_code: None,
                municipality_code: Some("110001".into()),
                ..Default::default()
            },
            RawFacility {
                facility_code: Some("2369959".into()),
                municipality_code: None,
                ..Default::default()
            },
            raw("  ", "110001"),
        ];
        let out = consolidate(rows, 6);
        assert_eq!(out.facilities.len(), 1);
        assert_eq!(out.drops.count(DropReason::MissingKey), 3);
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let mut first = raw("2369958", "110001");
        first.name = Some("UBS CENTRO".into());
        let mut second = raw("2369958", "110002");
        second.name = Some("HOSPITAL".into());

        let out = consolidate(vec![first, second], 6);
        assert_eq!(out.facilities.len(), 1);
        assert_eq!(out.facilities[0].name, "UBS CENTRO");
        assert_eq!(out.municipality_by_facility["2369958"], "110001");
        assert_eq!(out.drops.count(DropReason::DuplicateFacility), 1);
    }

    #[test]
    fn test_defaults_and_postal_code_artifact() {
        let mut row = raw("2369958", "1100015");
        row.postal_code = Some("76800000.0".into());
        let out = consolidate(vec![row], 6);
        let facility = &out.facilities[0];
        assert_eq!(facility.municipality_code, "110001");
        assert_eq!(facility.latitude, 0.0);
        assert_eq!(facility.longitude, 0.0);
        assert_eq!(facility.postal_code, "76800000");
        assert_eq!(facility.name, "");
        assert!(!facility.is_geolocated());
    }

    #[test]
    fn test_codes_are_trimmed_not_padded() {
        let out = consolidate(vec![raw(" A1 ", "110001")], 6);
        assert_eq!(out.facilities[0].facility_code, "A1");
        assert!(out.municipality_by_facility.contains_key("A1"));
    }

    #[test]
    fn test_reads_from_source_with_default_headers() {
        let source = MemorySource::new(
            "facilities",
            ["CNES", "IBGE", "NOME", "LOGRADOURO", "BAIRRO", "LATITUDE", "LONGITUDE", "CEP"],
        )
        .row(["2369958", "110001", "UBS Centro", "Rua A", "Centro", "-8,76", "-63.9", "76800000.0"])
        .row(["2369959", "110001", "Hospital", "", "", "", "", ""]);

        let raw = read_facilities(&source, &BTreeMap::new()).unwrap();
        let out = consolidate(raw, 6);
        assert_eq!(out.facilities.len(), 2);
        assert_eq!(out.facilities[0].latitude, -8.76);
        assert_eq!(out.facilities[0].postal_code, "76800000");
        assert_eq!(out.facilities[1].street_address, "");
        assert!(out.drops.is_empty());
    }

    // -------------------------------------------------------------------------
    // KIND
    // -------------------------------------------------------------------------

    #[test]
    fn test_facility_kind_from_name() {
        assert_eq!(classify_facility("UBS Centro"), FacilityKind::BasicUnit);
        assert_eq!(classify_facility("Unidade Básica de Saúde Vila"), FacilityKind::BasicUnit);
        assert_eq!(classify_facility("unidade basica norte"), FacilityKind::BasicUnit);
        assert_eq!(classify_facility("Hospital Regional"), FacilityKind::Other);
    }
}
