//! Professional Classifier/Aggregator.
//!
//! Attributes each assignment to a municipality through its facility,
//! classifies it by occupation and counts distinct professionals per
//! municipality and role.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::EtlError;
use crate::model::{DropReason, DropTally, ProfessionalAssignment};
use crate::normalize::normalize_unit_code;
use crate::reader::{ColumnContract, ColumnKind, RecordSource};

pub const RAW_UNIT_CODE: &str = "raw_unit_code";
pub const PROFESSIONAL_ID: &str = "professional_id";
pub const OCCUPATION_CODE: &str = "occupation_code";

pub fn contract() -> ColumnContract {
    ColumnContract::new()
        .column(RAW_UNIT_CODE, "CO_UNIDADE", ColumnKind::Code)
        .column(PROFESSIONAL_ID, "CO_PROFISSIONAL_SUS", ColumnKind::Code)
        .column(OCCUPATION_CODE, "CO_CBO", ColumnKind::Code)
}

/// Rows missing any of the three fields are dropped here as `MissingKey`.
pub fn read_assignments(
    source: &dyn RecordSource,
    header_overrides: &BTreeMap<String, String>,
    drops: &mut DropTally,
) -> Result<Vec<ProfessionalAssignment>, EtlError> {
    let contract = contract().with_header_overrides(header_overrides);
    let mut assignments = Vec::new();

    for record in source.read(&contract)? {
        let record = record?;
        match (
            record.text(RAW_UNIT_CODE),
            record.text(PROFESSIONAL_ID),
            record.text(OCCUPATION_CODE),
        ) {
            (Some(unit), Some(professional), Some(occupation)) => {
                assignments.push(ProfessionalAssignment {
                    raw_unit_code: unit.to_string(),
                    professional_id: professional.to_string(),
                    occupation_code: occupation.to_string(),
                })
            }
            _ => drops.record(DropReason::MissingKey),
        }
    }

    Ok(assignments)
}

// =============================================================================
// OCCUPATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Physician,
    Nurse,
}

/// Occupation codes (CBO) that identify each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupationLists {
    physician_codes: Vec<String>,
    nurse_codes: Vec<String>,
}

impl Default for OccupationLists {
    fn default() -> Self {
        Self::new(
            ["225125", "225142", "225135", "225124", "225130"]
                .map(String::from)
                .to_vec(),
            ["223505", "223565"].map(String::from).to_vec(),
        )
    }
}

impl OccupationLists {
    pub fn new(physician_codes: Vec<String>, nurse_codes: Vec<String>) -> Self {
        Self {
            physician_codes,
            nurse_codes,
        }
    }

    pub fn physician_codes(&self) -> &[String] {
        &self.physician_codes
    }

    pub fn nurse_codes(&self) -> &[String] {
        &self.nurse_codes
    }

    /// A code listed under both roles counts as a physician.
    pub fn classify(&self, occupation_code: &str) -> Option<Role> {
        let code = occupation_code.trim();
        if self.physician_codes.iter().any(|c| c == code) {
            Some(Role::Physician)
        } else if self.nurse_codes.iter().any(|c| c == code) {
            Some(Role::Nurse)
        } else {
            None
        }
    }
}

// =============================================================================
// CLASSIFY AND COUNT
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfessionalCounts {
    pub physicians: BTreeMap<String, i64>,
    pub nurses: BTreeMap<String, i64>,
    pub drops: DropTally,
}

#[derive(Debug, Clone)]
pub struct ProfessionalClassifier {
    lists: OccupationLists,
    facility_code_width: usize,
}

impl ProfessionalClassifier {
    pub fn new(lists: OccupationLists, facility_code_width: usize) -> Self {
        Self {
            lists,
            facility_code_width,
        }
    }

    pub fn classify_and_count<'a>(
        &self,
        assignments: impl IntoIterator<Item = &'a ProfessionalAssignment>,
        municipality_by_facility: &HashMap<String, String>,
    ) -> ProfessionalCounts {
        let mut drops = DropTally::new();
        let mut distinct: HashMap<(Role, &str), HashSet<&str>> = HashMap::new();

        for assignment in assignments {
            let facility_code =
                normalize_unit_code(assignment.raw_unit_code.trim(), self.facility_code_width);
            let Some(municipality) = municipality_by_facility.get(&facility_code) else {
                drops.record(DropReason::UnmatchedFacility);
                continue;
            };
            let Some(role) = self.lists.classify(&assignment.occupation_code) else {
                drops.record(DropReason::UnclassifiedOccupation);
                continue;
            };
            distinct
                .entry((role, municipality.as_str()))
                .or_default()
                .insert(assignment.professional_id.trim());
        }

        let mut counts = ProfessionalCounts {
            drops,
            ..Default::default()
        };
        for ((role, municipality), professionals) in distinct {
            let target = match role {
                Role::Physician => &mut counts.physicians,
                Role::Nurse => &mut counts.nurses,
            };
            target.insert(municipality.to_string(), professionals.len() as i64);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemorySource;

    const PHYSICIAN: &str = "225125";
    const NURSE: &str = "223505";

    fn assignment(unit: &str, professional: &str, occupation: &str) -> ProfessionalAssignment {
        ProfessionalAssignment {
            raw_unit_code: unit.to_string(),
            professional_id: professional.to_string(),
            occupation_code: occupation.to_string(),
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(f, m)| (f.to_string(), m.to_string()))
            .collect()
    }

    // -------------------------------------------------------------------------
    // CLASSIFICATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_default_lists_classify_roles() {
        let lists = OccupationLists::default();
        assert_eq!(lists.classify("225142"), Some(Role::Physician));
        assert_eq!(lists.classify("223565"), Some(Role::Nurse));
        assert_eq!(lists.classify("322205"), None);
    }

    #[test]
    fn test_injected_lists_replace_defaults() {
        let lists = OccupationLists::new(vec!["1".into()], vec!["2".into(), "1".into()]);
        assert_eq!(lists.classify("1"), Some(Role::Physician));
        assert_eq!(lists.classify("2"), Some(Role::Nurse));
        assert_eq!(lists.classify(PHYSICIAN), None);
    }

    // -------------------------------------------------------------------------
    // DISTINCT COUNTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_professional_counted_once_per_municipality() {
        let classifier = ProfessionalClassifier::new(OccupationLists::default(), 2);
        let map = lookup(&[("A1", "110001"), ("A2", "110001")]);
        let rows = vec![
            assignment("110001A1", "P1", PHYSICIAN),
            assignment("110001A2", "P1", PHYSICIAN),
            assignment("110001A1", "P1", PHYSICIAN),
            assignment("110001A1", "P2", NURSE),
        ];

        let counts = classifier.classify_and_count(&rows, &map);
        assert_eq!(counts.physicians["110001"], 1);
        assert_eq!(counts.nurses["110001"], 1);
        assert!(counts.drops.is_empty());
    }

    #[test]
    fn test_same_professional_counts_in_each_municipality() {
        let classifier = ProfessionalClassifier::new(OccupationLists::default(), 7);
        let map = lookup(&[("2369958", "110001"), ("2369959", "110002")]);
        let rows = vec![
            assignment("1100012369958", "P1", PHYSICIAN),
            assignment("1100022369959", "P1", PHYSICIAN),
        ];

        let counts = classifier.classify_and_count(&rows, &map);
        assert_eq!(counts.physicians["110001"], 1);
        assert_eq!(counts.physicians["110002"], 1);
        assert!(counts.nurses.is_empty());
    }

    #[test]
    fn test_unmatched_and_unclassified_rows_are_dropped() {
        let classifier = ProfessionalClassifier::new(OccupationLists::default(), 7);
        let map = lookup(&[("2369958", "110001")]);
        let rows = vec![
            assignment("1100019999999", "P1", PHYSICIAN),
            assignment("1100012369958", "P2", "515105"),
            assignment("1100012369958", "P3", NURSE),
        ];

        let counts = classifier.classify_and_count(&rows, &map);
        assert!(counts.physicians.is_empty());
        assert_eq!(counts.nurses["110001"], 1);
        assert_eq!(counts.drops.count(DropReason::UnmatchedFacility), 1);
        assert_eq!(counts.drops.count(DropReason::UnclassifiedOccupation), 1);
    }

    #[test]
    fn test_read_assignments_drops_incomplete_rows() {
        let source = MemorySource::new("assignments", ["CO_UNIDADE", "CO_PROFISSIONAL_SUS", "CO_CBO"])
            .row(["1100012369958", "700000000000001", "225125"])
            .row(["1100012369958.0", "", "225125"])
            .row(["1100012369958.0", "700000000000002", "223505.0"]);

        let mut drops = DropTally::new();
        let rows = read_assignments(&source, &BTreeMap::new(), &mut drops).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].raw_unit_code, "1100012369958");
        assert_eq!(rows[1].occupation_code, "223505");
        assert_eq!(drops.count(DropReason::MissingKey), 1);
    }
}
