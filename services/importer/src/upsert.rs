//! Upsert Writer - insert-or-update keyed rows.
//!
//! On key conflict only the table's mutable columns are overwritten, so
//! writing the same rows twice leaves the same final state.

use sqlx::AnyConnection;
use tracing::debug;

use crate::error::EtlError;
use crate::model::{DemographicRecord, Facility, MunicipalAggregate};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
}

/// Target table: every column written, the conflict key, and the subset of
/// non-key columns an existing row may have overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub key_columns: &'static [&'static str],
    pub mutable_columns: &'static [&'static str],
}

/// A row that can be written to a table; values follow `TableSpec::columns`.
pub trait UpsertRow {
    fn values(&self) -> Vec<SqlValue>;
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TableSpec {
    pub fn validate(&self) -> Result<(), EtlError> {
        let invalid = |msg: String| Err(EtlError::InvalidTable(format!("{}: {msg}", self.name)));

        if !is_identifier(self.name) {
            return invalid("table name is not a plain identifier".into());
        }
        if self.columns.is_empty() || self.key_columns.is_empty() {
            return invalid("columns and key columns must not be empty".into());
        }
        if let Some(c) = self.columns.iter().find(|c| !is_identifier(c)) {
            return invalid(format!("column '{c}' is not a plain identifier"));
        }
        for (i, c) in self.columns.iter().enumerate() {
            if self.columns[..i].contains(c) {
                return invalid(format!("column '{c}' listed twice"));
            }
        }
        for k in self.key_columns {
            if !self.columns.contains(k) {
                return invalid(format!("key column '{k}' is not a table column"));
            }
        }
        for m in self.mutable_columns {
            if !self.columns.contains(m) {
                return invalid(format!("mutable column '{m}' is not a table column"));
            }
            if self.key_columns.contains(m) {
                return invalid(format!("key column '{m}' cannot be mutable"));
            }
        }
        Ok(())
    }
}

/// `INSERT ... ON CONFLICT (keys) DO UPDATE SET c = excluded.c` for one row.
pub fn build_upsert_sql(spec: &TableSpec) -> Result<String, EtlError> {
    spec.validate()?;

    let placeholders: Vec<String> = (1..=spec.columns.len()).map(|i| format!("${i}")).collect();
    let conflict = if spec.mutable_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let sets: Vec<String> = spec
            .mutable_columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        format!("DO UPDATE SET {}", sets.join(", "))
    };

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        spec.name,
        spec.columns.join(", "),
        placeholders.join(", "),
        spec.key_columns.join(", "),
        conflict
    ))
}

/// Write `rows` on `conn`. Transaction scope is the caller's.
pub async fn upsert<R: UpsertRow>(
    conn: &mut AnyConnection,
    spec: &TableSpec,
    rows: &[R],
) -> Result<u64, EtlError> {
    let sql = build_upsert_sql(spec)?;
    let mut affected = 0;

    for row in rows {
        let values = row.values();
        if values.len() != spec.columns.len() {
            return Err(EtlError::InvalidTable(format!(
                "{}: row has {} values for {} columns",
                spec.name,
                values.len(),
                spec.columns.len()
            )));
        }

        let mut query = sqlx::query(&sql);
        for value in values {
            query = match value {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Text(s) => query.bind(s),
                SqlValue::Integer(i) => query.bind(i),
                SqlValue::Float(f) => query.bind(f),
            };
        }
        affected += query.execute(&mut *conn).await?.rows_affected();
    }

    debug!(table = spec.name, rows = rows.len(), affected, "upsert complete");
    Ok(affected)
}

// =============================================================================
// ROW MAPPINGS
// =============================================================================

impl UpsertRow for Facility {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.facility_code.clone()),
            SqlValue::Text(self.municipality_code.clone()),
            SqlValue::Text(self.name.clone()),
            SqlValue::Text(self.street_address.clone()),
            SqlValue::Text(self.district.clone()),
            SqlValue::Float(self.latitude),
            SqlValue::Float(self.longitude),
            SqlValue::Text(self.postal_code.clone()),
        ]
    }
}

impl UpsertRow for MunicipalAggregate {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.municipality_code.clone()),
            SqlValue::Integer(self.total_facilities),
            SqlValue::Integer(self.total_physicians),
            SqlValue::Integer(self.total_nurses),
        ]
    }
}

impl UpsertRow for DemographicRecord {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.municipality_code.clone()),
            SqlValue::Text(self.municipality_name.clone()),
            SqlValue::Integer(self.population_total),
            SqlValue::Integer(self.population_male),
            SqlValue::Integer(self.population_female),
            SqlValue::Integer(self.age_0_10),
            SqlValue::Integer(self.age_11_20),
            SqlValue::Integer(self.age_21_30),
            SqlValue::Integer(self.age_40_plus),
        ]
    }
}
