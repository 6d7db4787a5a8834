//! Schema Manager - target tables, their upsert specs and the run log.
//!
//! DDL is portable between Postgres and SQLite and safe to re-apply.

use sqlx::AnyConnection;

use crate::error::EtlError;
use crate::upsert::TableSpec;

pub const FACILITIES: TableSpec = TableSpec {
    name: "health_facilities",
    columns: &[
        "facility_code",
        "municipality_code",
        "name",
        "street_address",
        "district",
        "latitude",
        "longitude",
        "postal_code",
    ],
    key_columns: &["facility_code"],
    mutable_columns: &[
        "municipality_code",
        "name",
        "street_address",
        "district",
        "latitude",
        "longitude",
        "postal_code",
    ],
};

pub const MUNICIPAL_TOTALS: TableSpec = TableSpec {
    name: "municipal_health_totals",
    columns: &[
        "municipality_code",
        "total_facilities",
        "total_physicians",
        "total_nurses",
    ],
    key_columns: &["municipality_code"],
    mutable_columns: &["total_facilities", "total_physicians", "total_nurses"],
};

pub const DEMOGRAPHICS: TableSpec = TableSpec {
    name: "municipal_demographics",
    columns: &[
        "municipality_code",
        "municipality_name",
        "population_total",
        "population_male",
        "population_female",
        "age_0_10",
        "age_11_20",
        "age_21_30",
        "age_40_plus",
    ],
    key_columns: &["municipality_code"],
    mutable_columns: &[
        "municipality_name",
        "population_total",
        "population_male",
        "population_female",
        "age_0_10",
        "age_11_20",
        "age_21_30",
        "age_40_plus",
    ],
};

/// Tables cleared by a full refresh, in load order.
pub const REFRESHED_TABLES: [TableSpec; 3] = [FACILITIES, MUNICIPAL_TOTALS, DEMOGRAPHICS];

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS health_facilities (
        facility_code     TEXT PRIMARY KEY,
        municipality_code TEXT NOT NULL,
        name              TEXT NOT NULL,
        street_address    TEXT NOT NULL,
        district          TEXT NOT NULL,
        latitude          DOUBLE PRECISION NOT NULL,
        longitude         DOUBLE PRECISION NOT NULL,
        postal_code       TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_facilities_municipality
        ON health_facilities (municipality_code)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS municipal_health_totals (
        municipality_code TEXT PRIMARY KEY,
        total_facilities  BIGINT NOT NULL DEFAULT 0,
        total_physicians  BIGINT NOT NULL DEFAULT 0,
        total_nurses      BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS municipal_demographics (
        municipality_code TEXT PRIMARY KEY,
        municipality_name TEXT NOT NULL,
        population_total  BIGINT NOT NULL,
        population_male   BIGINT NOT NULL,
        population_female BIGINT NOT NULL,
        age_0_10          BIGINT NOT NULL,
        age_11_20         BIGINT NOT NULL,
        age_21_30         BIGINT NOT NULL,
        age_40_plus       BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS etl_runs (
        run_id       TEXT PRIMARY KEY,
        started_at   TEXT NOT NULL,
        finished_at  TEXT,
        status       TEXT NOT NULL,
        failed_stage TEXT,
        error        TEXT,
        detail       TEXT
    )
    "#,
];

pub async fn ensure_schema(conn: &mut AnyConnection) -> Result<(), EtlError> {
    for statement in DDL {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Remove every row of one refreshed table.
pub async fn clear_table(conn: &mut AnyConnection, spec: &TableSpec) -> Result<u64, EtlError> {
    spec.validate()?;
    let done = sqlx::query(&format!("DELETE FROM {}", spec.name))
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected())
}
