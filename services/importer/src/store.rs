//! The persistent store: one connection per run, one transaction per
//! refresh unit, and the `etl_runs` log.

use chrono::Utc;
use sqlx::{AnyConnection, Connection};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EtlError;
use crate::model::{DemographicRecord, Facility, MunicipalAggregate};
use crate::report::{overview, MunicipalOverview};
use crate::schema;
use crate::upsert::{upsert, TableSpec, UpsertRow};

/// One row of `etl_runs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogEntry {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
}

pub struct Store {
    conn: AnyConnection,
}

impl Store {
    /// Accepts `postgres://` and `sqlite:` URLs.
    pub async fn connect(database_url: &str) -> Result<Self, EtlError> {
        sqlx::any::install_default_drivers();
        let conn = AnyConnection::connect(database_url).await?;
        debug!(backend = conn.backend_name(), "store connected");
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<(), EtlError> {
        self.conn.close().await?;
        Ok(())
    }

    pub async fn ensure_schema(&mut self) -> Result<(), EtlError> {
        let mut tx = self.conn.begin().await?;
        schema::ensure_schema(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace the contents of one table: the delete and the reload commit
    /// together, so a failure keeps the previous rows.
    pub async fn replace_table<R: UpsertRow>(
        &mut self,
        spec: &TableSpec,
        rows: &[R],
    ) -> Result<u64, EtlError> {
        let mut tx = self.conn.begin().await?;
        let cleared = schema::clear_table(&mut tx, spec).await?;
        let affected = upsert(&mut tx, spec, rows).await?;
        tx.commit().await?;
        info!(table = spec.name, cleared, rows = rows.len(), "table replaced");
        Ok(affected)
    }

    // -------------------------------------------------------------------------
    // RUN LOG
    // -------------------------------------------------------------------------

    pub async fn start_run(&mut self, run_id: Uuid) -> Result<(), EtlError> {
        sqlx::query("INSERT INTO etl_runs (run_id, started_at, status) VALUES ($1, $2, 'running')")
            .bind(run_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    pub async fn finish_run(
        &mut self,
        run_id: Uuid,
        status: &str,
        failed_stage: Option<&str>,
        error: Option<String>,
        detail: &serde_json::Value,
    ) -> Result<(), EtlError> {
        sqlx::query(
            r#"
            UPDATE etl_runs
            SET finished_at = $2, status = $3, failed_stage = $4, error = $5, detail = $6
            WHERE run_id = $1
            "#,
        )
        .bind(run_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(failed_stage.map(str::to_string))
        .bind(error)
        .bind(detail.to_string())
        .execute(&mut self.conn)
        .await?;
        Ok(())
    }

    /// `(status, failed_stage, error)` of a logged run.
    pub async fn run_status(
        &mut self,
        run_id: Uuid,
    ) -> Result<Option<(String, Option<String>, Option<String>)>, EtlError> {
        let row = sqlx::query_as("SELECT status, failed_stage, error FROM etl_runs WHERE run_id = $1")
            .bind(run_id.to_string())
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(row)
    }

    pub async fn recent_runs(&mut self, limit: i64) -> Result<Vec<RunLogEntry>, EtlError> {
        let rows: Vec<(String, String, Option<String>, String, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT run_id, started_at, finished_at, status, failed_stage, error \
                 FROM etl_runs ORDER BY started_at DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&mut self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(run_id, started_at, finished_at, status, failed_stage, error)| RunLogEntry {
                    run_id,
                    started_at,
                    finished_at,
                    status,
                    failed_stage,
                    error,
                },
            )
            .collect())
    }

    // -------------------------------------------------------------------------
    // READ BACK
    // -------------------------------------------------------------------------

    pub async fn fetch_facilities(
        &mut self,
        municipality_code: Option<&str>,
    ) -> Result<Vec<Facility>, EtlError> {
        let base = "SELECT facility_code, municipality_code, name, street_address, district, \
                    latitude, longitude, postal_code FROM health_facilities";
        let rows: Vec<(String, String, String, String, String, f64, f64, String)> =
            match municipality_code {
                Some(code) => {
                    sqlx::query_as(&format!(
                        "{base} WHERE municipality_code = $1 ORDER BY facility_code"
                    ))
                    .bind(code.to_string())
                    .fetch_all(&mut self.conn)
                    .await?
                }
                None => {
                    sqlx::query_as(&format!("{base} ORDER BY facility_code"))
                        .fetch_all(&mut self.conn)
                        .await?
                }
            };

        Ok(rows
            .into_iter()
            .map(
                |(
                    facility_code,
                    municipality_code,
                    name,
                    street_address,
                    district,
                    latitude,
                    longitude,
                    postal_code,
                )| Facility {
                    facility_code,
                    municipality_code,
                    name,
                    street_address,
                    district,
                    latitude,
                    longitude,
                    postal_code,
                },
            )
            .collect())
    }

    pub async fn fetch_aggregates(&mut self) -> Result<Vec<MunicipalAggregate>, EtlError> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            "SELECT municipality_code, total_facilities, total_physicians, total_nurses \
             FROM municipal_health_totals ORDER BY municipality_code",
        )
        .fetch_all(&mut self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(municipality_code, total_facilities, total_physicians, total_nurses)| {
                    MunicipalAggregate {
                        municipality_code,
                        total_facilities,
                        total_physicians,
                        total_nurses,
                    }
                },
            )
            .collect())
    }

    pub async fn fetch_demographics(&mut self) -> Result<Vec<DemographicRecord>, EtlError> {
        let rows: Vec<(String, String, i64, i64, i64, i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT municipality_code, municipality_name, population_total, population_male, \
             population_female, age_0_10, age_11_20, age_21_30, age_40_plus \
             FROM municipal_demographics ORDER BY municipality_code",
        )
        .fetch_all(&mut self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DemographicRecord {
                municipality_code: row.0,
                municipality_name: row.1,
                population_total: row.2,
                population_male: row.3,
                population_female: row.4,
                age_0_10: row.5,
                age_11_20: row.6,
                age_21_30: row.7,
                age_40_plus: row.8,
            })
            .collect())
    }

    /// The persisted overview of one municipality, if it has any facility.
    pub async fn fetch_overview(
        &mut self,
        municipality_code: &str,
    ) -> Result<Option<MunicipalOverview>, EtlError> {
        let aggregates: Vec<MunicipalAggregate> = self
            .fetch_aggregates()
            .await?
            .into_iter()
            .filter(|a| a.municipality_code == municipality_code)
            .collect();
        if aggregates.is_empty() {
            return Ok(None);
        }

        let demographics: Vec<DemographicRecord> = self
            .fetch_demographics()
            .await?
            .into_iter()
            .filter(|d| d.municipality_code == municipality_code)
            .collect();
        let facilities = self.fetch_facilities(Some(municipality_code)).await?;

        Ok(overview(&aggregates, &demographics, &facilities).into_iter().next())
    }
}
