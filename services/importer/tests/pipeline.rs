//! End-to-end runs over extracts written to a temporary directory.

use std::fs;
use std::path::Path;

use importer::error::{EtlError, Stage};
use importer::model::DropReason;
use importer::{ImportConfig, Pipeline, PipelineState, Store};
use tempfile::TempDir;

const FACILITIES: &str = "\
CNES;IBGE;NOME;LOGRADOURO;BAIRRO;LATITUDE;LONGITUDE;CEP
A1;110001;UBS Centro;Rua A;Centro;-11,93;-61,99;76954000.0
A2;110001;Hospital Municipal;Rua B;Centro;;;76954000
B1;110002;Unidade Basica Norte;;;-9,90;-63,03;
C1;110003;Posto Rural;;;;;
A1;110009;Duplicado;;;;;
;110001;Sem Codigo;;;;;
";

const ASSIGNMENTS: &str = "\
CO_UNIDADE,CO_PROFISSIONAL_SUS,CO_CBO
110001A1,P1,225125
110001A2,P1,225125
110001A1,P2,223505
110001A1,P2,223505
110002B1,P1,225142
110002B1,P3,515105
110009ZZ,P4,225125
";

// latin-1 on disk; "..." marks suppressed values
const CENSUS: &str = "\
CD_MUN;NM_MUN;V01006;V01007;V01008;V01018;V01019;V01020;V01032;V01033;V01034
1100015;Alta Floresta D'Oeste;21494;10800;10694;1600;1700;1650;1550;1680;1600
1100023;Ariquemes;96833;48000;48833;7000;7100;7200;6900;7000;7300
1100031;Cabixi;5067;...;2500;300;310;320;290;300;310
";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Estabelecimentos.csv"), FACILITIES).unwrap();
        fs::write(dir.path().join("EstabelecimentoProfissionais.csv"), ASSIGNMENTS).unwrap();
        let (census, _, _) = encoding_rs::WINDOWS_1252.encode(CENSUS);
        fs::write(
            dir.path().join("Agregados_por_municipios_demografia_BR.csv"),
            census.as_ref(),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> ImportConfig {
        ImportConfig::from_json(r#"{"facility_code_width": 2}"#)
            .unwrap()
            .with_data_dir(self.path())
    }

    fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path().join("health.db").display())
    }
}

async fn open_store(url: &str) -> Store {
    Store::connect(url).await.unwrap()
}

#[tokio::test]
async fn full_refresh_persists_reconciled_tables() {
    let fixture = Fixture::new();
    let mut pipeline = Pipeline::from_config(fixture.config()).unwrap();

    let summary = pipeline.run(&fixture.database_url()).await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Done);
    assert!(summary.persisted);

    let mut store = open_store(&fixture.database_url()).await;
    let aggregates = store.fetch_aggregates().await.unwrap();
    let rows: Vec<(&str, i64, i64, i64)> = aggregates
        .iter()
        .map(|a| {
            (
                a.municipality_code.as_str(),
                a.total_facilities,
                a.total_physicians,
                a.total_nurses,
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![("110001", 2, 1, 1), ("110002", 1, 1, 0), ("110003", 1, 0, 0)]
    );

    let facilities = store.fetch_facilities(Some("110001")).await.unwrap();
    assert_eq!(facilities.len(), 2);
    assert_eq!(facilities[0].name, "UBS Centro");
    assert_eq!(facilities[0].latitude, -11.93);
    assert_eq!(facilities[0].postal_code, "76954000");
    assert_eq!(facilities[1].latitude, 0.0);

    let census = store.fetch_demographics().await.unwrap();
    assert_eq!(census.len(), 2);
    assert_eq!(census[0].municipality_code, "110001");
    assert_eq!(census[0].municipality_name, "Alta Floresta D'Oeste");
    for record in &census {
        assert_eq!(record.bucket_sum(), record.population_total);
    }

    assert_eq!(summary.drops.count(DropReason::DuplicateFacility), 1);
    assert_eq!(summary.drops.count(DropReason::MissingKey), 1);
    assert_eq!(summary.drops.count(DropReason::UnmatchedFacility), 1);
    assert_eq!(summary.drops.count(DropReason::UnclassifiedOccupation), 1);
    assert_eq!(summary.drops.count(DropReason::IncompleteCensusRow), 1);
    store.close().await.unwrap();
}

#[tokio::test]
async fn repeated_runs_leave_identical_tables() {
    let fixture = Fixture::new();
    let url = fixture.database_url();

    Pipeline::from_config(fixture.config()).unwrap().run(&url).await.unwrap();
    let mut store = open_store(&url).await;
    let first = (
        store.fetch_aggregates().await.unwrap(),
        store.fetch_demographics().await.unwrap(),
        store.fetch_facilities(None).await.unwrap(),
    );
    store.close().await.unwrap();

    Pipeline::from_config(fixture.config()).unwrap().run(&url).await.unwrap();
    let mut store = open_store(&url).await;
    let second = (
        store.fetch_aggregates().await.unwrap(),
        store.fetch_demographics().await.unwrap(),
        store.fetch_facilities(None).await.unwrap(),
    );

    assert_eq!(first, second);
    assert_eq!(store.recent_runs(10).await.unwrap().len(), 2);
    store.close().await.unwrap();
}

#[tokio::test]
async fn refresh_removes_rows_absent_from_new_extracts() {
    let fixture = Fixture::new();
    let url = fixture.database_url();
    Pipeline::from_config(fixture.config()).unwrap().run(&url).await.unwrap();

    fs::write(
        fixture.path().join("Estabelecimentos.csv"),
        "CNES;IBGE;NOME;LOGRADOURO;BAIRRO;LATITUDE;LONGITUDE;CEP\nA1;110001;UBS Centro;;;;;\n",
    )
    .unwrap();
    Pipeline::from_config(fixture.config()).unwrap().run(&url).await.unwrap();

    let mut store = open_store(&url).await;
    let aggregates = store.fetch_aggregates().await.unwrap();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].total_facilities, 1);
    assert_eq!(aggregates[0].total_physicians, 1);
    assert_eq!(aggregates[0].total_nurses, 1);
    store.close().await.unwrap();
}

#[tokio::test]
async fn missing_extract_fails_the_run_at_its_stage() {
    let fixture = Fixture::new();
    let url = fixture.database_url();
    Pipeline::from_config(fixture.config()).unwrap().run(&url).await.unwrap();
    let mut store = open_store(&url).await;
    let previous = store.fetch_aggregates().await.unwrap();
    store.close().await.unwrap();

    fs::remove_file(fixture.path().join("EstabelecimentoProfissionais.csv")).unwrap();
    let mut pipeline = Pipeline::from_config(fixture.config()).unwrap();
    let err = pipeline.run(&url).await.unwrap_err();

    assert_eq!(err.stage, Stage::Aggregates);
    assert!(matches!(err.source, EtlError::MissingSource { .. }));
    assert_eq!(pipeline.state(), PipelineState::Failed(Stage::Aggregates));

    let mut store = open_store(&url).await;
    let runs = store.recent_runs(2).await.unwrap();
    let statuses: Vec<&str> = runs.iter().map(|r| r.status.as_str()).collect();
    assert!(statuses.contains(&"ok") && statuses.contains(&"failed"));
    let failed = runs.iter().find(|r| r.status == "failed").unwrap();
    assert_eq!(failed.failed_stage.as_deref(), Some("aggregates"));

    // the aggregates of the earlier run survive the failed refresh
    assert_eq!(previous.len(), 3);
    assert_eq!(store.fetch_aggregates().await.unwrap(), previous);
    assert_eq!(store.fetch_demographics().await.unwrap().len(), 2);
    store.close().await.unwrap();
}

#[tokio::test]
async fn overview_joins_persisted_tables() {
    let fixture = Fixture::new();
    let url = fixture.database_url();
    Pipeline::from_config(fixture.config()).unwrap().run(&url).await.unwrap();

    let mut store = open_store(&url).await;
    let overview = store.fetch_overview("110001").await.unwrap().unwrap();
    assert_eq!(overview.totals.total_facilities, 2);
    assert_eq!(overview.basic_units, 1);
    assert_eq!(overview.geolocated_facilities, 1);
    assert_eq!(overview.professionals_per_facility, 1.0);
    assert_eq!(
        overview.demographics.as_ref().map(|d| d.population_total),
        Some(21494)
    );

    // facilities but no census row
    let rural = store.fetch_overview("110003").await.unwrap().unwrap();
    assert!(rural.demographics.is_none());
    assert_eq!(rural.facilities_per_10k, 0.0);
    store.close().await.unwrap();
}

#[tokio::test]
async fn dry_run_needs_no_database() {
    let fixture = Fixture::new();
    let mut pipeline = Pipeline::from_config(fixture.config()).unwrap();

    let summary = pipeline.run_dry().await.unwrap();
    assert!(!summary.persisted);
    assert_eq!(summary.output.aggregates.len(), 3);
    assert!(!fixture.path().join("health.db").exists());
}
