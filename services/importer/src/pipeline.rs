//! Pipeline Orchestrator.
//!
//! Walks `Idle -> SchemaReady -> Truncated -> FacilitiesLoaded ->
//! AggregatesComputed -> DemographicsLoaded -> Done`. Any failing transition
//! moves the run to `Failed` and aborts the rest; recovery is re-running the
//! whole pipeline.

use uuid::Uuid;

use serde_json::json;
use tracing::{error, info, warn};

use crate::aggregate;
use crate::config::ImportConfig;
use crate::demographics;
use crate::error::{EtlError, PipelineError, Stage};
use crate::facilities::{self, ConsolidatedFacilities};
use crate::model::{DemographicRecord, DropTally, Facility, MunicipalAggregate};
use crate::professionals::{self, ProfessionalClassifier};
use crate::reader::RecordSource;
use crate::schema;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    SchemaReady,
    Truncated,
    FacilitiesLoaded,
    AggregatesComputed,
    DemographicsLoaded,
    Done,
    Failed(Stage),
}

pub type BoxedSource = Box<dyn RecordSource + Send + Sync>;

/// The three inputs of a run.
pub struct Sources {
    pub facilities: BoxedSource,
    pub assignments: BoxedSource,
    pub demographics: BoxedSource,
}

impl Sources {
    /// File sources as described by `config`.
    pub fn from_config(config: &ImportConfig) -> Result<Self, EtlError> {
        Ok(Self {
            facilities: Box::new(config.facilities.source()?),
            assignments: Box::new(config.assignments.source()?),
            demographics: Box::new(config.demographics.source()?),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOutput {
    pub facilities: Vec<Facility>,
    pub aggregates: Vec<MunicipalAggregate>,
    pub demographics: Vec<DemographicRecord>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub output: ImportOutput,
    pub drops: DropTally,
    /// False for dry runs.
    pub persisted: bool,
}

impl RunSummary {
    fn detail(&self) -> serde_json::Value {
        json!({
            "facilities": self.output.facilities.len(),
            "aggregates": self.output.aggregates.len(),
            "demographics": self.output.demographics.len(),
            "drops": self.drops,
        })
    }
}

pub struct Pipeline {
    sources: Sources,
    config: ImportConfig,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(sources: Sources, config: ImportConfig) -> Self {
        Self {
            sources,
            config,
            state: PipelineState::Idle,
        }
    }

    pub fn from_config(config: ImportConfig) -> Result<Self, EtlError> {
        config.validate()?;
        Ok(Self::new(Sources::from_config(&config)?, config))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Connect, run against the store and release the connection, also on failure.
    pub async fn run(&mut self, database_url: &str) -> Result<RunSummary, PipelineError> {
        self.state = PipelineState::Idle;
        let mut store = match Store::connect(database_url).await {
            Ok(store) => store,
            Err(e) => return Err(self.fail(Stage::Schema, e)),
        };

        let result = self.run_with_store(&mut store).await;
        if let Err(e) = store.close().await {
            warn!(error = %e, "closing store connection failed");
        }
        result
    }

    pub async fn run_with_store(&mut self, store: &mut Store) -> Result<RunSummary, PipelineError> {
        self.execute(Some(store)).await
    }

    /// Every transform stage in memory; nothing is written.
    pub async fn run_dry(&mut self) -> Result<RunSummary, PipelineError> {
        self.execute(None).await
    }

    async fn execute(&mut self, mut store: Option<&mut Store>) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary {
            run_id: Uuid::new_v4(),
            output: ImportOutput::default(),
            drops: DropTally::new(),
            persisted: store.is_some(),
        };
        self.state = PipelineState::Idle;
        info!(run_id = %summary.run_id, persisted = summary.persisted, "import run started");

        let mut run_logged = false;
        let result = self
            .walk(store.as_deref_mut(), &mut summary, &mut run_logged)
            .await;

        if let (true, Some(store)) = (run_logged, store) {
            let logged = match &result {
                Ok(()) => {
                    store
                        .finish_run(summary.run_id, "ok", None, None, &summary.detail())
                        .await
                }
                Err(e) => {
                    store
                        .finish_run(
                            summary.run_id,
                            "failed",
                            Some(e.stage.as_str()),
                            Some(e.source.to_string()),
                            &summary.detail(),
                        )
                        .await
                }
            };
            if let Err(e) = logged {
                warn!(run_id = %summary.run_id, error = %e, "could not close run log entry");
            }
        }

        result.map(|()| summary)
    }

    async fn walk(
        &mut self,
        mut store: Option<&mut Store>,
        summary: &mut RunSummary,
        run_logged: &mut bool,
    ) -> Result<(), PipelineError> {
        // Idle -> SchemaReady
        if let Some(store) = store.as_deref_mut() {
            if let Err(e) = store.ensure_schema().await {
                return Err(self.fail(Stage::Schema, e));
            }
            match store.start_run(summary.run_id).await {
                Ok(()) => *run_logged = true,
                Err(e) => warn!(error = %e, "could not open run log entry"),
            }
        }
        self.advance(PipelineState::SchemaReady);

        // SchemaReady -> Truncated; each table is cleared in the transaction
        // that reloads it, so nothing has been committed at this point.
        self.advance(PipelineState::Truncated);

        // Truncated -> FacilitiesLoaded
        let consolidated = match self.consolidate_facilities() {
            Ok(consolidated) => consolidated,
            Err(e) => return Err(self.fail(Stage::Facilities, e)),
        };
        if let Some(store) = store.as_deref_mut() {
            if let Err(e) = store
                .replace_table(&schema::FACILITIES, &consolidated.facilities)
                .await
            {
                return Err(self.fail(Stage::Facilities, e));
            }
        }
        info!(
            facilities = consolidated.facilities.len(),
            dropped = consolidated.drops.total(),
            "facilities consolidated"
        );
        summary.drops.absorb(&consolidated.drops);
        self.advance(PipelineState::FacilitiesLoaded);

        // FacilitiesLoaded -> AggregatesComputed
        let aggregates = match self.compute_aggregates(&consolidated, &mut summary.drops) {
            Ok(aggregates) => aggregates,
            Err(e) => return Err(self.fail(Stage::Aggregates, e)),
        };
        if let Some(store) = store.as_deref_mut() {
            if let Err(e) = store.replace_table(&schema::MUNICIPAL_TOTALS, &aggregates).await {
                return Err(self.fail(Stage::Aggregates, e));
            }
        }
        summary.output.facilities = consolidated.facilities;
        summary.output.aggregates = aggregates;
        self.advance(PipelineState::AggregatesComputed);

        // AggregatesComputed -> DemographicsLoaded
        let transformed = match self.transform_demographics() {
            Ok(transformed) => transformed,
            Err(e) => return Err(self.fail(Stage::Demographics, e)),
        };
        if let Some(store) = store.as_deref_mut() {
            if let Err(e) = store
                .replace_table(&schema::DEMOGRAPHICS, &transformed.records)
                .await
            {
                return Err(self.fail(Stage::Demographics, e));
            }
        }
        info!(
            municipalities = transformed.records.len(),
            dropped = transformed.drops.total(),
            "demographics transformed"
        );
        summary.drops.absorb(&transformed.drops);
        summary.output.demographics = transformed.records;
        self.advance(PipelineState::DemographicsLoaded);

        self.advance(PipelineState::Done);
        info!(run_id = %summary.run_id, drops = %summary.drops, "import run finished");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // STAGES
    // -------------------------------------------------------------------------

    fn consolidate_facilities(&self) -> Result<ConsolidatedFacilities, EtlError> {
        let raw = facilities::read_facilities(
            self.sources.facilities.as_ref(),
            &self.config.facilities.headers,
        )?;
        Ok(facilities::consolidate(raw, self.config.municipality_code_width))
    }

    fn compute_aggregates(
        &self,
        consolidated: &ConsolidatedFacilities,
        drops: &mut DropTally,
    ) -> Result<Vec<MunicipalAggregate>, EtlError> {
        let mut read_drops = DropTally::new();
        let assignments = professionals::read_assignments(
            self.sources.assignments.as_ref(),
            &self.config.assignments.headers,
            &mut read_drops,
        )?;

        let classifier = ProfessionalClassifier::new(
            self.config.occupations.clone(),
            self.config.facility_code_width,
        );
        let counts =
            classifier.classify_and_count(&assignments, &consolidated.municipality_by_facility);

        let facility_counts = aggregate::count_facilities(&consolidated.facilities);
        let aggregates = aggregate::merge(&facility_counts, &counts.physicians, &counts.nurses);

        read_drops.absorb(&counts.drops);
        info!(
            assignments = assignments.len(),
            municipalities = aggregates.len(),
            dropped = read_drops.total(),
            "municipal aggregates computed"
        );
        drops.absorb(&read_drops);
        Ok(aggregates)
    }

    fn transform_demographics(&self) -> Result<demographics::TransformedDemographics, EtlError> {
        let raw = demographics::read_census(
            self.sources.demographics.as_ref(),
            &self.config.demographics.headers,
        )?;
        Ok(demographics::transform(raw, self.config.municipality_code_width))
    }

    // -------------------------------------------------------------------------
    // STATE
    // -------------------------------------------------------------------------

    fn advance(&mut self, next: PipelineState) {
        info!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    fn fail(&mut self, stage: Stage, source: EtlError) -> PipelineError {
        error!(stage = %stage, from = ?self.state, error = %source, "import run failed");
        self.state = PipelineState::Failed(stage);
        PipelineError::new(stage, source)
    }
}
