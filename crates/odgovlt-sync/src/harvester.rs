use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use odgovlt_ckan::CatalogApi;
use odgovlt_core::{encode_source_row, tables, DatasetRow, SourceRow};
use odgovlt_storage::{connect_source, HarvestJob, HarvestObject, HarvestStore, SourceReader};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ckan_sync::{CkanSync, DatasetOutcome, ExistingDatasets};
use crate::SyncOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvesterInfo {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub form_config_interface: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestRunSummary {
    pub job_id: Uuid,
    pub gathered: usize,
    pub created: usize,
    pub already_imported: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one harvest job through gather, fetch and import.
pub struct Harvester<'a, A: CatalogApi + ?Sized> {
    api: &'a A,
    store: &'a HarvestStore,
    options: SyncOptions,
}

impl<'a, A: CatalogApi + ?Sized> Harvester<'a, A> {
    pub fn new(api: &'a A, store: &'a HarvestStore, options: SyncOptions) -> Self {
        Self { api, store, options }
    }

    pub fn info() -> HarvesterInfo {
        HarvesterInfo {
            name: "opendata-gov-lt",
            title: "opendata.gov.lt",
            description: "Harvest opendata.gov.lt",
            form_config_interface: "Text",
        }
    }

    /// Stages every dataset row as a harvest object and returns their ids.
    pub async fn gather_stage(
        &self,
        job: &HarvestJob,
        source: &dyn SourceReader,
    ) -> Result<Vec<Uuid>> {
        let rows = source
            .rows(tables::DATASET)
            .await
            .with_context(|| format!("reading {}", tables::DATASET))?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let guid = row.id().context("dataset row without ID")?.to_string();
            let content = serde_json::to_string(&encode_source_row(row))
                .with_context(|| format!("encoding dataset row {guid}"))?;
            ids.push(self.store.save_object(&guid, job.id, &content).await?);
        }
        info!(job_id = %job.id, gathered = ids.len(), "gather stage finished");
        Ok(ids)
    }

    /// Everything was captured during gather.
    pub async fn fetch_stage(&self, _object: &HarvestObject) -> Result<bool> {
        Ok(true)
    }

    pub async fn import_stage(
        &self,
        sync: &CkanSync<'_, A>,
        existing: &mut ExistingDatasets,
        object: &HarvestObject,
    ) -> Result<DatasetOutcome> {
        let content: serde_json::Value = serde_json::from_str(&object.content)
            .with_context(|| format!("decoding harvest object {}", object.guid))?;
        let row = SourceRow::from_json(&content)?;
        let dataset = DatasetRow::try_from(&row)
            .with_context(|| format!("mapping harvest object {}", object.guid))?;
        sync.sync_dataset(&dataset, existing).await
    }

    /// Runs the job to completion. Failures of single objects are recorded
    /// against the object and the job moves on to the next one.
    pub async fn run_job(&self, job: &HarvestJob) -> Result<HarvestRunSummary> {
        let span = info_span!("harvest_job", job_id = %job.id, source = %job.source_url);
        async {
            let started_at = Utc::now();
            let source = connect_source(&job.source_url)
                .await
                .with_context(|| format!("opening source {}", job.source_url))?;

            let gathered = self.gather_stage(job, source.as_ref()).await?;

            let sync = CkanSync::new(self.api, source.as_ref(), &self.options).await?;
            let mut existing = sync.existing_datasets().await?;

            let mut summary = HarvestRunSummary {
                job_id: job.id,
                gathered: gathered.len(),
                created: 0,
                already_imported: 0,
                failed: 0,
                started_at,
                finished_at: started_at,
            };

            for object in self.store.objects_for_job(job.id).await? {
                if !self.fetch_stage(&object).await? {
                    continue;
                }
                match self.import_stage(&sync, &mut existing, &object).await {
                    Ok(outcome) => {
                        match &outcome {
                            DatasetOutcome::Created(_) => summary.created += 1,
                            DatasetOutcome::AlreadyImported(_) => summary.already_imported += 1,
                        }
                        self.store
                            .mark_complete(object.id, Some(&outcome.package().id))
                            .await?;
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        warn!(guid = %object.guid, error = %message, "import failed");
                        self.store.record_error(object.id, &message).await?;
                        summary.failed += 1;
                    }
                }
            }

            self.store.finish_job(job.id).await?;
            summary.finished_at = Utc::now();
            info!(
                gathered = summary.gathered,
                created = summary.created,
                already_imported = summary.already_imported,
                failed = summary.failed,
                "harvest job finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}
