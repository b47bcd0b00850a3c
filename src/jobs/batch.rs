//! Scheduling and fan-out control for groups of companies sharing a
//! concurrency ceiling (§4.16). The database batch row is the source of
//! truth for membership and aggregate counts; scheduling and pause/resume/
//! cancel all act on the member companies through `JobService`/
//! `ProgressService`.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheStore;
use crate::jobs::broker::TaskBroker;
use crate::jobs::progress::ProgressService;
use crate::jobs::service::JobService;
use crate::models::{BatchJob, BatchStatus, CompanyStatus};
use crate::storage::Repositories;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BatchProgress {
    pub total: u32,
    pub pending: u32,
    pub running: u32,
    pub paused: u32,
    pub completed: u32,
    pub failed: u32,
}

pub struct BatchService {
    repos: Repositories,
    cache: Arc<dyn CacheStore>,
    broker: Arc<dyn TaskBroker>,
}

impl BatchService {
    pub fn new(repos: Repositories, cache: Arc<dyn CacheStore>, broker: Arc<dyn TaskBroker>) -> Self {
        BatchService { repos, cache, broker }
    }

    fn jobs(&self) -> JobService {
        JobService::new(self.repos.clone(), self.cache.clone(), self.broker.clone())
    }

    fn progress_svc(&self) -> ProgressService {
        ProgressService::new(self.repos.clone(), self.cache.clone(), self.broker.clone())
    }

    pub async fn create(&self, company_ids: Vec<String>, max_concurrency: u32, priority: u32) -> BatchJob {
        let batch = BatchJob {
            id: uuid::Uuid::new_v4().to_string(),
            total: company_ids.len() as u32,
            company_ids,
            status: BatchStatus::Pending,
            completed: 0,
            failed: 0,
            priority,
            max_concurrency: max_concurrency.max(1),
        };
        self.repos.batches.insert(batch.clone()).await;
        batch
    }

    async fn get(&self, batch_id: &str) -> Result<BatchJob, BatchError> {
        self.repos
            .batches
            .get(batch_id)
            .await
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))
    }

    /// Picks up to `max_concurrency` PENDING member companies per batch,
    /// round-robin across all non-terminal batches, and dispatches them.
    pub async fn schedule(&self) {
        let jobs = self.jobs();
        for mut batch in self.repos.batches.list().await {
            if matches!(batch.status, BatchStatus::Completed | BatchStatus::Failed) {
                continue;
            }

            let mut running = 0u32;
            let mut pending_ids = Vec::new();
            for id in &batch.company_ids {
                if let Some(company) = self.repos.companies.get(id).await {
                    match company.status {
                        CompanyStatus::InProgress => running += 1,
                        CompanyStatus::Pending => pending_ids.push(id.clone()),
                        _ => {}
                    }
                }
            }

            let slots = batch.max_concurrency.saturating_sub(running);
            for id in pending_ids.into_iter().take(slots as usize) {
                let _ = jobs.start_job(&id).await;
            }

            if running > 0 || batch.status == BatchStatus::Pending {
                batch.status = BatchStatus::Running;
                let _ = self.repos.batches.update(batch).await;
            }
        }
    }

    pub async fn pause(&self, batch_id: &str, worker_id: &str) -> Result<(), BatchError> {
        let mut batch = self.get(batch_id).await?;
        let progress = self.progress_svc();
        for id in &batch.company_ids {
            let _ = progress.pause(id, worker_id).await;
        }
        batch.status = BatchStatus::Paused;
        let _ = self.repos.batches.update(batch).await;
        Ok(())
    }

    pub async fn resume(&self, batch_id: &str, worker_id: &str) -> Result<(), BatchError> {
        let mut batch = self.get(batch_id).await?;
        let progress = self.progress_svc();
        for id in &batch.company_ids {
            let _ = progress.resume(id, worker_id).await;
        }
        batch.status = BatchStatus::Running;
        let _ = self.repos.batches.update(batch).await;
        Ok(())
    }

    pub async fn cancel(&self, batch_id: &str) -> Result<(), BatchError> {
        let mut batch = self.get(batch_id).await?;
        let jobs = self.jobs();
        for id in &batch.company_ids {
            if let Some(company) = self.repos.companies.get(id).await {
                if !matches!(company.status, CompanyStatus::Completed | CompanyStatus::Failed) {
                    let _ = jobs.fail_job(id, "batch cancelled", true).await;
                }
            }
        }
        batch.status = BatchStatus::Failed;
        let _ = self.repos.batches.update(batch).await;
        Ok(())
    }

    pub async fn progress(&self, batch_id: &str) -> Result<BatchProgress, BatchError> {
        let batch = self.get(batch_id).await?;
        let mut progress = BatchProgress { total: batch.total, ..Default::default() };
        for id in &batch.company_ids {
            let Some(company) = self.repos.companies.get(id).await else { continue };
            match company.status {
                CompanyStatus::Pending => progress.pending += 1,
                CompanyStatus::InProgress => progress.running += 1,
                CompanyStatus::Paused => progress.paused += 1,
                CompanyStatus::Completed => progress.completed += 1,
                CompanyStatus::Failed => progress.failed += 1,
            }
        }
        Ok(progress)
    }
}
