//! Pause/resume/timeout accounting (§4.15). Pause and resume are
//! lock-guarded so two workers racing on the same company can't both flip
//! its status; timeout accounting is pure arithmetic over the Company's own
//! timestamps, kept in the database rather than the ephemeral cache.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{make_key, CacheStore, PROGRESS_EXPIRY, LOCK_EXPIRY};
use crate::checkpoint::CheckpointService;
use crate::jobs::broker::{phase_task, TaskBroker};
use crate::models::CompanyStatus;
use crate::storage::Repositories;
use crate::time;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("company not found: {0}")]
    NotFound(String),
    #[error("invalid state for this operation: {0:?}")]
    InvalidState(CompanyStatus),
    #[error("company lock is held by another worker")]
    LockHeld,
}

pub struct ProgressService {
    repos: Repositories,
    cache: Arc<dyn CacheStore>,
    broker: Arc<dyn TaskBroker>,
}

impl ProgressService {
    pub fn new(repos: Repositories, cache: Arc<dyn CacheStore>, broker: Arc<dyn TaskBroker>) -> Self {
        ProgressService { repos, cache, broker }
    }

    fn lock_key(company_id: &str) -> String {
        make_key(&["job", company_id, "lock"])
    }

    async fn record_activity(&self, company_id: &str, activity: &str) {
        self.cache
            .set(
                &make_key(&["job", company_id, "activity"]),
                activity.to_string(),
                Some(PROGRESS_EXPIRY),
            )
            .await;
    }

    /// Only valid from IN_PROGRESS. Saves the company's current checkpoint,
    /// records `paused_at`, and flips status to PAUSED, all under the
    /// company's distributed lock.
    pub async fn pause(&self, company_id: &str, worker_id: &str) -> Result<(), ProgressError> {
        let mut company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| ProgressError::NotFound(company_id.to_string()))?;
        if company.status != CompanyStatus::InProgress {
            return Err(ProgressError::InvalidState(company.status));
        }

        let lock_key = Self::lock_key(company_id);
        if !self.cache.acquire_lock(&lock_key, worker_id, LOCK_EXPIRY).await {
            return Err(ProgressError::LockHeld);
        }

        let checkpoints = CheckpointService::new(self.repos.clone());
        let checkpoint = checkpoints.load(company_id).await;
        checkpoints.save(company_id, checkpoint).await;

        company.status = CompanyStatus::Paused;
        company.paused_at = Some(time::now_rfc3339());
        company.updated_at = Some(time::now_rfc3339());
        let _ = self.repos.companies.update(company).await;

        self.cache.release_lock(&lock_key, worker_id).await;
        self.record_activity(company_id, "paused").await;
        Ok(())
    }

    /// Only valid from PAUSED. Folds the just-finished pause interval into
    /// `total_paused_duration_ms`, flips back to IN_PROGRESS, and dispatches
    /// the phase the latest checkpoint indicates should resume.
    pub async fn resume(&self, company_id: &str, worker_id: &str) -> Result<(), ProgressError> {
        let mut company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| ProgressError::NotFound(company_id.to_string()))?;
        if company.status != CompanyStatus::Paused {
            return Err(ProgressError::InvalidState(company.status));
        }

        let lock_key = Self::lock_key(company_id);
        if !self.cache.acquire_lock(&lock_key, worker_id, LOCK_EXPIRY).await {
            return Err(ProgressError::LockHeld);
        }

        if let Some(paused_at) = company.paused_at.take() {
            company.total_paused_duration_ms += time::elapsed_secs_since(&paused_at) * 1000;
        }
        company.status = CompanyStatus::InProgress;
        company.updated_at = Some(time::now_rfc3339());

        let checkpoints = CheckpointService::new(self.repos.clone());
        let phase = checkpoints.resume_phase(company_id).await;
        company.phase = phase;
        let _ = self.repos.companies.update(company).await;

        if let Some(task) = phase_task(phase, company_id) {
            self.broker.enqueue(task).await;
        }

        self.cache.release_lock(&lock_key, worker_id).await;
        self.record_activity(company_id, "resumed").await;
        Ok(())
    }

    /// `remaining = timeout - (now - started_at) + total_paused`, in
    /// seconds. Negative once the job has overrun its timeout budget.
    pub fn remaining_seconds(&self, company: &crate::models::Company) -> i64 {
        let timeout = company.config.timeout_secs as i64;
        let elapsed = company
            .started_at
            .as_ref()
            .map(|s| time::elapsed_secs_since(s) as i64)
            .unwrap_or(0);
        let total_paused = (company.total_paused_duration_ms / 1000) as i64;
        timeout - elapsed + total_paused
    }

    /// Saves a final checkpoint, marks the job FAILED (semantically a
    /// timeout), and publishes a timeout activity.
    pub async fn handle_timeout(&self, company_id: &str) -> Result<(), ProgressError> {
        let mut company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| ProgressError::NotFound(company_id.to_string()))?;

        let checkpoints = CheckpointService::new(self.repos.clone());
        let checkpoint = checkpoints.load(company_id).await;
        checkpoints.save(company_id, checkpoint).await;

        company.status = CompanyStatus::Failed;
        company.errors.push("timeout".to_string());
        company.updated_at = Some(time::now_rfc3339());
        let _ = self.repos.companies.update(company).await;

        self.record_activity(company_id, "timeout").await;
        Ok(())
    }

    pub async fn last_activity(&self, company_id: &str) -> Option<String> {
        self.cache.get(&make_key(&["job", company_id, "activity"])).await
    }

    /// Same cadence `CrawlWorker` uses for its own periodic checkpoint
    /// saves, exposed so other phases can decide when to checkpoint too.
    pub fn should_checkpoint(pages_since: u32, seconds_since: u64) -> bool {
        pages_since >= 10 || seconds_since >= 120
    }

    /// Publishes a UI-pollable progress snapshot to the cache, independent
    /// of the coarser `publish_status` JobService writes.
    pub async fn update_progress(&self, company_id: &str, phase: crate::models::Phase, pages_crawled: u32, entities_count: u32) {
        let payload = serde_json::json!({
            "phase": phase,
            "pages_crawled": pages_crawled,
            "entities_count": entities_count,
            "updated_at": time::now_rfc3339(),
        });
        self.cache
            .set(&make_key(&["job", company_id, "progress"]), payload.to_string(), Some(PROGRESS_EXPIRY))
            .await;
    }

    pub async fn get_progress(&self, company_id: &str) -> Option<serde_json::Value> {
        let raw = self.cache.get(&make_key(&["job", company_id, "progress"])).await?;
        serde_json::from_str(&raw).ok()
    }

    /// Full state+checkpoint snapshot for a company, combining the
    /// database row with its latest checkpoint.
    pub async fn get_job_state(&self, company_id: &str) -> Option<JobState> {
        let company = self.repos.companies.get(company_id).await?;
        let checkpoint = CheckpointService::new(self.repos.clone()).load(company_id).await;
        let remaining_seconds = self.remaining_seconds(&company);
        Some(JobState { status: company.status, phase: company.phase, checkpoint, remaining_seconds })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobState {
    pub status: CompanyStatus,
    pub phase: crate::models::Phase,
    pub checkpoint: crate::models::Checkpoint,
    pub remaining_seconds: i64,
}
