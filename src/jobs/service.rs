//! The per-company state machine (§4.14): phase transitions, job start/fail,
//! and cold-start recovery of companies left IN_PROGRESS by a crashed
//! worker.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::{make_key, CacheStore, PROGRESS_EXPIRY};
use crate::checkpoint::CheckpointService;
use crate::jobs::broker::{phase_task, Queue, Task, TaskBroker};
use crate::models::{Company, CompanyStatus, Phase};
use crate::storage::Repositories;
use crate::time;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("company not found: {0}")]
    NotFound(String),
    #[error("company {0} is already in progress")]
    AlreadyRunning(String),
    #[error("invalid phase transition: {0:?} -> {1:?}")]
    InvalidTransition(Phase, Phase),
}

pub struct JobService {
    repos: Repositories,
    cache: Arc<dyn CacheStore>,
    broker: Arc<dyn TaskBroker>,
}

impl JobService {
    pub fn new(repos: Repositories, cache: Arc<dyn CacheStore>, broker: Arc<dyn TaskBroker>) -> Self {
        JobService { repos, cache, broker }
    }

    async fn publish_status(&self, company_id: &str, status: CompanyStatus) {
        self.cache
            .set(
                &make_key(&["job", company_id, "status"]),
                serde_json::json!({ "status": status }).to_string(),
                Some(PROGRESS_EXPIRY),
            )
            .await;
    }

    /// Rejects if already IN_PROGRESS; otherwise marks the company running,
    /// records `started_at`, and dispatches the crawl task.
    pub async fn start_job(&self, company_id: &str) -> Result<(), JobError> {
        let mut company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| JobError::NotFound(company_id.to_string()))?;

        if company.status == CompanyStatus::InProgress {
            return Err(JobError::AlreadyRunning(company_id.to_string()));
        }

        company.status = CompanyStatus::InProgress;
        company.phase = Phase::Queued;
        company.started_at = Some(time::now_rfc3339());
        company.updated_at = Some(time::now_rfc3339());
        let _ = self.repos.companies.update(company).await;

        self.publish_status(company_id, CompanyStatus::InProgress).await;
        self.broker
            .enqueue(Task::CrawlCompany { company_id: company_id.to_string() })
            .await;
        Ok(())
    }

    /// Validates `company.phase -> next`, updates state, and dispatches the
    /// next phase's task unless `next` is COMPLETED.
    pub async fn transition_phase(&self, company_id: &str, next: Phase) -> Result<(), JobError> {
        let mut company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| JobError::NotFound(company_id.to_string()))?;

        if !company.phase.can_transition_to(next) {
            return Err(JobError::InvalidTransition(company.phase, next));
        }

        company.phase = next;
        company.updated_at = Some(time::now_rfc3339());
        if next == Phase::Completed {
            company.status = CompanyStatus::Completed;
            company.completed_at = Some(time::now_rfc3339());
        }
        self.repos
            .companies
            .update(company)
            .await
            .map_err(|_| JobError::NotFound(company_id.to_string()))?;

        self.publish_status(
            company_id,
            if next == Phase::Completed { CompanyStatus::Completed } else { CompanyStatus::InProgress },
        )
        .await;

        if let Some(task) = phase_task(next, company_id) {
            self.broker.enqueue(task).await;
        }
        Ok(())
    }

    /// Marks the job FAILED, recording `msg` in the Company's error list.
    /// Retains the checkpoint unless `preserve_progress` is false.
    pub async fn fail_job(&self, company_id: &str, msg: &str, preserve_progress: bool) -> Result<(), JobError> {
        let mut company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| JobError::NotFound(company_id.to_string()))?;

        company.status = CompanyStatus::Failed;
        company.errors.push(msg.to_string());
        company.updated_at = Some(time::now_rfc3339());
        self.repos
            .companies
            .update(company)
            .await
            .map_err(|_| JobError::NotFound(company_id.to_string()))?;

        tracing::error!(company_id = %company_id, reason = %msg, "job failed");
        if !preserve_progress {
            CheckpointService::new(self.repos.clone()).clear(company_id).await;
        }

        self.publish_status(company_id, CompanyStatus::Failed).await;
        Ok(())
    }

    /// Cold-start recovery: every IN_PROGRESS company is either failed (if
    /// stale), resumed from its checkpoint, or reset to QUEUED and
    /// redispatched.
    pub async fn recover_in_progress_jobs(&self, stale_threshold_secs: u64) {
        let in_progress = self.repos.companies.list_by_status(CompanyStatus::InProgress).await;
        tracing::info!(count = in_progress.len(), "recovering in-progress jobs after restart");
        for company in in_progress {
            let staleness_anchor = company.updated_at.as_ref().or(company.started_at.as_ref());
            let stale = staleness_anchor
                .map(|ts| time::elapsed_secs_since(ts) >= stale_threshold_secs)
                .unwrap_or(true);

            if stale {
                let _ = self
                    .fail_job(&company.id, "stale in-progress job, auto-failed on recovery", true)
                    .await;
                continue;
            }

            let company_id = company.id.clone();
            let checkpoints = CheckpointService::new(self.repos.clone());
            let mut company = company;

            if checkpoints.can_resume(&company_id).await {
                let phase = checkpoints.resume_phase(&company_id).await;
                company.phase = phase;
                company.updated_at = Some(time::now_rfc3339());
                let _ = self.repos.companies.update(company).await;
                if let Some(task) = phase_task(phase, &company_id) {
                    self.broker.enqueue(task).await;
                }
            } else {
                company.phase = Phase::Queued;
                company.updated_at = Some(time::now_rfc3339());
                let _ = self.repos.companies.update(company).await;
                self.broker.enqueue(Task::CrawlCompany { company_id }).await;
            }
        }
    }

    /// Admin/progress projection: counts by status plus a phase breakdown
    /// for whatever is currently IN_PROGRESS.
    pub async fn get_queue_status(&self) -> QueueStatus {
        let in_progress = self.repos.companies.list_by_status(CompanyStatus::InProgress).await;
        let mut in_progress_by_phase: HashMap<String, u32> = HashMap::new();
        for company in &in_progress {
            *in_progress_by_phase.entry(format!("{:?}", company.phase).to_lowercase()).or_insert(0) += 1;
        }
        QueueStatus {
            crawl_queue_len: self.broker.queue_len(Queue::Crawl).await,
            extract_queue_len: self.broker.queue_len(Queue::Extract).await,
            analyze_queue_len: self.broker.queue_len(Queue::Analyze).await,
            in_progress_by_phase,
        }
    }

    pub async fn get_jobs_by_status(&self, status: CompanyStatus, limit: usize) -> Vec<Company> {
        let mut jobs = self.repos.companies.list_by_status(status).await;
        jobs.truncate(limit);
        jobs
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub crawl_queue_len: usize,
    pub extract_queue_len: usize,
    pub analyze_queue_len: usize,
    pub in_progress_by_phase: HashMap<String, u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::jobs::broker::{InMemoryTaskBroker, Queue};
    use crate::models::{Company, CompanyConfig};

    fn company(id: &str, status: CompanyStatus, phase: Phase) -> Company {
        let mut c = Company::new(id.to_string(), "Acme".into(), "https://acme.test".into(), CompanyConfig::default());
        c.status = status;
        c.phase = phase;
        c
    }

    fn svc() -> (JobService, Repositories, Arc<dyn TaskBroker>) {
        let repos = Repositories::in_memory();
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let broker: Arc<dyn TaskBroker> = Arc::new(InMemoryTaskBroker::new());
        (JobService::new(repos.clone(), cache, broker.clone()), repos, broker)
    }

    #[tokio::test]
    async fn test_start_job_rejects_already_in_progress() {
        let (svc, repos, _broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::InProgress, Phase::Crawling)).await;
        let err = svc.start_job("c1").await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_start_job_dispatches_crawl_task() {
        let (svc, repos, broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::Pending, Phase::Queued)).await;
        svc.start_job("c1").await.unwrap();
        assert_eq!(broker.queue_len(Queue::Crawl).await, 1);
        let c = repos.companies.get("c1").await.unwrap();
        assert_eq!(c.status, CompanyStatus::InProgress);
        assert!(c.started_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_phase_rejects_invalid_transition() {
        let (svc, repos, _broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::InProgress, Phase::Queued)).await;
        let err = svc.transition_phase("c1", Phase::Analyzing).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition(_, _)));
    }

    #[tokio::test]
    async fn test_transition_phase_to_completed_marks_company_terminal() {
        let (svc, repos, _broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::InProgress, Phase::Generating)).await;
        svc.transition_phase("c1", Phase::Completed).await.unwrap();
        let c = repos.companies.get("c1").await.unwrap();
        assert_eq!(c.status, CompanyStatus::Completed);
        assert!(c.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_phase_dispatches_next_task() {
        let (svc, repos, broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::InProgress, Phase::Crawling)).await;
        svc.transition_phase("c1", Phase::Extracting).await.unwrap();
        assert_eq!(broker.queue_len(Queue::Extract).await, 1);
    }

    #[tokio::test]
    async fn test_fail_job_records_error_and_clears_checkpoint() {
        let (svc, repos, _broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::InProgress, Phase::Crawling)).await;
        let checkpoints = CheckpointService::new(repos.clone());
        let mut checkpoint = crate::models::Checkpoint::default();
        checkpoint.pages_visited = vec!["https://acme.test/".into()];
        checkpoints.save("c1", checkpoint).await;

        svc.fail_job("c1", "boom", false).await.unwrap();

        let c = repos.companies.get("c1").await.unwrap();
        assert_eq!(c.status, CompanyStatus::Failed);
        assert!(c.errors.contains(&"boom".to_string()));
        assert!(checkpoints.load("c1").await.pages_visited.is_empty());
    }

    #[tokio::test]
    async fn test_recover_fails_stale_jobs() {
        let (svc, repos, _broker) = svc();
        let mut c = company("c1", CompanyStatus::InProgress, Phase::Crawling);
        c.updated_at = Some(time::now_rfc3339());
        repos.companies.insert(c).await;
        svc.recover_in_progress_jobs(0).await;
        let c = repos.companies.get("c1").await.unwrap();
        assert_eq!(c.status, CompanyStatus::Failed);
    }

    #[tokio::test]
    async fn test_recover_resets_fresh_job_without_checkpoint_to_queued() {
        let (svc, repos, broker) = svc();
        let mut c = company("c1", CompanyStatus::InProgress, Phase::Crawling);
        c.updated_at = Some(time::now_rfc3339());
        repos.companies.insert(c).await;
        svc.recover_in_progress_jobs(3600).await;
        let c = repos.companies.get("c1").await.unwrap();
        assert_eq!(c.phase, Phase::Queued);
        assert_eq!(broker.queue_len(Queue::Crawl).await, 1);
    }

    #[tokio::test]
    async fn test_get_queue_status_reports_phase_breakdown() {
        let (svc, repos, broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::InProgress, Phase::Crawling)).await;
        repos.companies.insert(company("c2", CompanyStatus::InProgress, Phase::Analyzing)).await;
        broker.enqueue(Task::CrawlCompany { company_id: "c1".into() }).await;

        let status = svc.get_queue_status().await;
        assert_eq!(status.crawl_queue_len, 1);
        assert_eq!(status.in_progress_by_phase.get("crawling"), Some(&1));
        assert_eq!(status.in_progress_by_phase.get("analyzing"), Some(&1));
    }

    #[tokio::test]
    async fn test_get_jobs_by_status_respects_limit() {
        let (svc, repos, _broker) = svc();
        repos.companies.insert(company("c1", CompanyStatus::Failed, Phase::Crawling)).await;
        repos.companies.insert(company("c2", CompanyStatus::Failed, Phase::Crawling)).await;

        let jobs = svc.get_jobs_by_status(CompanyStatus::Failed, 1).await;
        assert_eq!(jobs.len(), 1);
    }
}
