//! Durable-state repositories. The original system backed these with a
//! relational store (SQLAlchemy models over Company/Page/Entity/CrawlSession/
//! Analysis/TokenUsage/BatchJob); here each table is a narrow async trait with
//! an in-memory, `RwLock`-guarded default implementation so the core is
//! runnable and testable without a database. A SQL-backed implementation can
//! satisfy the same traits without touching callers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{Analysis, BatchJob, Company, CompanyStatus, CrawlSession, Entity, Page, SessionStatus, TokenUsage};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    async fn insert(&self, company: Company);
    async fn get(&self, id: &str) -> Option<Company>;
    async fn update(&self, company: Company) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &str);
    async fn list(&self) -> Vec<Company>;
    async fn list_by_status(&self, status: CompanyStatus) -> Vec<Company>;
}

#[async_trait]
pub trait PageRepository: Send + Sync {
    /// Inserts the page, returning `false` without mutation if the
    /// (company, canonical URL) pair already exists.
    async fn insert_if_absent(&self, page: Page) -> bool;
    async fn list_by_company(&self, company_id: &str) -> Vec<Page>;
    async fn exists(&self, company_id: &str, canonical_url: &str) -> bool;
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn insert(&self, entity: Entity);
    async fn list_by_company(&self, company_id: &str) -> Vec<Entity>;
    /// Atomically remove `remove_ids` and insert `replacement` — the
    /// replace-in-place merge strategy (DESIGN.md open-question decision).
    async fn replace_group(&self, company_id: &str, remove_ids: &[String], replacement: Entity);
}

#[async_trait]
pub trait CrawlSessionRepository: Send + Sync {
    async fn insert(&self, session: CrawlSession);
    async fn get(&self, id: &str) -> Option<CrawlSession>;
    async fn update(&self, session: CrawlSession) -> Result<(), RepositoryError>;
    /// The invariant "at most one ACTIVE CrawlSession per Company" (§3) is
    /// enforced by callers; this returns that session if present.
    async fn get_active_for_company(&self, company_id: &str) -> Option<CrawlSession>;
    async fn get_latest_for_company(&self, company_id: &str) -> Option<CrawlSession>;
}

#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Inserts with a version number of `existing_count + 1`, evicting the
    /// lowest version first if the company would otherwise exceed three
    /// live versions (§3 invariant, §4.11).
    async fn insert_versioned(&self, analysis: Analysis) -> Analysis;
    async fn list_by_company(&self, company_id: &str) -> Vec<Analysis>;
    async fn get_latest(&self, company_id: &str) -> Option<Analysis>;
    async fn get_version(&self, company_id: &str, version: u32) -> Option<Analysis>;
}

#[async_trait]
pub trait TokenUsageRepository: Send + Sync {
    async fn insert(&self, usage: TokenUsage);
    async fn list_by_company(&self, company_id: &str) -> Vec<TokenUsage>;
}

#[async_trait]
pub trait BatchJobRepository: Send + Sync {
    async fn insert(&self, batch: BatchJob);
    async fn get(&self, id: &str) -> Option<BatchJob>;
    async fn update(&self, batch: BatchJob) -> Result<(), RepositoryError>;
    async fn list(&self) -> Vec<BatchJob>;
}

/// All seven repositories bundled behind `Arc` for cheap cloning into
/// per-company task futures.
#[derive(Clone)]
pub struct Repositories {
    pub companies: Arc<dyn CompanyRepository>,
    pub pages: Arc<dyn PageRepository>,
    pub entities: Arc<dyn EntityRepository>,
    pub sessions: Arc<dyn CrawlSessionRepository>,
    pub analyses: Arc<dyn AnalysisRepository>,
    pub token_usage: Arc<dyn TokenUsageRepository>,
    pub batches: Arc<dyn BatchJobRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Repositories {
            companies: Arc::new(InMemoryCompanyRepository::default()),
            pages: Arc::new(InMemoryPageRepository::default()),
            entities: Arc::new(InMemoryEntityRepository::default()),
            sessions: Arc::new(InMemoryCrawlSessionRepository::default()),
            analyses: Arc::new(InMemoryAnalysisRepository::default()),
            token_usage: Arc::new(InMemoryTokenUsageRepository::default()),
            batches: Arc::new(InMemoryBatchJobRepository::default()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryCompanyRepository {
    data: RwLock<HashMap<String, Company>>,
}

#[async_trait]
impl CompanyRepository for InMemoryCompanyRepository {
    async fn insert(&self, company: Company) {
        self.data.write().await.insert(company.id.clone(), company);
    }

    async fn get(&self, id: &str) -> Option<Company> {
        self.data.read().await.get(id).cloned()
    }

    async fn update(&self, company: Company) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        if !data.contains_key(&company.id) {
            return Err(RepositoryError::NotFound("company", company.id));
        }
        data.insert(company.id.clone(), company);
        Ok(())
    }

    async fn delete(&self, id: &str) {
        self.data.write().await.remove(id);
    }

    async fn list(&self) -> Vec<Company> {
        self.data.read().await.values().cloned().collect()
    }

    async fn list_by_status(&self, status: CompanyStatus) -> Vec<Company> {
        self.data
            .read()
            .await
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryPageRepository {
    data: RwLock<HashMap<String, Page>>,
}

fn page_key(company_id: &str, canonical_url: &str) -> String {
    format!("{company_id}\u{0}{canonical_url}")
}

#[async_trait]
impl PageRepository for InMemoryPageRepository {
    async fn insert_if_absent(&self, page: Page) -> bool {
        let mut data = self.data.write().await;
        let key = page_key(&page.company_id, &page.url);
        if data.contains_key(&key) {
            return false;
        }
        data.insert(key, page);
        true
    }

    async fn list_by_company(&self, company_id: &str) -> Vec<Page> {
        self.data
            .read()
            .await
            .values()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect()
    }

    async fn exists(&self, company_id: &str, canonical_url: &str) -> bool {
        self.data
            .read()
            .await
            .contains_key(&page_key(company_id, canonical_url))
    }
}

#[derive(Default)]
pub struct InMemoryEntityRepository {
    data: RwLock<HashMap<String, Entity>>,
}

#[async_trait]
impl EntityRepository for InMemoryEntityRepository {
    async fn insert(&self, entity: Entity) {
        self.data.write().await.insert(entity.id.clone(), entity);
    }

    async fn list_by_company(&self, company_id: &str) -> Vec<Entity> {
        self.data
            .read()
            .await
            .values()
            .filter(|e| e.company_id == company_id)
            .cloned()
            .collect()
    }

    async fn replace_group(&self, _company_id: &str, remove_ids: &[String], replacement: Entity) {
        let mut data = self.data.write().await;
        for id in remove_ids {
            data.remove(id);
        }
        data.insert(replacement.id.clone(), replacement);
    }
}

#[derive(Default)]
pub struct InMemoryCrawlSessionRepository {
    data: RwLock<HashMap<String, CrawlSession>>,
}

#[async_trait]
impl CrawlSessionRepository for InMemoryCrawlSessionRepository {
    async fn insert(&self, session: CrawlSession) {
        self.data.write().await.insert(session.id.clone(), session);
    }

    async fn get(&self, id: &str) -> Option<CrawlSession> {
        self.data.read().await.get(id).cloned()
    }

    async fn update(&self, session: CrawlSession) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        if !data.contains_key(&session.id) {
            return Err(RepositoryError::NotFound("crawl_session", session.id));
        }
        data.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_active_for_company(&self, company_id: &str) -> Option<CrawlSession> {
        self.data
            .read()
            .await
            .values()
            .find(|s| s.company_id == company_id && s.status == SessionStatus::Active)
            .cloned()
    }

    async fn get_latest_for_company(&self, company_id: &str) -> Option<CrawlSession> {
        self.data
            .read()
            .await
            .values()
            .filter(|s| s.company_id == company_id)
            .max_by(|a, b| a.started_at.cmp(&b.started_at))
            .cloned()
    }
}

#[derive(Default)]
pub struct InMemoryAnalysisRepository {
    data: RwLock<HashMap<String, Vec<Analysis>>>,
}

const MAX_LIVE_VERSIONS: usize = 3;

#[async_trait]
impl AnalysisRepository for InMemoryAnalysisRepository {
    async fn insert_versioned(&self, mut analysis: Analysis) -> Analysis {
        let mut data = self.data.write().await;
        let versions = data.entry(analysis.company_id.clone()).or_default();
        let next_version = versions.iter().map(|a| a.version_number).max().unwrap_or(0) + 1;
        analysis.version_number = next_version;

        versions.push(analysis.clone());
        if versions.len() > MAX_LIVE_VERSIONS {
            if let Some((idx, _)) = versions
                .iter()
                .enumerate()
                .min_by_key(|(_, a)| a.version_number)
            {
                versions.remove(idx);
            }
        }
        analysis
    }

    async fn list_by_company(&self, company_id: &str) -> Vec<Analysis> {
        self.data
            .read()
            .await
            .get(company_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn get_latest(&self, company_id: &str) -> Option<Analysis> {
        self.data
            .read()
            .await
            .get(company_id)
            .and_then(|v| v.iter().max_by_key(|a| a.version_number).cloned())
    }

    async fn get_version(&self, company_id: &str, version: u32) -> Option<Analysis> {
        self.data
            .read()
            .await
            .get(company_id)
            .and_then(|v| v.iter().find(|a| a.version_number == version).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryTokenUsageRepository {
    data: RwLock<HashMap<String, Vec<TokenUsage>>>,
}

#[async_trait]
impl TokenUsageRepository for InMemoryTokenUsageRepository {
    async fn insert(&self, usage: TokenUsage) {
        self.data
            .write()
            .await
            .entry(usage.company_id.clone())
            .or_default()
            .push(usage);
    }

    async fn list_by_company(&self, company_id: &str) -> Vec<TokenUsage> {
        self.data
            .read()
            .await
            .get(company_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct InMemoryBatchJobRepository {
    data: RwLock<HashMap<String, BatchJob>>,
}

#[async_trait]
impl BatchJobRepository for InMemoryBatchJobRepository {
    async fn insert(&self, batch: BatchJob) {
        self.data.write().await.insert(batch.id.clone(), batch);
    }

    async fn get(&self, id: &str) -> Option<BatchJob> {
        self.data.read().await.get(id).cloned()
    }

    async fn update(&self, batch: BatchJob) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        if !data.contains_key(&batch.id) {
            return Err(RepositoryError::NotFound("batch_job", batch.id));
        }
        data.insert(batch.id.clone(), batch);
        Ok(())
    }

    async fn list(&self) -> Vec<BatchJob> {
        self.data.read().await.values().cloned().collect()
    }
}
