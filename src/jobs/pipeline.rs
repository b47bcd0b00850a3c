//! Executes the work behind each dispatched task: crawling a company,
//! extracting and deduplicating entities, and running the analysis
//! synthesis, driving `JobService::transition_phase` on completion. This is
//! the glue between the task broker and the per-phase workers/services
//! defined elsewhere in the crate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::analysis::synthesis::{AnalysisSynthesizer, LlmClient};
use crate::analysis::tokens::TokenTracker;
use crate::cache::CacheStore;
use crate::checkpoint::CheckpointService;
use crate::config::Config;
use crate::crawler::{CrawlWorker, Fetcher, HttpFetcher, RateLimiter, RobotsCache};
use crate::extraction::dedup;
use crate::extraction::entity::{HeuristicNerModel, NamedEntityExtractor};
use crate::extraction::structured::{self, StructuredKind};
use crate::jobs::broker::{Queue, Task, TaskBroker};
use crate::jobs::service::JobService;
use crate::models::{Entity, EntityType, Phase};
use crate::storage::Repositories;

fn structured_to_entity_type(kind: StructuredKind) -> EntityType {
    match kind {
        StructuredKind::Email => EntityType::Email,
        StructuredKind::Phone => EntityType::Phone,
        StructuredKind::Address => EntityType::Address,
        StructuredKind::SocialHandle => EntityType::SocialHandle,
        StructuredKind::TechStack => EntityType::TechStack,
    }
}

pub struct Pipeline {
    repos: Repositories,
    cache: Arc<dyn CacheStore>,
    broker: Arc<dyn TaskBroker>,
    config: Arc<Config>,
    ner: NamedEntityExtractor<HeuristicNerModel>,
    tokens: TokenTracker,
    llm: Arc<dyn LlmClient>,
}

impl Pipeline {
    pub fn new(
        repos: Repositories,
        cache: Arc<dyn CacheStore>,
        broker: Arc<dyn TaskBroker>,
        config: Arc<Config>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let tokens = TokenTracker::new(repos.clone(), config.token_pricing);
        Pipeline {
            repos,
            cache,
            broker,
            config,
            ner: NamedEntityExtractor::new(HeuristicNerModel),
            tokens,
            llm,
        }
    }

    fn jobs(&self) -> JobService {
        JobService::new(self.repos.clone(), self.cache.clone(), self.broker.clone())
    }

    fn checkpoints(&self) -> CheckpointService {
        CheckpointService::new(self.repos.clone())
    }

    /// Pulls the next ready task off `queue` and runs it, if any. Intended
    /// to be called in a loop by a worker task per queue.
    pub async fn tick(&self, queue: Queue) {
        let Some(queued) = self.broker.dequeue(queue).await else {
            return;
        };
        let company_id = queued.task.company_id().to_string();
        if let Err(err) = self.run_task(&queued.task).await {
            tracing::warn!(company_id = %company_id, attempt = queued.attempt, error = %err, "task failed");
            if !self.broker.retry(queued.clone()).await {
                tracing::error!(company_id = %company_id, "retries exhausted, failing job");
                let _ = self.jobs().fail_job(&company_id, &err, true).await;
            }
        }
    }

    async fn run_task(&self, task: &Task) -> Result<(), String> {
        match task {
            Task::CrawlCompany { company_id } => self.run_crawl(company_id).await,
            Task::CrawlPage { .. } => Ok(()),
            Task::ExtractEntities { company_id } => self.run_extract(company_id).await,
            Task::AnalyzeContent { company_id } => self.run_analyze(company_id).await,
            Task::GenerateSummary { company_id } => self.run_generate(company_id).await,
        }
    }

    async fn run_crawl(&self, company_id: &str) -> Result<(), String> {
        let company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| format!("company not found: {company_id}"))?;

        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
            Duration::from_secs(self.config.http_timeout_secs),
            &company.config.user_agent,
        ));
        let worker = CrawlWorker {
            fetcher,
            rate_limiter: RateLimiter::new(),
            robots: RobotsCache::new(self.cache.clone(), Duration::from_secs(self.config.robots_timeout_secs)),
            repos: self.repos.clone(),
            rate_limit_timeout: Duration::from_secs(self.config.rate_limit_acquire_timeout_secs),
            checkpoint_page_interval: self.config.checkpoint_page_interval,
            checkpoint_interval: Duration::from_secs(self.config.checkpoint_interval_secs),
        };

        let outcome = worker
            .run(&company, &CancellationToken::new())
            .await
            .map_err(|e| e.to_string())?;

        let pages_crawled = outcome.session.pages_crawled;
        self.repos.sessions.insert(outcome.session).await;
        tracing::info!(company_id = %company_id, pages_crawled, "crawl finished");
        self.jobs()
            .transition_phase(company_id, Phase::Extracting)
            .await
            .map_err(|e| e.to_string())
    }

    async fn run_extract(&self, company_id: &str) -> Result<(), String> {
        let company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| format!("company not found: {company_id}"))?;
        let pages = self.repos.pages.list_by_company(company_id).await;

        let mut candidates: Vec<Entity> = Vec::new();
        for page in &pages {
            for item in structured::extract(&page.text, company.config.extract_tech_stack) {
                candidates.push(Entity {
                    id: uuid::Uuid::new_v4().to_string(),
                    company_id: company_id.to_string(),
                    entity_type: structured_to_entity_type(item.kind),
                    value: item.normalized,
                    context: Some(item.context),
                    source_urls: vec![page.url.clone()],
                    confidence: item.confidence,
                    extra_data: item.extra_data,
                    mention_count: 1,
                });
            }
            for found in self.ner.extract(&page.text).await {
                let mut extra_data = std::collections::HashMap::new();
                if let Some(role) = &found.role {
                    extra_data.insert("role".to_string(), serde_json::Value::String(role.clone()));
                }
                if !found.relationships.is_empty() {
                    extra_data.insert(
                        "relationships".to_string(),
                        serde_json::Value::Array(
                            found.relationships.iter().cloned().map(serde_json::Value::String).collect(),
                        ),
                    );
                }
                candidates.push(Entity {
                    id: uuid::Uuid::new_v4().to_string(),
                    company_id: company_id.to_string(),
                    entity_type: found.entity_type,
                    value: found.value,
                    context: Some(found.context),
                    source_urls: vec![page.url.clone()],
                    confidence: found.confidence,
                    extra_data,
                    mention_count: 1,
                });
            }
        }

        let merged = dedup::dedupe(candidates);
        let count = merged.len() as u32;
        for entity in merged {
            self.repos.entities.insert(entity).await;
        }

        let checkpoints = self.checkpoints();
        let mut checkpoint = checkpoints.load(company_id).await;
        checkpoint.entities_extracted_count = count;
        checkpoints.save(company_id, checkpoint).await;

        tracing::info!(company_id = %company_id, entities = count, "extraction finished");
        self.jobs()
            .transition_phase(company_id, Phase::Analyzing)
            .await
            .map_err(|e| e.to_string())
    }

    async fn run_analyze(&self, company_id: &str) -> Result<(), String> {
        let mut company = self
            .repos
            .companies
            .get(company_id)
            .await
            .ok_or_else(|| format!("company not found: {company_id}"))?;

        let checkpoints = self.checkpoints();
        let checkpoint = checkpoints.load(company_id).await;
        let completed_sections: HashSet<String> = checkpoint.analysis_sections_completed.iter().cloned().collect();

        let synthesizer = AnalysisSynthesizer::new(self.repos.clone(), self.clone_tokens(), self.llm.clone());
        let analysis = synthesizer.run_full_analysis(&mut company, &completed_sections).await;

        self.repos
            .companies
            .update(company)
            .await
            .map_err(|e| e.to_string())?;

        let mut checkpoint = checkpoints.load(company_id).await;
        checkpoint.analysis_sections_completed = analysis
            .sections
            .iter()
            .filter(|(_, s)| s.success())
            .map(|(id, _)| id.clone())
            .collect();
        checkpoints.save(company_id, checkpoint).await;

        tracing::info!(company_id = %company_id, sections_done = analysis.sections.len(), "analysis finished");
        self.jobs()
            .transition_phase(company_id, Phase::Generating)
            .await
            .map_err(|e| e.to_string())
    }

    /// GENERATING has no synthesis inputs beyond what ANALYZING already
    /// produced; this phase finalizes the run rather than issuing another
    /// LLM pass.
    async fn run_generate(&self, company_id: &str) -> Result<(), String> {
        let analysis = self.repos.analyses.get_latest(company_id).await;
        match analysis {
            Some(a) if a.success() => {
                tracing::info!(company_id = %company_id, "company completed");
                self.jobs()
                    .transition_phase(company_id, Phase::Completed)
                    .await
                    .map_err(|e| e.to_string())
            }
            _ => {
                tracing::warn!(company_id = %company_id, "analysis missing required sections, failing job");
                self.jobs()
                    .fail_job(company_id, "analysis did not produce the required sections", true)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(())
            }
        }
    }

    fn clone_tokens(&self) -> TokenTracker {
        TokenTracker::new(self.repos.clone(), self.config.token_pricing)
    }
}
