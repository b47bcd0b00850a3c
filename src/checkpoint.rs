//! Checkpoint persistence and resume-phase inference (§4.13). Checkpoints are
//! committed atomically onto a Company's latest `CrawlSession`; loading
//! tolerates malformed or partial shapes by falling back to per-field
//! defaults rather than failing outright, so progress is preserved wherever
//! possible.

use serde_json::Value;

use crate::models::{Checkpoint, CrawlSession, Phase, SessionStatus, CHECKPOINT_VERSION};
use crate::storage::Repositories;

/// Re-hydrate a `Checkpoint` from an arbitrary JSON blob, defaulting any
/// field that is missing or of the wrong shape instead of rejecting the
/// whole document.
pub fn checkpoint_from_value(raw: &Value) -> Checkpoint {
    let default = Checkpoint::default();
    let obj = raw.as_object();

    let string_vec = |key: &str| -> Vec<String> {
        obj.and_then(|o| o.get(key))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let version = obj
        .and_then(|o| o.get("version"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(CHECKPOINT_VERSION);

    let current_depth = obj
        .and_then(|o| o.get("current_depth"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(default.current_depth);

    let entities_extracted_count = obj
        .and_then(|o| o.get("entities_extracted_count"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(default.entities_extracted_count);

    let crawl_start_time = obj
        .and_then(|o| o.get("crawl_start_time"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let last_checkpoint_time = obj
        .and_then(|o| o.get("last_checkpoint_time"))
        .and_then(|v| v.as_str())
        .map(String::from);

    Checkpoint {
        version,
        pages_visited: string_vec("pages_visited"),
        pages_queued: string_vec("pages_queued"),
        external_links_found: string_vec("external_links_found"),
        current_depth,
        crawl_start_time,
        last_checkpoint_time,
        entities_extracted_count,
        analysis_sections_completed: string_vec("analysis_sections_completed"),
    }
}

/// Whether any progress at all has been recorded — the gate for attempting
/// a checkpoint-based resume versus starting fresh from QUEUED.
pub fn can_resume(checkpoint: &Checkpoint) -> bool {
    !checkpoint.pages_visited.is_empty()
        || !checkpoint.pages_queued.is_empty()
        || checkpoint.entities_extracted_count > 0
        || !checkpoint.analysis_sections_completed.is_empty()
}

/// Interpret checkpoint progress into the phase a resume should restart
/// from (§4.13).
pub fn resume_phase(checkpoint: &Checkpoint) -> Phase {
    if !checkpoint.analysis_sections_completed.is_empty() || checkpoint.entities_extracted_count > 0
    {
        Phase::Analyzing
    } else if !checkpoint.pages_visited.is_empty() {
        Phase::Extracting
    } else if !checkpoint.pages_queued.is_empty() {
        Phase::Crawling
    } else {
        Phase::Queued
    }
}

/// Commits checkpoints onto a Company's `CrawlSession` row, creating one if
/// none exists yet.
pub struct CheckpointService {
    repos: Repositories,
}

impl CheckpointService {
    pub fn new(repos: Repositories) -> Self {
        CheckpointService { repos }
    }

    /// Save `checkpoint` to the company's latest session, creating a new
    /// ACTIVE session if the company has none yet.
    pub async fn save(&self, company_id: &str, checkpoint: Checkpoint) {
        match self.repos.sessions.get_latest_for_company(company_id).await {
            Some(mut session) => {
                session.checkpoint = checkpoint;
                session.pages_crawled = session.checkpoint.pages_visited.len() as u32;
                session.pages_queued = session.checkpoint.pages_queued.len() as u32;
                session.max_depth_reached = session.max_depth_reached.max(session.checkpoint.current_depth);
                let _ = self.repos.sessions.update(session).await;
            }
            None => {
                let now = crate::time::now_rfc3339();
                let session = CrawlSession {
                    id: uuid::Uuid::new_v4().to_string(),
                    company_id: company_id.to_string(),
                    status: SessionStatus::Active,
                    pages_crawled: checkpoint.pages_visited.len() as u32,
                    pages_queued: checkpoint.pages_queued.len() as u32,
                    max_depth_reached: checkpoint.current_depth,
                    external_links_followed: checkpoint.external_links_found.len() as u32,
                    checkpoint,
                    started_at: now,
                    completed_at: None,
                };
                self.repos.sessions.insert(session).await;
            }
        }
    }

    /// Load the company's latest checkpoint, or the default (empty) one if
    /// the company has no session yet.
    pub async fn load(&self, company_id: &str) -> Checkpoint {
        self.repos
            .sessions
            .get_latest_for_company(company_id)
            .await
            .map(|s| s.checkpoint)
            .unwrap_or_default()
    }

    pub async fn can_resume(&self, company_id: &str) -> bool {
        can_resume(&self.load(company_id).await)
    }

    pub async fn resume_phase(&self, company_id: &str) -> Phase {
        resume_phase(&self.load(company_id).await)
    }

    /// Replace the company's checkpoint with a fresh, empty one (used after
    /// a completed or abandoned run).
    pub async fn clear(&self, company_id: &str) {
        self.save(company_id, Checkpoint::default()).await;
    }

    /// Load-mutate-save a single field without the caller rebuilding the
    /// whole checkpoint blob.
    pub async fn update_checkpoint_field<F>(&self, company_id: &str, mutate: F)
    where
        F: FnOnce(&mut Checkpoint),
    {
        let mut checkpoint = self.load(company_id).await;
        mutate(&mut checkpoint);
        self.save(company_id, checkpoint).await;
    }

    /// Append a single visited URL without rebuilding the whole blob.
    pub async fn add_visited_url(&self, company_id: &str, url: &str) {
        let url = url.to_string();
        self.update_checkpoint_field(company_id, move |cp| cp.pages_visited.push(url)).await;
    }

    /// Projection for progress endpoints: the checkpoint's counts without
    /// the full visited/queued URL lists.
    pub async fn get_checkpoint_stats(&self, company_id: &str) -> CheckpointStats {
        let checkpoint = self.load(company_id).await;
        CheckpointStats {
            pages_visited: checkpoint.pages_visited.len(),
            pages_queued: checkpoint.pages_queued.len(),
            current_depth: checkpoint.current_depth,
            entities_extracted_count: checkpoint.entities_extracted_count,
            analysis_sections_completed: checkpoint.analysis_sections_completed.len(),
            last_checkpoint_time: checkpoint.last_checkpoint_time,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckpointStats {
    pub pages_visited: usize,
    pub pages_queued: usize,
    pub current_depth: u32,
    pub entities_extracted_count: u32,
    pub analysis_sections_completed: usize,
    pub last_checkpoint_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompanyConfig;

    fn company(id: &str) -> crate::models::Company {
        crate::models::Company::new(id.to_string(), "Acme".into(), "https://acme.test".into(), CompanyConfig::default())
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let repos = Repositories::in_memory();
        repos.companies.insert(company("c1")).await;
        let svc = CheckpointService::new(repos);

        let mut checkpoint = Checkpoint::default();
        checkpoint.pages_visited = vec!["https://acme.test/".into()];
        checkpoint.current_depth = 2;
        svc.save("c1", checkpoint.clone()).await;

        let loaded = svc.load("c1").await;
        assert_eq!(loaded.pages_visited, checkpoint.pages_visited);
        assert_eq!(loaded.current_depth, 2);
    }

    #[tokio::test]
    async fn test_save_creates_session_if_absent() {
        let repos = Repositories::in_memory();
        let svc = CheckpointService::new(repos.clone());
        svc.save("c1", Checkpoint::default()).await;
        assert!(repos.sessions.get_latest_for_company("c1").await.is_some());
    }

    #[test]
    fn test_resume_phase_priority_order() {
        let mut cp = Checkpoint::default();
        assert_eq!(resume_phase(&cp), Phase::Queued);

        cp.pages_queued = vec!["u".into()];
        assert_eq!(resume_phase(&cp), Phase::Crawling);

        cp.pages_visited = vec!["u".into()];
        assert_eq!(resume_phase(&cp), Phase::Extracting);

        cp.entities_extracted_count = 3;
        assert_eq!(resume_phase(&cp), Phase::Analyzing);
    }

    #[test]
    fn test_analysis_sections_completed_implies_analyzing() {
        let mut cp = Checkpoint::default();
        cp.analysis_sections_completed = vec!["company_overview".into()];
        assert_eq!(resume_phase(&cp), Phase::Analyzing);
    }

    #[test]
    fn test_malformed_fields_fall_back_to_defaults() {
        let raw = serde_json::json!({
            "version": 1,
            "pages_visited": "not-an-array",
            "current_depth": "not-a-number",
        });
        let cp = checkpoint_from_value(&raw);
        assert!(cp.pages_visited.is_empty());
        assert_eq!(cp.current_depth, 0);
    }

    #[test]
    fn test_can_resume_false_when_empty() {
        assert!(!can_resume(&Checkpoint::default()));
    }

    #[tokio::test]
    async fn test_add_visited_url_appends_without_clobbering() {
        let repos = Repositories::in_memory();
        repos.companies.insert(company("c1")).await;
        let svc = CheckpointService::new(repos);

        svc.add_visited_url("c1", "https://acme.test/").await;
        svc.add_visited_url("c1", "https://acme.test/about").await;

        let loaded = svc.load("c1").await;
        assert_eq!(loaded.pages_visited, vec!["https://acme.test/", "https://acme.test/about"]);
    }

    #[tokio::test]
    async fn test_get_checkpoint_stats_reflects_progress() {
        let repos = Repositories::in_memory();
        repos.companies.insert(company("c1")).await;
        let svc = CheckpointService::new(repos);

        let mut checkpoint = Checkpoint::default();
        checkpoint.pages_visited = vec!["a".into(), "b".into()];
        checkpoint.entities_extracted_count = 4;
        svc.save("c1", checkpoint).await;

        let stats = svc.get_checkpoint_stats("c1").await;
        assert_eq!(stats.pages_visited, 2);
        assert_eq!(stats.entities_extracted_count, 4);
    }
}
