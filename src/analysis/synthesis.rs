//! Walks the fixed section plan for a Company, calling out to an external
//! LLM per section, recording token usage, and assembling a versioned
//! `Analysis` (§4.11).

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::analysis::tokens::TokenTracker;
use crate::models::{Analysis, Company, EntityType, Page, SectionResult, TokenCallType};
use crate::storage::Repositories;

/// Fixed section plan (§4.11). `executive_summary` and `key_insights` are
/// given the concatenated prior section results in their prompt.
pub const SECTION_ORDER: &[&str] = &[
    "company_overview",
    "business_model",
    "team_leadership",
    "market_position",
    "technology",
    "key_insights",
    "red_flags",
    "executive_summary",
];

const PAGE_TEXT_CAP: usize = 5_000;
const ALL_CONTENT_CAP: usize = 50_000;
const TEAM_CONTENT_CAP: usize = 10_000;
const CAREERS_CONTENT_CAP: usize = 10_000;
const ALL_ENTITIES_CAP: usize = 10_000;
const TYPED_ENTITIES_CAP: usize = 5_000;
const MAX_SOURCES: usize = 10;

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Context assembled once per analysis run and reused across sections.
#[derive(Debug, Clone, Default)]
pub struct PreparedContent {
    pub all_content: String,
    pub team_content: String,
    pub careers_content: String,
    pub all_entities: String,
    pub people_entities: String,
    pub org_entities: String,
    pub tech_entities: String,
}

fn entity_line(value: &str, role: Option<&str>, relationships: &[String]) -> String {
    let mut line = value.to_string();
    if let Some(role) = role {
        line.push_str(&format!(" ({role})"));
    }
    if !relationships.is_empty() {
        line.push_str(&format!(" [{}]", relationships.join(", ")));
    }
    line
}

/// Build the page-text and entity-listing context consumed by every section
/// prompt. Caps mirror the original system's truncation limits so a single
/// company's content can never blow the synthesizer's context budget.
pub async fn prepare_content_for_analysis(repos: &Repositories, company_id: &str) -> PreparedContent {
    let pages = repos.pages.list_by_company(company_id).await;
    let entities = repos.entities.list_by_company(company_id).await;

    let mut all_content = String::new();
    let mut team_content = String::new();
    let mut careers_content = String::new();

    for page in &pages {
        let text = truncate_chars(&page.text, PAGE_TEXT_CAP);
        append_page(&mut all_content, page, &text);
        if page.page_type == "team" {
            append_page(&mut team_content, page, &text);
        }
        if page.page_type == "careers" {
            append_page(&mut careers_content, page, &text);
        }
    }

    let mut all_entities = String::new();
    let mut people_entities = String::new();
    let mut org_entities = String::new();
    let mut tech_entities = String::new();

    for entity in &entities {
        let role = entity
            .extra_data
            .get("roles")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str());
        let relationships: Vec<String> = entity
            .extra_data
            .get("relationships")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let line = entity_line(&entity.value, role, &relationships);

        all_entities.push_str(&line);
        all_entities.push('\n');

        match entity.entity_type {
            EntityType::Person => {
                people_entities.push_str(&line);
                people_entities.push('\n');
            }
            EntityType::Org => {
                org_entities.push_str(&line);
                org_entities.push('\n');
            }
            EntityType::TechStack => {
                tech_entities.push_str(&line);
                tech_entities.push('\n');
            }
            _ => {}
        }
    }

    PreparedContent {
        all_content: truncate_chars(&all_content, ALL_CONTENT_CAP),
        team_content: truncate_chars(&team_content, TEAM_CONTENT_CAP),
        careers_content: truncate_chars(&careers_content, CAREERS_CONTENT_CAP),
        all_entities: truncate_chars(&all_entities, ALL_ENTITIES_CAP),
        people_entities: truncate_chars(&people_entities, TYPED_ENTITIES_CAP),
        org_entities: truncate_chars(&org_entities, TYPED_ENTITIES_CAP),
        tech_entities: truncate_chars(&tech_entities, TYPED_ENTITIES_CAP),
    }
}

fn append_page(out: &mut String, page: &Page, text: &str) {
    out.push_str(&format!("### {} ({})\n{}\n\n", page.url, page.page_type, text));
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm call failed: {0}")]
    CallFailed(String),
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// External collaborator: one text-completion call per section.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(&self, system_prompt: &str, prompt: &str) -> Result<LlmResponse, LlmError>;
}

/// Default `LlmClient` until a real model backend is wired into `AppState`.
/// Every call fails, which `AnalysisSynthesizer` treats as a non-fatal
/// per-section error rather than aborting the run.
pub struct NotConfiguredLlmClient;

#[async_trait::async_trait]
impl LlmClient for NotConfiguredLlmClient {
    async fn call(&self, _system_prompt: &str, _prompt: &str) -> Result<LlmResponse, LlmError> {
        Err(LlmError::CallFailed("no LLM backend configured".to_string()))
    }
}

fn sources_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s\]>]+").expect("valid sources regex"))
}

/// Extract a trailing `SOURCES:` block, if present, into up to `MAX_SOURCES`
/// URLs. Tolerates its absence entirely (§9: "must tolerate absence").
fn extract_sources(content: &str) -> (String, Vec<String>) {
    let upper = content.to_uppercase();
    let Some(idx) = upper.find("SOURCES:") else {
        return (content.to_string(), vec![]);
    };
    let body = &content[..idx];
    let source_text = &content[idx..];
    let sources: Vec<String> = sources_regex()
        .find_iter(source_text)
        .take(MAX_SOURCES)
        .map(|m| m.as_str().to_string())
        .collect();
    (body.trim().to_string(), sources)
}

fn section_prompt(section_id: &str, ctx: &PreparedContent, previous: &str) -> (String, String) {
    let system_prompt = format!(
        "You are a company-intelligence analyst producing the \"{section_id}\" section of a research report."
    );
    let prompt = match section_id {
        "company_overview" => format!("Summarize what this company does.\n\n{}", ctx.all_content),
        "business_model" => format!("Describe the business model and revenue approach.\n\n{}", ctx.all_content),
        "team_leadership" => format!(
            "Describe the leadership team and key people.\n\nTeam pages:\n{}\n\nPeople:\n{}",
            ctx.team_content, ctx.people_entities
        ),
        "market_position" => format!(
            "Assess market position and competitors.\n\n{}\n\nOrganizations mentioned:\n{}",
            ctx.all_content, ctx.org_entities
        ),
        "technology" => format!("Describe the technology stack.\n\n{}", ctx.tech_entities),
        "key_insights" => format!(
            "Synthesize the most important insights.\n\nPrior analysis:\n{previous}\n\n{}",
            ctx.all_content
        ),
        "red_flags" => format!(
            "Identify risks or red flags, including hiring signals.\n\nCareers pages:\n{}\n\n{}",
            ctx.careers_content, ctx.all_content
        ),
        "executive_summary" => format!(
            "Write an executive summary.\n\nFull analysis so far:\n{previous}"
        ),
        _ => ctx.all_content.clone(),
    };
    (system_prompt, prompt)
}

/// Concatenate the successful sections produced so far, in plan order, for
/// injection into `key_insights`/`executive_summary` prompts.
fn concatenate_prior(results: &HashMap<String, SectionResult>) -> String {
    SECTION_ORDER
        .iter()
        .filter_map(|id| results.get(*id))
        .filter(|s| s.success())
        .map(|s| format!("## {}\n{}", s.section_id, s.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct AnalysisSynthesizer {
    repos: Repositories,
    tokens: TokenTracker,
    llm: std::sync::Arc<dyn LlmClient>,
}

impl AnalysisSynthesizer {
    pub fn new(repos: Repositories, tokens: TokenTracker, llm: std::sync::Arc<dyn LlmClient>) -> Self {
        AnalysisSynthesizer { repos, tokens, llm }
    }

    /// Run (or resume) a single section given already-prepared context and
    /// prior results, recording token usage against `company`. Non-fatal on
    /// LLM failure: returns an empty, errored `SectionResult`.
    pub async fn analyze_section(
        &self,
        company: &mut Company,
        section_id: &str,
        ctx: &PreparedContent,
        previous_results: &HashMap<String, SectionResult>,
    ) -> SectionResult {
        if !SECTION_ORDER.contains(&section_id) {
            return SectionResult {
                section_id: section_id.to_string(),
                content: String::new(),
                sources: vec![],
                confidence: 0.0,
                input_tokens: 0,
                output_tokens: 0,
                error: Some(format!("unknown section: {section_id}")),
            };
        }

        let previous = concatenate_prior(previous_results);
        let (system_prompt, prompt) = section_prompt(section_id, ctx, &previous);

        match self.llm.call(&system_prompt, &prompt).await {
            Ok(response) => {
                self.tokens
                    .record_call(
                        company,
                        TokenCallType::Analysis,
                        Some(section_id.to_string()),
                        response.input_tokens,
                        response.output_tokens,
                    )
                    .await;
                let (content, sources) = extract_sources(&response.content);
                SectionResult {
                    section_id: section_id.to_string(),
                    content,
                    sources,
                    confidence: 0.8,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    error: None,
                }
            }
            Err(e) => SectionResult {
                section_id: section_id.to_string(),
                content: String::new(),
                sources: vec![],
                confidence: 0.8,
                input_tokens: 0,
                output_tokens: 0,
                error: Some(e.to_string()),
            },
        }
    }

    /// Run every section not already in `completed_sections` (checkpoint-
    /// driven resume), persist a new versioned `Analysis`, and return it.
    pub async fn run_full_analysis(
        &self,
        company: &mut Company,
        completed_sections: &HashSet<String>,
    ) -> Analysis {
        let ctx = prepare_content_for_analysis(&self.repos, &company.id).await;

        let mut sections: HashMap<String, SectionResult> = HashMap::new();
        if let Some(latest) = self.repos.analyses.get_latest(&company.id).await {
            for (id, section) in latest.sections {
                if completed_sections.contains(&id) {
                    sections.insert(id, section);
                }
            }
        }

        let mut errors = Vec::new();
        let started_at = crate::time::now_rfc3339();

        for section_id in SECTION_ORDER {
            if sections.contains_key(*section_id) {
                continue;
            }
            let result = self.analyze_section(company, section_id, &ctx, &sections).await;
            if let Some(err) = &result.error {
                errors.push(format!("{section_id}: {err}"));
            }
            sections.insert(section_id.to_string(), result);
        }

        let executive_summary = sections
            .get("executive_summary")
            .filter(|s| s.success())
            .map(|s| s.content.clone())
            .unwrap_or_default();

        let analysis = Analysis {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: company.id.clone(),
            version_number: 0,
            executive_summary,
            sections,
            started_at,
            completed_at: Some(crate::time::now_rfc3339()),
            errors,
        };

        self.repos.analyses.insert_versioned(analysis).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenPricing;
    use crate::models::{CompanyConfig, EntityType};

    struct StubLlm;

    #[async_trait::async_trait]
    impl LlmClient for StubLlm {
        async fn call(&self, _system_prompt: &str, prompt: &str) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: format!("analysis for: {}\n\nSOURCES: https://acme.test/about", &prompt[..prompt.len().min(20)]),
                input_tokens: 100,
                output_tokens: 50,
            })
        }
    }

    struct FailingLlm;

    #[async_trait::async_trait]
    impl LlmClient for FailingLlm {
        async fn call(&self, _s: &str, _p: &str) -> Result<LlmResponse, LlmError> {
            Err(LlmError::CallFailed("unavailable".into()))
        }
    }

    fn company() -> Company {
        Company::new("c1".into(), "Acme".into(), "https://acme.test".into(), CompanyConfig::default())
    }

    #[tokio::test]
    async fn test_analyze_section_parses_sources() {
        let repos = Repositories::in_memory();
        let synth = AnalysisSynthesizer::new(
            repos.clone(),
            TokenTracker::new(repos, TokenPricing::default()),
            std::sync::Arc::new(StubLlm),
        );
        let mut c = company();
        let ctx = PreparedContent::default();
        let result = synth.analyze_section(&mut c, "company_overview", &ctx, &HashMap::new()).await;
        assert!(result.success());
        assert_eq!(result.sources, vec!["https://acme.test/about".to_string()]);
        assert_eq!(c.total_input_tokens, 100);
    }

    #[tokio::test]
    async fn test_unknown_section_errors_without_calling_llm() {
        let repos = Repositories::in_memory();
        let synth = AnalysisSynthesizer::new(
            repos.clone(),
            TokenTracker::new(repos, TokenPricing::default()),
            std::sync::Arc::new(StubLlm),
        );
        let mut c = company();
        let result = synth
            .analyze_section(&mut c, "nonexistent", &PreparedContent::default(), &HashMap::new())
            .await;
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_llm_failure_is_non_fatal() {
        let repos = Repositories::in_memory();
        let synth = AnalysisSynthesizer::new(
            repos.clone(),
            TokenTracker::new(repos, TokenPricing::default()),
            std::sync::Arc::new(FailingLlm),
        );
        let mut c = company();
        let result = synth
            .analyze_section(&mut c, "business_model", &PreparedContent::default(), &HashMap::new())
            .await;
        assert!(!result.success());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_run_full_analysis_success_requires_three_sections() {
        let repos = Repositories::in_memory();
        let synth = AnalysisSynthesizer::new(
            repos.clone(),
            TokenTracker::new(repos, TokenPricing::default()),
            std::sync::Arc::new(StubLlm),
        );
        let mut c = company();
        let analysis = synth.run_full_analysis(&mut c, &HashSet::new()).await;
        assert!(analysis.success());
        assert_eq!(analysis.version_number, 1);
        assert!(analysis.total_tokens() > 0);
    }

    #[tokio::test]
    async fn test_run_full_analysis_skips_completed_sections() {
        let repos = Repositories::in_memory();
        // Seed an existing analysis with company_overview already done.
        let mut seeded = HashMap::new();
        seeded.insert(
            "company_overview".to_string(),
            SectionResult {
                section_id: "company_overview".into(),
                content: "seeded content".into(),
                sources: vec![],
                confidence: 0.8,
                input_tokens: 10,
                output_tokens: 5,
                error: None,
            },
        );
        repos
            .analyses
            .insert_versioned(Analysis {
                id: "a1".into(),
                company_id: "c1".into(),
                version_number: 0,
                executive_summary: String::new(),
                sections: seeded,
                started_at: "now".into(),
                completed_at: None,
                errors: vec![],
            })
            .await;

        let synth = AnalysisSynthesizer::new(
            repos.clone(),
            TokenTracker::new(repos, TokenPricing::default()),
            std::sync::Arc::new(StubLlm),
        );
        let mut c = company();
        let mut completed = HashSet::new();
        completed.insert("company_overview".to_string());
        let analysis = synth.run_full_analysis(&mut c, &completed).await;
        assert_eq!(analysis.sections.get("company_overview").unwrap().content, "seeded content");
    }

    #[tokio::test]
    async fn test_prepare_content_groups_by_page_type() {
        let repos = Repositories::in_memory();
        repos
            .pages
            .insert_if_absent(Page {
                id: "p1".into(),
                company_id: "c1".into(),
                url: "https://acme.test/team".into(),
                page_type: "team".into(),
                status_code: 200,
                is_external: false,
                title: None,
                text: "Jane Smith is CEO".into(),
                content_hash: "h".into(),
                depth: 0,
                crawled_at: "now".into(),
                error: None,
            })
            .await;
        repos
            .entities
            .insert(crate::models::Entity {
                id: "e1".into(),
                company_id: "c1".into(),
                entity_type: EntityType::Person,
                value: "Jane Smith".into(),
                context: None,
                source_urls: vec![],
                confidence: 0.9,
                extra_data: Default::default(),
                mention_count: 1,
            })
            .await;

        let ctx = prepare_content_for_analysis(&repos, "c1").await;
        assert!(ctx.team_content.contains("Jane Smith"));
        assert!(ctx.people_entities.contains("Jane Smith"));
        assert!(ctx.all_content.contains("Jane Smith"));
    }
}
