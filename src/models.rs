use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a company's pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
}

/// Phase within the per-company state machine. Order matches the valid
/// transition graph: Queued -> Crawling -> Extracting -> Analyzing -> Generating -> Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Queued,
    Crawling,
    Extracting,
    Analyzing,
    Generating,
    Completed,
}

impl Phase {
    /// Returns true if `self -> next` is a valid transition per the state machine.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Queued, Phase::Crawling)
                | (Phase::Crawling, Phase::Extracting)
                | (Phase::Crawling, Phase::Completed)
                | (Phase::Extracting, Phase::Analyzing)
                | (Phase::Analyzing, Phase::Generating)
                | (Phase::Generating, Phase::Completed)
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_max_pages() -> u32 {
    500
}

fn default_max_depth() -> u32 {
    4
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_user_agent() -> String {
    "CIRA Bot".to_string()
}

/// Per-company crawl/analysis configuration supplied at job start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub follow_social_links: HashMap<String, bool>,
    #[serde(default)]
    pub extract_tech_stack: bool,
    #[serde(default)]
    pub analysis_mode: AnalysisMode,
}

impl Default for CompanyConfig {
    fn default() -> Self {
        CompanyConfig {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            timeout_secs: default_timeout_secs(),
            respect_robots: true,
            user_agent: default_user_agent(),
            follow_social_links: HashMap::new(),
            extract_tech_stack: false,
            analysis_mode: AnalysisMode::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Standard,
    Deep,
    Quick,
}

/// The root aggregate: a single company under ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub seed_url: String,
    #[serde(default)]
    pub industry: Option<String>,
    pub status: CompanyStatus,
    pub phase: Phase,
    pub config: CompanyConfig,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Milliseconds accumulated across all pause/resume cycles.
    #[serde(default)]
    pub total_paused_duration_ms: u64,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Company {
    pub fn new(id: String, name: String, seed_url: String, config: CompanyConfig) -> Self {
        Company {
            id,
            name,
            seed_url,
            industry: None,
            status: CompanyStatus::Pending,
            phase: Phase::Queued,
            config,
            created_at: String::new(),
            started_at: None,
            paused_at: None,
            completed_at: None,
            updated_at: None,
            total_paused_duration_ms: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost_usd: 0.0,
            errors: Vec::new(),
        }
    }
}

/// A single crawled page belonging to a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub company_id: String,
    pub url: String,
    pub page_type: String,
    pub status_code: u16,
    pub is_external: bool,
    pub title: Option<String>,
    pub text: String,
    pub content_hash: String,
    pub depth: u32,
    pub crawled_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Entity type taxonomy used throughout extraction and deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Org,
    Location,
    Product,
    Date,
    Money,
    Email,
    Phone,
    Address,
    SocialHandle,
    TechStack,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Org => "org",
            EntityType::Location => "location",
            EntityType::Product => "product",
            EntityType::Date => "date",
            EntityType::Money => "money",
            EntityType::Email => "email",
            EntityType::Phone => "phone",
            EntityType::Address => "address",
            EntityType::SocialHandle => "social_handle",
            EntityType::TechStack => "tech_stack",
        }
    }
}

/// A named or structured entity extracted for a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub company_id: String,
    pub entity_type: EntityType,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub source_urls: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub extra_data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub mention_count: u32,
}

/// Durable crawl-progress checkpoint, stored as a JSON column on CrawlSession.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_checkpoint_version")]
    pub version: u32,
    #[serde(default)]
    pub pages_visited: Vec<String>,
    #[serde(default)]
    pub pages_queued: Vec<String>,
    #[serde(default)]
    pub external_links_found: Vec<String>,
    #[serde(default)]
    pub current_depth: u32,
    #[serde(default)]
    pub crawl_start_time: Option<String>,
    #[serde(default)]
    pub last_checkpoint_time: Option<String>,
    #[serde(default)]
    pub entities_extracted_count: u32,
    #[serde(default)]
    pub analysis_sections_completed: Vec<String>,
}

fn default_checkpoint_version() -> u32 {
    CHECKPOINT_VERSION
}

impl Default for Checkpoint {
    fn default() -> Self {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            pages_visited: Vec::new(),
            pages_queued: Vec::new(),
            external_links_found: Vec::new(),
            current_depth: 0,
            crawl_start_time: None,
            last_checkpoint_time: None,
            entities_extracted_count: 0,
            analysis_sections_completed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

/// One crawl attempt for a company; holds the checkpoint blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSession {
    pub id: String,
    pub company_id: String,
    pub status: SessionStatus,
    pub pages_crawled: u32,
    pub pages_queued: u32,
    pub max_depth_reached: u32,
    pub external_links_followed: u32,
    pub checkpoint: Checkpoint,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// One section of an analysis synthesis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionResult {
    pub section_id: String,
    pub content: String,
    pub sources: Vec<String>,
    #[serde(default = "default_section_confidence")]
    pub confidence: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_section_confidence() -> f64 {
    0.8
}

impl SectionResult {
    pub fn success(&self) -> bool {
        self.error.is_none() && !self.content.trim().is_empty()
    }
}

/// A single versioned analysis for a company, bounded to three live versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub company_id: String,
    pub version_number: u32,
    pub executive_summary: String,
    pub sections: HashMap<String, SectionResult>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Analysis {
    /// Successful iff the required sections are present and non-empty.
    pub fn success(&self) -> bool {
        for required in ["company_overview", "business_model", "executive_summary"] {
            match self.sections.get(required) {
                Some(s) if s.success() => {}
                _ => return false,
            }
        }
        true
    }

    pub fn total_tokens(&self) -> u64 {
        self.sections
            .values()
            .map(|s| s.input_tokens + s.output_tokens)
            .sum()
    }

    pub fn get_full_analysis(&self) -> String {
        let mut out = String::new();
        if !self.executive_summary.is_empty() {
            out.push_str("# Executive Summary\n\n");
            out.push_str(&self.executive_summary);
            out.push_str("\n\n");
        }
        for section_id in crate::analysis::synthesis::SECTION_ORDER {
            if let Some(section) = self.sections.get(*section_id) {
                if section.success() {
                    out.push_str(&format!("# {}\n\n{}\n\n", section_id, section.content));
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCallType {
    Extraction,
    Analysis,
    Summarization,
}

/// A single recorded LLM/NER call's token usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub id: String,
    pub company_id: String,
    pub call_type: TokenCallType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

/// A scheduled group of companies sharing a concurrency ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub company_ids: Vec<String>,
    pub status: BatchStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub priority: u32,
    pub max_concurrency: u32,
}
