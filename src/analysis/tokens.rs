//! Records per-call token usage, aggregates cost, and reports company-level
//! breakdowns by call type and section.

use std::collections::HashMap;

use crate::config::TokenPricing;
use crate::models::{Company, TokenCallType, TokenUsage};
use crate::storage::Repositories;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageBreakdown {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CompanyUsage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub by_call_type: HashMap<String, UsageBreakdown>,
    pub by_section: HashMap<String, UsageBreakdown>,
}

pub struct TokenTracker {
    repos: Repositories,
    pricing: TokenPricing,
}

fn cost_usd(pricing: &TokenPricing, input_tokens: u64, output_tokens: u64) -> f64 {
    let input_cost = input_tokens as f64 / 1_000_000.0 * pricing.input_per_million_usd;
    let output_cost = output_tokens as f64 / 1_000_000.0 * pricing.output_per_million_usd;
    input_cost + output_cost
}

impl TokenTracker {
    pub fn new(repos: Repositories, pricing: TokenPricing) -> Self {
        TokenTracker { repos, pricing }
    }

    /// Persists a `TokenUsage` row and returns the incremental cost, so the
    /// caller can fold it into the Company's running totals.
    pub async fn record_call(
        &self,
        company: &mut Company,
        call_type: TokenCallType,
        section: Option<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        let usage = TokenUsage {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: company.id.clone(),
            call_type,
            section,
            input_tokens,
            output_tokens,
            recorded_at: crate::time::now_rfc3339(),
        };
        self.repos.token_usage.insert(usage).await;

        let cost = cost_usd(&self.pricing, input_tokens, output_tokens);
        company.total_input_tokens += input_tokens;
        company.total_output_tokens += output_tokens;
        company.total_cost_usd += cost;
        cost
    }

    pub async fn get_company_usage(&self, company_id: &str) -> CompanyUsage {
        let records = self.repos.token_usage.list_by_company(company_id).await;
        let mut usage = CompanyUsage::default();

        for r in &records {
            let cost = cost_usd(&self.pricing, r.input_tokens, r.output_tokens);
            usage.total_input_tokens += r.input_tokens;
            usage.total_output_tokens += r.output_tokens;
            usage.total_cost_usd += cost;

            let call_type_key = format!("{:?}", r.call_type).to_lowercase();
            let entry = usage.by_call_type.entry(call_type_key).or_default();
            entry.input_tokens += r.input_tokens;
            entry.output_tokens += r.output_tokens;
            entry.cost_usd += cost;

            if let Some(section) = &r.section {
                let entry = usage.by_section.entry(section.clone()).or_default();
                entry.input_tokens += r.input_tokens;
                entry.output_tokens += r.output_tokens;
                entry.cost_usd += cost;
            }
        }

        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompanyConfig;

    fn make_company() -> Company {
        Company::new("c1".into(), "Acme".into(), "https://acme.test".into(), CompanyConfig::default())
    }

    #[tokio::test]
    async fn test_record_call_updates_company_totals() {
        let tracker = TokenTracker::new(Repositories::in_memory(), TokenPricing::default());
        let mut company = make_company();
        let cost = tracker
            .record_call(&mut company, TokenCallType::Analysis, Some("company_overview".into()), 1000, 500)
            .await;
        assert!(cost > 0.0);
        assert_eq!(company.total_input_tokens, 1000);
        assert_eq!(company.total_output_tokens, 500);
    }

    #[tokio::test]
    async fn test_company_usage_breakdown_by_section() {
        let tracker = TokenTracker::new(Repositories::in_memory(), TokenPricing::default());
        let mut company = make_company();
        tracker
            .record_call(&mut company, TokenCallType::Analysis, Some("business_model".into()), 2000, 1000)
            .await;
        tracker
            .record_call(&mut company, TokenCallType::Extraction, None, 500, 100)
            .await;

        let usage = tracker.get_company_usage("c1").await;
        assert_eq!(usage.total_input_tokens, 2500);
        assert!(usage.by_section.contains_key("business_model"));
        assert!(usage.by_call_type.contains_key("extraction"));
    }
}
