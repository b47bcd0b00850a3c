use axum::http::StatusCode;
use axum_test::TestServer;
use cira_crawler::config::{Config, TokenPricing};
use cira_crawler::{build_app, AppState};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

fn test_config() -> Config {
    Config {
        shared_secret: "test_secret".to_string(),
        port: 8080,
        max_concurrent_jobs: 1,
        max_concurrent_fetches: 1,
        default_max_pages: 10,
        default_max_depth: 2,
        default_timeout_secs: 60,
        checkpoint_page_interval: 10,
        checkpoint_interval_secs: 120,
        http_timeout_secs: 5,
        robots_timeout_secs: 5,
        sitemap_timeout_secs: 5,
        lock_ttl_secs: 60,
        rate_limit_acquire_timeout_secs: 5,
        stale_job_threshold_secs: 3600,
        token_pricing: TokenPricing::default(),
    }
}

fn sign(body: &str, timestamp: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn auth_headers(body: &str, secret: &str) -> (String, String) {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();
    let signature = sign(body, &timestamp, secret);
    (timestamp, signature)
}

fn test_server() -> (TestServer, Arc<Config>) {
    let config = Arc::new(test_config());
    let state = AppState::new(config.clone());
    (TestServer::new(build_app(state)).unwrap(), config)
}

#[tokio::test]
async fn test_health_does_not_require_signature() {
    let (server, _config) = test_server();
    let response = server.get("/health").await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<serde_json::Value>()["status"], "ok");
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let (server, _config) = test_server();
    let response = server.get("/companies").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_company_starts_it_in_progress() {
    let (server, config) = test_server();

    let payload = json!({
        "name": "Acme Corp",
        "seed_url": "https://acme.test",
        "industry": "software",
        "config": { "max_pages": 1, "respect_robots": false }
    });
    let body = serde_json::to_string(&payload).unwrap();
    let (timestamp, signature) = auth_headers(&body, &config.shared_secret);

    let response = server
        .post("/companies")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;

    response.assert_status(StatusCode::CREATED);
    let created = response.json::<serde_json::Value>();
    assert_eq!(created["name"], "Acme Corp");
    assert_eq!(created["status"], "inprogress");
    assert!(created["started_at"].is_string());
}

#[tokio::test]
async fn test_get_unknown_company_is_404() {
    let (server, config) = test_server();
    let (timestamp, signature) = auth_headers("", &config.shared_secret);

    let response = server
        .get("/companies/does-not-exist")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

async fn create_company(server: &TestServer, secret: &str) -> String {
    let payload = json!({
        "name": "Acme Corp",
        "seed_url": "https://acme.test",
        "config": { "max_pages": 1, "respect_robots": false }
    });
    let body = serde_json::to_string(&payload).unwrap();
    let (timestamp, signature) = auth_headers(&body, secret);

    let response = server
        .post("/companies")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<serde_json::Value>()["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_pause_then_resume_round_trips_status() {
    let (server, config) = test_server();
    let id = create_company(&server, &config.shared_secret).await;

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let paused = server
        .post(&format!("/companies/{id}/pause"))
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;
    paused.assert_status(StatusCode::OK);
    assert_eq!(paused.json::<serde_json::Value>()["status"], "paused");

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let resumed = server
        .post(&format!("/companies/{id}/resume"))
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;
    resumed.assert_status(StatusCode::OK);
    assert_eq!(resumed.json::<serde_json::Value>()["status"], "inprogress");
}

#[tokio::test]
async fn test_company_progress_reports_checkpoint_fields() {
    let (server, config) = test_server();
    let id = create_company(&server, &config.shared_secret).await;

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let response = server
        .get(&format!("/companies/{id}/progress"))
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;

    response.assert_status(StatusCode::OK);
    let progress = response.json::<serde_json::Value>();
    assert_eq!(progress["company_id"], id);
    assert!(progress["remaining_seconds"].is_number());
}

#[tokio::test]
async fn test_list_companies_includes_created_company() {
    let (server, config) = test_server();
    let id = create_company(&server, &config.shared_secret).await;

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let response = server
        .get("/companies")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;

    response.assert_status(StatusCode::OK);
    let companies = response.json::<Vec<serde_json::Value>>();
    assert!(companies.iter().any(|c| c["id"] == id));
}

#[tokio::test]
async fn test_create_and_inspect_batch() {
    let (server, config) = test_server();
    let id = create_company(&server, &config.shared_secret).await;

    let payload = json!({ "company_ids": [id], "max_concurrency": 2, "priority": 1 });
    let body = serde_json::to_string(&payload).unwrap();
    let (timestamp, signature) = auth_headers(&body, &config.shared_secret);
    let created = server
        .post("/batches")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;
    created.assert_status(StatusCode::CREATED);
    let batch_id = created.json::<serde_json::Value>()["id"].as_str().unwrap().to_string();

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let fetched = server
        .get(&format!("/batches/{batch_id}"))
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;
    fetched.assert_status(StatusCode::OK);
    let body = fetched.json::<serde_json::Value>();
    assert_eq!(body["batch"]["id"], batch_id);
    assert_eq!(body["progress"]["total"], 1);
}

#[tokio::test]
async fn test_delete_company_removes_it() {
    let (server, config) = test_server();
    let id = create_company(&server, &config.shared_secret).await;

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let deleted = server
        .delete(&format!("/companies/{id}"))
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;
    deleted.assert_status(StatusCode::NO_CONTENT);

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let response = server
        .get(&format!("/companies/{id}"))
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_schedule_batches_dispatches_pending_members() {
    let (server, config) = test_server();
    let id = create_company(&server, &config.shared_secret).await;

    let payload = json!({ "company_ids": [id], "max_concurrency": 1 });
    let body = serde_json::to_string(&payload).unwrap();
    let (timestamp, signature) = auth_headers(&body, &config.shared_secret);
    server
        .post("/batches")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .json(&payload)
        .await
        .assert_status(StatusCode::CREATED);

    let (timestamp, signature) = auth_headers("", &config.shared_secret);
    let response = server
        .post("/batches/schedule")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .await;
    response.assert_status(StatusCode::OK);
    let batches = response.json::<Vec<serde_json::Value>>();
    assert!(!batches.is_empty());
}

#[tokio::test]
async fn test_create_batch_rejects_empty_member_list() {
    let (server, config) = test_server();
    let payload = json!({ "company_ids": [] });
    let body = serde_json::to_string(&payload).unwrap();
    let (timestamp, signature) = auth_headers(&body, &config.shared_secret);

    let response = server
        .post("/batches")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
