use std::time::Duration;

use citescope::api::{CategoryId, PageRequest, QueryId, StartJobRequest};
use citescope::{ApiError, HttpJobApi, JobApi, JobId, JobStatus};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer) -> HttpJobApi {
    HttpJobApi::with_config(server.uri(), None, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn job_status_parses_full_record() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pipeline/jobs/job-7/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "job-7",
            "status": "executing_queries",
            "llmProviders": ["openai", "anthropic"],
            "totalQueries": 40,
            "completedQueries": 25,
            "failedQueries": 2,
            "progressPercentage": 67,
            "startedAt": "2025-11-02T09:00:00Z"
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let job = api.job_status(&JobId::new("job-7")).await.unwrap();

    assert_eq!(job.status, JobStatus::ExecutingQueries);
    assert_eq!(job.llm_providers, vec!["openai", "anthropic"]);
    assert_eq!(job.queries_settled(), 27);
    assert!(job.counts_consistent());
    assert!(job.completed_at.is_none());
}

#[tokio::test]
async fn start_job_posts_camel_case_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline/start"))
        .and(body_partial_json(json!({
            "companyProfileId": "acme",
            "categoryCount": 3,
            "queriesPerCategory": 5,
            "llmProviders": ["openai"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": "job-42" })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let req = StartJobRequest::new("acme", 3, 5, vec!["openai".into()]);
    let started = api.start_job(&req).await.unwrap();

    assert_eq!(started.job_id, JobId::new("job-42"));
}

#[tokio::test]
async fn start_job_rejects_empty_providers_without_a_request() {
    let server = MockServer::start().await;
    // No mock mounted: a request would 404 and fail differently.

    let api = api_for(&server);
    let req = StartJobRequest::new("acme", 3, 5, vec![]);
    let err = api.start_job(&req).await.unwrap_err();

    assert!(matches!(err, ApiError::InvalidRequest { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn list_jobs_passes_pagination_params() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pipeline/jobs"))
        .and(query_param("limit", "5"))
        .and(query_param("offset", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobs": [{
                "id": "job-1",
                "status": "completed",
                "llmProviders": ["openai"],
                "totalQueries": 10,
                "completedQueries": 10,
                "failedQueries": 0,
                "progressPercentage": 100,
                "startedAt": "2025-11-02T09:00:00Z",
                "completedAt": "2025-11-02T09:02:05Z"
            }],
            "total": 37
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let page = api.list_jobs(PageRequest::new(5, 10)).await.unwrap();

    assert_eq!(page.total, 37);
    assert_eq!(page.jobs.len(), 1);
    assert_eq!(page.jobs[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn job_queries_scopes_to_category_when_given() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pipeline/jobs/job-1/queries"))
        .and(query_param("categoryId", "cat-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "queries": [{
                "id": "q-1",
                "categoryId": "cat-9",
                "text": "What laptop brands do reviewers recommend?",
                "status": "completed",
                "responseCount": 2
            }]
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let queries = api
        .job_queries(&JobId::new("job-1"), Some(&CategoryId::new("cat-9")))
        .await
        .unwrap();

    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].category_id, CategoryId::new("cat-9"));
}

#[tokio::test]
async fn query_responses_carry_provider_failures_as_data() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pipeline/queries/q-3/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responses": [
                {
                    "id": "r-1",
                    "queryId": "q-3",
                    "provider": "openai",
                    "model": "gpt-4o",
                    "content": "Acme comes up most often.",
                    "tokensUsed": 180,
                    "latencyMs": 950,
                    "createdAt": "2025-11-02T09:01:00Z"
                },
                {
                    "id": "r-2",
                    "queryId": "q-3",
                    "provider": "anthropic",
                    "model": "claude-sonnet",
                    "content": "",
                    "errorMessage": "rate limited",
                    "createdAt": "2025-11-02T09:01:02Z"
                }
            ]
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let responses = api.query_responses(&QueryId::new("q-3")).await.unwrap();

    assert_eq!(responses.len(), 2);
    assert!(!responses[0].is_provider_failure());
    assert!(responses[1].is_provider_failure());
}

#[tokio::test]
async fn cancel_treats_2xx_ack_as_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pipeline/jobs/job-5/cancel"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "accepted": true })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    api.cancel_job(&JobId::new("job-5")).await.unwrap();
}

#[tokio::test]
async fn server_error_envelope_is_mapped_with_context() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pipeline/jobs/job-9/status"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header("x-request-id", "req-123")
                .set_body_json(json!({
                    "error": { "message": "executor unavailable", "code": "executor_down" }
                })),
        )
        .mount(&server)
        .await;

    let api = api_for(&server);
    let err = api.job_status(&JobId::new("job-9")).await.unwrap_err();

    assert!(err.is_retryable(), "5xx should be retryable, got {err:?}");
    assert_eq!(err.request_id(), Some("req-123"));
    let ctx = err.context().unwrap();
    assert_eq!(ctx.http_status, Some(500));
    assert_eq!(ctx.server_code.as_deref(), Some("executor_down"));
}

#[tokio::test]
async fn missing_job_maps_to_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pipeline/jobs/nope/status"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "job not found", "code": "job_not_found" }
        })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let err = api.job_status(&JobId::new("nope")).await.unwrap_err();

    assert!(matches!(err, ApiError::NotFound { .. }));
    assert!(!err.is_retryable());
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn malformed_body_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pipeline/jobs/job-2/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let err = api.job_status(&JobId::new("job-2")).await.unwrap_err();

    assert!(matches!(err, ApiError::MalformedResponse { .. }));
    assert!(!err.is_retryable());
}
