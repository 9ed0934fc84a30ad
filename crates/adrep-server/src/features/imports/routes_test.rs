//! Integration tests for import routes
//!
//! These tests drive the router with an in-memory sink.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use adrep_ingest::{ImportOrchestrator, IngestConfig, JobId, MemorySink};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::create_router;
    use crate::features::imports::imports_routes;

    const REPORT: &str = "App ID,App Name,Domain,Ad Unit,Ad Unit ID,Inventory Format,OS Version,OS,Country,Country ID,Date,Impressions,Clicks,Payout\n\
        app-1,Example App,example.com,Banner Top,au-1,Banner,14.2,Android,Germany,2276,2024-01-31,100,7,1.25\n";

    fn orchestrator() -> ImportOrchestrator {
        ImportOrchestrator::new(IngestConfig::default(), Arc::new(MemorySink::new()))
    }

    /// Helper to create a test router
    fn create_test_router(orchestrator: ImportOrchestrator) -> Router {
        imports_routes(1024 * 1024).with_state(orchestrator)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for_terminal(orchestrator: &ImportOrchestrator, job_id: JobId) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match orchestrator.job_status(job_id) {
                    Some(status) if status.is_terminal() => return,
                    _ => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
        .await
        .expect("job did not finish in time");
    }

    fn upload(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "text/csv")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_job_id() {
        let orchestrator = orchestrator();
        let app = create_test_router(orchestrator.clone());

        let response = app
            .oneshot(upload("/?filename=report.csv", REPORT))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["filename"], "report.csv");
        let job_id = body["job_id"].as_u64().unwrap();

        wait_for_terminal(&orchestrator, job_id).await;
        assert_eq!(
            orchestrator.status(job_id),
            "COMPLETED: Processed 1 records, 0 errors."
        );
    }

    #[tokio::test]
    async fn test_submit_without_filename_uses_default() {
        let app = create_test_router(orchestrator());

        let response = app.oneshot(upload("/", REPORT)).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["filename"], "upload.csv");
    }

    #[tokio::test]
    async fn test_submit_empty_body_is_bad_request() {
        let app = create_test_router(orchestrator());

        let response = app.oneshot(upload("/", "")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["status"], 400);
    }

    #[tokio::test]
    async fn test_submit_over_limit_is_rejected() {
        let app = imports_routes(16).with_state(orchestrator());

        let response = app.oneshot(upload("/", REPORT)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_status_of_completed_job() {
        let orchestrator = orchestrator();
        let job_id = orchestrator.submit(REPORT.as_bytes(), "report.csv").unwrap();
        wait_for_terminal(&orchestrator, job_id).await;

        let response = create_test_router(orchestrator)
            .oneshot(get(&format!("/{}/status", job_id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "COMPLETED: Processed 1 records, 0 errors.");
    }

    #[tokio::test]
    async fn test_status_unknown_job_not_found() {
        let app = create_test_router(orchestrator());

        let response = app.oneshot(get("/999/status")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_progress_of_completed_job() {
        let orchestrator = orchestrator();
        let job_id = orchestrator.submit(REPORT.as_bytes(), "report.csv").unwrap();
        wait_for_terminal(&orchestrator, job_id).await;

        let response = create_test_router(orchestrator)
            .oneshot(get(&format!("/{}/progress", job_id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["currentPhase"], "COMPLETED");
        assert_eq!(body["progressPercentage"], 100);
        assert_eq!(body["totalRecords"], 1);
        assert_eq!(body["savedRecords"], 1);
    }

    #[tokio::test]
    async fn test_progress_unknown_job_not_found() {
        let app = create_test_router(orchestrator());

        let response = app.oneshot(get("/999/progress")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_progress_of_failed_job_is_server_error() {
        let orchestrator = orchestrator();
        let job_id = orchestrator
            .submit("App ID,Date\napp-1,2024-01-31\n".as_bytes(), "broken.csv")
            .unwrap();
        wait_for_terminal(&orchestrator, job_id).await;

        let response = create_test_router(orchestrator)
            .oneshot(get(&format!("/{}/progress", job_id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], true);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("FAILED: CSV header mismatch"));
        assert_eq!(body["progress"]["currentPhase"], "FAILED");
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_not_found() {
        let app = create_test_router(orchestrator());

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_job_id_is_client_error() {
        let app = create_test_router(orchestrator());

        let response = app.oneshot(get("/not-a-number/status")).await.unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_health_and_nested_routes() {
        let orchestrator = orchestrator();
        let app = create_router(orchestrator, &Config::default());

        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["running_imports"], 0);

        let response = app.oneshot(get("/api/v1/imports/42/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
