use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use batchgate::config::AppConfig;
use batchgate::context::AppContext;
use batchgate::engine::{JobDefinition, MemoryJobRepository};
use batchgate::store::LocalFileStore;
use batchgate::web::router;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "batchgate-test-boundary";

struct TestApp {
    router: Router,
    ctx: AppContext,
    repository: MemoryJobRepository,
    staging: TempDir,
}

fn test_app_with(config: AppConfig) -> TestApp {
    let staging = tempfile::tempdir().unwrap();
    let repository = MemoryJobRepository::new([
        JobDefinition::new("job1").with_steps(["step1", "step2"]),
        JobDefinition {
            incrementable: true,
            ..JobDefinition::new("job2")
        },
    ]);
    let ctx = AppContext::new(
        config,
        Arc::new(repository.clone()),
        Arc::new(LocalFileStore::new(staging.path())),
    );
    TestApp {
        router: router(ctx.clone()),
        ctx,
        repository,
        staging,
    }
}

fn test_app() -> TestApp {
    test_app_with(AppConfig::default())
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn put(uri: &str) -> Request<Body> {
    Request::builder().method("PUT").uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A multipart body with optional text fields followed by one file field.
fn multipart(uri: &str, fields: &[(&str, &str)], filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap()
}

async fn stage_three_files(app: &TestApp) {
    for path in ["foo.txt", "bar/foo.txt", "bar/baz.txt"] {
        app.ctx.files.create_file(path).await.unwrap();
    }
}

fn links(body: &Value) -> Vec<(String, String)> {
    body["links"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| {
            (
                l["rel"].as_str().unwrap().to_string(),
                l["href"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_files_are_listed_with_links() {
    let app = test_app();
    stage_three_files(&app).await;

    let (status, body) = send(&app, get("/files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalElements"], 3);
    assert_eq!(body["totalPages"], 1);
    assert_eq!(body["pageSize"], 20);

    let content = body["content"].as_array().unwrap();
    assert_eq!(content.len(), 3);
    assert_eq!(content[0]["path"], "bar/baz.txt");
    assert_eq!(content[0]["deleteCount"], 0);
    assert_eq!(links(&content[0]), vec![("self".to_string(), "/files/bar/baz.txt".to_string())]);
    assert_eq!(links(&body)[0], ("self".to_string(), "/files?page=0&size=20".to_string()));
}

#[tokio::test]
async fn test_files_are_paged() {
    let app = test_app();
    stage_three_files(&app).await;

    let (status, body) = send(&app, get("/files?page=1&size=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"].as_array().unwrap().len(), 1);
    assert_eq!(body["pageNumber"], 1);
    assert_eq!(body["totalPages"], 2);
    assert!(links(&body).iter().any(|(rel, href)| rel == "prev" && href == "/files?page=0&size=2"));
}

#[tokio::test]
async fn test_invalid_page_requests_are_rejected() {
    let app = test_app();
    let (status, body) = send(&app, get("/files?size=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "page.invalid");

    let (status, _) = send(&app, get("/executions?page=-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pattern_delete_reports_count() {
    let app = test_app();
    stage_three_files(&app).await;

    let (status, body) = send(&app, delete("/files/bar/*")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleteCount"], 2);

    let (_, body) = send(&app, delete("/files/*")).await;
    assert_eq!(body["deleteCount"], 1);

    let (_, body) = send(&app, delete("/files/*")).await;
    assert_eq!(body["deleteCount"], 0);

    let (_, body) = send(&app, get("/files")).await;
    assert_eq!(body["totalElements"], 0);
}

#[tokio::test]
async fn test_star_deletes_every_file() {
    let app = test_app();
    stage_three_files(&app).await;

    let (status, body) = send(&app, delete("/files/*")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleteCount"], 3);
}

#[tokio::test]
async fn test_upload_stores_and_publishes() {
    let app = test_app();
    let mut published = app.ctx.files.publisher().subscribe();

    let (status, body) = send(&app, multipart("/files?path=foo", &[], "bar.txt", b"hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "foo/bar.txt");
    assert_eq!(body["local"], true);

    let content = std::fs::read_to_string(app.staging.path().join("foo/bar.txt")).unwrap();
    assert_eq!(content, "hello");
    assert_eq!(published.recv().await.unwrap().path, "foo/bar.txt");
}

#[tokio::test]
async fn test_upload_path_can_precede_the_file_or_be_in_the_route() {
    let app = test_app();

    let (status, body) = send(&app, multipart("/files", &[("path", "inbox")], "a.csv", b"1,2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "inbox/a.csv");

    let (status, body) = send(&app, multipart("/files/daily/2024", &[], "b.csv", b"3,4")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "daily/2024/b.csv");
}

#[tokio::test]
async fn test_empty_upload_is_rejected_without_side_effects() {
    let app = test_app();
    let mut published = app.ctx.files.publisher().subscribe();

    let (status, body) = send(&app, multipart("/files?path=foo", &[], "bar.txt", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "file.upload.empty");
    assert!(body["message"].as_str().unwrap().contains("bar.txt"));

    let (_, body) = send(&app, get("/files")).await;
    assert_eq!(body["totalElements"], 0);
    assert!(!app.staging.path().join("foo").exists());
    assert!(published.try_recv().is_err());
}

#[tokio::test]
async fn test_upload_outside_the_staging_area_is_rejected() {
    let app = test_app();
    let (status, body) = send(&app, multipart("/files?path=../escape", &[], "x.txt", b"data")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "file.path.invalid");
}

#[tokio::test]
async fn test_launch_returns_running_execution() {
    let app = test_app();

    let (status, body) = send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["running"], true);
    assert_eq!(body["status"], "STARTED");
    assert!(body.get("exitStatus").is_none());

    let id = body["id"].as_i64().unwrap();
    assert_eq!(links(&body), vec![("self".to_string(), format!("/executions/{}", id))]);

    let (status, body) = send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "job.already.running");

    let (_, body) = send(&app, get("/executions?jobname=job1")).await;
    assert_eq!(body["totalElements"], 1);
}

#[tokio::test]
async fn test_launch_accepts_delimited_parameters() {
    let app = test_app();
    let (status, body) = send(
        &app,
        post_json(
            "/executions",
            json!({ "jobname": "job1", "jobparameters": "input=a.csv,mode=full", "parameters": { "mode": "delta" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["parameters"]["input"], "a.csv");
    assert_eq!(body["parameters"]["mode"], "delta");
}

#[tokio::test]
async fn test_unknown_resources_are_not_found() {
    let app = test_app();

    let (status, body) = send(&app, post_json("/executions", json!({ "jobname": "nope" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "job.not.found");

    let (status, body) = send(&app, get("/executions/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "job.execution.not.found");

    let (status, _) = send(&app, put("/executions/999?stop=true")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/executions/999/steps")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/configurations/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/instances/42")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_requests_get_error_bodies() {
    let app = test_app();

    let (status, body) = send(&app, post_json("/executions", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "request.invalid");
    assert!(body["message"].as_str().unwrap().contains("jobname"));

    let (status, body) = send(&app, get("/executions/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "request.invalid");

    let (status, body) = send(&app, get("/files?page=x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "request.invalid");

    let (status, body) = send(&app, put("/executions/abc?stop=true")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "request.invalid");

    let (_, body) = send(&app, get("/executions")).await;
    assert_eq!(body["totalElements"], 0);
}

#[tokio::test]
async fn test_stop_and_restart_an_execution() {
    let app = test_app();
    let (_, launched) = send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;
    let id = launched["id"].as_i64().unwrap();

    let (status, body) = send(&app, put(&format!("/executions/{}?stop=true", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "STOPPED");
    assert_eq!(body["exitStatus"]["code"], "STOPPED");

    // Stopping again is a no-op
    let (status, body) = send(&app, put(&format!("/executions/{}?stop=true", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "STOPPED");

    let (status, body) = send(&app, put(&format!("/executions/{}?restart=true", id))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["jobInstanceId"], launched["jobInstanceId"]);
    assert_ne!(body["id"], launched["id"]);

    let (status, _) = send(&app, put(&format!("/executions/{}", id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stop_all_reports_signalled_count() {
    let app = test_app();
    send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;
    send(&app, post_json("/executions", json!({ "jobname": "job2" }))).await;

    let (status, body) = send(&app, put("/executions?stop=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stoppedCount"], 2);

    let (_, body) = send(&app, put("/executions?stop=true")).await;
    assert_eq!(body["stoppedCount"], 0);
}

#[tokio::test]
async fn test_executions_are_filtered_by_job_and_instance() {
    let app = test_app();
    let (_, first) = send(&app, post_json("/executions", json!({ "jobname": "job2" }))).await;
    send(&app, put("/executions?stop=true")).await;
    send(&app, post_json("/executions", json!({ "jobname": "job2" }))).await;
    send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;

    let (_, body) = send(&app, get("/executions")).await;
    assert_eq!(body["totalElements"], 3);

    let (_, body) = send(&app, get("/executions?jobname=job2&size=1")).await;
    assert_eq!(body["totalElements"], 2);
    assert_eq!(body["totalPages"], 2);
    assert!(
        links(&body)
            .iter()
            .any(|(rel, href)| rel == "next" && href == "/executions?jobname=job2&page=1&size=1")
    );

    let (_, body) = send(&app, get("/executions?jobname=unknown")).await;
    assert_eq!(body["totalElements"], 0);

    let instance_id = first["jobInstanceId"].as_i64().unwrap();
    let (status, body) = send(&app, get(&format!("/executions?jobinstanceid={}", instance_id))).await;
    assert_eq!(status, StatusCode::OK);
    let executions = body.as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["id"], first["id"]);
}

#[tokio::test]
async fn test_jobs_and_instances_are_browsable() {
    let app = test_app();
    send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;

    let (status, body) = send(&app, get("/configurations")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalElements"], 2);
    let job1 = &body["content"][0];
    assert_eq!(job1["name"], "job1");
    assert_eq!(job1["executionCount"], 1);
    assert_eq!(job1["launchable"], true);
    assert_eq!(links(job1)[0].1, "/configurations/job1");

    let (status, body) = send(&app, get("/configurations/job1?startJobInstance=0&pageSize=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "job1");
    assert_eq!(body["jobInstances"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, get("/instances?jobname=job1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalElements"], 1);
    let instance_id = body["content"][0]["id"].as_i64().unwrap();
    assert_eq!(body["content"][0]["executions"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, get(&format!("/instances/{}", instance_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobName"], "job1");

    let (status, _) = send(&app, get("/instances")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_steps_and_progress() {
    let app = test_app();
    let (_, launched) = send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;
    let id = launched["id"].as_i64().unwrap();
    let step_id = app.repository.start_step(id, "step1").await.unwrap();
    app.repository.record_chunk(id, step_id, 10).await.unwrap();

    let (status, body) = send(&app, get(&format!("/executions/{}/steps", id))).await;
    assert_eq!(status, StatusCode::OK);
    let steps = body.as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["name"], "step1");
    assert_eq!(
        links(&steps[0])[0].1,
        format!("/executions/{}/steps/{}", id, step_id)
    );

    let (status, body) = send(&app, get(&format!("/executions/{}/steps/{}", id, step_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["readCount"], 10);

    let (status, body) = send(&app, get(&format!("/executions/{}/steps/{}/progress", id, step_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("percentComplete").is_none());
    assert!(body.get("estimatedDuration").is_none());
    assert_eq!(body["current"]["id"], step_id);
    assert_eq!(body["finished"], false);

    let (status, body) = send(&app, get(&format!("/executions/{}/steps/999", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "step.execution.not.found");
}

#[tokio::test]
async fn test_base_path_prefixes_routes_and_links() {
    let mut config = AppConfig::default();
    config.http.base_path = "/batch".to_string();
    let app = test_app_with(config);
    stage_three_files(&app).await;

    let (status, body) = send(&app, get("/batch/files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(links(&body)[0].1, "/batch/files?page=0&size=20");
    assert_eq!(links(&body["content"][2])[0].1, "/batch/files/foo.txt");

    let (status, _) = send(&app, get("/files")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_running_executions() {
    let app = test_app();
    send(&app, post_json("/executions", json!({ "jobname": "job1" }))).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["runningExecutions"], 1);
}
