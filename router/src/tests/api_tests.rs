//! Tests for the REST API module
//!
//! These drive the full axum router the way producers and workers do over
//! the wire: concurrent submissions, long-polled retrievals, heartbeats and
//! result posts, including the disconnect behaviors (a dropped request
//! future is exactly what a closed client connection produces).

use crate::api::{create_router, AppState};
use crate::broker::Broker;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use shared::api::{endpoints, ClaimResponse};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

/// Helper function to create a test instance of the app's router.
/// Clones share the same broker, so concurrent requests observe one state.
fn create_test_app(heartbeat_timeout: Duration) -> axum::Router {
    let broker = Arc::new(Broker::new(heartbeat_timeout));
    create_router(AppState::new(broker))
}

fn post_task_run(task_type: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("{}?taskType={}", endpoints::TASK_RUN, task_type))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

/// Builds a task retrieval request; `query` carries the raw query string so
/// tests control repetition and omission of `taskType`.
fn get_task(query: &str, prefer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(format!("{}{}", endpoints::TASK_GET, query));
    if let Some(prefer) = prefer {
        builder = builder.header("Prefer", prefer);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_heartbeat(query: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("{}{}", endpoints::TASK_HEARTBEAT, query))
        .body(Body::empty())
        .unwrap()
}

fn post_result(task_id: &str, result: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("{}?taskId={}", endpoints::RESULT_SET, task_id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(result.to_string()))
        .unwrap()
}

async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn claim_task(app: &axum::Router, query: &str, prefer: &str) -> ClaimResponse {
    let response = app
        .clone()
        .oneshot(get_task(query, Some(prefer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_value(response_json(response).await).unwrap()
}

#[tokio::test]
async fn test_successful_task_round_trip() {
    let app = create_test_app(Duration::from_secs(60));

    let producer = tokio::spawn(
        app.clone()
            .oneshot(post_task_run("task-type-under-test", &json!([42, 1337]))),
    );
    // let the submission reach the pending queue
    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = claim_task(&app, "?taskType=task-type-under-test", "wait=10").await;
    assert_eq!(task.task_type, "task-type-under-test");
    assert_eq!(task.payload, json!([42, 1337]));

    let response = app
        .clone()
        .oneshot(post_result(&task.task_id, &json!(1379)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let producer_response = producer.await.unwrap().unwrap();
    assert_eq!(producer_response.status(), StatusCode::OK);
    assert_eq!(response_json(producer_response).await, json!(1379));
}

#[tokio::test]
async fn test_missed_heartbeat_reassigns_task() {
    let app = create_test_app(Duration::from_millis(200));

    let producer = tokio::spawn(
        app.clone()
            .oneshot(post_task_run("task-type-under-test", &json!([42, 1337]))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = claim_task(&app, "?taskType=task-type-under-test", "wait=10").await;

    // exceed the heartbeat timeout without heartbeating
    tokio::time::sleep(Duration::from_millis(600)).await;

    let second = claim_task(&app, "?taskType=task-type-under-test", "wait=10").await;
    assert_ne!(first.task_id, second.task_id);
    assert_eq!(second.payload, json!([42, 1337]));

    // the stale worker's result is rejected
    let response = app
        .clone()
        .oneshot(post_result(&first.task_id, &json!(0)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // the new worker's result reaches the producer
    let response = app
        .clone()
        .oneshot(post_result(&second.task_id, &json!(1379)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let producer_response = producer.await.unwrap().unwrap();
    assert_eq!(producer_response.status(), StatusCode::OK);
    assert_eq!(response_json(producer_response).await, json!(1379));
}

#[tokio::test]
async fn test_refreshing_heartbeats_keep_assignment() {
    let app = create_test_app(Duration::from_millis(300));

    let producer = tokio::spawn(
        app.clone()
            .oneshot(post_task_run("task-type-under-test", &json!([42, 1337]))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = claim_task(&app, "?taskType=task-type-under-test", "wait=10").await;

    // heartbeat three times inside the window, outliving the original deadline
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let response = app
            .clone()
            .oneshot(post_heartbeat(&format!("?taskId={}", task.task_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(post_result(&task.task_id, &json!(1379)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let producer_response = producer.await.unwrap().unwrap();
    assert_eq!(response_json(producer_response).await, json!(1379));
}

#[tokio::test]
async fn test_producer_disconnect_before_assignment() {
    let app = create_test_app(Duration::from_secs(60));

    let producer = tokio::spawn(
        app.clone()
            .oneshot(post_task_run("task-type-under-test", &json!(1))),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    // disconnect: the request future is dropped mid-wait
    producer.abort();
    assert!(producer.await.unwrap_err().is_cancelled());

    // the queue became empty, a later retrieval times out
    let response = app
        .clone()
        .oneshot(get_task("?taskType=task-type-under-test", Some("wait=1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_producer_disconnect_after_assignment() {
    let app = create_test_app(Duration::from_secs(60));

    let producer = tokio::spawn(
        app.clone()
            .oneshot(post_task_run("task-type-under-test", &json!(1))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = claim_task(&app, "?taskType=task-type-under-test", "wait=10").await;

    producer.abort();
    assert!(producer.await.unwrap_err().is_cancelled());

    // the assignment was discarded with the producer
    let response = app
        .clone()
        .oneshot(post_result(&task.task_id, &json!(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retrieval_honors_requested_type() {
    let app = create_test_app(Duration::from_secs(60));

    let producer_a = tokio::spawn(app.clone().oneshot(post_task_run("a", &json!(1))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let producer_b = tokio::spawn(app.clone().oneshot(post_task_run("b", &json!(2))));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // only type b is requested, the older type a task must not leak through
    let task = claim_task(&app, "?taskType=b", "wait=1").await;
    assert_eq!(task.task_type, "b");
    assert_eq!(task.payload, json!(2));

    let response = app
        .clone()
        .oneshot(post_result(&task.task_id, &json!(2)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(producer_b.await.unwrap().unwrap()).await,
        json!(2)
    );

    producer_a.abort();
    let _ = producer_a.await;
}

#[tokio::test]
async fn test_retrieval_prefers_first_listed_type() {
    let app = create_test_app(Duration::from_secs(60));

    let producer_b = tokio::spawn(app.clone().oneshot(post_task_run("b", &json!(2))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let producer_a = tokio::spawn(app.clone().oneshot(post_task_run("a", &json!(1))));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // both types have work; the first listed one wins regardless of age
    let task = claim_task(&app, "?taskType=a&taskType=b", "wait=1").await;
    assert_eq!(task.task_type, "a");
    assert_eq!(task.payload, json!(1));

    let response = app
        .clone()
        .oneshot(post_result(&task.task_id, &json!(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(producer_a.await.unwrap().unwrap()).await,
        json!(1)
    );

    let task = claim_task(&app, "?taskType=a&taskType=b", "wait=1").await;
    assert_eq!(task.task_type, "b");
    let response = app
        .clone()
        .oneshot(post_result(&task.task_id, &json!(2)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(producer_b.await.unwrap().unwrap()).await,
        json!(2)
    );
}

#[tokio::test]
async fn test_missing_task_type_on_run() {
    let app = create_test_app(Duration::from_secs(60));

    let request = Request::builder()
        .method(Method::POST)
        .uri(endpoints::TASK_RUN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("[1]"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_task_type_on_get() {
    let app = create_test_app(Duration::from_secs(60));

    let response = app
        .oneshot(get_task("", Some("wait=1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_prefer_header() {
    let app = create_test_app(Duration::from_secs(60));

    let response = app
        .oneshot(get_task("?taskType=task-type-under-test", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_prefer_header() {
    let app = create_test_app(Duration::from_secs(60));

    for prefer in ["wait=abc", "wait", ""] {
        let response = app
            .clone()
            .oneshot(get_task("?taskType=task-type-under-test", Some(prefer)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "Prefer: {prefer}");
    }
}

#[tokio::test]
async fn test_wait_budget_elapses_with_no_content() {
    let app = create_test_app(Duration::from_secs(60));

    let before_request = std::time::Instant::now();
    let response = app
        .oneshot(get_task("?taskType=task-type-under-test", Some("wait=1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let elapsed = before_request.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
}

#[tokio::test]
async fn test_missing_task_id_in_heartbeat() {
    let app = create_test_app(Duration::from_secs(60));

    let response = app.oneshot(post_heartbeat("")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_task_id_in_heartbeat() {
    let app = create_test_app(Duration::from_secs(60));

    let response = app
        .oneshot(post_heartbeat("?taskId=non-existing-task-id"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_task_id_in_result() {
    let app = create_test_app(Duration::from_secs(60));

    let request = Request::builder()
        .method(Method::POST)
        .uri(endpoints::RESULT_SET)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("1"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_task_id_in_result() {
    let app = create_test_app(Duration::from_secs(60));

    let response = app
        .oneshot(post_result("non-existing-task-id", &json!(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_worker_disconnect_during_long_poll_changes_nothing() {
    let app = create_test_app(Duration::from_secs(60));

    let worker = tokio::spawn(
        app.clone()
            .oneshot(get_task("?taskType=task-type-under-test", Some("wait=10"))),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    worker.abort();
    assert!(worker.await.unwrap_err().is_cancelled());

    // a task submitted afterwards is retrievable as usual
    let producer = tokio::spawn(
        app.clone()
            .oneshot(post_task_run("task-type-under-test", &json!(1))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = claim_task(&app, "?taskType=task-type-under-test", "wait=1").await;
    assert_eq!(task.payload, json!(1));

    let response = app
        .clone()
        .oneshot(post_result(&task.task_id, &json!(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(producer.await.unwrap().unwrap()).await,
        json!(1)
    );
}
