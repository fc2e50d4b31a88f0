use super::common::*;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::exams::router::exam_router;

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn register_and_enroll_over_http() {
    let fixture = fixture();
    let exam_id = fixture.scheduled_exam(1);
    let router = exam_router(Arc::new(fixture.service));

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/students",
            json!({ "center_id": 12, "name": "Ana" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let student = body_json(response).await;
    assert_eq!(student["registration_number"], "REG012-00001");

    let enroll = json!({ "student_id": student["id"] });
    let uri = format!("/api/v1/exams/{exam_id}/enrollments");
    let response = router
        .clone()
        .oneshot(json_request("POST", &uri, enroll.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let duplicate = router
        .oneshot(json_request("POST", &uri, enroll))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    let payload = body_json(duplicate).await;
    assert!(payload["error"]
        .as_str()
        .unwrap()
        .contains("already enrolled"));
}

#[tokio::test]
async fn blank_student_names_are_unprocessable() {
    let fixture = fixture();
    let router = exam_router(Arc::new(fixture.service));

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/students",
            json!({ "name": "   " }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_exam_status_is_not_found() {
    let fixture = fixture();
    let router = exam_router(Arc::new(fixture.service));

    let response = router
        .oneshot(get("/api/v1/exams/41/status"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "exam 41 not found");
}

#[tokio::test]
async fn declaration_mismatch_is_reported_by_recompute() {
    let fixture = fixture();
    let exam_id = fixture.scheduled_exam(1);
    let enrollment = fixture.enrolled_student(exam_id, "Ana");
    fixture.submit(exam_id, enrollment.student_id, answers(6, 2));
    let router = exam_router(Arc::new(fixture.service));
    let base = format!(
        "/api/v1/exams/{exam_id}/students/{}/categories/{CATEGORY}",
        enrollment.student_id
    );

    let declared = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{base}/declaration"),
            json!({ "result": "failed", "declared_by": "registrar" }),
        ))
        .await
        .unwrap();
    assert_eq!(declared.status(), StatusCode::OK);
    assert_eq!(body_json(declared).await["declared_result"], "failed");

    let report = router
        .clone()
        .oneshot(get(&format!("{base}/recompute")))
        .await
        .unwrap();
    assert_eq!(report.status(), StatusCode::OK);
    let report = body_json(report).await;
    assert_eq!(report["computed"], "passed");
    assert_eq!(report["anomaly"]["declared"], "failed");

    let stored = router.oneshot(get(&base)).await.unwrap();
    assert_eq!(body_json(stored).await["declared_result"], "failed");
}

#[tokio::test]
async fn answer_edits_on_unsubmitted_categories_conflict() {
    let fixture = fixture();
    let exam_id = fixture.scheduled_exam(1);
    let enrollment = fixture.enrolled_student(exam_id, "Ana");
    let router = exam_router(Arc::new(fixture.service));

    let response = router
        .oneshot(json_request(
            "PUT",
            &format!(
                "/api/v1/exams/{exam_id}/students/{}/categories/{CATEGORY}/answers/q-01",
                enrollment.student_id
            ),
            json!({ "selection": "A" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn sweep_endpoint_returns_the_summary() {
    let fixture = fixture();
    fixture.scheduled_exam(1);
    fixture.scheduled_exam(2);
    let router = exam_router(Arc::new(fixture.service));

    let response = router
        .oneshot(json_request("POST", "/api/v1/exams/sweep", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["considered_count"], 2);
    assert_eq!(summary["updated_count"], 2);
    assert_eq!(summary["failed_count"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn sweep_runs_off_the_request_workers() {
    let fixture = fixture();
    for id in 1..=30 {
        fixture.scheduled_exam(id);
    }
    let router = exam_router(Arc::new(fixture.service));

    let (sweep, status) = tokio::join!(
        router
            .clone()
            .oneshot(json_request("POST", "/api/v1/exams/sweep", json!({}))),
        router.clone().oneshot(get("/api/v1/exams/1/status")),
    );

    let sweep = sweep.unwrap();
    assert_eq!(sweep.status(), StatusCode::OK);
    let summary = body_json(sweep).await;
    assert_eq!(summary["considered_count"], 30);
    assert_eq!(summary["updated_count"], 30);
    assert_eq!(summary["unaudited"], json!([]));
    assert_eq!(status.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn offline_store_maps_to_service_unavailable() {
    let fixture = scripted_fixture(Script {
        offline: true,
        ..Script::default()
    });
    let router = exam_router(Arc::new(fixture.service));

    let status = router
        .clone()
        .oneshot(get("/api/v1/exams/1/status"))
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::SERVICE_UNAVAILABLE);

    let sweep = router
        .oneshot(json_request("POST", "/api/v1/exams/sweep", json!({})))
        .await
        .unwrap();
    assert_eq!(sweep.status(), StatusCode::SERVICE_UNAVAILABLE);
}
