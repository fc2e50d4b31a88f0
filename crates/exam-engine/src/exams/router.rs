use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    CategoryId, CategoryResultKey, DeclaredResult, ExamId, OptionKey, Principal, QuestionKey,
    StudentId,
};
use super::repository::{AuditSink, ExamRepository, RepositoryError};
use super::service::{CategorySubmission, ExamLifecycleService, ExamServiceError, NewStudent};
use super::sweeper::SweepError;

type Service<R, A> = Arc<ExamLifecycleService<R, A>>;

const RESULT_PATH: &str = "/api/v1/exams/:exam_id/students/:student_id/categories/:category_id";

/// Router exposing the engine's operations to request-handling layers.
pub fn exam_router<R, A>(service: Arc<ExamLifecycleService<R, A>>) -> Router
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    Router::new()
        .route("/api/v1/students", post(register_handler::<R, A>))
        .route("/api/v1/exams/sweep", post(sweep_handler::<R, A>))
        .route("/api/v1/exams/:exam_id/status", get(status_handler::<R, A>))
        .route(
            "/api/v1/exams/:exam_id/evaluate",
            post(evaluate_handler::<R, A>),
        )
        .route("/api/v1/exams/:exam_id/cancel", post(cancel_handler::<R, A>))
        .route(
            "/api/v1/exams/:exam_id/integrity",
            get(integrity_handler::<R, A>),
        )
        .route(
            "/api/v1/exams/:exam_id/enrollments",
            post(enroll_handler::<R, A>),
        )
        .route("/api/v1/results", post(submit_handler::<R, A>))
        .route(RESULT_PATH, get(result_handler::<R, A>))
        .route(
            &format!("{RESULT_PATH}/declaration"),
            post(declare_handler::<R, A>),
        )
        .route(
            &format!("{RESULT_PATH}/recompute"),
            get(recompute_handler::<R, A>),
        )
        .route(
            &format!("{RESULT_PATH}/correction"),
            post(correct_handler::<R, A>),
        )
        .route(
            &format!("{RESULT_PATH}/answers/:question_key"),
            put(edit_answer_handler::<R, A>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub struct EnrollmentRequest {
    pub student_id: StudentId,
}

#[derive(Debug, Deserialize)]
pub struct CancellationRequest {
    pub cancelled_by: String,
}

#[derive(Debug, Deserialize)]
pub struct DeclarationRequest {
    pub result: DeclaredResult,
    pub declared_by: String,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub corrected_by: String,
    #[serde(default)]
    pub realign_declaration: bool,
}

#[derive(Debug, Deserialize)]
pub struct AnswerEditRequest {
    /// `null` clears the answer.
    pub selection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultPath {
    pub exam_id: u64,
    pub student_id: u64,
    pub category_id: u64,
}

impl ResultPath {
    fn key(&self) -> CategoryResultKey {
        CategoryResultKey {
            exam_id: ExamId(self.exam_id),
            student_id: StudentId(self.student_id),
            category_id: CategoryId(self.category_id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnswerPath {
    pub exam_id: u64,
    pub student_id: u64,
    pub category_id: u64,
    pub question_key: String,
}

pub(crate) async fn register_handler<R, A>(
    State(service): State<Service<R, A>>,
    Json(request): Json<NewStudent>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    if request.name.trim().is_empty() {
        return unprocessable("student name must not be empty");
    }
    match service.register_student(request) {
        Ok(student) => (StatusCode::CREATED, Json(student)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn enroll_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(exam_id): Path<u64>,
    Json(request): Json<EnrollmentRequest>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.enroll_student(&ExamId(exam_id), &request.student_id) {
        Ok(enrollment) => (StatusCode::CREATED, Json(enrollment)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(exam_id): Path<u64>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.get_exam_status(&ExamId(exam_id)) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn evaluate_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(exam_id): Path<u64>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.evaluate_exam_status(&ExamId(exam_id)) {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cancel_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(exam_id): Path<u64>,
    Json(request): Json<CancellationRequest>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.cancel_exam(&ExamId(exam_id), Principal(request.cancelled_by)) {
        Ok(exam) => (StatusCode::OK, Json(exam)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn integrity_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(exam_id): Path<u64>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.integrity_report(&ExamId(exam_id)) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn sweep_handler<R, A>(State(service): State<Service<R, A>>) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    let outcome = tokio::task::spawn_blocking(move || service.evaluate_overdue_exams()).await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, "overdue sweep task failed");
            let payload = json!({
                "error": "overdue sweep task failed",
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
        }
    };
    match outcome {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(SweepError::Repository(RepositoryError::Unavailable(detail))) => {
            let payload = json!({
                "error": format!("repository unavailable: {detail}"),
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn submit_handler<R, A>(
    State(service): State<Service<R, A>>,
    Json(submission): Json<CategorySubmission>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.submit_category_result(submission) {
        Ok(result) => (StatusCode::CREATED, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn result_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(path): Path<ResultPath>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.get_category_result(&path.key()) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn declare_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(path): Path<ResultPath>,
    Json(request): Json<DeclarationRequest>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.declare_result(&path.key(), request.result, Principal(request.declared_by)) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn recompute_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(path): Path<ResultPath>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.recompute_result(&path.key()) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn correct_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(path): Path<ResultPath>,
    Json(request): Json<CorrectionRequest>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    match service.correct_result(
        &path.key(),
        Principal(request.corrected_by),
        request.realign_declaration,
    ) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn edit_answer_handler<R, A>(
    State(service): State<Service<R, A>>,
    Path(path): Path<AnswerPath>,
    Json(request): Json<AnswerEditRequest>,
) -> Response
where
    R: ExamRepository + 'static,
    A: AuditSink + 'static,
{
    let key = CategoryResultKey {
        exam_id: ExamId(path.exam_id),
        student_id: StudentId(path.student_id),
        category_id: CategoryId(path.category_id),
    };
    match service.edit_answer(
        &key,
        &QuestionKey(path.question_key),
        request.selection.map(OptionKey),
    ) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

fn unprocessable(message: &str) -> Response {
    let payload = json!({
        "error": message,
    });
    (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
}

pub(crate) fn error_status(err: &ExamServiceError) -> StatusCode {
    match err {
        ExamServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ExamServiceError::InvalidState(_) | ExamServiceError::ConcurrencyConflict(_) => {
            StatusCode::CONFLICT
        }
        ExamServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ExamServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        ExamServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ExamServiceError) -> Response {
    let status = error_status(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "exam request failed");
    }
    let payload = json!({
        "error": err.to_string(),
    });
    (status, Json(payload)).into_response()
}
