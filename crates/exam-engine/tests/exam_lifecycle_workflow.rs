//! Integration tests for the exam lifecycle: registration through classification.
//!
//! Scenarios drive the public service facade and HTTP router against the in-memory store, so
//! scoring, reconciliation, and the overdue sweep are validated without private modules.

mod common {
    use std::sync::Arc;

    use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

    use exam_engine::config::EngineConfig;
    use exam_engine::exams::{
        AnswerLog, CategoryId, Course, CourseId, Exam, ExamCategoryConfig, ExamId,
        ExamLifecycleService, ExamStatus, FixedClock, InMemoryAuditLog, OptionKey,
        QuestionDefinition, QuestionKey,
    };

    pub(super) use exam_engine::exams::InMemoryExamRepository as Repository;

    pub(super) const CATEGORY: CategoryId = CategoryId(3);

    pub(super) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 18, 17, 0, 0).unwrap()
    }

    pub(super) fn exam(id: u64, course: u64) -> Exam {
        Exam {
            id: ExamId(id),
            external_id: format!("SPRING-{id}"),
            course_id: CourseId(course),
            center_id: None,
            scheduled_date: NaiveDate::from_ymd_opt(2026, 5, 18).expect("valid date"),
            start_time: NaiveTime::from_hms_opt(13, 0, 0).expect("valid time"),
            end_time: NaiveTime::from_hms_opt(15, 0, 0).expect("valid time"),
            status: ExamStatus::Scheduled,
            status_reason: None,
            status_changed_at: None,
        }
    }

    pub(super) fn answer(log: &mut AnswerLog, question: usize, choice: &str) {
        log.insert(
            QuestionKey(format!("q{question}")),
            OptionKey(choice.to_string()),
        );
    }

    pub(super) fn seed_exam(repository: &Repository, id: u64) -> ExamId {
        let exam = exam(id, 1);
        let exam_id = exam.id;
        repository.add_exam(exam);
        let questions = (1..=10)
            .map(|index| QuestionDefinition {
                key: QuestionKey(format!("q{index}")),
                correct_option: OptionKey("C".to_string()),
                points: 2,
                options: ["A", "B", "C", "D"]
                    .iter()
                    .map(|option| OptionKey(option.to_string()))
                    .collect(),
            })
            .collect();
        repository.add_category(
            ExamCategoryConfig {
                exam_id,
                category_id: CATEGORY,
                total_points: 20,
                passing_points: 12,
            },
            questions,
        );
        exam_id
    }

    pub(super) fn build_service() -> (
        ExamLifecycleService<Repository, InMemoryAuditLog>,
        Arc<Repository>,
        Arc<InMemoryAuditLog>,
    ) {
        let repository = Arc::new(Repository::new());
        repository.add_course(Course {
            id: CourseId(1),
            name: "Bookkeeping Basics".to_string(),
        });
        let audit = Arc::new(InMemoryAuditLog::default());
        let service = ExamLifecycleService::new(
            repository.clone(),
            audit.clone(),
            Arc::new(FixedClock::new(now())),
            EngineConfig::default(),
        );
        (service, repository, audit)
    }
}

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use exam_engine::exams::{
    exam_router, AnswerLog, CategoryResultKey, CategorySubmission, DeclaredResult,
    ExamRepository, ExamStatus, NewStudent, Principal,
};
use serde_json::Value;
use tower::ServiceExt;

use common::*;

#[test]
fn full_lifecycle_from_registration_to_sweep() {
    let (service, repository, audit) = build_service();
    let exam_id = seed_exam(&repository, 10);
    let orphan = common::exam(11, 77);
    repository.add_exam(orphan);

    let mut declared = Vec::new();
    for (name, correct) in [("Ada", 6), ("Bea", 4), ("Cam", 9)] {
        let student = service
            .register_student(NewStudent {
                center_id: None,
                name: name.to_string(),
            })
            .expect("registers");
        service
            .enroll_student(&exam_id, &student.id)
            .expect("enrolls");

        let mut answers = AnswerLog::new();
        for question in 1..=correct {
            answer(&mut answers, question, "C");
        }
        answer(&mut answers, correct + 1, "A");
        let result = service
            .submit_category_result(CategorySubmission {
                exam_id,
                student_id: student.id,
                category_id: CATEGORY,
                answers,
            })
            .expect("submits");
        declared.push(result.key());
    }

    // Ada and Bea are declared, Cam is not yet.
    service
        .declare_result(&declared[0], DeclaredResult::Passed, Principal("desk".into()))
        .expect("declares");
    service
        .declare_result(&declared[1], DeclaredResult::Failed, Principal("desk".into()))
        .expect("declares");

    let summary = service.evaluate_overdue_exams().expect("sweep runs");
    assert_eq!(summary.considered_count, 2);
    assert_eq!(summary.updated_count, 1);
    assert_eq!(summary.failed_count, 1);

    let exam = repository
        .fetch_exam(&exam_id)
        .expect("query")
        .expect("exam exists");
    assert_eq!(exam.status, ExamStatus::PartialCompleted);
    assert_eq!(audit.events("overdue_sweep_completed").len(), 1);

    let report = service.integrity_report(&exam_id).expect("report");
    assert_eq!(report.checked, 3);
    assert!(report.anomalies.is_empty());
}

#[test]
fn erroneous_failure_declaration_is_reported_then_corrected() {
    let (service, repository, _) = build_service();
    let exam_id = seed_exam(&repository, 20);
    let student = service
        .register_student(NewStudent {
            center_id: None,
            name: "Dev".to_string(),
        })
        .expect("registers");
    service
        .enroll_student(&exam_id, &student.id)
        .expect("enrolls");

    let mut answers = AnswerLog::new();
    for question in 1..=6 {
        answer(&mut answers, question, "C");
    }
    answer(&mut answers, 7, "A");
    answer(&mut answers, 8, "B");
    let result = service
        .submit_category_result(CategorySubmission {
            exam_id,
            student_id: student.id,
            category_id: CATEGORY,
            answers,
        })
        .expect("submits");
    assert_eq!(result.points_earned, 12);
    assert_eq!(result.percentage, 60.0);

    let key = CategoryResultKey {
        exam_id,
        student_id: student.id,
        category_id: CATEGORY,
    };
    service
        .declare_result(&key, DeclaredResult::Failed, Principal("desk".into()))
        .expect("declares");

    let report = service.recompute_result(&key).expect("recomputes");
    assert_eq!(report.computed, DeclaredResult::Passed);
    assert!(report.anomaly.is_some());
    assert_eq!(
        service
            .get_category_result(&key)
            .expect("stored")
            .declared_result,
        Some(DeclaredResult::Failed)
    );

    service
        .correct_result(&key, Principal("chief".into()), true)
        .expect("corrects");
    assert_eq!(
        service
            .get_category_result(&key)
            .expect("stored")
            .declared_result,
        Some(DeclaredResult::Passed)
    );
}

#[tokio::test]
async fn status_route_reports_completion_tally() {
    let (service, repository, _) = build_service();
    let exam_id = seed_exam(&repository, 30);
    let student = service
        .register_student(NewStudent {
            center_id: None,
            name: "Eli".to_string(),
        })
        .expect("registers");
    service
        .enroll_student(&exam_id, &student.id)
        .expect("enrolls");
    let router = exam_router(Arc::new(service));

    let response = router
        .oneshot(
            Request::get(format!("/api/v1/exams/{exam_id}/status"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let view: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(view["status"], "scheduled");
    assert_eq!(view["completion"]["completed"], 0);
    assert_eq!(view["completion"]["total"], 1);
    assert_eq!(view["ends_at"], "2026-05-18T15:00:00Z");
}
