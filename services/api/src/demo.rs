use crate::infra::save_snapshot;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use clap::Args;
use exam_engine::config::EngineConfig;
use exam_engine::error::AppError;
use exam_engine::exams::{
    AnswerLog, CategoryId, CategoryResultKey, CategorySubmission, Course, CourseId,
    DeclaredResult, Exam, ExamCategoryConfig, ExamId, ExamLifecycleService, ExamStatus,
    FixedClock, InMemoryAuditLog, InMemoryExamRepository, NewStudent, OptionKey, Principal,
    QuestionDefinition, QuestionKey,
};
use std::path::PathBuf;
use std::sync::Arc;

type DemoService = ExamLifecycleService<InMemoryExamRepository, InMemoryAuditLog>;

const DEMO_COURSE: CourseId = CourseId(1);
const DEMO_CATEGORY: CategoryId = CategoryId(1);

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Evaluation instant (RFC 3339). Defaults to the current time.
    #[arg(long, value_parser = crate::infra::parse_instant)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Write the seeded store to this path once the walkthrough finishes.
    #[arg(long)]
    pub(crate) write_snapshot: Option<PathBuf>,
}

/// Seed an in-memory store and walk through scoring, reconciliation, classification, and the
/// overdue sweep.
pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let now = args.now.unwrap_or_else(Utc::now);
    let repository = Arc::new(InMemoryExamRepository::new());
    let audit = Arc::new(InMemoryAuditLog::default());
    let service = ExamLifecycleService::new(
        repository.clone(),
        audit.clone(),
        Arc::new(FixedClock::new(now)),
        EngineConfig::default(),
    );

    repository.add_course(Course {
        id: DEMO_COURSE,
        name: "Office Applications".to_string(),
    });

    println!("Exam lifecycle demo (as of {})", now.to_rfc3339());

    // Exam 1: three students, two declared, one left open.
    let mixed = seed_exam(&repository, 1, now);
    let mut keys = Vec::new();
    for (name, correct, wrong) in [("Amara", 7, 1), ("Bruno", 3, 4), ("Chen", 9, 0)] {
        keys.push(enroll_and_submit(&service, mixed, name, correct, wrong)?);
    }
    service.declare_result(&keys[0], DeclaredResult::Passed, registrar())?;
    service.declare_result(&keys[1], DeclaredResult::Failed, registrar())?;

    let scored = service.get_category_result(&keys[0])?;
    println!(
        "\nCategory scoring: {} answered | {} skipped | {}/{} points | {:.2}%",
        scored.answered_questions,
        scored.skipped_questions,
        scored.points_earned,
        scored.total_points,
        scored.percentage
    );

    // Exam 2: one student whose pass was declared as a failure.
    let disputed = seed_exam(&repository, 2, now);
    let key = enroll_and_submit(&service, disputed, "Dalia", 6, 2)?;
    service.declare_result(&key, DeclaredResult::Failed, registrar())?;
    let report = service.recompute_result(&key)?;
    println!("\nReconciliation for {}", report.key);
    match &report.anomaly {
        Some(anomaly) => println!("  - mismatch: {}", anomaly.summary()),
        None => println!("  - stored declaration agrees with the computed result"),
    }
    let corrected = service.correct_result(&key, Principal("chief-examiner".to_string()), true)?;
    println!(
        "  - after correction: declared {}",
        corrected
            .recomputed
            .declared_result
            .map(DeclaredResult::label)
            .unwrap_or("nothing")
    );

    // Exam 3: nobody enrolled. Exam 4: references a course that no longer exists.
    seed_exam(&repository, 3, now);
    let orphan = seed_exam(&repository, 4, now);
    if let Some(mut exam) = repository.exams().into_iter().find(|exam| exam.id == orphan) {
        exam.course_id = CourseId(99);
        repository.add_exam(exam);
    }

    let summary = service.evaluate_overdue_exams()?;
    println!(
        "\nOverdue sweep: {} considered | {} updated | {} failed",
        summary.considered_count, summary.updated_count, summary.failed_count
    );
    for failure in &summary.failures {
        println!("  - {} failed: {}", failure.external_id, failure.error);
    }

    println!("\nExam statuses");
    for exam in repository.exams() {
        let view = service.get_exam_status(&exam.id);
        match view {
            Ok(view) => println!(
                "  - {}: {} ({}/{} completed){}",
                view.external_id,
                view.status,
                view.completion.completed,
                view.completion.total,
                view.status_reason
                    .as_deref()
                    .map(|reason| format!(" - {reason}"))
                    .unwrap_or_default()
            ),
            Err(err) => println!("  - {}: {} ({err})", exam.external_id, exam.status),
        }
    }
    println!("\n{} audit entries recorded", audit.entries().len());

    if let Some(path) = args.write_snapshot.as_deref() {
        save_snapshot(path, &repository)?;
        println!("Snapshot written to {}", path.display());
    }

    Ok(())
}

fn registrar() -> Principal {
    Principal("registrar".to_string())
}

/// Schedules a ten-question category on the day before `now`.
fn seed_exam(repository: &InMemoryExamRepository, id: u64, now: DateTime<Utc>) -> ExamId {
    let exam_id = ExamId(id);
    let day = (now - Duration::days(1)).date_naive();
    repository.add_exam(Exam {
        id: exam_id,
        external_id: format!("DEMO-{id:03}"),
        course_id: DEMO_COURSE,
        center_id: None,
        scheduled_date: day,
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default(),
        status: ExamStatus::Scheduled,
        status_reason: None,
        status_changed_at: None,
    });
    let questions = (1..=10)
        .map(|index| QuestionDefinition {
            key: QuestionKey(format!("q{index:02}")),
            correct_option: OptionKey("B".to_string()),
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
            category_id: DEMO_CATEGORY,
            total_points: 20,
            passing_points: 12,
        },
        questions,
    );
    exam_id
}

fn enroll_and_submit(
    service: &DemoService,
    exam_id: ExamId,
    name: &str,
    correct: usize,
    wrong: usize,
) -> Result<CategoryResultKey, AppError> {
    let student = service.register_student(NewStudent {
        center_id: None,
        name: name.to_string(),
    })?;
    let enrollment = service.enroll_student(&exam_id, &student.id)?;
    println!(
        "Enrolled {} ({}) in exam {} with access id {}",
        student.name, student.registration_number, exam_id, enrollment.access_id
    );

    let answers: AnswerLog = (1..=correct + wrong)
        .map(|index| {
            let choice = if index <= correct { "B" } else { "D" };
            (
                QuestionKey(format!("q{index:02}")),
                OptionKey(choice.to_string()),
            )
        })
        .collect();
    let result = service.submit_category_result(CategorySubmission {
        exam_id,
        student_id: student.id,
        category_id: DEMO_CATEGORY,
        answers,
    })?;
    Ok(result.key())
}
