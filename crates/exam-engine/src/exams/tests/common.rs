use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::config::EngineConfig;
use crate::exams::domain::{
    AnswerLog, CategoryId, CategoryResultKey, Course, CourseId, Exam, ExamCategoryConfig,
    ExamCategoryResult, ExamEnrollment, ExamId, ExamStatus, OptionKey, QuestionDefinition,
    QuestionKey, Student, StudentId,
};
use crate::exams::memory::{InMemoryAuditLog, InMemoryExamRepository};
use crate::exams::repository::{
    AuditEntry, AuditError, AuditSink, ExamRepository, IdentifierScope, RepositoryError,
};
use crate::exams::service::{CategorySubmission, ExamLifecycleService, NewStudent};
use crate::exams::FixedClock;

pub(super) const COURSE: CourseId = CourseId(1);
pub(super) const CATEGORY: CategoryId = CategoryId(1);

/// 2026-03-02 12:00 UTC, an hour after the fixture exams end.
pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

pub(super) fn exam(id: u64, status: ExamStatus) -> Exam {
    Exam {
        id: ExamId(id),
        external_id: format!("EX-2026-{id:03}"),
        course_id: COURSE,
        center_id: None,
        scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date"),
        start_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
        end_time: NaiveTime::from_hms_opt(11, 0, 0).expect("valid time"),
        status,
        status_reason: None,
        status_changed_at: None,
    }
}

pub(super) fn course() -> Course {
    Course {
        id: COURSE,
        name: "Computer Fundamentals".to_string(),
    }
}

/// Ten questions worth two points each, correct option `A`, twelve points to pass.
pub(super) fn category(exam_id: ExamId) -> (ExamCategoryConfig, Vec<QuestionDefinition>) {
    let questions = (1..=10)
        .map(|index| QuestionDefinition {
            key: question_key(index),
            correct_option: option("A"),
            points: 2,
            options: ["A", "B", "C", "D"].into_iter().map(option).collect(),
        })
        .collect();
    let config = ExamCategoryConfig {
        exam_id,
        category_id: CATEGORY,
        total_points: 20,
        passing_points: 12,
    };
    (config, questions)
}

pub(super) fn question_key(index: usize) -> QuestionKey {
    QuestionKey(format!("q-{index:02}"))
}

pub(super) fn option(key: &str) -> OptionKey {
    OptionKey(key.to_string())
}

/// First `correct` questions answered `A`, the next `wrong` answered `B`, the rest skipped.
pub(super) fn answers(correct: usize, wrong: usize) -> AnswerLog {
    let mut log = AnswerLog::new();
    for index in 1..=correct {
        log.insert(question_key(index), option("A"));
    }
    for index in correct + 1..=correct + wrong {
        log.insert(question_key(index), option("B"));
    }
    log
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        sweep_workers: 2,
        ..EngineConfig::default()
    }
}

pub(super) struct Fixture<R = InMemoryExamRepository> {
    pub(super) repository: Arc<R>,
    pub(super) store: InMemoryExamRepository,
    pub(super) audit: Arc<InMemoryAuditLog>,
    pub(super) clock: Arc<FixedClock>,
    pub(super) service: ExamLifecycleService<R, InMemoryAuditLog>,
}

pub(super) fn fixture() -> Fixture {
    let store = InMemoryExamRepository::new();
    store.add_course(course());
    build(Arc::new(store.clone()), store)
}

pub(super) fn scripted_fixture(script: Script) -> Fixture<ScriptedRepository> {
    let store = InMemoryExamRepository::new();
    store.add_course(course());
    let repository = Arc::new(ScriptedRepository::new(store.clone(), script));
    build(repository, store)
}

fn build<R>(repository: Arc<R>, store: InMemoryExamRepository) -> Fixture<R>
where
    R: ExamRepository + 'static,
{
    let audit = Arc::new(InMemoryAuditLog::default());
    let clock = Arc::new(FixedClock::new(now()));
    let service =
        ExamLifecycleService::new(repository.clone(), audit.clone(), clock.clone(), engine_config());
    Fixture {
        repository,
        store,
        audit,
        clock,
        service,
    }
}

impl<R> Fixture<R>
where
    R: ExamRepository + 'static,
{
    /// Seed a scheduled exam with the standard category.
    pub(super) fn scheduled_exam(&self, id: u64) -> ExamId {
        let exam = exam(id, ExamStatus::Scheduled);
        let exam_id = exam.id;
        self.store.add_exam(exam);
        let (config, questions) = category(exam_id);
        self.store.add_category(config, questions);
        exam_id
    }

    pub(super) fn enrolled_student(&self, exam_id: ExamId, name: &str) -> ExamEnrollment {
        let student = self
            .service
            .register_student(NewStudent {
                center_id: None,
                name: name.to_string(),
            })
            .expect("student registers");
        self.service
            .enroll_student(&exam_id, &student.id)
            .expect("student enrolls")
    }

    pub(super) fn submit(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        answers: AnswerLog,
    ) -> ExamCategoryResult {
        self.service
            .submit_category_result(CategorySubmission {
                exam_id,
                student_id,
                category_id: CATEGORY,
                answers,
            })
            .expect("submission accepted")
    }
}

pub(super) fn result_key(exam_id: ExamId, student_id: StudentId) -> CategoryResultKey {
    CategoryResultKey {
        exam_id,
        student_id,
        category_id: CATEGORY,
    }
}

/// Failure behaviors layered over an in-memory store.
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Script {
    /// Every call fails with `Unavailable`.
    pub(super) offline: bool,
    /// Existence checks always answer "free" and no highest value is known, so concurrent
    /// writers only discover collisions at insert time.
    pub(super) blind_identifiers: bool,
    /// Number of result writes that lose the race to a simulated concurrent writer.
    pub(super) stale_writes: u32,
}

pub(super) struct ScriptedRepository {
    inner: InMemoryExamRepository,
    script: Script,
    stale_remaining: AtomicU32,
}

impl ScriptedRepository {
    pub(super) fn new(inner: InMemoryExamRepository, script: Script) -> Self {
        Self {
            inner,
            stale_remaining: AtomicU32::new(script.stale_writes),
            script,
        }
    }

    fn online(&self) -> Result<(), RepositoryError> {
        if self.script.offline {
            Err(RepositoryError::Unavailable("database offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ExamRepository for ScriptedRepository {
    fn fetch_exam(&self, id: &ExamId) -> Result<Option<Exam>, RepositoryError> {
        self.online()?;
        self.inner.fetch_exam(id)
    }

    fn update_exam(&self, exam: &Exam) -> Result<(), RepositoryError> {
        self.online()?;
        self.inner.update_exam(exam)
    }

    fn exams_ended_before(
        &self,
        status: ExamStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Exam>, RepositoryError> {
        self.online()?;
        self.inner.exams_ended_before(status, before)
    }

    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        self.online()?;
        self.inner.fetch_course(id)
    }

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        self.online()?;
        self.inner.fetch_student(id)
    }

    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError> {
        self.online()?;
        self.inner.insert_student(student)
    }

    fn identifier_exists(
        &self,
        scope: &IdentifierScope,
        value: &str,
    ) -> Result<bool, RepositoryError> {
        self.online()?;
        if self.script.blind_identifiers {
            return Ok(false);
        }
        self.inner.identifier_exists(scope, value)
    }

    fn highest_identifier(
        &self,
        scope: &IdentifierScope,
    ) -> Result<Option<String>, RepositoryError> {
        self.online()?;
        if self.script.blind_identifiers {
            return Ok(None);
        }
        self.inner.highest_identifier(scope)
    }

    fn fetch_enrollment(
        &self,
        exam_id: &ExamId,
        student_id: &StudentId,
    ) -> Result<Option<ExamEnrollment>, RepositoryError> {
        self.online()?;
        self.inner.fetch_enrollment(exam_id, student_id)
    }

    fn enrollments_for_exam(
        &self,
        exam_id: &ExamId,
    ) -> Result<Vec<ExamEnrollment>, RepositoryError> {
        self.online()?;
        self.inner.enrollments_for_exam(exam_id)
    }

    fn insert_enrollment(
        &self,
        enrollment: ExamEnrollment,
    ) -> Result<ExamEnrollment, RepositoryError> {
        self.online()?;
        self.inner.insert_enrollment(enrollment)
    }

    fn category_config(
        &self,
        exam_id: &ExamId,
        category_id: &CategoryId,
    ) -> Result<Option<ExamCategoryConfig>, RepositoryError> {
        self.online()?;
        self.inner.category_config(exam_id, category_id)
    }

    fn questions_for_category(
        &self,
        exam_id: &ExamId,
        category_id: &CategoryId,
    ) -> Result<Vec<QuestionDefinition>, RepositoryError> {
        self.online()?;
        self.inner.questions_for_category(exam_id, category_id)
    }

    fn fetch_result(
        &self,
        key: &CategoryResultKey,
    ) -> Result<Option<ExamCategoryResult>, RepositoryError> {
        self.online()?;
        self.inner.fetch_result(key)
    }

    fn results_for_exam(
        &self,
        exam_id: &ExamId,
    ) -> Result<Vec<ExamCategoryResult>, RepositoryError> {
        self.online()?;
        self.inner.results_for_exam(exam_id)
    }

    fn insert_result(
        &self,
        result: ExamCategoryResult,
    ) -> Result<ExamCategoryResult, RepositoryError> {
        self.online()?;
        self.inner.insert_result(result)
    }

    fn update_result(
        &self,
        result: ExamCategoryResult,
        expected_version: u64,
    ) -> Result<ExamCategoryResult, RepositoryError> {
        self.online()?;
        let lose_race = self
            .stale_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if lose_race {
            // Another writer touches the row between our read and our write.
            if let Some(current) = self.inner.fetch_result(&result.key())? {
                let version = current.version;
                self.inner.update_result(current, version)?;
            }
        }
        self.inner.update_result(result, expected_version)
    }
}

/// Audit sink whose transport is down.
#[derive(Debug, Default)]
pub(super) struct OfflineAudit;

impl AuditSink for OfflineAudit {
    fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Err(AuditError::Transport("audit collector unreachable".to_string()))
    }
}
