use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    CategoryId, CategoryResultKey, Course, CourseId, Exam, ExamCategoryConfig, ExamCategoryResult,
    ExamEnrollment, ExamId, ExamStatus, QuestionDefinition, Student, StudentId,
};
use super::repository::{
    AuditEntry, AuditError, AuditSink, ExamRepository, IdentifierScope, RepositoryError,
    UniqueConstraint,
};

/// Question definitions of one exam category, in presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryQuestions {
    pub exam_id: ExamId,
    pub category_id: CategoryId,
    pub questions: Vec<QuestionDefinition>,
}

/// Serializable image of the whole store, used for fixtures and the `sweep` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamSnapshot {
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub exams: Vec<Exam>,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub enrollments: Vec<ExamEnrollment>,
    #[serde(default)]
    pub category_configs: Vec<ExamCategoryConfig>,
    #[serde(default)]
    pub questions: Vec<CategoryQuestions>,
    #[serde(default)]
    pub results: Vec<ExamCategoryResult>,
}

#[derive(Debug, Default)]
struct StoreState {
    courses: BTreeMap<CourseId, Course>,
    exams: BTreeMap<ExamId, Exam>,
    students: BTreeMap<StudentId, Student>,
    enrollments: BTreeMap<(ExamId, StudentId), ExamEnrollment>,
    category_configs: BTreeMap<(ExamId, CategoryId), ExamCategoryConfig>,
    questions: HashMap<(ExamId, CategoryId), Vec<QuestionDefinition>>,
    results: BTreeMap<CategoryResultKey, ExamCategoryResult>,
    next_student_id: u64,
}

impl StoreState {
    fn registration_taken(&self, student: &Student) -> bool {
        self.students.values().any(|existing| {
            existing.center_id == student.center_id
                && existing.registration_number == student.registration_number
        })
    }

    fn add_student(&mut self, mut student: Student) -> Result<Student, RepositoryError> {
        if self.registration_taken(&student) {
            return Err(RepositoryError::Conflict(UniqueConstraint::RegistrationNumber));
        }
        if student.id.0 == 0 {
            self.next_student_id += 1;
            student.id = StudentId(self.next_student_id);
        } else {
            self.next_student_id = self.next_student_id.max(student.id.0);
        }
        self.students.insert(student.id, student.clone());
        Ok(student)
    }

    fn add_enrollment(&mut self, enrollment: ExamEnrollment) -> Result<(), RepositoryError> {
        let key = (enrollment.exam_id, enrollment.student_id);
        if self.enrollments.contains_key(&key) {
            return Err(RepositoryError::Conflict(UniqueConstraint::Enrollment));
        }
        if self
            .enrollments
            .values()
            .any(|existing| existing.access_id == enrollment.access_id)
        {
            return Err(RepositoryError::Conflict(UniqueConstraint::AccessId));
        }
        self.enrollments.insert(key, enrollment);
        Ok(())
    }

    fn add_result(&mut self, result: ExamCategoryResult) -> Result<(), RepositoryError> {
        let key = result.key();
        if self.results.contains_key(&key) {
            return Err(RepositoryError::Conflict(UniqueConstraint::CategoryResult));
        }
        self.mirror_answers(&result);
        self.results.insert(key, result);
        Ok(())
    }

    fn mirror_answers(&mut self, result: &ExamCategoryResult) {
        if let Some(enrollment) = self
            .enrollments
            .get_mut(&(result.exam_id, result.student_id))
        {
            enrollment
                .raw_answers
                .insert(result.category_id, result.raw_answer_log.clone());
        }
    }
}

/// Mutex-guarded store enforcing the same uniqueness constraints a relational schema would.
#[derive(Debug, Default, Clone)]
pub struct InMemoryExamRepository {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryExamRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store, rejecting snapshots that violate a uniqueness constraint.
    pub fn from_snapshot(snapshot: ExamSnapshot) -> Result<Self, RepositoryError> {
        let repository = Self::new();
        {
            let mut state = repository.lock();
            for course in snapshot.courses {
                state.courses.insert(course.id, course);
            }
            for exam in snapshot.exams {
                state.exams.insert(exam.id, exam);
            }
            for student in snapshot.students {
                state.add_student(student)?;
            }
            for enrollment in snapshot.enrollments {
                state.add_enrollment(enrollment)?;
            }
            for config in snapshot.category_configs {
                state
                    .category_configs
                    .insert((config.exam_id, config.category_id), config);
            }
            for category in snapshot.questions {
                state
                    .questions
                    .insert((category.exam_id, category.category_id), category.questions);
            }
            for result in snapshot.results {
                state.add_result(result)?;
            }
        }
        Ok(repository)
    }

    pub fn snapshot(&self) -> ExamSnapshot {
        let state = self.lock();
        let mut questions = state
            .questions
            .iter()
            .map(|((exam_id, category_id), questions)| CategoryQuestions {
                exam_id: *exam_id,
                category_id: *category_id,
                questions: questions.clone(),
            })
            .collect::<Vec<_>>();
        questions.sort_by_key(|category| (category.exam_id, category.category_id));

        ExamSnapshot {
            courses: state.courses.values().cloned().collect(),
            exams: state.exams.values().cloned().collect(),
            students: state.students.values().cloned().collect(),
            enrollments: state.enrollments.values().cloned().collect(),
            category_configs: state.category_configs.values().cloned().collect(),
            questions,
            results: state.results.values().cloned().collect(),
        }
    }

    pub fn add_course(&self, course: Course) {
        self.lock().courses.insert(course.id, course);
    }

    pub fn remove_course(&self, id: &CourseId) -> Option<Course> {
        self.lock().courses.remove(id)
    }

    /// Seed an exam as created by the scheduling layer.
    pub fn add_exam(&self, exam: Exam) {
        self.lock().exams.insert(exam.id, exam);
    }

    pub fn add_category(&self, config: ExamCategoryConfig, questions: Vec<QuestionDefinition>) {
        let key = (config.exam_id, config.category_id);
        let mut state = self.lock();
        state.category_configs.insert(key, config);
        state.questions.insert(key, questions);
    }

    pub fn exams(&self) -> Vec<Exam> {
        self.lock().exams.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("repository mutex poisoned")
    }
}

impl ExamRepository for InMemoryExamRepository {
    fn fetch_exam(&self, id: &ExamId) -> Result<Option<Exam>, RepositoryError> {
        Ok(self.lock().exams.get(id).cloned())
    }

    fn update_exam(&self, exam: &Exam) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let stored = state.exams.get_mut(&exam.id).ok_or(RepositoryError::NotFound)?;
        *stored = exam.clone();
        Ok(())
    }

    fn exams_ended_before(
        &self,
        status: ExamStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<Exam>, RepositoryError> {
        Ok(self
            .lock()
            .exams
            .values()
            .filter(|exam| exam.status == status && exam.is_overdue(before))
            .cloned()
            .collect())
    }

    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        Ok(self.lock().courses.get(id).cloned())
    }

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.lock().students.get(id).cloned())
    }

    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError> {
        self.lock().add_student(student)
    }

    fn identifier_exists(
        &self,
        scope: &IdentifierScope,
        value: &str,
    ) -> Result<bool, RepositoryError> {
        let state = self.lock();
        Ok(match scope {
            IdentifierScope::RegistrationNumber { center_id } => {
                state.students.values().any(|student| {
                    student.center_id == *center_id && student.registration_number == value
                })
            }
            IdentifierScope::ExamAccessId => state
                .enrollments
                .values()
                .any(|enrollment| enrollment.access_id == value),
        })
    }

    fn highest_identifier(
        &self,
        scope: &IdentifierScope,
    ) -> Result<Option<String>, RepositoryError> {
        let state = self.lock();
        // Shorter values sort first so "REG-10" outranks "REG-9".
        let highest = match scope {
            IdentifierScope::RegistrationNumber { center_id } => state
                .students
                .values()
                .filter(|student| student.center_id == *center_id)
                .map(|student| student.registration_number.as_str())
                .max_by_key(|value| (value.len(), *value)),
            IdentifierScope::ExamAccessId => state
                .enrollments
                .values()
                .map(|enrollment| enrollment.access_id.as_str())
                .max_by_key(|value| (value.len(), *value)),
        };
        Ok(highest.map(str::to_string))
    }

    fn fetch_enrollment(
        &self,
        exam_id: &ExamId,
        student_id: &StudentId,
    ) -> Result<Option<ExamEnrollment>, RepositoryError> {
        Ok(self
            .lock()
            .enrollments
            .get(&(*exam_id, *student_id))
            .cloned())
    }

    fn enrollments_for_exam(
        &self,
        exam_id: &ExamId,
    ) -> Result<Vec<ExamEnrollment>, RepositoryError> {
        Ok(self
            .lock()
            .enrollments
            .values()
            .filter(|enrollment| enrollment.exam_id == *exam_id)
            .cloned()
            .collect())
    }

    fn insert_enrollment(
        &self,
        enrollment: ExamEnrollment,
    ) -> Result<ExamEnrollment, RepositoryError> {
        self.lock().add_enrollment(enrollment.clone())?;
        Ok(enrollment)
    }

    fn category_config(
        &self,
        exam_id: &ExamId,
        category_id: &CategoryId,
    ) -> Result<Option<ExamCategoryConfig>, RepositoryError> {
        Ok(self
            .lock()
            .category_configs
            .get(&(*exam_id, *category_id))
            .cloned())
    }

    fn questions_for_category(
        &self,
        exam_id: &ExamId,
        category_id: &CategoryId,
    ) -> Result<Vec<QuestionDefinition>, RepositoryError> {
        Ok(self
            .lock()
            .questions
            .get(&(*exam_id, *category_id))
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_result(
        &self,
        key: &CategoryResultKey,
    ) -> Result<Option<ExamCategoryResult>, RepositoryError> {
        Ok(self.lock().results.get(key).cloned())
    }

    fn results_for_exam(
        &self,
        exam_id: &ExamId,
    ) -> Result<Vec<ExamCategoryResult>, RepositoryError> {
        Ok(self
            .lock()
            .results
            .values()
            .filter(|result| result.exam_id == *exam_id)
            .cloned()
            .collect())
    }

    fn insert_result(
        &self,
        result: ExamCategoryResult,
    ) -> Result<ExamCategoryResult, RepositoryError> {
        self.lock().add_result(result.clone())?;
        Ok(result)
    }

    fn update_result(
        &self,
        mut result: ExamCategoryResult,
        expected_version: u64,
    ) -> Result<ExamCategoryResult, RepositoryError> {
        let mut state = self.lock();
        let stored = state
            .results
            .get_mut(&result.key())
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::StaleVersion {
                expected: expected_version,
                found: stored.version,
            });
        }
        result.version = expected_version + 1;
        *stored = result.clone();
        state.mirror_answers(&result);
        Ok(result)
    }
}

/// Audit sink retaining entries in memory for inspection.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit mutex poisoned").clone()
    }

    pub fn events(&self, event: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.event == event)
            .collect()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .expect("audit mutex poisoned")
            .push(entry);
        Ok(())
    }
}
