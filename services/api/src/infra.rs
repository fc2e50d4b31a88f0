use chrono::{DateTime, Utc};
use exam_engine::config::EngineConfig;
use exam_engine::error::AppError;
use exam_engine::exams::{
    Clock, ExamLifecycleService, ExamSnapshot, InMemoryExamRepository, TracingAuditSink,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type EngineService = ExamLifecycleService<InMemoryExamRepository, TracingAuditSink>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn build_service(
    repository: Arc<InMemoryExamRepository>,
    clock: Arc<dyn Clock>,
    config: &EngineConfig,
) -> Arc<EngineService> {
    Arc::new(ExamLifecycleService::new(
        repository,
        Arc::new(TracingAuditSink),
        clock,
        config.clone(),
    ))
}

pub(crate) fn load_snapshot(path: &Path) -> Result<InMemoryExamRepository, AppError> {
    let raw = fs::read_to_string(path)?;
    let snapshot: ExamSnapshot = serde_json::from_str(&raw)?;
    Ok(InMemoryExamRepository::from_snapshot(snapshot)?)
}

pub(crate) fn save_snapshot(
    path: &Path,
    repository: &InMemoryExamRepository,
) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(&repository.snapshot())?;
    fs::write(path, json)?;
    Ok(())
}

pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}
