use crate::infra::{build_service, load_snapshot, save_snapshot};
use chrono::{DateTime, Utc};
use clap::Args;
use exam_engine::config::AppConfig;
use exam_engine::error::AppError;
use exam_engine::exams::{Clock, FixedClock, SweepSummary, SystemClock};
use exam_engine::telemetry;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct SweepArgs {
    /// JSON store snapshot to evaluate; rewritten in place with the new statuses
    #[arg(long)]
    pub(crate) snapshot: PathBuf,
    /// Evaluate as of this RFC 3339 instant instead of the current time
    #[arg(long, value_parser = crate::infra::parse_instant)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Evaluate without writing the snapshot back
    #[arg(long)]
    pub(crate) dry_run: bool,
}

/// Per-exam failures are reported in the summary; only top-level failures return an error.
pub(crate) fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let repository = Arc::new(load_snapshot(&args.snapshot)?);
    let clock: Arc<dyn Clock> = match args.now {
        Some(instant) => Arc::new(FixedClock::new(instant)),
        None => Arc::new(SystemClock),
    };
    let service = build_service(repository.clone(), clock, &config.engine);

    let summary = service.evaluate_overdue_exams()?;
    if !args.dry_run {
        save_snapshot(&args.snapshot, &repository)?;
    }

    render_summary(&summary);
    Ok(())
}

fn render_summary(summary: &SweepSummary) {
    println!(
        "Overdue sweep at {}: {} considered | {} updated | {} failed",
        summary.started_at.to_rfc3339(),
        summary.considered_count,
        summary.updated_count,
        summary.failed_count
    );
    for failure in &summary.failures {
        println!(
            "  - exam {} ({}): {}",
            failure.exam_id, failure.external_id, failure.error
        );
    }
    for exam_id in &summary.unaudited {
        println!("  - exam {exam_id}: status written, audit entry lost");
    }
}
