use crate::cli::ServeArgs;
use crate::infra::{build_service, load_snapshot, save_snapshot, AppState, EngineService};
use crate::routes::with_exam_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use exam_engine::config::AppConfig;
use exam_engine::error::AppError;
use exam_engine::exams::{InMemoryExamRepository, SystemClock};
use exam_engine::telemetry;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = match args.snapshot.as_deref() {
        Some(path) if path.exists() => Arc::new(load_snapshot(path)?),
        _ => Arc::new(InMemoryExamRepository::new()),
    };
    let service = build_service(repository.clone(), Arc::new(SystemClock), &config.engine);

    if let Some(secs) = config.engine.sweep_interval_secs.filter(|secs| *secs > 0) {
        spawn_scheduled_sweeps(
            service.clone(),
            repository.clone(),
            args.snapshot.clone(),
            Duration::from_secs(secs),
        );
    }

    let app = with_exam_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "exam lifecycle engine ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(path) = args.snapshot.as_deref() {
        save_snapshot(path, &repository)?;
        info!(path = %path.display(), "store snapshot written");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn spawn_scheduled_sweeps(
    service: Arc<EngineService>,
    repository: Arc<InMemoryExamRepository>,
    snapshot: Option<PathBuf>,
    period: Duration,
) {
    let sweeper = service.sweeper();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let run = sweeper.clone();
            match tokio::task::spawn_blocking(move || run.run()).await {
                Ok(Ok(summary)) if summary.updated_count > 0 => {
                    if let Some(path) = snapshot.as_deref() {
                        if let Err(err) = save_snapshot(path, &repository) {
                            warn!(error = %err, path = %path.display(), "failed to persist snapshot after sweep");
                        }
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!(error = %err, "scheduled overdue sweep failed"),
                Err(err) => error!(error = %err, "scheduled overdue sweep panicked"),
            }
        }
    });
}
