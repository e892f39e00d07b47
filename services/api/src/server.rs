use crate::cli::ServeArgs;
use crate::infra::{load_records, AppState, InMemoryRequestStore, StaticIdentity};
use crate::routes::with_request_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use booking_desk::config::AppConfig;
use booking_desk::error::AppError;
use booking_desk::requests::{RequestDesk, TracingAlerts};
use booking_desk::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(dwell_secs) = args.dwell_secs.take() {
        config.lifecycle.dwell = Duration::from_secs(dwell_secs);
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = match args.seed.take() {
        Some(path) => {
            let records = load_records(&path)?;
            info!(path = %path.display(), records = records.len(), "seeded request store");
            InMemoryRequestStore::with_records(records)
        }
        None => InMemoryRequestStore::default(),
    };

    let desk = Arc::new(RequestDesk::new(
        Arc::new(store),
        Arc::new(StaticIdentity(args.user.take())),
        Arc::new(TracingAlerts),
        &config.lifecycle,
    ));

    let app = with_request_routes(Arc::clone(&desk))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        dwell_secs = config.lifecycle.dwell.as_secs(),
        "booking desk ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    readiness_flag.store(false, Ordering::Release);
    let cancelled = desk.scheduler().shutdown();
    info!(cancelled, "pending status transitions cancelled");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
