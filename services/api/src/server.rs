use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryFormulaCatalog, InMemorySectionStore};
use crate::routes::with_scoring_routes;
use accreditation_score::config::AppConfig;
use accreditation_score::error::AppError;
use accreditation_score::scoring::ScoringService;
use accreditation_score::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

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

    let store = Arc::new(InMemorySectionStore::default());
    let catalog = Arc::new(InMemoryFormulaCatalog::seeded());
    let scoring = Arc::new(ScoringService::new(store.clone(), catalog, config.scoring));

    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        store,
        scoring: scoring.clone(),
    };

    let app = with_scoring_routes(scoring)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        throttle_ms = config.scoring.throttle.as_millis() as u64,
        "accreditation scoring service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
