use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    clients::health::HealthChecker,
    config::Config,
    consumer::DeliveryLedger,
    models::{health::HealthStatus, record::NotificationRecord, response::ApiResponse},
};

pub struct AppState {
    pub ledger: Arc<dyn DeliveryLedger>,
    pub health_checker: HealthChecker,
}

pub async fn run_api_server(config: Config, state: Arc<AppState>) -> Result<(), Error> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status/{request_id}", get(notification_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Status server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn notification_status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    match state.ledger.fetch(&request_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                record,
                "Notification record found".to_string(),
            )),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<NotificationRecord>::error(
                "not_found".to_string(),
                format!("No notification record for request_id {}", request_id),
            )),
        ),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Status lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<NotificationRecord>::error(
                    "internal_error".to_string(),
                    "Failed to read notification record".to_string(),
                )),
            )
        }
    }
}
