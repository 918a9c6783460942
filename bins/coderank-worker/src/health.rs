//! Liveness endpoint for orchestration probes.

use crate::registry::InFlightRegistry;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

async fn healthz(State(registry): State<Arc<InFlightRegistry>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "inFlight": registry.len(),
        "capacity": registry.capacity(),
    }))
}

pub fn router(registry: Arc<InFlightRegistry>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(registry)
}

/// Serve the health endpoint until the process exits.
pub async fn serve(addr: String, registry: Arc<InFlightRegistry>) {
    let app = router(registry);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind health endpoint");
            return;
        }
    };
    info!(addr = %addr, "health endpoint listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "health endpoint terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_in_flight_count() {
        let registry = Arc::new(InFlightRegistry::new(4));
        registry.try_admit("sub-1");
        let app = router(registry);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/healthz")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["inFlight"], 1);
        assert_eq!(body["capacity"], 4);
    }
}
