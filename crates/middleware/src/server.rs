//! Liveness, readiness and Prometheus scrape endpoints for the pipeline services

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerLink {
    Up,
    Down,
}

/// Body of `/health` and `/ready`
#[derive(Serialize)]
pub struct StatusReport {
    pub service: String,
    /// Records can flow through this process
    pub ready: bool,
    pub broker: BrokerLink,
}

/// Which service is reporting, and its broker link flag
#[derive(Clone)]
pub struct ServiceStatus {
    pub service: String,
    /// Set by the publisher or consumer as its broker connection comes and goes
    pub broker_link: Arc<AtomicBool>,
}

impl ServiceStatus {
    pub fn new(service: impl Into<String>, broker_link: Arc<AtomicBool>) -> Self {
        Self {
            service: service.into(),
            broker_link,
        }
    }

    fn report(&self) -> StatusReport {
        let up = self.broker_link.load(Ordering::SeqCst);
        StatusReport {
            service: self.service.clone(),
            ready: up,
            broker: if up { BrokerLink::Up } else { BrokerLink::Down },
        }
    }
}

/// The process is running; broker state is informational
async fn liveness(State(status): State<ServiceStatus>) -> Json<StatusReport> {
    Json(status.report())
}

/// 503 while the broker link is down
async fn readiness(State(status): State<ServiceStatus>) -> (StatusCode, Json<StatusReport>) {
    let report = status.report();
    let code = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Encode the default registry in Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))
}

async fn scrape() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, PROMETHEUS_TEXT)], body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

pub fn status_router(status: ServiceStatus) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .route("/metrics", get(scrape))
        .with_state(status)
}

/// Bind `addr` and serve the status endpoints until the task is dropped
pub async fn serve_status(addr: SocketAddr, status: ServiceStatus) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, status_router(status)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn status(up: bool) -> ServiceStatus {
        ServiceStatus::new("seis-consumer", Arc::new(AtomicBool::new(up)))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_alive_without_broker() {
        let (code, body) = get_json(status_router(status(false)), "/health").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["service"], "seis-consumer");
        assert_eq!(body["broker"], "down");
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_ready_tracks_broker_link() {
        let status = status(true);
        let link = Arc::clone(&status.broker_link);

        let (code, body) = get_json(status_router(status.clone()), "/ready").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["broker"], "up");

        link.store(false, Ordering::SeqCst);
        let (code, body) = get_json(status_router(status), "/ready").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_scrape_serves_registered_counters() {
        let counter = prometheus::register_int_counter!(
            "seis_middleware_scrape_total",
            "Counter registered for the scrape endpoint"
        )
        .unwrap();
        counter.inc();

        let response = status_router(status(true))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROMETHEUS_TEXT
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("seis_middleware_scrape_total 1"));
    }
}
