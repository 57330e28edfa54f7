//! HTTP exposition of the watchdog metrics.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::metrics::WatchdogMetrics;
use crate::NodeError;

pub fn router(metrics: Arc<WatchdogMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<WatchdogMetrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Serve `/metrics` and `/health` on `port` until shutdown is signalled.
pub async fn serve(
    port: u16,
    metrics: Arc<WatchdogMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), NodeError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics server listening");
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("metrics server shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_metrics_until_shutdown() {
        let metrics = Arc::new(WatchdogMetrics::new().unwrap());
        metrics.alerts_sent.inc();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = broadcast::channel::<()>(1);
        let server = tokio::spawn(async move {
            axum::serve(listener, router(metrics))
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await
        });

        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("whistle_alerts_sent_total 1"));
        let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(health.status().is_success());

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
