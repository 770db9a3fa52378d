//! Health check HTTP server
//!
//! - `GET /health` - 200 while the monitor is running with a connected broker, 503 otherwise
//! - `GET /metrics` - [`MetricsSnapshot`](super::metrics::MetricsSnapshot) as JSON
//! - `GET /live` - 200 while the process is up

use super::metrics::MonitorMetrics;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use warp::http::StatusCode;
use warp::Filter;

pub struct HealthServer {
    thing_name: String,
    port: u16,
    metrics: Arc<MonitorMetrics>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub thing_name: String,
    pub state: String,
    pub broker_connected: bool,
    pub queue_depth: u64,
    pub timestamp: u64,
}

impl HealthServer {
    pub fn new<S: Into<String>>(thing_name: S, port: u16, metrics: Arc<MonitorMetrics>) -> Self {
        Self {
            thing_name: thing_name.into(),
            port,
            metrics,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn health_status(&self) -> (StatusCode, HealthStatus) {
        let snapshot = self.metrics.snapshot();
        let healthy = self.metrics.is_healthy();
        let status = HealthStatus {
            status: if healthy { "healthy" } else { "unhealthy" },
            thing_name: self.thing_name.clone(),
            state: snapshot.state,
            broker_connected: snapshot.broker_connected,
            queue_depth: snapshot.queue_depth,
            timestamp: snapshot.timestamp,
        };
        let code = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (code, status)
    }

    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let (code, status) = server.health_status();
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&status),
                        code,
                    ))
                }
            });

        let metrics_server = self.clone();
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = metrics_server.clone();
                async move { Ok::<_, Infallible>(warp::reply::json(&server.metrics.snapshot())) }
            });

        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&serde_json::json!({ "status": "alive" })));

        health_route.or(metrics_route).or(live_route)
    }

    /// Serve until the process exits
    pub async fn start(self: Arc<Self>) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!(%addr, "Health server listening");
        warp::serve(self.routes()).run(addr).await;
    }
}
