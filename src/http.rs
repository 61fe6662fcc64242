use crate::engine::Engine;
use crate::health::{evaluate, is_serving, HealthThresholds};
use crate::metrics;
use crate::report::HealthDocument;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub engine: Arc<Engine>,
    pub thresholds: HealthThresholds,
    /// How long a request may wait for a lazily triggered round.
    pub refresh_wait: Duration,
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/health/simple", get(simple_health_handler))
        .fallback(not_found)
        .with_state(state)
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    let snapshot = state.engine.snapshot_fresh(state.refresh_wait).await;
    let verdict = evaluate(&snapshot, &state.thresholds);
    match metrics::render(&snapshot, &verdict) {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static(metrics::CONTENT_TYPE),
            );
            response
        }
        Err(err) => {
            error!(error = %err, "metrics encoding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("metrics encoding failed: {err}"),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<HttpAppState>) -> Response {
    let snapshot = state.engine.snapshot_fresh(state.refresh_wait).await;
    let verdict = evaluate(&snapshot, &state.thresholds);
    let document = HealthDocument::new(&snapshot, &verdict, now_unix());
    match document.to_json() {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(err) => {
            error!(error = %err, "health document encoding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("health document encoding failed: {err}"),
            )
                .into_response()
        }
    }
}

async fn simple_health_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot_fresh(state.refresh_wait).await;
    if is_serving(&snapshot) {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::CollectorSet;
    use crate::engine::testing::{healthy_set, Scripted};
    use crate::state::{DaemonHealth, ProcessProbe, WebProbe};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(set: CollectorSet) -> Router {
        let engine = Arc::new(Engine::new(
            set,
            Duration::from_secs(30),
            Duration::from_secs(1),
        ));
        build_router(HttpAppState {
            engine,
            thresholds: HealthThresholds::default(),
            refresh_wait: Duration::from_secs(1),
        })
    }

    fn serving_set() -> CollectorSet {
        let mut set = healthy_set(Duration::ZERO);
        set.daemon_health = Scripted::new("daemon_health", Duration::ZERO, |_| {
            Ok(DaemonHealth {
                process: ProcessProbe {
                    running: true,
                    ..ProcessProbe::default()
                },
                web_ui: WebProbe {
                    reachable: true,
                    ..WebProbe::default()
                },
                ..DaemonHealth::default()
            })
        });
        set
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn metrics_served_as_prometheus_text() {
        let (status, content_type, body) = get(app(serving_set()), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));
        assert!(body.lines().any(|l| l == "transmission_torrent_count 1"));
    }

    #[tokio::test]
    async fn health_returns_json_document() {
        let (status, content_type, body) = get(app(serving_set()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["status"], "unhealthy");
        assert_eq!(doc["issues"], serde_json::json!(["rpc_unreachable"]));
        assert_eq!(doc["round"], 1);
    }

    #[tokio::test]
    async fn simple_health_ok_when_serving() {
        let (status, _, body) = get(app(serving_set()), "/health/simple").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn simple_health_unavailable_when_daemon_down() {
        let (status, _, body) = get(app(healthy_set(Duration::ZERO)), "/health/simple").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Service Unavailable");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let (status, _, _) = get(app(serving_set()), "/api/state").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
