//! HTTP API
//!
//! - `GET /health` → `{"status":"ok"}`
//! - `POST /predict` → prediction JSON, 400 with `{"success":false,"error":..}` on bad input
//! - `GET /metrics` → Prometheus text
//!
//! JSON responses carry `Access-Control-Allow-Origin: *` and `OPTIONS`
//! answers CORS preflight for every route.

use crate::domain::types::Prediction;
use crate::infra::metrics::Metrics;
use crate::io::prometheus::{self, format_prometheus_metrics};
use crate::services::predictor::CrowdPredictor;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const JSON: &str = "application/json";

/// Shared handles every connection task needs
#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<CrowdPredictor>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(predictor: Arc<CrowdPredictor>, metrics: Arc<Metrics>) -> Self {
        Self { predictor, metrics }
    }
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    success: bool,
    prediction: PredictionBody,
}

#[derive(Debug, Serialize)]
struct PredictionBody {
    class: usize,
    label: &'static str,
    confidence: f32,
    probabilities: Probabilities,
}

#[derive(Debug, Serialize)]
struct Probabilities {
    #[serde(rename = "Low")]
    low: f32,
    #[serde(rename = "Medium")]
    medium: f32,
    #[serde(rename = "High")]
    high: f32,
}

impl From<&Prediction> for PredictResponse {
    fn from(prediction: &Prediction) -> Self {
        let [low, medium, high] = prediction.probabilities;
        Self {
            success: true,
            prediction: PredictionBody {
                class: prediction.label.index(),
                label: prediction.label.as_str(),
                confidence: prediction.confidence,
                probabilities: Probabilities { low, medium, high },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictErrorResponse {
    success: bool,
    error: String,
}

#[derive(Debug, Serialize)]
struct RouteError {
    error: &'static str,
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => response(status, JSON, Bytes::from(bytes)),
        Err(e) => {
            error!(error = %e, "response_serialize_failed");
            response(
                StatusCode::INTERNAL_SERVER_ERROR,
                JSON,
                Bytes::from_static(br#"{"error":"internal error"}"#),
            )
        }
    }
}

fn preflight() -> Response<Full<Bytes>> {
    let mut response = response(StatusCode::NO_CONTENT, "text/plain", Bytes::new());
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, OPTIONS"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    response
}

fn predict(body: &[u8], state: &AppState) -> Response<Full<Bytes>> {
    let start = Instant::now();
    let result = state.predictor.predict_json(body);
    let latency_us = start.elapsed().as_micros() as u64;

    match result {
        Ok(prediction) => {
            state.metrics.record_prediction(prediction.label, latency_us);
            debug!(
                label = %prediction.label,
                confidence = format!("{:.3}", prediction.confidence),
                latency_us = %latency_us,
                "prediction_served"
            );
            json_response(StatusCode::OK, &PredictResponse::from(&prediction))
        }
        Err(e) => {
            state.metrics.record_prediction_error(latency_us);
            warn!(error = %e, "prediction_rejected");
            json_response(
                StatusCode::BAD_REQUEST,
                &PredictErrorResponse { success: false, error: e.to_string() },
            )
        }
    }
}

/// Dispatch one fully-read request
pub fn route(method: &Method, path: &str, body: &[u8], state: &AppState) -> Response<Full<Bytes>> {
    state.metrics.record_request();

    match (method, path) {
        (&Method::GET, "/health") => {
            state.metrics.record_health_check();
            json_response(StatusCode::OK, &state.predictor.health())
        }
        (&Method::POST, "/predict") => predict(body, state),
        (&Method::GET, "/metrics") => {
            let text = format_prometheus_metrics(&state.metrics.snapshot(), state.predictor.source());
            response(StatusCode::OK, prometheus::CONTENT_TYPE, Bytes::from(text))
        }
        (&Method::OPTIONS, _) => preflight(),
        (_, "/health" | "/predict" | "/metrics") => {
            json_response(StatusCode::METHOD_NOT_ALLOWED, &RouteError { error: "method not allowed" })
        }
        _ => {
            state.metrics.record_not_found();
            json_response(StatusCode::NOT_FOUND, &RouteError { error: "not found" })
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: AppState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "request_body_read_failed");
            state.metrics.record_request();
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                &PredictErrorResponse { success: false, error: e.to_string() },
            ));
        }
    };
    Ok(route(&parts.method, parts.uri.path(), &body, &state))
}

/// Bind `addr` and serve until `shutdown` flips to true
pub async fn start_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

/// Accept loop on an already bound listener
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, model_source = ?state.predictor.source(), "crowd_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _peer)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("crowd_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::CrowdClassifier;
    use crate::services::predictor::ModelSource;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state() -> AppState {
        let classifier = CrowdClassifier::new(&mut StdRng::seed_from_u64(17));
        AppState::new(
            Arc::new(CrowdPredictor::new(classifier, ModelSource::RandomInit)),
            Arc::new(Metrics::new()),
        )
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let state = state();
        let response = route(&Method::GET, "/health", b"", &state);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_predict_success_shape() {
        let state = state();
        let response = route(&Method::POST, "/predict", br#"{"hour": 9, "day_of_week": 1}"#, &state);
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        let prediction = &body["prediction"];
        let class = prediction["class"].as_u64().unwrap();
        assert!(class < 3);
        let label = prediction["label"].as_str().unwrap();
        assert_eq!(label, ["Low", "Medium", "High"][class as usize]);

        let probabilities = &prediction["probabilities"];
        let sum: f64 = ["Low", "Medium", "High"]
            .iter()
            .map(|k| probabilities[*k].as_f64().unwrap())
            .sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(prediction["confidence"], probabilities[label]);
        assert_eq!(state.metrics.predictions_total(), 1);
    }

    #[tokio::test]
    async fn test_predict_empty_object_is_ok() {
        let response = route(&Method::POST, "/predict", b"{}", &state());
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_bad_input() {
        let state = state();
        let response = route(&Method::POST, "/predict", br#"{"weather_score": "bad"}"#, &state);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("weather_score"));

        let response = route(&Method::POST, "/predict", b"not json", &state);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.metrics.prediction_errors_total(), 2);
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let state = state();
        let response = route(&Method::GET, "/nope", b"", &state);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, serde_json::json!({"error": "not found"}));

        let response = route(&Method::GET, "/predict", b"", &state);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_preflight() {
        let response = route(&Method::OPTIONS, "/predict", b"", &state());
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, OPTIONS");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state();
        route(&Method::POST, "/predict", b"{}", &state);
        let response = route(&Method::GET, "/metrics", b"", &state);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], prometheus::CONTENT_TYPE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("crowd_http_requests_total 2"));
        assert!(text.contains("crowd_predict_latency_us_count 1"));
    }
}
