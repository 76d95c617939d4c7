//! End-to-end tests against a running server on an ephemeral port

use crowd_predictor::infra::Metrics;
use crowd_predictor::io::{serve, AppState};
use crowd_predictor::services::{CrowdClassifier, CrowdPredictor, ModelSource};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let classifier = CrowdClassifier::new(&mut StdRng::seed_from_u64(42));
        let predictor = Arc::new(CrowdPredictor::new(classifier, ModelSource::RandomInit));
        let state = AppState::new(predictor, Arc::new(Metrics::new()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            serve(listener, state, shutdown_rx).await.unwrap();
        });
        Self { addr, shutdown, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap();
    }
}

async fn post_predict(client: &reqwest::Client, server: &TestServer, body: &str) -> (u16, Value) {
    let response = client
        .post(server.url("/predict"))
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let text = response.text().await.unwrap();
    (status, serde_json::from_str(&text).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let response = client.get(server.url("/health")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    server.stop().await;
}

#[tokio::test]
async fn test_predict_round_trip() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let (status, body) = post_predict(
        &client,
        &server,
        r#"{"hour": 9, "day_of_week": 1, "is_weekend": false, "is_holiday": false,
            "weather_score": 0.2, "route_type": 0}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let prediction = &body["prediction"];
    let class = prediction["class"].as_u64().unwrap() as usize;
    assert!(class < 3);
    assert_eq!(prediction["label"], ["Low", "Medium", "High"][class]);
    let confidence = prediction["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));

    // Same input, same answer
    let (_, again) = post_predict(
        &client,
        &server,
        r#"{"hour": 9, "day_of_week": 1, "weather_score": 0.2}"#,
    )
    .await;
    assert_eq!(again["prediction"], body["prediction"]);

    server.stop().await;
}

#[tokio::test]
async fn test_predict_defaults_and_errors() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let (status, body) = post_predict(&client, &server, "{}").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let (status, body) = post_predict(&client, &server, r#"{"weather_score": "bad"}"#).await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("weather_score"));

    let (status, body) = post_predict(&client, &server, "[]").await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);

    server.stop().await;
}

#[tokio::test]
async fn test_metrics_and_not_found() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    post_predict(&client, &server, "{}").await;

    let response = client.get(server.url("/missing")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let text = client.get(server.url("/metrics")).send().await.unwrap().text().await.unwrap();
    assert!(text.contains("crowd_http_requests_total 3"));
    assert!(text.contains("crowd_http_not_found_total 1"));
    assert!(text.contains("crowd_model_trained 0"));

    server.stop().await;
}
