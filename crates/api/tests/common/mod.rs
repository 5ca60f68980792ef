#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sitepulse_events::{EventProducer, MemoryLog, ProducerConfig};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sitepulse_api::config::ServerConfig;
use sitepulse_api::router::build_app_router;
use sitepulse_api::state::AppState;
use sitepulse_api::ws::{HubConfig, LiveHub};

pub const TOPIC: &str = "user_events";

/// Build a test `ServerConfig` with safe defaults and small queues.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        hub: HubConfig {
            intake_capacity: 64,
            client_queue_capacity: 8,
        },
        ..ServerConfig::default()
    }
}

/// A fully wired application backed by an in-memory log.
pub struct TestApp {
    pub router: Router,
    pub hub: LiveHub,
    pub producer: Arc<EventProducer>,
    pub log: MemoryLog,
    pub cancel: CancellationToken,
}

/// Build the full application router with all middleware layers, mirroring
/// `main.rs`. Must be called inside a Tokio runtime.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let log = MemoryLog::new([TOPIC], config.pipeline.partitions);
    let producer = Arc::new(EventProducer::new(
        Arc::new(log.clone()),
        ProducerConfig::default(),
    ));
    let cancel = CancellationToken::new();
    let (hub, _handle) = LiveHub::start(config.hub.clone(), cancel.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        producer: Arc::clone(&producer),
        hub: hub.clone(),
    };
    let router = build_app_router(state, &config).unwrap();

    TestApp {
        router,
        hub,
        producer,
        log,
        cancel,
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}
