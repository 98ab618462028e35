//! Streaming calls through the WebSocket transport against a local backend.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::future::join_all;
use inference_router::config::{CircuitBreakerConfig, RouterConfig, TransportKind};
use inference_router::load_balancer::endpoint::Endpoint;
use inference_router::load_balancer::EndpointId;
use inference_router::resilience::CircuitState;
use inference_router::transport::WebSocketTransport;
use inference_router::{Call, Router, SubmitOptions, TransportAdapter, TransportError};

mod common;
use common::WsMode;

fn stream_router(url: String, timeout_ms: u64) -> Router {
    let mut config = RouterConfig::default();
    config.health_check.enabled = false;
    config.retries.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 3;
    let mut endpoint = common::endpoint("asr", "a", &url);
    endpoint.transport = TransportKind::Stream;
    endpoint.timeout_ms = timeout_ms;
    config.endpoints.push(endpoint);
    Router::new(config).unwrap()
}

#[tokio::test]
async fn test_reply_over_reused_connection() {
    let (addr, connections) = common::start_ws_backend(WsMode::Echo(Duration::ZERO)).await;
    let router = stream_router(format!("ws://{}/", addr), 1_000);

    for text in ["one", "two"] {
        let response = router.submit("asr", text, SubmitOptions::new()).await.unwrap();
        let frame: serde_json::Value = response.json().unwrap();
        assert_eq!(frame["data"], text);
    }
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnects_after_peer_closes() {
    let (addr, connections) = common::start_ws_backend(WsMode::CloseAfterOne).await;
    let router = stream_router(format!("ws://{}/", addr), 1_000);

    assert!(router.submit("asr", "one", SubmitOptions::new()).await.is_ok());
    let response = router.submit("asr", "two", SubmitOptions::new()).await.unwrap();
    assert!(std::str::from_utf8(&response.body).unwrap().contains("two"));
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    let endpoint = router.registry().get(&EndpointId::new("asr", "a")).unwrap();
    assert_eq!(endpoint.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_close_frame_is_connection_error() {
    let (addr, _) = common::start_ws_backend(WsMode::CloseImmediately).await;
    let endpoint = Endpoint::new(
        EndpointId::new("asr", "a"),
        TransportKind::Stream,
        url::Url::parse(&format!("ws://{}/", addr)).unwrap(),
        CircuitBreakerConfig::default(),
    );

    let transport = WebSocketTransport::new();
    let err = transport
        .invoke(&endpoint, &Call::new("hello"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn test_concurrent_calls_queue_without_tripping_breaker() {
    let (addr, connections) =
        common::start_ws_backend(WsMode::Echo(Duration::from_millis(100))).await;
    let router = stream_router(format!("ws://{}/", addr), 250);

    let calls = (0..8).map(|i| router.submit("asr", format!("call-{i}"), SubmitOptions::new()));
    let results = join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        let response = result.unwrap_or_else(|e| panic!("call {i} failed: {e}"));
        let frame: serde_json::Value = response.json().unwrap();
        assert_eq!(frame["data"], format!("call-{i}"));
    }

    let id = EndpointId::new("asr", "a");
    let endpoint = router.registry().get(&id).unwrap();
    assert_eq!(endpoint.breaker().state(), CircuitState::Closed);
    assert_eq!(router.gate().available(&id), Some(1));
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}
