//! Transport tests against a local mock server
//!
//! Covers URL joining, header merging, status classification, the single
//! retry after a 401 and debounced token refresh across concurrent requests.

use agent_turn::{
    ApiRequest, Authorization, Error, RetryDecision, Transport, TransportConfig, TransportHooks,
    TurnContext,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u32,
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn transport_for(server: &MockServer) -> Transport {
    let config = TransportConfig::builder()
        .base_url(format!("{}/v1/", server.uri()))
        .header("X-Client", "agent-turn")
        .timeout(5)
        .build()
        .unwrap();
    Transport::new(config).unwrap()
}

/// Prepare hook that counts calls and stamps the call number on the request
fn counting_hooks(prepared: Arc<AtomicUsize>, decision: RetryDecision) -> TransportHooks {
    TransportHooks::new()
        .prepare_request(move |mut request, _ctx| {
            let prepared = prepared.clone();
            async move {
                let n = prepared.fetch_add(1, Ordering::SeqCst) + 1;
                request.set_header("x-attempt", n.to_string());
                Ok(request)
            }
        })
        .on_unauthorized(move |_event| async move { Ok(decision) })
}

#[tokio::test]
async fn test_send_decodes_json_and_merges_headers() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items/7"))
        .and(query_param("expand", "true"))
        .and(header("x-client", "agent-turn"))
        .and(header("x-request", "one"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::get("/items/7")
        .query("expand", "true")
        .header("X-Request", "one");
    let item: Item = transport_for(&server)
        .send(request, &TurnContext::new())
        .await
        .unwrap();

    assert_eq!(item, Item { id: 7 });
}

#[tokio::test]
async fn test_json_body_has_sorted_keys() {
    #[derive(Serialize)]
    struct Payload {
        zeta: u32,
        alpha: &'static str,
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/echo"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"alpha":"a","zeta":1}"#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::post("echo")
        .json(&Payload {
            zeta: 1,
            alpha: "a",
        })
        .unwrap();
    let () = transport_for(&server)
        .send(request, &TurnContext::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_non_success_status_keeps_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = transport_for(&server)
        .send::<Value>(ApiRequest::get("items"), &TurnContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnacceptableStatus { code: 500, .. }));
    assert_eq!(err.raw_body(), Some("boom"));
}

#[tokio::test]
async fn test_undecodable_body_is_decoding_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = transport_for(&server)
        .send::<Item>(ApiRequest::get("items/1"), &TurnContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DecodingFailed { .. }));
    assert_eq!(err.raw_body(), Some("not json"));
}

#[tokio::test]
async fn test_connection_failure_is_request_failed() {
    let config = TransportConfig::builder()
        .base_url("http://127.0.0.1:1/v1")
        .timeout(5)
        .build()
        .unwrap();
    let err = Transport::new(config)
        .unwrap()
        .send::<Value>(ApiRequest::get("items"), &TurnContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RequestFailed(_)));
}

#[tokio::test]
async fn test_truncated_body_is_invalid_response() {
    init_logging();
    // Headers promise 100 bytes, then the connection closes after 5
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            received.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nshort")
            .await
            .unwrap();
        socket.flush().await.unwrap();
        let _ = socket.shutdown().await;
    });

    let config = TransportConfig::builder()
        .base_url(format!("http://{}/v1", addr))
        .timeout(5)
        .build()
        .unwrap();
    let err = Transport::new(config)
        .unwrap()
        .send::<Value>(ApiRequest::get("items"), &TurnContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidResponse(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_unauthorized_with_failing_refresh_sends_once() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let authorization = Authorization::refreshable("stale", move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::config("identity provider unreachable"))
        }
    });

    let transport = transport_for(&server).with_bearer_auth();
    let ctx = TurnContext::for_authorization(Some(&authorization));
    let err = transport
        .send::<Item>(ApiRequest::get("items/1"), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Authorization(_)), "got {:?}", err);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(ctx.auth().unwrap().current_token().await, "stale");
}

#[tokio::test]
async fn test_unauthorized_retry_prepares_again() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items/1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/items/1"))
        .and(header("x-attempt", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&server)
        .await;

    let prepared = Arc::new(AtomicUsize::new(0));
    let transport =
        transport_for(&server).with_hooks(counting_hooks(prepared.clone(), RetryDecision::Retry));

    let item: Item = transport
        .send(ApiRequest::get("items/1"), &TurnContext::new())
        .await
        .unwrap();

    assert_eq!(item, Item { id: 1 });
    assert_eq!(prepared.load(Ordering::SeqCst), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unauthorized_without_retry_sends_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items/1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
        .mount(&server)
        .await;

    let prepared = Arc::new(AtomicUsize::new(0));
    let transport = transport_for(&server)
        .with_hooks(counting_hooks(prepared.clone(), RetryDecision::DoNotRetry));

    let err = transport
        .send::<Item>(ApiRequest::get("items/1"), &TurnContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(401));
    assert_eq!(err.raw_body(), Some("nope"));
    assert_eq!(prepared.load(Ordering::SeqCst), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/items/1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let prepared = Arc::new(AtomicUsize::new(0));
    let transport =
        transport_for(&server).with_hooks(counting_hooks(prepared.clone(), RetryDecision::Retry));

    let err = transport
        .send::<Item>(ApiRequest::get("items/1"), &TurnContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(401));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unauthorized_without_hook_is_plain_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("who are you"))
        .mount(&server)
        .await;

    let err = transport_for(&server)
        .send::<Value>(ApiRequest::get("items"), &TurnContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(401));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_refresh_once() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer fresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&server)
        .await;

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = refreshes.clone();
    let authorization = Authorization::refreshable("stale", move || {
        let counter = counter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("fresh-{}", n))
        }
    });

    let transport = transport_for(&server).with_bearer_auth();
    let ctx = TurnContext::for_authorization(Some(&authorization));

    let (first, second) = tokio::join!(
        transport.send::<Item>(ApiRequest::get("items/1"), &ctx),
        transport.send::<Item>(ApiRequest::get("items/2"), &ctx),
    );

    assert_eq!(first.unwrap(), Item { id: 1 });
    assert_eq!(second.unwrap(), Item { id: 1 });
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.auth().unwrap().current_token().await, "fresh-1");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 4);
    let retried_with_fresh = received
        .iter()
        .filter(|request| {
            request
                .headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                == Some("Bearer fresh-1")
        })
        .count();
    assert_eq!(retried_with_fresh, 2);
}

#[tokio::test]
async fn test_fetch_all_drops_failures() {
    let server = MockServer::start().await;
    for id in [1u32, 3] {
        Mock::given(method("GET"))
            .and(path(format!("/v1/items/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": id})))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/v1/items/2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let requests = (1..=3)
        .map(|id| ApiRequest::get(format!("items/{}", id)))
        .collect();
    let mut items: Vec<Item> = transport_for(&server)
        .fetch_all(requests, &TurnContext::new(), 2)
        .await;
    items.sort_by_key(|item| item.id);

    assert_eq!(items, vec![Item { id: 1 }, Item { id: 3 }]);
}
