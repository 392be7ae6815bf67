//! tests/test_transport.rs
//!
//! Send engine: outcome classification, the keepalive body cap, gzip
//! compression, default headers, the retry-context header builder, and
//! the one-shot fallback sender.

use beacon_transporter::loggers::{Logger, LoggerBuilder};
use beacon_transporter::transport::headers::build_send_headers;
use beacon_transporter::transport::{Transport, TransportResult};
use beacon_transporter::{HostCapabilities, KEEPALIVE_BODY_LIMIT, post_once};
use flate2::read::GzDecoder;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn get_test_logger() -> Logger {
    LoggerBuilder::new("test-transport").build().unwrap()
}

fn transport() -> Transport {
    Transport::new(HostCapabilities::default(), false, get_test_logger())
}

// =========================================================================
// CLASSIFICATION
// =========================================================================

/// /// test_classifies_success
#[tokio::test]
async fn test_classifies_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let result = transport().post(&mock_server.uri(), "body", HeaderMap::new()).await;
    assert_eq!(result, TransportResult::Success { status_code: 204 });
}

/// /// test_classifies_response_failure
///
/// Non-2xx yields the status plus its canonical reason as raw error.
#[tokio::test]
async fn test_classifies_response_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let result = transport().post(&mock_server.uri(), "body", HeaderMap::new()).await;
    assert_eq!(
        result,
        TransportResult::Response { status_code: 500, raw_error: "Internal Server Error".to_string() }
    );
}

/// /// test_classifies_network_failure
#[tokio::test]
async fn test_classifies_network_failure() {
    let result = transport().post("http://127.0.0.1:1/", "body", HeaderMap::new()).await;
    match result {
        TransportResult::Network { raw_error } => assert!(!raw_error.is_empty()),
        other => panic!("Expected Network result, got {:?}", other),
    }
}

/// /// test_oversized_body_still_delivers
///
/// A body past the keepalive cap skips the constrained path and goes out
/// exactly once through the plain one.
#[tokio::test]
async fn test_oversized_body_still_delivers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let body = "x".repeat(KEEPALIVE_BODY_LIMIT + 1);
    let result = transport().post(&mock_server.uri(), &body, HeaderMap::new()).await;
    assert_eq!(result, TransportResult::Success { status_code: 200 });

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body.len(), KEEPALIVE_BODY_LIMIT + 1);
}

// =========================================================================
// WIRE FORMAT
// =========================================================================

/// /// test_compression_gzips_body
///
/// compress=true gzips the bytes and marks the encoding; the content type
/// default is untouched.
#[tokio::test]
async fn test_compression_gzips_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let transport = Transport::new(HostCapabilities::default(), true, get_test_logger());
    let result = transport.post(&mock_server.uri(), "compress me please", HeaderMap::new()).await;
    assert_eq!(result, TransportResult::Success { status_code: 200 });

    let requests = mock_server.received_requests().await.unwrap();
    let request = &requests[0];
    assert_eq!(request.headers.get("content-encoding").unwrap().to_str().unwrap(), "gzip");
    assert_eq!(
        request.headers.get("content-type").unwrap().to_str().unwrap(),
        "text/plain;charset=UTF-8"
    );

    let mut decoder = GzDecoder::new(&request.body[..]);
    let mut decoded = String::new();
    decoder.read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, "compress me please");
}

/// /// test_caller_content_type_preserved
#[tokio::test]
async fn test_caller_content_type_preserved() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json".parse().unwrap());
    let result = transport().post(&mock_server.uri(), "{}", headers).await;
    assert_eq!(result, TransportResult::Success { status_code: 200 });

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );
}

/// /// test_handoff_returns_unknown_and_delivers
///
/// The fallback strategy reports Unknown immediately and the detached
/// task completes the send.
#[tokio::test]
async fn test_handoff_returns_unknown_and_delivers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = Transport::new(
        HostCapabilities { keepalive: false, send_beacon: true, fetch: true },
        false,
        get_test_logger(),
    );
    let result = transport.post(&mock_server.uri(), "handoff", HeaderMap::new()).await;
    assert_eq!(result, TransportResult::Unknown);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

// =========================================================================
// RETRY-CONTEXT HEADER BUILDER
// =========================================================================

/// /// test_header_builder_passthrough
///
/// No header name, or attempt index 0: caller headers pass through
/// unchanged.
#[tokio::test]
async fn test_header_builder_passthrough() {
    let mut caller = HashMap::new();
    caller.insert("x-app".to_string(), "demo".to_string());

    let unnamed = build_send_headers(Some(&caller), None, 3, Some(502));
    assert_eq!(unnamed.len(), 1);
    assert_eq!(unnamed.get("x-app").unwrap().to_str().unwrap(), "demo");

    let first_attempt = build_send_headers(Some(&caller), Some("x-retry-context"), 0, None);
    assert!(first_attempt.get("x-retry-context").is_none());
}

/// /// test_header_builder_encodes_context
#[tokio::test]
async fn test_header_builder_encodes_context() {
    let headers = build_send_headers(None, Some("x-retry-context"), 2, Some(502));
    let value = headers.get("x-retry-context").unwrap().to_str().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(value).unwrap();
    assert_eq!(parsed["attempt"], 2);
    assert_eq!(parsed["errorCode"], 502);
}

/// /// test_header_builder_omits_absent_error_code
#[tokio::test]
async fn test_header_builder_omits_absent_error_code() {
    let headers = build_send_headers(None, Some("x-retry-context"), 1, None);
    let value = headers.get("x-retry-context").unwrap().to_str().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(value).unwrap();
    assert_eq!(parsed["attempt"], 1);
    assert!(parsed.get("errorCode").is_none());
}

// =========================================================================
// ONE-SHOT FALLBACK
// =========================================================================

/// /// test_post_once_classifies_without_retry
#[tokio::test]
async fn test_post_once_classifies_without_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = post_once(&mock_server.uri(), "once", None).await;
    assert!(matches!(result, TransportResult::Response { status_code: 500, .. }));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

/// /// test_post_once_sends_caller_headers
#[tokio::test]
async fn test_post_once_sends_caller_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut headers = HashMap::new();
    headers.insert("x-app".to_string(), "demo".to_string());
    let result = post_once(&mock_server.uri(), "once", Some(headers)).await;
    assert!(matches!(result, TransportResult::Success { status_code: 200 }));

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests[0].headers.get("x-app").unwrap().to_str().unwrap(), "demo");
    assert_eq!(
        requests[0].headers.get("content-type").unwrap().to_str().unwrap(),
        "text/plain;charset=UTF-8"
    );
}
