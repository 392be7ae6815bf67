//! tests/test_retry.rs
//!
//! In-memory retry loop: allow-list gating, retry-context headers, delay
//! policies, and the terminal-network persistence hand-off.

use beacon_transporter::loggers::{Logger, LoggerBuilder};
use beacon_transporter::{
    PersistQueue, ResultKind, RetryDelayFn, Transporter, TransporterConfig, TransporterInit,
    exponential_delay_with_jitter, linear_delay,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RETRY_HEADER: &str = "x-retry-context";

fn get_test_logger() -> Logger {
    LoggerBuilder::new("test-retry").build().unwrap()
}

/// /// fast_delay
///
/// Keeps the retry sleeps negligible so the suite stays quick.
fn fast_delay() -> RetryDelayFn {
    Arc::new(|_attempt, _count_left| Duration::from_millis(5))
}

/// /// retry_config
///
/// Two in-memory retries with the retry-context header enabled, scoped to
/// a per-test store.
fn retry_config(store_name: &str) -> TransporterConfig {
    let mut config = TransporterConfig::default();
    config.in_memory_retry.attempt_limit = 2;
    config.in_memory_retry.header_name = Some(RETRY_HEADER.to_string());
    config.persistence_retry.store_name = store_name.to_string();
    config
}

fn retry_transporter(store_name: &str) -> Transporter {
    Transporter::new(TransporterInit {
        config: retry_config(store_name),
        calculate_retry_delay: Some(fast_delay()),
        logger: Some(get_test_logger()),
        ..TransporterInit::default()
    })
    .unwrap()
}

fn header_json(request: &wiremock::Request) -> Option<serde_json::Value> {
    let value = request.headers.get(RETRY_HEADER)?;
    serde_json::from_str(value.to_str().ok()?).ok()
}

// =========================================================================
// RETRY LOOP
// =========================================================================

/// /// test_retry_on_gateway_errors_with_headers
///
/// Two 502s then a 200: the call succeeds, and each retry carries the
/// 0-based attempt index plus the status that caused it.
#[tokio::test]
async fn test_retry_on_gateway_errors_with_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let transporter = retry_transporter("retry-gateway");
    let result = transporter.beacon(&mock_server.uri(), "payload", None).await;

    assert!(result.is_success());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    // First attempt carries no retry context.
    assert!(requests[0].headers.get(RETRY_HEADER).is_none());

    let first_retry = header_json(&requests[1]).expect("retry header missing");
    assert_eq!(first_retry["attempt"], 1);
    assert_eq!(first_retry["errorCode"], 502);

    let second_retry = header_json(&requests[2]).expect("retry header missing");
    assert_eq!(second_retry["attempt"], 2);
    assert_eq!(second_retry["errorCode"], 502);
}

/// /// test_no_header_without_configured_name
///
/// With no header name configured, retries look identical to the first
/// attempt.
#[tokio::test]
async fn test_no_header_without_configured_name() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut config = retry_config("retry-headerless");
    config.in_memory_retry.header_name = None;
    let transporter = Transporter::new(TransporterInit {
        config,
        calculate_retry_delay: Some(fast_delay()),
        logger: Some(get_test_logger()),
        ..TransporterInit::default()
    })
    .unwrap();

    let result = transporter.beacon(&mock_server.uri(), "payload", None).await;
    assert!(result.is_success());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].headers.get(RETRY_HEADER).is_none());
}

/// /// test_retries_exhausted_drop
///
/// A 502 that never recovers is dropped once the in-memory budget is
/// spent (502 is not in the persistence allow-list).
#[tokio::test]
async fn test_retries_exhausted_drop() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&mock_server)
        .await;

    let transporter = retry_transporter("retry-exhausted");
    let result = transporter.beacon(&mock_server.uri(), "payload", None).await;

    assert!(matches!(result.kind, ResultKind::Response { status_code: 502, .. }));
    assert!(result.dropped);
    assert!(transporter.database().peek_queue(1).await.is_empty());
}

/// /// test_status_outside_allow_list_not_retried
///
/// 500 is in neither allow-list: one attempt, immediate drop.
#[tokio::test]
async fn test_status_outside_allow_list_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transporter = retry_transporter("retry-not-listed");
    let result = transporter.beacon(&mock_server.uri(), "payload", None).await;

    assert!(matches!(result.kind, ResultKind::Response { status_code: 500, .. }));
    assert!(result.dropped);
}

/// /// test_custom_delay_spacing
///
/// The configured delay function really paces the loop: two 50 ms sleeps
/// put at least 100 ms between first and last attempt.
#[tokio::test]
async fn test_custom_delay_spacing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(504))
        .expect(3)
        .mount(&mock_server)
        .await;

    let transporter = Transporter::new(TransporterInit {
        config: retry_config("retry-delay-spacing"),
        calculate_retry_delay: Some(Arc::new(|_, _| Duration::from_millis(50))),
        logger: Some(get_test_logger()),
        ..TransporterInit::default()
    })
    .unwrap();

    let start = std::time::Instant::now();
    let _ = transporter.beacon(&mock_server.uri(), "payload", None).await;
    assert!(start.elapsed() >= Duration::from_millis(100));
}

// =========================================================================
// NETWORK FAILURES
// =========================================================================

/// /// test_network_exhaustion_persists_with_attempt_count
///
/// Network failures are always retry-eligible; once the budget is spent
/// the payload persists carrying the full attempt count.
#[tokio::test]
async fn test_network_exhaustion_persists_with_attempt_count() {
    let transporter = retry_transporter("retry-network-exhausted");

    let result = transporter.beacon("http://127.0.0.1:1/collect", "payload", None).await;

    assert_eq!(result.kind, ResultKind::Persisted { status_code: None });

    let entries = transporter.database().peek_queue(1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt_count, 3);
    assert!(entries[0].timestamp > 0);
    assert_eq!(entries[0].status_code, None);
}

/// /// test_offline_persists_immediately
///
/// With the connectivity flag down, the first failure persists even
/// though retries remain and the status is in no allow-list.
#[tokio::test]
async fn test_offline_persists_immediately() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collect"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transporter = Transporter::new(TransporterInit {
        config: retry_config("retry-offline"),
        calculate_retry_delay: Some(fast_delay()),
        online: Some(Arc::new(AtomicBool::new(false))),
        logger: Some(get_test_logger()),
        ..TransporterInit::default()
    })
    .unwrap();

    assert!(!transporter.connectivity().load(Ordering::SeqCst));

    let result = transporter
        .beacon(&format!("{}/collect", mock_server.uri()), "payload", None)
        .await;

    assert_eq!(result.kind, ResultKind::Persisted { status_code: Some(502) });

    let entries = transporter.database().peek_queue(1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt_count, 1);
}

// =========================================================================
// DELAY POLICIES
// =========================================================================

/// /// test_linear_delay_contract
///
/// The default policy is `attempt * 2000 ms`.
#[tokio::test]
async fn test_linear_delay_contract() {
    let delay = linear_delay();
    assert_eq!(delay(1, 2), Duration::from_millis(2000));
    assert_eq!(delay(3, 0), Duration::from_millis(6000));
}

/// /// test_jittered_delay_bounds
///
/// The exponential preset doubles per attempt, jitters by at most 10%,
/// and respects its cap.
#[tokio::test]
async fn test_jittered_delay_bounds() {
    let delay = exponential_delay_with_jitter(Duration::from_millis(100), Some(Duration::from_millis(300)));

    let first = delay(1, 3);
    assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));

    // 100 * 2^2 = 400 is capped to 300 before and after jitter.
    let third = delay(3, 1);
    assert_eq!(third, Duration::from_millis(300));
}
