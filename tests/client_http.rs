//! End-to-end behaviour of the client against a mock collector.

use hec_sink::{Backoff, ConfigOverrides, Event, HecClient, HecConfig, Metric};
use std::io::Read;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "00000000-0000-0000-0000-000000000000";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn collector_with_200(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn client_for(server: &MockServer, configure: impl FnOnce(hec_sink::HecConfigBuilder) -> hec_sink::HecConfigBuilder) -> HecClient {
    let builder = HecConfig::builder(format!("{}/services/collector", server.uri()))
        .token(TOKEN)
        .flush_time(Duration::from_secs(3600))
        .retry_wait_time(Duration::from_millis(1));
    HecClient::new(configure(builder).finish().unwrap()).unwrap()
}

#[tokio::test]
async fn flush_sends_batch_and_updates_counters() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    let client = client_for(&server, |b| b);
    client.push_event(&Event::new("first")).unwrap();
    client.push_event(&Event::new("second")).unwrap();
    client.push_metric(&Metric::new("cpu", 0.5)).unwrap();

    client.flush().await.unwrap();

    let stats = client.flush_stats();
    assert_eq!(stats.counters.queued_messages, 3);
    assert_eq!(stats.counters.sent_messages, 3);
    assert_eq!(stats.counters.sent_bytes, stats.counters.queued_bytes);
    assert_eq!(stats.counters.transferred_bytes, stats.counters.sent_bytes);
    assert_eq!(stats.counters.error_count, 0);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.active_flushes, 0);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    client.shutdown(None).await;
}

#[tokio::test]
async fn envelopes_keep_push_order_within_a_batch() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    let client = client_for(&server, |b| b);
    for i in 0..5 {
        client.push_event(&Event::new(format!("event-{i}"))).unwrap();
    }
    client.flush().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 5);
    for (i, line) in lines.iter().enumerate() {
        assert!(line.contains(&format!("event-{i}")), "line {i} out of order: {line}");
    }
    client.shutdown(None).await;
}

#[tokio::test]
async fn auth_and_user_agent_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .and(header("Authorization", format!("Splunk {TOKEN}")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server, |b| b.user_agent("hec-sink-test/1.0"));
    client.push_event(&Event::new("authorized")).unwrap();
    // The mock only matches with the auth header; an unmatched request 404s
    // and the flush would fail.
    client.flush().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let ua = requests[0].headers.get("user-agent").unwrap();
    assert_eq!(ua.to_str().unwrap(), "hec-sink-test/1.0");
    client.shutdown(None).await;
}

#[tokio::test]
async fn gzip_body_decompresses_to_the_wire_envelopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .and(header("Content-Encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server, |b| b.gzip(true));
    client.push_event(&Event::new("compressed")).unwrap();
    client.flush().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let mut decoder = flate2::read::GzDecoder::new(&requests[0].body[..]);
    let mut body = String::new();
    decoder.read_to_string(&mut body).unwrap();
    assert!(body.contains("\"event\":\"compressed\""));
    assert!(body.ends_with('\n'));

    let stats = client.flush_stats();
    assert!(stats.counters.transferred_bytes > 0);
    assert_eq!(stats.aggregates["batch_size_compressed_count"], serde_json::Value::from(1));
    client.shutdown(None).await;
}

#[tokio::test]
async fn transient_503s_are_retried_until_success() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    collector_with_200(&server).await;

    let client = client_for(&server, |b| b.max_retries(3));
    client.push_event(&Event::new("eventually delivered")).unwrap();
    client.flush().await.unwrap();

    let stats = client.flush_stats();
    assert_eq!(stats.counters.error_count, 2);
    assert_eq!(stats.counters.retry_count, 2);
    assert_eq!(stats.counters.sent_messages, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    client.shutdown(None).await;
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server, |b| b.max_retries(2));
    client.push_event(&Event::new("doomed")).unwrap();
    let err = client.flush().await.unwrap_err();

    assert!(err.is_retries_exhausted());
    assert_eq!(err.status(), Some(503));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3); // initial attempt + 2 retries

    let stats = client.flush_stats();
    assert_eq!(stats.counters.sent_messages, 0);
    assert_eq!(stats.counters.error_count, 3);
    assert_eq!(stats.active_flushes, 0);
    client.shutdown(None).await;
}

#[tokio::test]
async fn byte_threshold_flushes_current_batch_without_the_newcomer() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    // Fits one small envelope but not two.
    let client = client_for(&server, |b| b.max_queue_size(40));
    client.push_event(&Event::new("first")).unwrap();
    assert_eq!(client.queue_depth(), 1);

    client.push_event(&Event::new("second")).unwrap();
    // The first message went out eagerly; only the newcomer remains queued.
    assert_eq!(client.queue_depth(), 1);

    client.flush().await.unwrap();
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first_body = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(first_body.contains("first"));
    assert!(!first_body.contains("second"));
    client.shutdown(None).await;
}

#[tokio::test]
async fn oversized_single_message_is_still_sent() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    let client = client_for(&server, |b| b.max_queue_size(16));
    let big = "x".repeat(1024);
    client.push_event(&Event::new(big)).unwrap();
    assert_eq!(client.queue_depth(), 1);

    client.flush().await.unwrap();
    let stats = client.flush_stats();
    assert_eq!(stats.counters.sent_messages, 1);
    client.shutdown(None).await;
}

#[tokio::test]
async fn entry_threshold_triggers_an_eager_flush() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    let client = client_for(&server, |b| b.max_queue_entries(Some(2)));
    client.push_event(&Event::new("one")).unwrap();
    client.push_event(&Event::new("two")).unwrap();
    assert_eq!(client.queue_depth(), 2);

    // Third push exceeds the cap and dispatches the whole queue.
    client.push_event(&Event::new("three")).unwrap();
    assert_eq!(client.queue_depth(), 0);

    client.flush().await.unwrap();
    let stats = client.flush_stats();
    assert_eq!(stats.counters.sent_messages, 3);
    client.shutdown(None).await;
}

#[tokio::test]
async fn idle_timer_flushes_a_partial_queue() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    let config = HecConfig::builder(format!("{}/services/collector", server.uri()))
        .flush_time(Duration::from_millis(20))
        .finish()
        .unwrap();
    let client = HecClient::new(config).unwrap();
    client.push_event(&Event::new("idle")).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = client.flush_stats();
    assert_eq!(stats.counters.sent_messages, 1);
    assert_eq!(stats.queue_depth, 0);
    client.shutdown(None).await;
}

#[tokio::test]
async fn shutdown_cancels_a_flush_sleeping_between_retries() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    // A long constant wait keeps the flush parked between attempts.
    let client = client_for(&server, |b| {
        b.max_retries(5).retry_wait_time(Backoff::constant(Duration::from_secs(600)))
    });
    client.push_event(&Event::new("stuck")).unwrap();

    let waiter = client.clone();
    let pending = tokio::spawn(async move { waiter.flush().await });

    // Let the first attempt fail and the retry sleep begin.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.flush_stats().active_flushes, 1);

    client.shutdown(Some(Duration::ZERO)).await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(e) if e.is_cancelled()));
    assert_eq!(client.flush_stats().active_flushes, 0);
}

#[tokio::test]
async fn shutdown_with_deadline_drains_first() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    let client = client_for(&server, |b| b);
    client.push_event(&Event::new("drain me")).unwrap();
    client.shutdown(Some(Duration::from_secs(5))).await;

    let stats = client.flush_stats();
    assert_eq!(stats.counters.sent_messages, 1);
    assert!(client.push_event(&Event::new("late")).is_err());
}

#[tokio::test]
async fn health_endpoint_reports_availability() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/collector/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server, |b| b);
    client.check_available().await.unwrap();
    client.shutdown(None).await;
}

#[tokio::test]
async fn unhealthy_collector_fails_the_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/collector/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server, |b| b);
    let err = client.check_available().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    client.shutdown(None).await;
}

#[tokio::test]
async fn wait_until_available_retries_the_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/collector/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/collector/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server, |b| b);
    client.wait_until_available(Duration::from_secs(10)).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    client.shutdown(None).await;
}

#[tokio::test]
async fn concurrent_flushes_retry_independently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    collector_with_200(&server).await;

    let client = client_for(&server, |b| b.max_retries(3).max_queue_entries(Some(0)));
    // Every push exceeds the entry cap, so each dispatches its own flush.
    client.push_event(&Event::new("batch-a")).unwrap();
    client.push_event(&Event::new("batch-b")).unwrap();

    client.flush().await.unwrap();
    let stats = client.flush_stats();
    assert_eq!(stats.counters.sent_messages, 2);
    assert_eq!(stats.counters.error_count, 1);
    client.shutdown(None).await;
}

#[tokio::test]
async fn derived_client_keeps_defaults_and_shares_the_pool() {
    let server = MockServer::start().await;
    collector_with_200(&server).await;

    let base = client_for(&server, |b| b);
    let tenant = base
        .clone_with(ConfigOverrides {
            default_fields: Some({
                let mut m = serde_json::Map::new();
                m.insert("tenant".to_string(), serde_json::json!("acme"));
                m
            }),
            ..ConfigOverrides::default()
        })
        .unwrap();

    tenant.push_event(&Event::new("tenant event")).unwrap();
    tenant.flush().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(body.contains("\"tenant\":\"acme\""));

    tenant.shutdown(None).await;
    base.shutdown(None).await;
}
