use base64::Engine;
use proxy_harvest::{Config, Error, HttpTransport, Protocol, SourceRegistry, Transport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_AGENT: &str = "proxy-harvest-test";

#[tokio::test]
async fn test_fetch_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("vless://id@h:443"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(USER_AGENT).unwrap();
    let fetched = transport
        .fetch(&format!("{}/list", server.uri()), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(fetched.body, "vless://id@h:443");
}

#[tokio::test]
async fn test_server_error_is_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(USER_AGENT)
        .unwrap()
        .with_retries(2, Duration::from_millis(10));
    let err = transport
        .fetch(&format!("{}/broken", server.uri()), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Status(500)));
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("trojan://pw@h:443"))
        .with_priority(2)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(USER_AGENT)
        .unwrap()
        .with_retries(5, Duration::from_millis(10));
    let fetched = transport
        .fetch(&format!("{}/flaky", server.uri()), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(fetched.body, "trojan://pw@h:443");
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(USER_AGENT)
        .unwrap()
        .with_retries(5, Duration::from_millis(10));
    let err = transport
        .fetch(&format!("{}/missing", server.uri()), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Status(404)));
}

#[tokio::test]
async fn test_retries_stop_at_the_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(USER_AGENT)
        .unwrap()
        .with_retries(5, Duration::from_secs(3));
    let started = std::time::Instant::now();
    let err = transport
        .fetch(&format!("{}/down", server.uri()), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Status(502)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(USER_AGENT).unwrap();
    let timeout = Duration::from_millis(100);
    let err = transport
        .fetch(&format!("{}/slow", server.uri()), timeout)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(t) if t == timeout));
}

#[tokio::test]
async fn test_harvest_over_http() {
    let server = MockServer::start().await;
    let payload = base64::engine::general_purpose::STANDARD
        .encode("hysteria2://pw@1.2.3.4:443?sni=x\ntuic://u:p@5.6.7.8:443");
    Mock::given(method("GET"))
        .and(path("/sub"))
        .respond_with(ResponseTemplate::new(200).set_body_string(payload))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let good = format!("{}/sub", server.uri());
    let gone = format!("{}/gone", server.uri());
    let registry = SourceRegistry::from_urls([&good, &gone], Duration::from_secs(5));
    let config = Config::new()
        .with_output_path(dir.path().join("out.txt"))
        .with_stats_path(None);
    let transport = HttpTransport::with_config(&config.crawler_config()).unwrap();
    let mut harvester = config.build_harvester(registry, transport);

    let outcome = harvester.run(&CancellationToken::new()).await.unwrap();
    let records = outcome.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].protocol, Protocol::Hysteria2);
    assert_eq!(records[0].config, "hy2://pw@1.2.3.4:443?sni=x");
    assert_eq!(records[1].protocol, Protocol::Tuic);

    let failed = harvester.registry().get(&gone).unwrap();
    assert_eq!(failed.metrics.fail_count, 1);
}
