//! End-to-end tests: accept over HTTP, store, replay to an origin.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_later::config::loader::parse_config;
use http_later::config::{LaterConfig, ReplayConfig};
use http_later::events::{EventBus, LaterEvent};
use http_later::http::LaterServer;
use http_later::lifecycle::Shutdown;
use http_later::net::tls::CertificateMaterial;
use http_later::replay::{AttemptOutcome, HttpSender, ReplayEngine};
use http_later::routing::RuleSpec;
use http_later::storage::{content_key, MemoryStorage};

mod common;

fn local_config() -> LaterConfig {
    let mut config = LaterConfig::default();
    config.listener.bind_address = "127.0.0.1".into();
    config
}

/// Register `specs`, bind, and serve in the background.
async fn start_server(
    config: LaterConfig,
    storage: Arc<MemoryStorage>,
    events: EventBus,
    specs: Vec<RuleSpec>,
) -> Arc<Shutdown> {
    let server = LaterServer::new(config, storage, events);
    for spec in &specs {
        assert!(!server.accept(spec).is_empty(), "rule rejected");
    }

    let bound = server.bind().await.expect("bind");
    assert!(!bound.local_addrs().is_empty());
    let shutdown = Arc::new(Shutdown::new());
    let serving = shutdown.clone();
    tokio::spawn(async move {
        let _ = bound.serve(&serving).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown
}

#[tokio::test]
async fn test_accept_then_replay_to_forward_target() {
    let origin_addr: SocketAddr = "127.0.0.1:28382".parse().unwrap();
    let captured = common::start_mock_origin(origin_addr, 200).await;

    let storage = Arc::new(MemoryStorage::new("later:"));
    let events = EventBus::default();
    let shutdown = start_server(
        local_config(),
        storage.clone(),
        events.clone(),
        vec![RuleSpec::new()
            .host("relay.test")
            .port(28381)
            .path("/hooks")
            .method("POST")
            .forward(origin_addr.to_string())],
    )
    .await;

    let client = common::test_client();
    let res = client
        .post("http://127.0.0.1:28381/hooks/github?delivery=1")
        .header("Host", "relay.test")
        .header("Content-Type", "application/json")
        .header("Keep-Alive", "timeout=5")
        .header("Proxy-Authorization", "Basic c2VjcmV0")
        .body(r#"{"event":"push"}"#)
        .send()
        .await
        .expect("relay unreachable");

    assert_eq!(res.status(), 202);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["x-later-scheme"], "http");
    let key = res.headers()["x-later-key"].to_str().unwrap().to_string();

    // the returned key is the content address of what was stored
    assert_eq!(storage.keys().await, vec![key.clone()]);
    let stored = storage.peek(&key).unwrap();
    assert_eq!(content_key("later:", &stored).unwrap(), key);
    assert_eq!(stored.headers.get("X-Later-Host"), Some("127.0.0.1:28382"));
    assert_eq!(stored.headers.get("X-Later-TLS"), Some("insecure"));
    assert_eq!(stored.headers.get("Content-Length"), Some("16"));

    let sender = Arc::new(HttpSender::with_client(common::test_client()));
    let mut engine = ReplayEngine::new(storage.clone(), sender, &ReplayConfig::default(), events);
    let (report, outcomes) = engine.cycle().await.unwrap();

    assert_eq!(report.pulled, 1);
    assert_eq!(outcomes, vec![AttemptOutcome::Delivered { status: 200 }]);
    assert!(storage.is_empty().await);

    let received = captured.lock().unwrap().clone();
    assert_eq!(received.len(), 1, "exactly one outbound call");
    let delivered = &received[0];
    assert_eq!(delivered.request_line, "POST /hooks/github?delivery=1 HTTP/1.1");
    assert_eq!(delivered.header("Host"), Some("127.0.0.1:28382"));
    assert_eq!(delivered.header("X-Later-Server"), Some("relay.test"));
    assert_eq!(delivered.header("Content-Type"), Some("application/json"));
    assert!(delivered.header("Keep-Alive").is_none());
    assert!(delivered.header("Proxy-Authorization").is_none());
    assert!(delivered.header("X-Later-Host").is_none());
    assert_eq!(delivered.body, br#"{"event":"push"}"#);

    let log = storage.log_entries().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].res.as_ref().map(|r| r.status_code), Some(200));

    shutdown.trigger();
}

#[tokio::test]
async fn test_routing_responses() {
    let storage = Arc::new(MemoryStorage::new("later:"));
    let events = EventBus::default();
    let mut requests = events.subscribe();
    let mut config = local_config();
    config.security.max_body_size = 64;

    let shutdown = start_server(
        config,
        storage.clone(),
        events,
        vec![RuleSpec::new().host("relay.test").port(28383).path("/hooks").method("POST").method("PUT")],
    )
    .await;

    let client = common::test_client();
    let url = |path: &str| format!("http://127.0.0.1:28383{}", path);

    let res = client.post(url("/hooks")).header("Host", "other.test").send().await.unwrap();
    assert_eq!(res.status(), 503);

    let res = client.post(url("/elsewhere")).header("Host", "relay.test").send().await.unwrap();
    assert_eq!(res.status(), 404);

    let res = client.get(url("/hooks")).header("Host", "relay.test").send().await.unwrap();
    assert_eq!(res.status(), 405);
    assert_eq!(res.headers()["allow"], "POST, PUT");

    let res = client
        .post(url("/hooks"))
        .header("Host", "relay.test")
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);

    assert!(storage.is_empty().await);

    // port suffix on Host is ignored; path matches by prefix
    let res = client
        .put(url("/hooks/nested"))
        .header("Host", "relay.test:28383")
        .body("small")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 202);
    assert_eq!(storage.len().await, 1);

    let mut statuses = Vec::new();
    while let Ok(event) = requests.try_recv() {
        if let LaterEvent::Request { status, .. } = event {
            statuses.push(status);
        }
    }
    assert_eq!(statuses, vec![503, 404, 405, 413, 202]);

    shutdown.trigger();
}

#[tokio::test]
async fn test_duplicate_rule_reported_not_registered() {
    let storage = Arc::new(MemoryStorage::default());
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let server = LaterServer::new(local_config(), storage, events);

    let spec = RuleSpec::new().host("dup.test").port(28384).path("/a");
    assert_eq!(server.accept(&spec).len(), 1);
    assert!(server.accept(&spec).is_empty());
    assert_eq!(server.rules().len(), 1);

    assert!(matches!(rx.recv().await.unwrap(), LaterEvent::Accepting { .. }));
    match rx.recv().await.unwrap() {
        LaterEvent::Error { message, .. } => assert!(message.contains("dup.test")),
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hostless_tls_entry_skipped_while_others_register() {
    let dir = std::env::temp_dir().join(format!("later-accept-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let generated = rcgen::generate_simple_self_signed(vec!["nohost.test".to_string()]).unwrap();
    let (cert, key) = (dir.join("cert.pem"), dir.join("key.pem"));
    std::fs::write(&cert, generated.cert.pem()).unwrap();
    std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();

    let config = parse_config(&format!(
        r#"
        [listener]
        bind_address = "127.0.0.1"

        [[accept]]
        port = 28901
        path = "/good"

        [[accept]]
        port = 28902
        tls = {{ cert_path = "{}", key_path = "{}" }}
        "#,
        cert.display(),
        key.display()
    ))
    .expect("rule-level problems must not fail configuration");
    assert_eq!(config.accept.len(), 2);

    let events = EventBus::default();
    let mut rx = events.subscribe();
    let server = LaterServer::new(config.clone(), Arc::new(MemoryStorage::default()), events);
    for accept in &config.accept {
        server.accept_config(accept).await.unwrap();
    }

    assert_eq!(server.rules().len(), 1);
    assert_eq!(server.rules().ports().keys().copied().collect::<Vec<_>>(), vec![28901]);

    let mut errors = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LaterEvent::Error { message, .. } = event {
            errors.push(message);
        }
    }
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("requires a host"), "{}", errors[0]);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_tls_accept_selects_certificate_by_sni() {
    let generated = rcgen::generate_simple_self_signed(vec!["secure.test".to_string()]).unwrap();
    let material = CertificateMaterial::from_pem(
        generated.cert.pem().as_bytes(),
        generated.key_pair.serialize_pem().as_bytes(),
        "secure.test",
    )
    .unwrap();

    let storage = Arc::new(MemoryStorage::new("later:"));
    let shutdown = start_server(
        local_config(),
        storage.clone(),
        EventBus::default(),
        vec![RuleSpec::new().host("secure.test").port(28385).tls(material)],
    )
    .await;

    let addr: SocketAddr = "127.0.0.1:28385".parse().unwrap();
    let client = reqwest::Client::builder()
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .resolve("secure.test", addr)
        .resolve("unknown.test", addr)
        .build()
        .unwrap();

    let res = client
        .post("https://secure.test:28385/anything")
        .body("sealed")
        .send()
        .await
        .expect("TLS accept failed");
    assert_eq!(res.status(), 202);
    assert_eq!(res.headers()["x-later-scheme"], "https");

    let key = res.headers()["x-later-key"].to_str().unwrap().to_string();
    let stored = storage.peek(&key).unwrap();
    assert_eq!(stored.headers.get("X-Later-TLS"), Some("secure"));

    // no certificate for this name: the handshake fails
    let res = client.post("https://unknown.test:28385/anything").send().await;
    assert!(res.is_err());
    assert_eq!(storage.len().await, 1);

    shutdown.trigger();
}
