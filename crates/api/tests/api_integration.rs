//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use api::Stores;
use api::config::Config;
use api::consumer::{RollbackConsumer, VerifyConsumer};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::Category;
use event_bus::{
    AckKind, Broker, CircuitBreakerRegistry, Event, EventKind, InMemoryBroker, Message, Priority,
    Provider, Transaction, keys,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryObjectStore, InMemoryRepository, RepoOp};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    categories: InMemoryRepository<Category>,
    objects: InMemoryObjectStore,
    broker: InMemoryBroker,
    stores: Stores,
    breakers: Arc<CircuitBreakerRegistry>,
    config: Config,
}

fn setup() -> TestApp {
    let config = Config {
        publish_timeout: Duration::from_millis(500),
        ..Config::default()
    };
    let categories = InMemoryRepository::<Category>::new();
    let objects = InMemoryObjectStore::new();
    let stores = Stores {
        categories: Arc::new(categories.clone()),
        objects: Arc::new(objects.clone()),
        ..Stores::in_memory()
    };
    let broker = InMemoryBroker::new();
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_config()));

    let state = api::create_state(
        &config,
        &stores,
        Arc::new(broker.clone()),
        breakers.clone(),
        CancellationToken::new(),
    );
    let app = api::create_app(state, get_metrics_handle());

    TestApp {
        app,
        categories,
        objects,
        broker,
        stores,
        breakers,
        config,
    }
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

async fn create_category(app: &axum::Router, name: &str) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/categories",
        Some(serde_json::json!({ "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let t = setup();
    let (status, json) = send(&t.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "category");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup();
    create_category(&t.app, "metrics").await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

async fn wait_for_settlements(broker: &InMemoryBroker, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.settlements().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("deliveries were not settled in time");
}

mod categories {
    use super::*;

    #[tokio::test]
    async fn create_and_get() {
        let t = setup();
        let id = create_category(&t.app, "science fiction").await;

        let (status, json) = send(&t.app, "GET", &format!("/categories/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Science Fiction");
        assert_eq!(json["active"], true);
        assert_eq!(t.broker.sent_to("CATEGORY_CREATED").len(), 1);
    }

    #[tokio::test]
    async fn empty_name_is_a_bad_request() {
        let t = setup();
        let (status, json) = send(
            &t.app,
            "POST",
            "/categories",
            Some(serde_json::json!({ "name": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "missing required request field name");
        assert!(t.categories.calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_is_a_conflict() {
        let t = setup();
        create_category(&t.app, "poetry").await;
        let (status, _) = send(
            &t.app,
            "POST",
            "/categories",
            Some(serde_json::json!({ "name": "POETRY" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_category_is_not_found() {
        let t = setup();
        let (status, json) = send(&t.app, "GET", "/categories/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn patch_renames() {
        let t = setup();
        let id = create_category(&t.app, "poetry").await;

        let (status, json) = send(
            &t.app,
            "PATCH",
            &format!("/categories/{id}"),
            Some(serde_json::json!({ "name": "modern poetry" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Modern Poetry");
        assert_eq!(json["id"], id.as_str());
    }

    #[tokio::test]
    async fn delete_restore_and_purge() {
        let t = setup();
        let id = create_category(&t.app, "drama").await;
        let uri = format!("/categories/{id}");

        let (status, _) = send(&t.app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&t.app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&t.app, "POST", &format!("{uri}/restore"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&t.app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&t.app, "DELETE", &format!("{uri}/permanent"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(t.categories.is_empty());
        assert_eq!(t.broker.sent_to("CATEGORY_PERMANENTLY_REMOVED").len(), 1);
    }

    #[tokio::test]
    async fn failed_publish_leaves_nothing_behind() {
        let t = setup();
        t.broker.set_fail_on_send(true);

        let (status, json) = send(
            &t.app,
            "POST",
            "/categories",
            Some(serde_json::json!({ "name": "lost" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().starts_with("Publish error"));
        assert!(t.categories.is_empty());
        assert_eq!(t.categories.call_count(RepoOp::HardRemove), 1);
    }
}

mod blobs {
    use super::*;

    #[tokio::test]
    async fn upload_get_and_erase() {
        let t = setup();
        let (status, json) = send(
            &t.app,
            "POST",
            "/blobs/media/clip1",
            Some(serde_json::json!({
                "blob_type": "video",
                "extension": "MP4",
                "size": 1_000_000,
                "content": "aGVsbG8=",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], "clip1");
        assert_eq!(json["name"], "clip1.mp4");
        assert_eq!(
            json["url"],
            "https://cdn.example.com/blobs/media/clip1.mp4"
        );
        assert!(t.objects.contains("clip1.mp4", "media"));
        assert_eq!(t.broker.sent_to("MEDIA_BLOB_UPLOADED").len(), 1);

        let (status, json) = send(&t.app, "GET", "/blobs/media/clip1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["size"], 1_000_000);

        let (status, _) = send(&t.app, "DELETE", "/blobs/media/clip1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(t.objects.is_empty());

        let (status, _) = send(&t.app, "GET", "/blobs/media/clip1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_video_is_rejected() {
        let t = setup();
        let (status, json) = send(
            &t.app,
            "POST",
            "/blobs/media/clip1",
            Some(serde_json::json!({
                "blob_type": "video",
                "extension": "mp4",
                "size": "9000000000",
                "content": "",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("field file"));
        assert!(t.objects.calls().is_empty());
        assert!(t.broker.sent().is_empty());
    }

    #[tokio::test]
    async fn wrong_extension_for_scope() {
        let t = setup();
        let (status, json) = send(
            &t.app,
            "POST",
            "/blobs/user/avatar",
            Some(serde_json::json!({
                "blob_type": "image",
                "extension": "png",
                "size": 1024,
                "content": "",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("jpeg"));
    }

    #[tokio::test]
    async fn invalid_base64_is_a_bad_request() {
        let t = setup();
        let (status, json) = send(
            &t.app,
            "POST",
            "/blobs/author/portrait",
            Some(serde_json::json!({
                "blob_type": "image",
                "extension": "jpeg",
                "size": 10,
                "content": "***",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("content"));
        assert!(t.objects.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_service_is_a_bad_request() {
        let t = setup();
        let (status, _) = send(&t.app, "GET", "/blobs/telemetry/x", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

mod verify_consumer {
    use super::*;

    fn verify_request(ids: &[&str]) -> Message {
        let event = Event::new(
            "media",
            EventKind::Integration,
            Priority::High,
            Provider::memory(),
            serde_json::to_vec(ids).unwrap(),
        );
        Message::encode(
            "CATEGORY_VERIFY",
            event,
            &Transaction::new("0003book", "MEDIA_CREATED"),
        )
    }

    async fn start(t: &TestApp, shutdown: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let shared: Arc<dyn Broker> = Arc::new(t.broker.clone());
        let verifier = api::create_verifier(&t.config, &t.stores, shared.clone(), t.breakers.clone());
        let subscription = shared.subscribe("CATEGORY_VERIFY").await.unwrap();
        let consumer = VerifyConsumer::new(verifier, shared);
        tokio::spawn(consumer.consume(subscription, shutdown.clone()))
    }

    #[tokio::test]
    async fn answers_and_acks() {
        let t = setup();
        let shutdown = CancellationToken::new();
        let handle = start(&t, &shutdown).await;

        let id = create_category(&t.app, "poetry").await;
        t.broker.send(verify_request(&[&id])).await.unwrap();
        wait_for_settlements(&t.broker, 1).await;

        let verified = t.broker.sent_to("MEDIA_CATEGORY_VERIFIED");
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].get(keys::STATUS_CODE), Some("200"));
        assert_eq!(t.broker.settlements()[0].kind, AckKind::Ack);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn missing_id_fails_and_acks() {
        let t = setup();
        let shutdown = CancellationToken::new();
        let handle = start(&t, &shutdown).await;

        t.broker.send(verify_request(&["ghost"])).await.unwrap();
        wait_for_settlements(&t.broker, 1).await;

        let failed = t.broker.sent_to("MEDIA_CATEGORY_FAILED");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status_code(), Some(404));
        assert_eq!(t.broker.settlements()[0].kind, AckKind::Ack);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn outcome_transport_failure_is_redelivered() {
        let t = setup();
        t.broker.set_fail_on_topic("MEDIA_CATEGORY_VERIFIED", true);
        t.broker.set_max_redeliveries(Some(1));
        let shutdown = CancellationToken::new();
        let handle = start(&t, &shutdown).await;

        t.broker.send(verify_request(&[])).await.unwrap();
        wait_for_settlements(&t.broker, 2).await;

        let settlements = t.broker.settlements();
        assert_eq!(settlements[0].kind, AckKind::Nack);
        assert_eq!(settlements[0].attempt, 1);
        assert_eq!(settlements[1].attempt, 2);

        shutdown.cancel();
        handle.await.unwrap();
    }
}

mod rollback_consumer {
    use super::*;

    async fn start(t: &TestApp, shutdown: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let shared: Arc<dyn Broker> = Arc::new(t.broker.clone());
        let state = api::create_state(
            &t.config,
            &t.stores,
            shared.clone(),
            t.breakers.clone(),
            CancellationToken::new(),
        );
        let subscription = shared.subscribe("MEDIA_BLOB_FAILED").await.unwrap();
        let consumer = RollbackConsumer::new(state.blobs.clone(), shared);
        tokio::spawn(consumer.consume(subscription, shutdown.clone()))
    }

    fn failure_report(uploaded: &Message) -> Message {
        let event = Event::new(
            "media",
            EventKind::Integration,
            Priority::High,
            Provider::memory(),
            b"unreadable video".to_vec(),
        );
        let transaction = uploaded.transaction().unwrap().child("BLOB_FAILED");
        Message::encode("MEDIA_BLOB_FAILED", event, &transaction)
    }

    async fn upload(t: &TestApp, size: u64) {
        let (status, _) = send(
            &t.app,
            "POST",
            "/blobs/media/clip1",
            Some(serde_json::json!({
                "blob_type": "video",
                "extension": "mp4",
                "size": size,
                "content": "aGVsbG8=",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn rejected_create_is_erased_and_acked() {
        let t = setup();
        let shutdown = CancellationToken::new();
        let handle = start(&t, &shutdown).await;

        upload(&t, 1_000).await;
        let uploaded = t.broker.sent_to("MEDIA_BLOB_UPLOADED").remove(0);
        t.broker.send(failure_report(&uploaded)).await.unwrap();
        wait_for_settlements(&t.broker, 1).await;

        assert_eq!(t.broker.settlements()[0].kind, AckKind::Ack);
        let (status, _) = send(&t.app, "GET", "/blobs/media/clip1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(t.objects.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_update_restores_previous_row() {
        let t = setup();
        let shutdown = CancellationToken::new();
        let handle = start(&t, &shutdown).await;

        upload(&t, 1_000).await;
        upload(&t, 2_000).await;
        let uploaded = t.broker.sent_to("MEDIA_BLOB_UPLOADED").remove(1);
        t.broker.send(failure_report(&uploaded)).await.unwrap();
        wait_for_settlements(&t.broker, 1).await;

        assert_eq!(t.broker.settlements()[0].kind, AckKind::Ack);
        let (status, json) = send(&t.app, "GET", "/blobs/media/clip1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["size"], 1_000);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn report_for_unknown_blob_is_acked() {
        let t = setup();
        let shutdown = CancellationToken::new();
        let handle = start(&t, &shutdown).await;

        let event = Event::new(
            "media",
            EventKind::Integration,
            Priority::High,
            Provider::memory(),
            Vec::new(),
        );
        let report = Message::encode(
            "MEDIA_BLOB_FAILED",
            event,
            &Transaction::new("0003ghost", "BLOB_FAILED"),
        );
        t.broker.send(report).await.unwrap();
        wait_for_settlements(&t.broker, 1).await;

        assert_eq!(t.broker.settlements()[0].kind, AckKind::Ack);
        shutdown.cancel();
        handle.await.unwrap();
    }
}
