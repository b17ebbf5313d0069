use catalog_collector::{Coordinator, HttpSink};
use catalog_core::{BrokerDescriptor, CatalogStore, PayloadType, Sample, SampleSink, SinkError, SqlCatalogStore};
use catalog_devkit::MockConnector;
use catalog_server::{build_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serve the catalog API over an in-memory store on an ephemeral port.
async fn catalog_server() -> (SocketAddr, Arc<SqlCatalogStore>) {
    let store = Arc::new(SqlCatalogStore::connect("sqlite::memory:").await.unwrap());
    store.migrate().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new(store.clone()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, store)
}

fn sample(broker_id: &str, topic: &str, payload: &[u8]) -> Sample {
    Sample {
        broker_id: broker_id.into(),
        topic: topic.into(),
        payload_type: catalog_core::classify(payload),
        payload: payload.to_vec(),
        timestamp: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn posts_samples_to_the_catalog() {
    let (addr, store) = catalog_server().await;
    let sink = HttpSink::new(&format!("http://{addr}")).unwrap();

    sink.send(&sample("b1", "plant/temp", br#"{"temperature": 22.5}"#))
        .await
        .unwrap();

    let entry = store.get("b1", "plant/temp").await.unwrap().unwrap();
    assert_eq!(entry.payload_type, PayloadType::Json);
    assert_eq!(entry.sample_payload, br#"{"temperature": 22.5}"#);
}

#[tokio::test]
async fn binary_payload_survives_the_wire() {
    let (addr, store) = catalog_server().await;
    let sink = HttpSink::new(&format!("http://{addr}/")).unwrap();

    sink.send(&sample("b1", "camera/frame", &[0xFF, 0xD8, 0xFF, 0xE0]))
        .await
        .unwrap();

    let entry = store.get("b1", "camera/frame").await.unwrap().unwrap();
    assert_eq!(entry.payload_type, PayloadType::Binary);
    assert_eq!(entry.sample_payload, vec![0xFF, 0xD8, 0xFF, 0xE0]);
}

#[tokio::test]
async fn rejected_sample_reports_status() {
    let (addr, _) = catalog_server().await;
    let sink = HttpSink::new(&format!("http://{addr}")).unwrap();

    let err = sink.send(&sample("", "orphan/topic", b"x")).await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected { status: 400, .. }));
}

#[tokio::test]
async fn unreachable_catalog_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = HttpSink::new(&format!("http://{addr}")).unwrap();
    let err = sink.send(&sample("b1", "t", b"x")).await.unwrap_err();
    assert!(matches!(err, SinkError::Transport(_)));
}

#[tokio::test]
async fn collection_feeds_a_remote_catalog() {
    let (addr, store) = catalog_server().await;
    let connector = Arc::new(MockConnector::new());

    let broker = connector.broker("factory");
    broker.publish("line1/speed", "1200");
    broker.publish("line1/speed", "1250");
    broker.publish("line1/config", "<config><mode>auto</mode></config>");
    broker.close();

    let coordinator = Coordinator::new(
        vec![BrokerDescriptor::new("factory", "tcp://factory.mock:1883")],
        Duration::from_secs(10),
        connector,
        Arc::new(HttpSink::new(&format!("http://{addr}")).unwrap()),
    )
    .unwrap();
    let summary = coordinator.run(&CancellationToken::new()).await;

    assert_eq!(summary.reports[0].samples_delivered, 2);
    let speed = store.get("factory", "line1/speed").await.unwrap().unwrap();
    assert_eq!(speed.payload_type, PayloadType::Text);
    let config = store.get("factory", "line1/config").await.unwrap().unwrap();
    assert_eq!(config.payload_type, PayloadType::Xml);
}
