#![forbid(unsafe_code)]

use std::time::Duration;

use serde_json::json;
use vigil_api::{CollectionOpts, InProcHub, StreamApi, VigilError};
use vigil_core::{EngineConfig, EntityId, Limit, RawFrame};
use vigil_series::{StreamConfig, WindowTarget};

fn hub() -> InProcHub {
    InProcHub::new(EngineConfig {
        batch_interval: Duration::from_millis(5),
        series_batch_interval: Duration::from_millis(5),
        ..Default::default()
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn collection_lifecycle() {
    let hub = hub();
    hub.register_collection("orders", CollectionOpts { limit: Some(Limit(2)), alert: false }).await.unwrap();
    assert_eq!(
        hub.register_collection("orders", CollectionOpts::default()).await.unwrap_err(),
        VigilError::Conflict("orders".into())
    );
    let mut rx = hub.subscribe("orders").unwrap();
    hub.push_frames("orders", vec![RawFrame::Incremental(r#"[{"id": 1, "q": 1}, {"id": 2, "q": 1}, {"id": 3, "q": 1}]"#.into())])
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), rx.changed()).await.unwrap().unwrap();
    let snap = hub.snapshot("orders").unwrap();
    let ids: Vec<_> = snap.items.iter().map(|e| e.id().clone()).collect();
    assert_eq!(ids, vec![EntityId::Num(2), EntityId::Num(3)]);

    hub.unregister_collection("orders").await.unwrap();
    assert_eq!(hub.snapshot("orders").unwrap_err(), VigilError::NotFound("orders".into()));
    assert!(matches!(hub.push_frames("orders", vec![]).await, Err(VigilError::NotFound(_))));
    // The key can be registered again from scratch.
    hub.register_collection("orders", CollectionOpts::default()).await.unwrap();
    assert!(hub.snapshot("orders").unwrap().items.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn alert_collection_orders_by_severity() {
    let hub = hub();
    hub.register_collection("alerts", CollectionOpts { limit: None, alert: true }).await.unwrap();
    let mut rx = hub.subscribe("alerts").unwrap();
    hub.push_frames(
        "alerts",
        vec![RawFrame::Incremental(r#"[{"id": "a", "severity": "WARNING"}, {"id": "b", "severity": "CRITICAL"}]"#.into())],
    )
    .await
    .unwrap();
    tokio::time::timeout(Duration::from_secs(2), rx.changed()).await.unwrap().unwrap();
    let snap = hub.snapshot("alerts").unwrap();
    let ids: Vec<_> = snap.items.iter().map(|e| e.id().to_string()).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_lifecycle() {
    let hub = hub();
    hub.register_stream("pnl", StreamConfig { window: Some(2), ..Default::default() }).await.unwrap();
    assert!(matches!(hub.register_stream("pnl", StreamConfig::default()).await, Err(VigilError::Conflict(_))));
    for item in ["a", "b", "c"] {
        hub.push_points("pnl", vec![json!({"desk": "rates", "series": [item]})]).await.unwrap();
    }
    hub.flush_series().await.unwrap();
    assert_eq!(hub.series("pnl").unwrap().points, vec![json!({"desk": "rates", "series": ["b", "c"]})]);

    hub.set_window(WindowTarget::Stream("pnl".into()), None).await.unwrap();
    let view = hub.series("pnl").unwrap();
    assert_eq!(view.points, vec![json!({"desk": "rates", "series": ["a", "b", "c"]})]);
    assert_eq!(view.window, None);

    assert!(matches!(hub.set_window(WindowTarget::Stream("nope".into()), Some(1)).await, Err(VigilError::NotFound(_))));
    hub.unregister_stream("pnl").await.unwrap();
    hub.flush_series().await.unwrap();
    assert!(hub.series("pnl").is_err());
    assert!(matches!(hub.push_points("pnl", vec![]).await, Err(VigilError::NotFound(_))));
}
