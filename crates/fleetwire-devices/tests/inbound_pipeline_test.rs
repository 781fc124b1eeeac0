//! Inbound Pipeline Tests
//!
//! Tests the inbound path end to end:
//! - Decoder resolution at start
//! - Event routing and assignment state updates
//! - Per-payload and per-event failure isolation
//

use fleetwire_core::{Lifecycle, LifecycleExt, LifecycleStatus};
use fleetwire_devices::codec::{BinaryEnvelope, BinaryMessage};
use fleetwire_devices::{
    AlertLevel, CodecContext, CodecRegistry, Device, DeviceAssignment, EventKind,
    InMemoryDeviceManagement, InboundPipeline, PipelineConfig, PipelineError,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn management() -> Arc<InMemoryDeviceManagement> {
    let store = Arc::new(InMemoryDeviceManagement::new());
    store.add_device(Device::new("dev-1", "tracker"));
    store.add_device(Device::new("dev-2", "tracker"));
    store.add_assignment(DeviceAssignment::new("asg-1", "dev-1"));
    store
}

fn pipeline(store: &Arc<InMemoryDeviceManagement>, config: PipelineConfig) -> InboundPipeline {
    InboundPipeline::new(
        config,
        Arc::new(CodecRegistry::with_defaults()),
        store.clone(),
    )
}

#[tokio::test]
async fn test_location_and_alert_batch_routes_two_events() {
    let store = management();
    let pipeline = pipeline(&store, PipelineConfig::new("mqtt-json", "json-batch"));
    pipeline.lifecycle_start().await.unwrap();

    let payload = json!({
        "hardwareId": "dev-1",
        "locations": [{"latitude": 33.755, "longitude": -84.39, "elevation": 1000.0}],
        "alerts": [{"level": "Error", "type": "test.error", "message": "boom"}]
    });
    let report = pipeline
        .on_payload(payload.to_string().as_bytes(), &CodecContext::new())
        .await
        .unwrap();

    assert_eq!(report.decoded, 2);
    assert_eq!(report.routed, 2);
    assert!(report.is_complete());

    let events = store.events_for("dev-1");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.hardware_id == "dev-1"));
    assert_eq!(
        events[0].kind,
        EventKind::Location {
            latitude: 33.755,
            longitude: -84.39,
            elevation: Some(1000.0)
        }
    );
    assert_eq!(
        events[1].kind,
        EventKind::Alert {
            level: AlertLevel::Error,
            alert_type: "test.error".into(),
            message: "boom".into()
        }
    );
}

#[tokio::test]
async fn test_missing_decoder_fails_start() {
    let store = management();
    let pipeline = pipeline(&store, PipelineConfig::new("socket", "protobuf"));

    let err = pipeline.lifecycle_start().await.unwrap_err();
    assert!(err.to_string().contains("protobuf"));
    assert_eq!(pipeline.component().status(), LifecycleStatus::Error);
}

#[tokio::test]
async fn test_payload_rejected_when_not_started() {
    let store = management();
    let pipeline = pipeline(&store, PipelineConfig::new("mqtt-json", "json-batch"));

    let err = pipeline
        .on_payload(b"{}", &CodecContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotRunning(_)));
}

#[tokio::test]
async fn test_decode_failure_does_not_block_next_payload() {
    let store = management();
    let pipeline = pipeline(&store, PipelineConfig::new("mqtt-json", "json-batch"));
    pipeline.lifecycle_start().await.unwrap();

    let err = pipeline
        .on_payload(b"not json", &CodecContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Decode(_)));

    let payload = json!({"hardwareId": "dev-2", "measurements": [{"measurements": {"temp": 20.5}}]});
    let report = pipeline
        .on_payload(payload.to_string().as_bytes(), &CodecContext::new())
        .await
        .unwrap();
    assert_eq!(report.routed, 1);

    let metrics = pipeline.metrics();
    assert_eq!(metrics.payloads_received, 2);
    assert_eq!(metrics.decode_failures, 1);
    assert_eq!(metrics.events_routed, 1);
}

#[tokio::test]
async fn test_unknown_device_event_is_isolated() {
    let store = management();
    let pipeline = pipeline(&store, PipelineConfig::new("mqtt-json", "json-batch"));
    pipeline.lifecycle_start().await.unwrap();

    let payload = json!({
        "hardwareId": "ghost",
        "measurements": [{"measurements": {"temp": 1.0}}, {"measurements": {"temp": 2.0}}]
    });
    let report = pipeline
        .on_payload(payload.to_string().as_bytes(), &CodecContext::new())
        .await
        .unwrap();
    assert_eq!(report.decoded, 2);
    assert_eq!(report.routed, 0);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[1].index, 1);
    assert_eq!(pipeline.metrics().routing_failures, 2);
}

#[tokio::test]
async fn test_update_assignment_state_flag() {
    let store = management();
    let pipeline = pipeline(
        &store,
        PipelineConfig::new("binary", "binary").with_update_assignment_state(true),
    );
    pipeline.lifecycle_start().await.unwrap();

    let mut measurements = BTreeMap::new();
    measurements.insert("speed".to_string(), 42.0);
    let envelope = BinaryEnvelope::new("dev-1", BinaryMessage::Measurements(measurements));
    pipeline
        .on_payload(&envelope.to_bytes().unwrap(), &CodecContext::new())
        .await
        .unwrap();

    let state = store.assignment("asg-1").unwrap().state;
    assert_eq!(state.latest_measurements.get("speed"), Some(&42.0));
}

#[tokio::test]
async fn test_concurrent_payloads() {
    let store = management();
    let pipeline = Arc::new(pipeline(&store, PipelineConfig::new("mqtt-json", "json-batch")));
    pipeline.lifecycle_start().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let pipeline = pipeline.clone();
        let hardware_id = if i % 2 == 0 { "dev-1" } else { "dev-2" };
        handles.push(tokio::spawn(async move {
            let payload = json!({
                "hardwareId": hardware_id,
                "measurements": [{"measurements": {"seq": i as f64}}]
            });
            pipeline
                .on_payload(payload.to_string().as_bytes(), &CodecContext::new())
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().routed, 1);
    }
    assert_eq!(store.event_count(), 16);
}
