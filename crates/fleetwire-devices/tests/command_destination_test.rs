//! Command Destination Tests
//!
//! Tests the outbound path:
//! - Resolution of device, assignment and command
//! - Encoding and parameter validation
//! - Delivery through a channel provider
//! - Distinguishing "never sent" from delivery failures
//

use fleetwire_core::config::defaults;
use fleetwire_core::{Coded, ErrorCode, Lifecycle, LifecycleExt};
use fleetwire_devices::codec::{
    BinaryCommandEncoder, BinaryCommandFrame, CodecError, JsonCommandEncoder, TextCommandEncoder,
};
use fleetwire_devices::{
    ChannelDeliveryProvider, CommandDefinition, CommandDelivery, CommandDestination, CommandError,
    CommandInvocation, CommandParameter, Device, DeviceAssignment, InMemoryDeviceManagement,
    NullParameterExtractor, ParameterType, TopicParameterExtractor, TopicParams,
};
use std::sync::Arc;

fn management() -> Arc<InMemoryDeviceManagement> {
    let store = Arc::new(InMemoryDeviceManagement::new());
    store.add_device(Device::new("dev-1", "tracker"));
    store.add_device(Device::new("dev-2", "tracker"));
    store.add_assignment(DeviceAssignment::new("asg-1", "dev-1"));
    store.add_command(
        CommandDefinition::new("cmd-ping", "ping")
            .with_parameter(CommandParameter::new("count", ParameterType::Int32, true)),
    );
    store
}

#[tokio::test]
async fn test_json_delivery_over_channel() {
    let store = management();
    let (provider, mut rx) = ChannelDeliveryProvider::<Vec<u8>, TopicParams>::channel(
        defaults::DELIVERY_CHANNEL_CAPACITY,
    );
    let destination = CommandDestination::new(
        "mqtt",
        JsonCommandEncoder,
        TopicParameterExtractor::default(),
        provider,
        store.clone(),
    );
    destination.lifecycle_start().await.unwrap();

    let invocation = CommandInvocation::new("cmd-ping")
        .with_id("inv-1")
        .with_parameter("count", "3");
    let receipt = destination.deliver("dev-1", &invocation).await.unwrap();
    assert_eq!(receipt.destination_id, "mqtt");
    assert_eq!(receipt.invocation_id, "inv-1");

    let message = rx.recv().await.unwrap();
    assert_eq!(message.params.command_topic, "fleetwire/command/dev-1");
    let body: serde_json::Value = serde_json::from_slice(&message.encoded).unwrap();
    assert_eq!(body["command"], "ping");
    assert_eq!(body["assignmentToken"], "asg-1");
    assert_eq!(body["parameters"]["count"], "3");
    assert_eq!(destination.metrics().delivered, 1);
}

#[tokio::test]
async fn test_resolution_failures_are_never_sent() {
    let store = management();
    let (provider, _rx) = ChannelDeliveryProvider::<Vec<u8>, ()>::channel(4);
    let destination = CommandDestination::new(
        "binary",
        BinaryCommandEncoder,
        NullParameterExtractor,
        provider,
        store.clone(),
    );
    destination.lifecycle_start().await.unwrap();

    let invocation = CommandInvocation::new("cmd-ping").with_parameter("count", "1");

    let err = destination.deliver("ghost", &invocation).await.unwrap_err();
    assert!(matches!(err, CommandError::UnknownDevice(_)));
    assert!(err.never_sent());

    let err = destination.deliver("dev-2", &invocation).await.unwrap_err();
    assert!(matches!(err, CommandError::UnknownAssignment(_)));
    assert_eq!(err.code(), ErrorCode::UnknownAssignment);

    let unknown = CommandInvocation::new("cmd-missing");
    let err = destination.deliver("dev-1", &unknown).await.unwrap_err();
    assert!(matches!(
        err,
        CommandError::Encoding(CodecError::UnknownCommand(_))
    ));

    let missing_param = CommandInvocation::new("cmd-ping");
    let err = destination
        .deliver("dev-1", &missing_param)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Encoding(CodecError::MissingParameter { .. })
    ));
    assert!(err.never_sent());
    assert_eq!(destination.metrics().failed, 4);
}

#[tokio::test]
async fn test_closed_channel_is_delivery_error() {
    let store = management();
    let (provider, rx) = ChannelDeliveryProvider::<Vec<u8>, ()>::channel(1);
    drop(rx);
    let destination = CommandDestination::new(
        "binary",
        BinaryCommandEncoder,
        NullParameterExtractor,
        provider,
        store.clone(),
    );
    destination.lifecycle_start().await.unwrap();

    let invocation = CommandInvocation::new("cmd-ping").with_parameter("count", "1");
    let err = destination.deliver("dev-1", &invocation).await.unwrap_err();
    assert!(matches!(err, CommandError::Delivery(_)));
    assert!(!err.never_sent());
    assert_eq!(err.code(), ErrorCode::DeliveryFailed);
}

#[tokio::test]
async fn test_binary_frame_and_text_destinations() {
    let store = management();
    let (provider, mut rx) = ChannelDeliveryProvider::<Vec<u8>, ()>::channel(1);
    let binary = CommandDestination::new(
        "binary",
        BinaryCommandEncoder,
        NullParameterExtractor,
        provider,
        store.clone(),
    );
    binary.lifecycle_start().await.unwrap();
    let invocation = CommandInvocation::new("cmd-ping")
        .with_id("inv-7")
        .with_parameter("count", "2");
    binary.deliver("dev-1", &invocation).await.unwrap();
    let frame = BinaryCommandFrame::from_bytes(&rx.recv().await.unwrap().encoded).unwrap();
    assert_eq!(frame.invocation_id, "inv-7");
    assert_eq!(frame.parameters.get("count").map(String::as_str), Some("2"));

    let (provider, mut rx) = ChannelDeliveryProvider::<String, ()>::channel(1);
    let sms = CommandDestination::new(
        "sms",
        TextCommandEncoder,
        NullParameterExtractor,
        provider,
        store.clone(),
    );
    sms.lifecycle_start().await.unwrap();
    sms.deliver("dev-1", &invocation).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().encoded, "ping count=2");
}

#[tokio::test]
async fn test_delivery_requires_started() {
    let store = management();
    let (provider, _rx) = ChannelDeliveryProvider::<Vec<u8>, ()>::channel(1);
    let destination = CommandDestination::new(
        "binary",
        BinaryCommandEncoder,
        NullParameterExtractor,
        provider,
        store.clone(),
    );
    let invocation = CommandInvocation::new("cmd-ping").with_parameter("count", "1");
    let err = destination.deliver("dev-1", &invocation).await.unwrap_err();
    assert!(matches!(err, CommandError::NotRunning(_)));

    destination.lifecycle_start().await.unwrap();
    destination.lifecycle_stop().await.unwrap();
    assert!(destination.deliver("dev-1", &invocation).await.is_err());
    assert_eq!(
        destination.component().status(),
        fleetwire_core::LifecycleStatus::Terminated
    );
}
