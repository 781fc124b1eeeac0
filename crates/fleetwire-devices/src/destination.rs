//! Command destinations.
//!
//! A [`CommandDestination`] pairs an encoder, a parameter extractor and a
//! delivery provider. The provider must accept exactly what the encoder
//! produces and what the extractor derives; the associated types enforce
//! that at compile time.
//!
//! Delivery is fire-and-record: nothing is retried here. Callers tell "never
//! sent" from "sent, ack unknown" with [`CommandError::never_sent`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwire_core::config::{defaults, expand_topic};
use fleetwire_core::lifecycle::{self, Lifecycle, LifecycleComponent, LifecycleError};
use fleetwire_core::{Coded, ComponentType, ErrorCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::{CodecContext, CodecError, CommandEncoder};
use crate::management::{DynDeviceManagement, ManagementError};
use crate::model::{CommandExecution, CommandInvocation, Device, DeviceAssignment};

/// Errors raised by a delivery provider.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery channel closed: {0}")]
    ChannelClosed(String),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Delivery error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Coded for DeliveryError {
    fn code(&self) -> ErrorCode {
        ErrorCode::DeliveryFailed
    }
}

/// Errors raised while delivering one command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command destination '{0}' is not running")]
    NotRunning(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown assignment: {0}")]
    UnknownAssignment(String),

    #[error("Parameter extraction failed: {0}")]
    Extraction(String),

    #[error("Encoding failed: {0}")]
    Encoding(#[from] CodecError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Device management error: {0}")]
    Management(#[from] ManagementError),

    #[error("No command destination mapping for specification: {0}")]
    NoRoute(String),

    #[error("No destination found for destination id: {0}")]
    UnknownDestination(String),

    #[error("Destination already registered: {0}")]
    DuplicateDestination(String),
}

impl CommandError {
    /// Whether the command definitely never reached the transport.
    pub fn never_sent(&self) -> bool {
        !matches!(self, CommandError::Delivery(_))
    }
}

impl Coded for CommandError {
    fn code(&self) -> ErrorCode {
        match self {
            CommandError::NotRunning(_) => ErrorCode::ComponentNotRunning,
            CommandError::UnknownDevice(_) => ErrorCode::UnknownDevice,
            CommandError::UnknownAssignment(_) => ErrorCode::UnknownAssignment,
            CommandError::Extraction(_) => ErrorCode::Configuration,
            CommandError::Encoding(e) => e.code(),
            CommandError::Delivery(_) => ErrorCode::DeliveryFailed,
            CommandError::Management(e) => e.code(),
            CommandError::NoRoute(_)
            | CommandError::UnknownDestination(_)
            | CommandError::DuplicateDestination(_) => ErrorCode::Configuration,
        }
    }
}

/// Derives transport parameters for one command.
pub trait ParameterExtractor: Send + Sync {
    type Params: Send + 'static;

    fn extract(
        &self,
        device: &Device,
        assignment: &DeviceAssignment,
        execution: &CommandExecution,
    ) -> Result<Self::Params, CommandError>;
}

/// Hands encoded commands to a transport.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    type Encoded: Send + 'static;
    type Params: Send + 'static;

    async fn deliver(&self, encoded: Self::Encoded, params: Self::Params)
        -> Result<(), DeliveryError>;

    async fn start(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Record of a command handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub destination_id: String,
    pub invocation_id: String,
    pub hardware_id: String,
    pub delivered_at: DateTime<Utc>,
}

/// Type-erased view of a destination.
#[async_trait]
pub trait CommandDelivery: Send + Sync {
    fn destination_id(&self) -> &str;

    async fn deliver(
        &self,
        hardware_id: &str,
        invocation: &CommandInvocation,
    ) -> Result<DeliveryReceipt, CommandError>;
}

pub type DynCommandDelivery = Arc<dyn CommandDelivery>;

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationMetrics {
    pub delivered: u64,
    pub failed: u64,
}

/// Outbound path for command invocations.
pub struct CommandDestination<E, X, D>
where
    E: CommandEncoder,
    X: ParameterExtractor,
    D: DeliveryProvider<Encoded = E::Encoded, Params = X::Params>,
{
    component: LifecycleComponent,
    destination_id: String,
    encoder: E,
    extractor: X,
    provider: D,
    management: DynDeviceManagement,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl<E, X, D> CommandDestination<E, X, D>
where
    E: CommandEncoder,
    X: ParameterExtractor,
    D: DeliveryProvider<Encoded = E::Encoded, Params = X::Params>,
{
    pub fn new(
        destination_id: impl Into<String>,
        encoder: E,
        extractor: X,
        provider: D,
        management: DynDeviceManagement,
    ) -> Self {
        let destination_id = destination_id.into();
        Self {
            component: LifecycleComponent::new(
                format!("destination:{}", destination_id),
                ComponentType::CommandDestination,
            ),
            destination_id,
            encoder,
            extractor,
            provider,
            management,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> DestinationMetrics {
        DestinationMetrics {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn resolve(
        &self,
        hardware_id: &str,
        invocation: &CommandInvocation,
    ) -> Result<(Device, DeviceAssignment, CommandExecution), CommandError> {
        let device = self
            .management
            .get_device(hardware_id)
            .await?
            .ok_or_else(|| CommandError::UnknownDevice(hardware_id.to_string()))?;
        let token = device.assignment_token.clone().ok_or_else(|| {
            CommandError::UnknownAssignment(format!(
                "Device '{}' is not currently assigned",
                hardware_id
            ))
        })?;
        let assignment = self
            .management
            .get_assignment(&token)
            .await?
            .ok_or_else(|| CommandError::UnknownAssignment(token.clone()))?;
        let command = self
            .management
            .get_command(&invocation.command_token)
            .await?
            .ok_or_else(|| CodecError::UnknownCommand(invocation.command_token.clone()))?;

        let execution = CommandExecution {
            command,
            invocation: invocation.clone(),
            hardware_id: hardware_id.to_string(),
            assignment_token: token,
        };
        Ok((device, assignment, execution))
    }

    async fn send(
        &self,
        hardware_id: &str,
        invocation: &CommandInvocation,
    ) -> Result<DeliveryReceipt, CommandError> {
        let (device, assignment, execution) = self.resolve(hardware_id, invocation).await?;
        let params = self.extractor.extract(&device, &assignment, &execution)?;

        let mut context = CodecContext::new();
        context.insert("destinationId".to_string(), self.destination_id.clone());
        let encoded = self.encoder.encode(&execution, &context)?;

        self.provider.deliver(encoded, params).await?;
        Ok(DeliveryReceipt {
            destination_id: self.destination_id.clone(),
            invocation_id: invocation.id.clone(),
            hardware_id: hardware_id.to_string(),
            delivered_at: Utc::now(),
        })
    }
}

#[async_trait]
impl<E, X, D> CommandDelivery for CommandDestination<E, X, D>
where
    E: CommandEncoder,
    X: ParameterExtractor,
    D: DeliveryProvider<Encoded = E::Encoded, Params = X::Params>,
{
    fn destination_id(&self) -> &str {
        &self.destination_id
    }

    async fn deliver(
        &self,
        hardware_id: &str,
        invocation: &CommandInvocation,
    ) -> Result<DeliveryReceipt, CommandError> {
        if !self.component.is_started() {
            return Err(CommandError::NotRunning(self.destination_id.clone()));
        }
        match self.send(hardware_id, invocation).await {
            Ok(receipt) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    destination = %self.destination_id,
                    hardware_id,
                    invocation = %invocation.id,
                    "Command delivered"
                );
                Ok(receipt)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    destination = %self.destination_id,
                    hardware_id,
                    invocation = %invocation.id,
                    never_sent = e.never_sent(),
                    error = %e,
                    "Command delivery failed"
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<E, X, D> Lifecycle for CommandDestination<E, X, D>
where
    E: CommandEncoder,
    X: ParameterExtractor,
    D: DeliveryProvider<Encoded = E::Encoded, Params = X::Params>,
{
    fn component(&self) -> &LifecycleComponent {
        &self.component
    }

    async fn on_start(&self) -> lifecycle::Result<()> {
        self.provider
            .start()
            .await
            .map_err(|e| LifecycleError::Failed {
                component: self.component.name().to_string(),
                reason: e.to_string(),
            })
    }

    async fn on_stop(&self) -> lifecycle::Result<()> {
        self.provider
            .stop()
            .await
            .map_err(|e| LifecycleError::Failed {
                component: self.component.name().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Command and system topics for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicParams {
    pub command_topic: String,
    pub system_topic: String,
}

/// Builds topics from `{hardware_id}` templates.
#[derive(Debug, Clone)]
pub struct TopicParameterExtractor {
    command_template: String,
    system_template: String,
}

impl Default for TopicParameterExtractor {
    fn default() -> Self {
        Self::new(defaults::COMMAND_TOPIC, defaults::SYSTEM_TOPIC)
    }
}

impl TopicParameterExtractor {
    pub fn new(command_template: impl Into<String>, system_template: impl Into<String>) -> Self {
        Self {
            command_template: command_template.into(),
            system_template: system_template.into(),
        }
    }
}

impl ParameterExtractor for TopicParameterExtractor {
    type Params = TopicParams;

    fn extract(
        &self,
        device: &Device,
        _assignment: &DeviceAssignment,
        _execution: &CommandExecution,
    ) -> Result<TopicParams, CommandError> {
        if device.hardware_id.contains(['/', '+', '#']) {
            return Err(CommandError::Extraction(format!(
                "Hardware id '{}' cannot be used in a topic",
                device.hardware_id
            )));
        }
        Ok(TopicParams {
            command_topic: expand_topic(&self.command_template, &device.hardware_id),
            system_topic: expand_topic(&self.system_template, &device.hardware_id),
        })
    }
}

/// For transports that need no per-device parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullParameterExtractor;

impl ParameterExtractor for NullParameterExtractor {
    type Params = ();

    fn extract(
        &self,
        _device: &Device,
        _assignment: &DeviceAssignment,
        _execution: &CommandExecution,
    ) -> Result<(), CommandError> {
        Ok(())
    }
}

/// One message handed to a transport binding.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage<E, P> {
    pub encoded: E,
    pub params: P,
}

/// Delivers into a bounded channel read by the transport binding.
///
/// Dropping an in-flight `deliver` future loses at most that message.
pub struct ChannelDeliveryProvider<E, P> {
    sender: mpsc::Sender<OutboundMessage<E, P>>,
}

impl<E, P> ChannelDeliveryProvider<E, P>
where
    E: Send + 'static,
    P: Send + 'static,
{
    /// Provider plus the receiving end for the transport.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage<E, P>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl<E, P> DeliveryProvider for ChannelDeliveryProvider<E, P>
where
    E: Send + 'static,
    P: Send + 'static,
{
    type Encoded = E;
    type Params = P;

    async fn deliver(&self, encoded: E, params: P) -> Result<(), DeliveryError> {
        self.sender
            .send(OutboundMessage { encoded, params })
            .await
            .map_err(|_| DeliveryError::ChannelClosed("transport receiver dropped".to_string()))
    }
}
