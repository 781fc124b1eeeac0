//! Inbound event pipeline.
//!
//! A pipeline owns one payload kind for one source. Transport tasks call
//! [`InboundPipeline::on_payload`] concurrently; every payload is decoded
//! and its events are routed to the device-management collaborator. A
//! failing payload or event never blocks the ones after it.

use async_trait::async_trait;
use fleetwire_core::config::context_keys;
use fleetwire_core::lifecycle::{self, Lifecycle, LifecycleComponent, LifecycleError};
use fleetwire_core::{Coded, ComponentType, ErrorCode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::codec::{CodecContext, CodecError, CodecRegistry, DynEventDecoder};
use crate::management::{DynDeviceManagement, ManagementError};
use crate::model::DecodedEvent;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline '{0}' is not running")]
    NotRunning(String),

    #[error("Decode failed: {0}")]
    Decode(#[from] CodecError),
}

impl Coded for PipelineError {
    fn code(&self) -> ErrorCode {
        match self {
            PipelineError::NotRunning(_) => ErrorCode::ComponentNotRunning,
            PipelineError::Decode(e) => e.code(),
        }
    }
}

/// Static settings of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub source_id: String,
    pub payload_kind: String,
    /// Treat every decoded event as state-updating.
    #[serde(default)]
    pub update_assignment_state: bool,
}

impl PipelineConfig {
    pub fn new(source_id: impl Into<String>, payload_kind: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            payload_kind: payload_kind.into(),
            update_assignment_state: false,
        }
    }

    pub fn with_update_assignment_state(mut self, enabled: bool) -> Self {
        self.update_assignment_state = enabled;
        self
    }
}

/// An event of a payload that could not be routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingFailure {
    /// Position of the event in the decoded list.
    pub index: usize,
    pub hardware_id: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of one payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadReport {
    pub decoded: usize,
    pub routed: usize,
    pub failures: Vec<RoutingFailure>,
}

impl PayloadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    pub payloads_received: u64,
    pub events_decoded: u64,
    pub events_routed: u64,
    pub decode_failures: u64,
    pub routing_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    payloads_received: AtomicU64,
    events_decoded: AtomicU64,
    events_routed: AtomicU64,
    decode_failures: AtomicU64,
    routing_failures: AtomicU64,
}

/// Decodes payloads of one kind and routes the events.
pub struct InboundPipeline {
    component: LifecycleComponent,
    config: PipelineConfig,
    registry: Arc<CodecRegistry>,
    management: DynDeviceManagement,
    decoder: RwLock<Option<DynEventDecoder>>,
    counters: Counters,
}

impl InboundPipeline {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<CodecRegistry>,
        management: DynDeviceManagement,
    ) -> Self {
        let name = format!("inbound:{}", config.source_id);
        Self {
            component: LifecycleComponent::new(name, ComponentType::InboundPipeline),
            config,
            registry,
            management,
            decoder: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            payloads_received: self.counters.payloads_received.load(Ordering::Relaxed),
            events_decoded: self.counters.events_decoded.load(Ordering::Relaxed),
            events_routed: self.counters.events_routed.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            routing_failures: self.counters.routing_failures.load(Ordering::Relaxed),
        }
    }

    /// Decode one payload and route every resulting event.
    ///
    /// A decode failure is returned to the caller, which decides whether to
    /// drop, dead-letter or retry. Routing failures are isolated per event
    /// and listed in the report.
    pub async fn on_payload(
        &self,
        payload: &[u8],
        context: &CodecContext,
    ) -> Result<PayloadReport, PipelineError> {
        if !self.component.is_started() {
            return Err(PipelineError::NotRunning(self.config.source_id.clone()));
        }
        let decoder = self
            .decoder
            .read()
            .clone()
            .ok_or_else(|| PipelineError::NotRunning(self.config.source_id.clone()))?;

        self.counters.payloads_received.fetch_add(1, Ordering::Relaxed);

        let mut context = context.clone();
        context
            .entry(context_keys::SOURCE_ID.to_string())
            .or_insert_with(|| self.config.source_id.clone());

        let events = match decoder.decode(payload, &context) {
            Ok(events) => events,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    source = %self.config.source_id,
                    decoder = decoder.name(),
                    bytes = payload.len(),
                    error = %e,
                    "Event decode failed"
                );
                return Err(e.into());
            }
        };
        self.counters
            .events_decoded
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        let mut report = PayloadReport {
            decoded: events.len(),
            ..Default::default()
        };
        for (index, mut event) in events.into_iter().enumerate() {
            event.update_state |= self.config.update_assignment_state;
            match self.route(&event).await {
                Ok(()) => {
                    report.routed += 1;
                    self.counters.events_routed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.routing_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        source = %self.config.source_id,
                        hardware_id = %event.hardware_id,
                        kind = event.kind.name(),
                        error = %e,
                        "Event routing failed"
                    );
                    report.failures.push(RoutingFailure {
                        index,
                        hardware_id: event.hardware_id.clone(),
                        code: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn route(&self, event: &DecodedEvent) -> Result<(), ManagementError> {
        let stored = self
            .management
            .create_event(&event.hardware_id, event)
            .await?;
        tracing::debug!(
            hardware_id = %event.hardware_id,
            event_id = %stored.id,
            kind = event.kind.name(),
            "Event routed"
        );
        if event.update_state {
            self.management
                .update_assignment_state(&event.hardware_id, &stored)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for InboundPipeline {
    fn component(&self) -> &LifecycleComponent {
        &self.component
    }

    async fn on_start(&self) -> lifecycle::Result<()> {
        let decoder = self.registry.decoder(&self.config.payload_kind).ok_or_else(|| {
            LifecycleError::Configuration(format!(
                "No decoder registered for payload kind '{}' (source '{}')",
                self.config.payload_kind, self.config.source_id
            ))
        })?;
        tracing::info!(
            source = %self.config.source_id,
            kind = %self.config.payload_kind,
            decoder = decoder.name(),
            "Inbound pipeline ready"
        );
        *self.decoder.write() = Some(decoder);
        Ok(())
    }

    async fn on_stop(&self) -> lifecycle::Result<()> {
        *self.decoder.write() = None;
        Ok(())
    }
}
