//! FleetWire device-event pipeline.
//!
//! ## Architecture
//!
//! - **codec**: decoders (`payload -> [DecodedEvent]`) and encoders
//!   (`command -> encoding`), registered by kind in a `CodecRegistry`
//! - **inbound**: `InboundPipeline`, decodes payloads and routes events to
//!   the device-management collaborator
//! - **destination**: `CommandDestination`, the outbound path (encoder +
//!   parameter extractor + delivery provider)
//! - **router**: `CommandRouter`, picks a destination per device
//!   specification
//! - **batch**: `BatchOperationManager`, applies a command or state update
//!   to a resolved device set with per-element tracking
//! - **management**: collaborator traits (`DeviceManagement`, `DeviceGroups`)
//! - **memory**: in-memory collaborators for tests and standalone use
//!
//! Every long-lived component implements `fleetwire_core::Lifecycle`.

pub mod batch;
pub mod codec;
pub mod destination;
pub mod inbound;
pub mod management;
pub mod memory;
pub mod model;
pub mod router;

pub use batch::{
    BatchAction, BatchCriteria, BatchElement, BatchError, BatchOperation, BatchOperationManager,
    BatchRequest, BatchTargets, ElementStatus, OperationStatus,
};
pub use codec::{
    CodecContext, CodecError, CodecRegistry, CommandEncoder, DynEventDecoder, EventDecoder,
};
pub use destination::{
    ChannelDeliveryProvider, CommandDelivery, CommandDestination, CommandError, DeliveryError,
    DeliveryProvider, DeliveryReceipt, DynCommandDelivery, NullParameterExtractor,
    OutboundMessage, ParameterExtractor, TopicParameterExtractor, TopicParams,
};
pub use inbound::{InboundPipeline, PayloadReport, PipelineConfig, PipelineError, PipelineMetrics};
pub use management::{
    DeviceGroups, DeviceManagement, DeviceSearchCriteria, DynDeviceGroups, DynDeviceManagement,
    ManagementError, PagedResult,
};
pub use memory::InMemoryDeviceManagement;
pub use model::{
    AlertLevel, CommandDefinition, CommandExecution, CommandInitiator, CommandInvocation,
    CommandParameter, DecodedEvent, Device, DeviceAssignment, EventKind, ParameterType,
    StoredEvent,
};
pub use router::CommandRouter;
