//! Explicit assembly of the FleetWire component tree.

use anyhow::{Context, Result};
use fleetwire_assets::{AssetModule, AssetModuleManager, JsonFileAssetSource};
use fleetwire_core::{DynLifecycle, Supervisor};
use fleetwire_devices::codec::JsonCommandEncoder;
use fleetwire_devices::{
    BatchOperationManager, ChannelDeliveryProvider, CodecRegistry, CommandDefinition,
    CommandDestination, CommandRouter, Device, DeviceAssignment, InMemoryDeviceManagement,
    InboundPipeline, OutboundMessage, PipelineConfig, TopicParameterExtractor, TopicParams,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::FleetConfig;

pub type TopicDestination = CommandDestination<
    JsonCommandEncoder,
    TopicParameterExtractor,
    ChannelDeliveryProvider<Vec<u8>, TopicParams>,
>;

/// Every component of one FleetWire instance, rooted at `supervisor`.
pub struct FleetContext {
    pub supervisor: Arc<Supervisor>,
    pub management: Arc<InMemoryDeviceManagement>,
    pub registry: Arc<CodecRegistry>,
    pub pipelines: Vec<Arc<InboundPipeline>>,
    pub destination: Arc<TopicDestination>,
    pub router: Arc<CommandRouter>,
    pub batch: Arc<BatchOperationManager>,
    pub assets: Arc<AssetModuleManager>,
    outbound: JoinHandle<()>,
}

impl FleetContext {
    /// Build (but do not start) the component tree described by `config`.
    pub fn build(config: &FleetConfig) -> Result<Self> {
        let management = Arc::new(InMemoryDeviceManagement::new());
        seed(&management, config);

        let registry = Arc::new(CodecRegistry::with_defaults());
        let supervisor = Arc::new(Supervisor::new("fleetwire"));

        let pipelines: Vec<Arc<InboundPipeline>> = config
            .pipelines
            .iter()
            .map(|section| {
                let pipeline_config =
                    PipelineConfig::new(&section.source_id, &section.payload_kind)
                        .with_update_assignment_state(section.update_assignment_state);
                Arc::new(InboundPipeline::new(
                    pipeline_config,
                    registry.clone(),
                    management.clone(),
                ))
            })
            .collect();
        for pipeline in &pipelines {
            supervisor.add_child(pipeline.clone() as DynLifecycle);
        }

        let (provider, receiver) =
            ChannelDeliveryProvider::channel(config.destination.channel_capacity);
        let destination = Arc::new(CommandDestination::new(
            config.destination.id.clone(),
            JsonCommandEncoder,
            TopicParameterExtractor::new(
                &config.destination.command_topic,
                &config.destination.system_topic,
            ),
            provider,
            management.clone(),
        ));
        let outbound = tokio::spawn(log_outbound(receiver));

        let mut router = CommandRouter::new(management.clone());
        for (specification, destination_id) in &config.router.mappings {
            router = router.with_mapping(specification, destination_id);
        }
        if let Some(default) = &config.router.default_destination {
            router = router.with_default_destination(default);
        }
        router
            .register(destination.clone())
            .context("Invalid command destination")?;
        let router = Arc::new(router);
        supervisor.add_child(router.clone() as DynLifecycle);

        let batch = Arc::new(
            BatchOperationManager::new(management.clone(), management.clone(), router.clone())
                .with_throttle_delay(Duration::from_millis(config.batch.throttle_ms)),
        );
        supervisor.add_child(batch.clone() as DynLifecycle);

        let assets = Arc::new(build_assets(config)?);
        supervisor.add_child(assets.clone() as DynLifecycle);

        tracing::debug!(
            pipelines = pipelines.len(),
            asset_modules = assets.module_ids().len(),
            "FleetWire context assembled"
        );

        Ok(Self {
            supervisor,
            management,
            registry,
            pipelines,
            destination,
            router,
            batch,
            assets,
            outbound,
        })
    }

    /// Stop the outbound log task. Components are stopped through the
    /// supervisor beforehand.
    pub fn shutdown(self) {
        self.outbound.abort();
    }
}

/// Asset federation from the `[[assets]]` sections.
pub fn build_assets(config: &FleetConfig) -> Result<AssetModuleManager> {
    let mut manager = AssetModuleManager::new();
    for section in &config.assets {
        let source = JsonFileAssetSource::new(config.asset_path(section));
        let module = AssetModule::new(
            section.id.clone(),
            section.name.clone(),
            section.asset_type,
            Arc::new(source),
        )
        .with_cache(section.cache);
        manager
            .register(Arc::new(module))
            .with_context(|| format!("Invalid asset module '{}'", section.id))?;
    }
    Ok(manager)
}

fn seed(management: &InMemoryDeviceManagement, config: &FleetConfig) {
    for section in &config.devices {
        management.add_device(Device::new(
            &section.hardware_id,
            &section.specification_token,
        ));
        if let Some(token) = &section.assignment_token {
            management.add_assignment(DeviceAssignment::new(token, &section.hardware_id));
        }
    }
    for section in &config.commands {
        let mut command = CommandDefinition::new(&section.token, &section.name);
        if let Some(namespace) = &section.namespace {
            command = command.with_namespace(namespace);
        }
        management.add_command(command);
    }
}

async fn log_outbound(mut receiver: mpsc::Receiver<OutboundMessage<Vec<u8>, TopicParams>>) {
    while let Some(message) = receiver.recv().await {
        tracing::info!(
            topic = %message.params.command_topic,
            bytes = message.encoded.len(),
            "Command published"
        );
    }
}
