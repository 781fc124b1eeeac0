//! Outbound command routing.
//!
//! A [`CommandRouter`] owns the command destinations as lifecycle children
//! and picks one per device: the destination mapped to the device's
//! specification token, else the default destination. With no mappings and
//! no default, a router holding exactly one destination sends everything
//! there.

use async_trait::async_trait;
use fleetwire_core::lifecycle::{self, Lifecycle, LifecycleComponent, LifecycleError};
use fleetwire_core::{ComponentType, DynLifecycle};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::destination::{CommandDelivery, CommandError, DeliveryReceipt, DynCommandDelivery};
use crate::management::DynDeviceManagement;
use crate::model::{CommandInvocation, Device};

pub struct CommandRouter {
    component: LifecycleComponent,
    management: DynDeviceManagement,
    destinations: HashMap<String, DynCommandDelivery>,
    mappings: BTreeMap<String, String>,
    default_destination: Option<String>,
}

impl CommandRouter {
    pub fn new(management: DynDeviceManagement) -> Self {
        Self {
            component: LifecycleComponent::new("command-router", ComponentType::CommandRouter),
            management,
            destinations: HashMap::new(),
            mappings: BTreeMap::new(),
            default_destination: None,
        }
    }

    /// Route devices of `specification_token` to `destination_id`.
    pub fn with_mapping(
        mut self,
        specification_token: impl Into<String>,
        destination_id: impl Into<String>,
    ) -> Self {
        self.mappings.insert(specification_token.into(), destination_id.into());
        self
    }

    pub fn with_default_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.default_destination = Some(destination_id.into());
        self
    }

    /// Register a destination under its id. It becomes a child of the
    /// router and starts before it.
    pub fn register<D>(&mut self, destination: Arc<D>) -> Result<(), CommandError>
    where
        D: CommandDelivery + Lifecycle + 'static,
    {
        let id = destination.destination_id().to_string();
        if self.destinations.contains_key(&id) {
            return Err(CommandError::DuplicateDestination(id));
        }
        tracing::debug!(destination = %id, "Command destination registered");
        self.component.add_child(destination.clone() as DynLifecycle);
        self.destinations.insert(id, destination as DynCommandDelivery);
        Ok(())
    }

    pub fn destination_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.destinations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Destination for one device.
    pub fn route(&self, device: &Device) -> Result<DynCommandDelivery, CommandError> {
        let destination_id = match self
            .mappings
            .get(&device.specification_token)
            .or(self.default_destination.as_ref())
        {
            Some(id) => id,
            None if self.mappings.is_empty() && self.destinations.len() == 1 => {
                return self
                    .destinations
                    .values()
                    .next()
                    .cloned()
                    .ok_or_else(|| CommandError::NoRoute(device.specification_token.clone()));
            }
            None => return Err(CommandError::NoRoute(device.specification_token.clone())),
        };
        self.destinations
            .get(destination_id)
            .cloned()
            .ok_or_else(|| CommandError::UnknownDestination(destination_id.clone()))
    }

    fn check_configuration(&self) -> Result<(), String> {
        if self.destinations.is_empty() {
            return Err("no command destinations registered".to_string());
        }
        for (specification, id) in &self.mappings {
            if !self.destinations.contains_key(id) {
                return Err(format!(
                    "specification '{}' is mapped to unknown destination '{}'",
                    specification, id
                ));
            }
        }
        if let Some(id) = &self.default_destination {
            if !self.destinations.contains_key(id) {
                return Err(format!("default destination '{}' is not registered", id));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandDelivery for CommandRouter {
    fn destination_id(&self) -> &str {
        self.component.name()
    }

    async fn deliver(
        &self,
        hardware_id: &str,
        invocation: &CommandInvocation,
    ) -> Result<DeliveryReceipt, CommandError> {
        if !self.component.is_started() {
            return Err(CommandError::NotRunning(self.component.name().to_string()));
        }
        let device = self
            .management
            .get_device(hardware_id)
            .await?
            .ok_or_else(|| CommandError::UnknownDevice(hardware_id.to_string()))?;
        let destination = self.route(&device).inspect_err(|e| {
            tracing::warn!(
                hardware_id,
                specification = %device.specification_token,
                invocation = %invocation.id,
                error = %e,
                "Command not routed"
            );
        })?;
        destination.deliver(hardware_id, invocation).await
    }
}

#[async_trait]
impl Lifecycle for CommandRouter {
    fn component(&self) -> &LifecycleComponent {
        &self.component
    }

    async fn on_start(&self) -> lifecycle::Result<()> {
        self.check_configuration().map_err(|reason| {
            LifecycleError::Configuration(format!("{}: {}", self.component.name(), reason))
        })?;
        tracing::info!(
            destinations = self.destinations.len(),
            mappings = self.mappings.len(),
            default = ?self.default_destination,
            "Command router ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDeviceManagement;
    use chrono::Utc;
    use fleetwire_core::{Coded, ErrorCode, LifecycleExt, LifecycleStatus};
    use parking_lot::Mutex;

    struct Recorder {
        component: LifecycleComponent,
        id: String,
        delivered: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                component: LifecycleComponent::new(
                    format!("destination:{}", id),
                    ComponentType::CommandDestination,
                ),
                id: id.to_string(),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandDelivery for Recorder {
        fn destination_id(&self) -> &str {
            &self.id
        }

        async fn deliver(
            &self,
            hardware_id: &str,
            invocation: &CommandInvocation,
        ) -> Result<DeliveryReceipt, CommandError> {
            self.delivered.lock().push(hardware_id.to_string());
            Ok(DeliveryReceipt {
                destination_id: self.id.clone(),
                invocation_id: invocation.id.clone(),
                hardware_id: hardware_id.to_string(),
                delivered_at: Utc::now(),
            })
        }
    }

    impl Lifecycle for Recorder {
        fn component(&self) -> &LifecycleComponent {
            &self.component
        }
    }

    fn store() -> Arc<InMemoryDeviceManagement> {
        let store = Arc::new(InMemoryDeviceManagement::new());
        store.add_device(Device::new("dev-1", "tracker"));
        store.add_device(Device::new("dev-2", "gateway"));
        store.add_device(Device::new("dev-3", "sensor"));
        store
    }

    #[tokio::test]
    async fn test_mapped_and_default_routes() {
        let mqtt = Recorder::new("mqtt");
        let coap = Recorder::new("coap");
        let mut router = CommandRouter::new(store())
            .with_mapping("tracker", "mqtt")
            .with_mapping("gateway", "coap")
            .with_default_destination("mqtt");
        router.register(mqtt.clone()).unwrap();
        router.register(coap.clone()).unwrap();
        assert_eq!(router.destination_ids(), vec!["coap", "mqtt"]);

        assert_eq!(router.lifecycle_start().await.unwrap(), LifecycleStatus::Started);
        assert!(mqtt.component().is_started());

        let invocation = CommandInvocation::new("cmd-ping");
        let receipt = router.deliver("dev-2", &invocation).await.unwrap();
        assert_eq!(receipt.destination_id, "coap");
        router.deliver("dev-1", &invocation).await.unwrap();
        router.deliver("dev-3", &invocation).await.unwrap();

        assert_eq!(*mqtt.delivered.lock(), vec!["dev-1", "dev-3"]);
        assert_eq!(*coap.delivered.lock(), vec!["dev-2"]);
    }

    #[tokio::test]
    async fn test_unmapped_specification_fails_only_that_command() {
        let mqtt = Recorder::new("mqtt");
        let coap = Recorder::new("coap");
        let mut router = CommandRouter::new(store()).with_mapping("tracker", "mqtt");
        router.register(mqtt.clone()).unwrap();
        router.register(coap).unwrap();
        router.lifecycle_start().await.unwrap();

        let invocation = CommandInvocation::new("cmd-ping");
        let err = router.deliver("dev-3", &invocation).await.unwrap_err();
        assert!(matches!(err, CommandError::NoRoute(ref spec) if spec == "sensor"));
        assert_eq!(err.code(), ErrorCode::Configuration);
        assert!(err.never_sent());

        router.deliver("dev-1", &invocation).await.unwrap();
        assert_eq!(*mqtt.delivered.lock(), vec!["dev-1"]);
        assert!(router.component().is_started());
    }

    #[tokio::test]
    async fn test_single_destination_takes_everything() {
        let only = Recorder::new("only");
        let mut router = CommandRouter::new(store());
        router.register(only.clone()).unwrap();
        router.lifecycle_start().await.unwrap();

        let invocation = CommandInvocation::new("cmd-ping");
        router.deliver("dev-2", &invocation).await.unwrap();
        router.deliver("dev-3", &invocation).await.unwrap();
        assert_eq!(*only.delivered.lock(), vec!["dev-2", "dev-3"]);

        let err = router.deliver("ghost", &invocation).await.unwrap_err();
        assert!(matches!(err, CommandError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_missing_destination_is_start_time_error() {
        let mut router = CommandRouter::new(store()).with_mapping("tracker", "amqp");
        router.register(Recorder::new("mqtt")).unwrap();
        let err = router.lifecycle_start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Configuration(ref m) if m.contains("amqp")));
        assert_eq!(router.component().status(), LifecycleStatus::Error);

        let mut router = CommandRouter::new(store()).with_default_destination("amqp");
        router.register(Recorder::new("mqtt")).unwrap();
        assert!(matches!(
            router.lifecycle_start().await.unwrap_err(),
            LifecycleError::Configuration(_)
        ));

        let empty = CommandRouter::new(store());
        assert!(matches!(
            empty.lifecycle_start().await.unwrap_err(),
            LifecycleError::Configuration(_)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_destination_and_not_running() {
        let mut router = CommandRouter::new(store());
        router.register(Recorder::new("mqtt")).unwrap();
        let err = router.register(Recorder::new("mqtt")).unwrap_err();
        assert!(matches!(err, CommandError::DuplicateDestination(_)));

        let err = router
            .deliver("dev-1", &CommandInvocation::new("cmd-ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotRunning(_)));
    }
}
