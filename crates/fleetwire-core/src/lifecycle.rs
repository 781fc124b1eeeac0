//! Supervisable components.
//!
//! Every long-lived FleetWire component (inbound pipelines, command
//! destinations, the batch engine, asset modules) embeds a
//! [`LifecycleComponent`] and implements [`Lifecycle`]. The component
//! carries identity, status, the last captured error and an ordered list of
//! owned children; the [`LifecycleExt`] methods drive the state machine:
//!
//! ```text
//! Stopped --start--> Starting --> Started --pause--> Pausing --> Paused
//! Paused  --start--> Starting --> Started            (resume hook)
//! Started | Paused --stop--> Stopping --> Terminated
//! any failing hook --> Error --reset--> Stopped
//! ```
//!
//! Transitions on one component are serialized by a lock owned by that
//! component. Status reads never wait on a transition in progress.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::defaults;
use crate::error::{Coded, ErrorCode};

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Shared handle to a supervisable component.
pub type DynLifecycle = Arc<dyn Lifecycle>;

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested action is not valid from the current status.
    #[error("Cannot {action} component '{component}' while {from}")]
    InvalidTransition {
        component: String,
        from: LifecycleStatus,
        action: &'static str,
    },

    /// The component is in `Error` and must be reset first.
    #[error("Component '{0}' is in error state")]
    InErrorState(String),

    /// Missing or inconsistent configuration detected at start.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A lifecycle hook failed.
    #[error("Component '{component}' failed: {reason}")]
    Failed { component: String, reason: String },

    /// An owned child failed during a parent transition.
    #[error("Child '{child}' of '{parent}' failed: {reason}")]
    ChildFailed {
        parent: String,
        child: String,
        reason: String,
    },

    #[error("Lifecycle error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Coded for LifecycleError {
    fn code(&self) -> ErrorCode {
        match self {
            LifecycleError::InvalidTransition { .. } => ErrorCode::InvalidLifecycleTransition,
            LifecycleError::InErrorState(_) => ErrorCode::ComponentInErrorState,
            LifecycleError::Configuration(_) => ErrorCode::Configuration,
            LifecycleError::Failed { .. }
            | LifecycleError::ChildFailed { .. }
            | LifecycleError::Other(_) => ErrorCode::Internal,
        }
    }
}

/// Component status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    Stopped,
    Starting,
    Started,
    Pausing,
    Paused,
    Stopping,
    Error,
    Terminated,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Stopped => "Stopped",
            LifecycleStatus::Starting => "Starting",
            LifecycleStatus::Started => "Started",
            LifecycleStatus::Pausing => "Pausing",
            LifecycleStatus::Paused => "Paused",
            LifecycleStatus::Stopping => "Stopping",
            LifecycleStatus::Error => "Error",
            LifecycleStatus::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator attached to each component at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    Supervisor,
    InboundPipeline,
    CommandDestination,
    CommandRouter,
    BatchOperationManager,
    AssetModuleManager,
    AssetModule,
    DeviceManagement,
    Other(String),
}

impl ComponentType {
    pub fn as_str(&self) -> &str {
        match self {
            ComponentType::Supervisor => "supervisor",
            ComponentType::InboundPipeline => "inbound_pipeline",
            ComponentType::CommandDestination => "command_destination",
            ComponentType::CommandRouter => "command_router",
            ComponentType::BatchOperationManager => "batch_operation_manager",
            ComponentType::AssetModuleManager => "asset_module_manager",
            ComponentType::AssetModule => "asset_module",
            ComponentType::DeviceManagement => "device_management",
            ComponentType::Other(name) => name,
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a parent does when one of its children fails to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChildStartPolicy {
    /// Keep starting the remaining siblings, report the first failure.
    #[default]
    Continue,
    /// Stop at the first failing child.
    FailFast,
}

/// One recorded status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Default)]
struct ComponentState {
    last_error: Option<String>,
    history: VecDeque<StatusTransition>,
}

/// Identity, status and children of a supervisable component.
pub struct LifecycleComponent {
    id: Uuid,
    name: String,
    component_type: ComponentType,
    child_policy: ChildStartPolicy,
    status_tx: watch::Sender<LifecycleStatus>,
    state: Mutex<ComponentState>,
    children: RwLock<Vec<DynLifecycle>>,
    transition_lock: tokio::sync::Mutex<()>,
}

impl LifecycleComponent {
    pub fn new(name: impl Into<String>, component_type: ComponentType) -> Self {
        let (status_tx, _) = watch::channel(LifecycleStatus::Stopped);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            component_type,
            child_policy: ChildStartPolicy::default(),
            status_tx,
            state: Mutex::new(ComponentState::default()),
            children: RwLock::new(Vec::new()),
            transition_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_child_policy(mut self, policy: ChildStartPolicy) -> Self {
        self.child_policy = policy;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component_type(&self) -> &ComponentType {
        &self.component_type
    }

    pub fn child_policy(&self) -> ChildStartPolicy {
        self.child_policy
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.status_tx.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.status() == LifecycleStatus::Started
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> Vec<StatusTransition> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Receive every status change of this component.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleStatus> {
        self.status_tx.subscribe()
    }

    /// Append an owned child. Children start in the order they were added.
    pub fn add_child(&self, child: DynLifecycle) {
        self.children.write().push(child);
    }

    pub fn children(&self) -> Vec<DynLifecycle> {
        self.children.read().clone()
    }

    /// Wait until the component leaves `Paused` (or `Pausing`).
    pub async fn wait_while_paused(&self) -> LifecycleStatus {
        let mut rx = self.status_tx.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if !matches!(status, LifecycleStatus::Paused | LifecycleStatus::Pausing) {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Render the component tree as indented `+ name status` lines.
    pub fn state_tree(&self) -> String {
        let mut out = String::new();
        self.render_tree(0, &mut out);
        out
    }

    /// Emit the component tree through `tracing`.
    pub fn log_state(&self) {
        tracing::info!("\n{}", self.state_tree());
    }

    fn render_tree(&self, depth: usize, out: &mut String) {
        let _ = write!(out, "{}+ {} {}", "  ".repeat(depth), self.name, self.status());
        if self.status() == LifecycleStatus::Error {
            if let Some(err) = self.last_error() {
                let _ = write!(out, " ({})", err);
            }
        }
        out.push('\n');
        for child in self.children() {
            child.component().render_tree(depth + 1, out);
        }
    }

    fn record(&self, to: LifecycleStatus, reason: &str) {
        let from = self.status_tx.send_replace(to);
        let mut state = self.state.lock();
        state.history.push_back(StatusTransition {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        while state.history.len() > defaults::LIFECYCLE_HISTORY_LIMIT {
            state.history.pop_front();
        }
    }

    fn fail(&self, reason: String) {
        tracing::error!(
            component = %self.name,
            id = %self.id,
            error = %reason,
            "Component entered error state"
        );
        self.state.lock().last_error = Some(reason.clone());
        self.record(LifecycleStatus::Error, &reason);
    }

    fn invalid(&self, action: &'static str, from: LifecycleStatus) -> LifecycleError {
        if from == LifecycleStatus::Error {
            LifecycleError::InErrorState(self.name.clone())
        } else {
            LifecycleError::InvalidTransition {
                component: self.name.clone(),
                from,
                action,
            }
        }
    }
}

impl fmt::Debug for LifecycleComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleComponent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("component_type", &self.component_type)
            .field("status", &self.status())
            .field("children", &self.children.read().len())
            .finish()
    }
}

/// A supervisable component.
///
/// Implementors expose their embedded [`LifecycleComponent`] and override
/// the hooks they need. Hooks must not drive lifecycle transitions on the
/// same component.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn component(&self) -> &LifecycleComponent;

    /// Whether `pause` means anything for this component.
    fn can_pause(&self) -> bool {
        false
    }

    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_pause(&self) -> Result<()> {
        Ok(())
    }

    async fn on_resume(&self) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

/// State machine driver for every [`Lifecycle`] implementor.
#[async_trait]
pub trait LifecycleExt {
    /// Start (or resume from `Paused`) the component and its children.
    async fn lifecycle_start(&self) -> Result<LifecycleStatus>;

    /// Pause the component. A no-op for components that cannot pause.
    async fn lifecycle_pause(&self) -> Result<LifecycleStatus>;

    /// Stop the component, then its children in reverse order.
    async fn lifecycle_stop(&self) -> Result<LifecycleStatus>;

    /// Move a component out of `Error` back to `Stopped`.
    async fn lifecycle_reset(&self) -> Result<LifecycleStatus>;
}

#[async_trait]
impl<T: Lifecycle + ?Sized> LifecycleExt for T {
    async fn lifecycle_start(&self) -> Result<LifecycleStatus> {
        let component = self.component();
        let _guard = component.transition_lock.lock().await;
        let from = component.status();
        if !matches!(from, LifecycleStatus::Stopped | LifecycleStatus::Paused) {
            return Err(component.invalid("start", from));
        }

        component.record(LifecycleStatus::Starting, "start requested");

        if from == LifecycleStatus::Paused {
            return match self.on_resume().await {
                Ok(()) => {
                    component.record(LifecycleStatus::Started, "resumed");
                    tracing::info!(component = %component.name, "Component resumed");
                    Ok(LifecycleStatus::Started)
                }
                Err(e) => {
                    component.fail(e.to_string());
                    Err(e)
                }
            };
        }

        let mut first_failure: Option<LifecycleError> = None;
        for child in component.children() {
            let child_component = child.component();
            if child_component.is_started() {
                continue;
            }
            if let Err(e) = child.lifecycle_start().await {
                tracing::warn!(
                    component = %component.name,
                    child = %child_component.name(),
                    error = %e,
                    "Child component failed to start"
                );
                if first_failure.is_none() {
                    first_failure = Some(LifecycleError::ChildFailed {
                        parent: component.name.clone(),
                        child: child_component.name().to_string(),
                        reason: e.to_string(),
                    });
                }
                if component.child_policy == ChildStartPolicy::FailFast {
                    break;
                }
            }
        }

        if let Some(e) = first_failure {
            component.fail(e.to_string());
            return Err(e);
        }

        match self.on_start().await {
            Ok(()) => {
                component.record(LifecycleStatus::Started, "started");
                tracing::info!(
                    component = %component.name,
                    id = %component.id,
                    kind = %component.component_type,
                    "Component started"
                );
                Ok(LifecycleStatus::Started)
            }
            Err(e) => {
                component.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn lifecycle_pause(&self) -> Result<LifecycleStatus> {
        let component = self.component();
        if component.status() == LifecycleStatus::Error {
            return Err(LifecycleError::InErrorState(component.name.clone()));
        }
        if !self.can_pause() {
            tracing::debug!(component = %component.name, "Pause ignored, component cannot pause");
            return Ok(component.status());
        }

        let _guard = component.transition_lock.lock().await;
        let from = component.status();
        if from != LifecycleStatus::Started {
            return Err(component.invalid("pause", from));
        }

        component.record(LifecycleStatus::Pausing, "pause requested");
        match self.on_pause().await {
            Ok(()) => {
                component.record(LifecycleStatus::Paused, "paused");
                tracing::info!(component = %component.name, "Component paused");
                Ok(LifecycleStatus::Paused)
            }
            Err(e) => {
                component.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn lifecycle_stop(&self) -> Result<LifecycleStatus> {
        let component = self.component();
        let _guard = component.transition_lock.lock().await;
        let from = component.status();
        if !matches!(from, LifecycleStatus::Started | LifecycleStatus::Paused) {
            return Err(component.invalid("stop", from));
        }

        component.record(LifecycleStatus::Stopping, "stop requested");
        let own_result = self.on_stop().await;

        let mut first_failure: Option<LifecycleError> = None;
        for child in component.children().into_iter().rev() {
            let child_component = child.component();
            if !matches!(
                child_component.status(),
                LifecycleStatus::Started | LifecycleStatus::Paused
            ) {
                continue;
            }
            if let Err(e) = child.lifecycle_stop().await {
                if first_failure.is_none() {
                    first_failure = Some(LifecycleError::ChildFailed {
                        parent: component.name.clone(),
                        child: child_component.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = own_result {
            component.fail(e.to_string());
            return Err(e);
        }
        if let Some(e) = first_failure {
            component.fail(e.to_string());
            return Err(e);
        }

        component.record(LifecycleStatus::Terminated, "stopped");
        tracing::info!(component = %component.name, id = %component.id, "Component stopped");
        Ok(LifecycleStatus::Terminated)
    }

    async fn lifecycle_reset(&self) -> Result<LifecycleStatus> {
        let component = self.component();
        let _guard = component.transition_lock.lock().await;
        let from = component.status();
        if from != LifecycleStatus::Error {
            return Err(LifecycleError::InvalidTransition {
                component: component.name.clone(),
                from,
                action: "reset",
            });
        }
        component.state.lock().last_error = None;
        component.record(LifecycleStatus::Stopped, "reset");
        tracing::info!(component = %component.name, "Component reset");
        Ok(LifecycleStatus::Stopped)
    }
}

/// Pre-order search of `root` and all its descendants for a component type.
pub fn find_components_of_type(root: &DynLifecycle, kind: &ComponentType) -> Vec<DynLifecycle> {
    let mut found = Vec::new();
    collect_of_type(root, kind, &mut found);
    found
}

fn collect_of_type(node: &DynLifecycle, kind: &ComponentType, found: &mut Vec<DynLifecycle>) {
    if node.component().component_type() == kind {
        found.push(node.clone());
    }
    for child in node.component().children() {
        collect_of_type(&child, kind, found);
    }
}

/// Root of a supervision tree. Owns nothing but its children.
#[derive(Debug)]
pub struct Supervisor {
    component: LifecycleComponent,
}

impl Supervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            component: LifecycleComponent::new(name, ComponentType::Supervisor),
        }
    }

    pub fn with_child_policy(mut self, policy: ChildStartPolicy) -> Self {
        self.component = self.component.with_child_policy(policy);
        self
    }

    pub fn add_child(&self, child: DynLifecycle) {
        self.component.add_child(child);
    }
}

impl Lifecycle for Supervisor {
    fn component(&self) -> &LifecycleComponent {
        &self.component
    }
}
