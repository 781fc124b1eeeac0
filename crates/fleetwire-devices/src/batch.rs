//! Batch operation engine.
//!
//! A batch operation applies one action (a command invocation or a state
//! update) to a resolved set of devices. Every device gets a tracked
//! element; elements move `Unprocessed -> Succeeded | Failed` exactly once.
//! Re-running [`BatchOperationManager::process`] skips processed elements,
//! so an interrupted run resumes where it stopped.
//!
//! Processing runs in the caller's task. The engine can be paused, in which
//! case the element loop waits before the next element. Each processed
//! element is written back to the stored operation right away, so
//! [`BatchOperationManager::get`] sees progress while a run is underway or
//! paused.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use fleetwire_core::lifecycle::{Lifecycle, LifecycleComponent, LifecycleStatus};
use fleetwire_core::{Coded, ComponentType, ErrorCode, ErrorLevel};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::destination::DynCommandDelivery;
use crate::management::{
    DeviceSearchCriteria, DynDeviceGroups, DynDeviceManagement, ManagementError,
};
use crate::model::{CommandInitiator, CommandInvocation, DecodedEvent, Device, EventKind};

/// Metadata key holding the batch operation id on invocations.
pub const META_BATCH_OPERATION_ID: &str = "batchOperationId";
/// Element metadata key holding the created invocation event id.
pub const META_INVOCATION_EVENT_ID: &str = "invocationEventId";
/// Element metadata key holding the created state event id.
pub const META_STATE_EVENT_ID: &str = "stateEventId";

/// Batch errors.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Device specification token is required")]
    MissingSpecificationToken,

    #[error("Only one of group token and groups-with-role may be specified")]
    ConflictingGroupCriteria,

    #[error("Unknown batch operation: {0}")]
    UnknownOperation(String),

    #[error("Batch operation already exists: {0}")]
    DuplicateOperation(String),

    #[error("Batch operation is still in progress: {0}")]
    OperationInProgress(String),

    #[error("Batch engine '{0}' is not running")]
    NotRunning(String),

    #[error("Device resolution failed: {0}")]
    Management(#[from] ManagementError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Coded for BatchError {
    fn code(&self) -> ErrorCode {
        match self {
            BatchError::MissingSpecificationToken => ErrorCode::InvalidDeviceSpecificationToken,
            BatchError::ConflictingGroupCriteria => ErrorCode::InvalidDeviceGroupCriteria,
            BatchError::UnknownOperation(_) => ErrorCode::UnknownBatchOperation,
            BatchError::DuplicateOperation(_) => ErrorCode::DuplicateBatchOperation,
            BatchError::OperationInProgress(_) => ErrorCode::BatchOperationInProgress,
            BatchError::NotRunning(_) => ErrorCode::ComponentNotRunning,
            BatchError::Management(e) => e.code(),
            BatchError::Serialization(_) => ErrorCode::Internal,
        }
    }

    fn level(&self) -> ErrorLevel {
        match self {
            BatchError::NotRunning(_) => ErrorLevel::Warning,
            _ => ErrorLevel::Error,
        }
    }
}

pub type BatchResult<T> = Result<T, BatchError>;

/// Action applied to every device of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BatchAction {
    InvokeCommand {
        command_token: String,
        #[serde(default)]
        parameter_values: HashMap<String, String>,
    },
    UpdateState {
        kind: EventKind,
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
}

impl BatchAction {
    pub fn name(&self) -> &'static str {
        match self {
            BatchAction::InvokeCommand { .. } => "invokeCommand",
            BatchAction::UpdateState { .. } => "updateState",
        }
    }
}

/// Criteria-based device selection.
///
/// Blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCriteria {
    pub group_token: Option<String>,
    pub groups_with_role: Option<String>,
    pub specification_token: Option<String>,
    #[serde(default)]
    pub exclude_assigned: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl BatchCriteria {
    pub fn for_specification(token: impl Into<String>) -> Self {
        Self {
            specification_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn in_group(mut self, token: impl Into<String>) -> Self {
        self.group_token = Some(token.into());
        self
    }

    pub fn in_groups_with_role(mut self, role: impl Into<String>) -> Self {
        self.groups_with_role = Some(role.into());
        self
    }

    /// Validate and build the device filter (all results, no paging).
    pub fn search_criteria(&self) -> BatchResult<DeviceSearchCriteria> {
        let specification = non_blank(&self.specification_token)
            .ok_or(BatchError::MissingSpecificationToken)?;
        if non_blank(&self.group_token).is_some() && non_blank(&self.groups_with_role).is_some() {
            return Err(BatchError::ConflictingGroupCriteria);
        }
        Ok(DeviceSearchCriteria {
            specification_token: Some(specification.to_string()),
            exclude_assigned: self.exclude_assigned,
            start_date: self.start_date,
            end_date: self.end_date,
            page_number: 1,
            page_size: 0,
        })
    }
}

/// Which devices an operation targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchTargets {
    Devices(Vec<String>),
    Criteria(BatchCriteria),
}

/// Submission of a new batch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub action: BatchAction,
    pub targets: BatchTargets,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BatchRequest {
    pub fn new(action: BatchAction, targets: BatchTargets) -> Self {
        Self {
            id: None,
            action,
            targets,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Command invocation for an explicit device list.
    pub fn invoke_command(command_token: impl Into<String>, hardware_ids: Vec<String>) -> Self {
        Self::new(
            BatchAction::InvokeCommand {
                command_token: command_token.into(),
                parameter_values: HashMap::new(),
            },
            BatchTargets::Devices(hardware_ids),
        )
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let BatchAction::InvokeCommand {
            parameter_values, ..
        } = &mut self.action
        {
            parameter_values.insert(name.into(), value.into());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementStatus {
    Unprocessed,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Processing,
    Succeeded,
    Failed,
}

/// Per-device record of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchElement {
    pub index: usize,
    pub hardware_id: String,
    pub status: ElementStatus,
    pub processed_date: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BatchElement {
    fn new(index: usize, hardware_id: String) -> Self {
        Self {
            index,
            hardware_id,
            status: ElementStatus::Unprocessed,
            processed_date: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status != ElementStatus::Unprocessed
    }

    fn succeed(&mut self, metadata: HashMap<String, String>) {
        self.status = ElementStatus::Succeeded;
        self.processed_date = Some(Utc::now());
        self.metadata.extend(metadata);
    }

    fn fail(&mut self, error: String) {
        self.status = ElementStatus::Failed;
        self.processed_date = Some(Utc::now());
        self.error = Some(error);
    }
}

/// A tracked batch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub id: String,
    pub action: BatchAction,
    /// Targets as submitted, serialized to JSON.
    pub criteria: String,
    pub elements: Vec<BatchElement>,
    pub created_date: DateTime<Utc>,
    pub processing_started_date: Option<DateTime<Utc>>,
    pub processing_ended_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BatchOperation {
    /// Overall status folded from the element statuses.
    ///
    /// Any failed element fails the operation; all succeeded (including no
    /// elements at all) succeeds it; otherwise it is still processing.
    pub fn status(&self) -> OperationStatus {
        if self
            .elements
            .iter()
            .any(|e| e.status == ElementStatus::Failed)
        {
            OperationStatus::Failed
        } else if self
            .elements
            .iter()
            .all(|e| e.status == ElementStatus::Succeeded)
        {
            OperationStatus::Succeeded
        } else {
            OperationStatus::Processing
        }
    }

    pub fn is_finished(&self) -> bool {
        self.elements.iter().all(BatchElement::is_processed)
    }

    pub fn count(&self, status: ElementStatus) -> usize {
        self.elements.iter().filter(|e| e.status == status).count()
    }
}

/// Stored operation. `run` serializes processing of the same operation;
/// `state` is only locked briefly, never across an await.
struct TrackedOperation {
    run: Mutex<()>,
    state: RwLock<BatchOperation>,
}

impl TrackedOperation {
    fn new(operation: BatchOperation) -> Self {
        Self {
            run: Mutex::new(()),
            state: RwLock::new(operation),
        }
    }
}

/// Creates, stores and processes batch operations.
///
/// Operations are kept until [`remove`](Self::remove)d.
pub struct BatchOperationManager {
    component: LifecycleComponent,
    management: DynDeviceManagement,
    groups: DynDeviceGroups,
    commands: DynCommandDelivery,
    throttle: Duration,
    operations: DashMap<String, Arc<TrackedOperation>>,
}

impl BatchOperationManager {
    pub fn new(
        management: DynDeviceManagement,
        groups: DynDeviceGroups,
        commands: DynCommandDelivery,
    ) -> Self {
        Self {
            component: LifecycleComponent::new(
                "batch-operations",
                ComponentType::BatchOperationManager,
            ),
            management,
            groups,
            commands,
            throttle: Duration::ZERO,
            operations: DashMap::new(),
        }
    }

    /// Delay applied between elements.
    pub fn with_throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle = delay;
        self
    }

    /// Resolve target devices, in resolution order, without duplicates.
    pub async fn resolve_devices(&self, targets: &BatchTargets) -> BatchResult<Vec<String>> {
        let hardware_ids = match targets {
            BatchTargets::Devices(ids) => ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            BatchTargets::Criteria(criteria) => {
                let search = criteria.search_criteria()?;
                let devices: Vec<Device> = if let Some(group) = non_blank(&criteria.group_token) {
                    self.groups.devices_in_group(group, &search).await?
                } else if let Some(role) = non_blank(&criteria.groups_with_role) {
                    self.groups.devices_in_groups_with_role(role, &search).await?
                } else {
                    self.management.list_devices(&search).await?.results
                };
                devices.into_iter().map(|d| d.hardware_id).collect()
            }
        };
        Ok(dedupe(hardware_ids))
    }

    /// Create an operation with one unprocessed element per resolved device.
    pub async fn submit(&self, request: BatchRequest) -> BatchResult<BatchOperation> {
        let id = request
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.operations.contains_key(&id) {
            return Err(BatchError::DuplicateOperation(id));
        }

        let hardware_ids = self.resolve_devices(&request.targets).await?;
        let operation = BatchOperation {
            id: id.clone(),
            action: request.action,
            criteria: serde_json::to_string(&request.targets)?,
            elements: hardware_ids
                .into_iter()
                .enumerate()
                .map(|(index, hardware_id)| BatchElement::new(index, hardware_id))
                .collect(),
            created_date: Utc::now(),
            processing_started_date: None,
            processing_ended_date: None,
            metadata: request.metadata,
        };

        match self.operations.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(BatchError::DuplicateOperation(id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(TrackedOperation::new(operation.clone())));
            }
        }
        tracing::info!(
            operation = %id,
            action = operation.action.name(),
            elements = operation.elements.len(),
            "Batch operation created"
        );
        Ok(operation)
    }

    /// Snapshot of a stored operation, including elements processed by a
    /// run still in progress.
    pub fn get(&self, id: &str) -> Option<BatchOperation> {
        self.operations
            .get(id)
            .map(|entry| entry.value().state.read().clone())
    }

    /// Drop a finished operation from the store.
    ///
    /// Fails with `OperationInProgress` while a run holds the operation or
    /// any element is still unprocessed.
    pub fn remove(&self, id: &str) -> BatchResult<BatchOperation> {
        let tracked = self.tracked(id)?;
        let _run = tracked
            .run
            .try_lock()
            .map_err(|_| BatchError::OperationInProgress(id.to_string()))?;
        let operation = tracked.state.read().clone();
        if !operation.is_finished() {
            return Err(BatchError::OperationInProgress(id.to_string()));
        }
        self.operations.remove(id);
        tracing::info!(operation = %id, status = ?operation.status(), "Batch operation removed");
        Ok(operation)
    }

    pub fn operation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.operations.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Process every unprocessed element of an operation, in order.
    ///
    /// Returns the operation as it stands afterwards. If the engine is
    /// stopped mid-run the remaining elements stay unprocessed.
    pub async fn process(&self, id: &str) -> BatchResult<BatchOperation> {
        self.ensure_running()?;
        let tracked = self.tracked(id)?;
        let _run = tracked.run.lock().await;

        let operation = {
            let mut state = tracked.state.write();
            if state.processing_started_date.is_none() {
                state.processing_started_date = Some(Utc::now());
            }
            state.clone()
        };
        tracing::info!(
            operation = %operation.id,
            pending = operation.count(ElementStatus::Unprocessed),
            "Processing batch operation"
        );

        let mut first = true;
        for element in operation.elements.iter().filter(|e| !e.is_processed()) {
            let status = self.component.wait_while_paused().await;
            if status != LifecycleStatus::Started {
                tracing::warn!(
                    operation = %operation.id,
                    status = %status,
                    "Batch engine no longer running, leaving remaining elements unprocessed"
                );
                break;
            }
            if !first && !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
            first = false;

            let hardware_id = &element.hardware_id;
            let result = self.process_element(&operation, hardware_id).await;
            {
                let mut state = tracked.state.write();
                let stored = &mut state.elements[element.index];
                match result {
                    Ok(metadata) => {
                        tracing::debug!(
                            operation = %id,
                            hardware_id = %hardware_id,
                            "Element succeeded"
                        );
                        stored.succeed(metadata);
                    }
                    Err(message) => {
                        tracing::warn!(
                            operation = %id,
                            hardware_id = %hardware_id,
                            error = %message,
                            "Element failed"
                        );
                        stored.fail(message);
                    }
                }
            }
        }

        let mut state = tracked.state.write();
        if state.is_finished() && state.processing_ended_date.is_none() {
            state.processing_ended_date = Some(Utc::now());
        }
        tracing::info!(
            operation = %state.id,
            status = ?state.status(),
            succeeded = state.count(ElementStatus::Succeeded),
            failed = state.count(ElementStatus::Failed),
            "Batch operation processed"
        );
        Ok(state.clone())
    }

    /// Submit and immediately process.
    pub async fn run(&self, request: BatchRequest) -> BatchResult<BatchOperation> {
        let operation = self.submit(request).await?;
        self.process(&operation.id).await
    }

    fn tracked(&self, id: &str) -> BatchResult<Arc<TrackedOperation>> {
        self.operations
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BatchError::UnknownOperation(id.to_string()))
    }

    fn ensure_running(&self) -> BatchResult<()> {
        match self.component.status() {
            LifecycleStatus::Started | LifecycleStatus::Paused | LifecycleStatus::Pausing => Ok(()),
            _ => Err(BatchError::NotRunning(self.component.name().to_string())),
        }
    }

    async fn process_element(
        &self,
        operation: &BatchOperation,
        hardware_id: &str,
    ) -> Result<HashMap<String, String>, String> {
        match &operation.action {
            BatchAction::InvokeCommand {
                command_token,
                parameter_values,
            } => {
                self.invoke_command(operation, hardware_id, command_token, parameter_values)
                    .await
            }
            BatchAction::UpdateState { kind, metadata } => {
                self.update_state(hardware_id, kind, metadata).await
            }
        }
    }

    async fn invoke_command(
        &self,
        operation: &BatchOperation,
        hardware_id: &str,
        command_token: &str,
        parameter_values: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, String> {
        let device = self
            .management
            .get_device(hardware_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| ManagementError::UnknownDevice(hardware_id.to_string()).to_string())?;
        if !device.is_assigned() {
            return Err(ManagementError::NotAssigned(hardware_id.to_string()).to_string());
        }

        let request = DecodedEvent::new(
            hardware_id,
            EventKind::CommandInvocation {
                command_token: command_token.to_string(),
                parameter_values: parameter_values.clone(),
                initiator: CommandInitiator::BatchOperation,
                initiator_id: Some(operation.id.clone()),
            },
        )
        .with_metadata(META_BATCH_OPERATION_ID, operation.id.clone());
        let stored = self
            .management
            .create_event(hardware_id, &request)
            .await
            .map_err(|e| e.to_string())?;

        let invocation = CommandInvocation {
            id: stored.id.clone(),
            command_token: command_token.to_string(),
            parameter_values: parameter_values.clone(),
            initiator: CommandInitiator::BatchOperation,
            initiator_id: Some(operation.id.clone()),
            metadata: HashMap::from([(META_BATCH_OPERATION_ID.to_string(), operation.id.clone())]),
        };
        self.commands
            .deliver(hardware_id, &invocation)
            .await
            .map_err(|e| e.to_string())?;

        Ok(HashMap::from([(META_INVOCATION_EVENT_ID.to_string(), stored.id)]))
    }

    async fn update_state(
        &self,
        hardware_id: &str,
        kind: &EventKind,
        metadata: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, String> {
        let mut request = DecodedEvent::new(hardware_id, kind.clone()).with_update_state(true);
        request.metadata = metadata.clone();
        let stored = self
            .management
            .create_event(hardware_id, &request)
            .await
            .map_err(|e| e.to_string())?;
        self.management
            .update_assignment_state(hardware_id, &stored)
            .await
            .map_err(|e| e.to_string())?;
        Ok(HashMap::from([(META_STATE_EVENT_ID.to_string(), stored.id)]))
    }
}

#[async_trait]
impl Lifecycle for BatchOperationManager {
    fn component(&self) -> &LifecycleComponent {
        &self.component
    }

    fn can_pause(&self) -> bool {
        true
    }
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(status: ElementStatus) -> BatchElement {
        let mut element = BatchElement::new(0, "dev".into());
        element.status = status;
        element
    }

    fn operation(statuses: &[ElementStatus]) -> BatchOperation {
        BatchOperation {
            id: "op".into(),
            action: BatchAction::InvokeCommand {
                command_token: "c".into(),
                parameter_values: HashMap::new(),
            },
            criteria: String::new(),
            elements: statuses.iter().map(|s| element(*s)).collect(),
            created_date: Utc::now(),
            processing_started_date: None,
            processing_ended_date: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_status_fold() {
        use ElementStatus::*;
        assert_eq!(operation(&[]).status(), OperationStatus::Succeeded);
        assert_eq!(operation(&[Succeeded, Succeeded]).status(), OperationStatus::Succeeded);
        assert_eq!(operation(&[Succeeded, Unprocessed]).status(), OperationStatus::Processing);
        assert_eq!(operation(&[Unprocessed]).status(), OperationStatus::Processing);
        assert_eq!(operation(&[Failed, Unprocessed]).status(), OperationStatus::Failed);
        assert_eq!(operation(&[Succeeded, Failed]).status(), OperationStatus::Failed);
    }

    #[test]
    fn test_criteria_validation() {
        let err = BatchCriteria::default().search_criteria().unwrap_err();
        assert!(matches!(err, BatchError::MissingSpecificationToken));
        assert_eq!(err.code(), ErrorCode::InvalidDeviceSpecificationToken);
        assert_eq!(err.level(), ErrorLevel::Error);

        let blank = BatchCriteria::for_specification("   ");
        assert!(blank.search_criteria().is_err());

        let both = BatchCriteria::for_specification("tracker")
            .in_group("g-1")
            .in_groups_with_role("fleet");
        assert!(matches!(
            both.search_criteria().unwrap_err(),
            BatchError::ConflictingGroupCriteria
        ));

        let blank_group = BatchCriteria::for_specification("tracker")
            .in_group(" ")
            .in_groups_with_role("fleet");
        let search = blank_group.search_criteria().unwrap();
        assert_eq!(search.specification_token.as_deref(), Some("tracker"));
        assert_eq!(search.page_size, 0);
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedupe(ids), vec!["b".to_string(), "a".to_string()]);
    }
}
