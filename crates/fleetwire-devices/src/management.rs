//! Device-management collaborator contracts.
//!
//! Persistence is not part of FleetWire. The pipeline, destinations and the
//! batch engine talk to storage through [`DeviceManagement`] and
//! [`DeviceGroups`]; [`crate::memory`] provides in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwire_core::{Coded, ErrorCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::model::{CommandDefinition, DecodedEvent, Device, DeviceAssignment, StoredEvent};

/// Result type for collaborator calls.
pub type ManagementResult<T> = Result<T, ManagementError>;

/// Errors raised by device-management collaborators.
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown assignment: {0}")]
    UnknownAssignment(String),

    #[error("Device '{0}' is not currently assigned")]
    NotAssigned(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Device management error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Coded for ManagementError {
    fn code(&self) -> ErrorCode {
        match self {
            ManagementError::UnknownDevice(_) => ErrorCode::UnknownDevice,
            ManagementError::UnknownAssignment(_) | ManagementError::NotAssigned(_) => {
                ErrorCode::UnknownAssignment
            }
            ManagementError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            ManagementError::Storage(_) | ManagementError::Other(_) => ErrorCode::Internal,
        }
    }
}

/// Device search filter with paging.
///
/// `page_size == 0` means "all results".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSearchCriteria {
    pub specification_token: Option<String>,
    #[serde(default)]
    pub exclude_assigned: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page_number: u32,
    pub page_size: u32,
}

impl Default for DeviceSearchCriteria {
    fn default() -> Self {
        Self {
            specification_token: None,
            exclude_assigned: false,
            start_date: None,
            end_date: None,
            page_number: 1,
            page_size: 0,
        }
    }
}

impl DeviceSearchCriteria {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_specification(mut self, token: impl Into<String>) -> Self {
        self.specification_token = Some(token.into());
        self
    }

    pub fn with_page(mut self, page_number: u32, page_size: u32) -> Self {
        self.page_number = page_number;
        self.page_size = page_size;
        self
    }

    /// Whether a device passes the filter part of the criteria.
    pub fn matches(&self, device: &Device) -> bool {
        if let Some(token) = &self.specification_token {
            if &device.specification_token != token {
                return false;
            }
        }
        if self.exclude_assigned && device.is_assigned() {
            return false;
        }
        if let Some(start) = self.start_date {
            if device.created_date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if device.created_date > end {
                return false;
            }
        }
        true
    }

    /// Apply paging to an already filtered, ordered list.
    pub fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.page_size == 0 {
            return items;
        }
        let size = self.page_size as usize;
        let skip = (self.page_number.max(1) as usize - 1) * size;
        items.into_iter().skip(skip).take(size).collect()
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub num_results: u64,
    pub results: Vec<T>,
}

impl<T> PagedResult<T> {
    pub fn new(num_results: u64, results: Vec<T>) -> Self {
        Self {
            num_results,
            results,
        }
    }
}

/// Device storage as consumed by the pipeline core.
#[async_trait]
pub trait DeviceManagement: Send + Sync {
    /// Store an event for a device.
    async fn create_event(
        &self,
        hardware_id: &str,
        event: &DecodedEvent,
    ) -> ManagementResult<StoredEvent>;

    /// Refresh the last known state of the device's current assignment.
    async fn update_assignment_state(
        &self,
        hardware_id: &str,
        event: &StoredEvent,
    ) -> ManagementResult<()>;

    async fn list_devices(
        &self,
        criteria: &DeviceSearchCriteria,
    ) -> ManagementResult<PagedResult<Device>>;

    async fn get_device(&self, hardware_id: &str) -> ManagementResult<Option<Device>>;

    async fn get_assignment(&self, token: &str) -> ManagementResult<Option<DeviceAssignment>>;

    async fn get_command(&self, token: &str) -> ManagementResult<Option<CommandDefinition>>;
}

/// Device group membership lookups.
#[async_trait]
pub trait DeviceGroups: Send + Sync {
    async fn devices_in_group(
        &self,
        group_token: &str,
        criteria: &DeviceSearchCriteria,
    ) -> ManagementResult<Vec<Device>>;

    async fn devices_in_groups_with_role(
        &self,
        role: &str,
        criteria: &DeviceSearchCriteria,
    ) -> ManagementResult<Vec<Device>>;
}

pub type DynDeviceManagement = Arc<dyn DeviceManagement>;
pub type DynDeviceGroups = Arc<dyn DeviceGroups>;
