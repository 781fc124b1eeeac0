//! In-memory device management.
//!
//! Backs the standalone CLI and the test suites. Safe for concurrent reads
//! and writes per device.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

use crate::management::{
    DeviceGroups, DeviceManagement, DeviceSearchCriteria, ManagementError, ManagementResult,
    PagedResult,
};
use crate::model::{
    AlertSummary, CommandDefinition, DecodedEvent, Device, DeviceAssignment, EventKind, Location,
    StoredEvent,
};

#[derive(Debug, Clone)]
struct DeviceGroup {
    roles: Vec<String>,
    members: Vec<String>,
}

/// Device, assignment, command, group and event storage in `DashMap`s.
#[derive(Debug, Default)]
pub struct InMemoryDeviceManagement {
    devices: DashMap<String, Device>,
    assignments: DashMap<String, DeviceAssignment>,
    commands: DashMap<String, CommandDefinition>,
    groups: DashMap<String, DeviceGroup>,
    events: DashMap<String, Vec<StoredEvent>>,
}

impl InMemoryDeviceManagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: Device) {
        self.devices.insert(device.hardware_id.clone(), device);
    }

    /// Store an assignment and point its device at it.
    pub fn add_assignment(&self, assignment: DeviceAssignment) {
        if let Some(mut device) = self.devices.get_mut(&assignment.hardware_id) {
            device.assignment_token = Some(assignment.token.clone());
        }
        self.assignments.insert(assignment.token.clone(), assignment);
    }

    pub fn add_command(&self, command: CommandDefinition) {
        self.commands.insert(command.token.clone(), command);
    }

    /// Create or replace a group with its roles and ordered members.
    pub fn add_group(&self, token: impl Into<String>, roles: &[&str], members: &[&str]) {
        self.groups.insert(
            token.into(),
            DeviceGroup {
                roles: roles.iter().map(|r| r.to_string()).collect(),
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
    }

    /// Events stored for a device, oldest first.
    pub fn events_for(&self, hardware_id: &str) -> Vec<StoredEvent> {
        self.events
            .get(hardware_id)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.events.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn assignment(&self, token: &str) -> Option<DeviceAssignment> {
        self.assignments.get(token).map(|a| a.clone())
    }

    fn members_matching(
        &self,
        members: &[String],
        seen: &mut HashSet<String>,
        criteria: &DeviceSearchCriteria,
        out: &mut Vec<Device>,
    ) {
        for hardware_id in members {
            if !seen.insert(hardware_id.clone()) {
                continue;
            }
            if let Some(device) = self.devices.get(hardware_id) {
                if criteria.matches(&device) {
                    out.push(device.clone());
                }
            }
        }
    }
}

#[async_trait]
impl DeviceManagement for InMemoryDeviceManagement {
    async fn create_event(
        &self,
        hardware_id: &str,
        event: &DecodedEvent,
    ) -> ManagementResult<StoredEvent> {
        let assignment_token = self
            .devices
            .get(hardware_id)
            .ok_or_else(|| ManagementError::UnknownDevice(hardware_id.to_string()))?
            .assignment_token
            .clone();

        let now = Utc::now();
        let stored = StoredEvent {
            id: Uuid::new_v4().to_string(),
            hardware_id: hardware_id.to_string(),
            assignment_token,
            originator: event.originator.clone(),
            kind: event.kind.clone(),
            event_date: event.event_date.unwrap_or(now),
            received_date: now,
            metadata: event.metadata.clone(),
        };
        self.events
            .entry(hardware_id.to_string())
            .or_default()
            .push(stored.clone());
        tracing::debug!(
            hardware_id,
            event_id = %stored.id,
            kind = stored.kind.name(),
            "Event stored"
        );
        Ok(stored)
    }

    async fn update_assignment_state(
        &self,
        hardware_id: &str,
        event: &StoredEvent,
    ) -> ManagementResult<()> {
        let token = self
            .devices
            .get(hardware_id)
            .ok_or_else(|| ManagementError::UnknownDevice(hardware_id.to_string()))?
            .assignment_token
            .clone()
            .ok_or_else(|| ManagementError::NotAssigned(hardware_id.to_string()))?;

        let mut assignment = self
            .assignments
            .get_mut(&token)
            .ok_or_else(|| ManagementError::UnknownAssignment(token.clone()))?;

        let state = &mut assignment.state;
        state.last_interaction_date = Some(event.event_date);
        match &event.kind {
            EventKind::Measurements { measurements } => {
                for (name, value) in measurements {
                    state.latest_measurements.insert(name.clone(), *value);
                }
            }
            EventKind::Location {
                latitude,
                longitude,
                elevation,
            } => {
                state.last_location = Some(Location {
                    latitude: *latitude,
                    longitude: *longitude,
                    elevation: *elevation,
                });
            }
            EventKind::Alert {
                level,
                alert_type,
                message,
            } => {
                state.last_alert = Some(AlertSummary {
                    level: *level,
                    alert_type: alert_type.clone(),
                    message: message.clone(),
                });
            }
            EventKind::CommandInvocation { .. } | EventKind::CommandResponse { .. } => {}
        }
        Ok(())
    }

    async fn list_devices(
        &self,
        criteria: &DeviceSearchCriteria,
    ) -> ManagementResult<PagedResult<Device>> {
        let mut matches: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| criteria.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then_with(|| a.hardware_id.cmp(&b.hardware_id))
        });
        let total = matches.len() as u64;
        Ok(PagedResult::new(total, criteria.page(matches)))
    }

    async fn get_device(&self, hardware_id: &str) -> ManagementResult<Option<Device>> {
        Ok(self.devices.get(hardware_id).map(|d| d.clone()))
    }

    async fn get_assignment(&self, token: &str) -> ManagementResult<Option<DeviceAssignment>> {
        Ok(self.assignments.get(token).map(|a| a.clone()))
    }

    async fn get_command(&self, token: &str) -> ManagementResult<Option<CommandDefinition>> {
        Ok(self.commands.get(token).map(|c| c.clone()))
    }
}

#[async_trait]
impl DeviceGroups for InMemoryDeviceManagement {
    async fn devices_in_group(
        &self,
        group_token: &str,
        criteria: &DeviceSearchCriteria,
    ) -> ManagementResult<Vec<Device>> {
        let members = match self.groups.get(group_token) {
            Some(group) => group.members.clone(),
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        self.members_matching(&members, &mut HashSet::new(), criteria, &mut out);
        Ok(criteria.page(out))
    }

    async fn devices_in_groups_with_role(
        &self,
        role: &str,
        criteria: &DeviceSearchCriteria,
    ) -> ManagementResult<Vec<Device>> {
        let mut groups: Vec<(String, Vec<String>)> = self
            .groups
            .iter()
            .filter(|entry| entry.value().roles.iter().any(|r| r == role))
            .map(|entry| (entry.key().clone(), entry.value().members.clone()))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (_, members) in groups {
            self.members_matching(&members, &mut seen, criteria, &mut out);
        }
        Ok(criteria.page(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertLevel;
    use chrono::{Duration, TimeZone};

    fn store() -> InMemoryDeviceManagement {
        let store = InMemoryDeviceManagement::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for (i, spec) in ["tracker", "tracker", "meter"].iter().enumerate() {
            store.add_device(
                Device::new(format!("dev-{}", i + 1), *spec)
                    .with_created_date(base + Duration::days(i as i64)),
            );
        }
        store.add_assignment(DeviceAssignment::new("asg-1", "dev-1"));
        store
    }

    #[test]
    fn test_lookups_of_missing_entities() {
        let store = store();
        tokio_test::block_on(async {
            assert!(store.get_device("nope").await.unwrap().is_none());
            assert!(store.get_assignment("asg-9").await.unwrap().is_none());
            assert!(store.get_command("cmd-x").await.unwrap().is_none());
            assert!(store.get_device("dev-3").await.unwrap().is_some());
        });
        assert!(store.events_for("dev-1").is_empty());
    }

    #[tokio::test]
    async fn test_create_event_unknown_device() {
        let store = store();
        let event = DecodedEvent::new(
            "missing",
            EventKind::Measurements {
                measurements: Default::default(),
            },
        );
        let err = store.create_event("missing", &event).await.unwrap_err();
        assert!(matches!(err, ManagementError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_update_assignment_state_from_alert() {
        let store = store();
        let event = DecodedEvent::new(
            "dev-1",
            EventKind::Alert {
                level: AlertLevel::Warning,
                alert_type: "battery.low".into(),
                message: "12%".into(),
            },
        );
        let stored = store.create_event("dev-1", &event).await.unwrap();
        assert_eq!(stored.assignment_token.as_deref(), Some("asg-1"));
        store.update_assignment_state("dev-1", &stored).await.unwrap();

        let state = store.assignment("asg-1").unwrap().state;
        assert_eq!(state.last_alert.unwrap().alert_type, "battery.low");
        assert!(state.last_interaction_date.is_some());

        let err = store
            .update_assignment_state("dev-2", &stored)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagementError::NotAssigned(_)));
    }

    #[tokio::test]
    async fn test_list_devices_filters_and_orders() {
        let store = store();
        let trackers = store
            .list_devices(&DeviceSearchCriteria::all().with_specification("tracker"))
            .await
            .unwrap();
        assert_eq!(trackers.num_results, 2);
        let ids: Vec<_> = trackers.results.iter().map(|d| d.hardware_id.as_str()).collect();
        assert_eq!(ids, vec!["dev-1", "dev-2"]);

        let mut unassigned = DeviceSearchCriteria::all().with_specification("tracker");
        unassigned.exclude_assigned = true;
        let result = store.list_devices(&unassigned).await.unwrap();
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].hardware_id, "dev-2");
    }

    #[tokio::test]
    async fn test_groups_with_role_deduplicates() {
        let store = store();
        store.add_group("g-a", &["fleet"], &["dev-2", "dev-1"]);
        store.add_group("g-b", &["fleet", "ops"], &["dev-1", "dev-3"]);

        let devices = store
            .devices_in_groups_with_role("fleet", &DeviceSearchCriteria::all())
            .await
            .unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.hardware_id.as_str()).collect();
        assert_eq!(ids, vec!["dev-2", "dev-1", "dev-3"]);

        let none = store
            .devices_in_group("unknown", &DeviceSearchCriteria::all())
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
