//! Canonical device, assignment, command and event types.
//!
//! These are the types that flow between the codecs, the inbound
//! pipeline, command destinations and the device-management collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// A registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub hardware_id: String,
    pub specification_token: String,
    /// Token of the current assignment, if the device is assigned.
    #[serde(default)]
    pub assignment_token: Option<String>,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Device {
    pub fn new(hardware_id: impl Into<String>, specification_token: impl Into<String>) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            specification_token: specification_token.into(),
            assignment_token: None,
            created_date: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_assignment(mut self, token: impl Into<String>) -> Self {
        self.assignment_token = Some(token.into());
        self
    }

    pub fn with_created_date(mut self, date: DateTime<Utc>) -> Self {
        self.created_date = date;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.assignment_token.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssignmentStatus {
    #[default]
    Active,
    Missing,
    Released,
}

/// Last known state of an assignment, refreshed by state-updating events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentState {
    pub last_interaction_date: Option<DateTime<Utc>>,
    pub last_location: Option<Location>,
    #[serde(default)]
    pub latest_measurements: BTreeMap<String, f64>,
    pub last_alert: Option<AlertSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub level: AlertLevel,
    pub alert_type: String,
    pub message: String,
}

/// Association between a device and the asset it is attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAssignment {
    pub token: String,
    pub hardware_id: String,
    #[serde(default)]
    pub status: AssignmentStatus,
    pub asset_module_id: Option<String>,
    pub asset_id: Option<String>,
    #[serde(default)]
    pub state: AssignmentState,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DeviceAssignment {
    pub fn new(token: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            hardware_id: hardware_id.into(),
            status: AssignmentStatus::Active,
            asset_module_id: None,
            asset_id: None,
            state: AssignmentState::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_asset(mut self, module_id: impl Into<String>, asset_id: impl Into<String>) -> Self {
        self.asset_module_id = Some(module_id.into());
        self.asset_id = Some(asset_id.into());
        self
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "Info",
            AlertLevel::Warning => "Warning",
            AlertLevel::Error => "Error",
            AlertLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a command to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandInitiator {
    #[default]
    Rest,
    BatchOperation,
    Scheduler,
    Script,
}

/// Kind-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    Measurements {
        measurements: BTreeMap<String, f64>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        elevation: Option<f64>,
    },
    Alert {
        level: AlertLevel,
        alert_type: String,
        message: String,
    },
    CommandInvocation {
        command_token: String,
        #[serde(default)]
        parameter_values: HashMap<String, String>,
        #[serde(default)]
        initiator: CommandInitiator,
        #[serde(default)]
        initiator_id: Option<String>,
    },
    CommandResponse {
        originating_event_id: String,
        #[serde(default)]
        response_event_id: Option<String>,
        response: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Measurements { .. } => "measurements",
            EventKind::Location { .. } => "location",
            EventKind::Alert { .. } => "alert",
            EventKind::CommandInvocation { .. } => "commandInvocation",
            EventKind::CommandResponse { .. } => "commandResponse",
        }
    }
}

/// An event produced by a decoder, not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    pub hardware_id: String,
    /// Correlation token used to route command responses.
    #[serde(default)]
    pub originator: Option<String>,
    pub kind: EventKind,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub update_state: bool,
}

impl DecodedEvent {
    pub fn new(hardware_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            originator: None,
            kind,
            event_date: None,
            metadata: HashMap::new(),
            update_state: false,
        }
    }

    pub fn with_originator(mut self, originator: Option<String>) -> Self {
        self.originator = originator;
        self
    }

    pub fn with_event_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.event_date = date;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_update_state(mut self, update_state: bool) -> Self {
        self.update_state = update_state;
        self
    }
}

/// An event as stored by the device-management collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: String,
    pub hardware_id: String,
    pub assignment_token: Option<String>,
    pub originator: Option<String>,
    pub kind: EventKind,
    pub event_date: DateTime<Utc>,
    pub received_date: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Int32,
    Int64,
    Float,
    Double,
    Bool,
}

impl ParameterType {
    /// Whether `value` parses as this type.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            ParameterType::String => true,
            ParameterType::Int32 => value.parse::<i32>().is_ok(),
            ParameterType::Int64 => value.parse::<i64>().is_ok(),
            ParameterType::Float => value.parse::<f32>().is_ok(),
            ParameterType::Double => value.parse::<f64>().is_ok(),
            ParameterType::Bool => value.parse::<bool>().is_ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParameter {
    pub name: String,
    pub parameter_type: ParameterType,
    #[serde(default)]
    pub required: bool,
}

impl CommandParameter {
    pub fn new(name: impl Into<String>, parameter_type: ParameterType, required: bool) -> Self {
        Self {
            name: name.into(),
            parameter_type,
            required,
        }
    }
}

/// A command a device specification understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefinition {
    pub token: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
}

impl CommandDefinition {
    pub fn new(token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            namespace: None,
            name: name.into(),
            description: None,
            parameters: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_parameter(mut self, parameter: CommandParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// A request to run a command on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInvocation {
    pub id: String,
    pub command_token: String,
    #[serde(default)]
    pub parameter_values: HashMap<String, String>,
    #[serde(default)]
    pub initiator: CommandInitiator,
    #[serde(default)]
    pub initiator_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CommandInvocation {
    pub fn new(command_token: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command_token: command_token.into(),
            parameter_values: HashMap::new(),
            initiator: CommandInitiator::Rest,
            initiator_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter_values.insert(name.into(), value.into());
        self
    }

    pub fn with_initiator(mut self, initiator: CommandInitiator, id: Option<String>) -> Self {
        self.initiator = initiator;
        self.initiator_id = id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A resolved invocation, ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandExecution {
    pub command: CommandDefinition,
    pub invocation: CommandInvocation,
    pub hardware_id: String,
    pub assignment_token: String,
}
