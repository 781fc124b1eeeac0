//! JSON codecs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{
    enqueue_time, validate_parameters, CodecContext, CodecError, CodecResult, CommandEncoder,
    EventDecoder,
};
use crate::model::{AlertLevel, CommandExecution, DecodedEvent, EventKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonEventBatch {
    #[serde(default)]
    hardware_id: String,
    #[serde(default)]
    originator: Option<String>,
    #[serde(default)]
    measurements: Vec<JsonMeasurements>,
    #[serde(default)]
    locations: Vec<JsonLocation>,
    #[serde(default)]
    alerts: Vec<JsonAlert>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonEventCommon {
    #[serde(default)]
    event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    update_state: bool,
}

#[derive(Debug, Deserialize)]
struct JsonMeasurements {
    measurements: BTreeMap<String, f64>,
    #[serde(flatten)]
    common: JsonEventCommon,
}

#[derive(Debug, Deserialize)]
struct JsonLocation {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    elevation: Option<f64>,
    #[serde(flatten)]
    common: JsonEventCommon,
}

#[derive(Debug, Deserialize)]
struct JsonAlert {
    level: AlertLevel,
    #[serde(rename = "type", alias = "alertType")]
    alert_type: String,
    message: String,
    #[serde(flatten)]
    common: JsonEventCommon,
}

/// Decodes a JSON event batch for one device.
///
/// Events are emitted locations first, then measurements, then alerts.
/// An entry without `eventDate` takes the `enqueueTime` context value, or
/// stays undated for the collaborator to stamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBatchDecoder;

impl JsonBatchDecoder {
    fn event(
        batch: &JsonEventBatch,
        kind: EventKind,
        common: JsonEventCommon,
        fallback_date: Option<DateTime<Utc>>,
    ) -> DecodedEvent {
        DecodedEvent {
            hardware_id: batch.hardware_id.clone(),
            originator: batch.originator.clone(),
            kind,
            event_date: common.event_date.or(fallback_date),
            metadata: common.metadata,
            update_state: common.update_state,
        }
    }
}

impl EventDecoder for JsonBatchDecoder {
    fn name(&self) -> &str {
        "json-batch"
    }

    fn decode(&self, payload: &[u8], context: &CodecContext) -> CodecResult<Vec<DecodedEvent>> {
        let mut batch: JsonEventBatch = serde_json::from_slice(payload)
            .map_err(|e| CodecError::MalformedPayload(format!("Invalid JSON batch: {}", e)))?;
        if batch.hardware_id.trim().is_empty() {
            return Err(CodecError::MalformedPayload(
                "Event batch has no hardwareId".to_string(),
            ));
        }

        let fallback = enqueue_time(context);
        let locations = std::mem::take(&mut batch.locations);
        let measurements = std::mem::take(&mut batch.measurements);
        let alerts = std::mem::take(&mut batch.alerts);

        let mut events = Vec::with_capacity(locations.len() + measurements.len() + alerts.len());
        for location in locations {
            let kind = EventKind::Location {
                latitude: location.latitude,
                longitude: location.longitude,
                elevation: location.elevation,
            };
            events.push(Self::event(&batch, kind, location.common, fallback));
        }
        for entry in measurements {
            let kind = EventKind::Measurements {
                measurements: entry.measurements,
            };
            events.push(Self::event(&batch, kind, entry.common, fallback));
        }
        for alert in alerts {
            let kind = EventKind::Alert {
                level: alert.level,
                alert_type: alert.alert_type,
                message: alert.message,
            };
            events.push(Self::event(&batch, kind, alert.common, fallback));
        }
        Ok(events)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonCommandFrame<'a> {
    command: &'a str,
    command_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    invocation_id: &'a str,
    hardware_id: &'a str,
    assignment_token: &'a str,
    parameters: BTreeMap<String, String>,
}

/// Encodes commands as UTF-8 JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCommandEncoder;

impl CommandEncoder for JsonCommandEncoder {
    type Encoded = Vec<u8>;

    fn encode(
        &self,
        execution: &CommandExecution,
        _context: &CodecContext,
    ) -> CodecResult<Vec<u8>> {
        let parameters =
            validate_parameters(&execution.command, &execution.invocation.parameter_values)?;
        let frame = JsonCommandFrame {
            command: &execution.command.name,
            command_token: &execution.command.token,
            namespace: execution.command.namespace.as_deref(),
            invocation_id: &execution.invocation.id,
            hardware_id: &execution.hardware_id,
            assignment_token: &execution.assignment_token,
            parameters,
        };
        serde_json::to_vec(&frame).map_err(|e| CodecError::Encoding(e.to_string()))
    }
}
