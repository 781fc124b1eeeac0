//! Compact binary codecs built on `bincode`.
//!
//! One inbound payload carries exactly one [`BinaryEnvelope`]; one outbound
//! command becomes one [`BinaryCommandFrame`].

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    enqueue_time, validate_parameters, CodecContext, CodecError, CodecResult, CommandEncoder,
    EventDecoder,
};
use crate::model::{AlertLevel, CommandExecution, DecodedEvent, EventKind};

/// Inbound binary message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BinaryMessage {
    Measurements(BTreeMap<String, f64>),
    Location {
        latitude: f64,
        longitude: f64,
        elevation: Option<f64>,
    },
    Alert {
        level: AlertLevel,
        alert_type: String,
        message: String,
    },
    /// Device acknowledgement of a previously delivered command.
    Acknowledge {
        originating_event_id: String,
        response: String,
    },
}

/// Inbound binary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryEnvelope {
    pub hardware_id: String,
    pub originator: Option<String>,
    /// Event time in epoch milliseconds.
    pub event_date_millis: Option<i64>,
    pub update_state: bool,
    pub message: BinaryMessage,
}

impl BinaryEnvelope {
    pub fn new(hardware_id: impl Into<String>, message: BinaryMessage) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            originator: None,
            event_date_millis: None,
            update_state: false,
            message,
        }
    }

    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CodecError::Encoding(e.to_string()))
    }
}

/// Decodes a single [`BinaryEnvelope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryDecoder;

impl EventDecoder for BinaryDecoder {
    fn name(&self) -> &str {
        "binary"
    }

    fn decode(&self, payload: &[u8], context: &CodecContext) -> CodecResult<Vec<DecodedEvent>> {
        let envelope: BinaryEnvelope = bincode::deserialize(payload)
            .map_err(|e| CodecError::MalformedPayload(format!("Invalid binary envelope: {}", e)))?;
        if envelope.hardware_id.trim().is_empty() {
            return Err(CodecError::MalformedPayload(
                "Binary envelope has no hardware id".to_string(),
            ));
        }

        let event_date = envelope
            .event_date_millis
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .or_else(|| enqueue_time(context));

        let kind = match envelope.message {
            BinaryMessage::Measurements(measurements) => EventKind::Measurements { measurements },
            BinaryMessage::Location {
                latitude,
                longitude,
                elevation,
            } => EventKind::Location {
                latitude,
                longitude,
                elevation,
            },
            BinaryMessage::Alert {
                level,
                alert_type,
                message,
            } => EventKind::Alert {
                level,
                alert_type,
                message,
            },
            BinaryMessage::Acknowledge {
                originating_event_id,
                response,
            } => EventKind::CommandResponse {
                originating_event_id,
                response_event_id: None,
                response,
            },
        };

        let event = DecodedEvent::new(envelope.hardware_id, kind)
            .with_originator(envelope.originator)
            .with_event_date(event_date)
            .with_update_state(envelope.update_state);
        Ok(vec![event])
    }
}

/// Outbound binary command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryCommandFrame {
    pub command_token: String,
    pub invocation_id: String,
    pub hardware_id: String,
    pub assignment_token: String,
    pub parameters: BTreeMap<String, String>,
}

impl BinaryCommandFrame {
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        bincode::deserialize(bytes).map_err(|e| CodecError::MalformedPayload(e.to_string()))
    }
}

/// Encodes commands as [`BinaryCommandFrame`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCommandEncoder;

impl CommandEncoder for BinaryCommandEncoder {
    type Encoded = Vec<u8>;

    fn encode(
        &self,
        execution: &CommandExecution,
        _context: &CodecContext,
    ) -> CodecResult<Vec<u8>> {
        let parameters =
            validate_parameters(&execution.command, &execution.invocation.parameter_values)?;
        let frame = BinaryCommandFrame {
            command_token: execution.command.token.clone(),
            invocation_id: execution.invocation.id.clone(),
            hardware_id: execution.hardware_id.clone(),
            assignment_token: execution.assignment_token.clone(),
            parameters,
        };
        bincode::serialize(&frame).map_err(|e| CodecError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledge_becomes_command_response() {
        let mut envelope = BinaryEnvelope::new(
            "dev-7",
            BinaryMessage::Acknowledge {
                originating_event_id: "inv-1".into(),
                response: "ok".into(),
            },
        );
        envelope.originator = Some("inv-1".into());
        envelope.event_date_millis = Some(1_700_000_000_000);

        let events = BinaryDecoder
            .decode(&envelope.to_bytes().unwrap(), &CodecContext::new())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].hardware_id, "dev-7");
        assert_eq!(events[0].originator.as_deref(), Some("inv-1"));
        assert_eq!(events[0].event_date.unwrap().timestamp(), 1_700_000_000);
        assert!(matches!(
            &events[0].kind,
            EventKind::CommandResponse {
                originating_event_id,
                ..
            } if originating_event_id == "inv-1"
        ));
    }

    #[test]
    fn test_decode_is_repeatable() {
        let envelope = BinaryEnvelope::new(
            "dev-7",
            BinaryMessage::Measurements(BTreeMap::from([
                ("temp".to_string(), 20.5),
                ("rpm".to_string(), 900.0),
            ])),
        );
        let payload = envelope.to_bytes().unwrap();

        let mut enqueued = CodecContext::new();
        enqueued.insert(
            fleetwire_core::config::context_keys::ENQUEUE_TIME.into(),
            "1700000000000".into(),
        );
        let registry = crate::codec::CodecRegistry::with_defaults();

        for context in [CodecContext::new(), enqueued] {
            let first = BinaryDecoder.decode(&payload, &context).unwrap();
            let second = BinaryDecoder.decode(&payload, &context).unwrap();
            assert_eq!(first, second);
            assert_eq!(registry.decode("binary", &payload, &context).unwrap(), first);
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = BinaryDecoder
            .decode(&[0xff, 0x01], &CodecContext::new())
            .unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload(_)));
    }
}
