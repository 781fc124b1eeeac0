//! Codec registry.
//!
//! Decoders turn raw transport payloads into [`DecodedEvent`]s; encoders
//! turn a resolved [`CommandExecution`] into a transport encoding. Both are
//! pure functions over their inputs plus a [`CodecContext`] and are safe to
//! call concurrently without synchronization.
//!
//! The [`CodecRegistry`] maps payload kinds to decoders and command kinds
//! to byte encoders, one entry per kind.

pub mod binary;
pub mod debug;
pub mod json;
pub mod text;

use chrono::{DateTime, TimeZone, Utc};
use fleetwire_core::config::context_keys;
use fleetwire_core::{Coded, ErrorCode};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::model::{CommandDefinition, CommandExecution, DecodedEvent};

pub use binary::{
    BinaryCommandEncoder, BinaryCommandFrame, BinaryDecoder, BinaryEnvelope, BinaryMessage,
};
pub use debug::PayloadLoggerDecoder;
pub use json::{JsonBatchDecoder, JsonCommandEncoder};
pub use text::TextCommandEncoder;

/// Transport context handed to codecs (topic, enqueue time, source id...).
pub type CodecContext = HashMap<String, String>;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload could not be decoded.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command '{command}' is missing required parameter '{parameter}'")]
    MissingParameter { command: String, parameter: String },

    #[error("Command '{command}' has no parameter named '{parameter}'")]
    UnknownParameter { command: String, parameter: String },

    #[error("Command '{command}' parameter '{parameter}' is not a valid {expected}")]
    InvalidParameter {
        command: String,
        parameter: String,
        expected: String,
    },

    /// The command could not be serialized.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Duplicate or missing registration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Coded for CodecError {
    fn code(&self) -> ErrorCode {
        match self {
            CodecError::MalformedPayload(_) => ErrorCode::MalformedPayload,
            CodecError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            CodecError::MissingParameter { .. } => ErrorCode::MissingCommandParameter,
            CodecError::UnknownParameter { .. } | CodecError::InvalidParameter { .. } => {
                ErrorCode::UnknownCommandParameter
            }
            CodecError::Encoding(_) => ErrorCode::EncodingFailed,
            CodecError::Configuration(_) => ErrorCode::Configuration,
        }
    }
}

/// Decodes one payload into zero or more events.
pub trait EventDecoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn decode(&self, payload: &[u8], context: &CodecContext) -> CodecResult<Vec<DecodedEvent>>;
}

/// Encodes a resolved command for a transport.
pub trait CommandEncoder: Send + Sync {
    type Encoded: Send + 'static;

    fn encode(
        &self,
        execution: &CommandExecution,
        context: &CodecContext,
    ) -> CodecResult<Self::Encoded>;
}

pub type DynEventDecoder = Arc<dyn EventDecoder>;
pub type DynByteEncoder = Arc<dyn CommandEncoder<Encoded = Vec<u8>>>;

/// Payload-kind to decoder and command-kind to encoder mapping.
///
/// Built once at assembly time and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct CodecRegistry {
    decoders: HashMap<String, DynEventDecoder>,
    encoders: HashMap<String, DynByteEncoder>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in codecs under their default kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.decoders.insert("json-batch".into(), Arc::new(JsonBatchDecoder));
        registry.decoders.insert("binary".into(), Arc::new(BinaryDecoder));
        registry.decoders.insert("debug".into(), Arc::new(PayloadLoggerDecoder));
        registry.encoders.insert("json".into(), Arc::new(JsonCommandEncoder));
        registry.encoders.insert("binary".into(), Arc::new(BinaryCommandEncoder));
        registry
    }

    pub fn register_decoder(
        &mut self,
        kind: impl Into<String>,
        decoder: DynEventDecoder,
    ) -> CodecResult<()> {
        let kind = kind.into();
        if self.decoders.contains_key(&kind) {
            return Err(CodecError::Configuration(format!(
                "Decoder already registered for payload kind '{}'",
                kind
            )));
        }
        tracing::debug!(kind = %kind, decoder = decoder.name(), "Decoder registered");
        self.decoders.insert(kind, decoder);
        Ok(())
    }

    pub fn register_encoder(
        &mut self,
        kind: impl Into<String>,
        encoder: DynByteEncoder,
    ) -> CodecResult<()> {
        let kind = kind.into();
        if self.encoders.contains_key(&kind) {
            return Err(CodecError::Configuration(format!(
                "Encoder already registered for command kind '{}'",
                kind
            )));
        }
        self.encoders.insert(kind, encoder);
        Ok(())
    }

    pub fn decoder(&self, kind: &str) -> Option<DynEventDecoder> {
        self.decoders.get(kind).cloned()
    }

    pub fn encoder(&self, kind: &str) -> Option<DynByteEncoder> {
        self.encoders.get(kind).cloned()
    }

    /// Decode with the decoder registered for `kind`.
    pub fn decode(
        &self,
        kind: &str,
        payload: &[u8],
        context: &CodecContext,
    ) -> CodecResult<Vec<DecodedEvent>> {
        let decoder = self.decoder(kind).ok_or_else(|| {
            CodecError::Configuration(format!("No decoder registered for payload kind '{}'", kind))
        })?;
        decoder.decode(payload, context)
    }

    /// Encode with the encoder registered for `kind`.
    pub fn encode(
        &self,
        kind: &str,
        execution: &CommandExecution,
        context: &CodecContext,
    ) -> CodecResult<Vec<u8>> {
        let encoder = self.encoder(kind).ok_or_else(|| {
            CodecError::Configuration(format!("No encoder registered for command kind '{}'", kind))
        })?;
        encoder.encode(execution, context)
    }

    pub fn decoder_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.decoders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn encoder_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.encoders.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("decoders", &self.decoder_kinds())
            .field("encoders", &self.encoder_kinds())
            .finish()
    }
}

/// Check invocation values against the command definition.
///
/// Returns the parameter values in name order.
pub fn validate_parameters(
    command: &CommandDefinition,
    values: &HashMap<String, String>,
) -> CodecResult<BTreeMap<String, String>> {
    for name in values.keys() {
        if !command.parameters.iter().any(|p| &p.name == name) {
            return Err(CodecError::UnknownParameter {
                command: command.token.clone(),
                parameter: name.clone(),
            });
        }
    }

    let mut resolved = BTreeMap::new();
    for parameter in &command.parameters {
        match values.get(&parameter.name) {
            Some(value) if !value.trim().is_empty() => {
                if !parameter.parameter_type.accepts(value) {
                    return Err(CodecError::InvalidParameter {
                        command: command.token.clone(),
                        parameter: parameter.name.clone(),
                        expected: format!("{:?}", parameter.parameter_type),
                    });
                }
                resolved.insert(parameter.name.clone(), value.clone());
            }
            _ if parameter.required => {
                return Err(CodecError::MissingParameter {
                    command: command.token.clone(),
                    parameter: parameter.name.clone(),
                });
            }
            _ => {}
        }
    }
    Ok(resolved)
}

/// Event date from the `enqueueTime` context entry (epoch millis).
pub fn enqueue_time(context: &CodecContext) -> Option<DateTime<Utc>> {
    context
        .get(context_keys::ENQUEUE_TIME)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandParameter, ParameterType};

    fn reboot() -> CommandDefinition {
        CommandDefinition::new("reboot", "reboot")
            .with_parameter(CommandParameter::new("delay", ParameterType::Int32, true))
            .with_parameter(CommandParameter::new("reason", ParameterType::String, false))
    }

    #[test]
    fn test_validate_parameters() {
        let mut values = HashMap::new();
        values.insert("delay".to_string(), "5".to_string());
        let resolved = validate_parameters(&reboot(), &values).unwrap();
        assert_eq!(resolved.get("delay").map(String::as_str), Some("5"));

        values.insert("delay".to_string(), "  ".to_string());
        let err = validate_parameters(&reboot(), &values).unwrap_err();
        assert!(matches!(err, CodecError::MissingParameter { .. }));
        assert_eq!(err.code(), ErrorCode::MissingCommandParameter);

        values.insert("delay".to_string(), "soon".to_string());
        assert!(matches!(
            validate_parameters(&reboot(), &values).unwrap_err(),
            CodecError::InvalidParameter { .. }
        ));

        values.insert("delay".to_string(), "1".to_string());
        values.insert("force".to_string(), "true".to_string());
        assert!(matches!(
            validate_parameters(&reboot(), &values).unwrap_err(),
            CodecError::UnknownParameter { .. }
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = CodecRegistry::with_defaults();
        let err = registry
            .register_decoder("json-batch", Arc::new(JsonBatchDecoder))
            .unwrap_err();
        assert!(matches!(err, CodecError::Configuration(_)));
        registry
            .register_decoder("json-batch-v2", Arc::new(JsonBatchDecoder))
            .unwrap();
        assert!(registry.decoder("json-batch-v2").is_some());
        assert!(registry.decoder("JSON-BATCH").is_none());
    }

    #[test]
    fn test_enqueue_time() {
        let mut context = CodecContext::new();
        assert!(enqueue_time(&context).is_none());
        context.insert(context_keys::ENQUEUE_TIME.into(), "1700000000000".into());
        assert_eq!(enqueue_time(&context).unwrap().timestamp(), 1_700_000_000);
        context.insert(context_keys::ENQUEUE_TIME.into(), "nope".into());
        assert!(enqueue_time(&context).is_none());
    }
}
