//! Structured error codes.
//!
//! Every error type in FleetWire maps its variants onto an [`ErrorCode`]
//! and an [`ErrorLevel`] through the [`Coded`] trait, so callers get a
//! symbolic code next to the human-readable message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Info,
    Warning,
    Error,
}

impl ErrorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLevel::Info => "info",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Error => "error",
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    // Configuration and lifecycle
    Configuration,
    InvalidLifecycleTransition,
    ComponentInErrorState,
    ComponentNotRunning,

    // Device model
    InvalidDeviceSpecificationToken,
    InvalidDeviceSlotPath,
    InvalidDeviceGroupCriteria,
    UnknownDevice,
    UnknownAssignment,

    // Commands and codecs
    UnknownCommand,
    MissingCommandParameter,
    UnknownCommandParameter,
    MalformedPayload,
    EncodingFailed,
    DeliveryFailed,

    // Batch operations
    UnknownBatchOperation,
    DuplicateBatchOperation,
    BatchOperationInProgress,

    // Assets
    UnknownAssetModule,
    DuplicateAssetModule,
    AssetSourceFailed,

    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Configuration => "Configuration",
            ErrorCode::InvalidLifecycleTransition => "InvalidLifecycleTransition",
            ErrorCode::ComponentInErrorState => "ComponentInErrorState",
            ErrorCode::ComponentNotRunning => "ComponentNotRunning",
            ErrorCode::InvalidDeviceSpecificationToken => "InvalidDeviceSpecificationToken",
            ErrorCode::InvalidDeviceSlotPath => "InvalidDeviceSlotPath",
            ErrorCode::InvalidDeviceGroupCriteria => "InvalidDeviceGroupCriteria",
            ErrorCode::UnknownDevice => "UnknownDevice",
            ErrorCode::UnknownAssignment => "UnknownAssignment",
            ErrorCode::UnknownCommand => "UnknownCommand",
            ErrorCode::MissingCommandParameter => "MissingCommandParameter",
            ErrorCode::UnknownCommandParameter => "UnknownCommandParameter",
            ErrorCode::MalformedPayload => "MalformedPayload",
            ErrorCode::EncodingFailed => "EncodingFailed",
            ErrorCode::DeliveryFailed => "DeliveryFailed",
            ErrorCode::UnknownBatchOperation => "UnknownBatchOperation",
            ErrorCode::DuplicateBatchOperation => "DuplicateBatchOperation",
            ErrorCode::BatchOperationInProgress => "BatchOperationInProgress",
            ErrorCode::UnknownAssetModule => "UnknownAssetModule",
            ErrorCode::DuplicateAssetModule => "DuplicateAssetModule",
            ErrorCode::AssetSourceFailed => "AssetSourceFailed",
            ErrorCode::Internal => "Internal",
        }
    }

    /// Level used when an error type does not override it.
    pub fn default_level(&self) -> ErrorLevel {
        match self {
            ErrorCode::MalformedPayload
            | ErrorCode::EncodingFailed
            | ErrorCode::DeliveryFailed
            | ErrorCode::MissingCommandParameter
            | ErrorCode::UnknownCommandParameter
            | ErrorCode::ComponentNotRunning => ErrorLevel::Warning,
            _ => ErrorLevel::Error,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that carry a structured code.
pub trait Coded {
    fn code(&self) -> ErrorCode;

    fn level(&self) -> ErrorLevel {
        self.code().default_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(
            ErrorCode::InvalidDeviceSpecificationToken.default_level(),
            ErrorLevel::Error
        );
        assert_eq!(ErrorCode::MalformedPayload.default_level(), ErrorLevel::Warning);
        assert_eq!(ErrorCode::UnknownAssetModule.default_level(), ErrorLevel::Error);
    }

    #[test]
    fn test_code_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorCode::UnknownAssetModule).unwrap();
        assert_eq!(json, "\"unknownAssetModule\"");
        assert_eq!(ErrorCode::UnknownAssetModule.to_string(), "UnknownAssetModule");
    }
}
