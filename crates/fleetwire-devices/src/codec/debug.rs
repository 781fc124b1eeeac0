//! Diagnostic decoder.

use super::{CodecContext, CodecResult, EventDecoder};
use crate::model::DecodedEvent;

/// Logs every payload as text and hex, then produces no events.
///
/// Useful while bringing up a new transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadLoggerDecoder;

impl EventDecoder for PayloadLoggerDecoder {
    fn name(&self) -> &str {
        "debug"
    }

    fn decode(&self, payload: &[u8], context: &CodecContext) -> CodecResult<Vec<DecodedEvent>> {
        tracing::info!(
            bytes = payload.len(),
            text = %String::from_utf8_lossy(payload),
            hex = %hex::encode(payload),
            context = ?context,
            "Received payload"
        );
        Ok(Vec::new())
    }
}
