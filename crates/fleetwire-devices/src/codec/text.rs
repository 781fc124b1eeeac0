//! Plain text command encoding for SMS-style transports.

use super::{validate_parameters, CodecContext, CodecResult, CommandEncoder};
use crate::model::CommandExecution;

/// Encodes a command as `name key=value ...`.
///
/// Parameters appear in name order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCommandEncoder;

impl CommandEncoder for TextCommandEncoder {
    type Encoded = String;

    fn encode(&self, execution: &CommandExecution, _context: &CodecContext) -> CodecResult<String> {
        let parameters =
            validate_parameters(&execution.command, &execution.invocation.parameter_values)?;
        let mut line = execution.command.name.clone();
        for (name, value) in parameters {
            line.push(' ');
            line.push_str(&name);
            line.push('=');
            line.push_str(&value);
        }
        Ok(line)
    }
}
