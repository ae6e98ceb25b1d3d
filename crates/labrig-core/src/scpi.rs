//! IEEE 488.2 / SCPI helpers shared by message-based instrument drivers.
//!
//! Every built-in driver exposes [`common_operations`] alongside its own set
//! and falls back to [`invoke_common`] for calls it does not handle itself.

use crate::channel::Channel;
use crate::error::{Result, RigError};
use crate::operation::{CallArgs, OperationSet, OperationSpec};
use crate::value::{Value, ValueKind};

/// Operations every SCPI instrument understands.
pub fn common_operations() -> OperationSet {
    OperationSet::new()
        .with(OperationSpec::new("idn").returns(ValueKind::Str))
        .with(OperationSpec::new("reset"))
        .with(OperationSpec::new("clear_status"))
        .with(OperationSpec::new("write_resource").required("message", ValueKind::Str))
        .with(
            OperationSpec::new("query_resource")
                .required("message", ValueKind::Str)
                .returns(ValueKind::Str),
        )
}

/// Execute one of the [`common_operations`].
///
/// Returns `UnknownOperation` for anything else, so drivers can use it as
/// the fallback arm of their dispatch `match`.
pub async fn invoke_common(channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
    match call.operation() {
        "idn" => Ok(Value::Str(query(channel, "*IDN?").await?)),
        "reset" => write_unit(channel, "*RST").await,
        "clear_status" => write_unit(channel, "*CLS").await,
        "write_resource" => write_unit(channel, call.str("message")?).await,
        "query_resource" => Ok(Value::Str(query(channel, call.str("message")?).await?)),
        other => Err(RigError::UnknownOperation {
            operation: other.to_string(),
        }),
    }
}

/// Write a command and report `Null`.
pub async fn write_unit(channel: &mut dyn Channel, message: &str) -> Result<Value> {
    channel.write(message).await?;
    Ok(Value::Null)
}

/// Query and trim surrounding whitespace.
pub async fn query(channel: &mut dyn Channel, message: &str) -> Result<String> {
    Ok(channel.query(message).await?.trim().to_string())
}

/// SCPI boolean argument.
pub fn flag(state: bool) -> u8 {
    u8::from(state)
}

/// Parse a float response, ignoring surrounding whitespace and an optional
/// unit suffix (`"12.0 V"`, `"1.5A"`).
pub fn parse_f64(operation: &str, response: &str, unit: Option<&str>) -> Result<f64> {
    let mut text = response.trim();
    if let Some(unit) = unit {
        text = text.strip_suffix(unit).unwrap_or(text).trim();
    }
    text.parse::<f64>()
        .map_err(|_| RigError::protocol(operation, response))
}

/// Parse an integer response; tolerates a float rendering such as `"3.0"`.
pub fn parse_i64(operation: &str, response: &str) -> Result<i64> {
    let text = response.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Ok(value);
    }
    match text.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => Ok(value as i64),
        _ => Err(RigError::protocol(operation, response)),
    }
}

/// Parse an on/off style response: `ON`/`1` are true, `OFF`/`0` are false.
pub fn parse_state(operation: &str, response: &str) -> Result<bool> {
    match response.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" => Ok(true),
        "OFF" | "0" => Ok(false),
        _ => Err(RigError::protocol(operation, response)),
    }
}
