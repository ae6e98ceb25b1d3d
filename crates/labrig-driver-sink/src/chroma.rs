//! Chroma 63600 series modular DC electronic load.
//!
//! Reference: Chroma 63600 Series Programming Manual
//!
//! Protocol Overview:
//! - SCPI over GPIB or USB-TMC, LF terminated
//! - The mainframe holds up to five load modules; each module occupies two
//!   channel numbers, so module `n` is addressed as `CHAN 2n-1`
//! - Static setpoints have two levels (`L1`/`L2`); level 0 in this driver
//!   means "both"
//! - Modes: CC, CR, CV, CP, CZ, CCD, CCFS, TIM, each in a low, medium or
//!   high range (`MODE CCH`)

use async_trait::async_trait;
use labrig_core::{
    scpi, CallArgs, Channel, Driver, DriverCategory, DriverFactory, OperationSet, OperationSpec,
    Result, RigError, Value, ValueKind,
};

/// Load modes accepted by `set_mode`.
pub const VALID_MODES: [&str; 8] = ["CC", "CR", "CV", "CP", "CZ", "CCD", "CCFS", "TIM"];

/// Range suffixes, indexed by `range_setting`.
static RANGES: [char; 3] = ['L', 'M', 'H'];

/// Number of load modules a mainframe holds.
pub const MAX_MODULES: i64 = 5;

/// `(set operation, get operation, argument, command prefix)` for the
/// two-level static setpoints.
const LEVELED: [(&str, &str, &str, &str); 3] = [
    ("set_current", "get_current", "current", "CURR:STAT"),
    ("set_voltage", "get_voltage", "voltage", "VOLT:STAT"),
    ("set_resistance", "get_resistance", "resistance", "RES:STAT"),
];

/// Factory for `Chroma_63600`.
pub struct Chroma63600Factory {
    operations: OperationSet,
}

impl Chroma63600Factory {
    /// Factory with the 63600 operation set.
    pub fn new() -> Self {
        let mut operations = scpi::common_operations()
            .with(OperationSpec::new("set_state").required("state", ValueKind::Bool))
            .with(OperationSpec::new("get_state").returns(ValueKind::Bool))
            .with(OperationSpec::new("on"))
            .with(OperationSpec::new("off"))
            .with(OperationSpec::new("toggle").optional("return_state", ValueKind::Bool))
            .with(OperationSpec::new("set_channel").required("channel", ValueKind::Int))
            .with(OperationSpec::new("get_channel").returns(ValueKind::Int))
            .with(
                OperationSpec::new("set_mode")
                    .required("channel", ValueKind::Int)
                    .required("mode", ValueKind::Str)
                    .optional("range_setting", ValueKind::Int),
            )
            .with(
                OperationSpec::new("get_mode")
                    .required("channel", ValueKind::Int)
                    .returns(ValueKind::List),
            )
            .with(
                OperationSpec::new("set_channel_state")
                    .required("channel", ValueKind::Int)
                    .required("state", ValueKind::Bool),
            )
            .with(
                OperationSpec::new("get_channel_state")
                    .required("channel", ValueKind::Int)
                    .returns(ValueKind::Bool),
            )
            .with(OperationSpec::new("set_cv_current_limit").required("current", ValueKind::Float))
            .with(OperationSpec::new("get_cv_current_limit").returns(ValueKind::Float))
            .with(OperationSpec::new("clear_errors"))
            .with(OperationSpec::new("measure_voltage").returns(ValueKind::Float))
            .with(OperationSpec::new("measure_current").returns(ValueKind::Float))
            .with(OperationSpec::new("measure_power").returns(ValueKind::Float));

        for (set, get, argument, _) in LEVELED {
            operations.insert(
                OperationSpec::new(set)
                    .required(argument, ValueKind::Float)
                    .optional("level", ValueKind::Int),
            );
            operations.insert(OperationSpec::new(get).required("level", ValueKind::Int));
        }
        Self { operations }
    }
}

impl Default for Chroma63600Factory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverFactory for Chroma63600Factory {
    fn name(&self) -> &str {
        "Chroma_63600"
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::Sink
    }

    fn model_token(&self) -> Option<&str> {
        Some("63600")
    }

    fn operations(&self) -> &OperationSet {
        &self.operations
    }

    async fn build(&self, channel: &mut dyn Channel, _kwargs: &CallArgs) -> Result<Box<dyn Driver>> {
        tracing::debug!(address = %channel.address(), "electronic load bound");
        Ok(Box::new(Chroma63600))
    }
}

/// Stateless 63600 driver.
#[derive(Debug)]
pub struct Chroma63600;

/// Levels a setpoint operation touches: 0 means both.
fn levels(operation: &str, level: i64) -> Result<&'static [u8]> {
    match level {
        0 => Ok(&[1, 2]),
        1 => Ok(&[1]),
        2 => Ok(&[2]),
        other => Err(RigError::invalid_argument(
            operation,
            "level",
            format!("expected 0, 1 or 2, got {}", other),
        )),
    }
}

/// Module number to the mainframe channel index.
fn channel_index(operation: &str, module: i64) -> Result<i64> {
    if !(1..=MAX_MODULES).contains(&module) {
        return Err(RigError::invalid_argument(
            operation,
            "channel",
            format!("expected 1..={}, got {}", MAX_MODULES, module),
        ));
    }
    Ok(2 * module - 1)
}

impl Chroma63600 {
    async fn select(channel: &mut dyn Channel, operation: &str, module: i64) -> Result<()> {
        let index = channel_index(operation, module)?;
        channel.write(&format!("CHAN {}", index)).await
    }

    async fn query_f64(channel: &mut dyn Channel, operation: &str, command: &str) -> Result<f64> {
        let response = scpi::query(channel, command).await?;
        scpi::parse_f64(operation, &response, None)
    }

    async fn load_state(channel: &mut dyn Channel, operation: &str) -> Result<bool> {
        let response = scpi::query(channel, "LOAD?").await?;
        scpi::parse_state(operation, &response)
    }

    async fn set_mode(channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        let op = call.operation();
        let mode = call.str("mode")?.to_ascii_uppercase();
        if !VALID_MODES.contains(&mode.as_str()) {
            return Err(RigError::invalid_argument(
                op,
                "mode",
                format!("expected one of {}", VALID_MODES.join(", ")),
            ));
        }
        let range_setting = call.opt_i64("range_setting")?.unwrap_or(1);
        let range = usize::try_from(range_setting)
            .ok()
            .and_then(|i| RANGES.get(i))
            .ok_or_else(|| {
                RigError::invalid_argument(op, "range_setting", "expected 0, 1 or 2")
            })?;
        Self::select(channel, op, call.i64("channel")?).await?;
        scpi::write_unit(channel, &format!("MODE {}{}", mode, range)).await
    }

    async fn get_mode(channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        let op = call.operation();
        Self::select(channel, op, call.i64("channel")?).await?;
        let response = scpi::query(channel, "MODE?").await?;
        let mut mode = response.clone();
        let range = mode
            .pop()
            .and_then(|suffix| RANGES.iter().position(|r| *r == suffix))
            .filter(|_| !mode.is_empty())
            .ok_or_else(|| RigError::protocol(op, &response))?;
        Ok(Value::List(vec![Value::Str(mode), Value::Int(range as i64)]))
    }
}

#[async_trait]
impl Driver for Chroma63600 {
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        let op = call.operation();

        for (set, get, argument, prefix) in LEVELED {
            if op == set {
                let value = call.f64(argument)?;
                for level in levels(op, call.opt_i64("level")?.unwrap_or(0))? {
                    channel.write(&format!("{}:L{} {}", prefix, level, value)).await?;
                }
                return Ok(Value::Null);
            }
            if op == get {
                let requested = call.i64("level")?;
                let mut values = Vec::new();
                for level in levels(op, requested)? {
                    let command = format!("{}:L{}?", prefix, level);
                    values.push(Value::Float(Self::query_f64(channel, op, &command).await?));
                }
                if requested == 0 {
                    return Ok(Value::List(values));
                }
                return Ok(values.pop().unwrap_or(Value::Null));
            }
        }

        match op {
            "set_state" => {
                let state = call.bool("state")?;
                scpi::write_unit(channel, &format!("LOAD {}", scpi::flag(state))).await
            }
            "get_state" => Ok(Value::Bool(Self::load_state(channel, op).await?)),
            "on" => scpi::write_unit(channel, "LOAD 1").await,
            "off" => scpi::write_unit(channel, "LOAD 0").await,
            "toggle" => {
                let state = Self::load_state(channel, op).await?;
                channel.write(&format!("LOAD {}", scpi::flag(!state))).await?;
                if call.opt_bool("return_state")?.unwrap_or(false) {
                    return Ok(Value::Bool(Self::load_state(channel, op).await?));
                }
                Ok(Value::Null)
            }
            "set_channel" => {
                Self::select(channel, op, call.i64("channel")?).await?;
                Ok(Value::Null)
            }
            "get_channel" => {
                let response = scpi::query(channel, "CHAN?").await?;
                let index = scpi::parse_i64(op, &response)?;
                Ok(Value::Int((index + 1) / 2))
            }
            "set_mode" => Self::set_mode(channel, call).await,
            "get_mode" => Self::get_mode(channel, call).await,
            "set_channel_state" => {
                let state = call.bool("state")?;
                Self::select(channel, op, call.i64("channel")?).await?;
                scpi::write_unit(channel, &format!("CHAN:ACT {}", scpi::flag(state))).await
            }
            "get_channel_state" => {
                Self::select(channel, op, call.i64("channel")?).await?;
                let response = scpi::query(channel, "CHAN:ACT?").await?;
                Ok(Value::Bool(scpi::parse_state(op, &response)?))
            }
            "set_cv_current_limit" => {
                let current = call.f64("current")?;
                scpi::write_unit(channel, &format!("VOLT:STAT:ILIM {}", current)).await
            }
            "get_cv_current_limit" => Ok(Value::Float(
                Self::query_f64(channel, op, "VOLT:STAT:ILIM?").await?,
            )),
            "clear_errors" => scpi::write_unit(channel, "LOAD:PROT:CLE").await,
            "measure_voltage" => Ok(Value::Float(Self::query_f64(channel, op, "MEAS:VOLT?").await?)),
            "measure_current" => Ok(Value::Float(Self::query_f64(channel, op, "MEAS:CURR?").await?)),
            "measure_power" => Ok(Value::Float(Self::query_f64(channel, op, "FETC:POW?").await?)),
            _ => scpi::invoke_common(channel, call).await,
        }
    }
}
