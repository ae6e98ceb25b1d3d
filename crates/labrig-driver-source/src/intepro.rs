//! Intepro PSI 9000 series programmable supplies.
//!
//! The supply ignores setting commands until it is locked for remote use,
//! so the driver sends `SYST:LOCK 1` on build and `SYST:LOCK 0` on
//! shutdown. Readbacks carry a unit suffix (`"12.00 V"`), which is stripped.

use async_trait::async_trait;
use labrig_core::{
    scpi, CallArgs, Channel, Driver, DriverCategory, DriverFactory, OperationSet, OperationSpec,
    Result, RigError, Value, ValueKind,
};

/// A settable quantity with a readback.
struct Setpoint {
    set: &'static str,
    get: &'static str,
    argument: &'static str,
    command: &'static str,
    unit: &'static str,
}

static SETPOINTS: [Setpoint; 6] = [
    Setpoint { set: "set_voltage", get: "get_voltage", argument: "voltage", command: "VOLT", unit: "V" },
    Setpoint { set: "set_current", get: "get_current", argument: "current", command: "CURR", unit: "A" },
    Setpoint { set: "set_power", get: "get_power", argument: "power", command: "POW", unit: "W" },
    Setpoint { set: "set_ovp", get: "get_ovp", argument: "voltage", command: "SOUR:VOLT:PROT", unit: "V" },
    Setpoint { set: "set_ocp", get: "get_ocp", argument: "current", command: "SOUR:CURR:PROT", unit: "A" },
    Setpoint { set: "set_opp", get: "get_opp", argument: "power", command: "SOUR:POW:PROT", unit: "W" },
];

/// `(operation, query, unit)` for the measurements.
static MEASUREMENTS: [(&str, &str, &str); 3] = [
    ("measure_voltage", "MEAS:VOLT?", "V"),
    ("measure_current", "MEAS:CURR?", "A"),
    ("measure_power", "MEAS:POW?", "W"),
];

/// Factory for `Intepro_PSI9000`.
pub struct InteproPsi9000Factory {
    operations: OperationSet,
}

impl InteproPsi9000Factory {
    /// Factory with the PSI 9000 operation set.
    pub fn new() -> Self {
        let mut operations = scpi::common_operations()
            .with(OperationSpec::new("set_lock").required("state", ValueKind::Bool))
            .with(OperationSpec::new("get_lock").returns(ValueKind::Bool))
            .with(OperationSpec::new("set_state").required("state", ValueKind::Bool))
            .with(OperationSpec::new("get_state").returns(ValueKind::Bool))
            .with(OperationSpec::new("on"))
            .with(OperationSpec::new("off"))
            .with(OperationSpec::new("toggle").optional("return_state", ValueKind::Bool));

        for setpoint in &SETPOINTS {
            operations.insert(
                OperationSpec::new(setpoint.set).required(setpoint.argument, ValueKind::Float),
            );
            operations.insert(OperationSpec::new(setpoint.get).returns(ValueKind::Float));
        }
        for (operation, _, _) in MEASUREMENTS {
            operations.insert(OperationSpec::new(operation).returns(ValueKind::Float));
        }
        operations.insert(OperationSpec::new("measure_array").returns(ValueKind::List));

        Self { operations }
    }
}

impl Default for InteproPsi9000Factory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverFactory for InteproPsi9000Factory {
    fn name(&self) -> &str {
        "Intepro_PSI9000"
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::Source
    }

    fn model_token(&self) -> Option<&str> {
        Some("psi9")
    }

    fn operations(&self) -> &OperationSet {
        &self.operations
    }

    async fn build(&self, channel: &mut dyn Channel, _kwargs: &CallArgs) -> Result<Box<dyn Driver>> {
        channel.write("SYST:LOCK 1").await?;
        Ok(Box::new(InteproPsi9000))
    }
}

/// Stateless PSI 9000 driver.
#[derive(Debug)]
pub struct InteproPsi9000;

impl InteproPsi9000 {
    async fn query_f64(
        channel: &mut dyn Channel,
        operation: &str,
        command: &str,
        unit: &str,
    ) -> Result<Value> {
        let response = scpi::query(channel, command).await?;
        Ok(Value::Float(scpi::parse_f64(operation, &response, Some(unit))?))
    }

    async fn output_state(channel: &mut dyn Channel) -> Result<bool> {
        let response = scpi::query(channel, "OUTP?").await?;
        Ok(matches!(response.as_str(), "ON" | "1"))
    }

    /// `"12.0 V, 1.5 A, 18.0 W"` into `[12.0, 1.5, 18.0]`.
    fn parse_array(operation: &str, response: &str) -> Result<Value> {
        let parts: Vec<&str> = response.split(',').collect();
        if parts.len() != 3 {
            return Err(RigError::protocol(operation, response));
        }
        let mut values = Vec::with_capacity(3);
        for (part, (_, _, unit)) in parts.iter().zip(MEASUREMENTS) {
            values.push(Value::Float(scpi::parse_f64(operation, part, Some(unit))?));
        }
        Ok(Value::List(values))
    }
}

#[async_trait]
impl Driver for InteproPsi9000 {
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        let op = call.operation();

        for setpoint in &SETPOINTS {
            if op == setpoint.set {
                let value = call.f64(setpoint.argument)?;
                return scpi::write_unit(channel, &format!("{} {}", setpoint.command, value)).await;
            }
            if op == setpoint.get {
                let query = format!("{}?", setpoint.command);
                return Self::query_f64(channel, op, &query, setpoint.unit).await;
            }
        }
        if let Some((_, query, unit)) = MEASUREMENTS.iter().find(|(name, _, _)| *name == op) {
            return Self::query_f64(channel, op, query, unit).await;
        }

        match op {
            "set_lock" => {
                let state = call.bool("state")?;
                scpi::write_unit(channel, &format!("SYST:LOCK {}", scpi::flag(state))).await
            }
            "get_lock" => {
                let response = scpi::query(channel, "SYST:LOCK:OWN?").await?;
                Ok(Value::Bool(response == "REMOTE"))
            }
            "set_state" => {
                let state = call.bool("state")?;
                scpi::write_unit(channel, &format!("OUTP {}", scpi::flag(state))).await
            }
            "get_state" => Ok(Value::Bool(Self::output_state(channel).await?)),
            "on" => scpi::write_unit(channel, "OUTP 1").await,
            "off" => scpi::write_unit(channel, "OUTP 0").await,
            "toggle" => {
                let state = Self::output_state(channel).await?;
                channel.write(&format!("OUTP {}", scpi::flag(!state))).await?;
                if call.opt_bool("return_state")?.unwrap_or(false) {
                    return Ok(Value::Bool(Self::output_state(channel).await?));
                }
                Ok(Value::Null)
            }
            "measure_array" => {
                let response = scpi::query(channel, "MEAS:ARR?").await?;
                Self::parse_array(op, &response)
            }
            _ => scpi::invoke_common(channel, call).await,
        }
    }

    async fn shutdown(&mut self, channel: &mut dyn Channel) -> Result<()> {
        channel.write("SYST:LOCK 0").await
    }
}
