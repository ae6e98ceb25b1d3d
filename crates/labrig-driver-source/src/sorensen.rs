//! Sorensen XBT series supplies.
//!
//! Same command set as the Keithley 2231A plus over-voltage and
//! over-current protection.

use async_trait::async_trait;
use labrig_core::{
    scpi, CallArgs, Channel, Driver, DriverCategory, DriverFactory, OperationSet, OperationSpec,
    Param, Result, Value, ValueKind,
};

use crate::keithley::{keithley_operations, Keithley2231A, CONSTRUCTOR};

/// Factory for `Sorensen_XBT`.
pub struct SorensenXbtFactory {
    operations: OperationSet,
}

impl SorensenXbtFactory {
    /// Factory with the Keithley operations plus the protection settings.
    pub fn new() -> Self {
        Self {
            operations: keithley_operations()
                .with(
                    OperationSpec::new("set_over_voltage_protection")
                        .required("voltage", ValueKind::Float),
                )
                .with(OperationSpec::new("get_over_voltage_protection").returns(ValueKind::Float))
                .with(
                    OperationSpec::new("set_over_current_protection")
                        .required("current", ValueKind::Float),
                )
                .with(OperationSpec::new("get_over_current_protection").returns(ValueKind::Float)),
        }
    }
}

impl Default for SorensenXbtFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverFactory for SorensenXbtFactory {
    fn name(&self) -> &str {
        "Sorensen_XBT"
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::Source
    }

    fn model_token(&self) -> Option<&str> {
        Some("xbt")
    }

    fn constructor(&self) -> &[Param] {
        CONSTRUCTOR
    }

    fn operations(&self) -> &OperationSet {
        &self.operations
    }

    async fn build(&self, channel: &mut dyn Channel, kwargs: &CallArgs) -> Result<Box<dyn Driver>> {
        Ok(Box::new(SorensenXbt {
            inner: Keithley2231A::connect(channel, kwargs).await?,
        }))
    }
}

/// Sorensen driver: protection settings, everything else delegated.
#[derive(Debug)]
pub struct SorensenXbt {
    inner: Keithley2231A,
}

#[async_trait]
impl Driver for SorensenXbt {
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        let op = call.operation();
        let (command, argument) = match op {
            "set_over_voltage_protection" => ("SOUR:VOLT:PROT", "voltage"),
            "set_over_current_protection" => ("SOUR:CURR:LIM", "current"),
            "get_over_voltage_protection" => {
                let response = scpi::query(channel, "SOUR:VOLT:PROT?").await?;
                return Ok(Value::Float(scpi::parse_f64(op, &response, None)?));
            }
            "get_over_current_protection" => {
                let response = scpi::query(channel, "SOUR:CURR:LIM?").await?;
                return Ok(Value::Float(scpi::parse_f64(op, &response, None)?));
            }
            _ => return self.inner.invoke(channel, call).await,
        };
        scpi::write_unit(channel, &format!("{} {}", command, call.f64(argument)?)).await
    }

    async fn shutdown(&mut self, channel: &mut dyn Channel) -> Result<()> {
        self.inner.shutdown(channel).await
    }
}
