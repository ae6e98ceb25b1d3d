//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use labrig_core::{
    scpi, CallArgs, Channel, Driver, DriverCategory, DriverFactory, OperationSet, OperationSpec,
    Result, RigError, Value, ValueKind,
};

use crate::transport::{ChannelOptions, ResourceAddress, Transport};

pub const STUB_DEFINITION: &str = "test.source";
pub const STUB_OBJECT: &str = "StubSupply";

/// Minimal single-channel supply speaking a tiny SCPI dialect.
pub struct StubSupplyFactory {
    ops: OperationSet,
}

impl StubSupplyFactory {
    pub fn new() -> Self {
        Self {
            ops: OperationSet::new()
                .with(OperationSpec::new("set_voltage").required("voltage", ValueKind::Float))
                .with(OperationSpec::new("get_voltage").returns(ValueKind::Float))
                .with(OperationSpec::new("measure_voltage").returns(ValueKind::Float))
                .with(OperationSpec::new("on"))
                .with(OperationSpec::new("off")),
        }
    }
}

#[async_trait]
impl DriverFactory for StubSupplyFactory {
    fn name(&self) -> &str {
        STUB_OBJECT
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::Source
    }

    fn model_token(&self) -> Option<&str> {
        Some("stubpsu")
    }

    fn operations(&self) -> &OperationSet {
        &self.ops
    }

    async fn build(&self, _channel: &mut dyn Channel, _kwargs: &CallArgs) -> Result<Box<dyn Driver>> {
        Ok(Box::new(StubSupply))
    }
}

struct StubSupply;

#[async_trait]
impl Driver for StubSupply {
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        match call.operation() {
            "set_voltage" => {
                scpi::write_unit(channel, &format!("VOLT {}", call.f64("voltage")?)).await
            }
            "get_voltage" => {
                let response = scpi::query(channel, "VOLT?").await?;
                Ok(Value::Float(scpi::parse_f64("get_voltage", &response, None)?))
            }
            "measure_voltage" => {
                let response = scpi::query(channel, "MEAS:VOLT?").await?;
                Ok(Value::Float(scpi::parse_f64("measure_voltage", &response, None)?))
            }
            "on" => scpi::write_unit(channel, "OUTP 1").await,
            "off" => scpi::write_unit(channel, "OUTP 0").await,
            other => Err(RigError::UnknownOperation {
                operation: other.to_string(),
            }),
        }
    }

    async fn shutdown(&mut self, channel: &mut dyn Channel) -> Result<()> {
        channel.write("SYST:LOC").await
    }
}

/// Transport whose channels connect and then fail every operation,
/// including `close`.
pub struct DeadTransport;

#[async_trait]
impl Transport for DeadTransport {
    async fn connect(
        &self,
        address: &ResourceAddress,
        _options: &ChannelOptions,
    ) -> Result<Box<dyn Channel>> {
        Ok(Box::new(DeadChannel {
            address: address.as_str().to_string(),
        }))
    }
}

struct DeadChannel {
    address: String,
}

#[async_trait]
impl Channel for DeadChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, _message: &str) -> Result<()> {
        Err(RigError::communication(&self.address, "link down"))
    }

    async fn read(&mut self) -> Result<String> {
        Err(RigError::communication(&self.address, "link down"))
    }

    async fn clear(&mut self) -> Result<()> {
        Err(RigError::communication(&self.address, "link down"))
    }

    async fn close(&mut self) -> Result<()> {
        Err(RigError::communication(&self.address, "link down"))
    }
}
