//! Keithley 2231A-30-3 triple-channel DC supply.
//!
//! The B&K Precision 9140 speaks the same command set and is registered as
//! an alias of this driver.
//!
//! Protocol Overview:
//! - SCPI over USB-TMC or GPIB, LF terminated
//! - Front panel is locked with `SYSTem:RWLock` while the driver is bound
//!   and released with `SYSTem:LOCal` on shutdown
//! - Channel-scoped commands act on the channel last selected with
//!   `INST:NSEL n`, so every channel-scoped operation selects first
//!
//! A driver built with `channel = n` selects `n` whenever an operation is
//! called without its own `channel` argument. Without either, channel-scoped
//! operations fail with `InvalidArgument` on `channel`.

use async_trait::async_trait;
use labrig_core::{
    scpi, CallArgs, Channel, Driver, DriverCategory, DriverFactory, OperationSet, OperationSpec,
    Param, Result, RigError, Value, ValueKind,
};

/// Upper bound on entries drained by `error_queue`.
pub const MAX_ERROR_QUEUE: usize = 32;

/// Operation set shared by the Keithley family.
pub(crate) fn keithley_operations() -> OperationSet {
    let scoped = |name| OperationSpec::new(name).optional("channel", ValueKind::Int);
    scpi::common_operations()
        .with(OperationSpec::new("set_access_remote").required("mode", ValueKind::Str))
        .with(OperationSpec::new("set_channel").required("channel", ValueKind::Int))
        .with(OperationSpec::new("get_channel").returns(ValueKind::Int))
        .with(
            OperationSpec::new("set_state")
                .required("state", ValueKind::Bool)
                .optional("channel", ValueKind::Int),
        )
        .with(scoped("get_state").returns(ValueKind::Bool))
        .with(scoped("on"))
        .with(scoped("off"))
        .with(scoped("toggle"))
        .with(
            OperationSpec::new("set_voltage")
                .required("voltage", ValueKind::Float)
                .optional("channel", ValueKind::Int),
        )
        .with(scoped("get_voltage").returns(ValueKind::Float))
        .with(
            OperationSpec::new("set_current")
                .required("current", ValueKind::Float)
                .optional("channel", ValueKind::Int),
        )
        .with(scoped("get_current").returns(ValueKind::Float))
        .with(scoped("measure_voltage").returns(ValueKind::Float))
        .with(scoped("measure_current").returns(ValueKind::Float))
        .with(OperationSpec::new("all_on"))
        .with(OperationSpec::new("all_off"))
        .with(OperationSpec::new("all_toggle"))
        .with(OperationSpec::new("pop_error_queue").returns(ValueKind::Str))
        .with(OperationSpec::new("error_queue").returns(ValueKind::List))
}

pub(crate) const CONSTRUCTOR: &[Param] = &[Param::optional("channel", ValueKind::Int)];

// =============================================================================
// Keithley2231AFactory
// =============================================================================

/// Factory for the Keithley 2231A and its B&K Precision 9140 alias.
pub struct Keithley2231AFactory {
    name: &'static str,
    model_token: &'static str,
    operations: OperationSet,
}

impl Keithley2231AFactory {
    /// `Keithley_2231A`.
    pub fn keithley() -> Self {
        Self::alias("Keithley_2231A", "2231a")
    }

    /// `BKPrecision_9140`.
    pub fn bk_precision() -> Self {
        Self::alias("BKPrecision_9140", "9140")
    }

    fn alias(name: &'static str, model_token: &'static str) -> Self {
        Self {
            name,
            model_token,
            operations: keithley_operations(),
        }
    }
}

#[async_trait]
impl DriverFactory for Keithley2231AFactory {
    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::Source
    }

    fn model_token(&self) -> Option<&str> {
        Some(self.model_token)
    }

    fn constructor(&self) -> &[Param] {
        CONSTRUCTOR
    }

    fn operations(&self) -> &OperationSet {
        &self.operations
    }

    async fn build(&self, channel: &mut dyn Channel, kwargs: &CallArgs) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Keithley2231A::connect(channel, kwargs).await?))
    }
}

// =============================================================================
// Keithley2231A
// =============================================================================

/// Driver state: the channel bound at construction, if any.
#[derive(Debug)]
pub struct Keithley2231A {
    channel: Option<i64>,
}

impl Keithley2231A {
    /// Lock the front panel and remember the constructor channel.
    pub async fn connect(channel: &mut dyn Channel, kwargs: &CallArgs) -> Result<Self> {
        let bound = kwargs.opt_i64("channel")?;
        channel.write("SYSTem:RWLock").await?;
        tracing::debug!(address = %channel.address(), channel = ?bound, "supply locked for remote use");
        Ok(Self { channel: bound })
    }

    /// Select the channel a scoped operation acts on.
    async fn select(&self, channel: &mut dyn Channel, call: &CallArgs) -> Result<()> {
        let selected = match call.opt_i64("channel")? {
            Some(n) => n,
            None => self.channel.ok_or_else(|| {
                RigError::invalid_argument(
                    call.operation(),
                    "channel",
                    "no channel given and none bound at construction",
                )
            })?,
        };
        channel.write(&format!("INST:NSEL {}", selected)).await
    }

    async fn query_state(channel: &mut dyn Channel, command: &str) -> Result<bool> {
        let response = scpi::query(channel, command).await?;
        Ok(matches!(response.as_str(), "ON" | "1"))
    }

    async fn query_f64(channel: &mut dyn Channel, operation: &str, command: &str) -> Result<Value> {
        let response = scpi::query(channel, command).await?;
        Ok(Value::Float(scpi::parse_f64(operation, &response, None)?))
    }

    async fn pop_error(channel: &mut dyn Channel) -> Result<Option<String>> {
        let response = scpi::query(channel, "SYST:ERR?").await?;
        if response.starts_with('0') {
            return Ok(None);
        }
        Ok(Some(response))
    }
}

#[async_trait]
impl Driver for Keithley2231A {
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        let op = call.operation();
        match op {
            "set_access_remote" => {
                let mode = call.str("mode")?;
                match mode.to_ascii_lowercase().as_str() {
                    "remote" => scpi::write_unit(channel, "SYSTem:RWLock").await,
                    "local" => scpi::write_unit(channel, "SYSTem:LOCal").await,
                    _ => Err(RigError::invalid_argument(
                        op,
                        "mode",
                        format!("expected 'remote' or 'local', got '{}'", mode),
                    )),
                }
            }
            "set_channel" => {
                scpi::write_unit(channel, &format!("INST:NSEL {}", call.i64("channel")?)).await
            }
            "get_channel" => {
                let response = scpi::query(channel, "INST:NSEL?").await?;
                Ok(Value::Int(scpi::parse_i64(op, &response)?))
            }
            "set_state" | "on" | "off" => {
                let state = match op {
                    "on" => true,
                    "off" => false,
                    _ => call.bool("state")?,
                };
                self.select(channel, call).await?;
                scpi::write_unit(channel, &format!("CHAN:OUTP {}", scpi::flag(state))).await
            }
            "get_state" => {
                self.select(channel, call).await?;
                Ok(Value::Bool(Self::query_state(channel, "CHAN:OUTP?").await?))
            }
            "toggle" => {
                self.select(channel, call).await?;
                let state = Self::query_state(channel, "CHAN:OUTP?").await?;
                scpi::write_unit(channel, &format!("CHAN:OUTP {}", scpi::flag(!state))).await
            }
            "set_voltage" => {
                self.select(channel, call).await?;
                scpi::write_unit(channel, &format!("SOUR:VOLT {}", call.f64("voltage")?)).await
            }
            "get_voltage" => {
                self.select(channel, call).await?;
                Self::query_f64(channel, op, "SOUR:VOLT?").await
            }
            "set_current" => {
                self.select(channel, call).await?;
                scpi::write_unit(channel, &format!("SOUR:CURR {}", call.f64("current")?)).await
            }
            "get_current" => {
                self.select(channel, call).await?;
                Self::query_f64(channel, op, "SOUR:CURR?").await
            }
            "measure_voltage" => {
                self.select(channel, call).await?;
                Self::query_f64(channel, op, "MEAS:VOLT?").await
            }
            "measure_current" => {
                self.select(channel, call).await?;
                Self::query_f64(channel, op, "MEAS:CURR?").await
            }
            "all_on" => scpi::write_unit(channel, "OUTP 1").await,
            "all_off" => scpi::write_unit(channel, "OUTP 0").await,
            "all_toggle" => {
                let state = Self::query_state(channel, "OUTPut:STATe:ALL?").await?;
                scpi::write_unit(channel, &format!("OUTP {}", scpi::flag(!state))).await
            }
            "pop_error_queue" => Ok(Self::pop_error(channel).await?.into()),
            "error_queue" => {
                let mut queue = Vec::new();
                while queue.len() < MAX_ERROR_QUEUE {
                    match Self::pop_error(channel).await? {
                        Some(error) => queue.push(Value::Str(error)),
                        None => break,
                    }
                }
                Ok(Value::List(queue))
            }
            _ => scpi::invoke_common(channel, call).await,
        }
    }

    async fn shutdown(&mut self, channel: &mut dyn Channel) -> Result<()> {
        channel.write("SYSTem:LOCal").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrig_core::{arguments, Arguments, ErrorKind, RecordingChannel};

    struct Bench {
        factory: Keithley2231AFactory,
        channel: RecordingChannel,
        driver: Box<dyn Driver>,
    }

    impl Bench {
        async fn new(kwargs: Arguments) -> Self {
            let factory = Keithley2231AFactory::keithley();
            let mut channel = RecordingChannel::new("USB0::0x05E6::0x2231::1::INSTR");
            let kwargs = labrig_core::constructor_args(&factory, &kwargs).unwrap();
            let driver = factory.build(&mut channel, &kwargs).await.unwrap();
            Self {
                factory,
                channel,
                driver,
            }
        }

        async fn call(&mut self, op: &str, args: Arguments) -> Result<Value> {
            let call = self.factory.operations().validate(op, &args)?;
            self.driver.invoke(&mut self.channel, &call).await
        }

        fn writes(&self) -> Vec<String> {
            self.channel.recorder().writes()
        }
    }

    #[tokio::test]
    async fn test_bound_channel_is_selected_for_scoped_operations() {
        let mut bench = Bench::new(arguments! { "channel" => 2 }).await;

        bench.call("set_voltage", arguments! { "voltage" => 5.0 }).await.unwrap();
        bench.call("on", arguments! {}).await.unwrap();
        bench
            .call("set_current", arguments! { "current" => 0.5, "channel" => 3 })
            .await
            .unwrap();

        assert_eq!(
            bench.writes(),
            vec![
                "SYSTem:RWLock",
                "INST:NSEL 2",
                "SOUR:VOLT 5",
                "INST:NSEL 2",
                "CHAN:OUTP 1",
                "INST:NSEL 3",
                "SOUR:CURR 0.5",
            ]
        );
        assert_eq!(
            bench.call("get_voltage", arguments! {}).await.unwrap(),
            Value::Float(5.0)
        );
        assert_eq!(
            bench.call("get_state", arguments! {}).await.unwrap(),
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_scoped_operation_without_channel_is_rejected() {
        let mut bench = Bench::new(arguments! {}).await;
        let err = bench.call("off", arguments! {}).await.unwrap_err();
        assert_eq!(
            err,
            RigError::invalid_argument("off", "channel", "no channel given and none bound at construction")
        );
        // unscoped operations still work
        bench.call("all_off", arguments! {}).await.unwrap();
        assert_eq!(bench.writes(), vec!["SYSTem:RWLock", "OUTP 0"]);
    }

    #[tokio::test]
    async fn test_toggle_inverts_state() {
        let mut bench = Bench::new(arguments! { "channel" => 1 }).await;
        bench.call("toggle", arguments! {}).await.unwrap();
        bench.call("toggle", arguments! {}).await.unwrap();
        assert_eq!(bench.channel.recorder().last_write().unwrap(), "CHAN:OUTP 0");

        bench.channel.recorder().set_response("OUTPut:STATe:ALL?", "ON");
        bench.call("all_toggle", arguments! {}).await.unwrap();
        assert_eq!(bench.channel.recorder().last_write().unwrap(), "OUTP 0");
    }

    #[tokio::test]
    async fn test_access_mode() {
        let mut bench = Bench::new(arguments! {}).await;
        bench
            .call("set_access_remote", arguments! { "mode" => "Local" })
            .await
            .unwrap();
        let err = bench
            .call("set_access_remote", arguments! { "mode" => "panel" })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(bench.writes(), vec!["SYSTem:RWLock", "SYSTem:LOCal"]);
    }

    #[tokio::test]
    async fn test_error_queue() {
        let mut bench = Bench::new(arguments! {}).await;
        assert_eq!(
            bench.call("pop_error_queue", arguments! {}).await.unwrap(),
            Value::Null
        );

        bench
            .channel
            .recorder()
            .set_response("SYST:ERR?", "-113,\"Undefined header\"");
        let queue = bench.call("error_queue", arguments! {}).await.unwrap();
        assert_eq!(queue.as_list().unwrap().len(), MAX_ERROR_QUEUE);
    }

    #[tokio::test]
    async fn test_shutdown_returns_to_local() {
        let mut bench = Bench::new(arguments! {}).await;
        bench.driver.shutdown(&mut bench.channel).await.unwrap();
        assert_eq!(bench.channel.recorder().last_write().unwrap(), "SYSTem:LOCal");
    }

    #[tokio::test]
    async fn test_common_operations_fall_through() {
        let mut bench = Bench::new(arguments! {}).await;
        bench.call("reset", arguments! {}).await.unwrap();
        assert_eq!(bench.channel.recorder().last_write().unwrap(), "*RST");
        assert_eq!(
            bench.call("get_channel", arguments! {}).await.unwrap(),
            Value::Int(0)
        );
    }
}
