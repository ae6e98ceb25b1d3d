//! Agilent 33250A 80 MHz function / arbitrary waveform generator.
//!
//! Reference: Agilent 33250A User's Guide, chapter 4 (Remote Interface)
//!
//! Protocol Overview:
//! - SCPI over GPIB or RS-232, LF terminated
//! - Output load is 10 Ω to 10 kΩ, or one of `MIN`, `MAX`, `INF`
//! - Waveform names are matched on their first four characters
//!   (`SINUSOID` and `SIN` both select `SIN`)
//! - Arbitrary waveforms live in `VOLATILE` memory unless copied to a
//!   named slot

use async_trait::async_trait;
use labrig_core::{
    scpi, CallArgs, Channel, Driver, DriverCategory, DriverFactory, OperationSet, OperationSpec,
    Result, RigError, Value, ValueKind,
};

/// Waveform types accepted by `set_waveform_type`.
pub const WAVEFORMS: [&str; 7] = ["SIN", "SQU", "RAMP", "PULS", "NOIS", "DC", "USER"];

/// Voltage units accepted by `set_voltage_units`.
pub const VOLTAGE_UNITS: [&str; 3] = ["VPP", "VRMS", "DBM"];

/// Burst modes accepted by `set_burst_mode`.
pub const BURST_MODES: [&str; 2] = ["TRIG", "GAT"];

/// Keyword settings for the output load and the burst count.
const LIMITS: [&str; 3] = ["MIN", "MAX", "INF"];

/// Output load range in ohms.
const LOAD_OHMS: (f64, f64) = (10.0, 10_000.0);

/// `(set operation, get operation, argument, command)` for plain numeric
/// settings.
const NUMERIC: [(&str, &str, &str, &str); 8] = [
    ("set_voltage_amplitude", "get_voltage_amplitude", "amplitude", "VOLT"),
    ("set_voltage_offset", "get_voltage_offset", "voltage", "VOLT:OFFS"),
    ("set_voltage_high", "get_voltage_high", "voltage", "VOLT:HIGH"),
    ("set_voltage_low", "get_voltage_low", "voltage", "VOLT:LOW"),
    ("set_frequency", "get_frequency", "frequency", "FREQ"),
    ("set_pulse_period", "get_pulse_period", "period", "PULSE:PER"),
    ("set_pulse_width", "get_pulse_width", "width", "PULSE:WIDT"),
    ("set_square_duty_cycle", "get_square_duty_cycle", "duty_cycle", "FUNC:SQU:DCYCLE"),
];

/// Factory for `Agilent_33250A`.
pub struct Agilent33250AFactory {
    operations: OperationSet,
}

impl Agilent33250AFactory {
    /// Factory with the 33250A operation set.
    pub fn new() -> Self {
        let mut operations = scpi::common_operations()
            .with(OperationSpec::new("set_output_state").required("state", ValueKind::Bool))
            .with(OperationSpec::new("get_output_state").returns(ValueKind::Bool))
            .with(
                OperationSpec::new("set_output_impedance")
                    .optional("impedance", ValueKind::Float)
                    .optional("setting", ValueKind::Str),
            )
            .with(OperationSpec::new("get_output_impedance").returns(ValueKind::Float))
            .with(OperationSpec::new("set_output_polarity").optional("polarity", ValueKind::Bool))
            .with(OperationSpec::new("get_output_polarity").returns(ValueKind::Bool))
            .with(OperationSpec::new("set_waveform_type").required("waveform", ValueKind::Str))
            .with(OperationSpec::new("get_waveform_type").returns(ValueKind::Str))
            .with(OperationSpec::new("set_voltage_units").optional("units", ValueKind::Str))
            .with(OperationSpec::new("get_voltage_units").returns(ValueKind::Str))
            .with(OperationSpec::new("set_voltage_auto_range").required("state", ValueKind::Bool))
            .with(OperationSpec::new("get_voltage_auto_range").returns(ValueKind::Bool))
            .with(OperationSpec::new("set_voltage_auto_range_once"))
            .with(OperationSpec::new("set_burst_state").required("state", ValueKind::Bool))
            .with(
                OperationSpec::new("get_burst_state")
                    .optional("source", ValueKind::Int)
                    .returns(ValueKind::Bool),
            )
            .with(OperationSpec::new("set_burst_mode").required("mode", ValueKind::Str))
            .with(OperationSpec::new("get_burst_mode").returns(ValueKind::Str))
            .with(
                OperationSpec::new("set_burst_ncycles")
                    .optional("ncycles", ValueKind::Int)
                    .optional("setting", ValueKind::Str),
            )
            .with(OperationSpec::new("get_burst_ncycles").returns(ValueKind::Int))
            .with(OperationSpec::new("trigger"))
            .with(OperationSpec::new("select_arbitrary_waveform").optional("arb_name", ValueKind::Str))
            .with(OperationSpec::new("set_sample_rate").required("sample_rate", ValueKind::Float));

        for (set, get, argument, _) in NUMERIC {
            operations.insert(OperationSpec::new(set).required(argument, ValueKind::Float));
            operations.insert(OperationSpec::new(get).returns(ValueKind::Float));
        }
        Self { operations }
    }
}

impl Default for Agilent33250AFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverFactory for Agilent33250AFactory {
    fn name(&self) -> &str {
        "Agilent_33250A"
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::FunctionGenerator
    }

    fn model_token(&self) -> Option<&str> {
        Some("33250a")
    }

    fn operations(&self) -> &OperationSet {
        &self.operations
    }

    async fn build(&self, channel: &mut dyn Channel, _kwargs: &CallArgs) -> Result<Box<dyn Driver>> {
        tracing::debug!(address = %channel.address(), "function generator bound");
        Ok(Box::new(Agilent33250A))
    }
}

/// Stateless 33250A driver.
#[derive(Debug)]
pub struct Agilent33250A;

/// Upper-cased `value` if it is one of `choices`.
fn choose(operation: &str, argument: &str, value: &str, choices: &[&str]) -> Result<String> {
    let upper = value.to_ascii_uppercase();
    if choices.contains(&upper.as_str()) {
        return Ok(upper);
    }
    Err(RigError::invalid_argument(
        operation,
        argument,
        format!("expected one of {}", choices.join(", ")),
    ))
}

/// Either the numeric argument or the keyword `setting`, never both.
fn numeric_or_setting(
    call: &CallArgs,
    numeric: &str,
    render: impl Fn(&CallArgs) -> Result<Option<String>>,
) -> Result<String> {
    let op = call.operation();
    match (render(call)?, call.opt_str("setting")?) {
        (Some(value), None) => Ok(value),
        (None, Some(setting)) => choose(op, "setting", setting, &LIMITS),
        (Some(_), Some(_)) => Err(RigError::invalid_argument(
            op,
            "setting",
            format!("give either {} or setting, not both", numeric),
        )),
        (None, None) => Err(RigError::invalid_argument(
            op,
            numeric,
            format!("missing {} or setting", numeric),
        )),
    }
}

impl Agilent33250A {
    async fn query_f64(channel: &mut dyn Channel, operation: &str, command: &str) -> Result<f64> {
        let response = scpi::query(channel, command).await?;
        scpi::parse_f64(operation, &response, None)
    }

    async fn query_flag(channel: &mut dyn Channel, operation: &str, command: &str) -> Result<bool> {
        let response = scpi::query(channel, command).await?;
        scpi::parse_state(operation, &response)
    }

    async fn set_waveform(
        channel: &mut dyn Channel,
        operation: &str,
        waveform: &str,
    ) -> Result<Value> {
        let wave: String = waveform.to_ascii_uppercase().chars().take(4).collect();
        if !WAVEFORMS.contains(&wave.as_str()) {
            return Err(RigError::invalid_argument(
                operation,
                "waveform",
                format!("expected one of {}", WAVEFORMS.join(", ")),
            ));
        }
        scpi::write_unit(channel, &format!("FUNC {}", wave)).await
    }
}

#[async_trait]
impl Driver for Agilent33250A {
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        let op = call.operation();

        for (set, get, argument, command) in NUMERIC {
            if op == set {
                let value = call.f64(argument)?;
                return scpi::write_unit(channel, &format!("{} {}", command, value)).await;
            }
            if op == get {
                let query = format!("{}?", command);
                return Ok(Value::Float(Self::query_f64(channel, op, &query).await?));
            }
        }

        match op {
            "set_output_state" => {
                let state = call.bool("state")?;
                scpi::write_unit(channel, &format!("OUTP {}", scpi::flag(state))).await
            }
            "get_output_state" => Ok(Value::Bool(Self::query_flag(channel, op, "OUTP?").await?)),
            "set_output_impedance" => {
                let load = numeric_or_setting(call, "impedance", |call| {
                    Ok(call.opt_f64("impedance")?.map(|ohms| {
                        let applied = ohms.clamp(LOAD_OHMS.0, LOAD_OHMS.1);
                        if applied != ohms {
                            tracing::warn!(requested = ohms, applied, "output load clamped");
                        }
                        applied.to_string()
                    }))
                })?;
                scpi::write_unit(channel, &format!("OUTP:LOAD {}", load)).await
            }
            "get_output_impedance" => {
                Ok(Value::Float(Self::query_f64(channel, op, "OUTP:LOAD?").await?))
            }
            "set_output_polarity" => {
                let normal = call.opt_bool("polarity")?.unwrap_or(true);
                let polarity = if normal { "NORM" } else { "INV" };
                scpi::write_unit(channel, &format!("OUTP:POL {}", polarity)).await
            }
            "get_output_polarity" => {
                let response = scpi::query(channel, "OUTP:POL?").await?;
                match response.to_ascii_uppercase().as_str() {
                    "NORM" => Ok(Value::Bool(true)),
                    "INV" => Ok(Value::Bool(false)),
                    _ => Err(RigError::protocol(op, &response)),
                }
            }
            "set_waveform_type" => Self::set_waveform(channel, op, call.str("waveform")?).await,
            "get_waveform_type" => {
                let response = scpi::query(channel, "FUNC?").await?;
                Ok(Value::Str(response.to_ascii_uppercase()))
            }
            "set_voltage_units" => {
                let units = call.opt_str("units")?.unwrap_or("VPP");
                let units = choose(op, "units", units, &VOLTAGE_UNITS)?;
                scpi::write_unit(channel, &format!("VOLT:UNIT {}", units)).await
            }
            "get_voltage_units" => Ok(Value::Str(scpi::query(channel, "VOLT:UNIT?").await?)),
            "set_voltage_auto_range" => {
                let state = if call.bool("state")? { "ON" } else { "OFF" };
                scpi::write_unit(channel, &format!("VOLT:RANG:AUTO {}", state)).await
            }
            "get_voltage_auto_range" => {
                let response = scpi::query(channel, "VOLT:RANG:AUTO?").await?;
                Ok(Value::Bool(response.contains('1') || response.eq_ignore_ascii_case("ON")))
            }
            "set_voltage_auto_range_once" => scpi::write_unit(channel, "VOLT:RANG:AUTO ONCE").await,
            "set_burst_state" => {
                let state = call.bool("state")?;
                scpi::write_unit(channel, &format!("BURS:STAT {}", scpi::flag(state))).await
            }
            "get_burst_state" => {
                let source = call.opt_i64("source")?.unwrap_or(1);
                let query = format!("SOUR{}:BURS:STAT?", source);
                Ok(Value::Bool(Self::query_flag(channel, op, &query).await?))
            }
            "set_burst_mode" => {
                let mode = choose(op, "mode", call.str("mode")?, &BURST_MODES)?;
                scpi::write_unit(channel, &format!("BURS:MODE {}", mode)).await
            }
            "get_burst_mode" => {
                let response = scpi::query(channel, "BURS:MODE?").await?;
                Ok(Value::Str(response.to_ascii_lowercase()))
            }
            "set_burst_ncycles" => {
                let ncycles = numeric_or_setting(call, "ncycles", |call| {
                    Ok(call.opt_i64("ncycles")?.map(|n| n.to_string()))
                })?;
                scpi::write_unit(channel, &format!("BURS:NCYC {}", ncycles)).await
            }
            "get_burst_ncycles" => {
                let response = scpi::query(channel, "BURS:NCYC?").await?;
                Ok(Value::Int(scpi::parse_i64(op, &response)?))
            }
            "trigger" => scpi::write_unit(channel, "TRIG").await,
            "select_arbitrary_waveform" => {
                let name = call.opt_str("arb_name")?.unwrap_or("VOLATILE");
                channel.write(&format!("FUNC:USER {}", name)).await?;
                Self::set_waveform(channel, op, "USER").await
            }
            "set_sample_rate" => {
                let rate = call.f64("sample_rate")?;
                scpi::write_unit(channel, &format!("APPLY:USER {}", rate)).await
            }
            _ => scpi::invoke_common(channel, call).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrig_core::{arguments, Arguments, ErrorKind, RecordingChannel};
    use tracing_test::traced_test;

    struct Bench {
        factory: Agilent33250AFactory,
        channel: RecordingChannel,
        driver: Box<dyn Driver>,
    }

    impl Bench {
        async fn new() -> Self {
            let factory = Agilent33250AFactory::new();
            let mut channel = RecordingChannel::new("GPIB0::10::INSTR");
            let driver = factory
                .build(&mut channel, &CallArgs::empty("Agilent_33250A::new"))
                .await
                .unwrap();
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
    }

    #[tokio::test]
    async fn test_numeric_settings_read_back() {
        let mut bench = Bench::new().await;
        bench
            .call("set_frequency", arguments! { "frequency" => 1000 })
            .await
            .unwrap();
        bench
            .call("set_voltage_amplitude", arguments! { "amplitude" => 2.5 })
            .await
            .unwrap();

        assert_eq!(
            bench.call("get_frequency", arguments! {}).await.unwrap(),
            Value::Float(1000.0)
        );
        assert_eq!(
            bench.channel.recorder().writes(),
            vec!["FREQ 1000", "VOLT 2.5", "FREQ?"]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_output_load_is_clamped_or_keyword() {
        let mut bench = Bench::new().await;
        bench
            .call("set_output_impedance", arguments! { "impedance" => 50 })
            .await
            .unwrap();
        bench
            .call("set_output_impedance", arguments! { "impedance" => 1.0e6 })
            .await
            .unwrap();
        bench
            .call("set_output_impedance", arguments! { "setting" => "inf" })
            .await
            .unwrap();
        assert_eq!(
            bench.channel.recorder().writes(),
            vec!["OUTP:LOAD 50", "OUTP:LOAD 10000", "OUTP:LOAD INF"]
        );
        assert!(logs_contain("output load clamped"));
        assert!(logs_contain("function generator bound"));

        for args in [
            arguments! {},
            arguments! { "setting" => "HUGE" },
            arguments! { "impedance" => 50, "setting" => "MIN" },
        ] {
            let err = bench.call("set_output_impedance", args).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn test_waveform_names_use_first_four_characters() {
        let mut bench = Bench::new().await;
        bench
            .call("set_waveform_type", arguments! { "waveform" => "sinusoid" })
            .await
            .unwrap();
        bench
            .call("set_waveform_type", arguments! { "waveform" => "Square" })
            .await
            .unwrap();
        assert_eq!(bench.channel.recorder().writes(), vec!["FUNC SIN", "FUNC SQU"]);

        let err = bench
            .call("set_waveform_type", arguments! { "waveform" => "triangle" })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_burst_settings() {
        let mut bench = Bench::new().await;
        bench
            .call("set_burst_mode", arguments! { "mode" => "gat" })
            .await
            .unwrap();
        bench
            .call("set_burst_ncycles", arguments! { "ncycles" => 5 })
            .await
            .unwrap();
        bench
            .call("set_burst_ncycles", arguments! { "setting" => "max" })
            .await
            .unwrap();
        bench
            .call("set_burst_state", arguments! { "state" => true })
            .await
            .unwrap();
        assert_eq!(
            bench.channel.recorder().writes(),
            vec!["BURS:MODE GAT", "BURS:NCYC 5", "BURS:NCYC MAX", "BURS:STAT 1"]
        );

        let recorder = bench.channel.recorder();
        recorder.set_response("BURS:MODE?", "GAT");
        recorder.set_response("BURS:NCYC?", "5.0");
        recorder.set_response("SOUR2:BURS:STAT?", "0");
        assert_eq!(
            bench.call("get_burst_mode", arguments! {}).await.unwrap(),
            Value::Str("gat".into())
        );
        assert_eq!(
            bench.call("get_burst_ncycles", arguments! {}).await.unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            bench
                .call("get_burst_state", arguments! { "source" => 2 })
                .await
                .unwrap(),
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn test_polarity_and_auto_range() {
        let mut bench = Bench::new().await;
        bench
            .call("set_output_polarity", arguments! { "polarity" => false })
            .await
            .unwrap();
        bench.call("set_output_polarity", arguments! {}).await.unwrap();
        bench
            .call("set_voltage_auto_range", arguments! { "state" => true })
            .await
            .unwrap();
        assert_eq!(
            bench.channel.recorder().writes(),
            vec!["OUTP:POL INV", "OUTP:POL NORM", "VOLT:RANG:AUTO ON"]
        );

        let recorder = bench.channel.recorder();
        recorder.set_response("OUTP:POL?", "INV");
        recorder.set_response("VOLT:RANG:AUTO?", "1");
        assert_eq!(
            bench.call("get_output_polarity", arguments! {}).await.unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            bench.call("get_voltage_auto_range", arguments! {}).await.unwrap(),
            Value::Bool(true)
        );

        recorder.set_response("OUTP:POL?", "SIDEWAYS");
        let err = bench.call("get_output_polarity", arguments! {}).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_arbitrary_waveform_selection() {
        let mut bench = Bench::new().await;
        bench
            .call("select_arbitrary_waveform", arguments! {})
            .await
            .unwrap();
        bench
            .call("select_arbitrary_waveform", arguments! { "arb_name" => "RAMP10" })
            .await
            .unwrap();
        bench
            .call("set_sample_rate", arguments! { "sample_rate" => 2.5e6 })
            .await
            .unwrap();
        assert_eq!(
            bench.channel.recorder().writes(),
            vec![
                "FUNC:USER VOLATILE",
                "FUNC USER",
                "FUNC:USER RAMP10",
                "FUNC USER",
                "APPLY:USER 2500000",
            ]
        );
    }
}
