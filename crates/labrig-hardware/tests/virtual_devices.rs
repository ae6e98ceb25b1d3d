//! Virtual devices mimicking built-in drivers.
//!
//! A mimicked driver must answer every call the way the real driver does
//! over a channel: same value kinds, same error kinds.
#![cfg(feature = "source")]

use std::sync::Arc;

use labrig_core::{arguments, Arguments, ErrorKind, NullChannel, RecordingChannel, Result, Value};
use labrig_hardware::{default_registry, DeviceInstance, DriverRegistry};

const OBJECT: &str = "Keithley_2231A";
const DEFINITION: &str = "labrig.source";

fn registry() -> Arc<DriverRegistry> {
    Arc::new(default_registry().unwrap())
}

async fn real_supply(registry: &DriverRegistry) -> DeviceInstance {
    let factory = registry.resolve_physical(DEFINITION, OBJECT).unwrap();
    DeviceInstance::physical(
        "real",
        OBJECT,
        factory,
        Box::new(RecordingChannel::new("USB0::0x05E6::0x2231::1::INSTR")),
        &Arguments::new(),
        None,
    )
    .await
    .unwrap()
}

async fn virtual_supply(registry: Arc<DriverRegistry>) -> DeviceInstance {
    let device = DeviceInstance::new_virtual(
        "stand_in",
        Box::new(NullChannel::new("GPIB0::99::INSTR")),
        registry,
        Arguments::new(),
    );
    device
        .call("mimic", arguments! { "object" => OBJECT, "definition" => DEFINITION })
        .await
        .unwrap();
    device
}

fn outcome(result: Result<Value>) -> std::result::Result<Value, ErrorKind> {
    result.map_err(|e| e.kind())
}

#[tokio::test]
async fn test_mimicked_keithley_answers_like_the_real_one() {
    let registry = registry();
    let real = real_supply(&registry).await;
    let stand_in = virtual_supply(registry).await;

    let calls = [
        ("set_voltage", arguments! { "voltage" => 0, "channel" => 1 }),
        ("get_voltage", arguments! {}),
        ("get_voltage", arguments! { "channel" => 1 }),
        ("measure_voltage", arguments! { "channel" => 1 }),
        ("set_current", arguments! { "current" => 2, "channel" => 1 }),
        ("get_current", arguments! { "channel" => 1 }),
        ("get_current", arguments! {}),
        ("set_state", arguments! { "state" => true }),
        ("on", arguments! {}),
        ("on", arguments! { "channel" => 1 }),
        ("get_channel", arguments! {}),
        ("set_access_remote", arguments! { "mode" => "sideways" }),
        ("set_voltage", arguments! { "voltage" => "high", "channel" => 1 }),
        ("pop_error_queue", arguments! {}),
        ("no_such_operation", arguments! {}),
    ];
    for (operation, args) in calls {
        let expected = outcome(real.call(operation, args.clone()).await);
        let actual = outcome(stand_in.call(operation, args.clone()).await);
        assert_eq!(actual, expected, "{operation}({args:?})");
    }
}

#[tokio::test]
async fn test_channel_check_runs_before_stored_values() {
    let stand_in = virtual_supply(registry()).await;
    stand_in
        .call("set_voltage", arguments! { "voltage" => 0, "channel" => 1 })
        .await
        .unwrap();

    let err = stand_in.call("get_voltage", arguments! {}).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        stand_in
            .call("get_voltage", arguments! { "channel" => 1 })
            .await
            .unwrap(),
        Value::Float(0.0)
    );

    stand_in.set_measurement_value("measure_current", 3).await.unwrap();
    let err = stand_in.call("measure_current", arguments! {}).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        stand_in
            .call("measure_current", arguments! { "channel" => 2 })
            .await
            .unwrap(),
        Value::Float(3.0)
    );
}

#[tokio::test]
async fn test_mirrored_setpoints_are_kept_per_channel() {
    let stand_in = virtual_supply(registry()).await;
    stand_in
        .call("set_voltage", arguments! { "voltage" => 5, "channel" => 1 })
        .await
        .unwrap();
    stand_in
        .call("set_voltage", arguments! { "voltage" => 7.5, "channel" => 2 })
        .await
        .unwrap();

    for (channel, expected) in [(1, 5.0), (2, 7.5)] {
        let args = arguments! { "channel" => channel };
        assert_eq!(
            stand_in.call("get_voltage", args.clone()).await.unwrap(),
            Value::Float(expected)
        );
        assert_eq!(
            stand_in.call("measure_voltage", args).await.unwrap(),
            Value::Float(expected)
        );
    }
}
