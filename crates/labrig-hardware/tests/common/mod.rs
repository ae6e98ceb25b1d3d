//! Test doubles for the resource manager integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use labrig_core::{
    scpi, CallArgs, Channel, Driver, DriverCategory, DriverFactory, OperationSet, OperationSpec,
    Param, RecordingChannel, Result, RigError, Value, ValueKind,
};
use labrig_hardware::transport::{ChannelOptions, InterfaceKind, ResourceAddress, Transport};
use labrig_hardware::{DriverRegistry, TransportBinder};
use tokio_util::sync::CancellationToken;

pub const SCRIPTED_DEFINITION: &str = "test.scripted";
pub const SCRIPTED_OBJECT: &str = "Scripted";
/// Second registration of the scripted, under a short definition path.
pub const ALIAS_DEFINITION: &str = "d.X";
pub const ALIAS_OBJECT: &str = "X";
pub const SCRIPTED_IDN: &str = "ACME,SCRIPTED-1,0001,1.0";

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Tracks how many `dwell` calls overlap, per bus and overall.
#[derive(Default)]
pub struct BusMeter {
    state: Mutex<MeterState>,
}

#[derive(Default)]
struct MeterState {
    active: HashMap<String, usize>,
    max_per_bus: HashMap<String, usize>,
    active_total: usize,
    max_total: usize,
}

impl BusMeter {
    fn enter(&self, bus: &str) {
        let mut state = self.state.lock().unwrap();
        let active = {
            let count = state.active.entry(bus.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let max = state.max_per_bus.entry(bus.to_string()).or_insert(0);
        *max = (*max).max(active);
        state.active_total += 1;
        state.max_total = state.max_total.max(state.active_total);
    }

    fn exit(&self, bus: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.active.get_mut(bus) {
            *count -= 1;
        }
        state.active_total -= 1;
    }

    pub fn max_on_bus(&self, bus: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_per_bus
            .get(bus)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_total(&self) -> usize {
        self.state.lock().unwrap().max_total
    }
}

/// Scripted driver that records every operation it executes.
///
/// Operations:
/// - `set_voltage(voltage)` / `get_voltage()`: `VOLT <x>` / `VOLT?`
/// - `arm()` then `fire()`: `fire` fails unless `arm` ran first
/// - `off()`: `OUTP 0`
/// - `dwell(ms)`: sleeps while holding the bus meter
/// - `trip()`: fires the shared cancellation token
pub struct ScriptedFactory {
    ops: OperationSet,
    constructor: Vec<Param>,
    pub log: EventLog,
    pub meter: Arc<BusMeter>,
    pub trip: CancellationToken,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            ops: OperationSet::new()
                .with(OperationSpec::new("set_voltage").required("voltage", ValueKind::Float))
                .with(OperationSpec::new("get_voltage").returns(ValueKind::Float))
                .with(OperationSpec::new("arm"))
                .with(OperationSpec::new("fire").optional("count", ValueKind::Int))
                .with(OperationSpec::new("off"))
                .with(OperationSpec::new("dwell").required("ms", ValueKind::Int))
                .with(OperationSpec::new("trip")),
            constructor: vec![Param::optional("channel", ValueKind::Int)],
            log: EventLog::default(),
            meter: Arc::new(BusMeter::default()),
            trip: CancellationToken::new(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriverFactory for ScriptedFactory {
    fn name(&self) -> &str {
        SCRIPTED_OBJECT
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::Source
    }

    fn model_token(&self) -> Option<&str> {
        Some("scripted1")
    }

    fn constructor(&self) -> &[Param] {
        &self.constructor
    }

    fn operations(&self) -> &OperationSet {
        &self.ops
    }

    async fn build(&self, channel: &mut dyn Channel, _kwargs: &CallArgs) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Scripted {
            address: channel.address().to_string(),
            armed: false,
            log: self.log.clone(),
            meter: self.meter.clone(),
            trip: self.trip.clone(),
        }))
    }
}

struct Scripted {
    address: String,
    armed: bool,
    log: EventLog,
    meter: Arc<BusMeter>,
    trip: CancellationToken,
}

#[async_trait]
impl Driver for Scripted {
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {}", self.address, call.operation()));

        match call.operation() {
            "set_voltage" => {
                scpi::write_unit(channel, &format!("VOLT {}", call.f64("voltage")?)).await
            }
            "get_voltage" => {
                let response = scpi::query(channel, "VOLT?").await?;
                Ok(Value::Float(scpi::parse_f64("get_voltage", &response, None)?))
            }
            "arm" => {
                self.armed = true;
                Ok(Value::Null)
            }
            "fire" => {
                if !self.armed {
                    return Err(RigError::invalid_argument("fire", "armed", "arm first"));
                }
                scpi::write_unit(channel, "FIRE").await
            }
            "off" => scpi::write_unit(channel, "OUTP 0").await,
            "dwell" => {
                let bus = self.address.split("::").next().unwrap_or_default().to_string();
                self.meter.enter(&bus);
                tokio::time::sleep(Duration::from_millis(call.i64("ms")? as u64)).await;
                self.meter.exit(&bus);
                Ok(Value::Null)
            }
            "trip" => {
                self.trip.cancel();
                Ok(Value::Null)
            }
            other => Err(RigError::UnknownOperation {
                operation: other.to_string(),
            }),
        }
    }
}

/// In-memory channel that logs when it is closed.
pub struct TrackedChannel {
    inner: RecordingChannel,
    events: EventLog,
}

#[async_trait]
impl Channel for TrackedChannel {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn write(&mut self, message: &str) -> Result<()> {
        self.inner.write(message).await
    }

    async fn read(&mut self) -> Result<String> {
        self.inner.read().await
    }

    async fn close(&mut self) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("close {}", self.inner.address()));
        self.inner.close().await
    }
}

/// Transport for GPIB and USB that refuses a configured set of addresses.
#[derive(Default)]
pub struct BenchTransport {
    pub unreachable: Vec<String>,
    pub events: EventLog,
}

#[async_trait]
impl Transport for BenchTransport {
    async fn connect(
        &self,
        address: &ResourceAddress,
        _options: &ChannelOptions,
    ) -> Result<Box<dyn Channel>> {
        if self.unreachable.iter().any(|a| a == address.as_str()) {
            return Err(RigError::channel_open(address.as_str(), "no listener"));
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("open {}", address.as_str()));
        let inner = RecordingChannel::new(address.as_str());
        inner.recorder().set_response("*IDN?", SCRIPTED_IDN);
        Ok(Box::new(TrackedChannel {
            inner,
            events: self.events.clone(),
        }))
    }
}

/// Bench with the scripted registered under `test.scripted/Scripted` and `d.X/X`,
/// and the virtual shim under `core`.
pub struct Bench {
    pub factory: Arc<ScriptedFactory>,
    pub transport: Arc<BenchTransport>,
    pub registry: Arc<DriverRegistry>,
    pub binder: Arc<TransportBinder>,
}

impl Bench {
    pub fn new() -> Self {
        Self::with_unreachable(&[])
    }

    pub fn with_unreachable(addresses: &[&str]) -> Self {
        let factory = Arc::new(ScriptedFactory::new());
        let transport = Arc::new(BenchTransport {
            unreachable: addresses.iter().map(|a| a.to_string()).collect(),
            events: EventLog::default(),
        });

        let mut registry = DriverRegistry::new();
        registry
            .register(SCRIPTED_DEFINITION, SCRIPTED_OBJECT, factory.clone())
            .unwrap();
        registry
            .register(ALIAS_DEFINITION, ALIAS_OBJECT, factory.clone())
            .unwrap();

        let binder = TransportBinder::new()
            .with_transport(InterfaceKind::Gpib, transport.clone())
            .with_transport(InterfaceKind::Usb, transport.clone());

        Self {
            factory,
            transport,
            registry: Arc::new(registry),
            binder: Arc::new(binder),
        }
    }

    pub fn manager(&self) -> labrig_hardware::ResourceManager {
        labrig_hardware::ResourceManager::new(self.registry.clone(), self.binder.clone())
    }

    pub fn channel_events(&self) -> Vec<String> {
        self.transport.events.lock().unwrap().clone()
    }
}
