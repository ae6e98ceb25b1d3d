//! Device instances and the virtual device shim.
//!
//! A [`DeviceInstance`] owns exactly one channel and, once bound, one driver.
//! Every call goes through [`DeviceInstance::call`], which validates the
//! keyword arguments against the driver's operation schema before the driver
//! sees them and records the accepted call in the device's trace.
//!
//! # Virtual Devices
//!
//! A virtual device starts `Unbound` with a single operation, `mimic`:
//!
//! ```text
//!   Unbound ──mimic(object, definition)──► Bound(driver)
//!      │                                     │
//!      └─ any other op: UnknownOperation     └─ mimic again: AlreadyMimicking
//! ```
//!
//! `mimic` resolves the named driver, builds it over a [`RecordingChannel`]
//! and replaces the null channel the device was created with. From then on
//! the device exposes the mimicked driver's operations and behaves like the
//! real instrument, except that nothing reaches a bus.
//!
//! Virtual devices also keep a value register: results pinned with
//! [`DeviceInstance::set_measurement_value`], and the first argument of each
//! successful `set_<x>` call, are returned by `get_<x>` / `measure_<x>`.
//! The driver still runs first; a stored value only replaces a successful
//! result, converted to the operation's result kind. Mirrored values are
//! kept per `channel` argument.

use std::collections::HashMap;
use std::sync::Arc;

use labrig_core::{
    constructor_args, format_arguments, Arguments, Channel, ChannelRecorder, Driver,
    DriverFactory, OperationSet, OperationSpec, RecordingChannel, Result, RigError, Value,
    ValueKind,
};
use tokio::sync::Mutex;

use crate::registry::DriverRegistry;

/// Name of the virtual device's binding operation.
pub const MIMIC: &str = "mimic";

fn mimic_spec() -> OperationSpec {
    OperationSpec::new(MIMIC)
        .required("object", ValueKind::Str)
        .required("definition", ValueKind::Str)
}

/// One call accepted by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Operation name.
    pub operation: String,
    /// Validated arguments.
    pub arguments: Arguments,
}

impl std::fmt::Display for CallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.operation, format_arguments(&self.arguments))
    }
}

struct Binding {
    object: String,
    factory: Arc<dyn DriverFactory>,
    driver: Box<dyn Driver>,
}

enum Behavior {
    Unbound,
    Bound(Binding),
}

/// What a virtual device needs to resolve and build a driver on `mimic`.
struct VirtualContext {
    registry: Arc<DriverRegistry>,
    kwargs: Arguments,
}

struct DeviceState {
    behavior: Behavior,
    channel: Box<dyn Channel>,
    trace: Vec<CallRecord>,
    /// Values pinned by `set_measurement_value`.
    pinned: HashMap<String, Value>,
    /// Values mirrored from `set_<x>` calls.
    mirrored: HashMap<String, Value>,
    recorder: Option<ChannelRecorder>,
    closed: bool,
}

/// A driver bound to a channel, addressed by logical name.
pub struct DeviceInstance {
    name: String,
    address: String,
    idn: Option<String>,
    virtual_ctx: Option<VirtualContext>,
    state: Mutex<DeviceState>,
}

impl std::fmt::Debug for DeviceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceInstance")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("virtual", &self.is_virtual())
            .finish_non_exhaustive()
    }
}

impl DeviceInstance {
    /// Build a physical device: validate `kwargs`, construct the driver over
    /// `channel`.
    ///
    /// The channel is closed if construction fails.
    pub async fn physical(
        name: impl Into<String>,
        object: impl Into<String>,
        factory: Arc<dyn DriverFactory>,
        mut channel: Box<dyn Channel>,
        kwargs: &Arguments,
        idn: Option<String>,
    ) -> Result<Self> {
        let name = name.into();
        let built = match constructor_args(factory.as_ref(), kwargs) {
            Ok(args) => factory.build(channel.as_mut(), &args).await,
            Err(e) => Err(e),
        };
        let driver = match built {
            Ok(driver) => driver,
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    tracing::warn!(device = %name, error = %close_err, "failed to close channel");
                }
                return Err(e);
            }
        };

        Ok(Self {
            address: channel.address().to_string(),
            name,
            idn,
            virtual_ctx: None,
            state: Mutex::new(DeviceState::new(
                Behavior::Bound(Binding {
                    object: object.into(),
                    factory,
                    driver,
                }),
                channel,
            )),
        })
    }

    /// An unbound virtual device over `channel` (normally a null channel).
    ///
    /// `kwargs` become the constructor arguments of whatever driver the
    /// device later mimics.
    pub fn new_virtual(
        name: impl Into<String>,
        channel: Box<dyn Channel>,
        registry: Arc<DriverRegistry>,
        kwargs: Arguments,
    ) -> Self {
        Self {
            name: name.into(),
            address: channel.address().to_string(),
            idn: None,
            virtual_ctx: Some(VirtualContext { registry, kwargs }),
            state: Mutex::new(DeviceState::new(Behavior::Unbound, channel)),
        }
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the device was configured with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// `*IDN?` response captured when the channel was opened.
    pub fn idn(&self) -> Option<&str> {
        self.idn.as_deref()
    }

    /// Whether this is a virtual device.
    pub fn is_virtual(&self) -> bool {
        self.virtual_ctx.is_some()
    }

    /// Object name of the bound driver (`None` for an unbound shim).
    pub async fn bound_object(&self) -> Option<String> {
        match &self.state.lock().await.behavior {
            Behavior::Bound(binding) => Some(binding.object.clone()),
            Behavior::Unbound => None,
        }
    }

    /// Operations the device currently exposes.
    pub async fn operations(&self) -> OperationSet {
        match &self.state.lock().await.behavior {
            Behavior::Bound(binding) => binding.factory.operations().clone(),
            Behavior::Unbound => OperationSet::new().with(mimic_spec()),
        }
    }

    /// Invoke `operation` with keyword `arguments`.
    ///
    /// # Errors
    /// - `UnknownOperation` if the operation is not exposed
    /// - `InvalidArgument` if the arguments do not match its schema
    /// - `AlreadyMimicking` for a second `mimic` on a virtual device
    /// - `Communication` once the device is closed, or on channel failure
    pub async fn call(&self, operation: &str, arguments: Arguments) -> Result<Value> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.closed {
            return Err(RigError::communication(&self.address, "device is closed"));
        }

        if let (MIMIC, Some(ctx)) = (operation, &self.virtual_ctx) {
            return self.mimic(state, ctx, &arguments).await;
        }

        let Behavior::Bound(binding) = &mut state.behavior else {
            return Err(RigError::UnknownOperation {
                operation: operation.to_string(),
            });
        };
        let call = binding.factory.operations().validate(operation, &arguments)?;
        state.trace.push(CallRecord {
            operation: operation.to_string(),
            arguments: call.arguments().clone(),
        });
        tracing::trace!(device = %self.name, call = %format_arguments(call.arguments()), operation, "call");

        let value = binding.driver.invoke(state.channel.as_mut(), &call).await?;
        if !self.is_virtual() {
            return Ok(value);
        }

        let operations = binding.factory.operations();
        let Some(spec) = operations.get(operation) else {
            return Ok(value);
        };
        let stored = match state.pinned.get(operation) {
            Some(pinned) => Some(pinned),
            None => state.mirrored.get(&register_key(operation, call.get("channel"))),
        };
        if let Some(stored) = stored {
            return Ok(stored.clone().widen_to(spec.returns));
        }

        if let Some(suffix) = operation.strip_prefix("set_") {
            if let Some((param, first)) = spec
                .params
                .first()
                .and_then(|param| call.get(param.name).map(|value| (param, value)))
            {
                let scope = match param.name {
                    "channel" => None,
                    _ => call.get("channel"),
                };
                for target in [format!("get_{}", suffix), format!("measure_{}", suffix)] {
                    if operations.contains(&target) {
                        state
                            .mirrored
                            .insert(register_key(&target, scope), first.clone());
                    }
                }
            }
        }
        Ok(value)
    }

    async fn mimic(
        &self,
        state: &mut DeviceState,
        ctx: &VirtualContext,
        arguments: &Arguments,
    ) -> Result<Value> {
        if let Behavior::Bound(binding) = &state.behavior {
            let requested = arguments
                .get("object")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(RigError::AlreadyMimicking {
                current: binding.object.clone(),
                requested: requested.to_string(),
            });
        }

        let call = mimic_spec().validate(arguments)?;
        let object = call.str("object")?;
        let definition = call.str("definition")?;
        let factory = ctx.registry.resolve_physical(definition, object)?;
        let kwargs = constructor_args(factory.as_ref(), &ctx.kwargs)?;

        let mut channel = RecordingChannel::with_discipline(&self.address, factory.discipline());
        let recorder = channel.recorder();
        let driver = factory.build(&mut channel, &kwargs).await?;

        let mut previous = std::mem::replace(&mut state.channel, Box::new(channel));
        if let Err(e) = previous.close().await {
            tracing::debug!(device = %self.name, error = %e, "closing null channel failed");
        }

        tracing::info!(device = %self.name, object, definition, "virtual device bound");
        state.recorder = Some(recorder);
        state.trace.push(CallRecord {
            operation: MIMIC.to_string(),
            arguments: call.arguments().clone(),
        });
        state.behavior = Behavior::Bound(Binding {
            object: object.to_string(),
            factory,
            driver,
        });
        Ok(Value::Null)
    }

    /// Fix the value `operation` returns on a bound virtual device.
    ///
    /// # Errors
    /// `InvalidArgument` on a physical device, `UnknownOperation` if the
    /// mimicked driver does not expose `operation`.
    pub async fn set_measurement_value(&self, operation: &str, value: impl Into<Value>) -> Result<()> {
        if !self.is_virtual() {
            return Err(RigError::invalid_argument(
                "set_measurement_value",
                "operation",
                "only virtual devices accept pinned values",
            ));
        }
        let mut state = self.state.lock().await;
        let exposed = match &state.behavior {
            Behavior::Bound(binding) => binding.factory.operations().contains(operation),
            Behavior::Unbound => false,
        };
        if !exposed {
            return Err(RigError::UnknownOperation {
                operation: operation.to_string(),
            });
        }
        state.pinned.insert(operation.to_string(), value.into());
        Ok(())
    }

    /// Every accepted call, oldest first.
    pub async fn call_trace(&self) -> Vec<CallRecord> {
        self.state.lock().await.trace.clone()
    }

    /// Arguments of the most recent accepted call to `operation`.
    pub async fn call_history(&self, operation: &str) -> Option<Arguments> {
        self.state
            .lock()
            .await
            .trace
            .iter()
            .rev()
            .find(|record| record.operation == operation)
            .map(|record| record.arguments.clone())
    }

    /// Write log of a bound virtual device's recording channel.
    pub async fn recorder(&self) -> Option<ChannelRecorder> {
        self.state.lock().await.recorder.clone()
    }

    /// Run driver shutdown, then close the channel. Closing twice is a no-op.
    ///
    /// Both steps are attempted; the first failure is returned.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let shutdown = match &mut state.behavior {
            Behavior::Bound(binding) => binding.driver.shutdown(state.channel.as_mut()).await,
            Behavior::Unbound => Ok(()),
        };
        let closed = state.channel.close().await;
        tracing::debug!(device = %self.name, "device closed");
        shutdown.and(closed)
    }
}

/// Value register slot: the operation, scoped by its `channel` argument.
fn register_key(operation: &str, channel: Option<&Value>) -> String {
    match channel {
        Some(channel) => format!("{}@{}", operation, channel),
        None => operation.to_string(),
    }
}

impl DeviceState {
    fn new(behavior: Behavior, channel: Box<dyn Channel>) -> Self {
        Self {
            behavior,
            channel,
            trace: Vec::new(),
            pinned: HashMap::new(),
            mirrored: HashMap::new(),
            recorder: None,
            closed: false,
        }
    }
}
