//! Driver and driver factory traits.
//!
//! A [`DriverFactory`] is registered under one or more `(definition, object)`
//! pairs and describes everything the resource manager needs before any hardware is
//! touched: the operation schemas, constructor parameters, the channel
//! discipline a virtual stand-in should use, and how to recognise the
//! instrument from its `*IDN?` string. `build` then produces the stateful
//! [`Driver`] bound to one channel.
//!
//! # Example
//!
//! ```rust,ignore
//! registry.register("labrig.source", "Keithley_2231A", Arc::new(Keithley2231AFactory::new()))?;
//! ```

use async_trait::async_trait;
use serde::Serialize;

use crate::channel::{Channel, Discipline};
use crate::error::Result;
use crate::operation::{validate_params, CallArgs, OperationSet, Param};
use crate::value::{Arguments, Value};

/// Broad instrument family, used for listings and for drafting configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverCategory {
    /// DC power supply.
    Source,
    /// Electronic load.
    Sink,
    /// Function / arbitrary waveform generator.
    FunctionGenerator,
    /// The virtual device shim.
    Virtual,
    /// Anything else.
    Other,
}

impl std::fmt::Display for DriverCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverCategory::Source => "source",
            DriverCategory::Sink => "sink",
            DriverCategory::FunctionGenerator => "functiongenerator",
            DriverCategory::Virtual => "virtual",
            DriverCategory::Other => "other",
        };
        f.pad(label)
    }
}

/// Stateful command behavior bound to one channel.
///
/// The device instance owns both the driver and the channel and hands the
/// channel in on every call, so a driver never outlives or shares it.
#[async_trait]
pub trait Driver: Send {
    /// Execute a validated call.
    async fn invoke(&mut self, channel: &mut dyn Channel, call: &CallArgs) -> Result<Value>;

    /// Return the instrument to front-panel control before the channel
    /// closes.
    async fn shutdown(&mut self, _channel: &mut dyn Channel) -> Result<()> {
        Ok(())
    }
}

/// Constructs [`Driver`]s of one instrument model.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Human readable model name.
    fn name(&self) -> &str;

    /// Instrument family.
    fn category(&self) -> DriverCategory {
        DriverCategory::Other
    }

    /// Token that appears in a normalized `*IDN?` response of this model.
    fn model_token(&self) -> Option<&str> {
        None
    }

    /// Keyword parameters accepted at construction time.
    fn constructor(&self) -> &[Param] {
        &[]
    }

    /// Operations exposed by every driver this factory builds.
    fn operations(&self) -> &OperationSet;

    /// How a recording channel should answer when this driver is mimicked.
    fn discipline(&self) -> Discipline {
        Discipline::Echo
    }

    /// Build a driver bound to `channel`. May issue setup commands.
    async fn build(&self, channel: &mut dyn Channel, kwargs: &CallArgs) -> Result<Box<dyn Driver>>;
}

/// Validate constructor `kwargs` against `factory.constructor()`.
///
/// Errors name the pseudo-operation `<name>::new`.
pub fn constructor_args(factory: &dyn DriverFactory, kwargs: &Arguments) -> Result<CallArgs> {
    let operation = format!("{}::new", factory.name());
    validate_params(&operation, factory.constructor(), kwargs)
}
