//! `labrig-core`
//!
//! Core trait definitions and types shared by the labrig resource manager and
//! its instrument drivers.
//!
//! ## Layers
//!
//! - **Channel**: line-oriented link to one instrument ([`Channel`]), with
//!   hardware-free [`NullChannel`] and [`RecordingChannel`] backends.
//! - **Driver**: stateful command behavior over a channel ([`Driver`]),
//!   produced by a registered [`DriverFactory`].
//! - **Operation schema**: the named, keyword-argument operations a driver
//!   exposes ([`OperationSet`]), validated before dispatch.
//!
//! ## Key Types
//!
//! - [`Value`] / [`Arguments`]: dynamically typed keyword arguments
//! - [`OperationSpec`] / [`CallArgs`]: per-operation schema and validated call
//! - [`RigError`] / [`LoadError`]: error taxonomy and the load aggregate

pub mod channel;
pub mod driver;
pub mod error;
pub mod operation;
pub mod scpi;
pub mod value;

pub use channel::{Channel, ChannelRecorder, Discipline, NullChannel, RecordingChannel};
pub use driver::{constructor_args, Driver, DriverCategory, DriverFactory};
pub use error::{EntryFailure, ErrorKind, LoadError, Result, RigError};
pub use operation::{CallArgs, OperationSet, OperationSpec, Param};
pub use value::{format_arguments, Arguments, Value, ValueKind};
