//! `labrig-hardware`
//!
//! The equipment resource manager: turns a declarative configuration
//! document into a table of initialized instrument handles.
//!
//! ## Components
//!
//! - [`registry`]: `(definition, object)` → driver factory or virtual shim
//! - [`transport`]: resource strings → channels (TCP, serial, retry wrapper)
//! - [`device`]: a driver bound to a channel; the virtual device shim
//! - [`sequencer`]: replays `init` steps in order, fail-fast
//! - [`manager`]: the per-entry pipeline and the [`ResourceTable`]
//! - [`config`]: configuration documents and application settings
//! - [`finder`]: `*IDN?` based equipment discovery and config drafting
//!
//! ## Example
//!
//! ```rust,ignore
//! let registry = Arc::new(default_registry()?);
//! let binder = Arc::new(TransportBinder::with_defaults(&settings.transport));
//! let manager = ResourceManager::new(registry, binder);
//!
//! let document = ConfigDocument::from_path(Path::new("rig.json"))?;
//! let (table, errors) = manager.load(&document).await;
//! if let Some(errors) = errors {
//!     eprintln!("{errors}");
//! }
//! let psu = table.get("source").unwrap();
//! psu.call("set_voltage", arguments! { "voltage" => 5.0 }).await?;
//! ```

pub mod config;
pub mod device;
pub mod drivers;
pub mod finder;
pub mod manager;
pub mod registry;
pub mod sequencer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigDocument, ConfigEntry, ConfigLoadError, InitStep, RigSettings};
pub use device::{CallRecord, DeviceInstance};
pub use drivers::{default_registry, register_builtin_drivers};
pub use finder::{draft_document, identify, Identification};
pub use manager::{ResourceManager, ResourceTable};
pub use registry::{DriverDescriptor, DriverRegistry, ResolvedDriver};
pub use transport::{ChannelOptions, InterfaceKind, ResourceAddress, Transport, TransportBinder};
