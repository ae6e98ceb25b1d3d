//! Configuration loading.
//!
//! Two unrelated kinds of configuration live here:
//!
//! 1. **Instrument documents** ([`ConfigDocument`]): which instruments exist,
//!    where they are connected and how to initialize them. Loaded from JSON
//!    or TOML and handed to the resource manager.
//! 2. **Application settings** ([`RigSettings`]): logging, loader
//!    concurrency and transport defaults. Layered with `figment` from
//!    defaults, a TOML file and `LABRIG_*` environment variables.
//!
//! # Example Document
//!
//! ```json
//! {
//!   "source": {
//!     "object": "Keithley_2231A",
//!     "definition": "labrig.source",
//!     "address": "ASRL3::INSTR",
//!     "kwargs": { "channel": 1 },
//!     "init": [["set_voltage", { "voltage": 0 }], ["off"]]
//!   },
//!   "load": {
//!     "object": "VirtualDevice",
//!     "definition": "core",
//!     "address": "GPIB0::99::INSTR",
//!     "init": [["mimic", { "object": "Chroma_63600", "definition": "labrig.sink" }]]
//!   }
//! }
//! ```

pub mod document;
pub mod settings;

pub use document::{ConfigDocument, ConfigEntry, ConfigLoadError, InitStep};
pub use settings::{LoadSettings, LogFormat, RigSettings, SettingsError, TransportSettings};
