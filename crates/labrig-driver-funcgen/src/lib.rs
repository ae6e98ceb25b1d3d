//! Function generator drivers for labrig.
//!
//! This crate provides drivers for:
//! - Agilent 33250A 80 MHz function / arbitrary waveform generator
//!
//! Register the factories under [`DEFINITION`]:
//!
//! ```rust,ignore
//! for (object, factory) in labrig_driver_funcgen::factories() {
//!     registry.register(labrig_driver_funcgen::DEFINITION, object, factory)?;
//! }
//! ```

use std::sync::Arc;

use labrig_core::DriverFactory;

pub mod agilent;

pub use agilent::{Agilent33250A, Agilent33250AFactory};

/// Definition path every factory of this crate is registered under.
pub const DEFINITION: &str = "labrig.functiongenerator";

/// `(object name, factory)` for every generator in this crate.
pub fn factories() -> Vec<(&'static str, Arc<dyn DriverFactory>)> {
    let agilent: Arc<dyn DriverFactory> = Arc::new(Agilent33250AFactory::new());
    vec![("Agilent_33250A", agilent)]
}

/// Force the linker to include this crate.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Agilent33250AFactory>());
}
