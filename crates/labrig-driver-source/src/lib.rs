//! DC power supply drivers for labrig.
//!
//! This crate provides drivers for:
//! - Keithley 2231A-30-3 triple-channel supply (and the B&K Precision 9140,
//!   which shares its command set)
//! - Sorensen XBT series supplies
//! - Intepro PSI 9000 series programmable supplies
//!
//! # Usage
//!
//! Register the factories under [`DEFINITION`]:
//!
//! ```rust,ignore
//! for (object, factory) in labrig_driver_source::factories() {
//!     registry.register(labrig_driver_source::DEFINITION, object, factory)?;
//! }
//! ```
//!
//! A configuration entry then refers to `"definition": "labrig.source"` and
//! one of the object names below.

use std::sync::Arc;

use labrig_core::DriverFactory;

pub mod intepro;
pub mod keithley;
pub mod sorensen;

pub use intepro::{InteproPsi9000, InteproPsi9000Factory};
pub use keithley::{Keithley2231A, Keithley2231AFactory};
pub use sorensen::{SorensenXbt, SorensenXbtFactory};

/// Definition path every factory of this crate is registered under.
pub const DEFINITION: &str = "labrig.source";

/// `(object name, factory)` for every supply in this crate.
pub fn factories() -> Vec<(&'static str, Arc<dyn DriverFactory>)> {
    let keithley: Arc<dyn DriverFactory> = Arc::new(Keithley2231AFactory::keithley());
    let bk_precision: Arc<dyn DriverFactory> = Arc::new(Keithley2231AFactory::bk_precision());
    let sorensen: Arc<dyn DriverFactory> = Arc::new(SorensenXbtFactory::new());
    let intepro: Arc<dyn DriverFactory> = Arc::new(InteproPsi9000Factory::new());
    vec![
        ("Keithley_2231A", keithley),
        ("BKPrecision_9140", bk_precision),
        ("Sorensen_XBT", sorensen),
        ("Intepro_PSI9000", intepro),
    ]
}

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Keithley2231AFactory>());
    std::hint::black_box(std::any::TypeId::of::<SorensenXbtFactory>());
    std::hint::black_box(std::any::TypeId::of::<InteproPsi9000Factory>());
}
