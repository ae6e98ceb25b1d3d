//! Electronic load drivers for labrig.
//!
//! This crate provides drivers for:
//! - Chroma 63600 series modular DC electronic loads
//!
//! Register the factories under [`DEFINITION`]:
//!
//! ```rust,ignore
//! for (object, factory) in labrig_driver_sink::factories() {
//!     registry.register(labrig_driver_sink::DEFINITION, object, factory)?;
//! }
//! ```

use std::sync::Arc;

use labrig_core::DriverFactory;

pub mod chroma;

pub use chroma::{Chroma63600, Chroma63600Factory};

/// Definition path every factory of this crate is registered under.
pub const DEFINITION: &str = "labrig.sink";

/// `(object name, factory)` for every load in this crate.
pub fn factories() -> Vec<(&'static str, Arc<dyn DriverFactory>)> {
    let chroma: Arc<dyn DriverFactory> = Arc::new(Chroma63600Factory::new());
    vec![("Chroma_63600", chroma)]
}

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Chroma63600Factory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
