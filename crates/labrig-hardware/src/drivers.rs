//! Built-in driver registration.
//!
//! Each driver crate is optional and enabled by a cargo feature of the same
//! family name (`source`, `sink`, `funcgen`; all on by default).

#[cfg(any(feature = "source", feature = "sink", feature = "funcgen"))]
use std::sync::Arc;

#[cfg(any(feature = "source", feature = "sink", feature = "funcgen"))]
use labrig_core::DriverFactory;
use labrig_core::Result;

use crate::registry::DriverRegistry;

#[cfg(any(feature = "source", feature = "sink", feature = "funcgen"))]
fn register_all(
    registry: &mut DriverRegistry,
    definition: &str,
    factories: Vec<(&'static str, Arc<dyn DriverFactory>)>,
) -> Result<()> {
    for (object, factory) in factories {
        registry.register(definition, object, factory)?;
    }
    Ok(())
}

/// Register every driver crate compiled into this build.
///
/// # Errors
/// `DuplicateDriver` if a built-in pair was already registered.
pub fn register_builtin_drivers(registry: &mut DriverRegistry) -> Result<()> {
    #[cfg(feature = "source")]
    register_all(
        registry,
        labrig_driver_source::DEFINITION,
        labrig_driver_source::factories(),
    )?;

    #[cfg(feature = "sink")]
    register_all(
        registry,
        labrig_driver_sink::DEFINITION,
        labrig_driver_sink::factories(),
    )?;

    #[cfg(feature = "funcgen")]
    register_all(
        registry,
        labrig_driver_funcgen::DEFINITION,
        labrig_driver_funcgen::factories(),
    )?;

    tracing::debug!(drivers = registry.len(), "built-in drivers registered");
    Ok(())
}

/// Registry with the virtual shim and every built-in driver.
pub fn default_registry() -> Result<DriverRegistry> {
    let mut registry = DriverRegistry::new();
    register_builtin_drivers(&mut registry)?;
    Ok(registry)
}
