//! Driver registry.
//!
//! Maps a `(definition path, object name)` pair to either a concrete
//! [`DriverFactory`] or the virtual device shim. Resolution is exact string
//! match on both parts.
//!
//! The registry is populated at process start and then shared immutably
//! behind an `Arc`; every mutating method takes `&mut self`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = DriverRegistry::new();
//! register_builtin_drivers(&mut registry)?;
//! let registry = Arc::new(registry);
//!
//! let factory = registry.resolve("labrig.source", "Keithley_2231A")?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use labrig_core::{DriverCategory, DriverFactory, Result, RigError};
use serde::Serialize;

/// Object name that selects the virtual device shim.
pub const VIRTUAL_OBJECT: &str = "VirtualDevice";

/// Definition paths under which [`DriverRegistry::new`] registers the shim.
pub const VIRTUAL_DEFINITIONS: [&str; 2] = ["core", "labrig.core"];

/// Registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DriverKey {
    definition: String,
    object: String,
}

/// What a registry key resolves to.
#[derive(Clone)]
pub enum ResolvedDriver {
    /// A concrete instrument driver.
    Physical(Arc<dyn DriverFactory>),
    /// The virtual device shim; behavior is chosen later by `mimic`.
    Virtual,
}

impl std::fmt::Debug for ResolvedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedDriver::Physical(factory) => {
                f.debug_tuple("Physical").field(&factory.name()).finish()
            }
            ResolvedDriver::Virtual => f.write_str("Virtual"),
        }
    }
}

/// Listing entry for one registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverDescriptor {
    /// Dotted definition path.
    pub definition: String,
    /// Object name.
    pub object: String,
    /// Instrument family.
    pub category: DriverCategory,
    /// Number of operations exposed (1 for the unbound shim).
    pub operations: usize,
}

/// `(definition, object)` → driver lookup table.
pub struct DriverRegistry {
    entries: HashMap<DriverKey, ResolvedDriver>,
    /// Registration order, for stable listings.
    order: Vec<DriverKey>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Registry containing only the virtual device shim, registered under
    /// every path in [`VIRTUAL_DEFINITIONS`].
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for definition in VIRTUAL_DEFINITIONS {
            // A fresh registry cannot hold a conflicting key.
            let _ = registry.register_virtual(definition);
        }
        registry
    }

    /// Registry with no entries at all, not even the shim.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn insert(&mut self, definition: &str, object: &str, resolved: ResolvedDriver) -> Result<()> {
        let key = DriverKey {
            definition: definition.to_string(),
            object: object.to_string(),
        };
        if self.entries.contains_key(&key) {
            return Err(RigError::DuplicateDriver {
                definition: key.definition,
                object: key.object,
            });
        }
        tracing::debug!(definition, object, driver = ?resolved, "registered driver");
        self.order.push(key.clone());
        self.entries.insert(key, resolved);
        Ok(())
    }

    /// Register `factory` under `(definition, object)`.
    ///
    /// # Errors
    /// `DuplicateDriver` if the pair is already registered.
    pub fn register(
        &mut self,
        definition: &str,
        object: &str,
        factory: Arc<dyn DriverFactory>,
    ) -> Result<()> {
        self.insert(definition, object, ResolvedDriver::Physical(factory))
    }

    /// Register the virtual device shim under `(definition, "VirtualDevice")`.
    ///
    /// # Errors
    /// `DuplicateDriver` if the pair is already registered.
    pub fn register_virtual(&mut self, definition: &str) -> Result<()> {
        self.insert(definition, VIRTUAL_OBJECT, ResolvedDriver::Virtual)
    }

    /// Resolve `(definition, object)`.
    ///
    /// # Errors
    /// `UnknownDriver` if the pair was never registered.
    pub fn resolve(&self, definition: &str, object: &str) -> Result<ResolvedDriver> {
        let key = DriverKey {
            definition: definition.to_string(),
            object: object.to_string(),
        };
        self.entries
            .get(&key)
            .cloned()
            .ok_or_else(|| RigError::UnknownDriver {
                definition: key.definition,
                object: key.object,
            })
    }

    /// Resolve to a concrete factory; the shim itself cannot be mimicked.
    pub fn resolve_physical(&self, definition: &str, object: &str) -> Result<Arc<dyn DriverFactory>> {
        match self.resolve(definition, object)? {
            ResolvedDriver::Physical(factory) => Ok(factory),
            ResolvedDriver::Virtual => Err(RigError::UnknownDriver {
                definition: definition.to_string(),
                object: object.to_string(),
            }),
        }
    }

    /// Whether `(definition, object)` is registered.
    pub fn contains(&self, definition: &str, object: &str) -> bool {
        self.resolve(definition, object).is_ok()
    }

    /// Every registration in registration order.
    pub fn descriptors(&self) -> Vec<DriverDescriptor> {
        self.order
            .iter()
            .filter_map(|key| {
                let resolved = self.entries.get(key)?;
                let (category, operations) = match resolved {
                    ResolvedDriver::Physical(factory) => {
                        (factory.category(), factory.operations().len())
                    }
                    ResolvedDriver::Virtual => (DriverCategory::Virtual, 1),
                };
                Some(DriverDescriptor {
                    definition: key.definition.clone(),
                    object: key.object.clone(),
                    category,
                    operations,
                })
            })
            .collect()
    }

    /// Concrete factories with their keys, in registration order.
    pub fn factories(&self) -> Vec<(DriverDescriptor, Arc<dyn DriverFactory>)> {
        self.descriptors()
            .into_iter()
            .filter_map(|descriptor| {
                match self.resolve(&descriptor.definition, &descriptor.object).ok()? {
                    ResolvedDriver::Physical(factory) => Some((descriptor, factory)),
                    ResolvedDriver::Virtual => None,
                }
            })
            .collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
