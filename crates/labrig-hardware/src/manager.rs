//! Resource manager.
//!
//! Turns a [`ConfigDocument`] into a [`ResourceTable`] of ready devices. Each
//! entry goes through the same pipeline:
//!
//! ```text
//! resolve driver ─► open channel ─► (*IDN?) ─► construct device ─► run init ─► table
//! ```
//!
//! A failure anywhere in the pipeline only affects its own entry: its
//! channel is closed and loading continues with the next one.
//! The caller always receives every device that loaded plus an itemized
//! [`LoadError`] for the rest, both in document order.
//!
//! # Concurrency
//!
//! With one worker (the default) entries load strictly one after another.
//! With more, entries run concurrently under a semaphore of that size, but
//! entries whose addresses share a bus (`GPIB0`, `ASRL3`, one TCP host) are
//! serialized by a per-bus lock so two instruments on one bus never talk at
//! once. Virtual entries take no lock.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use indexmap::IndexMap;
use labrig_core::{Channel, EntryFailure, LoadError, Result, RigError};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigDocument, ConfigEntry};
use crate::device::DeviceInstance;
use crate::registry::{DriverRegistry, ResolvedDriver};
use crate::sequencer;
use crate::transport::TransportBinder;

// =============================================================================
// Resource Table
// =============================================================================

/// Logical name to device, in document order.
#[derive(Debug, Default)]
pub struct ResourceTable {
    devices: IndexMap<String, Arc<DeviceInstance>>,
}

impl ResourceTable {
    /// Device named `name` (case-sensitive).
    pub fn get(&self, name: &str) -> Option<&Arc<DeviceInstance>> {
        self.devices.get(name)
    }

    /// Whether `name` loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Names in document order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Devices in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<DeviceInstance>)> {
        self.devices.iter().map(|(name, device)| (name.as_str(), device))
    }

    /// Number of loaded devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// `true` when nothing loaded.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Close every device, last loaded first.
    ///
    /// Every device is attempted; the failures are returned.
    pub async fn close_all(&self) -> Vec<EntryFailure> {
        let mut failures = Vec::new();
        for (name, device) in self.devices.iter().rev() {
            if let Err(error) = device.close().await {
                tracing::warn!(device = %name, error = %error, "failed to close device");
                failures.push(EntryFailure {
                    name: name.clone(),
                    error,
                });
            }
        }
        failures
    }
}

// =============================================================================
// Resource Manager
// =============================================================================

/// Loads configuration documents into resource tables.
#[derive(Clone)]
pub struct ResourceManager {
    registry: Arc<DriverRegistry>,
    binder: Arc<TransportBinder>,
    workers: usize,
}

impl ResourceManager {
    /// Sequential manager over `registry` and `binder`.
    pub fn new(registry: Arc<DriverRegistry>, binder: Arc<TransportBinder>) -> Self {
        Self {
            registry,
            binder,
            workers: 1,
        }
    }

    /// Builder-style: number of concurrent entry workers (minimum 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Driver registry.
    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// Transport binder.
    pub fn binder(&self) -> &Arc<TransportBinder> {
        &self.binder
    }

    /// Resolve every entry without opening anything.
    pub fn check(&self, document: &ConfigDocument) -> Option<LoadError> {
        let failures: Vec<EntryFailure> = document
            .iter()
            .filter_map(|(name, entry)| {
                self.registry
                    .resolve(&entry.definition, &entry.object)
                    .err()
                    .map(|error| EntryFailure {
                        name: name.to_string(),
                        error,
                    })
            })
            .collect();
        aggregate(document.len(), failures)
    }

    /// Load every entry of `document`.
    pub async fn load(&self, document: &ConfigDocument) -> (ResourceTable, Option<LoadError>) {
        self.load_with_cancel(document, &CancellationToken::new())
            .await
    }

    /// Load with cooperative cancellation.
    ///
    /// Once `cancel` fires no new entry starts and running sequences stop
    /// before their next step; those entries are reported as `Cancelled`.
    pub async fn load_with_cancel(
        &self,
        document: &ConfigDocument,
        cancel: &CancellationToken,
    ) -> (ResourceTable, Option<LoadError>) {
        tracing::info!(entries = document.len(), workers = self.workers, "loading configuration");

        let outcomes = if self.workers > 1 {
            self.load_concurrent(document, cancel).await
        } else {
            let mut outcomes = Vec::with_capacity(document.len());
            for (name, entry) in document.iter() {
                outcomes.push(self.load_entry(name, entry, cancel).await);
            }
            outcomes
        };

        let mut table = ResourceTable::default();
        let mut failures = Vec::new();
        for ((name, _), outcome) in document.iter().zip(outcomes) {
            match outcome {
                Ok(device) => {
                    table.devices.insert(name.to_string(), Arc::new(device));
                }
                Err(error) => failures.push(EntryFailure {
                    name: name.to_string(),
                    error,
                }),
            }
        }

        tracing::info!(
            loaded = table.len(),
            failed = failures.len(),
            "configuration loaded"
        );
        (table, aggregate(document.len(), failures))
    }

    async fn load_concurrent(
        &self,
        document: &ConfigDocument,
        cancel: &CancellationToken,
    ) -> Vec<Result<DeviceInstance>> {
        let permits = Semaphore::new(self.workers);
        let bus_locks: DashMap<String, Arc<Mutex<()>>> = DashMap::new();

        let tasks = document.iter().map(|(name, entry)| {
            let permits = &permits;
            let bus_locks = &bus_locks;
            async move {
                let lock = self
                    .bus_of(entry)
                    .map(|bus| bus_locks.entry(bus).or_default().clone());
                let _bus = match &lock {
                    Some(lock) => Some(lock.lock().await),
                    None => None,
                };
                let _permit = permits.acquire().await.ok();
                self.load_entry(name, entry, cancel).await
            }
        });
        join_all(tasks).await
    }

    /// Bus an entry occupies; `None` for virtual entries and addresses that
    /// will fail to parse anyway.
    fn bus_of(&self, entry: &ConfigEntry) -> Option<String> {
        match self.registry.resolve(&entry.definition, &entry.object) {
            Ok(ResolvedDriver::Physical(_)) => self.binder.bus_key(&entry.address),
            _ => None,
        }
    }

    /// Run the full pipeline for one entry.
    pub async fn load_entry(
        &self,
        name: &str,
        entry: &ConfigEntry,
        cancel: &CancellationToken,
    ) -> Result<DeviceInstance> {
        if cancel.is_cancelled() {
            return Err(RigError::Cancelled { completed: 0 });
        }

        let outcome = self.build_and_initialize(name, entry, cancel).await;
        match &outcome {
            Ok(_) => tracing::info!(
                device = %name,
                object = %entry.object,
                address = %entry.address,
                "entry loaded"
            ),
            Err(error) => tracing::warn!(
                device = %name,
                object = %entry.object,
                address = %entry.address,
                error = %error,
                "entry failed"
            ),
        }
        outcome
    }

    async fn build_and_initialize(
        &self,
        name: &str,
        entry: &ConfigEntry,
        cancel: &CancellationToken,
    ) -> Result<DeviceInstance> {
        let device = match self.registry.resolve(&entry.definition, &entry.object)? {
            ResolvedDriver::Virtual => DeviceInstance::new_virtual(
                name,
                self.binder.open_virtual(&entry.address),
                Arc::clone(&self.registry),
                entry.kwargs.clone(),
            ),
            ResolvedDriver::Physical(factory) => {
                let mut channel = self.binder.open(&entry.address, &entry.options).await?;
                let idn = if entry.options.identify {
                    match channel.query("*IDN?").await {
                        Ok(response) => Some(response.trim().to_string()),
                        Err(e) => {
                            if let Err(close_err) = channel.close().await {
                                tracing::warn!(device = %name, error = %close_err, "failed to close channel");
                            }
                            return Err(RigError::channel_open(
                                &entry.address,
                                format!("identification query failed: {}", e),
                            ));
                        }
                    }
                } else {
                    None
                };
                DeviceInstance::physical(name, &entry.object, factory, channel, &entry.kwargs, idn)
                    .await?
            }
        };

        if let Err(error) = sequencer::run(&device, &entry.init, cancel).await {
            if let Err(close_err) = device.close().await {
                tracing::warn!(device = %name, error = %close_err, "failed to close channel");
            }
            return Err(error);
        }
        Ok(device)
    }
}

fn aggregate(attempted: usize, failures: Vec<EntryFailure>) -> Option<LoadError> {
    if failures.is_empty() {
        None
    } else {
        Some(LoadError {
            attempted,
            failures,
        })
    }
}
