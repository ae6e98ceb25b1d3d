//! Equipment finder.
//!
//! Opens a list of addresses, asks each instrument for its `*IDN?` string
//! and matches it against the model tokens of the registered drivers. The
//! result can be turned into a draft configuration document with safe
//! default init sequences, which is what `labrig draft` prints.

use std::collections::HashMap;
use std::sync::LazyLock;

use labrig_core::{arguments, Arguments, DriverCategory, Result, RigError};
use regex::Regex;

use crate::config::{ConfigDocument, ConfigEntry};
use crate::registry::{DriverDescriptor, DriverRegistry};
use crate::transport::{ChannelOptions, TransportBinder};

/// Outcome of probing one address.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    /// The instrument answered `*IDN?`.
    Found {
        /// Probed address.
        address: String,
        /// Raw identification string.
        idn: String,
        /// Registered drivers whose model token appears in `idn`.
        matches: Vec<DriverDescriptor>,
    },
    /// The address could not be opened or did not answer.
    Unreachable {
        /// Probed address.
        address: String,
        /// Why.
        error: RigError,
    },
}

impl Identification {
    /// Probed address.
    pub fn address(&self) -> &str {
        match self {
            Identification::Found { address, .. } | Identification::Unreachable { address, .. } => {
                address
            }
        }
    }
}

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[_\s\-,.:;()"]"#).expect("Invalid punctuation regex"));

/// Lowercase `text` and strip whitespace and punctuation.
///
/// `"KEITHLEY INSTRUMENTS,2231A-30-3"` becomes `"keithleyinstruments2231a303"`.
pub fn normalize_idn(text: &str) -> String {
    PUNCTUATION
        .replace_all(&text.to_lowercase(), "")
        .into_owned()
}

/// Registered drivers whose model token appears in `idn`.
pub fn match_idn(registry: &DriverRegistry, idn: &str) -> Vec<DriverDescriptor> {
    let normalized = normalize_idn(idn);
    registry
        .factories()
        .into_iter()
        .filter(|(_, factory)| {
            factory
                .model_token()
                .map(normalize_idn)
                .is_some_and(|token| !token.is_empty() && normalized.contains(&token))
        })
        .map(|(descriptor, _)| descriptor)
        .collect()
}

async fn query_idn(binder: &TransportBinder, address: &str) -> Result<String> {
    let options = ChannelOptions {
        identify: false,
        ..ChannelOptions::default()
    };
    let mut channel = binder.open(address, &options).await?;
    let response = channel.query("*IDN?").await;
    if let Err(e) = channel.close().await {
        tracing::debug!(address, error = %e, "close after identification failed");
    }
    Ok(response?.trim().to_string())
}

/// Probe every address in order.
pub async fn identify(
    binder: &TransportBinder,
    registry: &DriverRegistry,
    addresses: &[String],
) -> Vec<Identification> {
    let mut results = Vec::with_capacity(addresses.len());
    for address in addresses {
        let result = match query_idn(binder, address).await {
            Ok(idn) => {
                let matches = match_idn(registry, &idn);
                tracing::info!(address = %address, idn = %idn, matches = matches.len(), "identified");
                Identification::Found {
                    address: address.clone(),
                    idn,
                    matches,
                }
            }
            Err(error) => {
                tracing::warn!(address = %address, error = %error, "identification failed");
                Identification::Unreachable {
                    address: address.clone(),
                    error,
                }
            }
        };
        results.push(result);
    }
    results
}

/// Init steps that leave an instrument of `category` in a safe state.
fn default_steps(category: DriverCategory) -> Vec<(&'static str, Arguments)> {
    match category {
        DriverCategory::Source => vec![
            ("set_voltage", arguments! { "voltage" => 0.0 }),
            ("off", arguments! {}),
            ("set_current", arguments! { "current" => 0.0 }),
        ],
        DriverCategory::Sink => vec![
            ("off", arguments! {}),
            ("set_current", arguments! { "current" => 0.0 }),
        ],
        DriverCategory::FunctionGenerator => vec![
            ("set_voltage_amplitude", arguments! { "amplitude" => 0.0 }),
            ("set_output_state", arguments! { "state" => false }),
        ],
        DriverCategory::Virtual | DriverCategory::Other => Vec::new(),
    }
}

/// Draft a configuration document for every identified instrument.
///
/// Entries are named after the category of the first matching driver
/// (`source`, `source_2`, `sink`, ...). Only default steps the driver
/// actually declares are kept. Multi-channel supplies get `channel = 1`.
pub fn draft_document(registry: &DriverRegistry, identified: &[Identification]) -> ConfigDocument {
    let mut document = ConfigDocument::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for identification in identified {
        let Identification::Found {
            address, matches, ..
        } = identification
        else {
            continue;
        };
        let Some(descriptor) = matches.first() else {
            continue;
        };
        let Ok(factory) = registry.resolve_physical(&descriptor.definition, &descriptor.object)
        else {
            continue;
        };

        let category = descriptor.category.to_string();
        let count = counts.entry(category.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            category
        } else {
            format!("{}_{}", category, count)
        };

        let mut entry = ConfigEntry::new(&descriptor.object, &descriptor.definition, address);
        if factory.constructor().iter().any(|p| p.name == "channel") {
            entry = entry.with_kwargs(arguments! { "channel" => 1 });
        }
        for (operation, args) in default_steps(descriptor.category) {
            if factory.operations().contains(operation) {
                entry = entry.step(operation, args);
            }
        }
        document.insert(name, entry);
    }
    document
}
