//! Instrument configuration documents.
//!
//! A document is an ordered map from logical name to [`ConfigEntry`]. Key
//! order is document order and is what the resource manager iterates, so the
//! map is an `IndexMap` and deserialization goes through a visitor that also
//! refuses duplicated names (JSON parsers otherwise keep the last one
//! silently).

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use labrig_core::Arguments;
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::transport::ChannelOptions;

/// Error types for document loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid JSON or a JSON document that does not match the schema.
    #[error("failed to parse JSON config {}: {source}", path.display())]
    Json {
        /// File that was parsed.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid TOML or a TOML document that does not match the schema.
    #[error("failed to parse TOML config {}: {source}", path.display())]
    Toml {
        /// File that was parsed.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },

    /// Neither `.json` nor `.toml`.
    #[error("unsupported config format for {} (expected .json or .toml)", path.display())]
    UnsupportedFormat {
        /// Offending file.
        path: PathBuf,
    },
}

// =============================================================================
// Init Steps
// =============================================================================

/// One `[operation, {arguments}]` pair of an `init` list.
#[derive(Debug, Clone, PartialEq)]
pub struct InitStep {
    /// Operation name.
    pub operation: String,
    /// Keyword arguments in document order.
    pub arguments: Arguments,
}

impl InitStep {
    /// Step calling `operation` with `arguments`.
    pub fn new(operation: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            operation: operation.into(),
            arguments,
        }
    }
}

impl Serialize for InitStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.operation)?;
        tuple.serialize_element(&self.arguments)?;
        tuple.end()
    }
}

struct InitStepVisitor;

impl<'de> Visitor<'de> for InitStepVisitor {
    type Value = InitStep;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an [operation, {arguments}] pair or a bare [operation]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<InitStep, A::Error> {
        let operation: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let arguments: Arguments = seq.next_element()?.unwrap_or_default();
        if seq.next_element::<IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(3, &self));
        }
        Ok(InitStep {
            operation,
            arguments,
        })
    }
}

impl<'de> Deserialize<'de> for InitStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(InitStepVisitor)
    }
}

// =============================================================================
// Entries
// =============================================================================

fn is_default_options(options: &ChannelOptions) -> bool {
    options == &ChannelOptions::default()
}

/// One instrument of a configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigEntry {
    /// Driver object name (`Keithley_2231A`, `VirtualDevice`).
    pub object: String,
    /// Dotted definition path (`labrig.source`, `core`).
    pub definition: String,
    /// Resource string.
    pub address: String,
    /// Initialization calls, applied in order.
    #[serde(default)]
    pub init: Vec<InitStep>,
    /// Constructor arguments.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub kwargs: Arguments,
    /// Connection options.
    #[serde(default, skip_serializing_if = "is_default_options")]
    pub options: ChannelOptions,
}

impl ConfigEntry {
    /// Entry with no init steps, kwargs or options.
    pub fn new(
        object: impl Into<String>,
        definition: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            definition: definition.into(),
            address: address.into(),
            init: Vec::new(),
            kwargs: Arguments::new(),
            options: ChannelOptions::default(),
        }
    }

    /// Builder-style: append an init step.
    pub fn step(mut self, operation: impl Into<String>, arguments: Arguments) -> Self {
        self.init.push(InitStep::new(operation, arguments));
        self
    }

    /// Builder-style: set constructor arguments.
    pub fn with_kwargs(mut self, kwargs: Arguments) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Builder-style: set connection options.
    pub fn with_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }
}

// =============================================================================
// Documents
// =============================================================================

/// Ordered, duplicate-free map of logical name to entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    entries: IndexMap<String, ConfigEntry>,
}

impl ConfigDocument {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` under `name`. Returns `false` (and leaves the document
    /// untouched) if the name is taken.
    pub fn insert(&mut self, name: impl Into<String>, entry: ConfigEntry) -> bool {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return false;
        }
        self.entries.insert(name, entry);
        true
    }

    /// Builder-style [`insert`](Self::insert); a taken name is ignored.
    pub fn with(mut self, name: impl Into<String>, entry: ConfigEntry) -> Self {
        self.insert(name, entry);
        self
    }

    /// Entry named `name`.
    pub fn get(&self, name: &str) -> Option<&ConfigEntry> {
        self.entries.get(name)
    }

    /// Entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Logical names in document order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` for a document without entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse a TOML document (one table per entry).
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a `.json` or `.toml` file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigLoadError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let is_json = match extension.as_deref() {
            Some("json") => true,
            Some("toml") => false,
            _ => {
                return Err(ConfigLoadError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document = if is_json {
            Self::from_json_str(&text).map_err(|source| ConfigLoadError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::from_toml_str(&text).map_err(|source| ConfigLoadError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        };
        tracing::debug!(path = %path.display(), entries = document.len(), "loaded config document");
        Ok(document)
    }

    /// Pretty JSON rendering (used by `labrig draft`).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl<'a> IntoIterator for &'a ConfigDocument {
    type Item = (&'a String, &'a ConfigEntry);
    type IntoIter = indexmap::map::Iter<'a, String, ConfigEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Serialize for ConfigDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = ConfigDocument;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of logical names to instrument entries")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ConfigDocument, A::Error> {
        let mut entries = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(name) = access.next_key::<String>()? {
            if entries.contains_key(&name) {
                return Err(de::Error::custom(format_args!(
                    "duplicate logical name '{}'",
                    name
                )));
            }
            let entry: ConfigEntry = access.next_value()?;
            entries.insert(name, entry);
        }
        Ok(ConfigDocument { entries })
    }
}

impl<'de> Deserialize<'de> for ConfigDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DocumentVisitor)
    }
}
