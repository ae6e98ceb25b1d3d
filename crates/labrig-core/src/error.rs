//! Error types shared by every labrig crate.
//!
//! [`RigError`] is the single error type raised by the registry, the transport
//! binder, device instances and the initialization sequencer. The resource
//! manager never propagates a single entry's `RigError`; it collects them into
//! a [`LoadError`] so a caller always receives every failure of a load at once.
//!
//! ## Error Hierarchy
//!
//! - **Resolution**: `UnknownDriver`, `DuplicateDriver`
//! - **Transport**: `ChannelOpen`, `Communication`, `Protocol`
//! - **Dispatch**: `UnknownOperation`, `InvalidArgument`, `AlreadyMimicking`
//! - **Sequencing**: `Initialization`, `Cancelled`
//!
//! Errors are compared by [`ErrorKind`] rather than by message text, since a
//! virtual stand-in and a real instrument must fail the same way without
//! necessarily producing the same wording.

use thiserror::Error;

// =============================================================================
// Error Kinds
// =============================================================================

/// Fieldless classification of a [`RigError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No driver registered under the requested pair.
    UnknownDriver,
    /// A driver was registered twice under the same pair.
    DuplicateDriver,
    /// The address could not be parsed or the transport refused it.
    ChannelOpen,
    /// The device does not expose the requested operation.
    UnknownOperation,
    /// Missing, extra, mistyped or out-of-range arguments.
    InvalidArgument,
    /// `mimic` was called on an already bound virtual device.
    AlreadyMimicking,
    /// An initialization step failed.
    Initialization,
    /// I/O with an open channel failed.
    Communication,
    /// The instrument answered with something the driver cannot interpret.
    Protocol,
    /// The operation was stopped by cooperative cancellation.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::UnknownDriver => "unknown_driver",
            ErrorKind::DuplicateDriver => "duplicate_driver",
            ErrorKind::ChannelOpen => "channel_open",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::AlreadyMimicking => "already_mimicking",
            ErrorKind::Initialization => "initialization",
            ErrorKind::Communication => "communication",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// RigError
// =============================================================================

/// Convenience alias for results carrying a [`RigError`].
pub type Result<T, E = RigError> = std::result::Result<T, E>;

/// Primary error type for driver resolution, channel I/O and device calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RigError {
    /// No factory is registered for `(definition, object)`.
    ///
    /// Resolution is exact-match on both parts, so a typo in either the
    /// dotted definition path or the object name lands here.
    #[error("no driver registered for object '{object}' in definition '{definition}'")]
    UnknownDriver {
        /// Dotted definition path that was looked up.
        definition: String,
        /// Object name that was looked up.
        object: String,
    },

    /// A factory is already registered for `(definition, object)`.
    #[error("driver '{object}' is already registered in definition '{definition}'")]
    DuplicateDriver {
        /// Dotted definition path of the conflicting registration.
        definition: String,
        /// Object name of the conflicting registration.
        object: String,
    },

    /// The transport binder could not produce a channel for an address.
    ///
    /// Raised for unparseable resource strings, bus kinds without a
    /// registered transport, and connections refused at connect time.
    #[error("failed to open channel to '{address}': {reason}")]
    ChannelOpen {
        /// The resource string as written in the configuration.
        address: String,
        /// Human readable cause.
        reason: String,
    },

    /// The device does not expose `operation` in its current state.
    #[error("unknown operation '{operation}'")]
    UnknownOperation {
        /// Requested operation name.
        operation: String,
    },

    /// An argument was missing, unexpected, of the wrong kind or rejected by
    /// the driver.
    #[error("invalid argument '{argument}' for '{operation}': {reason}")]
    InvalidArgument {
        /// Operation being called.
        operation: String,
        /// Offending argument name.
        argument: String,
        /// What was wrong with it.
        reason: String,
    },

    /// `mimic` was called on a virtual device that is already bound.
    ///
    /// Re-mimicry fails even when `requested` names the same driver as
    /// `current`.
    #[error("virtual device already mimics '{current}', cannot mimic '{requested}'")]
    AlreadyMimicking {
        /// Object name currently mimicked.
        current: String,
        /// Object name requested by the rejected call.
        requested: String,
    },

    /// An initialization step failed; later steps were not run.
    #[error("initialization step {index} ('{operation}') failed: {source}")]
    Initialization {
        /// Zero-based position of the failing step in the `init` list.
        index: usize,
        /// Operation name of the failing step.
        operation: String,
        /// Underlying failure.
        #[source]
        source: Box<RigError>,
    },

    /// I/O on an open channel failed, timed out or hit a closed device.
    #[error("communication with '{address}' failed: {message}")]
    Communication {
        /// Address of the channel.
        address: String,
        /// Cause.
        message: String,
    },

    /// The instrument's response could not be interpreted.
    #[error("unexpected response to '{operation}': {response:?}")]
    Protocol {
        /// Operation that issued the query.
        operation: String,
        /// Raw response text.
        response: String,
    },

    /// Cooperative cancellation stopped the work after `completed` steps.
    #[error("cancelled after {completed} completed step(s)")]
    Cancelled {
        /// Number of initialization steps that finished before cancellation.
        completed: usize,
    },
}

impl RigError {
    /// Classification used for kind-level comparisons.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RigError::UnknownDriver { .. } => ErrorKind::UnknownDriver,
            RigError::DuplicateDriver { .. } => ErrorKind::DuplicateDriver,
            RigError::ChannelOpen { .. } => ErrorKind::ChannelOpen,
            RigError::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            RigError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            RigError::AlreadyMimicking { .. } => ErrorKind::AlreadyMimicking,
            RigError::Initialization { .. } => ErrorKind::Initialization,
            RigError::Communication { .. } => ErrorKind::Communication,
            RigError::Protocol { .. } => ErrorKind::Protocol,
            RigError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Innermost error, looking through `Initialization` wrappers.
    pub fn root_cause(&self) -> &RigError {
        match self {
            RigError::Initialization { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Shorthand for [`RigError::InvalidArgument`].
    pub fn invalid_argument(
        operation: impl Into<String>,
        argument: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        RigError::InvalidArgument {
            operation: operation.into(),
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RigError::Communication`].
    pub fn communication(address: impl Into<String>, message: impl Into<String>) -> Self {
        RigError::Communication {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`RigError::ChannelOpen`].
    pub fn channel_open(address: impl Into<String>, reason: impl Into<String>) -> Self {
        RigError::ChannelOpen {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RigError::Protocol`].
    pub fn protocol(operation: impl Into<String>, response: impl Into<String>) -> Self {
        RigError::Protocol {
            operation: operation.into(),
            response: response.into(),
        }
    }
}

// =============================================================================
// Load Errors
// =============================================================================

/// One configuration entry that did not make it into the resource table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFailure {
    /// Logical name of the entry.
    pub name: String,
    /// Why it failed.
    pub error: RigError,
}

/// Aggregate failure of a configuration load.
///
/// Lists every failed entry in document order. Entries absent from this list
/// were loaded successfully.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct LoadError {
    /// Number of entries the load attempted.
    pub attempted: usize,
    /// Failed entries in document order.
    pub failures: Vec<EntryFailure>,
}

impl LoadError {
    /// Names of every failed entry, in document order.
    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }

    /// Error recorded for `name`, if that entry failed.
    pub fn error_for(&self, name: &str) -> Option<&RigError> {
        self.failures
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.error)
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} configuration entries failed to load",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.name, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_initialization() {
        let inner = RigError::invalid_argument("set_voltage", "voltage", "expected float");
        let err = RigError::Initialization {
            index: 2,
            operation: "set_voltage".into(),
            source: Box::new(inner.clone()),
        };

        assert_eq!(err.kind(), ErrorKind::Initialization);
        assert_eq!(err.root_cause(), &inner);
        assert!(err.to_string().contains("step 2"));
    }

    #[test]
    fn test_load_error_lists_every_failure() {
        let err = LoadError {
            attempted: 3,
            failures: vec![EntryFailure {
                name: "sink".into(),
                error: RigError::channel_open("GPIB0::5::INSTR", "no transport for GPIB"),
            }],
        };

        let text = err.to_string();
        assert!(text.starts_with("1 of 3 configuration entries failed"));
        assert!(text.contains("sink: failed to open channel to 'GPIB0::5::INSTR'"));
        assert_eq!(err.failed_names(), vec!["sink"]);
        assert_eq!(
            err.error_for("sink").map(RigError::kind),
            Some(ErrorKind::ChannelOpen)
        );
        assert!(err.error_for("source").is_none());
    }
}
