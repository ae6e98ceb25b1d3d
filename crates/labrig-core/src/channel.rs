//! Communication channels.
//!
//! A [`Channel`] is the only thing a driver talks to. Physical transports
//! (TCP sockets, serial ports) live in `labrig-hardware`; this module holds the
//! trait plus the two backends that never touch hardware:
//!
//! - [`NullChannel`]: accepts everything, answers every read with an empty
//!   string. Bound to virtual devices before they mimic a driver.
//! - [`RecordingChannel`]: logs every write and answers queries from what was
//!   written earlier. Bound to virtual devices after `mimic`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, RigError};

/// Response a recording channel gives to a query nobody scripted or set.
pub const DEFAULT_RESPONSE: &str = "0";

/// Line-oriented, message-based link to one instrument.
///
/// Exclusively owned by a single device instance.
#[async_trait]
pub trait Channel: Send {
    /// Address this channel was opened for.
    fn address(&self) -> &str;

    /// Send one message (terminator added by the transport).
    async fn write(&mut self, message: &str) -> Result<()>;

    /// Read one response (terminator stripped).
    async fn read(&mut self) -> Result<String>;

    /// Write `message`, then read its response.
    async fn query(&mut self, message: &str) -> Result<String> {
        self.write(message).await?;
        self.read().await
    }

    /// Discard pending input and output.
    async fn clear(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying resource. Further I/O fails.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Null Channel
// =============================================================================

/// Channel that performs no I/O at all.
#[derive(Debug, Clone)]
pub struct NullChannel {
    address: String,
}

impl NullChannel {
    /// Null channel reporting `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Channel for NullChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, message: &str) -> Result<()> {
        tracing::trace!(address = %self.address, message, "null channel discarded write");
        Ok(())
    }

    async fn read(&mut self) -> Result<String> {
        Ok(String::new())
    }
}

// =============================================================================
// Recording Channel
// =============================================================================

/// How a [`RecordingChannel`] answers queries that were not scripted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Discipline {
    /// Answer `HEADER?` with the argument last written as `HEADER value`,
    /// or [`DEFAULT_RESPONSE`] if that header was never written.
    #[default]
    Echo,
    /// Answer every unscripted query with the same text.
    Fixed(String),
}

#[derive(Debug, Default)]
struct RecorderState {
    writes: Vec<String>,
    registers: HashMap<String, String>,
    scripted: HashMap<String, String>,
    pending: Option<String>,
}

/// Shared handle onto a recording channel's log and responses.
///
/// Cloning the handle does not clone the state; tests and the virtual device
/// shim keep one while the channel itself is owned by the device.
#[derive(Debug, Clone, Default)]
pub struct ChannelRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl ChannelRecorder {
    /// Every message written so far, in order (queries included).
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    /// Most recent write.
    pub fn last_write(&self) -> Option<String> {
        self.state.lock().writes.last().cloned()
    }

    /// Always answer `query` with `response`.
    pub fn set_response(&self, query: impl AsRef<str>, response: impl Into<String>) {
        self.state
            .lock()
            .scripted
            .insert(normalize(query.as_ref()), response.into());
    }

    /// Forget the write log (registers and scripted responses are kept).
    pub fn clear_log(&self) {
        self.state.lock().writes.clear();
    }
}

fn normalize(message: &str) -> String {
    message.trim().to_ascii_uppercase()
}

/// Split `SOUR:VOLT 12` into (`SOUR:VOLT`, `12`).
fn split_setting(message: &str) -> Option<(String, String)> {
    let (header, value) = message.trim().split_once(char::is_whitespace)?;
    Some((normalize(header), value.trim().to_string()))
}

/// Channel that records writes and answers queries without any hardware.
#[derive(Debug)]
pub struct RecordingChannel {
    address: String,
    discipline: Discipline,
    recorder: ChannelRecorder,
    closed: bool,
}

impl RecordingChannel {
    /// Echoing recorder for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_discipline(address, Discipline::Echo)
    }

    /// Recorder using `discipline` for unscripted queries.
    pub fn with_discipline(address: impl Into<String>, discipline: Discipline) -> Self {
        Self {
            address: address.into(),
            discipline,
            recorder: ChannelRecorder::default(),
            closed: false,
        }
    }

    /// Handle for inspecting writes and scripting responses.
    pub fn recorder(&self) -> ChannelRecorder {
        self.recorder.clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RigError::communication(&self.address, "channel is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, message: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.recorder.state.lock();
        state.writes.push(message.to_string());

        let key = normalize(message);
        if let Some(header) = key.strip_suffix('?') {
            let response = match state.scripted.get(&key) {
                Some(scripted) => scripted.clone(),
                None => match &self.discipline {
                    Discipline::Echo => state
                        .registers
                        .get(header.trim())
                        .cloned()
                        .unwrap_or_else(|| DEFAULT_RESPONSE.to_string()),
                    Discipline::Fixed(text) => text.clone(),
                },
            };
            state.pending = Some(response);
        } else if let Some((header, value)) = split_setting(message) {
            state.registers.insert(header, value);
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<String> {
        self.ensure_open()?;
        let pending = self.recorder.state.lock().pending.take();
        Ok(pending.unwrap_or_else(|| match &self.discipline {
            Discipline::Echo => DEFAULT_RESPONSE.to_string(),
            Discipline::Fixed(text) => text.clone(),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
