//! Retry wrapper for flaky links.

use std::time::Duration;

use async_trait::async_trait;
use labrig_core::{Channel, ErrorKind, Result, RigError};

/// Pause between attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Re-issues failed I/O up to `max_retries` extra times.
///
/// Only communication failures are retried. A query is retried as a whole
/// (write and read) so a lost response does not leave a stale request queued.
pub struct RetryChannel {
    inner: Box<dyn Channel>,
    max_retries: u32,
}

impl RetryChannel {
    /// Wrap `inner`.
    pub fn new(inner: Box<dyn Channel>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    fn exhausted(&self, attempts: u32, last: RigError) -> RigError {
        RigError::communication(
            self.inner.address(),
            format!("gave up after {} attempt(s): {}", attempts, last),
        )
    }
}

macro_rules! with_retry {
    ($self:ident, $op:literal, $call:expr) => {{
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match $call {
                Ok(value) => break Ok(value),
                Err(e) if e.kind() == ErrorKind::Communication && attempt <= $self.max_retries => {
                    tracing::warn!(
                        address = %$self.inner.address(),
                        operation = $op,
                        attempt,
                        error = %e,
                        "retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(e) if e.kind() == ErrorKind::Communication => break Err($self.exhausted(attempt, e)),
                Err(e) => break Err(e),
            }
        }
    }};
}

#[async_trait]
impl Channel for RetryChannel {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn write(&mut self, message: &str) -> Result<()> {
        with_retry!(self, "write", self.inner.write(message).await)
    }

    async fn read(&mut self) -> Result<String> {
        with_retry!(self, "read", self.inner.read().await)
    }

    async fn query(&mut self, message: &str) -> Result<String> {
        with_retry!(self, "query", self.inner.query(message).await)
    }

    async fn clear(&mut self) -> Result<()> {
        self.inner.clear().await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` writes.
    struct Flaky {
        failures: u32,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Channel for Flaky {
        fn address(&self) -> &str {
            "GPIB0::3::INSTR"
        }

        async fn write(&mut self, _message: &str) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(RigError::communication("GPIB0::3::INSTR", "bus timeout"))
            } else {
                Ok(())
            }
        }

        async fn read(&mut self) -> Result<String> {
            Ok("1".into())
        }
    }

    #[tokio::test]
    async fn test_recovers_within_retry_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut channel = RetryChannel::new(
            Box::new(Flaky {
                failures: 2,
                attempts: attempts.clone(),
            }),
            2,
        );
        assert_eq!(channel.query("OUTP?").await.unwrap(), "1");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut channel = RetryChannel::new(
            Box::new(Flaky {
                failures: 10,
                attempts: attempts.clone(),
            }),
            1,
        );
        let err = channel.write("OUTP 1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.to_string().contains("gave up after 2 attempt(s)"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
