//! Newline-terminated message channel over any async byte stream.
//!
//! Both the TCP and the serial transport hand their connected stream to
//! [`StreamChannel`]; tests drive it with `tokio::io::duplex`.

use std::time::Duration;

use async_trait::async_trait;
use labrig_core::{Channel, Result, RigError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

/// Trait alias for the streams a [`StreamChannel`] can wrap.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIo for T {}

/// Line-oriented channel: writes append `\n`, reads return one line with the
/// `\r\n`/`\n` terminator stripped.
pub struct StreamChannel<S: StreamIo> {
    address: String,
    stream: Option<BufStream<S>>,
    timeout: Duration,
}

impl<S: StreamIo> StreamChannel<S> {
    /// Wrap a connected stream.
    pub fn new(address: impl Into<String>, stream: S, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            stream: Some(BufStream::new(stream)),
            timeout,
        }
    }

    fn stream(&mut self) -> Result<&mut BufStream<S>> {
        let address = &self.address;
        self.stream
            .as_mut()
            .ok_or_else(|| RigError::communication(address, "channel is closed"))
    }
}

fn timed_out(address: &str, what: &str, timeout: Duration) -> RigError {
    RigError::communication(
        address,
        format!("{} timed out after {} ms", what, timeout.as_millis()),
    )
}

#[async_trait]
impl<S: StreamIo> Channel for StreamChannel<S> {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, message: &str) -> Result<()> {
        tracing::debug!(address = %self.address, message, "write");
        let timeout = self.timeout;
        let address = self.address.clone();
        let stream = self.stream()?;
        let io = async {
            stream.write_all(message.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        };
        let outcome = tokio::time::timeout(timeout, io).await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RigError::communication(address, e.to_string())),
            Err(_) => Err(timed_out(&address, "write", timeout)),
        }
    }

    async fn read(&mut self) -> Result<String> {
        let timeout = self.timeout;
        let address = self.address.clone();
        let stream = self.stream()?;
        let mut line = String::new();
        let outcome = tokio::time::timeout(timeout, stream.read_line(&mut line)).await;
        match outcome {
            Ok(Ok(0)) => Err(RigError::communication(
                address,
                "connection closed by instrument",
            )),
            Ok(Ok(_)) => {
                let response = line.trim_end_matches(['\r', '\n']).to_string();
                tracing::debug!(address = %address, response = %response, "read");
                Ok(response)
            }
            Ok(Err(e)) => Err(RigError::communication(address, e.to_string())),
            Err(_) => Err(timed_out(&address, "read", timeout)),
        }
    }

    /// Discard whatever the instrument already sent.
    async fn clear(&mut self) -> Result<()> {
        let stream = self.stream()?;
        let mut discard = [0u8; 256];
        let mut total = 0usize;
        loop {
            match tokio::time::timeout(Duration::from_millis(50), stream.read(&mut discard)).await {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }
        tracing::debug!(address = %self.address, discarded = total, "cleared input buffer");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| RigError::communication(&self.address, e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrig_core::ErrorKind;
    use tokio::io::{duplex, BufReader};

    #[tokio::test]
    async fn test_query_over_duplex() {
        let (client, server) = duplex(256);
        let mut channel =
            StreamChannel::new("TCPIP0::sim::5025::SOCKET", client, Duration::from_secs(1));

        let responder = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            assert_eq!(line, "*IDN?\n");
            server
                .get_mut()
                .write_all(b"KEITHLEY INSTRUMENTS,2231A-30-3,123,1.0\r\n")
                .await
                .unwrap();
            server
        });

        let idn = channel.query("*IDN?").await.unwrap();
        assert_eq!(idn, "KEITHLEY INSTRUMENTS,2231A-30-3,123,1.0");
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (client, _server) = duplex(64);
        let mut channel = StreamChannel::new("sim", client, Duration::from_millis(20));
        let err = channel.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_io() {
        let (client, _server) = duplex(64);
        let mut channel = StreamChannel::new("sim", client, Duration::from_millis(20));
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert_eq!(
            channel.write("*RST").await.unwrap_err().kind(),
            ErrorKind::Communication
        );
    }
}
