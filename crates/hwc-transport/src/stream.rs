//! Line-oriented transport over any async byte stream.
//!
//! [`StreamTransport`] works over any `AsyncRead + AsyncWrite` type:
//! - `tokio::net::TcpStream` (raw socket instruments)
//! - `tokio_serial::SerialStream` (RS-232 / USB serial)
//! - `tokio::io::DuplexStream` (tests)
//!
//! The stream sits behind one `tokio::sync::Mutex`, held from the moment a
//! command is written until its response has been read.

use async_trait::async_trait;
use futures::FutureExt;
use hwc_core::error::{TransportError, TransportResult};
use hwc_core::transport::MessageTransport;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use crate::options::TransportOptions;

/// Message transport over a byte stream.
pub struct StreamTransport<S> {
    resource: String,
    stream: Mutex<Option<BufReader<S>>>,
    write_terminator: String,
    read_terminator: u8,
    timeout: Duration,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open stream.
    ///
    /// # Errors
    /// [`TransportError::Unsupported`] for a non-ASCII read terminator.
    pub fn new(
        resource: impl Into<String>,
        stream: S,
        options: &TransportOptions,
    ) -> TransportResult<Self> {
        Ok(Self {
            resource: resource.into(),
            stream: Mutex::new(Some(BufReader::new(stream))),
            write_terminator: options.write_terminator.clone(),
            read_terminator: options.read_terminator_byte()?,
            timeout: options.timeout(),
        })
    }

    /// Per-operation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, stream: &mut BufReader<S>, command: &str) -> TransportResult<()> {
        let mut frame = String::with_capacity(command.len() + self.write_terminator.len());
        frame.push_str(command);
        frame.push_str(&self.write_terminator);

        let writer = stream.get_mut();
        let io = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        };
        tokio::time::timeout(self.timeout, io)
            .await
            .map_err(|_| TransportError::timeout(command, self.timeout))??;

        debug!(resource = %self.resource, command, "sent");
        Ok(())
    }

    async fn receive(&self, stream: &mut BufReader<S>, operation: &str) -> TransportResult<String> {
        let mut line = Vec::new();
        let n = tokio::time::timeout(
            self.timeout,
            stream.read_until(self.read_terminator, &mut line),
        )
        .await
        .map_err(|_| TransportError::timeout(operation, self.timeout))??;

        if n == 0 {
            return Err(TransportError::Closed);
        }

        let response = String::from_utf8_lossy(&line).trim().to_string();
        debug!(resource = %self.resource, operation, response = %response, "received");
        Ok(response)
    }
}

/// Discard whatever input is already buffered without waiting for more.
///
/// A reply that arrived after its query timed out would otherwise be read as
/// the answer to the next query.
async fn discard_stale_input<S>(stream: &mut BufReader<S>) -> usize
where
    S: AsyncRead + Unpin,
{
    let mut discarded = 0;
    loop {
        let available = match stream.fill_buf().now_or_never() {
            Some(Ok(buf)) => buf.len(),
            _ => 0,
        };
        if available == 0 {
            break;
        }
        stream.consume(available);
        discarded += available;
    }
    discarded
}

#[async_trait]
impl<S> MessageTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn write(&self, command: &str) -> TransportResult<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::Closed)?;
        self.send(stream, command).await
    }

    async fn query(&self, command: &str) -> TransportResult<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::Closed)?;

        let stale = discard_stale_input(stream).await;
        if stale > 0 {
            debug!(resource = %self.resource, bytes = stale, "discarded stale input");
        }

        self.send(stream, command).await?;
        self.receive(stream, command).await
    }

    async fn read(&self) -> TransportResult<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::Closed)?;
        self.receive(stream, "read").await
    }

    async fn close(&self) -> TransportResult<()> {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            // The peer may already be gone; the channel is closed either way.
            let _ = stream.get_mut().shutdown().await;
            debug!(resource = %self.resource, "closed");
        }
        Ok(())
    }
}
