//! Message-based transport abstraction.
//!
//! [`MessageTransport`] is the seam between instrument drivers and the physical
//! channel (TCP socket, serial port, VISA session, or a test double). Drivers
//! only ever speak ASCII commands through it.
//!
//! # Contract
//!
//! - A transport is owned by exactly one driver.
//! - `query` holds the channel for the whole write+read exchange, so at most
//!   one query is in flight at any time. There is no pipelining.
//! - Timeouts surface as [`TransportError::Timeout`] so callers can tell a slow
//!   instrument from a broken channel.
//! - After `close`, every operation fails with [`TransportError::Closed`].

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Async request/response channel to one message-based instrument.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Resource address the channel was opened with.
    fn resource(&self) -> &str;

    /// Send a command without reading a response.
    async fn write(&self, command: &str) -> TransportResult<()>;

    /// Send a command and read one terminated response (trimmed).
    async fn query(&self, command: &str) -> TransportResult<String>;

    /// Read one terminated response without sending anything.
    async fn read(&self) -> TransportResult<String>;

    /// Query and parse a comma-separated list of floats.
    async fn query_list(&self, command: &str) -> TransportResult<Vec<f64>> {
        let response = self.query(command).await?;
        parse_float_list(command, &response)
    }

    /// Close the channel. Closing twice is not an error.
    async fn close(&self) -> TransportResult<()>;
}

#[async_trait]
impl<T: MessageTransport + ?Sized> MessageTransport for Box<T> {
    fn resource(&self) -> &str {
        (**self).resource()
    }

    async fn write(&self, command: &str) -> TransportResult<()> {
        (**self).write(command).await
    }

    async fn query(&self, command: &str) -> TransportResult<String> {
        (**self).query(command).await
    }

    async fn read(&self) -> TransportResult<String> {
        (**self).read().await
    }

    async fn query_list(&self, command: &str) -> TransportResult<Vec<f64>> {
        (**self).query_list(command).await
    }

    async fn close(&self) -> TransportResult<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: MessageTransport + ?Sized> MessageTransport for Arc<T> {
    fn resource(&self) -> &str {
        (**self).resource()
    }

    async fn write(&self, command: &str) -> TransportResult<()> {
        (**self).write(command).await
    }

    async fn query(&self, command: &str) -> TransportResult<String> {
        (**self).query(command).await
    }

    async fn read(&self) -> TransportResult<String> {
        (**self).read().await
    }

    async fn query_list(&self, command: &str) -> TransportResult<Vec<f64>> {
        (**self).query_list(command).await
    }

    async fn close(&self) -> TransportResult<()> {
        (**self).close().await
    }
}

/// Type-erased transport, as handed out by transport constructors.
pub type DynTransport = Box<dyn MessageTransport>;

// =============================================================================
// Response Parsing
// =============================================================================

/// Parse a comma-separated list of floats such as trace data.
///
/// Whitespace around fields is ignored. An empty response yields an empty list.
pub fn parse_float_list(command: &str, response: &str) -> TransportResult<Vec<f64>> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|e| {
                TransportError::malformed(command, response, format!("field '{}': {}", field, e))
            })
        })
        .collect()
}

/// Parse a floating-point response.
pub fn parse_f64(command: &str, response: &str) -> TransportResult<f64> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|e| TransportError::malformed(command, response, e.to_string()))
}

/// Parse an integer response, tolerating a trailing `;`-separated tail.
pub fn parse_i64(command: &str, response: &str) -> TransportResult<i64> {
    let first = response.split(';').next().unwrap_or_default().trim();
    first
        .parse::<i64>()
        .map_err(|e| TransportError::malformed(command, response, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_list_parses_trace_data() {
        let values = parse_float_list(":TRAC:DATA:Y? TRA", " -60.1, -59.5 ,-3.2E+01\n").unwrap();
        assert_eq!(values, vec![-60.1, -59.5, -32.0]);
    }

    #[test]
    fn float_list_empty_response_is_empty() {
        assert!(parse_float_list("X?", "  ").unwrap().is_empty());
    }

    #[test]
    fn float_list_rejects_bad_field() {
        let err = parse_float_list("X?", "1.0,abc").unwrap_err();
        match err {
            TransportError::MalformedResponse { command, reason, .. } => {
                assert_eq!(command, "X?");
                assert!(reason.contains("abc"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn integer_takes_first_field() {
        assert_eq!(parse_i64("*OPC?", "1;0").unwrap(), 1);
        assert_eq!(parse_i64(":INIT:SMOD?", " 3\r\n").unwrap(), 3);
        assert!(parse_i64("*OPC?", "").is_err());
    }

    #[test]
    fn float_parses_scientific() {
        assert_eq!(parse_f64(":SENS:WAV:STAR?", "1.5000E-06").unwrap(), 1.5e-6);
    }
}
