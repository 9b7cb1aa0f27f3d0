//! Transport settings shared by every channel kind.

use hwc_core::error::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout, terminators and serial line speed.
///
/// Deserializes from a partial table; missing keys take the defaults below.
///
/// ```toml
/// timeout_ms = 5000
/// write_terminator = "\r\n"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Per-operation read/write timeout in milliseconds.
    pub timeout_ms: u64,
    /// Appended to every command written.
    pub write_terminator: String,
    /// Ends every response read. Must be ASCII.
    pub read_terminator: char,
    /// Serial baud rate (ignored by sockets and VISA).
    pub baud_rate: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            write_terminator: "\n".to_string(),
            read_terminator: '\n',
            baud_rate: 9600,
        }
    }
}

impl TransportOptions {
    /// Options with a different timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Per-operation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The read terminator as a single byte.
    pub fn read_terminator_byte(&self) -> TransportResult<u8> {
        u8::try_from(self.read_terminator)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                TransportError::Unsupported(format!(
                    "non-ASCII read terminator {:?}",
                    self.read_terminator
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = TransportOptions::default();
        assert_eq!(opts.timeout(), Duration::from_secs(2));
        assert_eq!(opts.write_terminator, "\n");
        assert_eq!(opts.read_terminator_byte().unwrap(), b'\n');
        assert_eq!(opts.baud_rate, 9600);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let opts: TransportOptions = toml::from_str("timeout_ms = 500\nread_terminator = \"\\r\"").unwrap();
        assert_eq!(opts.timeout_ms, 500);
        assert_eq!(opts.read_terminator_byte().unwrap(), b'\r');
        assert_eq!(opts.write_terminator, "\n");
    }

    #[test]
    fn non_ascii_terminator_is_rejected() {
        let opts = TransportOptions {
            read_terminator: 'é',
            ..Default::default()
        };
        assert!(opts.read_terminator_byte().is_err());
    }
}
