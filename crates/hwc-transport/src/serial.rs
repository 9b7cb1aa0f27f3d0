//! Serial port transport.
//!
//! Ports are opened inside `spawn_blocking`, since opening (and the
//! termios/DCB setup behind it) can block for a noticeable time on USB
//! adapters.
//!
//! # Example
//!
//! ```rust,ignore
//! use hwc_transport::serial::open_serial;
//!
//! let osa = open_serial("/dev/ttyUSB0", &TransportOptions::default()).await?;
//! let idn = osa.query("*IDN?").await?;
//! ```

use hwc_core::error::{TransportError, TransportResult};
use tokio::task::spawn_blocking;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::info;

use crate::options::TransportOptions;
use crate::stream::StreamTransport;

/// Serial transport type.
pub type SerialTransport = StreamTransport<SerialStream>;

/// Line settings for [`open_serial_port`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// RTS/CTS hardware handshake.
    pub hardware_flow_control: bool,
}

impl SerialSettings {
    /// 8N1 without flow control.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            hardware_flow_control: false,
        }
    }

    /// Enable RTS/CTS.
    pub fn with_hardware_flow_control(mut self) -> Self {
        self.hardware_flow_control = true;
        self
    }
}

/// Open a raw serial stream (8N1).
///
/// # Errors
/// [`TransportError::Io`] if the port does not exist or is busy.
pub async fn open_serial_port(path: &str, settings: SerialSettings) -> TransportResult<SerialStream> {
    let path_owned = path.to_string();

    let stream = spawn_blocking(move || {
        let flow = if settings.hardware_flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        tokio_serial::new(&path_owned, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow)
            .open_native_async()
    })
    .await
    .map_err(|e| TransportError::Io(std::io::Error::other(e)))?
    .map_err(|e| TransportError::Io(std::io::Error::from(e)))?;

    info!(path, baud = settings.baud_rate, "serial port opened");
    Ok(stream)
}

/// Open a line-oriented serial transport using the options' baud rate.
pub async fn open_serial(path: &str, options: &TransportOptions) -> TransportResult<SerialTransport> {
    let stream = open_serial_port(path, SerialSettings::new(options.baud_rate)).await?;
    StreamTransport::new(format!("ASRL{}::INSTR", path), stream, options)
}
