//! Concrete message transports for hwcomms.
//!
//! [`open`] picks the channel from a VISA-style resource address:
//!
//! ```rust,ignore
//! use hwc_transport::{open, TransportOptions};
//!
//! let osa = open("TCPIP0::192.168.1.20::10001::SOCKET", &TransportOptions::default()).await?;
//! println!("{}", osa.query("*IDN?").await?);
//! ```
//!
//! # Feature Flags
//!
//! - `serial` (default): `ASRL...` addresses via tokio-serial
//! - `instrument_visa`: GPIB/USBTMC/VXI-11 through the system VISA library

pub mod options;
pub mod resource;
#[cfg(feature = "serial")]
pub mod serial;
pub mod stream;
pub mod tcp;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use options::TransportOptions;
pub use resource::ResourceAddress;
pub use stream::StreamTransport;
pub use tcp::connect_socket;

use hwc_core::error::{TransportError, TransportResult};
use hwc_core::transport::DynTransport;

/// Open a transport for `resource`.
///
/// # Errors
/// - [`TransportError::InvalidResource`] for an empty or malformed address
/// - [`TransportError::Unsupported`] when the channel kind is not compiled in
/// - connection failures from the concrete transport
pub async fn open(resource: &str, options: &TransportOptions) -> TransportResult<DynTransport> {
    match resource.parse::<ResourceAddress>()? {
        ResourceAddress::Socket { host, port } => {
            Ok(Box::new(connect_socket(&host, port, options).await?))
        }
        ResourceAddress::Serial { path } => open_serial_channel(&path, options).await,
        ResourceAddress::Visa(raw) => open_visa_channel(&raw, options).await,
    }
}

#[cfg(feature = "serial")]
async fn open_serial_channel(path: &str, options: &TransportOptions) -> TransportResult<DynTransport> {
    Ok(Box::new(serial::open_serial(path, options).await?))
}

#[cfg(not(feature = "serial"))]
async fn open_serial_channel(path: &str, _options: &TransportOptions) -> TransportResult<DynTransport> {
    Err(TransportError::Unsupported(format!(
        "serial port {} (built without the `serial` feature)",
        path
    )))
}

#[cfg(feature = "instrument_visa")]
async fn open_visa_channel(resource: &str, options: &TransportOptions) -> TransportResult<DynTransport> {
    Ok(Box::new(visa::open_visa(resource, options).await?))
}

#[cfg(not(feature = "instrument_visa"))]
async fn open_visa_channel(resource: &str, _options: &TransportOptions) -> TransportResult<DynTransport> {
    Err(TransportError::Unsupported(format!(
        "VISA resource {} (built without the `instrument_visa` feature)",
        resource
    )))
}
