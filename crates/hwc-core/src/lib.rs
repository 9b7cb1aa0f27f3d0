//! `hwc-core`
//!
//! Core traits and types for hwcomms instrument bindings.
//!
//! ## Layers
//!
//! - **Transport** ([`transport::MessageTransport`]): ASCII request/response
//!   channel to one instrument. Concrete transports live in `hwc-transport`.
//! - **Completion** ([`completion`]): `*OPC?` polling used to wait for
//!   asynchronous operations such as spectral sweeps.
//! - **Devices** ([`device::Device`], [`capabilities`]): small capability
//!   traits that drivers implement.
//! - **Factories** ([`driver::DriverFactory`]): config-driven construction.
//!
//! ## Key Types
//!
//! - [`TransportError`] / [`DeviceError`]: typed failures, with timeouts
//!   distinguishable from fatal faults
//! - [`Spectrum`]: wavelength/intensity pairs
//! - [`TravelLimits`]: software stage limits

pub mod capabilities;
pub mod completion;
pub mod device;
pub mod driver;
pub mod error;
pub mod transport;

pub use capabilities::{LinearMotor, Spectrometer, Spectrum, SpectrumAnalyzer, TravelLimits};
pub use completion::{wait_until_complete, CompletionWaiter, DEFAULT_POLL_INTERVAL};
pub use device::Device;
pub use error::{DeviceError, DeviceResult, TransportError, TransportResult};
pub use transport::{DynTransport, MessageTransport};
