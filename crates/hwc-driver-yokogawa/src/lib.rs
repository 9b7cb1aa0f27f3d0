//! Yokogawa optical spectrum analyzer driver for hwcomms.
//!
//! Supports the AQ6370 family (AQ6370C/D, AQ6373, AQ6375) over any
//! [`hwc_core::MessageTransport`]: raw socket, GPIB/USB through VISA, or the
//! in-process [`SimulatedOsa`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use hwc_driver_yokogawa::{YokogawaOsa, Trace};
//!
//! let osa = YokogawaOsa::connect("TCPIP0::10.0.0.5::10001::SOCKET", &options, poll).await?;
//! osa.set_wavelength_span(1540.0, 1560.0).await?;
//! let spectrum = osa.acquire_single_on(Some(Trace::A)).await?;
//! ```

mod osa;
pub mod settings;
mod simulated;

pub use osa::{
    SweepParameters, TraceStatus, YokogawaOsa, YokogawaOsaConfig, YokogawaOsaFactory,
    COMMAND_FORMAT, SETTLE_DELAY,
};
pub use settings::{Chopper, LevelScale, LevelUnit, Sensitivity, SweepMode, Trace, TraceAttribute};
pub use simulated::SimulatedOsa;

use hwc_core::driver::FactoryRegistry;

/// Register the Yokogawa driver factories.
pub fn register_all(registry: &mut impl FactoryRegistry) {
    registry.register_factory(Box::new(YokogawaOsaFactory));
}
