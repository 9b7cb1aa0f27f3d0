//! Driver factories and component bundles.
//!
//! Drivers implement [`DriverFactory`] and are registered with the CLI's
//! device registry at startup. The registry hands each factory the free-form
//! `config` table of a `[[devices]]` entry and receives a [`DeviceComponents`]
//! bundle describing which capabilities the built device offers.
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! use hwc_core::driver::{Capability, DeviceComponents, DriverFactory};
//! use futures::future::BoxFuture;
//! use std::sync::Arc;
//!
//! pub struct MyStageFactory;
//!
//! impl DriverFactory for MyStageFactory {
//!     fn driver_type(&self) -> &'static str { "my_stage" }
//!     fn name(&self) -> &'static str { "My Stage" }
//!     fn capabilities(&self) -> &'static [Capability] { &[Capability::LinearMotor] }
//!
//!     fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
//!         let _: MyStageConfig = config.clone().try_into()?;
//!         Ok(())
//!     }
//!
//!     fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
//!         Box::pin(async move {
//!             let cfg: MyStageConfig = config.try_into()?;
//!             let stage = Arc::new(MyStage::open(&cfg).await?);
//!             Ok(DeviceComponents::new(stage.clone()).with_linear_motor(stage))
//!         })
//!     }
//! }
//! ```

use crate::capabilities::{LinearMotor, Spectrometer, SpectrumAnalyzer};
use crate::device::Device;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Runtime capability flags for device introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Corresponds to [`crate::capabilities::Spectrometer`]
    Spectrometer,
    /// Corresponds to [`crate::capabilities::SpectrumAnalyzer`]
    SpectrumAnalyzer,
    /// Corresponds to [`crate::capabilities::LinearMotor`]
    LinearMotor,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Capability::Spectrometer => "spectrometer",
            Capability::SpectrumAnalyzer => "spectrum_analyzer",
            Capability::LinearMotor => "linear_motor",
        };
        write!(f, "{}", label)
    }
}

/// The capabilities a built device exposes.
///
/// Every device is at least a [`Device`]; the optional fields point at the
/// same object viewed through a capability trait.
pub struct DeviceComponents {
    /// Base device (identify / close)
    pub device: Arc<dyn Device>,

    /// Spectrometer implementation
    pub spectrometer: Option<Arc<dyn Spectrometer>>,

    /// Spectrum analyzer implementation
    pub spectrum_analyzer: Option<Arc<dyn SpectrumAnalyzer>>,

    /// Linear motor implementation
    pub linear_motor: Option<Arc<dyn LinearMotor>>,
}

impl DeviceComponents {
    /// Components exposing only the base device.
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            spectrometer: None,
            spectrum_analyzer: None,
            linear_motor: None,
        }
    }

    /// Set Spectrometer implementation
    pub fn with_spectrometer(mut self, s: Arc<dyn Spectrometer>) -> Self {
        self.spectrometer = Some(s);
        self
    }

    /// Set SpectrumAnalyzer implementation
    pub fn with_spectrum_analyzer(mut self, a: Arc<dyn SpectrumAnalyzer>) -> Self {
        self.spectrum_analyzer = Some(a);
        self
    }

    /// Set LinearMotor implementation
    pub fn with_linear_motor(mut self, m: Arc<dyn LinearMotor>) -> Self {
        self.linear_motor = Some(m);
        self
    }

    /// Capabilities present in this bundle.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.spectrometer.is_some() {
            caps.push(Capability::Spectrometer);
        }
        if self.spectrum_analyzer.is_some() {
            caps.push(Capability::SpectrumAnalyzer);
        }
        if self.linear_motor.is_some() {
            caps.push(Capability::LinearMotor);
        }
        caps
    }
}

/// Builds devices of one driver type from TOML configuration.
pub trait DriverFactory: Send + Sync {
    /// Identifier used in `driver = "..."` config entries.
    fn driver_type(&self) -> &'static str;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Capabilities every device built by this factory exposes.
    fn capabilities(&self) -> &'static [Capability];

    /// Check a config table without touching hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Open the device described by `config`.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}

/// Registries that accept driver factories.
///
/// Driver crates expose a `register_all(&mut impl FactoryRegistry)` so they
/// can register themselves without depending on the binary that owns the
/// registry.
pub trait FactoryRegistry {
    /// Register a driver factory.
    fn register_factory(&mut self, factory: Box<dyn DriverFactory>);
}
