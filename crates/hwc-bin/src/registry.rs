//! Driver factory registry.
//!
//! Every driver crate registers its factories here through its
//! `register_all` function. The registry validates config entries against
//! those factories and builds devices on demand.

use crate::config::{DeviceEntry, HardwareConfig};
use anyhow::{anyhow, Context, Result};
use hwc_core::driver::{DeviceComponents, DriverFactory, FactoryRegistry};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Driver types mapped to the factory that builds them.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<&'static str, Box<dyn DriverFactory>>,
}

impl FactoryRegistry for DriverRegistry {
    fn register_factory(&mut self, factory: Box<dyn DriverFactory>) {
        tracing::debug!(
            driver_type = factory.driver_type(),
            name = factory.name(),
            capabilities = ?factory.capabilities(),
            "Registering driver factory"
        );
        self.factories.insert(factory.driver_type(), factory);
    }
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every driver shipped with hwcomms.
    pub fn with_all_drivers() -> Self {
        let mut registry = Self::new();
        hwc_driver_mock::register_all(&mut registry);
        hwc_driver_yokogawa::register_all(&mut registry);
        hwc_driver_thorlabs::register_all(&mut registry);
        registry
    }

    /// Factory for `driver_type`, if registered.
    pub fn factory(&self, driver_type: &str) -> Option<&dyn DriverFactory> {
        self.factories.get(driver_type).map(|f| f.as_ref())
    }

    /// Registered driver types, sorted.
    pub fn driver_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    fn factory_for(&self, entry: &DeviceEntry) -> Result<&dyn DriverFactory> {
        self.factory(&entry.driver).ok_or_else(|| {
            anyhow!(
                "Device '{}' uses unknown driver '{}' (available: {})",
                entry.id,
                entry.driver,
                self.driver_types().join(", ")
            )
        })
    }

    /// Check every entry without opening anything.
    pub fn validate(&self, config: &HardwareConfig) -> Result<()> {
        config.check()?;
        for entry in &config.devices {
            self.factory_for(entry)?
                .validate(&entry.config)
                .with_context(|| format!("Invalid config for device '{}'", entry.id))?;
        }
        Ok(())
    }

    /// Validate and open one device.
    #[instrument(skip(self, entry), fields(id = %entry.id, driver = %entry.driver), err)]
    pub async fn open(&self, entry: &DeviceEntry) -> Result<DeviceComponents> {
        let factory = self.factory_for(entry)?;
        factory
            .validate(&entry.config)
            .with_context(|| format!("Invalid config for device '{}'", entry.id))?;
        let components = factory
            .build(entry.config.clone())
            .await
            .with_context(|| format!("Failed to open device '{}'", entry.id))?;
        info!(capabilities = ?components.capabilities(), "Device opened");
        Ok(components)
    }
}
