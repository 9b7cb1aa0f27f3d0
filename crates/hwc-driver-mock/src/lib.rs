//! Mock hardware for hwcomms.
//!
//! This crate provides test doubles and simulated devices so drivers and the
//! CLI can run without instruments attached. All simulated timing uses
//! `tokio::time`, so tests can run on a paused clock.
//!
//! # Contents
//!
//! - [`ScriptedTransport`] - message transport answering from a reply script,
//!   with an ordered log of everything sent
//! - [`MockStage`] - simulated linear stage with limit checks and timed motion
//! - [`MockSpectrometer`] - simulated array spectrometer (Gaussian line + noise)
//!
//! # Driver Factory Pattern
//!
//! ```rust,ignore
//! use hwc_driver_mock::register_all;
//!
//! let mut registry = DeviceRegistry::new();
//! register_all(&mut registry);
//! ```

pub mod common;
mod mock_spectrometer;
mod mock_stage;
mod scripted;

pub use common::{MockMode, MockRng};
pub use mock_spectrometer::{MockSpectrometer, MockSpectrometerConfig, MockSpectrometerFactory};
pub use mock_stage::{MockStage, MockStageBuilder, MockStageConfig, MockStageFactory, VelocityProfile};
pub use scripted::{Exchange, Reply, ScriptedTransport};

use hwc_core::driver::FactoryRegistry;

/// Register every mock driver factory.
pub fn register_all(registry: &mut impl FactoryRegistry) {
    registry.register_factory(Box::new(MockStageFactory));
    registry.register_factory(Box::new(MockSpectrometerFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwc_core::driver::DriverFactory;

    #[derive(Default)]
    struct Names(Vec<&'static str>);

    impl FactoryRegistry for Names {
        fn register_factory(&mut self, factory: Box<dyn DriverFactory>) {
            self.0.push(factory.driver_type());
        }
    }

    #[test]
    fn registers_both_mocks() {
        let mut names = Names::default();
        register_all(&mut names);
        assert_eq!(names.0, vec!["mock_stage", "mock_spectrometer"]);
    }
}
