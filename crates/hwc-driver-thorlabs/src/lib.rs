//! Thorlabs hardware drivers for hwcomms.
//!
//! This crate provides drivers for Thorlabs devices, including:
//! - Kinesis DC servo controllers (KDC101, TDC001, ...) over the APT protocol
//!
//! # Usage
//!
//! Register the factory with your device registry:
//!
//! ```rust,ignore
//! use hwc_driver_thorlabs::register_all;
//!
//! register_all(&mut registry);
//! ```
//!
//! List attached controllers:
//!
//! ```rust,ignore
//! for port in hwc_driver_thorlabs::list_kinesis_ports()? {
//!     println!("{} {:?}", port.path, port.serial_number);
//! }
//! ```

pub mod apt;
pub mod discovery;
mod kinesis;

pub use discovery::{list_kinesis_ports, KinesisPort};
pub use kinesis::{AptIo, KinesisMotor, KinesisMotorConfig, KinesisMotorFactory, APT_BAUD_RATE};

use hwc_core::driver::FactoryRegistry;

/// Register the Thorlabs driver factories.
pub fn register_all(registry: &mut impl FactoryRegistry) {
    registry.register_factory(Box::new(KinesisMotorFactory));
}
