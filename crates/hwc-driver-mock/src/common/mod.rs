//! Shared infrastructure for simulated devices.
//!
//! - **mode**: instant vs. hardware-like timing
//! - **rng**: seeded random number generator for noise

pub mod mode;
pub mod rng;

pub use mode::MockMode;
pub use rng::MockRng;
