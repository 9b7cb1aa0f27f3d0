//! Device capability traits.
//!
//! Devices implement the capabilities they actually have instead of one
//! monolithic instrument trait:
//!
//! - a grating spectrometer implements [`Spectrometer`],
//! - an optical spectrum analyzer implements [`SpectrumAnalyzer`],
//! - a motorized stage implements [`LinearMotor`].
//!
//! All of them extend [`Device`], and that is the only level of inheritance.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync via [`Device`])
//! - Uses [`DeviceResult`] so callers can match on the failure kind
//! - Takes `&self`; implementations use interior mutability for state

use crate::device::Device;
use crate::error::{DeviceError, DeviceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Spectrum
// =============================================================================

/// A measured spectrum: wavelength bins and the intensity in each bin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength of each bin, in nanometers.
    pub wavelengths_nm: Vec<f64>,
    /// Intensity of each bin, in device units (dBm, W, counts, ...).
    pub intensities: Vec<f64>,
}

impl Spectrum {
    /// Pair up wavelengths and intensities.
    ///
    /// # Errors
    /// [`DeviceError::Configuration`] if the two axes differ in length.
    pub fn new(wavelengths_nm: Vec<f64>, intensities: Vec<f64>) -> DeviceResult<Self> {
        if wavelengths_nm.len() != intensities.len() {
            return Err(DeviceError::Configuration(format!(
                "spectrum axes differ in length: {} wavelengths, {} intensities",
                wavelengths_nm.len(),
                intensities.len()
            )));
        }
        Ok(Self {
            wavelengths_nm,
            intensities,
        })
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.wavelengths_nm.len()
    }

    /// True if the spectrum has no bins.
    pub fn is_empty(&self) -> bool {
        self.wavelengths_nm.is_empty()
    }

    /// Iterate `(wavelength_nm, intensity)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.wavelengths_nm
            .iter()
            .copied()
            .zip(self.intensities.iter().copied())
    }

    /// Bin with the highest intensity.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.points()
            .fold(None, |best: Option<(f64, f64)>, p| match best {
                Some(b) if b.1 >= p.1 => Some(b),
                _ => Some(p),
            })
    }
}

// =============================================================================
// Spectrometer
// =============================================================================

/// Capability: array spectrometer with software-controlled integration.
#[async_trait]
pub trait Spectrometer: Device {
    /// Intensity read by each pixel, in arbitrary units.
    async fn intensities(&self) -> DeviceResult<Vec<f64>>;

    /// Wavelength of each pixel, in nanometers.
    async fn wavelengths(&self) -> DeviceResult<Vec<f64>>;

    /// Wavelengths and intensities from a single acquisition.
    async fn spectrum(&self) -> DeviceResult<Spectrum>;

    /// Current hardware integration time.
    async fn integration_time(&self) -> DeviceResult<Duration>;

    /// Set the hardware integration time.
    ///
    /// # Errors
    /// [`DeviceError::Integration`] if `value` is outside
    /// [`Spectrometer::integration_time_limits`].
    async fn set_integration_time(&self, value: Duration) -> DeviceResult<()>;

    /// Inclusive `(lower, upper)` integration time bounds.
    async fn integration_time_limits(&self) -> DeviceResult<(Duration, Duration)>;

    /// Number of scans averaged into each spectrum.
    async fn scans_to_avg(&self) -> DeviceResult<u32>;

    /// Set the number of scans averaged into each spectrum.
    ///
    /// # Errors
    /// [`DeviceError::Average`] if `count` is not accepted (zero, or above the
    /// device maximum).
    async fn set_scans_to_avg(&self, count: u32) -> DeviceResult<()>;
}

// =============================================================================
// SpectrumAnalyzer
// =============================================================================

/// Capability: swept optical spectrum analyzer.
#[async_trait]
pub trait SpectrumAnalyzer: Device {
    /// Start a sweep without waiting for it.
    async fn initiate_sweep(&self) -> DeviceResult<()>;

    /// Read the spectrum currently held in the active trace.
    async fn spectrum(&self) -> DeviceResult<Spectrum>;

    /// Run one fresh sweep, wait for it to finish, and return its spectrum.
    async fn acquire_single(&self) -> DeviceResult<Spectrum>;
}

// =============================================================================
// LinearMotor
// =============================================================================

/// Software travel limits of a stage, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelLimits {
    pub lower: f64,
    pub upper: f64,
}

impl TravelLimits {
    /// Create limits, rejecting `lower > upper` and non-finite bounds.
    pub fn new(lower: f64, upper: f64) -> DeviceResult<Self> {
        if !lower.is_finite() || !upper.is_finite() || lower > upper {
            return Err(DeviceError::Configuration(format!(
                "invalid travel limits [{}, {}]",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    /// True if `position` lies within the limits (inclusive).
    pub fn contains(&self, position: f64) -> bool {
        self.lower <= position && position <= self.upper
    }

    /// Check a target position against the limits.
    ///
    /// # Errors
    /// [`DeviceError::OutOfBounds`] if `target` is outside.
    pub fn check(&self, target: f64) -> DeviceResult<()> {
        if self.contains(target) {
            Ok(())
        } else {
            Err(DeviceError::OutOfBounds {
                target,
                lower: self.lower,
                upper: self.upper,
            })
        }
    }
}

/// Capability: motorized linear stage.
///
/// # Contract
/// - Positions and distances are in meters.
/// - `move_abs` / `move_by` check the software limits before sending anything
///   and may return before motion completes.
/// - `wait_move_finish` blocks until the stage reports it is idle.
#[async_trait]
pub trait LinearMotor: Device {
    /// Configured software limits.
    ///
    /// # Errors
    /// [`DeviceError::LimitsNotSet`] if none were configured.
    async fn travel_limits(&self) -> DeviceResult<TravelLimits>;

    /// Replace the software limits.
    async fn set_travel_limits(&self, limits: TravelLimits) -> DeviceResult<()>;

    /// Current stage position in meters.
    async fn position(&self) -> DeviceResult<f64>;

    /// Relative move.
    ///
    /// # Errors
    /// [`DeviceError::OutOfBounds`] if `position + distance` leaves the limits.
    async fn move_by(&self, distance: f64) -> DeviceResult<()>;

    /// Absolute move.
    ///
    /// # Errors
    /// [`DeviceError::OutOfBounds`] if `target` is outside the limits.
    async fn move_abs(&self, target: f64) -> DeviceResult<()>;

    /// Home the stage; with `blocking`, return only once homing has finished.
    async fn home(&self, blocking: bool) -> DeviceResult<()>;

    /// True while the stage is moving.
    async fn is_in_motion(&self) -> DeviceResult<bool>;

    /// Poll [`LinearMotor::is_in_motion`] every `interval` until it is false.
    async fn wait_move_finish(&self, interval: Duration) -> DeviceResult<()> {
        while self.is_in_motion().await? {
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }

    /// Interrupt any current motion; with `blocking`, wait until stopped.
    async fn stop(&self, blocking: bool) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrum_rejects_mismatched_axes() {
        assert!(Spectrum::new(vec![1.0, 2.0], vec![0.5]).is_err());
    }

    #[test]
    fn spectrum_peak() {
        let s = Spectrum::new(vec![1550.0, 1551.0, 1552.0], vec![-40.0, -3.0, -20.0]).unwrap();
        assert_eq!(s.peak(), Some((1551.0, -3.0)));
        assert_eq!(s.len(), 3);
        assert!(Spectrum::default().peak().is_none());
    }

    #[test]
    fn travel_limits_validation() {
        assert!(TravelLimits::new(0.0, 0.025).is_ok());
        assert!(TravelLimits::new(0.01, 0.0).is_err());
        assert!(TravelLimits::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn travel_limits_check_is_inclusive() {
        let limits = TravelLimits::new(0.0, 0.025).unwrap();
        assert!(limits.check(0.0).is_ok());
        assert!(limits.check(0.025).is_ok());
        match limits.check(0.03) {
            Err(DeviceError::OutOfBounds { target, upper, .. }) => {
                assert_eq!(target, 0.03);
                assert_eq!(upper, 0.025);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
