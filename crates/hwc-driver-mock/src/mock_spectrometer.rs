//! Mock array spectrometer implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use hwc_core::capabilities::{Spectrometer, Spectrum};
use hwc_core::device::Device;
use hwc_core::driver::{Capability, DeviceComponents, DriverFactory};
use hwc_core::error::{DeviceError, DeviceResult};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::common::{MockMode, MockRng};

/// 16-bit ADC ceiling.
const SATURATION_COUNTS: f64 = 65_535.0;

// =============================================================================
// MockSpectrometerFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockSpectrometer driver
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockSpectrometerConfig {
    /// Number of detector pixels
    pub pixels: usize,
    /// Wavelength of the first pixel (nm)
    pub start_nm: f64,
    /// Wavelength of the last pixel (nm)
    pub end_nm: f64,
    /// Center of the simulated emission line (nm)
    pub line_center_nm: f64,
    /// Full width at half maximum of the line (nm)
    pub line_fwhm_nm: f64,
    /// Peak signal accumulated per millisecond of integration
    pub counts_per_ms: f64,
    /// Peak-to-peak read noise of a single scan (counts)
    pub noise_counts: f64,
    /// Shortest accepted integration time (ms)
    pub min_integration_ms: u64,
    /// Longest accepted integration time (ms)
    pub max_integration_ms: u64,
    /// Largest accepted scans_to_avg
    pub max_averages: u32,
    /// RNG seed for reproducible noise
    pub seed: Option<u64>,
    /// Timing behavior
    pub mode: MockMode,
}

impl Default for MockSpectrometerConfig {
    fn default() -> Self {
        Self {
            pixels: 2048,
            start_nm: 350.0,
            end_nm: 1000.0,
            line_center_nm: 632.8,
            line_fwhm_nm: 1.5,
            counts_per_ms: 200.0,
            noise_counts: 20.0,
            min_integration_ms: 1,
            max_integration_ms: 10_000,
            max_averages: 1000,
            seed: None,
            mode: MockMode::Instant,
        }
    }
}

impl MockSpectrometerConfig {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pixels >= 2, "pixels must be at least 2");
        anyhow::ensure!(self.start_nm < self.end_nm, "start_nm must be below end_nm");
        anyhow::ensure!(self.line_fwhm_nm > 0.0, "line_fwhm_nm must be positive");
        anyhow::ensure!(
            self.min_integration_ms <= self.max_integration_ms,
            "min_integration_ms exceeds max_integration_ms"
        );
        anyhow::ensure!(self.max_averages >= 1, "max_averages must be at least 1");
        Ok(())
    }
}

/// Factory for creating MockSpectrometer instances.
pub struct MockSpectrometerFactory;

static MOCK_SPECTROMETER_CAPABILITIES: &[Capability] = &[Capability::Spectrometer];

impl DriverFactory for MockSpectrometerFactory {
    fn driver_type(&self) -> &'static str {
        "mock_spectrometer"
    }

    fn name(&self) -> &'static str {
        "Mock Spectrometer"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_SPECTROMETER_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockSpectrometerConfig = config.clone().try_into()?;
        cfg.validate()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockSpectrometerConfig =
                config.try_into().context("invalid mock_spectrometer config")?;
            cfg.validate()?;
            let spectrometer = Arc::new(MockSpectrometer::with_config(cfg));

            Ok(DeviceComponents::new(spectrometer.clone()).with_spectrometer(spectrometer))
        })
    }
}

// =============================================================================
// MockSpectrometer
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Acquisition {
    integration: Duration,
    averages: u32,
}

/// Simulated array spectrometer.
///
/// Produces a Gaussian emission line on a noisy baseline. The line height
/// scales with integration time and saturates at 16-bit full scale; noise
/// shrinks with the square root of the number of averaged scans.
pub struct MockSpectrometer {
    config: MockSpectrometerConfig,
    wavelengths: Vec<f64>,
    acquisition: RwLock<Acquisition>,
    rng: MockRng,
}

impl MockSpectrometer {
    /// Spectrometer with default settings (HeNe line, 100 ms integration).
    pub fn new() -> Self {
        Self::with_config(MockSpectrometerConfig::default())
    }

    /// Create a mock spectrometer with configuration.
    pub fn with_config(config: MockSpectrometerConfig) -> Self {
        let step = (config.end_nm - config.start_nm) / (config.pixels.max(2) - 1) as f64;
        let wavelengths = (0..config.pixels)
            .map(|i| config.start_nm + step * i as f64)
            .collect();
        let rng = MockRng::new(config.seed);
        let integration = Duration::from_millis(100)
            .max(config.min_integration())
            .min(config.max_integration());

        Self {
            config,
            wavelengths,
            acquisition: RwLock::new(Acquisition {
                integration,
                averages: 1,
            }),
            rng,
        }
    }

    fn line_shape(&self, wavelength: f64) -> f64 {
        let sigma = self.config.line_fwhm_nm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
        let x = (wavelength - self.config.line_center_nm) / sigma;
        (-0.5 * x * x).exp()
    }

    async fn acquire(&self) -> Vec<f64> {
        let acq = *self.acquisition.read().await;

        if self.config.mode == MockMode::Realistic {
            tokio::time::sleep(acq.integration * acq.averages).await;
        }

        let peak = self.config.counts_per_ms * acq.integration.as_secs_f64() * 1e3;
        let noise = self.config.noise_counts / 2.0 / f64::from(acq.averages).sqrt();
        let baseline = self.config.noise_counts;

        self.wavelengths
            .iter()
            .map(|&wl| {
                let signal = baseline + peak * self.line_shape(wl) + self.rng.noise(noise);
                signal.clamp(0.0, SATURATION_COUNTS)
            })
            .collect()
    }
}

impl MockSpectrometerConfig {
    fn min_integration(&self) -> Duration {
        Duration::from_millis(self.min_integration_ms)
    }

    fn max_integration(&self) -> Duration {
        Duration::from_millis(self.max_integration_ms)
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Device for MockSpectrometer {
    async fn identify(&self) -> DeviceResult<String> {
        Ok(format!("MockSpectrometer ({} px)", self.config.pixels))
    }

    async fn close(&self) -> DeviceResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn intensities(&self) -> DeviceResult<Vec<f64>> {
        Ok(self.acquire().await)
    }

    async fn wavelengths(&self) -> DeviceResult<Vec<f64>> {
        Ok(self.wavelengths.clone())
    }

    async fn spectrum(&self) -> DeviceResult<Spectrum> {
        let intensities = self.acquire().await;
        Spectrum::new(self.wavelengths.clone(), intensities)
    }

    async fn integration_time(&self) -> DeviceResult<Duration> {
        Ok(self.acquisition.read().await.integration)
    }

    async fn set_integration_time(&self, value: Duration) -> DeviceResult<()> {
        let (lower, upper) = (self.config.min_integration(), self.config.max_integration());
        if value < lower || value > upper {
            return Err(DeviceError::Integration(format!(
                "{:?} outside [{:?}, {:?}]",
                value, lower, upper
            )));
        }
        self.acquisition.write().await.integration = value;
        tracing::debug!(?value, "MockSpectrometer: integration time set");
        Ok(())
    }

    async fn integration_time_limits(&self) -> DeviceResult<(Duration, Duration)> {
        Ok((self.config.min_integration(), self.config.max_integration()))
    }

    async fn scans_to_avg(&self) -> DeviceResult<u32> {
        Ok(self.acquisition.read().await.averages)
    }

    async fn set_scans_to_avg(&self, count: u32) -> DeviceResult<()> {
        if count == 0 || count > self.config.max_averages {
            return Err(DeviceError::Average(format!(
                "{} scans not in 1..={}",
                count, self.config.max_averages
            )));
        }
        self.acquisition.write().await.averages = count;
        Ok(())
    }
}
