//! Yokogawa AQ6370-series Optical Spectrum Analyzer Driver
//!
//! Reference: AQ6370D Remote Control User's Manual (IM AQ6370D-17EN)
//!
//! Protocol Overview:
//! - Format: SCPI over GPIB, raw socket (port 10001) or VISA
//! - Terminator: LF
//! - The instrument speaks two command dialects; `CFORM1` selects the
//!   AQ6370 dialect and is sent on construction and after every reset
//! - Setting queries answer with numeric codes (see [`crate::settings`]),
//!   wavelengths are reported in meters
//! - Trace data: `:TRAC:DATA:X? TRx` / `:TRAC:DATA:Y? TRx`, comma separated
//!
//! Sweeps run for seconds to minutes, far longer than the read timeout, so
//! completion is detected by polling `*OPC?` until it answers 1. See
//! [`hwc_core::completion`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use hwc_driver_yokogawa::YokogawaOsaFactory;
//! use hwc_core::driver::DriverFactory;
//!
//! let config = toml::toml! {
//!     resource = "TCPIP0::192.168.1.20::10001::SOCKET"
//!     poll_interval_ms = 100
//! };
//! let components = YokogawaOsaFactory.build(config.into()).await?;
//! let spectrum = components.spectrum_analyzer.unwrap().acquire_single().await?;
//! ```

use crate::settings::{
    Chopper, LevelScale, LevelUnit, Sensitivity, SweepMode, Trace, TraceAttribute,
};
use crate::simulated::SimulatedOsa;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use hwc_core::capabilities::{Spectrum, SpectrumAnalyzer};
use hwc_core::completion::{CompletionWaiter, DEFAULT_POLL_INTERVAL};
use hwc_core::device::Device;
use hwc_core::driver::{Capability, DeviceComponents, DriverFactory};
use hwc_core::error::{DeviceError, DeviceResult, TransportError, TransportResult};
use hwc_core::transport::{parse_f64, parse_i64, DynTransport, MessageTransport};
use hwc_transport::{ResourceAddress, TransportOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Selects the AQ6370 command dialect.
pub const COMMAND_FORMAT: &str = "CFORM1";

/// Pause between the steps of a single-sweep acquisition.
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

const METERS_TO_NM: f64 = 1e9;

// =============================================================================
// YokogawaOsaFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the Yokogawa OSA driver
#[derive(Debug, Clone, Deserialize)]
pub struct YokogawaOsaConfig {
    /// Resource address (e.g. "TCPIP0::10.0.0.5::10001::SOCKET", "GPIB0::1::INSTR")
    #[serde(default)]
    pub resource: Option<String>,

    /// Interval between `*OPC?` polls while waiting for a sweep
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Answer from a simulated instrument instead of opening `resource`
    #[serde(default)]
    pub mock: bool,

    /// `*OPC?` polls a simulated sweep takes to complete
    #[serde(default = "default_mock_sweep_polls")]
    pub mock_sweep_polls: u32,

    /// Timeout and terminators
    #[serde(flatten)]
    pub transport: TransportOptions,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_mock_sweep_polls() -> u32 {
    3
}

impl YokogawaOsaConfig {
    /// Reject configs that could never open.
    pub fn check(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be positive"));
        }
        if self.transport.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be positive"));
        }
        if !self.mock {
            let resource = self
                .resource
                .as_deref()
                .ok_or_else(|| anyhow!("resource is required unless mock = true"))?;
            resource.parse::<ResourceAddress>()?;
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Factory for Yokogawa OSA driver instances.
pub struct YokogawaOsaFactory;

/// Static capabilities for the Yokogawa OSA
static YOKOGAWA_OSA_CAPABILITIES: &[Capability] = &[Capability::SpectrumAnalyzer];

impl DriverFactory for YokogawaOsaFactory {
    fn driver_type(&self) -> &'static str {
        "yokogawa_osa"
    }

    fn name(&self) -> &'static str {
        "Yokogawa AQ6370 Optical Spectrum Analyzer"
    }

    fn capabilities(&self) -> &'static [Capability] {
        YOKOGAWA_OSA_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: YokogawaOsaConfig = config
            .clone()
            .try_into()
            .context("Invalid Yokogawa OSA config")?;
        cfg.check()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: YokogawaOsaConfig = config
                .try_into()
                .context("Invalid Yokogawa OSA config")?;
            let osa = Arc::new(YokogawaOsa::from_config(&cfg).await?);
            Ok(DeviceComponents::new(osa.clone()).with_spectrum_analyzer(osa))
        })
    }
}

// =============================================================================
// Readback structs
// =============================================================================

/// Acquisition settings read back from the instrument in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepParameters {
    pub active_trace: Trace,
    pub trace_attribute: TraceAttribute,
    /// Sweeps in the rolling average; 1 unless the attribute is ROLL AVG
    pub average_count: u32,
    pub start_nm: f64,
    pub stop_nm: f64,
    pub resolution_nm: f64,
    pub points: u32,
    /// Reference level in `level_unit`
    pub reference_level: f64,
    pub level_unit: LevelUnit,
    pub sensitivity: Sensitivity,
    pub chopper: Chopper,
}

/// Update mode of one trace memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceStatus {
    pub attribute: TraceAttribute,
    pub average_count: u32,
}

// =============================================================================
// YokogawaOsa
// =============================================================================

/// Driver for the AQ6370 family.
///
/// Generic over the transport so tests can hand in a scripted channel and
/// keep a handle on it; built devices use [`DynTransport`].
pub struct YokogawaOsa<T = DynTransport> {
    transport: T,
    completion: CompletionWaiter,
}

impl YokogawaOsa<DynTransport> {
    /// Open `resource` and initialize the instrument.
    pub async fn connect(
        resource: &str,
        options: &TransportOptions,
        poll_interval: Duration,
    ) -> DeviceResult<Self> {
        let transport = hwc_transport::open(resource, options).await?;
        Self::new(transport, poll_interval).await
    }

    /// Open the instrument (or the simulator, if `config.mock`) described
    /// by a validated config.
    pub async fn from_config(config: &YokogawaOsaConfig) -> Result<Self> {
        config.check()?;

        let transport: DynTransport = if config.mock {
            Box::new(
                SimulatedOsa::new()
                    .with_sweep_polls(config.mock_sweep_polls)
                    .with_timeout(config.transport.timeout()),
            )
        } else {
            let resource = config.resource.as_deref().unwrap_or_default();
            hwc_transport::open(resource, &config.transport)
                .await
                .with_context(|| format!("Failed to open OSA at {}", resource))?
        };

        Ok(Self::new(transport, config.poll_interval()).await?)
    }
}

impl<T: MessageTransport> YokogawaOsa<T> {
    /// Take ownership of an open transport and select the AQ6370 dialect.
    #[instrument(skip(transport), fields(resource = transport.resource()), err)]
    pub async fn new(transport: T, poll_interval: Duration) -> DeviceResult<Self> {
        transport.write(COMMAND_FORMAT).await?;
        tracing::info!("Yokogawa OSA initialized");
        Ok(Self {
            transport,
            completion: CompletionWaiter::new(poll_interval),
        })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn query_nm(&self, command: &str) -> TransportResult<f64> {
        let response = self.transport.query(command).await?;
        Ok(parse_f64(command, &response)? * METERS_TO_NM)
    }

    async fn query_count(&self, command: &str) -> TransportResult<u32> {
        let response = self.transport.query(command).await?;
        let value = parse_i64(command, &response)?;
        u32::try_from(value)
            .map_err(|_| TransportError::malformed(command, &response, "expected a count"))
    }

    /// Read the `*IDN?` string.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn identify(&self) -> DeviceResult<String> {
        Ok(self.transport.query("*IDN?").await?)
    }

    /// Reset to factory settings and reselect the AQ6370 dialect.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn reset(&self) -> DeviceResult<()> {
        self.transport.write("*RST").await?;
        self.transport.write(COMMAND_FORMAT).await?;
        Ok(())
    }

    /// Read the acquisition settings.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn sweep_parameters(&self) -> DeviceResult<SweepParameters> {
        let active_trace = self.active_trace().await?;

        let command = format!(":TRACe:ATTRibute:{}?", active_trace.mnemonic());
        let response = self.transport.query(&command).await?;
        let trace_attribute = TraceAttribute::from_response(&command, &response)?;

        let average_count = self.query_count(":TRACe:ATTRibute:RAVG?").await?;
        let average_count = if trace_attribute == TraceAttribute::RollAverage {
            average_count
        } else {
            1
        };

        let start_nm = self.query_nm(":SENSe:WAVelength:STARt?").await?;
        let stop_nm = self.query_nm(":SENSe:WAVelength:STOP?").await?;
        let resolution_nm = self.query_nm(":SENSe:BANDwidth:RESolution?").await?;
        let points = self.query_count(":SENSe:SWEep:POINts?").await?;

        const RLEVEL: &str = ":DISPlay:WINDow:TRACe:Y1:SCALe:RLEVel?";
        let reference_level = parse_f64(RLEVEL, &self.transport.query(RLEVEL).await?)?;

        const UNIT: &str = ":DISPlay:WINDow:TRACe:Y1:SCALe:UNIT?";
        let level_unit = LevelUnit::from_response(UNIT, &self.transport.query(UNIT).await?)?;

        let (sensitivity, chopper) = self.sensitivity().await?;

        Ok(SweepParameters {
            active_trace,
            trace_attribute,
            average_count,
            start_nm,
            stop_nm,
            resolution_nm,
            points,
            reference_level,
            level_unit,
            sensitivity,
            chopper,
        })
    }

    /// Read the spectrum held in `trace` (the active trace if `None`).
    ///
    /// Wavelengths are converted to nanometers; intensities are in the
    /// instrument's current level unit.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn read_trace(&self, trace: Option<Trace>) -> DeviceResult<Spectrum> {
        let trace = match trace {
            Some(trace) => trace,
            None => self.active_trace().await?,
        };

        let intensities = self
            .transport
            .query_list(&format!(":TRAC:DATA:Y? {}", trace.mnemonic()))
            .await?;
        let wavelengths_nm = self
            .transport
            .query_list(&format!(":TRAC:DATA:X? {}", trace.mnemonic()))
            .await?
            .into_iter()
            .map(|m| m * METERS_TO_NM)
            .collect();

        Spectrum::new(wavelengths_nm, intensities)
    }

    /// Run one fresh single sweep into `trace` and read it back.
    ///
    /// Any sweep already running is aborted first. Cancelling the returned
    /// future leaves the instrument mid-sweep; the next acquisition aborts it.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn acquire_single_on(&self, trace: Option<Trace>) -> DeviceResult<Spectrum> {
        if let Some(trace) = trace {
            self.set_active_trace(trace).await?;
        }
        if self.sweep_mode().await? != SweepMode::Single {
            self.set_sweep_mode(SweepMode::Single).await?;
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        self.transport.write(":ABORt").await?;
        tokio::time::sleep(SETTLE_DELAY).await;
        self.transport.write("*WAI").await?;
        tokio::time::sleep(SETTLE_DELAY).await;
        self.completion.wait(&self.transport).await?;

        self.transport.write(":INITiate:IMMediate").await?;
        tokio::time::sleep(SETTLE_DELAY).await;
        self.completion.wait(&self.transport).await?;
        tracing::debug!("sweep complete");

        self.read_trace(trace).await
    }

    /// Start a sweep in the current sweep mode without waiting for it.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn initiate_sweep(&self) -> DeviceResult<()> {
        Ok(self.transport.write(":INITiate:IMMediate").await?)
    }

    /// Sweep start and stop wavelength in nanometers.
    pub async fn wavelength_span(&self) -> DeviceResult<(f64, f64)> {
        let start = self.query_nm(":SENSe:WAVelength:STARt?").await?;
        let stop = self.query_nm(":SENSe:WAVelength:STOP?").await?;
        Ok((start, stop))
    }

    /// Set the sweep span in nanometers.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn set_wavelength_span(&self, start_nm: f64, stop_nm: f64) -> DeviceResult<()> {
        if !start_nm.is_finite() || !stop_nm.is_finite() || start_nm >= stop_nm {
            return Err(DeviceError::Configuration(format!(
                "invalid wavelength span {} nm .. {} nm",
                start_nm, stop_nm
            )));
        }
        self.transport
            .write(&format!(
                "SENSe:WAVelength:STARt {}NM; STOP {}NM",
                start_nm, stop_nm
            ))
            .await?;
        Ok(())
    }

    /// Resolution bandwidth in nanometers.
    pub async fn resolution(&self) -> DeviceResult<f64> {
        Ok(self.query_nm(":SENSE:BANDWIDTH?").await?)
    }

    /// Set the resolution bandwidth in nanometers (sent with two decimals).
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn set_resolution(&self, resolution_nm: f64) -> DeviceResult<()> {
        if !(resolution_nm.is_finite() && resolution_nm > 0.0) {
            return Err(DeviceError::Configuration(format!(
                "invalid resolution {} nm",
                resolution_nm
            )));
        }
        self.transport
            .write(&format!(":SENSE:BANDWIDTH:RESOLUTION {:.2}NM", resolution_nm))
            .await?;
        Ok(())
    }

    /// Detector sensitivity and chopper setting.
    pub async fn sensitivity(&self) -> DeviceResult<(Sensitivity, Chopper)> {
        const SENSE: &str = ":SENSe:SENSe?";
        const CHOP: &str = ":SENSe:CHOPper?";
        let sensitivity = Sensitivity::from_response(SENSE, &self.transport.query(SENSE).await?)?;
        let chopper = Chopper::from_response(CHOP, &self.transport.query(CHOP).await?)?;
        Ok((sensitivity, chopper))
    }

    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn set_sensitivity(
        &self,
        sensitivity: Sensitivity,
        chopper: Chopper,
    ) -> DeviceResult<()> {
        self.transport
            .write(&format!(":SENSe:SENSe {}", sensitivity.mnemonic()))
            .await?;
        self.transport
            .write(&format!(":SENSe:CHOPper {}", chopper.mnemonic()))
            .await?;
        Ok(())
    }

    pub async fn sweep_mode(&self) -> DeviceResult<SweepMode> {
        const SMODE: &str = ":INITiate:SMODe?";
        Ok(SweepMode::from_response(SMODE, &self.transport.query(SMODE).await?)?)
    }

    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn set_sweep_mode(&self, mode: SweepMode) -> DeviceResult<()> {
        self.transport
            .write(&format!(":INITiate:SMODe {}", mode.mnemonic()))
            .await?;
        Ok(())
    }

    /// Trace memory that sweeps write into.
    pub async fn active_trace(&self) -> DeviceResult<Trace> {
        const ACTIVE: &str = ":TRACe:ACTive?";
        let response = self.transport.query(ACTIVE).await?;
        response
            .trim()
            .parse::<Trace>()
            .map_err(|_| TransportError::malformed(ACTIVE, &response, "unknown trace").into())
    }

    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn set_active_trace(&self, trace: Trace) -> DeviceResult<()> {
        self.transport
            .write(&format!(":TRACE:ACTIVE {}", trace.mnemonic()))
            .await?;
        Ok(())
    }

    /// Set how `trace` (the active trace if `None`) is updated.
    ///
    /// `average_count` only applies to [`TraceAttribute::RollAverage`] and
    /// is otherwise ignored.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn set_trace_status(
        &self,
        attribute: TraceAttribute,
        average_count: Option<u32>,
        trace: Option<Trace>,
    ) -> DeviceResult<()> {
        let average_count = match (attribute, average_count) {
            (TraceAttribute::RollAverage, Some(0)) => {
                return Err(DeviceError::Average(
                    "rolling average needs at least one sweep".into(),
                ))
            }
            (TraceAttribute::RollAverage, count) => count,
            _ => None,
        };

        let trace = match trace {
            Some(trace) => trace,
            None => self.active_trace().await?,
        };

        self.transport
            .write(&format!(
                ":TRACe:ATTRibute:{} {}",
                trace.mnemonic(),
                attribute.mnemonic()
            ))
            .await?;
        if let Some(count) = average_count {
            self.transport
                .write(&format!(":TRACe:ATTRibute:RAVG {}", count))
                .await?;
        }
        Ok(())
    }

    /// Read how `trace` (the active trace if `None`) is updated.
    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn read_trace_status(&self, trace: Option<Trace>) -> DeviceResult<TraceStatus> {
        let trace = match trace {
            Some(trace) => trace,
            None => self.active_trace().await?,
        };

        let command = format!(":TRACE:ATTRIBUTE:{}?", trace.mnemonic());
        let response = self.transport.query(&command).await?;
        let attribute = TraceAttribute::from_response(&command, &response)?;

        let average_count = if attribute == TraceAttribute::RollAverage {
            self.query_count(":TRACe:ATTRibute:RAVG?").await?
        } else {
            1
        };

        Ok(TraceStatus {
            attribute,
            average_count,
        })
    }

    pub async fn level_scale(&self) -> DeviceResult<LevelScale> {
        const SPACING: &str = ":DISPlay:WINDow:TRACe:Y1:SCALe:SPACing?";
        Ok(LevelScale::from_response(
            SPACING,
            &self.transport.query(SPACING).await?,
        )?)
    }

    #[instrument(skip(self), fields(resource = self.transport.resource()), err)]
    pub async fn set_level_scale(&self, scale: LevelScale) -> DeviceResult<()> {
        self.transport
            .write(&format!(":DISPLAY:TRACE:Y1:SPACING {}", scale.mnemonic()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<T: MessageTransport + 'static> Device for YokogawaOsa<T> {
    async fn identify(&self) -> DeviceResult<String> {
        YokogawaOsa::identify(self).await
    }

    async fn close(&self) -> DeviceResult<()> {
        tracing::info!(resource = self.transport.resource(), "closing Yokogawa OSA");
        Ok(self.transport.close().await?)
    }
}

#[async_trait]
impl<T: MessageTransport + 'static> SpectrumAnalyzer for YokogawaOsa<T> {
    async fn initiate_sweep(&self) -> DeviceResult<()> {
        YokogawaOsa::initiate_sweep(self).await
    }

    async fn spectrum(&self) -> DeviceResult<Spectrum> {
        self.read_trace(None).await
    }

    async fn acquire_single(&self) -> DeviceResult<Spectrum> {
        self.acquire_single_on(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwc_driver_mock::{Reply, ScriptedTransport};

    const POLL: Duration = Duration::from_millis(10);

    async fn osa(transport: ScriptedTransport) -> YokogawaOsa<Arc<ScriptedTransport>> {
        let transport = Arc::new(transport);
        let osa = YokogawaOsa::new(transport, POLL).await.unwrap();
        osa.transport().clear_log();
        osa
    }

    #[test]
    fn test_factory_driver_type() {
        assert_eq!(YokogawaOsaFactory.driver_type(), "yokogawa_osa");
        assert_eq!(
            YokogawaOsaFactory.capabilities(),
            &[Capability::SpectrumAnalyzer]
        );
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = YokogawaOsaFactory;

        let valid: toml::Value =
            toml::from_str(r#"resource = "TCPIP0::10.0.0.5::10001::SOCKET""#).unwrap();
        assert!(factory.validate(&valid).is_ok());

        let mock: toml::Value = toml::from_str("mock = true").unwrap();
        assert!(factory.validate(&mock).is_ok());

        let missing: toml::Value = toml::from_str("poll_interval_ms = 20").unwrap();
        assert!(factory.validate(&missing).is_err());

        let zero_poll: toml::Value = toml::from_str("mock = true\npoll_interval_ms = 0").unwrap();
        assert!(factory.validate(&zero_poll).is_err());

        let empty_resource: toml::Value = toml::from_str(r#"resource = """#).unwrap();
        assert!(factory.validate(&empty_resource).is_err());
    }

    #[test]
    fn test_config_flattens_transport_options() {
        let cfg: YokogawaOsaConfig =
            toml::from_str("mock = true\ntimeout_ms = 750\nwrite_terminator = \"\\r\\n\"").unwrap();
        assert_eq!(cfg.transport.timeout(), Duration::from_millis(750));
        assert_eq!(cfg.transport.write_terminator, "\r\n");
        assert_eq!(cfg.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.mock_sweep_polls, 3);
    }

    #[tokio::test]
    async fn test_construction_selects_dialect() {
        let transport = Arc::new(ScriptedTransport::new());
        let _osa = YokogawaOsa::new(transport.clone(), POLL).await.unwrap();
        assert_eq!(transport.writes(), vec!["CFORM1"]);
    }

    #[tokio::test]
    async fn test_reset_reselects_dialect() {
        let osa = osa(ScriptedTransport::new()).await;
        osa.reset().await.unwrap();
        assert_eq!(osa.transport().writes(), vec!["*RST", "CFORM1"]);
    }

    #[tokio::test]
    async fn test_sweep_parameters() {
        let transport = ScriptedTransport::new()
            .with_reply(":TRACe:ACTive?", Reply::text("TRB"))
            .with_reply(":TRACe:ATTRibute:TRB?", Reply::text("4"))
            .with_reply(":TRACe:ATTRibute:RAVG?", Reply::text("20"))
            .with_reply(":SENSe:WAVelength:STARt?", Reply::text("+1.50000000E-006"))
            .with_reply(":SENSe:WAVelength:STOP?", Reply::text("+1.60000000E-006"))
            .with_reply(":SENSe:BANDwidth:RESolution?", Reply::text("+2.00000000E-011"))
            .with_reply(":SENSe:SWEep:POINts?", Reply::text("1001"))
            .with_reply(":DISPlay:WINDow:TRACe:Y1:SCALe:RLEVel?", Reply::text("-10.0"))
            .with_reply(":DISPlay:WINDow:TRACe:Y1:SCALe:UNIT?", Reply::text("2"))
            .with_reply(":SENSe:SENSe?", Reply::text("3"))
            .with_reply(":SENSe:CHOPper?", Reply::text("0"));
        let osa = osa(transport).await;

        let params = osa.sweep_parameters().await.unwrap();
        assert_eq!(params.active_trace, Trace::B);
        assert_eq!(params.trace_attribute, TraceAttribute::RollAverage);
        assert_eq!(params.average_count, 20);
        assert!((params.start_nm - 1500.0).abs() < 1e-9);
        assert!((params.stop_nm - 1600.0).abs() < 1e-9);
        assert!((params.resolution_nm - 0.02).abs() < 1e-12);
        assert_eq!(params.points, 1001);
        assert_eq!(params.reference_level, -10.0);
        assert_eq!(params.level_unit, LevelUnit::DbmPerNm);
        assert_eq!(params.sensitivity, Sensitivity::High1);
        assert_eq!(params.chopper, Chopper::Off);
    }

    #[tokio::test]
    async fn test_sweep_parameters_average_is_one_without_roll_average() {
        let transport = ScriptedTransport::new()
            .with_reply(":TRACe:ACTive?", Reply::text("TRA"))
            .with_reply(":TRACe:ATTRibute:TRA?", Reply::text("0"))
            .with_reply(":TRACe:ATTRibute:RAVG?", Reply::text("50"))
            .with_reply(":SENSe:WAVelength:STARt?", Reply::text("1.5E-6"))
            .with_reply(":SENSe:WAVelength:STOP?", Reply::text("1.6E-6"))
            .with_reply(":SENSe:BANDwidth:RESolution?", Reply::text("1E-10"))
            .with_reply(":SENSe:SWEep:POINts?", Reply::text("501"))
            .with_reply(":DISPlay:WINDow:TRACe:Y1:SCALe:RLEVel?", Reply::text("0"))
            .with_reply(":DISPlay:WINDow:TRACe:Y1:SCALe:UNIT?", Reply::text("0"))
            .with_reply(":SENSe:SENSe?", Reply::text("6"))
            .with_reply(":SENSe:CHOPper?", Reply::text("2"));
        let osa = osa(transport).await;

        let params = osa.sweep_parameters().await.unwrap();
        assert_eq!(params.trace_attribute, TraceAttribute::Write);
        assert_eq!(params.average_count, 1);
        assert_eq!(params.chopper, Chopper::Switch);
    }

    #[tokio::test]
    async fn test_unknown_code_is_malformed() {
        let transport = ScriptedTransport::new().with_reply(":INITiate:SMODe?", Reply::text("9"));
        let osa = osa(transport).await;
        let err = osa.sweep_mode().await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Transport(TransportError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_trace_converts_meters() {
        let transport = ScriptedTransport::new()
            .with_reply(":TRAC:DATA:Y? TRC", Reply::text("-40.0,-3.5,-41.0"))
            .with_reply(":TRAC:DATA:X? TRC", Reply::text("1.5499E-6,1.55E-6,1.5501E-6"));
        let osa = osa(transport).await;

        let spectrum = osa.read_trace(Some(Trace::C)).await.unwrap();
        assert_eq!(spectrum.len(), 3);
        let (peak_nm, peak) = spectrum.peak().unwrap();
        assert!((peak_nm - 1550.0).abs() < 1e-6);
        assert_eq!(peak, -3.5);
        assert_eq!(
            osa.transport().commands(),
            vec![":TRAC:DATA:Y? TRC", ":TRAC:DATA:X? TRC"]
        );
    }

    #[tokio::test]
    async fn test_read_trace_defaults_to_active() {
        let transport = ScriptedTransport::new()
            .with_reply(":TRACe:ACTive?", Reply::text("TRD"))
            .with_reply(":TRAC:DATA:Y? TRD", Reply::text("1,2"))
            .with_reply(":TRAC:DATA:X? TRD", Reply::text("1E-6,2E-6"));
        let osa = osa(transport).await;

        let spectrum = SpectrumAnalyzer::spectrum(&osa).await.unwrap();
        assert_eq!(spectrum.wavelengths_nm.len(), 2);
        assert_eq!(osa.transport().commands()[0], ":TRACe:ACTive?");
    }

    #[tokio::test]
    async fn test_mismatched_axes_rejected() {
        let transport = ScriptedTransport::new()
            .with_reply(":TRAC:DATA:Y? TRA", Reply::text("1,2,3"))
            .with_reply(":TRAC:DATA:X? TRA", Reply::text("1E-6,2E-6"));
        let osa = osa(transport).await;
        assert!(matches!(
            osa.read_trace(Some(Trace::A)).await,
            Err(DeviceError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_single_command_order() {
        let transport = ScriptedTransport::new()
            .with_reply(":INITiate:SMODe?", Reply::text("2"))
            .with_replies(
                "*OPC?",
                [
                    Reply::text("1"),
                    Reply::text("0"),
                    Reply::Timeout,
                    Reply::text("1"),
                ],
            )
            .with_reply(":TRAC:DATA:Y? TRB", Reply::text("-20,-10"))
            .with_reply(":TRAC:DATA:X? TRB", Reply::text("1.55E-6,1.56E-6"));
        let osa = osa(transport).await;

        let start = tokio::time::Instant::now();
        let spectrum = osa.acquire_single_on(Some(Trace::B)).await.unwrap();
        assert_eq!(spectrum.intensities, vec![-20.0, -10.0]);

        assert_eq!(
            osa.transport().commands(),
            vec![
                ":TRACE:ACTIVE TRB",
                ":INITiate:SMODe?",
                ":INITiate:SMODe SING",
                ":ABORt",
                "*WAI",
                "*OPC?",
                ":INITiate:IMMediate",
                "*OPC?",
                "*OPC?",
                "*OPC?",
                ":TRAC:DATA:Y? TRB",
                ":TRAC:DATA:X? TRB",
            ]
        );
        // 4 settle pauses and 4 poll intervals on the paused clock
        assert_eq!(start.elapsed(), SETTLE_DELAY * 4 + POLL * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_single_keeps_single_mode() {
        let transport = ScriptedTransport::new()
            .with_reply(":INITiate:SMODe?", Reply::text("1"))
            .with_reply("*OPC?", Reply::text("1"))
            .with_reply(":TRACe:ACTive?", Reply::text("TRA"))
            .with_reply(":TRAC:DATA:Y? TRA", Reply::text("0"))
            .with_reply(":TRAC:DATA:X? TRA", Reply::text("1.55E-6"));
        let osa = osa(transport).await;

        SpectrumAnalyzer::acquire_single(&osa).await.unwrap();
        let commands = osa.transport().commands();
        assert!(!commands.iter().any(|c| c.starts_with(":INITiate:SMODe ")));
        assert!(!commands.iter().any(|c| c.starts_with(":TRACE:ACTIVE")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_single_stops_on_fault() {
        let transport = ScriptedTransport::new()
            .with_reply(":INITiate:SMODe?", Reply::text("1"))
            .with_replies("*OPC?", [Reply::text("1"), Reply::fault("GPIB bus error")]);
        let osa = osa(transport).await;

        let err = osa.acquire_single_on(Some(Trace::A)).await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(TransportError::Io(_))));
        assert!(!osa
            .transport()
            .commands()
            .iter()
            .any(|c| c.starts_with(":TRAC:DATA")));
    }

    #[tokio::test]
    async fn test_setters_write_mnemonics() {
        let osa = osa(ScriptedTransport::new()).await;

        osa.set_wavelength_span(1500.0, 1600.5).await.unwrap();
        osa.set_resolution(0.1).await.unwrap();
        osa.set_sensitivity(Sensitivity::High2, Chopper::Switch)
            .await
            .unwrap();
        osa.set_sweep_mode(SweepMode::Repeat).await.unwrap();
        osa.set_active_trace(Trace::E).await.unwrap();
        osa.set_level_scale(LevelScale::Linear).await.unwrap();

        assert_eq!(
            osa.transport().writes(),
            vec![
                "SENSe:WAVelength:STARt 1500NM; STOP 1600.5NM",
                ":SENSE:BANDWIDTH:RESOLUTION 0.10NM",
                ":SENSe:SENSe HIGH2",
                ":SENSe:CHOPper SWITCH",
                ":INITiate:SMODe REP",
                ":TRACE:ACTIVE TRE",
                ":DISPLAY:TRACE:Y1:SPACING LIN",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_span_sends_nothing() {
        let osa = osa(ScriptedTransport::new()).await;
        assert!(osa.set_wavelength_span(1600.0, 1500.0).await.is_err());
        assert!(osa.set_resolution(0.0).await.is_err());
        assert!(osa.transport().commands().is_empty());
    }

    #[tokio::test]
    async fn test_trace_status_roundtrip_commands() {
        let transport = ScriptedTransport::new()
            .with_reply(":TRACe:ACTive?", Reply::text("TRA"))
            .with_reply(":TRACE:ATTRIBUTE:TRA?", Reply::text("4"))
            .with_reply(":TRACe:ATTRibute:RAVG?", Reply::text("16"))
            .with_reply(":TRACE:ATTRIBUTE:TRC?", Reply::text("2"));
        let osa = osa(transport).await;

        osa.set_trace_status(TraceAttribute::RollAverage, Some(16), None)
            .await
            .unwrap();
        osa.set_trace_status(TraceAttribute::MaxHold, Some(5), Some(Trace::C))
            .await
            .unwrap();
        assert_eq!(
            osa.transport().writes(),
            vec![
                ":TRACe:ATTRibute:TRA RAVG",
                ":TRACe:ATTRibute:RAVG 16",
                ":TRACe:ATTRibute:TRC MAX",
            ]
        );

        let status = osa.read_trace_status(None).await.unwrap();
        assert_eq!(
            status,
            TraceStatus {
                attribute: TraceAttribute::RollAverage,
                average_count: 16
            }
        );

        osa.transport().clear_log();
        let status = osa.read_trace_status(Some(Trace::C)).await.unwrap();
        assert_eq!(status.attribute, TraceAttribute::MaxHold);
        assert_eq!(status.average_count, 1);
        assert_eq!(osa.transport().query_count(":TRACe:ATTRibute:RAVG?"), 0);
    }

    #[tokio::test]
    async fn test_zero_roll_average_rejected() {
        let osa = osa(ScriptedTransport::new()).await;
        let err = osa
            .set_trace_status(TraceAttribute::RollAverage, Some(0), Some(Trace::A))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Average(_)));
    }

    #[tokio::test]
    async fn test_close_closes_transport() {
        let osa = osa(ScriptedTransport::new()).await;
        Device::close(&osa).await.unwrap();
        assert!(osa.transport().is_closed());
        assert!(matches!(
            osa.identify().await,
            Err(DeviceError::Transport(TransportError::Closed))
        ));
    }
}
