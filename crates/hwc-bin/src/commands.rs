//! Subcommand implementations.
//!
//! Each command opens the devices it needs, runs, and closes them again
//! before returning, whether or not the operation succeeded.

use crate::config::{DeviceEntry, HardwareConfig};
use crate::registry::DriverRegistry;
use anyhow::{anyhow, Context, Result};
use hwc_core::capabilities::Spectrum;
use hwc_core::device::Device;
use hwc_core::driver::DeviceComponents;
use hwc_driver_yokogawa::{Trace, YokogawaOsa, YokogawaOsaConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Interval between motion polls while waiting for a stage.
const MOTION_POLL: Duration = Duration::from_millis(50);

/// Loaded config plus the registry used to open its devices.
pub struct Bench {
    config: HardwareConfig,
    registry: DriverRegistry,
    mock: bool,
}

impl Bench {
    /// Load `path` and check every entry against the registered drivers.
    pub fn load(path: &Path, mock: bool) -> Result<Self> {
        let config = HardwareConfig::load(path)?;
        Self::new(config, mock)
    }

    pub fn new(config: HardwareConfig, mock: bool) -> Result<Self> {
        let registry = DriverRegistry::with_all_drivers();
        registry.validate(&config)?;
        if mock {
            info!("Using simulated hardware");
        }
        Ok(Self {
            config,
            registry,
            mock,
        })
    }

    /// The entry for `id`, with simulated hardware swapped in under `--mock`.
    pub fn entry(&self, id: &str) -> Result<DeviceEntry> {
        let entry = self.config.device(id)?;
        Ok(if self.mock {
            entry.simulated()
        } else {
            entry.clone()
        })
    }

    pub async fn open(&self, id: &str) -> Result<DeviceComponents> {
        self.registry.open(&self.entry(id)?).await
    }

    async fn open_osa(&self, id: &str) -> Result<YokogawaOsa> {
        let entry = self.entry(id)?;
        if entry.driver != "yokogawa_osa" {
            return Err(anyhow!(
                "Device '{}' is a {}, not a Yokogawa OSA",
                id,
                entry.driver
            ));
        }
        let config: YokogawaOsaConfig = entry
            .config
            .try_into()
            .context("Invalid Yokogawa OSA config")?;
        YokogawaOsa::from_config(&config)
            .await
            .with_context(|| format!("Failed to open device '{}'", id))
    }
}

/// Close `device`, then return `result`.
///
/// An operation error takes precedence over a close error.
async fn finish<T>(device: &dyn Device, result: Result<T>) -> Result<T> {
    let closed = device.close().await;
    match (result, closed) {
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "close failed after error");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(close_err)) => Err(close_err).context("Failed to close device"),
        (Ok(value), Ok(())) => Ok(value),
    }
}

/// Write `spectrum` as `wavelength_nm,intensity` rows.
pub fn write_spectrum<W: Write>(spectrum: &Spectrum, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["wavelength_nm", "intensity"])?;
    for (wavelength, intensity) in spectrum.points() {
        csv.write_record([wavelength.to_string(), intensity.to_string()])?;
    }
    csv.flush()?;
    Ok(())
}

fn emit_spectrum(spectrum: &Spectrum, output: Option<&Path>) -> Result<()> {
    if let Some((wavelength, intensity)) = spectrum.peak() {
        info!(points = spectrum.len(), peak_nm = wavelength, peak = intensity, "Spectrum read");
    }
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_spectrum(spectrum, file)?;
            info!(path = %path.display(), "Spectrum written");
            Ok(())
        }
        None => write_spectrum(spectrum, std::io::stdout().lock()),
    }
}

// =============================================================================
// General
// =============================================================================

pub async fn list(bench: &Bench) -> Result<()> {
    println!("{:<16} {:<20} CAPABILITIES", "ID", "DRIVER");
    for device in &bench.config.devices {
        let entry = bench.entry(&device.id)?;
        let capabilities = bench
            .registry
            .factory(&entry.driver)
            .map(|f| {
                f.capabilities()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        println!("{:<16} {:<20} {}", entry.id, entry.driver, capabilities);
    }

    match hwc_driver_thorlabs::list_kinesis_ports() {
        Ok(ports) if ports.is_empty() => println!("\nNo Kinesis controllers detected"),
        Ok(ports) => {
            println!("\nKinesis controllers:");
            for port in ports {
                println!(
                    "  {:<20} S/N {:<10} {}",
                    port.path,
                    port.serial_number.as_deref().unwrap_or("?"),
                    port.product.as_deref().unwrap_or("")
                );
            }
        }
        Err(e) => warn!(error = %e, "Could not enumerate serial ports"),
    }
    Ok(())
}

pub async fn identify(bench: &Bench, id: &str) -> Result<()> {
    let components = bench.open(id).await?;
    let result = components.device.identify().await.map_err(Into::into);
    let identity = finish(components.device.as_ref(), result).await?;
    println!("{}", identity);
    Ok(())
}

// =============================================================================
// Optical spectrum analyzer
// =============================================================================

pub async fn osa_params(bench: &Bench, id: &str) -> Result<()> {
    let osa = bench.open_osa(id).await?;
    let result = osa.sweep_parameters().await.map_err(Into::into);
    let params = finish(&osa, result).await?;
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

pub async fn osa_sweep(
    bench: &Bench,
    id: &str,
    trace: Option<Trace>,
    resolution_nm: Option<f64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let osa = bench.open_osa(id).await?;
    let result = async {
        if let Some(resolution) = resolution_nm {
            osa.set_resolution(resolution).await?;
        }
        Ok::<_, anyhow::Error>(osa.acquire_single_on(trace).await?)
    }
    .await;
    let spectrum = finish(&osa, result).await?;
    emit_spectrum(&spectrum, output.as_deref())
}

// =============================================================================
// Stages
// =============================================================================

/// Stage operations exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageAction {
    Position,
    MoveAbs(f64),
    MoveBy(f64),
    Home,
    Stop,
}

pub async fn stage(bench: &Bench, id: &str, action: StageAction, wait: bool) -> Result<()> {
    let components = bench.open(id).await?;
    let Some(motor) = components.linear_motor.clone() else {
        let _ = components.device.close().await;
        return Err(anyhow!("Device '{}' is not a linear motor", id));
    };

    let result = async {
        match action {
            StageAction::Position => {}
            StageAction::MoveAbs(target) => {
                motor.move_abs(target).await?;
                if wait {
                    motor.wait_move_finish(MOTION_POLL).await?;
                }
            }
            StageAction::MoveBy(distance) => {
                motor.move_by(distance).await?;
                if wait {
                    motor.wait_move_finish(MOTION_POLL).await?;
                }
            }
            StageAction::Home => motor.home(wait).await?,
            StageAction::Stop => motor.stop(wait).await?,
        }
        Ok::<_, anyhow::Error>(motor.position().await?)
    }
    .await;

    let position = finish(components.device.as_ref(), result).await?;
    println!("{:.9}", position);
    Ok(())
}

// =============================================================================
// Spectrometers
// =============================================================================

pub async fn spectrometer_read(
    bench: &Bench,
    id: &str,
    integration_ms: Option<u64>,
    averages: Option<u32>,
    output: Option<PathBuf>,
) -> Result<()> {
    let components = bench.open(id).await?;
    let Some(spectrometer) = components.spectrometer.clone() else {
        let _ = components.device.close().await;
        return Err(anyhow!("Device '{}' is not a spectrometer", id));
    };

    let result = async {
        if let Some(ms) = integration_ms {
            spectrometer
                .set_integration_time(Duration::from_millis(ms))
                .await?;
        }
        if let Some(count) = averages {
            spectrometer.set_scans_to_avg(count).await?;
        }
        Ok::<_, anyhow::Error>(spectrometer.spectrum().await?)
    }
    .await;

    let spectrum = finish(components.device.as_ref(), result).await?;
    emit_spectrum(&spectrum, output.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENCH: &str = r#"
        [[devices]]
        id = "osa"
        driver = "yokogawa_osa"
        [devices.config]
        resource = "TCPIP0::10.0.0.5::10001::SOCKET"
        poll_interval_ms = 1
        mock_sweep_polls = 1

        [[devices]]
        id = "stage"
        driver = "kinesis_motor"
        [devices.config]
        counts_per_m = 34304000.0
        travel_limits = [0.0, 0.02]

        [[devices]]
        id = "spectro"
        driver = "mock_spectrometer"
    "#;

    fn bench() -> Bench {
        Bench::new(HardwareConfig::from_toml_str(BENCH).unwrap(), true).unwrap()
    }

    #[test]
    fn spectrum_csv_has_header_and_rows() {
        let spectrum = Spectrum::new(vec![1550.0, 1550.5], vec![-40.25, -3.5]).unwrap();
        let mut out = Vec::new();
        write_spectrum(&spectrum, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "wavelength_nm,intensity\n1550,-40.25\n1550.5,-3.5\n"
        );
    }

    #[test]
    fn mock_flag_swaps_entries() {
        let bench = bench();
        assert_eq!(bench.entry("stage").unwrap().driver, "mock_stage");
        assert!(bench.entry("nope").is_err());
    }

    #[tokio::test]
    async fn osa_sweep_writes_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");

        osa_sweep(&bench(), "osa", Some(Trace::B), None, Some(path.clone()))
            .await
            .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["wavelength_nm", "intensity"]);
        assert!(reader.records().count() > 0);
    }

    #[tokio::test]
    async fn osa_commands_reject_other_drivers() {
        let err = osa_params(&bench(), "spectro").await.unwrap_err();
        assert!(err.to_string().contains("not a Yokogawa OSA"));
    }

    #[tokio::test]
    async fn stage_rejects_moves_outside_limits() {
        let err = stage(&bench(), "stage", StageAction::MoveAbs(0.5), true)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("0.5"));
    }

    #[tokio::test]
    async fn stage_command_needs_a_motor() {
        let err = stage(&bench(), "spectro", StageAction::Position, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a linear motor"));
    }

    #[tokio::test]
    async fn spectrometer_read_applies_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectro.csv");
        spectrometer_read(&bench(), "spectro", Some(20), Some(2), Some(path.clone()))
            .await
            .unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .starts_with("wavelength_nm,intensity\n"));
    }
}
