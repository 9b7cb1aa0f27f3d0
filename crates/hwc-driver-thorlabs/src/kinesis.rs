//! Thorlabs Kinesis DC Servo Motor Driver
//!
//! Reference: Thorlabs APT Communications Protocol, Issue 37
//!
//! Protocol Overview:
//! - Binary APT messages (see [`crate::apt`]) over the controller's USB
//!   serial port: 115200 baud, 8N1, RTS/CTS
//! - Moves are fire-and-forget; the controller later pushes
//!   MOT_MOVE_COMPLETED / MOT_MOVE_HOMED / MOT_MOVE_STOPPED
//! - Position and motion state come from MOT_REQ_DCSTATUSUPDATE
//!
//! Positions are converted with a per-stage `counts_per_m` scale (e.g.
//! 34 304 000 for a Z8-series actuator). There is no way to read the scale
//! from the controller, so it must be configured.
//!
//! Controller-side failures (timeouts, garbled replies) do not abort motion
//! commands: they are logged and the call reports success, `position` falls
//! back to the last reading and `is_in_motion` reports `true`. Limit checks
//! and a closed port are still errors.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hwc_driver_thorlabs::KinesisMotorFactory;
//! use hwc_core::driver::DriverFactory;
//!
//! let config = toml::toml! {
//!     serial_number = "27000123"
//!     counts_per_m = 34304000.0
//!     travel_limits = [0.0, 0.025]
//! };
//! let components = KinesisMotorFactory.build(config.into()).await?;
//! ```

use crate::apt::{self, id, AptMessage, DcStatus, HardwareInfo};
use crate::discovery::{list_kinesis_ports, select_port};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::future::BoxFuture;
use futures::FutureExt;
use hwc_core::capabilities::{LinearMotor, TravelLimits};
use hwc_core::device::Device;
use hwc_core::driver::{Capability, DeviceComponents, DriverFactory};
use hwc_core::error::{DeviceError, DeviceResult, TransportError, TransportResult};
use hwc_transport::serial::{open_serial_port, SerialSettings};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;

/// APT line rate.
pub const APT_BAUD_RATE: u32 = 115_200;

const NOT_CALIBRATED: &str = "No step to distance calibration found. Input this manually.";

// =============================================================================
// KinesisMotorFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the Kinesis motor driver
#[derive(Debug, Clone, Deserialize)]
pub struct KinesisMotorConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0"); discovered if omitted
    #[serde(default)]
    pub port: Option<String>,

    /// Controller serial number, used for discovery when `port` is omitted
    #[serde(default)]
    pub serial_number: Option<String>,

    /// Encoder counts per meter of stage travel
    #[serde(default)]
    pub counts_per_m: Option<f64>,

    /// Software travel limits `[lower, upper]` in meters
    #[serde(default)]
    pub travel_limits: Option<[f64; 2]>,

    /// Reply timeout for status and info requests (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a blocking home may take (default: 60000)
    #[serde(default = "default_home_timeout_ms")]
    pub home_timeout_ms: u64,

    /// Motor channel (default: 1)
    #[serde(default = "default_channel")]
    pub channel: u16,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_home_timeout_ms() -> u64 {
    60_000
}

fn default_channel() -> u16 {
    1
}

impl Default for KinesisMotorConfig {
    fn default() -> Self {
        Self {
            port: None,
            serial_number: None,
            counts_per_m: None,
            travel_limits: None,
            timeout_ms: default_timeout_ms(),
            home_timeout_ms: default_home_timeout_ms(),
            channel: default_channel(),
        }
    }
}

impl KinesisMotorConfig {
    /// Scale, or [`DeviceError::NotCalibrated`].
    pub fn calibration(&self) -> DeviceResult<f64> {
        match self.counts_per_m {
            Some(scale) if scale.is_finite() && scale > 0.0 => Ok(scale),
            _ => Err(DeviceError::NotCalibrated(NOT_CALIBRATED.to_string())),
        }
    }

    /// Limits, if configured.
    pub fn limits(&self) -> DeviceResult<Option<TravelLimits>> {
        self.travel_limits
            .map(|[lower, upper]| TravelLimits::new(lower, upper))
            .transpose()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn home_timeout(&self) -> Duration {
        Duration::from_millis(self.home_timeout_ms)
    }
}

/// Factory for Kinesis motor driver instances.
pub struct KinesisMotorFactory;

/// Static capabilities for Kinesis motors
static KINESIS_CAPABILITIES: &[Capability] = &[Capability::LinearMotor];

impl DriverFactory for KinesisMotorFactory {
    fn driver_type(&self) -> &'static str {
        "kinesis_motor"
    }

    fn name(&self) -> &'static str {
        "Thorlabs Kinesis DC Servo Motor"
    }

    fn capabilities(&self) -> &'static [Capability] {
        KINESIS_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: KinesisMotorConfig = config
            .clone()
            .try_into()
            .context("Invalid Kinesis motor config")?;
        cfg.calibration()?;
        cfg.limits()?;
        if cfg.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be positive"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: KinesisMotorConfig = config
                .try_into()
                .context("Invalid Kinesis motor config")?;
            let motor = Arc::new(KinesisMotor::open(&cfg).await?);
            Ok(DeviceComponents::new(motor.clone()).with_linear_motor(motor))
        })
    }
}

// =============================================================================
// APT port
// =============================================================================

/// Byte streams an APT controller can sit behind.
pub trait AptIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AptIo for T {}

struct AptPort {
    io: Box<dyn AptIo>,
    rx: BytesMut,
}

impl AptPort {
    async fn send(&mut self, message: &AptMessage, timeout: Duration) -> TransportResult<()> {
        let bytes = message.to_bytes();
        let io = &mut self.io;
        tokio::time::timeout(timeout, async move {
            io.write_all(&bytes).await?;
            io.flush().await
        })
        .await
        .map_err(|_| TransportError::timeout(format!("APT 0x{:04X}", message.id), timeout))??;
        Ok(())
    }

    /// Drop buffered and already-arrived input, such as replies to requests
    /// that timed out. Returns the number of bytes dropped.
    fn discard_stale(&mut self) -> usize {
        let mut discarded = self.rx.len();
        self.rx.clear();
        while let Some(Ok(read)) = self.io.read_buf(&mut self.rx).now_or_never() {
            if read == 0 {
                break;
            }
            discarded += read;
            self.rx.clear();
        }
        discarded
    }

    /// Read messages until one with `expected` id arrives.
    ///
    /// Anything else (late MOVE_COMPLETED notifications and the like) is
    /// dropped.
    async fn recv(&mut self, expected: u16, within: Duration) -> TransportResult<AptMessage> {
        let deadline = Instant::now() + within;
        loop {
            loop {
                match AptMessage::decode(&mut self.rx) {
                    Ok(Some(message)) if message.id == expected => return Ok(message),
                    Ok(Some(message)) => {
                        tracing::trace!(id = message.id, expected, "skipping APT message")
                    }
                    Ok(None) => break,
                    Err(e) => tracing::warn!(error = %e, "dropping corrupt APT header"),
                }
            }

            let read = tokio::time::timeout_at(deadline, self.io.read_buf(&mut self.rx))
                .await
                .map_err(|_| TransportError::timeout(format!("APT 0x{:04X}", expected), within))??;
            if read == 0 {
                return Err(TransportError::Closed);
            }
        }
    }
}

// =============================================================================
// KinesisMotor
// =============================================================================

/// Driver for a single-channel Kinesis DC servo controller.
pub struct KinesisMotor {
    port: Mutex<Option<AptPort>>,
    label: String,
    channel: u16,
    counts_per_m: f64,
    timeout: Duration,
    home_timeout: Duration,
    limits: parking_lot::Mutex<Option<TravelLimits>>,
    last_position: parking_lot::Mutex<Option<f64>>,
}

impl KinesisMotor {
    /// Open the controller described by `config`.
    ///
    /// With neither `port` nor `serial_number`, the first Kinesis controller
    /// found is used.
    #[instrument(skip(config), fields(port = ?config.port, serial = ?config.serial_number), err)]
    pub async fn open(config: &KinesisMotorConfig) -> DeviceResult<Self> {
        config.calibration()?;

        let path = match &config.port {
            Some(path) => path.clone(),
            None => {
                let ports = list_kinesis_ports()?;
                select_port(&ports, config.serial_number.as_deref())
                    .map(|p| p.path)
                    .ok_or_else(|| {
                        DeviceError::Configuration(match &config.serial_number {
                            Some(sn) => format!("no Kinesis controller with serial number {}", sn),
                            None => "no Kinesis controller found".to_string(),
                        })
                    })?
            }
        };

        let settings = SerialSettings::new(APT_BAUD_RATE).with_hardware_flow_control();
        let stream = open_serial_port(&path, settings).await?;
        Self::with_io(Box::new(stream), path, config).await
    }

    /// Drive a controller over an already open byte stream.
    pub async fn with_io(
        io: Box<dyn AptIo>,
        label: impl Into<String>,
        config: &KinesisMotorConfig,
    ) -> DeviceResult<Self> {
        let counts_per_m = config.calibration()?;
        let limits = config.limits()?;

        let motor = Self {
            port: Mutex::new(Some(AptPort {
                io,
                rx: BytesMut::with_capacity(256),
            })),
            label: label.into(),
            channel: config.channel,
            counts_per_m,
            timeout: config.timeout(),
            home_timeout: config.home_timeout(),
            limits: parking_lot::Mutex::new(limits),
            last_position: parking_lot::Mutex::new(None),
        };

        motor.send(apt::stop_update_messages()).await?;
        tracing::info!(port = %motor.label, counts_per_m, "Kinesis motor opened");
        Ok(motor)
    }

    /// Encoder counts per meter.
    pub fn counts_per_m(&self) -> f64 {
        self.counts_per_m
    }

    fn to_counts(&self, meters: f64) -> DeviceResult<i32> {
        let counts = (meters * self.counts_per_m).round();
        if counts < i32::MIN as f64 || counts > i32::MAX as f64 {
            return Err(DeviceError::Configuration(format!(
                "{} m is beyond the encoder range",
                meters
            )));
        }
        Ok(counts as i32)
    }

    async fn send(&self, message: AptMessage) -> DeviceResult<()> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(TransportError::Closed)?;
        port.send(&message, self.timeout).await?;
        Ok(())
    }

    async fn request(
        &self,
        message: AptMessage,
        reply: u16,
        within: Duration,
    ) -> DeviceResult<AptMessage> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(TransportError::Closed)?;
        let stale = port.discard_stale();
        if stale > 0 {
            tracing::debug!(port = %self.label, bytes = stale, "discarded stale APT input");
        }
        port.send(&message, self.timeout).await?;
        Ok(port.recv(reply, within).await?)
    }

    /// Raw status of the motor channel.
    pub async fn status(&self) -> DeviceResult<DcStatus> {
        let reply = self
            .request(
                apt::req_status(self.channel),
                id::MOT_GET_DCSTATUSUPDATE,
                self.timeout,
            )
            .await?;
        let status = DcStatus::decode(&reply).map_err(TransportError::from)?;
        *self.last_position.lock() = Some(status.position as f64 / self.counts_per_m);
        Ok(status)
    }

    /// Model, serial number and firmware of the controller.
    pub async fn hardware_info(&self) -> DeviceResult<HardwareInfo> {
        let reply = self
            .request(apt::req_info(), id::HW_GET_INFO, self.timeout)
            .await?;
        Ok(HardwareInfo::decode(&reply).map_err(TransportError::from)?)
    }

    /// Log and drop controller-side failures. A closed port stays an error.
    fn tolerate(&self, operation: &'static str, result: DeviceResult<()>) -> DeviceResult<()> {
        match result {
            Err(DeviceError::Transport(TransportError::Closed)) => {
                Err(DeviceError::Transport(TransportError::Closed))
            }
            Err(e) => {
                tracing::warn!(port = %self.label, operation, error = %e, "Kinesis command failed, ignoring");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

#[async_trait]
impl Device for KinesisMotor {
    async fn identify(&self) -> DeviceResult<String> {
        let info = self.hardware_info().await?;
        let (major, interim, minor) = info.firmware;
        Ok(format!(
            "Thorlabs {} S/N {} (firmware {}.{}.{})",
            info.model, info.serial_number, major, interim, minor
        ))
    }

    async fn close(&self) -> DeviceResult<()> {
        let Some(mut port) = self.port.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = port.send(&apt::disconnect(), self.timeout).await {
            tracing::warn!(port = %self.label, error = %e, "Kinesis disconnect not delivered");
        }
        if let Err(e) = port.io.shutdown().await {
            tracing::debug!(port = %self.label, error = %e, "Kinesis port shutdown failed");
        }
        tracing::info!(port = %self.label, "Kinesis motor closed");
        Ok(())
    }
}

#[async_trait]
impl LinearMotor for KinesisMotor {
    async fn travel_limits(&self) -> DeviceResult<TravelLimits> {
        (*self.limits.lock()).ok_or(DeviceError::LimitsNotSet)
    }

    async fn set_travel_limits(&self, limits: TravelLimits) -> DeviceResult<()> {
        *self.limits.lock() = Some(limits);
        Ok(())
    }

    #[instrument(skip(self), fields(port = %self.label), err)]
    async fn position(&self) -> DeviceResult<f64> {
        match self.status().await {
            Ok(status) => Ok(status.position as f64 / self.counts_per_m),
            Err(DeviceError::Transport(TransportError::Closed)) => {
                Err(DeviceError::Transport(TransportError::Closed))
            }
            Err(e) => match *self.last_position.lock() {
                Some(last) => {
                    tracing::warn!(error = %e, last, "Kinesis status failed, using last position");
                    Ok(last)
                }
                None => Err(e),
            },
        }
    }

    #[instrument(skip(self), fields(port = %self.label), err)]
    async fn move_by(&self, distance: f64) -> DeviceResult<()> {
        let limits = self.travel_limits().await?;
        let current = self.position().await?;
        limits.check(current + distance)?;
        let counts = self.to_counts(distance)?;
        let result = self.send(apt::move_relative(self.channel, counts)).await;
        self.tolerate("move_by", result)
    }

    #[instrument(skip(self), fields(port = %self.label), err)]
    async fn move_abs(&self, target: f64) -> DeviceResult<()> {
        self.travel_limits().await?.check(target)?;
        let counts = self.to_counts(target)?;
        let result = self.send(apt::move_absolute(self.channel, counts)).await;
        self.tolerate("move_abs", result)
    }

    #[instrument(skip(self), fields(port = %self.label), err)]
    async fn home(&self, blocking: bool) -> DeviceResult<()> {
        let message = apt::move_home(self.channel);
        let result = if blocking {
            self.request(message, id::MOT_MOVE_HOMED, self.home_timeout)
                .await
                .map(|_| ())
        } else {
            self.send(message).await
        };
        self.tolerate("home", result)
    }

    async fn is_in_motion(&self) -> DeviceResult<bool> {
        match self.status().await {
            Ok(status) => Ok(status.status.is_moving()),
            Err(DeviceError::Transport(TransportError::Closed)) => {
                Err(DeviceError::Transport(TransportError::Closed))
            }
            Err(e) => {
                tracing::warn!(port = %self.label, error = %e, "Kinesis status failed, assuming motion");
                Ok(true)
            }
        }
    }

    #[instrument(skip(self), fields(port = %self.label), err)]
    async fn stop(&self, blocking: bool) -> DeviceResult<()> {
        let message = apt::move_stop(self.channel, true);
        let result = if blocking {
            self.request(message, id::MOT_MOVE_STOPPED, self.timeout)
                .await
                .map(|_| ())
        } else {
            self.send(message).await
        };
        self.tolerate("stop", result)
    }
}
