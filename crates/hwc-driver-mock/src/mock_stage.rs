//! Mock linear stage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use hwc_core::capabilities::{LinearMotor, TravelLimits};
use hwc_core::device::Device;
use hwc_core::driver::{Capability, DeviceComponents, DriverFactory};
use hwc_core::error::{DeviceError, DeviceResult};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::common::MockMode;

// =============================================================================
// MockStageFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockStage driver
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockStageConfig {
    /// Initial position in meters
    pub initial_position: f64,

    /// Maximum speed in m/s
    pub speed_m_per_sec: f64,

    /// Software limits `[lower, upper]` in meters
    pub travel_limits: Option<[f64; 2]>,

    /// Timing behavior
    pub mode: MockMode,
}

impl Default for MockStageConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            speed_m_per_sec: 0.01,
            travel_limits: Some([0.0, 0.05]),
            mode: MockMode::Instant,
        }
    }
}

impl MockStageConfig {
    fn limits(&self) -> DeviceResult<Option<TravelLimits>> {
        self.travel_limits
            .map(|[lower, upper]| TravelLimits::new(lower, upper))
            .transpose()
    }
}

/// Factory for creating MockStage instances.
pub struct MockStageFactory;

/// Static capabilities for MockStage
static MOCK_STAGE_CAPABILITIES: &[Capability] = &[Capability::LinearMotor];

impl DriverFactory for MockStageFactory {
    fn driver_type(&self) -> &'static str {
        "mock_stage"
    }

    fn name(&self) -> &'static str {
        "Mock Stage"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_STAGE_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockStageConfig = config.clone().try_into()?;
        cfg.limits()?;
        anyhow::ensure!(
            cfg.speed_m_per_sec > 0.0,
            "speed_m_per_sec must be positive, got {}",
            cfg.speed_m_per_sec
        );
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockStageConfig = config.try_into().context("invalid mock_stage config")?;
            let stage = Arc::new(MockStage::with_config(cfg)?);

            Ok(DeviceComponents::new(stage.clone()).with_linear_motor(stage))
        })
    }
}

// =============================================================================
// Velocity Profile
// =============================================================================

/// Trapezoidal velocity profile for realistic motion simulation
#[derive(Debug, Clone, Copy)]
pub struct VelocityProfile {
    /// Maximum velocity in m/s
    pub max_velocity: f64,
    /// Acceleration in m/s²
    pub acceleration: f64,
}

impl VelocityProfile {
    /// Create a symmetric profile (same accel/decel)
    pub fn symmetric(max_velocity: f64, acceleration: f64) -> Self {
        Self {
            max_velocity,
            acceleration,
        }
    }

    /// Motion time for `distance` meters.
    fn motion_time(&self, distance: f64) -> Duration {
        let distance = distance.abs();
        if distance == 0.0 {
            return Duration::ZERO;
        }

        let ramp_time = self.max_velocity / self.acceleration;
        let ramp_dist = self.acceleration * ramp_time * ramp_time;

        let seconds = if ramp_dist <= distance {
            // Trapezoidal: ramp up, cruise, ramp down
            2.0 * ramp_time + (distance - ramp_dist) / self.max_velocity
        } else {
            // Triangular: never reaches max velocity
            2.0 * (distance / self.acceleration).sqrt()
        };
        Duration::from_secs_f64(seconds)
    }
}

impl Default for VelocityProfile {
    fn default() -> Self {
        // 10 mm/s max, 20 mm/s² accel
        Self::symmetric(0.01, 0.02)
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl Motion {
    fn position_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.duration {
            return self.to;
        }
        let fraction = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        self.from + (self.to - self.from) * fraction
    }

    fn finished_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}

#[derive(Debug)]
struct StageState {
    /// Position when idle, or start of the current motion
    position: f64,
    motion: Option<Motion>,
    is_homed: bool,
    limits: Option<TravelLimits>,
}

impl StageState {
    /// Fold a finished motion into `position`.
    fn settle(&mut self, now: Instant) {
        if let Some(motion) = self.motion {
            if motion.finished_at(now) {
                self.position = motion.to;
                self.motion = None;
            }
        }
    }

    fn current_position(&self, now: Instant) -> f64 {
        self.motion
            .map(|m| m.position_at(now))
            .unwrap_or(self.position)
    }
}

// =============================================================================
// MockStage - Simulated Linear Stage
// =============================================================================

/// Simulated linear stage.
///
/// Simulates a stage with:
/// - Instant or trapezoidal-profile motion timing
/// - Software travel limits checked before every move
/// - Homing to 0 m
/// - Stop, which freezes the stage where it currently is
///
/// In [`MockMode::Realistic`] moves return immediately and the position
/// follows the velocity profile as time passes, like a real controller.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::builder()
///     .limits(TravelLimits::new(0.0, 0.025)?)
///     .mode(MockMode::Realistic)
///     .build();
///
/// stage.move_abs(0.01).await?;
/// stage.wait_move_finish(Duration::from_millis(10)).await?;
/// ```
pub struct MockStage {
    state: Arc<RwLock<StageState>>,
    velocity_profile: VelocityProfile,
    mode: MockMode,
}

impl MockStage {
    /// Stage at 0 m without limits, instant motion.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create mock stage with configuration.
    pub fn with_config(config: MockStageConfig) -> DeviceResult<Self> {
        let mut builder = Self::builder()
            .initial_position(config.initial_position)
            .velocity_profile(VelocityProfile {
                max_velocity: config.speed_m_per_sec,
                ..Default::default()
            })
            .mode(config.mode);
        if let Some(limits) = config.limits()? {
            builder = builder.limits(limits);
        }
        Ok(builder.build())
    }

    /// Create a builder for configuring MockStage
    pub fn builder() -> MockStageBuilder {
        MockStageBuilder::new()
    }

    /// True once `home` has been called.
    pub async fn is_homed(&self) -> bool {
        self.state.read().await.is_homed
    }

    async fn start_motion(&self, target: f64) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let from = state.current_position(now);
        let duration = match self.mode {
            MockMode::Instant => Duration::ZERO,
            MockMode::Realistic => self.velocity_profile.motion_time(target - from),
        };

        tracing::debug!(from, to = target, ?duration, "MockStage: moving");

        state.position = from;
        state.motion = Some(Motion {
            from,
            to: target,
            started: now,
            duration,
        });
        state.settle(now);
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Device for MockStage {
    async fn identify(&self) -> DeviceResult<String> {
        Ok("MockStage".to_string())
    }

    async fn close(&self) -> DeviceResult<()> {
        Ok(())
    }
}

#[async_trait]
impl LinearMotor for MockStage {
    async fn travel_limits(&self) -> DeviceResult<TravelLimits> {
        self.state.read().await.limits.ok_or(DeviceError::LimitsNotSet)
    }

    async fn set_travel_limits(&self, limits: TravelLimits) -> DeviceResult<()> {
        self.state.write().await.limits = Some(limits);
        Ok(())
    }

    async fn position(&self) -> DeviceResult<f64> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.settle(now);
        Ok(state.current_position(now))
    }

    async fn move_by(&self, distance: f64) -> DeviceResult<()> {
        let target = self.position().await? + distance;
        self.travel_limits().await?.check(target)?;
        self.start_motion(target).await;
        Ok(())
    }

    async fn move_abs(&self, target: f64) -> DeviceResult<()> {
        self.travel_limits().await?.check(target)?;
        self.start_motion(target).await;
        Ok(())
    }

    async fn home(&self, blocking: bool) -> DeviceResult<()> {
        tracing::debug!("MockStage: homing");
        self.start_motion(0.0).await;
        self.state.write().await.is_homed = true;
        if blocking {
            self.wait_move_finish(Duration::from_millis(10)).await?;
        }
        Ok(())
    }

    async fn is_in_motion(&self) -> DeviceResult<bool> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.settle(now);
        Ok(state.motion.is_some())
    }

    async fn stop(&self, _blocking: bool) -> DeviceResult<()> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.position = state.current_position(now);
        state.motion = None;
        tracing::debug!(position = state.position, "MockStage: stopped");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockStage with fluent API
pub struct MockStageBuilder {
    initial_position: f64,
    velocity_profile: VelocityProfile,
    limits: Option<TravelLimits>,
    mode: MockMode,
}

impl MockStageBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            initial_position: 0.0,
            velocity_profile: VelocityProfile::default(),
            limits: None,
            mode: MockMode::Instant,
        }
    }

    /// Set initial position (m)
    pub fn initial_position(mut self, position: f64) -> Self {
        self.initial_position = position;
        self
    }

    /// Set velocity profile
    pub fn velocity_profile(mut self, profile: VelocityProfile) -> Self {
        self.velocity_profile = profile;
        self
    }

    /// Set software travel limits
    pub fn limits(mut self, limits: TravelLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Set operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build the MockStage
    pub fn build(self) -> MockStage {
        MockStage {
            state: Arc::new(RwLock::new(StageState {
                position: self.initial_position,
                motion: None,
                is_homed: false,
                limits: self.limits,
            })),
            velocity_profile: self.velocity_profile,
            mode: self.mode,
        }
    }
}

impl Default for MockStageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
