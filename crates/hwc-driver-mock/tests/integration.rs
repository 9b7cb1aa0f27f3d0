//! Integration tests for the mock driver crate
//!
//! Exercises the mocks through the same trait objects the CLI uses.

use hwc_core::capabilities::{LinearMotor, Spectrometer, TravelLimits};
use hwc_core::completion::wait_until_complete;
use hwc_core::driver::{Capability, DriverFactory};
use hwc_core::error::TransportError;
use hwc_driver_mock::*;
use std::sync::Arc;
use std::time::Duration;

/// ScriptedTransport drives the completion synchronizer like an instrument
#[tokio::test(start_paused = true)]
async fn test_scripted_transport_with_completion_wait() {
    let transport = ScriptedTransport::new().with_replies(
        "*OPC?",
        [
            Reply::text("0"),
            Reply::Timeout,
            Reply::text("0"),
            Reply::text("1;0"),
        ],
    );

    wait_until_complete(&transport, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(transport.query_count("*OPC?"), 4);
}

/// A fault on the first poll ends the wait after one query
#[tokio::test(start_paused = true)]
async fn test_scripted_fault_ends_completion_wait() {
    let transport = ScriptedTransport::new()
        .with_replies("*OPC?", [Reply::fault("link down"), Reply::text("1")]);

    let err = wait_until_complete(&transport, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Io(_)));
    assert_eq!(transport.query_count("*OPC?"), 1);
}

/// Stage built by its factory behaves through `dyn LinearMotor`
#[tokio::test]
async fn test_stage_through_trait_object() {
    let config: toml::Value = toml::from_str("travel_limits = [0.0, 0.025]").unwrap();
    let components = MockStageFactory.build(config).await.unwrap();
    assert_eq!(components.capabilities(), vec![Capability::LinearMotor]);

    let motor: Arc<dyn LinearMotor> = components.linear_motor.unwrap();
    motor.move_abs(0.02).await.unwrap();
    motor.wait_move_finish(Duration::from_millis(1)).await.unwrap();
    assert_eq!(motor.position().await.unwrap(), 0.02);

    motor
        .set_travel_limits(TravelLimits::new(0.0, 0.01).unwrap())
        .await
        .unwrap();
    assert!(motor.move_by(0.0).await.is_err(), "0.02 now outside limits");

    components.device.close().await.unwrap();
}

/// Spectrometer settings persist across acquisitions
#[tokio::test]
async fn test_spectrometer_through_trait_object() {
    let spectrometer: Arc<dyn Spectrometer> = Arc::new(MockSpectrometer::with_config(
        MockSpectrometerConfig {
            pixels: 256,
            seed: Some(9),
            ..Default::default()
        },
    ));

    spectrometer
        .set_integration_time(Duration::from_millis(20))
        .await
        .unwrap();
    spectrometer.set_scans_to_avg(8).await.unwrap();

    let spectrum = spectrometer.spectrum().await.unwrap();
    assert_eq!(spectrum.len(), 256);
    assert_eq!(
        spectrometer.integration_time().await.unwrap(),
        Duration::from_millis(20)
    );
    assert_eq!(spectrometer.scans_to_avg().await.unwrap(), 8);
    assert!(spectrometer.identify().await.unwrap().contains("256"));
}
