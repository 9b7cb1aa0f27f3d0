//! Driver against the simulated instrument
//!
//! Runs every operation end to end through the factory path the CLI uses.

use hwc_core::capabilities::SpectrumAnalyzer;
use hwc_core::driver::DriverFactory;
use hwc_driver_yokogawa::*;
use std::sync::Arc;
use std::time::Duration;

async fn simulated(polls: u32) -> (Arc<SimulatedOsa>, YokogawaOsa<Arc<SimulatedOsa>>) {
    let sim = Arc::new(SimulatedOsa::new().with_sweep_polls(polls));
    let osa = YokogawaOsa::new(sim.clone(), Duration::from_millis(20))
        .await
        .unwrap();
    (sim, osa)
}

#[tokio::test(start_paused = true)]
async fn acquire_single_waits_for_sweep() {
    let (sim, osa) = simulated(5).await;
    osa.set_wavelength_span(1545.0, 1555.0).await.unwrap();

    let start = tokio::time::Instant::now();
    let spectrum = osa.acquire_single_on(Some(Trace::B)).await.unwrap();

    assert_eq!(sim.sweeps_started(), 1);
    assert_eq!(spectrum.len(), 1001);
    let (peak_nm, _) = spectrum.peak().unwrap();
    assert!((peak_nm - 1550.0).abs() < 0.05, "peak at {peak_nm}");
    assert!((spectrum.wavelengths_nm[0] - 1545.0).abs() < 1e-6);

    // 4 settle pauses, 1 poll before the sweep, 5 busy + 1 done during it
    assert_eq!(
        start.elapsed(),
        SETTLE_DELAY * 4 + Duration::from_millis(20) * 7
    );

    assert_eq!(osa.sweep_mode().await.unwrap(), SweepMode::Single);
    assert_eq!(osa.active_trace().await.unwrap(), Trace::B);
}

#[tokio::test]
async fn settings_roundtrip() {
    let (_sim, osa) = simulated(0).await;

    osa.set_resolution(0.05).await.unwrap();
    assert!((osa.resolution().await.unwrap() - 0.05).abs() < 1e-9);

    osa.set_sensitivity(Sensitivity::High2, Chopper::Switch)
        .await
        .unwrap();
    assert_eq!(
        osa.sensitivity().await.unwrap(),
        (Sensitivity::High2, Chopper::Switch)
    );

    osa.set_level_scale(LevelScale::Linear).await.unwrap();
    assert_eq!(osa.level_scale().await.unwrap(), LevelScale::Linear);

    osa.set_trace_status(TraceAttribute::RollAverage, Some(8), Some(Trace::D))
        .await
        .unwrap();
    let status = osa.read_trace_status(Some(Trace::D)).await.unwrap();
    assert_eq!(status.attribute, TraceAttribute::RollAverage);
    assert_eq!(status.average_count, 8);

    let (start, stop) = osa.wavelength_span().await.unwrap();
    assert!((start - 1500.0).abs() < 1e-9 && (stop - 1600.0).abs() < 1e-9);
}

#[tokio::test]
async fn sweep_parameters_reflect_settings() {
    let (_sim, osa) = simulated(0).await;
    osa.set_active_trace(Trace::C).await.unwrap();
    osa.set_trace_status(TraceAttribute::MaxHold, None, None)
        .await
        .unwrap();

    let params = osa.sweep_parameters().await.unwrap();
    assert_eq!(params.active_trace, Trace::C);
    assert_eq!(params.trace_attribute, TraceAttribute::MaxHold);
    assert_eq!(params.average_count, 1);
    assert_eq!(params.points, 1001);
    assert_eq!(params.level_unit, LevelUnit::Dbm);

    let json = serde_json::to_value(&params).unwrap();
    assert_eq!(json["trace_attribute"], "MAX HOLD");
    assert_eq!(json["active_trace"], "TRC");
}

#[tokio::test]
async fn reset_returns_to_defaults() {
    let (_sim, osa) = simulated(0).await;
    osa.set_sweep_mode(SweepMode::Auto).await.unwrap();
    osa.reset().await.unwrap();
    assert_eq!(osa.sweep_mode().await.unwrap(), SweepMode::Repeat);
}

#[tokio::test(start_paused = true)]
async fn factory_builds_simulated_analyzer() {
    let config: toml::Value =
        toml::from_str("mock = true\nmock_sweep_polls = 2\npoll_interval_ms = 5").unwrap();
    YokogawaOsaFactory.validate(&config).unwrap();
    let components = YokogawaOsaFactory.build(config).await.unwrap();

    let analyzer: Arc<dyn SpectrumAnalyzer> = components.spectrum_analyzer.unwrap();
    assert!(analyzer.identify().await.unwrap().starts_with("YOKOGAWA"));
    let spectrum = analyzer.acquire_single().await.unwrap();
    assert!(!spectrum.is_empty());

    components.device.close().await.unwrap();
    assert!(analyzer.identify().await.is_err());
}
