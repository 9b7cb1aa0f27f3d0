//! Simulated AQ6370.
//!
//! [`SimulatedOsa`] is a [`MessageTransport`] that interprets the command set
//! [`crate::YokogawaOsa`] sends and answers the way the instrument does:
//! numeric setting codes, wavelengths in meters, and comma-separated trace
//! data. A sweep started with `:INITiate:IMMediate` keeps `*OPC?` at 0 for a
//! configurable number of polls.
//!
//! The trace holds one Gaussian emission line on a flat noise floor,
//! rendered over the current span and point count. Unknown queries time out,
//! as a real instrument that ignores a bad header would.

use crate::settings::{
    Chopper, LevelScale, LevelUnit, Sensitivity, SweepMode, Trace, TraceAttribute,
};
use async_trait::async_trait;
use hwc_core::error::{TransportError, TransportResult};
use hwc_core::transport::MessageTransport;
use parking_lot::Mutex;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

const NOISE_FLOOR_DBM: f64 = -75.0;

#[derive(Debug, Clone)]
struct OsaState {
    active_trace: Trace,
    attributes: [TraceAttribute; 7],
    roll_average: u32,
    start_m: f64,
    stop_m: f64,
    resolution_m: f64,
    points: u32,
    reference_level: f64,
    level_unit: LevelUnit,
    sensitivity: Sensitivity,
    chopper: Chopper,
    sweep_mode: SweepMode,
    level_scale: LevelScale,
}

impl Default for OsaState {
    fn default() -> Self {
        Self {
            active_trace: Trace::A,
            attributes: [
                TraceAttribute::Write,
                TraceAttribute::Fix,
                TraceAttribute::Fix,
                TraceAttribute::Fix,
                TraceAttribute::Fix,
                TraceAttribute::Fix,
                TraceAttribute::Fix,
            ],
            roll_average: 1,
            start_m: 1500e-9,
            stop_m: 1600e-9,
            resolution_m: 0.1e-9,
            points: 1001,
            reference_level: -10.0,
            level_unit: LevelUnit::Dbm,
            sensitivity: Sensitivity::Mid,
            chopper: Chopper::Off,
            sweep_mode: SweepMode::Repeat,
            level_scale: LevelScale::Log,
        }
    }
}

#[derive(Debug, Default)]
struct Simulation {
    state: OsaState,
    polls_remaining: u32,
    sweeps_started: u64,
    closed: bool,
}

/// In-process stand-in for an AQ6370 on the other end of a transport.
#[derive(Debug)]
pub struct SimulatedOsa {
    resource: String,
    sweep_polls: u32,
    timeout: Duration,
    line_center_m: f64,
    line_peak_dbm: f64,
    sim: Mutex<Simulation>,
}

impl Default for SimulatedOsa {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOsa {
    /// Instrument with a -10 dBm line at 1550 nm and 3-poll sweeps.
    pub fn new() -> Self {
        Self {
            resource: "SIM::AQ6370".to_string(),
            sweep_polls: 3,
            timeout: Duration::from_secs(2),
            line_center_m: 1550e-9,
            line_peak_dbm: -10.0,
            sim: Mutex::new(Simulation::default()),
        }
    }

    /// Number of `*OPC?` polls answered with 0 after a sweep starts.
    pub fn with_sweep_polls(mut self, polls: u32) -> Self {
        self.sweep_polls = polls;
        self
    }

    /// Timeout reported for queries the simulation does not understand.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Move the emission line.
    pub fn with_line(mut self, center_nm: f64, peak_dbm: f64) -> Self {
        self.line_center_m = center_nm * 1e-9;
        self.line_peak_dbm = peak_dbm;
        self
    }

    /// Sweeps started since construction.
    pub fn sweeps_started(&self) -> u64 {
        self.sim.lock().sweeps_started
    }

    fn wavelengths_m(state: &OsaState) -> Vec<f64> {
        let n = state.points.max(1) as usize;
        if n == 1 {
            return vec![state.start_m];
        }
        let step = (state.stop_m - state.start_m) / (n - 1) as f64;
        (0..n).map(|i| state.start_m + step * i as f64).collect()
    }

    fn levels(&self, state: &OsaState) -> Vec<f64> {
        // FWHM of the displayed line is the resolution bandwidth
        let fwhm = state.resolution_m.max(1e-12);
        let floor_mw = dbm_to_mw(NOISE_FLOOR_DBM);
        let peak_mw = dbm_to_mw(self.line_peak_dbm);

        Self::wavelengths_m(state)
            .into_iter()
            .map(|wl| {
                let x = (wl - self.line_center_m) / fwhm;
                let mw = floor_mw + peak_mw * (-4.0 * std::f64::consts::LN_2 * x * x).exp();
                match state.level_unit {
                    LevelUnit::Dbm | LevelUnit::DbmPerNm => 10.0 * mw.log10(),
                    LevelUnit::Watt | LevelUnit::WattPerNm => mw * 1e-3,
                }
            })
            .collect()
    }

    fn apply(&self, sim: &mut Simulation, header: &str, arg: &str) {
        match header {
            "CFORM1" | "*WAI" | "*CLS" => {}
            "*RST" => {
                sim.state = OsaState::default();
                sim.polls_remaining = 0;
            }
            "ABORT" | "ABOR" => sim.polls_remaining = 0,
            "INITIATE:IMMEDIATE" | "INIT" | "INITIATE" => {
                sim.polls_remaining = self.sweep_polls;
                sim.sweeps_started += 1;
                tracing::debug!(sweep = sim.sweeps_started, "simulated sweep started");
            }
            "INITIATE:SMODE" => set_from(&mut sim.state.sweep_mode, header, arg),
            "TRACE:ACTIVE" => set_from(&mut sim.state.active_trace, header, arg),
            "TRACE:ATTRIBUTE:RAVG" => set_from(&mut sim.state.roll_average, header, arg),
            "SENSE:SENSE" => set_from(&mut sim.state.sensitivity, header, arg),
            "SENSE:CHOPPER" => set_from(&mut sim.state.chopper, header, arg),
            "DISPLAY:TRACE:Y1:SPACING" => set_from(&mut sim.state.level_scale, header, arg),
            "SENSE:BANDWIDTH:RESOLUTION" => {
                if let Some(nm) = parse_nm(arg) {
                    sim.state.resolution_m = nm * 1e-9;
                }
            }
            "SENSE:WAVELENGTH:START" => {
                // "<a>NM; STOP <b>NM"
                let mut parts = arg.split(';');
                if let Some(nm) = parts.next().and_then(parse_nm) {
                    sim.state.start_m = nm * 1e-9;
                }
                if let Some(nm) = parts
                    .next()
                    .and_then(|p| p.trim().strip_prefix("STOP"))
                    .and_then(parse_nm)
                {
                    sim.state.stop_m = nm * 1e-9;
                }
            }
            _ => {
                if let Some(trace) = header.strip_prefix("TRACE:ATTRIBUTE:") {
                    match (trace.parse::<Trace>(), arg.parse::<TraceAttribute>()) {
                        (Ok(trace), Ok(attribute)) => {
                            sim.state.attributes[trace.code() as usize] = attribute;
                        }
                        _ => tracing::warn!(header, arg, "simulated OSA ignored bad trace attribute"),
                    }
                } else {
                    tracing::warn!(header, arg, "simulated OSA ignored unknown command");
                }
            }
        }
    }

    fn answer(&self, sim: &mut Simulation, command: &str, header: &str, arg: &str) -> TransportResult<String> {
        let state = &sim.state;
        let reply = match header {
            "*IDN?" => "YOKOGAWA,AQ6370D,SIMULATED,01.00".to_string(),
            "*OPC?" => {
                if sim.polls_remaining > 0 {
                    sim.polls_remaining -= 1;
                    "0".to_string()
                } else {
                    "1".to_string()
                }
            }
            "TRACE:ACTIVE?" => state.active_trace.mnemonic().to_string(),
            "TRACE:ATTRIBUTE:RAVG?" => state.roll_average.to_string(),
            "SENSE:WAVELENGTH:START?" => meters(state.start_m),
            "SENSE:WAVELENGTH:STOP?" => meters(state.stop_m),
            "SENSE:BANDWIDTH?" | "SENSE:BANDWIDTH:RESOLUTION?" => meters(state.resolution_m),
            "SENSE:SWEEP:POINTS?" => state.points.to_string(),
            "DISPLAY:WINDOW:TRACE:Y1:SCALE:RLEVEL?" => format!("{:.3}", state.reference_level),
            "DISPLAY:WINDOW:TRACE:Y1:SCALE:UNIT?" => state.level_unit.code().to_string(),
            "DISPLAY:WINDOW:TRACE:Y1:SCALE:SPACING?" => state.level_scale.code().to_string(),
            "SENSE:SENSE?" => state.sensitivity.code().to_string(),
            "SENSE:CHOPPER?" => state.chopper.code().to_string(),
            "INITIATE:SMODE?" => state.sweep_mode.code().to_string(),
            "TRAC:DATA:X?" | "TRACE:DATA:X?" => {
                arg.parse::<Trace>()
                    .map_err(|_| TransportError::timeout(command, self.timeout))?;
                join(Self::wavelengths_m(state).into_iter().map(meters))
            }
            "TRAC:DATA:Y?" | "TRACE:DATA:Y?" => {
                arg.parse::<Trace>()
                    .map_err(|_| TransportError::timeout(command, self.timeout))?;
                join(self.levels(state).into_iter().map(|v| format!("{:.3E}", v)))
            }
            _ => match header
                .strip_prefix("TRACE:ATTRIBUTE:")
                .and_then(|h| h.strip_suffix('?'))
                .map(str::parse::<Trace>)
            {
                Some(Ok(trace)) => state.attributes[trace.code() as usize].code().to_string(),
                _ => return Err(TransportError::timeout(command, self.timeout)),
            },
        };
        Ok(reply)
    }
}

fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

fn meters(value: f64) -> String {
    format!("{:+.8E}", value)
}

fn join(values: impl Iterator<Item = String>) -> String {
    values.collect::<Vec<_>>().join(",")
}

fn parse_nm(text: &str) -> Option<f64> {
    let text = text.trim();
    text.strip_suffix("NM").unwrap_or(text).trim().parse().ok()
}

fn set_from<S>(slot: &mut S, header: &str, arg: &str)
where
    S: FromStr,
    S::Err: Display,
{
    match arg.parse::<S>() {
        Ok(value) => *slot = value,
        Err(e) => tracing::warn!(header, arg, error = %e, "simulated OSA ignored bad argument"),
    }
}

/// Uppercase, drop the leading colon, and split off the argument.
fn split_command(command: &str) -> (String, String) {
    let upper = command.trim().to_ascii_uppercase();
    let upper = upper.trim_start_matches(':');
    match upper.split_once(char::is_whitespace) {
        Some((header, arg)) => (header.to_string(), arg.trim().to_string()),
        None => (upper.to_string(), String::new()),
    }
}

#[async_trait]
impl MessageTransport for SimulatedOsa {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn write(&self, command: &str) -> TransportResult<()> {
        let mut sim = self.sim.lock();
        if sim.closed {
            return Err(TransportError::Closed);
        }
        let (header, arg) = split_command(command);
        tracing::trace!(command, "simulated OSA write");
        self.apply(&mut sim, &header, &arg);
        Ok(())
    }

    async fn query(&self, command: &str) -> TransportResult<String> {
        let mut sim = self.sim.lock();
        if sim.closed {
            return Err(TransportError::Closed);
        }
        let (header, arg) = split_command(command);
        self.answer(&mut sim, command, &header, &arg)
    }

    async fn read(&self) -> TransportResult<String> {
        if self.sim.lock().closed {
            return Err(TransportError::Closed);
        }
        Err(TransportError::timeout("read", self.timeout))
    }

    async fn close(&self) -> TransportResult<()> {
        self.sim.lock().closed = true;
        Ok(())
    }
}
