//! Typed OSA settings.
//!
//! The AQ63xx answers setting queries with a numeric code but accepts a
//! mnemonic when the setting is written. Each enum here carries both
//! directions plus a display label:
//!
//! | type             | codes                                                     |
//! |------------------|-----------------------------------------------------------|
//! | [`Trace`]        | 0..6 = TRA..TRG                                           |
//! | [`TraceAttribute`] | 0 WRITE, 1 FIX, 2 MAX HOLD, 3 MIN HOLD, 4 ROLL AVG, 5 CALC |
//! | [`Sensitivity`]  | 0 NHLD, 1 NAUT, 2 MID, 3 HIGH1, 4 HIGH2, 5 HIGH3, 6 NORM   |
//! | [`Chopper`]      | 0 OFF, 2 SWITCH                                           |
//! | [`SweepMode`]    | 1 SING, 2 REP, 3 AUTO, 4 SEGM                             |
//! | [`LevelScale`]   | 0 LOG, 1 LIN                                              |
//! | [`LevelUnit`]    | 0 dBm, 1 W, 2 dBm/nm, 3 W/nm                              |
//!
//! Parsing user input (`"SING"`, `"max hold"`) goes through [`FromStr`] and
//! fails with [`DeviceError::InvalidSetting`]. An unknown code in an
//! instrument reply is a [`TransportError::MalformedResponse`].

use hwc_core::error::{DeviceError, TransportError, TransportResult};
use hwc_core::transport::parse_i64;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! osa_setting {
    (
        $(#[$meta:meta])*
        $name:ident ($setting:literal) {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal, $mnemonic:literal, $label:literal; )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in code order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Numeric code used in instrument replies.
            pub fn code(self) -> i64 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            /// Mnemonic written to the instrument.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $($name::$variant => $mnemonic,)+
                }
            }

            /// Human-readable name.
            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            /// Look up a reply code.
            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Parse the numeric reply to `command`.
            pub fn from_response(command: &str, response: &str) -> TransportResult<Self> {
                let code = parse_i64(command, response)?;
                Self::from_code(code).ok_or_else(|| {
                    TransportError::malformed(
                        command,
                        response,
                        format!("unknown {} code {}", $setting, code),
                    )
                })
            }
        }

        impl FromStr for $name {
            type Err = DeviceError;

            /// Accepts the mnemonic or the label, case-insensitively.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| {
                        v.mnemonic().eq_ignore_ascii_case(wanted)
                            || v.label().eq_ignore_ascii_case(wanted)
                    })
                    .ok_or_else(|| DeviceError::invalid_setting($setting, s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.label())
            }
        }
    };
}

osa_setting! {
    /// One of the seven trace memories.
    Trace("trace") {
        A = 0, "TRA", "TRA";
        B = 1, "TRB", "TRB";
        C = 2, "TRC", "TRC";
        D = 3, "TRD", "TRD";
        E = 4, "TRE", "TRE";
        F = 5, "TRF", "TRF";
        G = 6, "TRG", "TRG";
    }
}

osa_setting! {
    /// How a trace memory is updated by sweeps.
    TraceAttribute("trace attribute") {
        Write = 0, "WRIT", "WRITE";
        Fix = 1, "FIX", "FIX";
        MaxHold = 2, "MAX", "MAX HOLD";
        MinHold = 3, "MIN", "MIN HOLD";
        /// Rolling average over `RAVG` sweeps
        RollAverage = 4, "RAVG", "ROLL AVG";
        Calculate = 5, "CALC", "CALC";
    }
}

osa_setting! {
    /// Detector sensitivity.
    Sensitivity("sensitivity") {
        NormalHold = 0, "NHLD", "NORMAL HOLD";
        NormalAuto = 1, "NAUT", "NORMAL AUTO";
        Mid = 2, "MID", "MID";
        High1 = 3, "HIGH1", "HIGH1";
        High2 = 4, "HIGH2", "HIGH2";
        High3 = 5, "HIGH3", "HIGH3";
        Normal = 6, "NORM", "NORMAL";
    }
}

osa_setting! {
    /// Chopper action used with the high sensitivities.
    Chopper("chopper") {
        Off = 0, "OFF", "OFF";
        Switch = 2, "SWITCH", "SWITCH";
    }
}

osa_setting! {
    /// Sweep trigger mode.
    SweepMode("sweep mode") {
        Single = 1, "SING", "SINGLE";
        Repeat = 2, "REP", "REPEAT";
        Auto = 3, "AUTO", "AUTO";
        Segment = 4, "SEGM", "SEGMENT";
    }
}

osa_setting! {
    /// Vertical axis spacing.
    LevelScale("level scale") {
        Log = 0, "LOG", "LOG";
        Linear = 1, "LIN", "LIN";
    }
}

osa_setting! {
    /// Vertical axis unit.
    LevelUnit("level unit") {
        Dbm = 0, "DBM", "dBm";
        Watt = 1, "W", "W";
        DbmPerNm = 2, "DBM/NM", "dBm/nm";
        WattPerNm = 3, "W/NM", "W/nm";
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for t in Trace::ALL {
            assert_eq!(Trace::from_code(t.code()), Some(*t));
        }
        assert_eq!(Trace::ALL.len(), 7);
        assert_eq!(Trace::G.code(), 6);
        assert_eq!(Chopper::from_code(2), Some(Chopper::Switch));
        assert_eq!(Chopper::from_code(1), None);
        assert_eq!(SweepMode::from_code(0), None);
    }

    #[test]
    fn parse_accepts_mnemonic_and_label() {
        assert_eq!("SING".parse::<SweepMode>().unwrap(), SweepMode::Single);
        assert_eq!("single".parse::<SweepMode>().unwrap(), SweepMode::Single);
        assert_eq!("max hold".parse::<TraceAttribute>().unwrap(), TraceAttribute::MaxHold);
        assert_eq!("RAVG".parse::<TraceAttribute>().unwrap(), TraceAttribute::RollAverage);
        assert_eq!("trg".parse::<Trace>().unwrap(), Trace::G);
        assert_eq!("NORMAL".parse::<Sensitivity>().unwrap(), Sensitivity::Normal);
    }

    #[test]
    fn unknown_mnemonic_is_invalid_setting() {
        match "SINGLESHOT".parse::<SweepMode>() {
            Err(DeviceError::InvalidSetting { setting, value }) => {
                assert_eq!(setting, "sweep mode");
                assert_eq!(value, "SINGLESHOT");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!("TRH".parse::<Trace>().is_err());
    }

    #[test]
    fn reply_codes_parse() {
        assert_eq!(
            Sensitivity::from_response(":SENSe:SENSe?", "3\r\n").unwrap(),
            Sensitivity::High1
        );
        assert!(matches!(
            Sensitivity::from_response(":SENSe:SENSe?", "9"),
            Err(TransportError::MalformedResponse { .. })
        ));
        assert!(matches!(
            LevelUnit::from_response(":DISP:UNIT?", "dBm"),
            Err(TransportError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn level_unit_keeps_density_units_apart() {
        assert_eq!(LevelUnit::from_code(2), Some(LevelUnit::DbmPerNm));
        assert_eq!(LevelUnit::DbmPerNm.to_string(), "dBm/nm");
        assert_ne!(LevelUnit::from_code(0), LevelUnit::from_code(2));
    }

    #[test]
    fn write_mnemonics_differ_from_labels() {
        assert_eq!(TraceAttribute::Write.mnemonic(), "WRIT");
        assert_eq!(TraceAttribute::MaxHold.mnemonic(), "MAX");
        assert_eq!(TraceAttribute::MaxHold.label(), "MAX HOLD");
    }
}
